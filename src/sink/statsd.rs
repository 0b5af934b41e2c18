//! statsd gauges: one `<name>:<value>|g` datagram per metric.

use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs, UdpSocket};

use tracing::{debug, warn};

use super::{HostPort, Sink, SinkError, SinkKind, SubmitContext};
use crate::metric::Metric;

const SEPARATOR: &str = ".";

#[derive(Debug, Clone)]
pub struct StatsdSink {
    host: String,
}

impl StatsdSink {
    pub fn new(host: impl Into<String>) -> Self {
        Self { host: host.into() }
    }
}

impl Sink for StatsdSink {
    fn kind(&self) -> SinkKind {
        SinkKind::Statsd
    }

    fn target(&self) -> String {
        self.host.clone()
    }

    fn submit(&self, metrics: &[Metric], ctx: &mut SubmitContext<'_>) -> Result<(), SinkError> {
        let target = HostPort::parse("statsd", &self.host)?;
        let send_error = |source| SinkError::Send {
            target: target.to_string(),
            source,
        };

        let socket = if ctx.dry_run {
            None
        } else {
            let addr = resolve(&target).map_err(send_error)?;
            Some((bind_for(addr).map_err(send_error)?, addr))
        };

        for metric in metrics {
            if !metric.value.is_numeric() {
                warn!(
                    "Cannot send {} to statsd, {} is not a numeric value.",
                    metric.name, metric.value
                );
                continue;
            }

            let name = ctx.naming.apply(&metric.name, SEPARATOR);
            let payload = format!("{}:{}|g", name, metric.value);
            debug!("Submitting statsd metric: {}", payload);

            match &socket {
                Some((socket, addr)) => {
                    socket.send_to(payload.as_bytes(), *addr).map_err(send_error)?;
                }
                None => writeln!(ctx.out, "{} {}", self.host, payload)?,
            }
        }
        Ok(())
    }
}

/// First IPv4 address of the target, or its first address of any family.
fn resolve(target: &HostPort) -> io::Result<SocketAddr> {
    let addrs: Vec<SocketAddr> = (target.host.as_str(), target.port)
        .to_socket_addrs()?
        .collect();
    addrs
        .iter()
        .find(|a| a.is_ipv4())
        .or_else(|| addrs.first())
        .copied()
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no address resolved"))
}

/// An unbound-port socket of the same family as `addr`.
fn bind_for(addr: SocketAddr) -> io::Result<UdpSocket> {
    match addr {
        SocketAddr::V4(_) => UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)),
        SocketAddr::V6(_) => UdpSocket::bind((Ipv6Addr::UNSPECIFIED, 0)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::NamingOptions;
    use std::time::Duration;

    #[test]
    fn test_sends_one_gauge_per_numeric_metric() {
        let server = UdpSocket::bind("127.0.0.1:0").unwrap();
        server
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        let port = server.local_addr().unwrap().port();

        let metrics = vec![
            Metric::new("line_rate", 2.0),
            Metric::new("version", "beta"),
            Metric::new("count", 7i64),
        ];
        let naming = NamingOptions {
            prefix: String::new(),
            suffix: Some("prod".to_string()),
        };
        let mut out = Vec::new();
        let mut ctx = SubmitContext {
            naming: &naming,
            dry_run: false,
            out: &mut out,
        };
        StatsdSink::new(format!("127.0.0.1:{}", port))
            .submit(&metrics, &mut ctx)
            .unwrap();

        let mut buf = [0u8; 512];
        let n = server.recv(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"line_rate.prod:2.0|g");
        let n = server.recv(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"count.prod:7|g");
    }

    #[test]
    fn test_resolve_prefers_ipv4() {
        let target = HostPort::parse("statsd", "localhost:8125").unwrap();
        let addr = resolve(&target).unwrap();
        assert!(addr.ip().is_loopback());
        assert_eq!(addr.port(), 8125);
    }

    #[test]
    fn test_socket_family_follows_target() {
        // Hosts without IPv6 loopback cannot run this.
        let Ok(server) = UdpSocket::bind("[::1]:0") else {
            return;
        };
        server
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        let addr = server.local_addr().unwrap();

        let socket = bind_for(addr).unwrap();
        assert!(socket.local_addr().unwrap().is_ipv6());
        socket.send_to(b"x:1|g", addr).unwrap();

        let mut buf = [0u8; 64];
        let n = server.recv(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"x:1|g");
    }

    #[test]
    fn test_dry_run_skips_non_numeric() {
        let metrics = vec![Metric::new("status", "down"), Metric::new("rate", "1.5")];
        let naming = NamingOptions::default();
        let mut out = Vec::new();
        let mut ctx = SubmitContext {
            naming: &naming,
            dry_run: true,
            out: &mut out,
        };
        StatsdSink::new("statsd:8125")
            .submit(&metrics, &mut ctx)
            .unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "statsd:8125 rate:1.5|g\n");
    }
}
