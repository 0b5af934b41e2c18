//! Graphite plaintext protocol: `<name> <value> <timestamp>\n` over one TCP
//! connection per submission.

use std::io::{BufWriter, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use tracing::debug;

use super::{HostPort, Sink, SinkError, SinkKind, SubmitContext};
use crate::metric::Metric;

const SEPARATOR: &str = ".";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct GraphiteSink {
    host: String,
}

impl GraphiteSink {
    pub fn new(host: impl Into<String>) -> Self {
        Self { host: host.into() }
    }

    fn connect(target: &HostPort) -> Result<TcpStream, SinkError> {
        let connect_error = |source| SinkError::Connect {
            target: target.to_string(),
            source,
        };
        let mut last_error = None;
        for addr in (target.host.as_str(), target.port)
            .to_socket_addrs()
            .map_err(connect_error)?
        {
            match TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT) {
                Ok(stream) => return Ok(stream),
                Err(e) => last_error = Some(e),
            }
        }
        Err(connect_error(last_error.unwrap_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::NotFound, "no address resolved")
        })))
    }
}

impl Sink for GraphiteSink {
    fn kind(&self) -> SinkKind {
        SinkKind::Graphite
    }

    fn target(&self) -> String {
        self.host.clone()
    }

    fn submit(&self, metrics: &[Metric], ctx: &mut SubmitContext<'_>) -> Result<(), SinkError> {
        let target = HostPort::parse("Graphite", &self.host)?;

        let mut stream = if ctx.dry_run {
            None
        } else {
            Some(BufWriter::new(Self::connect(&target)?))
        };

        for metric in metrics {
            let name = ctx.naming.apply(&metric.name, SEPARATOR);
            let line = format!("{} {} {}", name, metric.value, metric.timestamp);
            debug!("Submitting Graphite metric: {}", line);

            match stream.as_mut() {
                Some(stream) => writeln!(stream, "{}", line).map_err(|source| SinkError::Send {
                    target: target.to_string(),
                    source,
                })?,
                None => writeln!(ctx.out, "{} {}", self.host, line)?,
            }
        }

        if let Some(mut stream) = stream {
            stream.flush().map_err(|source| SinkError::Send {
                target: target.to_string(),
                source,
            })?;
        }
        Ok(())
    }
}
