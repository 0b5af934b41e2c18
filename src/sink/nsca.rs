//! Nagios passive checks via `send_nsca`.
//!
//! Each metric becomes one `<service host>\t<name>\t<value>\t<unit>` line
//! piped to `send_nsca -H <host> -p <port>`.

use tracing::debug;

use super::{HostPort, Sink, SinkError, SinkKind, SubmitContext};
use crate::metric::Metric;
use crate::runner::{CommandRunner, CommandSpec};

pub const DEFAULT_SEND_NSCA: &str = "/usr/sbin/send_nsca";
const SEPARATOR: &str = "_";

pub struct NscaSink<R: CommandRunner> {
    host: String,
    service_hostname: String,
    send_nsca: String,
    runner: R,
}

impl<R: CommandRunner> NscaSink<R> {
    pub fn new(host: impl Into<String>, service_hostname: impl Into<String>, runner: R) -> Self {
        Self {
            host: host.into(),
            service_hostname: service_hostname.into(),
            send_nsca: DEFAULT_SEND_NSCA.to_string(),
            runner,
        }
    }

    pub fn with_program(mut self, send_nsca: impl Into<String>) -> Self {
        self.send_nsca = send_nsca.into();
        self
    }
}

impl<R: CommandRunner> Sink for NscaSink<R> {
    fn kind(&self) -> SinkKind {
        SinkKind::Nsca
    }

    fn target(&self) -> String {
        self.host.clone()
    }

    fn submit(&self, metrics: &[Metric], ctx: &mut SubmitContext<'_>) -> Result<(), SinkError> {
        let target = HostPort::parse("NSCA", &self.host)?;

        for metric in metrics {
            let name = ctx.naming.apply(&metric.name, SEPARATOR);
            let status = format!(
                "{}\t{}\t{}\t{}",
                self.service_hostname, name, metric.value, metric.unit
            );
            debug!("Submitting NSCA status: {}", status);

            let spec = CommandSpec::new(&self.send_nsca)
                .args(["-H".to_string(), target.host.clone()])
                .args(["-p".to_string(), target.port.to_string()])
                .stdin(format!("{}\n", status));

            if ctx.dry_run {
                writeln!(ctx.out, "echo '{}' | {}", status, spec)?;
                continue;
            }

            let exit = self.runner.run(&spec).map_err(|source| SinkError::Command {
                command: spec.to_string(),
                source,
            })?;
            if !exit.success() {
                return Err(SinkError::CommandFailed {
                    command: spec.to_string(),
                    status: exit,
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::MockRunner;
    use crate::sink::NamingOptions;

    fn metrics() -> Vec<Metric> {
        vec![Metric::new("line_rate", 2.0).with_unit("lines per sec")]
    }

    #[test]
    fn test_pipes_status_line_to_send_nsca() {
        let runner = MockRunner::new();
        let sink = NscaSink::new("nagios:5667", "web01", runner.clone());
        let naming = NamingOptions {
            prefix: "app".to_string(),
            suffix: None,
        };
        let mut out = Vec::new();
        let mut ctx = SubmitContext {
            naming: &naming,
            dry_run: false,
            out: &mut out,
        };

        sink.submit(&metrics(), &mut ctx).unwrap();

        let calls = runner.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].program, DEFAULT_SEND_NSCA);
        assert_eq!(calls[0].args, vec!["-H", "nagios", "-p", "5667"]);
        assert_eq!(
            calls[0].stdin.as_deref(),
            Some("web01\tapp_line_rate\t2.0\tlines per sec\n")
        );
    }

    #[test]
    fn test_dry_run_prints_pipeline() {
        let runner = MockRunner::new();
        let sink = NscaSink::new("nagios:5667", "web01", runner.clone()).with_program("send_nsca");
        let naming = NamingOptions::default();
        let mut out = Vec::new();
        let mut ctx = SubmitContext {
            naming: &naming,
            dry_run: true,
            out: &mut out,
        };

        sink.submit(&metrics(), &mut ctx).unwrap();

        assert!(runner.calls().is_empty());
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "echo 'web01\tline_rate\t2.0\tlines per sec' | send_nsca -H nagios -p 5667\n"
        );
    }

    #[test]
    fn test_failed_send_is_reported() {
        let runner = MockRunner::new().with_output("send_nsca", "", 2);
        let sink = NscaSink::new("nagios:5667", "web01", runner).with_program("send_nsca");
        let naming = NamingOptions::default();
        let mut out = Vec::new();
        let mut ctx = SubmitContext {
            naming: &naming,
            dry_run: false,
            out: &mut out,
        };

        let err = sink.submit(&metrics(), &mut ctx).unwrap_err();
        assert!(matches!(err, SinkError::CommandFailed { status, .. } if status.code == Some(2)));
    }

    #[test]
    fn test_invalid_host() {
        let sink = NscaSink::new("nagios", "web01", MockRunner::new());
        let naming = NamingOptions::default();
        let mut out = Vec::new();
        let mut ctx = SubmitContext {
            naming: &naming,
            dry_run: false,
            out: &mut out,
        };
        assert!(matches!(
            sink.submit(&metrics(), &mut ctx),
            Err(SinkError::InvalidHost { sink: "NSCA", .. })
        ));
    }
}
