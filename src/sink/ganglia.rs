//! Ganglia through the `gmetric` command line tool.

use tracing::debug;

use super::{Sink, SinkError, SinkKind, SubmitContext};
use crate::metric::Metric;
use crate::runner::{CommandRunner, CommandSpec};

pub const DEFAULT_GMETRIC: &str = "/usr/bin/gmetric";
pub const DEFAULT_GMETRIC_OPTIONS: &str = "-d 180 -c /etc/ganglia/gmond.conf";
const SEPARATOR: &str = "_";

pub struct GangliaSink<R: CommandRunner> {
    gmetric: String,
    options: Vec<String>,
    runner: R,
}

impl<R: CommandRunner> GangliaSink<R> {
    /// `options` is split on whitespace and passed to gmetric before the
    /// per-metric arguments.
    pub fn new(options: &str, runner: R) -> Self {
        Self {
            gmetric: DEFAULT_GMETRIC.to_string(),
            options: options.split_whitespace().map(str::to_string).collect(),
            runner,
        }
    }

    pub fn with_program(mut self, gmetric: impl Into<String>) -> Self {
        self.gmetric = gmetric.into();
        self
    }

    pub fn command_for(&self, name: &str, metric: &Metric) -> CommandSpec {
        CommandSpec::new(&self.gmetric)
            .args(self.options.iter().cloned())
            .args(["--name".to_string(), name.to_string()])
            .args(["--value".to_string(), metric.value.to_string()])
            .args(["--type", metric.metric_type.as_str()])
            .args(["--units", metric.unit.as_str()])
            .args(["--title", metric.title.as_str()])
            .args(["--desc", metric.description.as_str()])
            .args(["--slope", metric.slope.as_str()])
    }
}

impl<R: CommandRunner> Sink for GangliaSink<R> {
    fn kind(&self) -> SinkKind {
        SinkKind::Ganglia
    }

    fn target(&self) -> String {
        self.gmetric.clone()
    }

    fn submit(&self, metrics: &[Metric], ctx: &mut SubmitContext<'_>) -> Result<(), SinkError> {
        for metric in metrics {
            let name = ctx.naming.apply(&metric.name, SEPARATOR);
            let spec = self.command_for(&name, metric);
            debug!("Submitting Ganglia metric: {}", spec);

            if ctx.dry_run {
                writeln!(ctx.out, "{}", spec)?;
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
    use crate::metric::{MetricType, Slope};
    use crate::runner::MockRunner;
    use crate::sink::NamingOptions;

    #[test]
    fn test_gmetric_arguments() {
        let runner = MockRunner::new();
        let sink = GangliaSink::new(DEFAULT_GMETRIC_OPTIONS, runner.clone());
        let metrics = vec![
            Metric::new("raw.api.200", 12i64)
                .with_type(MetricType::Int32)
                .with_unit("Responses")
                .with_slope(Slope::Positive),
        ];
        let naming = NamingOptions {
            prefix: "web".to_string(),
            suffix: None,
        };
        let mut out = Vec::new();
        let mut ctx = SubmitContext {
            naming: &naming,
            dry_run: false,
            out: &mut out,
        };

        sink.submit(&metrics, &mut ctx).unwrap();

        let calls = runner.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].program, DEFAULT_GMETRIC);
        assert_eq!(
            calls[0].args,
            vec![
                "-d", "180", "-c", "/etc/ganglia/gmond.conf", "--name", "web_raw.api.200",
                "--value", "12", "--type", "int32", "--units", "Responses", "--title", "",
                "--desc", "", "--slope", "positive",
            ]
        );
    }

    #[test]
    fn test_dry_run_prints_command() {
        let runner = MockRunner::new();
        let sink = GangliaSink::new("-d 60", runner.clone()).with_program("gmetric");
        let metrics = vec![Metric::new("line_rate", 2.0).with_unit("lines per sec")];
        let naming = NamingOptions::default();
        let mut out = Vec::new();
        let mut ctx = SubmitContext {
            naming: &naming,
            dry_run: true,
            out: &mut out,
        };

        sink.submit(&metrics, &mut ctx).unwrap();

        assert!(runner.calls().is_empty());
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "gmetric -d 60 --name line_rate --value 2.0 --type float --units \"lines per sec\" \
             --title \"\" --desc \"\" --slope both\n"
        );
    }

    #[test]
    fn test_missing_gmetric() {
        let runner = MockRunner::new().with_spawn_error("gmetric", "not found");
        let sink = GangliaSink::new("", runner).with_program("gmetric");
        let naming = NamingOptions::default();
        let mut out = Vec::new();
        let mut ctx = SubmitContext {
            naming: &naming,
            dry_run: false,
            out: &mut out,
        };
        let err = sink
            .submit(&[Metric::new("x", 1i64)], &mut ctx)
            .unwrap_err();
        assert!(matches!(err, SinkError::Command { .. }));
    }
}
