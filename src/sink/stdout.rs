use std::io::Write;

use super::{Sink, SinkError, SinkKind, SubmitContext};
use crate::metric::Metric;

/// Prints `<timestamp> <name> <value>` lines. Dry run changes nothing.
#[derive(Debug, Clone)]
pub struct StdoutSink {
    separator: String,
}

impl StdoutSink {
    pub fn new(separator: impl Into<String>) -> Self {
        Self {
            separator: separator.into(),
        }
    }
}

impl Sink for StdoutSink {
    fn kind(&self) -> SinkKind {
        SinkKind::Stdout
    }

    fn target(&self) -> String {
        "stdout".to_string()
    }

    fn submit(&self, metrics: &[Metric], ctx: &mut SubmitContext<'_>) -> Result<(), SinkError> {
        for metric in metrics {
            let name = ctx.naming.apply(&metric.name, &self.separator);
            writeln!(ctx.out, "{} {} {}", metric.timestamp, name, metric.value)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::NamingOptions;

    #[test]
    fn test_stdout_format_with_custom_separator() {
        let metrics = vec![
            Metric::new("line_rate", 2.0).with_timestamp(1700000000),
            Metric::new("status", "ok").with_timestamp(1700000000),
        ];
        let naming = NamingOptions {
            prefix: "web".to_string(),
            suffix: None,
        };
        let mut out = Vec::new();
        let mut ctx = SubmitContext {
            naming: &naming,
            dry_run: true,
            out: &mut out,
        };

        StdoutSink::new("-").submit(&metrics, &mut ctx).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "1700000000 web-line_rate 2.0\n1700000000 web-status ok\n"
        );
    }
}
