//! Metric sinks and the fan-out that feeds them.
//!
//! Every sink receives the same snapshot. Each one mangles names with its
//! own separator, formats in its own wire format and fails on its own: an
//! error in one sink is logged and recorded, and the rest still run.

pub mod cloudwatch;
pub mod ganglia;
pub mod graphite;
pub mod nsca;
pub mod statsd;
pub mod stdout;

use std::io::{self, Write};
use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;
use tracing::{info, warn};

use crate::metric::{Metric, mangle_name};
use crate::runner::CommandStatus;

pub use cloudwatch::{CloudWatchApi, CloudWatchError, CloudWatchSink, HttpCloudWatch};
pub use ganglia::GangliaSink;
pub use graphite::GraphiteSink;
pub use nsca::NscaSink;
pub use statsd::StatsdSink;
pub use stdout::StdoutSink;

/// Output selectable with `--output`. Declaration order is submission order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, clap::ValueEnum)]
pub enum SinkKind {
    Ganglia,
    Graphite,
    Stdout,
    Cloudwatch,
    Nsca,
    Statsd,
}

impl SinkKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SinkKind::Ganglia => "ganglia",
            SinkKind::Graphite => "graphite",
            SinkKind::Stdout => "stdout",
            SinkKind::Cloudwatch => "cloudwatch",
            SinkKind::Nsca => "nsca",
            SinkKind::Statsd => "statsd",
        }
    }
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("invalid host:port found for {sink}: '{host}'")]
    InvalidHost { sink: &'static str, host: String },

    #[error("cannot connect to {target}: {source}")]
    Connect { target: String, source: io::Error },

    #[error("cannot send to {target}: {source}")]
    Send { target: String, source: io::Error },

    #[error("failed to run {command}: {source}")]
    Command { command: String, source: io::Error },

    #[error("{command} failed with {status}")]
    CommandFailed {
        command: String,
        status: CommandStatus,
    },

    #[error("cannot write output: {0}")]
    Output(#[from] io::Error),

    #[error(transparent)]
    CloudWatch(#[from] CloudWatchError),
}

impl SinkError {
    /// Fatal errors make the process exit non-zero once every sink has run.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SinkError::CloudWatch(_))
    }
}

/// Prefix and suffix applied to every metric name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NamingOptions {
    pub prefix: String,
    pub suffix: Option<String>,
}

impl NamingOptions {
    pub fn apply(&self, name: &str, separator: &str) -> String {
        mangle_name(name, &self.prefix, self.suffix.as_deref(), separator)
    }
}

/// Settings shared by all sinks for one submission.
pub struct SubmitContext<'a> {
    pub naming: &'a NamingOptions,
    pub dry_run: bool,
    /// Destination for stdout sink lines and dry-run output.
    pub out: &'a mut dyn Write,
}

pub trait Sink {
    fn kind(&self) -> SinkKind;

    /// Where the sink delivers, for log messages.
    fn target(&self) -> String;

    fn submit(&self, metrics: &[Metric], ctx: &mut SubmitContext<'_>) -> Result<(), SinkError>;
}

/// A sink that failed during [`submit`].
#[derive(Debug)]
pub struct SinkFailure {
    pub kind: SinkKind,
    pub target: String,
    pub error: SinkError,
}

#[derive(Debug, Default)]
pub struct SubmitReport {
    pub delivered: Vec<SinkKind>,
    pub failures: Vec<SinkFailure>,
}

impl SubmitReport {
    pub fn has_fatal(&self) -> bool {
        self.failures.iter().any(|f| f.error.is_fatal())
    }
}

/// Sends `metrics` to every sink in order, containing failures per sink.
pub fn submit(
    metrics: &[Metric],
    sinks: &[Box<dyn Sink>],
    ctx: &mut SubmitContext<'_>,
) -> SubmitReport {
    let mut report = SubmitReport::default();

    for sink in sinks {
        let kind = sink.kind();
        match sink.submit(metrics, ctx) {
            Ok(()) => {
                info!("Submitted {} metrics to {}", metrics.len(), kind.as_str());
                report.delivered.push(kind);
            }
            Err(error) => {
                let target = sink.target();
                warn!(
                    "Failed to submit metrics to {} ({}): {}",
                    kind.as_str(),
                    target,
                    error
                );
                report.failures.push(SinkFailure {
                    kind,
                    target,
                    error,
                });
            }
        }
    }

    report
}

static HOST_PORT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[\w.\-]+:\d+$").expect("valid host:port regex"));

/// A validated `host:port` target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostPort {
    pub host: String,
    pub port: u16,
}

impl HostPort {
    pub fn parse(sink: &'static str, target: &str) -> Result<Self, SinkError> {
        let invalid = || SinkError::InvalidHost {
            sink,
            host: target.to_string(),
        };
        if !HOST_PORT.is_match(target) {
            return Err(invalid());
        }
        let (host, port) = target.rsplit_once(':').ok_or_else(invalid)?;
        let port = port.parse::<u16>().map_err(|_| invalid())?;
        Ok(Self {
            host: host.to_string(),
            port,
        })
    }
}

impl std::fmt::Display for HostPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}
