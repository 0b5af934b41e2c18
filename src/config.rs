//! Command line options and the typed configuration built from them.

use std::path::PathBuf;

use clap::Parser;
use thiserror::Error;

use crate::logging::DEFAULT_LOG_DIR;
use crate::runner::CommandRunner;
use crate::sink::cloudwatch::{AwsCredentials, DEFAULT_REGION};
use crate::sink::ganglia::DEFAULT_GMETRIC_OPTIONS;
use crate::sink::{
    CloudWatchError, CloudWatchSink, GangliaSink, GraphiteSink, HttpCloudWatch, NamingOptions,
    NscaSink, Sink, SinkKind, StatsdSink, StdoutSink,
};
use crate::tail::command::DEFAULT_LOGTAIL;

pub const DEFAULT_STATE_DIR: &str = "/var/run";

/// Tail a log file and filter each line to generate metrics that can be
/// sent to common monitoring packages.
#[derive(Parser, Debug, Clone)]
#[command(name = "logster", version)]
pub struct Args {
    /// Parser class, e.g. LineCountLogster.
    pub parser: String,

    /// Log file to tail. Not needed with --parser-help.
    #[arg(required_unless_present = "parser_help")]
    pub log_file: Option<PathBuf>,

    /// Location of logtail.
    #[arg(long, default_value = DEFAULT_LOGTAIL)]
    pub logtail: String,

    /// Track the log offset internally instead of running logtail.
    #[arg(long)]
    pub builtin_tail: bool,

    /// Prefix for all published metrics.
    #[arg(short = 'p', long, default_value = "")]
    pub metric_prefix: String,

    /// Suffix for all published metrics.
    #[arg(short = 'x', long)]
    pub metric_suffix: Option<String>,

    /// Print usage and options for the selected parser.
    #[arg(long)]
    pub parser_help: bool,

    /// Options passed to the parser, e.g. "--regex ^ERROR".
    #[arg(long, default_value = "", allow_hyphen_values = true)]
    pub parser_options: String,

    /// Options passed to gmetric.
    #[arg(long, default_value = DEFAULT_GMETRIC_OPTIONS, allow_hyphen_values = true)]
    pub gmetric_options: String,

    /// Graphite collector, e.g. graphite.example.com:2003.
    #[arg(long)]
    pub graphite_host: Option<String>,

    /// statsd collector, e.g. statsd.example.com:8125.
    #[arg(long)]
    pub statsd_host: Option<String>,

    /// Amazon credential key.
    #[arg(long, env = "AWS_ACCESS_KEY_ID", hide_env_values = true)]
    pub aws_key: Option<String>,

    /// Amazon credential secret key.
    #[arg(long, env = "AWS_SECRET_ACCESS_KEY", hide_env_values = true)]
    pub aws_secret_key: Option<String>,

    /// CloudWatch region.
    #[arg(long, env = "AWS_REGION", default_value = DEFAULT_REGION)]
    pub aws_region: String,

    /// NSCA daemon, e.g. nsca.example.com:5667.
    #[arg(long)]
    pub nsca_host: Option<String>,

    /// host_name value for NSCA passive checks. Defaults to this host's name.
    #[arg(long)]
    pub nsca_service_hostname: Option<String>,

    /// Where to store the logtail state and lock files.
    #[arg(short = 's', long, default_value = DEFAULT_STATE_DIR)]
    pub state_dir: PathBuf,

    /// Where to store the logster log file.
    #[arg(short = 'l', long, default_value = DEFAULT_LOG_DIR)]
    pub log_dir: PathBuf,

    /// Where to send metrics (can be given multiple times).
    #[arg(short = 'o', long = "output", value_enum)]
    pub outputs: Vec<SinkKind>,

    /// Separator between prefix/suffix and name for stdout.
    #[arg(long, default_value = "_")]
    pub stdout_separator: String,

    /// Parse the log file but print what would be sent.
    #[arg(short = 'd', long)]
    pub dry_run: bool,

    /// More verbose logging.
    #[arg(short = 'D', long)]
    pub debug: bool,

    /// Only log errors.
    #[arg(short = 'q', long)]
    pub quiet: bool,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("a log file is required")]
    MissingLogFile,

    #[error("supply where the data should be sent with -o/--output")]
    NoOutputs,

    #[error("--{flag} is required for the {sink} output")]
    MissingHost { sink: &'static str, flag: &'static str },

    #[error("the cloudwatch output needs --aws-key and --aws-secret-key")]
    MissingCredentials,

    #[error(transparent)]
    CloudWatch(#[from] CloudWatchError),
}

/// How new log lines are obtained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TailMode {
    /// Run the given `logtail2` binary.
    Logtail(String),
    Builtin,
}

#[derive(Debug, Clone)]
pub struct RunConfig {
    pub parser: String,
    pub parser_options: String,
    pub log_file: PathBuf,
    pub state_dir: PathBuf,
    pub tail: TailMode,
}

#[derive(Debug, Clone)]
pub struct SinkConfig {
    /// Deduplicated, in submission order.
    pub outputs: Vec<SinkKind>,
    pub graphite_host: Option<String>,
    pub statsd_host: Option<String>,
    pub nsca_host: Option<String>,
    pub nsca_service_hostname: String,
    pub gmetric_options: String,
    pub aws_credentials: Option<AwsCredentials>,
    pub aws_region: String,
    pub stdout_separator: String,
    pub naming: NamingOptions,
    pub dry_run: bool,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub run: RunConfig,
    pub sinks: SinkConfig,
}

impl Config {
    pub fn from_args(args: Args) -> Result<Self, ConfigError> {
        let log_file = args.log_file.ok_or(ConfigError::MissingLogFile)?;

        let mut outputs = args.outputs;
        outputs.sort();
        outputs.dedup();

        let aws_credentials = match (args.aws_key, args.aws_secret_key) {
            (Some(access_key), Some(secret_key)) => Some(AwsCredentials {
                access_key,
                secret_key,
            }),
            _ => None,
        };

        let sinks = SinkConfig {
            outputs,
            graphite_host: args.graphite_host,
            statsd_host: args.statsd_host,
            nsca_host: args.nsca_host,
            nsca_service_hostname: args
                .nsca_service_hostname
                .unwrap_or_else(system_hostname),
            gmetric_options: args.gmetric_options,
            aws_credentials,
            aws_region: args.aws_region,
            stdout_separator: args.stdout_separator,
            naming: NamingOptions {
                prefix: args.metric_prefix,
                suffix: args.metric_suffix,
            },
            dry_run: args.dry_run,
        };
        sinks.validate()?;

        let tail = if args.builtin_tail {
            TailMode::Builtin
        } else {
            TailMode::Logtail(args.logtail)
        };

        Ok(Self {
            run: RunConfig {
                parser: args.parser,
                parser_options: args.parser_options,
                log_file,
                state_dir: args.state_dir,
                tail,
            },
            sinks,
        })
    }
}

impl SinkConfig {
    /// Checks that every selected output has what it needs. Host format is
    /// checked later, by the sink itself.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.outputs.is_empty() {
            return Err(ConfigError::NoOutputs);
        }
        for kind in &self.outputs {
            match kind {
                SinkKind::Graphite if self.graphite_host.is_none() => {
                    return Err(ConfigError::MissingHost {
                        sink: "graphite",
                        flag: "graphite-host",
                    });
                }
                SinkKind::Statsd if self.statsd_host.is_none() => {
                    return Err(ConfigError::MissingHost {
                        sink: "statsd",
                        flag: "statsd-host",
                    });
                }
                SinkKind::Nsca if self.nsca_host.is_none() => {
                    return Err(ConfigError::MissingHost {
                        sink: "nsca",
                        flag: "nsca-host",
                    });
                }
                SinkKind::Cloudwatch if !self.dry_run && self.aws_credentials.is_none() => {
                    return Err(ConfigError::MissingCredentials);
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Builds the selected sinks. Process-backed sinks share `runner`.
    pub fn build_sinks<R>(&self, runner: R) -> Result<Vec<Box<dyn Sink>>, ConfigError>
    where
        R: CommandRunner + Clone + 'static,
    {
        self.validate()?;
        let host = |h: &Option<String>| h.clone().unwrap_or_default();

        let mut sinks: Vec<Box<dyn Sink>> = Vec::with_capacity(self.outputs.len());
        for kind in &self.outputs {
            let sink: Box<dyn Sink> = match kind {
                SinkKind::Ganglia => {
                    Box::new(GangliaSink::new(&self.gmetric_options, runner.clone()))
                }
                SinkKind::Graphite => Box::new(GraphiteSink::new(host(&self.graphite_host))),
                SinkKind::Stdout => Box::new(StdoutSink::new(&self.stdout_separator)),
                SinkKind::Cloudwatch => {
                    let credentials = match &self.aws_credentials {
                        Some(c) => c.clone(),
                        None if self.dry_run => AwsCredentials {
                            access_key: String::new(),
                            secret_key: String::new(),
                        },
                        None => return Err(ConfigError::MissingCredentials),
                    };
                    Box::new(CloudWatchSink::new(HttpCloudWatch::new(
                        credentials,
                        &self.aws_region,
                    )?))
                }
                SinkKind::Nsca => Box::new(NscaSink::new(
                    host(&self.nsca_host),
                    &self.nsca_service_hostname,
                    runner.clone(),
                )),
                SinkKind::Statsd => Box::new(StatsdSink::new(host(&self.statsd_host))),
            };
            sinks.push(sink);
        }
        Ok(sinks)
    }
}

/// This machine's host name, or `localhost` when it cannot be read.
pub fn system_hostname() -> String {
    #[cfg(unix)]
    {
        let mut buf = [0u8; 256];
        // SAFETY: the buffer is valid for `buf.len()` bytes.
        let ret = unsafe { libc::gethostname(buf.as_mut_ptr().cast(), buf.len()) };
        if ret == 0 {
            let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
            if let Ok(name) = std::str::from_utf8(&buf[..end])
                && !name.is_empty()
            {
                return name.to_string();
            }
        }
    }
    "localhost".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::MockRunner;

    fn parse(args: &[&str]) -> Args {
        let mut argv = vec!["logster"];
        argv.extend_from_slice(args);
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_defaults() {
        let args = parse(&["LineCountLogster", "/var/log/app.log", "-o", "stdout"]);
        assert_eq!(args.state_dir, PathBuf::from("/var/run"));
        assert_eq!(args.log_dir, PathBuf::from("/var/log/logster"));
        assert_eq!(args.gmetric_options, "-d 180 -c /etc/ganglia/gmond.conf");
        assert_eq!(args.stdout_separator, "_");

        let config = Config::from_args(args).unwrap();
        assert_eq!(config.run.tail, TailMode::Logtail("/usr/sbin/logtail2".to_string()));
        assert_eq!(config.run.log_file, PathBuf::from("/var/log/app.log"));
        assert_eq!(config.sinks.outputs, vec![SinkKind::Stdout]);
        assert!(config.sinks.naming.suffix.is_none());
        assert!(!config.sinks.nsca_service_hostname.is_empty());
    }

    #[test]
    fn test_outputs_are_ordered_and_deduplicated() {
        let args = parse(&[
            "JsonLogster",
            "app.log",
            "-o",
            "statsd",
            "-o",
            "stdout",
            "--output",
            "ganglia",
            "-o",
            "stdout",
            "--statsd-host",
            "statsd:8125",
        ]);
        let config = Config::from_args(args).unwrap();
        assert_eq!(
            config.sinks.outputs,
            vec![SinkKind::Ganglia, SinkKind::Stdout, SinkKind::Statsd]
        );

        let sinks = config.sinks.build_sinks(MockRunner::new()).unwrap();
        let kinds: Vec<_> = sinks.iter().map(|s| s.kind()).collect();
        assert_eq!(kinds, config.sinks.outputs);
    }

    #[test]
    fn test_parser_options_accept_leading_dash() {
        let args = parse(&[
            "LineCountLogster",
            "app.log",
            "-o",
            "stdout",
            "--parser-options",
            "--regex ^ERROR",
            "-p",
            "web01",
            "-x",
            "prod",
            "--builtin-tail",
        ]);
        let config = Config::from_args(args).unwrap();
        assert_eq!(config.run.parser_options, "--regex ^ERROR");
        assert_eq!(config.run.tail, TailMode::Builtin);
        assert_eq!(config.sinks.naming.apply("line_rate", "."), "web01.line_rate.prod");
    }

    #[test]
    fn test_missing_outputs_and_hosts() {
        let err = Config::from_args(parse(&["LineCountLogster", "app.log"])).unwrap_err();
        assert!(matches!(err, ConfigError::NoOutputs));

        let err =
            Config::from_args(parse(&["LineCountLogster", "app.log", "-o", "graphite"])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingHost { sink: "graphite", .. }));

        let err = Config::from_args(parse(&["LineCountLogster", "app.log", "-o", "nsca"])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingHost { sink: "nsca", .. }));
    }

    #[test]
    fn test_cloudwatch_credentials() {
        let mut config = SinkConfig {
            outputs: vec![SinkKind::Cloudwatch],
            graphite_host: None,
            statsd_host: None,
            nsca_host: None,
            nsca_service_hostname: "web01".to_string(),
            gmetric_options: String::new(),
            aws_credentials: None,
            aws_region: DEFAULT_REGION.to_string(),
            stdout_separator: "_".to_string(),
            naming: NamingOptions::default(),
            dry_run: false,
        };
        assert!(matches!(config.validate(), Err(ConfigError::MissingCredentials)));

        config.dry_run = true;
        assert!(config.validate().is_ok());
        assert_eq!(config.build_sinks(MockRunner::new()).unwrap().len(), 1);
    }

    #[test]
    fn test_log_file_required_without_parser_help() {
        let argv = ["logster", "LineCountLogster"];
        assert!(Args::try_parse_from(argv).is_err());

        let args = parse(&["LineCountLogster", "--parser-help"]);
        assert!(args.parser_help);
        assert!(matches!(
            Config::from_args(args),
            Err(ConfigError::MissingLogFile)
        ));
    }

    #[test]
    fn test_unknown_output_rejected() {
        let argv = ["logster", "LineCountLogster", "app.log", "-o", "syslog"];
        assert!(Args::try_parse_from(argv).is_err());
    }
}
