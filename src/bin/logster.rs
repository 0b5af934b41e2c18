//! logster - tail a log file and send the metrics it yields to monitoring
//! systems. Meant to be run periodically, e.g. from cron.

use std::io::{self, Write};
use std::process::ExitCode;

use clap::Parser;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use logster::config::{Args, Config, ConfigError, TailMode};
use logster::driver::{RunDriver, RunError, RunOutcome};
use logster::logging;
use logster::parser::{ParserError, ParserRegistry};
use logster::runner::SystemRunner;
use logster::sink::{self, SubmitContext};
use logster::state::StatePaths;
use logster::tail::{CommandTailSource, FileTailSource};

#[derive(Debug, Error)]
enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Parser(#[from] ParserError),

    #[error(transparent)]
    Run(#[from] RunError),

    #[error("cannot write to stdout: {0}")]
    Stdout(#[from] io::Error),
}

fn main() -> ExitCode {
    let args = Args::parse();

    let level = logging::level_for(args.debug, args.quiet);
    let _log = match logging::init(Some(&args.log_dir), level) {
        Ok(guard) => Some(guard),
        Err(e) => {
            eprintln!("logster: {}; logging to stderr only", e);
            logging::init(None, level).ok()
        }
    };

    let registry = ParserRegistry::with_builtin();

    if args.parser_help {
        return match registry.usage(&args.parser) {
            Ok(usage) => {
                println!("{}", usage);
                ExitCode::SUCCESS
            }
            Err(e) => {
                report_parser_error(&registry, &e);
                ExitCode::FAILURE
            }
        };
    }

    let config = match Config::from_args(args) {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    match run(&config, &registry) {
        Ok(code) => code,
        Err(AppError::Parser(e)) => {
            report_parser_error(&registry, &e);
            ExitCode::FAILURE
        }
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn report_parser_error(registry: &ParserRegistry, e: &ParserError) {
    error!("{}", e);
    if matches!(e, ParserError::NotFound(_)) {
        let known: Vec<&str> = registry.names().collect();
        error!("Available parsers: {}", known.join(", "));
    }
}

fn run(config: &Config, registry: &ParserRegistry) -> Result<ExitCode, AppError> {
    let run = &config.run;

    // Both fail fast, before any state is touched.
    let mut parser = registry.create(&run.parser, &run.parser_options)?;
    let sinks = config.sinks.build_sinks(SystemRunner::new())?;

    let paths = StatePaths::new(&run.state_dir, &run.parser, &run.log_file);
    info!(
        "Executing parser {} on logfile {}",
        run.parser,
        run.log_file.display()
    );
    debug!("Using state file {}", paths.checkpoint.display());

    let outcome = match &run.tail {
        TailMode::Logtail(logtail) => {
            RunDriver::new(CommandTailSource::new(logtail, SystemRunner::new())).run(
                parser.as_mut(),
                &run.log_file,
                &paths,
            )?
        }
        TailMode::Builtin => {
            RunDriver::new(FileTailSource::new()).run(parser.as_mut(), &run.log_file, &paths)?
        }
    };

    let report = match outcome {
        RunOutcome::Skipped => return Ok(ExitCode::FAILURE),
        RunOutcome::Bootstrapped => return Ok(ExitCode::SUCCESS),
        RunOutcome::Completed(report) => report,
    };

    let stdout = io::stdout();
    let mut out = stdout.lock();
    let mut ctx = SubmitContext {
        naming: &config.sinks.naming,
        dry_run: config.sinks.dry_run,
        out: &mut out,
    };
    let submitted = sink::submit(&report.metrics, &sinks, &mut ctx);
    out.flush()?;

    if submitted.has_fatal() {
        warn!("A fatal sink error occurred, exiting with failure");
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}
