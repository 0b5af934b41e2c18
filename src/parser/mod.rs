//! Log parser plugins.
//!
//! A parser owns all state accumulated during one run. The driver feeds it
//! every new line through [`LogParser::consume_line`] and asks for the
//! result exactly once through [`LogParser::snapshot`].
//!
//! Parsers are looked up by class name in a [`ParserRegistry`] and build
//! themselves from a freeform option string, e.g. `"--regex ^ERROR"`.

pub mod json;
pub mod line_count;
pub mod registry;
pub mod top_level_url;

use thiserror::Error;

use crate::metric::Metric;

pub use json::JsonParser;
pub use line_count::LineCountParser;
pub use registry::ParserRegistry;
pub use top_level_url::TopLevelUrlParser;

/// Per-line parsing failure.
///
/// Whether the run survives it is an explicit tag chosen by the parser;
/// nothing is recoverable unless the parser says so.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ParseError {
    message: String,
    recoverable: bool,
}

impl ParseError {
    /// A failure that only invalidates the current line.
    pub fn recoverable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            recoverable: true,
        }
    }

    /// A failure that aborts the run.
    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            recoverable: false,
        }
    }

    pub fn is_recoverable(&self) -> bool {
        self.recoverable
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Failure to obtain a parser instance.
#[derive(Debug, Error)]
pub enum ParserError {
    #[error("parser not found: {0}")]
    NotFound(String),

    #[error("invalid options for {parser}: {message}")]
    InvalidOptions { parser: String, message: String },
}

/// Capability every log parser implements.
pub trait LogParser {
    /// Folds one log line into the parser's state.
    fn consume_line(&mut self, line: &str) -> Result<(), ParseError>;

    /// Returns the metrics accumulated so far.
    ///
    /// `duration_secs` is the number of seconds covered by the lines fed in
    /// this run, always at least 1.
    fn snapshot(&mut self, duration_secs: u64) -> Vec<Metric>;
}

/// Parses a parser option string with clap.
///
/// The string is split on whitespace; `name` stands in for the binary name
/// so usage and error messages mention the parser.
pub(crate) fn parse_options<T: clap::Parser>(
    name: &str,
    option_string: &str,
) -> Result<T, ParserError> {
    let words = std::iter::once(name).chain(option_string.split_whitespace());
    T::try_parse_from(words).map_err(|e| ParserError::InvalidOptions {
        parser: name.to_string(),
        message: e.to_string().trim_end().to_string(),
    })
}

/// Renders clap's help for a parser's option struct.
pub(crate) fn options_usage<T: clap::CommandFactory>(name: &'static str) -> String {
    T::command().name(name).render_help().to_string()
}
