//! Counts lines, optionally only those matching a regex, and reports the
//! rate of matching lines per second.
//!
//! ```text
//! logster --dry-run -o stdout LineCountLogster /var/log/syslog
//! logster --dry-run -o stdout --parser-options '--regex ^ERROR' LineCountLogster app.log
//! ```

use regex::Regex;

use super::{LogParser, ParseError, ParserError, options_usage, parse_options};
use crate::metric::{Metric, MetricType};

pub const NAME: &str = "LineCountLogster";

#[derive(clap::Parser, Debug)]
#[command(about = "Rate of (matching) line creation")]
struct Options {
    /// Regex to match lines against; it must match at the start of the line.
    #[arg(long, short = 'r')]
    regex: Option<String>,
}

pub struct LineCountParser {
    regex: Option<Regex>,
    line_count: u64,
}

impl LineCountParser {
    pub fn new(regex: Option<Regex>) -> Self {
        Self {
            regex,
            line_count: 0,
        }
    }

    pub fn from_options(option_string: &str) -> Result<Self, ParserError> {
        let opts: Options = parse_options(NAME, option_string)?;
        let regex = match opts.regex {
            Some(pattern) => Some(anchored(&pattern)?),
            None => None,
        };
        Ok(Self::new(regex))
    }

    pub fn usage() -> String {
        options_usage::<Options>(NAME)
    }

    pub fn line_count(&self) -> u64 {
        self.line_count
    }
}

/// Compiles `pattern` so it only matches at the start of a line.
fn anchored(pattern: &str) -> Result<Regex, ParserError> {
    Regex::new(&format!(r"\A(?:{})", pattern)).map_err(|e| ParserError::InvalidOptions {
        parser: NAME.to_string(),
        message: format!("bad --regex: {}", e),
    })
}

impl LogParser for LineCountParser {
    fn consume_line(&mut self, line: &str) -> Result<(), ParseError> {
        if self.regex.as_ref().is_none_or(|re| re.is_match(line)) {
            self.line_count += 1;
        }
        Ok(())
    }

    fn snapshot(&mut self, duration_secs: u64) -> Vec<Metric> {
        let rate = self.line_count as f64 / duration_secs.max(1) as f64;
        vec![
            Metric::new("line_rate", rate)
                .with_unit("lines per sec")
                .with_type(MetricType::Float),
        ]
    }
}
