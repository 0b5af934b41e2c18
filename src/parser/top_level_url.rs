//! Counts access-log responses by top-level URL segment and HTTP status.
//!
//! For a request to `/api/v1/users` answered with `200`, the counters
//! `raw.api.200` and `raw.api.all` are incremented.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;

use super::{LogParser, ParseError, ParserError, options_usage, parse_options};
use crate::metric::{Metric, MetricType};

pub const NAME: &str = "TopLevelUrlLogster";

static ACCESS_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?x)
        ^(?P<ip>(\d{1,3}\.?){4})
        \s-\s-\s
        \[(?P<timestamp>.*)\]\s
        "(?P<method>\w+)\s
        /(?P<toplevelurl>[^/]+)(?P<url>/.*?)"\s
        (?P<status>\d{3})\s
        (?P<len>\d+)\s
        "(?P<referer>.*?)"\s
        "(?P<useragent>.*?)"
        "#,
    )
    .expect("access log pattern is valid")
});

#[derive(clap::Parser, Debug)]
#[command(about = "Response counts per top-level URL and status")]
struct Options {}

#[derive(Default)]
pub struct TopLevelUrlParser {
    /// top-level segment -> status -> count
    stats: BTreeMap<String, BTreeMap<String, i64>>,
}

impl TopLevelUrlParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_options(option_string: &str) -> Result<Self, ParserError> {
        let _: Options = parse_options(NAME, option_string)?;
        Ok(Self::new())
    }

    pub fn usage() -> String {
        options_usage::<Options>(NAME)
    }
}

impl LogParser for TopLevelUrlParser {
    fn consume_line(&mut self, line: &str) -> Result<(), ParseError> {
        let caps = ACCESS_LINE
            .captures(line)
            .ok_or_else(|| ParseError::recoverable("line is not an access log entry"))?;

        let top = caps["toplevelurl"].to_string();
        let status = caps["status"].to_string();
        *self
            .stats
            .entry(top)
            .or_default()
            .entry(status)
            .or_insert(0) += 1;
        Ok(())
    }

    fn snapshot(&mut self, _duration_secs: u64) -> Vec<Metric> {
        let mut metrics = Vec::new();
        for (top, statuses) in &self.stats {
            for (status, count) in statuses {
                metrics.push(
                    Metric::new(format!("raw.{}.{}", top, status), *count)
                        .with_unit("Responses")
                        .with_type(MetricType::Int32),
                );
            }
            let total: i64 = statuses.values().sum();
            metrics.push(
                Metric::new(format!("raw.{}.all", top), total).with_type(MetricType::Int32),
            );
        }
        metrics
    }
}
