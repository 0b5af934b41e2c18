//! logster - incremental log tailing into monitoring metrics.
//!
//! Each run reads the lines appended to a log file since the previous run,
//! feeds them to a parser, and sends the resulting metric snapshot to one or
//! more sinks (stdout, graphite, statsd, nsca, ganglia, cloudwatch).

pub mod config;
pub mod driver;
pub mod lock;
pub mod logging;
pub mod metric;
pub mod parser;
pub mod runner;
pub mod sink;
pub mod state;
pub mod tail;
