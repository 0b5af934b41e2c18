//! Metric values emitted by parsers and consumed by sinks.
//!
//! A [`Metric`] is fixed at snapshot time. Sinks only read it; name
//! mangling happens on a copy of the name inside each sink.

use std::fmt;

/// Value type tag, as understood by ganglia's `gmetric --type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MetricType {
    #[default]
    Float,
    Int32,
    String,
}

impl MetricType {
    pub fn as_str(self) -> &'static str {
        match self {
            MetricType::Float => "float",
            MetricType::Int32 => "int32",
            MetricType::String => "string",
        }
    }
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Expected direction of change, passed through to ganglia.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Slope {
    Zero,
    Positive,
    Negative,
    #[default]
    Both,
    Unspecified,
}

impl Slope {
    pub fn as_str(self) -> &'static str {
        match self {
            Slope::Zero => "zero",
            Slope::Positive => "positive",
            Slope::Negative => "negative",
            Slope::Both => "both",
            Slope::Unspecified => "unspecified",
        }
    }
}

impl fmt::Display for Slope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scalar metric value.
#[derive(Debug, Clone, PartialEq)]
pub enum MetricValue {
    Float(f64),
    Int(i64),
    Text(String),
}

impl MetricValue {
    /// True for floats, ints and strings that parse as a float.
    ///
    /// Numeric-only sinks (statsd) refuse everything else.
    pub fn is_numeric(&self) -> bool {
        match self {
            MetricValue::Float(_) | MetricValue::Int(_) => true,
            MetricValue::Text(s) => s.trim().parse::<f64>().is_ok(),
        }
    }
}

impl fmt::Display for MetricValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            // `{:?}` keeps the fractional part: 2.0 stays "2.0", not "2".
            MetricValue::Float(v) => write!(f, "{:?}", v),
            MetricValue::Int(v) => write!(f, "{}", v),
            MetricValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<f64> for MetricValue {
    fn from(v: f64) -> Self {
        MetricValue::Float(v)
    }
}

impl From<i64> for MetricValue {
    fn from(v: i64) -> Self {
        MetricValue::Int(v)
    }
}

impl From<u64> for MetricValue {
    fn from(v: u64) -> Self {
        match i64::try_from(v) {
            Ok(i) => MetricValue::Int(i),
            Err(_) => MetricValue::Float(v as f64),
        }
    }
}

impl From<String> for MetricValue {
    fn from(v: String) -> Self {
        MetricValue::Text(v)
    }
}

impl From<&str> for MetricValue {
    fn from(v: &str) -> Self {
        MetricValue::Text(v.to_string())
    }
}

/// A named, typed, timestamped scalar.
#[derive(Debug, Clone, PartialEq)]
pub struct Metric {
    pub name: String,
    pub value: MetricValue,
    /// Unix seconds.
    pub timestamp: i64,
    pub unit: String,
    pub metric_type: MetricType,
    pub title: String,
    pub description: String,
    pub slope: Slope,
}

impl Metric {
    /// Creates a float metric stamped with the current wall-clock second.
    pub fn new(name: impl Into<String>, value: impl Into<MetricValue>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            timestamp: chrono::Utc::now().timestamp(),
            unit: String::new(),
            metric_type: MetricType::Float,
            title: String::new(),
            description: String::new(),
            slope: Slope::Both,
        }
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = unit.into();
        self
    }

    pub fn with_type(mut self, metric_type: MetricType) -> Self {
        self.metric_type = metric_type;
        self
    }

    pub fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_slope(mut self, slope: Slope) -> Self {
        self.slope = slope;
        self
    }
}

/// Joins an optional prefix and suffix onto `name` with `separator`.
///
/// An empty prefix is omitted; the suffix is omitted only when absent,
/// so `Some("")` still appends a trailing separator.
pub fn mangle_name(name: &str, prefix: &str, suffix: Option<&str>, separator: &str) -> String {
    let mut out = String::with_capacity(name.len() + prefix.len() + 8);
    if !prefix.is_empty() {
        out.push_str(prefix);
        out.push_str(separator);
    }
    out.push_str(name);
    if let Some(suffix) = suffix {
        out.push_str(separator);
        out.push_str(suffix);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_float_display_keeps_fraction() {
        assert_eq!(MetricValue::Float(2.0).to_string(), "2.0");
        assert_eq!(MetricValue::Float(0.1).to_string(), "0.1");
        assert_eq!(MetricValue::Int(7).to_string(), "7");
        assert_eq!(MetricValue::from("hi").to_string(), "hi");
    }

    #[test]
    fn test_is_numeric() {
        assert!(MetricValue::Float(1.5).is_numeric());
        assert!(MetricValue::Int(-3).is_numeric());
        assert!(MetricValue::from("3.25").is_numeric());
        assert!(!MetricValue::from("True").is_numeric());
        assert!(!MetricValue::from("").is_numeric());
    }

    #[test]
    fn test_metric_defaults() {
        let m = Metric::new("line_rate", 1.0);
        assert_eq!(m.metric_type, MetricType::Float);
        assert_eq!(m.slope, Slope::Both);
        assert!(m.unit.is_empty());
        assert!(m.timestamp > 0);
    }

    #[test]
    fn test_mangle_name() {
        assert_eq!(mangle_name("rate", "", None, "."), "rate");
        assert_eq!(mangle_name("rate", "web", None, "."), "web.rate");
        assert_eq!(mangle_name("rate", "web", Some("p95"), "_"), "web_rate_p95");
        assert_eq!(mangle_name("rate", "", Some("x"), "."), "rate.x");
    }

    #[test]
    fn test_u64_overflow_falls_back_to_float() {
        assert_eq!(MetricValue::from(5u64), MetricValue::Int(5));
        assert!(matches!(MetricValue::from(u64::MAX), MetricValue::Float(_)));
    }
}
