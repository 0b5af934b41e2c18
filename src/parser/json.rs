//! Parses a log of JSON documents, one per line.
//!
//! Every document is flattened: each leaf becomes one metric whose name is
//! the path of keys (and array indices) leading to it, joined by the key
//! separator. When several lines set the same key, the last line wins.
//!
//! ```text
//! logster --dry-run -o ganglia --parser-options '--key-separator _' JsonLogster stats.log.json
//! ```

use std::collections::BTreeMap;

use serde_json::Value;

use super::{LogParser, ParseError, ParserError, options_usage, parse_options};
use crate::metric::{Metric, MetricType, MetricValue};

pub const NAME: &str = "JsonLogster";

/// Maps one key segment to its final form; `None` drops the key and
/// everything below it.
pub type KeyFilter = Box<dyn Fn(&str) -> Option<String>>;

#[derive(clap::Parser, Debug)]
#[command(about = "Flatten JSON lines into metrics")]
struct Options {
    /// Separator for flattened key names. '/' and ':' are not allowed.
    #[arg(long, short = 'k', default_value = ".", allow_hyphen_values = true)]
    key_separator: String,
}

pub struct JsonParser {
    separator: String,
    key_filter: KeyFilter,
    metrics: BTreeMap<String, Value>,
}

impl JsonParser {
    pub fn new(separator: &str) -> Result<Self, ParserError> {
        if separator == "/" || separator == ":" {
            return Err(ParserError::InvalidOptions {
                parser: NAME.to_string(),
                message: "cannot use : or / as key separator".to_string(),
            });
        }
        Ok(Self {
            separator: separator.to_string(),
            key_filter: default_key_filter(separator),
            metrics: BTreeMap::new(),
        })
    }

    pub fn from_options(option_string: &str) -> Result<Self, ParserError> {
        let opts: Options = parse_options(NAME, option_string)?;
        Self::new(&opts.key_separator)
    }

    pub fn usage() -> String {
        options_usage::<Options>(NAME)
    }

    /// Replaces the key filter. The default rewrites the separator and `:`
    /// to `_` inside each key segment.
    pub fn with_key_filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&str) -> Option<String> + 'static,
    {
        self.key_filter = Box::new(filter);
        self
    }

    pub fn separator(&self) -> &str {
        &self.separator
    }
}

fn default_key_filter(separator: &str) -> KeyFilter {
    let separator = separator.to_string();
    Box::new(move |key: &str| Some(key.replace(separator.as_str(), "_").replace(':', "_")))
}

/// Flattens nested objects and arrays into `path -> leaf` pairs.
///
/// Any `/` in a finished key is rewritten to `separator`, since some sinks
/// use metric names as file paths.
pub fn flatten(
    node: &Value,
    separator: &str,
    key_filter: &dyn Fn(&str) -> Option<String>,
) -> BTreeMap<String, Value> {
    let mut flattened = BTreeMap::new();
    let mut path = Vec::new();
    flatten_into(node, separator, key_filter, &mut path, &mut flattened);
    flattened
}

fn flatten_into(
    node: &Value,
    separator: &str,
    key_filter: &dyn Fn(&str) -> Option<String>,
    path: &mut Vec<String>,
    out: &mut BTreeMap<String, Value>,
) {
    let children: Vec<(String, &Value)> = match node {
        Value::Object(map) => map.iter().map(|(k, v)| (k.clone(), v)).collect(),
        Value::Array(items) => items
            .iter()
            .enumerate()
            .map(|(i, v)| (i.to_string(), v))
            .collect(),
        _ => return,
    };

    for (key, child) in children {
        let Some(key) = key_filter(&key) else {
            continue;
        };
        path.push(key);
        match child {
            Value::Object(_) | Value::Array(_) => {
                flatten_into(child, separator, key_filter, path, out);
            }
            leaf => {
                let full_key = path.join(separator).replace('/', separator);
                out.insert(full_key, leaf.clone());
            }
        }
        path.pop();
    }
}

/// Picks the metric type for a JSON leaf. Booleans are not integers.
pub fn infer_metric_type(value: &Value) -> MetricType {
    match value {
        Value::Number(n) if n.is_f64() => MetricType::Float,
        Value::Number(_) => MetricType::Int32,
        _ => MetricType::String,
    }
}

/// Builds a metric for a flattened leaf, stringifying non-numeric values
/// the way Python's `str()` would.
pub fn metric_for(name: &str, value: &Value) -> Metric {
    let metric_type = infer_metric_type(value);
    let metric_value = match value {
        Value::Number(n) if n.is_f64() => MetricValue::Float(n.as_f64().unwrap_or_default()),
        Value::Number(n) => match (n.as_i64(), n.as_u64()) {
            (Some(i), _) => MetricValue::Int(i),
            (None, Some(u)) => MetricValue::from(u),
            (None, None) => MetricValue::Text(n.to_string()),
        },
        Value::Bool(true) => MetricValue::Text("True".to_string()),
        Value::Bool(false) => MetricValue::Text("False".to_string()),
        Value::Null => MetricValue::Text("None".to_string()),
        Value::String(s) => MetricValue::Text(s.clone()),
        other => MetricValue::Text(other.to_string()),
    };
    Metric::new(name, metric_value).with_type(metric_type)
}

impl LogParser for JsonParser {
    fn consume_line(&mut self, line: &str) -> Result<(), ParseError> {
        let document: Value = serde_json::from_str(line)
            .map_err(|e| ParseError::fatal(format!("invalid JSON: {}", e)))?;
        if !matches!(document, Value::Object(_) | Value::Array(_)) {
            return Err(ParseError::fatal("JSON line is not an object or array"));
        }
        let flattened = flatten(&document, &self.separator, self.key_filter.as_ref());
        self.metrics.extend(flattened);
        Ok(())
    }

    fn snapshot(&mut self, _duration_secs: u64) -> Vec<Metric> {
        self.metrics
            .iter()
            .map(|(name, value)| metric_for(name, value))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn identity(key: &str) -> Option<String> {
        Some(key.to_string())
    }

    #[test]
    fn test_flatten_nested_object_and_array() {
        let doc = json!({"a": {"b": 1, "c": [10, 20]}});
        let flat = flatten(&doc, ".", &identity);
        let expected: BTreeMap<String, Value> = [
            ("a.b".to_string(), json!(1)),
            ("a.c.0".to_string(), json!(10)),
            ("a.c.1".to_string(), json!(20)),
        ]
        .into_iter()
        .collect();
        assert_eq!(flat, expected);
    }

    #[test]
    fn test_flatten_already_flat_is_unchanged() {
        let doc = json!({"x": 1, "y": "two", "z": 3.5});
        let once = flatten(&doc, ".", &identity);
        let again = flatten(&Value::Object(once.clone().into_iter().collect()), ".", &identity);
        assert_eq!(once, again);
    }

    #[test]
    fn test_flatten_with_filter_and_slash_rewrite() {
        let doc = json!({
            "1.1": {
                "value1": 0,
                "value2": "hi",
                "1.2": {"value3": 0.1, "value4": false}
            },
            "2.1": ["a", "b"],
            "3/1": "nonya"
        });
        let filter = |key: &str| {
            if key == "value2" {
                Some("valuetwo".to_string())
            } else {
                Some(key.to_string())
            }
        };
        let flat = flatten(&doc, "&", &filter);
        let expected: BTreeMap<String, Value> = [
            ("1.1&value1", json!(0)),
            ("1.1&valuetwo", json!("hi")),
            ("1.1&1.2&value3", json!(0.1)),
            ("1.1&1.2&value4", json!(false)),
            ("2.1&0", json!("a")),
            ("2.1&1", json!("b")),
            ("3&1", json!("nonya")),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
        assert_eq!(flat, expected);
    }

    #[test]
    fn test_filter_can_skip_subtree() {
        let doc = json!({"keep": 1, "drop": {"inner": 2}});
        let filter = |key: &str| (key != "drop").then(|| key.to_string());
        let flat = flatten(&doc, ".", &filter);
        assert_eq!(flat.len(), 1);
        assert!(flat.contains_key("keep"));
    }

    #[test]
    fn test_infer_metric_type() {
        assert_eq!(infer_metric_type(&json!(1.5)), MetricType::Float);
        assert_eq!(infer_metric_type(&json!(7)), MetricType::Int32);
        assert_eq!(infer_metric_type(&json!(true)), MetricType::String);
        assert_eq!(infer_metric_type(&json!("x")), MetricType::String);
    }

    #[test]
    fn test_metric_for_stringifies_bools() {
        let m = metric_for("bool", &json!(false));
        assert_eq!(m.value, MetricValue::Text("False".to_string()));
        assert_eq!(m.metric_type, MetricType::String);

        let m = metric_for("int", &json!(1));
        assert_eq!(m.value, MetricValue::Int(1));
        assert_eq!(m.metric_type, MetricType::Int32);
    }

    #[test]
    fn test_separator_option() {
        let parser = JsonParser::from_options("--key-separator &").unwrap();
        assert_eq!(parser.separator(), "&");
        assert_eq!(JsonParser::from_options("").unwrap().separator(), ".");
    }

    #[test]
    fn test_rejects_slash_and_colon_separators() {
        assert!(JsonParser::new("/").is_err());
        assert!(JsonParser::from_options("-k :").is_err());
    }

    #[test]
    fn test_last_line_wins() {
        let mut parser = JsonParser::new(".").unwrap();
        parser.consume_line(r#"{"req": {"count": 1}, "host": "a"}"#).unwrap();
        parser.consume_line(r#"{"req": {"count": 5}}"#).unwrap();
        let metrics = parser.snapshot(60);
        let count = metrics.iter().find(|m| m.name == "req.count").unwrap();
        assert_eq!(count.value, MetricValue::Int(5));
        assert!(metrics.iter().any(|m| m.name == "host"));
    }

    #[test]
    fn test_default_filter_rewrites_separator_in_keys() {
        let mut parser = JsonParser::new(".").unwrap();
        parser.consume_line(r#"{"a.b": {"c:d": 1}}"#).unwrap();
        let metrics = parser.snapshot(1);
        assert_eq!(metrics[0].name, "a_b.c_d");
    }

    #[test]
    fn test_invalid_json_is_fatal() {
        let mut parser = JsonParser::new(".").unwrap();
        let err = parser.consume_line("not json").unwrap_err();
        assert!(!err.is_recoverable());
        let err = parser.consume_line("42").unwrap_err();
        assert!(!err.is_recoverable());
    }
}
