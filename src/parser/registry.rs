//! Parser lookup by class name.

use std::collections::BTreeMap;

use super::{JsonParser, LineCountParser, LogParser, ParserError, TopLevelUrlParser};
use super::{json, line_count, top_level_url};

/// Builds a parser from its option string.
pub type ParserFactory = fn(&str) -> Result<Box<dyn LogParser>, ParserError>;

/// Renders a parser's option help.
pub type ParserUsage = fn() -> String;

#[derive(Clone, Copy)]
struct Entry {
    factory: ParserFactory,
    usage: ParserUsage,
}

/// Maps class names such as `LineCountLogster` to parser factories.
#[derive(Clone, Default)]
pub struct ParserRegistry {
    entries: BTreeMap<String, Entry>,
}

impl ParserRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry holding the parsers shipped with logster.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(line_count::NAME, build_line_count, LineCountParser::usage);
        registry.register(json::NAME, build_json, JsonParser::usage);
        registry.register(top_level_url::NAME, build_top_level_url, TopLevelUrlParser::usage);
        registry
    }

    /// Adds or replaces a parser class.
    pub fn register(&mut self, name: &str, factory: ParserFactory, usage: ParserUsage) {
        self.entries
            .insert(name.to_string(), Entry { factory, usage });
    }

    /// Instantiates `name` with `options`.
    ///
    /// A dotted name (`parsers.JsonLogster.JsonLogster`) is resolved by its
    /// last component.
    pub fn create(&self, name: &str, options: &str) -> Result<Box<dyn LogParser>, ParserError> {
        let entry = self.lookup(name)?;
        (entry.factory)(options)
    }

    /// Option help for `name`.
    pub fn usage(&self, name: &str) -> Result<String, ParserError> {
        Ok((self.lookup(name)?.usage)())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    fn lookup(&self, name: &str) -> Result<&Entry, ParserError> {
        let short = name.rsplit('.').next().unwrap_or(name);
        self.entries
            .get(short)
            .ok_or_else(|| ParserError::NotFound(name.to_string()))
    }
}

fn build_line_count(options: &str) -> Result<Box<dyn LogParser>, ParserError> {
    Ok(Box::new(LineCountParser::from_options(options)?))
}

fn build_json(options: &str) -> Result<Box<dyn LogParser>, ParserError> {
    Ok(Box::new(JsonParser::from_options(options)?))
}

fn build_top_level_url(options: &str) -> Result<Box<dyn LogParser>, ParserError> {
    Ok(Box::new(TopLevelUrlParser::from_options(options)?))
}
