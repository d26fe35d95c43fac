//! Resource summarization.
//!
//! The processor hands every discovered resource to a [`Summarizer`] before
//! returning it. Summaries are bounded extracts, never full objects.

use serde_json::{Map, Value};
use std::collections::HashMap;

use crate::store::Resource;

/// Summary attached to each discovered resource.
pub type Summary = Value;

/// Bounded, schema-guided field extraction. Must be side-effect free.
pub trait Summarizer: Send + Sync {
    fn summarize(&self, resource: &Resource, kind: &str) -> Summary;
}

/// Extracts configured field paths per kind.
///
/// Every summary carries `name` and `kind` (and `namespace` when set).
/// Strings are cut at `max_string_length` characters, arrays at
/// `max_array_elements` items, and nesting below `max_depth` is dropped.
#[derive(Debug, Clone)]
pub struct FieldSummarizer {
    fields: HashMap<String, Vec<Vec<String>>>,
    max_string_length: usize,
    max_array_elements: usize,
    max_depth: usize,
}

impl Default for FieldSummarizer {
    fn default() -> Self {
        Self {
            fields: HashMap::new(),
            max_string_length: 500,
            max_array_elements: 10,
            max_depth: 3,
        }
    }
}

impl FieldSummarizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Extract `paths` (dotted, e.g. `spec.resources.profile`) for `kind`.
    pub fn with_fields(mut self, kind: &str, paths: &[&str]) -> Self {
        let parsed = paths
            .iter()
            .map(|p| p.split('.').map(str::to_string).collect())
            .collect();
        self.fields.insert(kind.to_string(), parsed);
        self
    }

    pub fn with_limits(mut self, max_string_length: usize, max_array_elements: usize) -> Self {
        self.max_string_length = max_string_length;
        self.max_array_elements = max_array_elements;
        self
    }

    fn bound(&self, value: &Value, depth: usize) -> Value {
        match value {
            Value::String(s) if s.chars().count() > self.max_string_length => {
                Value::String(s.chars().take(self.max_string_length).collect())
            }
            Value::Array(items) => {
                if depth >= self.max_depth {
                    return Value::Array(Vec::new());
                }
                Value::Array(
                    items
                        .iter()
                        .take(self.max_array_elements)
                        .map(|v| self.bound(v, depth + 1))
                        .collect(),
                )
            }
            Value::Object(map) => {
                if depth >= self.max_depth {
                    return Value::Object(Map::new());
                }
                Value::Object(
                    map.iter()
                        .map(|(k, v)| (k.clone(), self.bound(v, depth + 1)))
                        .collect(),
                )
            }
            other => other.clone(),
        }
    }
}

impl Summarizer for FieldSummarizer {
    fn summarize(&self, resource: &Resource, kind: &str) -> Summary {
        let mut out = Map::new();
        out.insert("name".to_string(), Value::String(resource.name.clone()));
        out.insert("kind".to_string(), Value::String(kind.to_string()));
        if let Some(ns) = &resource.namespace {
            out.insert("namespace".to_string(), Value::String(ns.clone()));
        }

        if let Some(paths) = self.fields.get(kind) {
            for path in paths {
                let Some(value) = resource.field(path) else {
                    continue;
                };
                if let Some(key) = path.last() {
                    out.insert(key.clone(), self.bound(value, 0));
                }
            }
        }

        Value::Object(out)
    }
}
