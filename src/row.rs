//! The flat, schema-less unit of extracted data.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const URL_FIELD: &str = "_url";
pub const SOURCE_FIELD: &str = "_source";
pub const INDEX_FIELD: &str = "_index";
pub const CATEGORY_FIELD: &str = "_category";

/// Which normalization path produced a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    Extract,
    LlmSpecific,
    Regex,
    Markdown,
    HtmlFallback,
    /// Selector mode, outside the normalizer.
    Selector,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Extract => "extract",
            Source::LlmSpecific => "llm_specific",
            Source::Regex => "regex",
            Source::Markdown => "markdown",
            Source::HtmlFallback => "html_fallback",
            Source::Selector => "selector",
        }
    }
}

/// One row of extracted data: free-form fields plus provenance fields
/// (`_url`, `_source`, `_index`, optional `_category`).
///
/// Field order is insertion order, which the exporters rely on for the
/// column layout.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Row(Map<String, Value>);

impl Row {
    pub fn new() -> Self {
        Row(Map::new())
    }

    /// Wraps an arbitrary JSON value; non-objects land under `value`.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(map) => Row(map),
            other => Row::new().with("value", other),
        }
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.0.insert(key.to_string(), value.into());
        self
    }

    pub fn insert(&mut self, key: &str, value: impl Into<Value>) {
        self.0.insert(key.to_string(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Stamps the provenance fields, overwriting any same-named data field.
    pub fn tag(&mut self, url: &str, source: Source, index: usize, category: Option<&str>) {
        self.insert(URL_FIELD, url);
        self.insert(SOURCE_FIELD, source.as_str());
        self.insert(INDEX_FIELD, index);
        if let Some(category) = category {
            self.insert(CATEGORY_FIELD, category);
        }
    }
}

impl From<Map<String, Value>> for Row {
    fn from(map: Map<String, Value>) -> Self {
        Row(map)
    }
}

/// Union of all keys across `rows`, in first-seen order.
pub fn column_union(rows: &[Row]) -> Vec<String> {
    let mut columns: Vec<String> = Vec::new();
    for row in rows {
        for key in row.keys() {
            if !columns.iter().any(|c| c == key) {
                columns.push(key.clone());
            }
        }
    }
    columns
}
