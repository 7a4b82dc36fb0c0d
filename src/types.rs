//! Shared data model for the federation layer
//!
//! Documents, query specs, continuation cursors and the merged response.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Fixed-width, lexically sortable timestamp format used by every document.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Facet field name -> (value -> count)
pub type FacetCounts = BTreeMap<String, BTreeMap<String, u64>>;

/// Render a UTC instant in the fixed document timestamp format
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.format(TIMESTAMP_FORMAT).to_string()
}

/// A stored field value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    List(Vec<FieldValue>),
}

impl FieldValue {
    /// String forms used for term matching and facet counting.
    /// Multi-valued fields contribute one entry per element.
    pub fn terms(&self) -> Vec<String> {
        match self {
            FieldValue::List(items) => items.iter().flat_map(|v| v.terms()).collect(),
            other => vec![other.to_string()],
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Bool(b) => write!(f, "{}", b),
            FieldValue::Int(i) => write!(f, "{}", i),
            FieldValue::Float(x) => write!(f, "{}", x),
            FieldValue::Text(s) => f.write_str(s),
            FieldValue::List(items) => {
                let parts: Vec<String> = items.iter().map(|v| v.to_string()).collect();
                write!(f, "[{}]", parts.join(", "))
            }
        }
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::Text(s.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        FieldValue::Text(s)
    }
}

impl From<i64> for FieldValue {
    fn from(i: i64) -> Self {
        FieldValue::Int(i)
    }
}

impl From<f64> for FieldValue {
    fn from(x: f64) -> Self {
        FieldValue::Float(x)
    }
}

impl From<bool> for FieldValue {
    fn from(b: bool) -> Self {
        FieldValue::Bool(b)
    }
}

/// A searchable document.
///
/// `partition_hash` is stamped by the write router with the key hash that
/// selected the owning partition. It is never consulted when reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub key: String,
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partition_hash: Option<u32>,
    #[serde(default)]
    pub fields: BTreeMap<String, FieldValue>,
}

impl Document {
    pub fn new(key: impl Into<String>, timestamp: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            timestamp: timestamp.into(),
            partition_hash: None,
            fields: BTreeMap::new(),
        }
    }

    /// Document stamped with the current UTC time
    pub fn stamped_now(key: impl Into<String>) -> Self {
        Self::new(key, format_timestamp(Utc::now()))
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.set_field(name, value);
        self
    }

    pub fn set_field(&mut self, name: impl Into<String>, value: impl Into<FieldValue>) {
        self.fields.insert(name.into(), value.into());
    }

    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    /// Terms a predicate or facet sees for `name`, including the
    /// built-in `key` and `timestamp` fields.
    pub fn terms(&self, name: &str) -> Vec<String> {
        match name {
            "key" => vec![self.key.clone()],
            "timestamp" => vec![self.timestamp.clone()],
            _ => self.fields.get(name).map(|v| v.terms()).unwrap_or_default(),
        }
    }
}

/// Query predicate, forwarded unchanged to every partition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Predicate {
    /// Every document
    All,
    /// Exact match on the document key
    Key(String),
    /// Exact match of one term of a field
    Term { field: String, value: String },
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    /// Backend-native query text, passed through verbatim
    Raw(String),
}

impl Predicate {
    pub fn term(field: impl Into<String>, value: impl Into<String>) -> Self {
        Predicate::Term {
            field: field.into(),
            value: value.into(),
        }
    }
}

/// A logical search request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuerySpec {
    pub predicate: Predicate,
    pub offset: usize,
    pub count: usize,
    #[serde(default)]
    pub facet_fields: Vec<String>,
}

impl QuerySpec {
    pub const DEFAULT_COUNT: usize = 20;

    pub fn new(predicate: Predicate) -> Self {
        Self {
            predicate,
            offset: 0,
            count: Self::DEFAULT_COUNT,
            facet_fields: Vec::new(),
        }
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub fn count(mut self, count: usize) -> Self {
        self.count = count;
        self
    }

    pub fn facet(mut self, field: impl Into<String>) -> Self {
        self.facet_fields.push(field.into());
        self
    }

    /// Same query, one page further on
    pub fn next_page(&self) -> Self {
        let mut next = self.clone();
        next.offset = self.offset.saturating_add(self.count);
        next
    }
}

/// Anchor that keeps later pages stable while new documents arrive.
///
/// Identifies the first document of the first page of a result walk. Later
/// pages pass the same cursor and advance `offset`; row 0 is the anchored
/// document itself, or, when it is gone, the first document strictly older
/// than `anchor_timestamp`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContinuationCursor {
    pub anchor_key: Option<String>,
    pub anchor_timestamp: Option<String>,
}

impl ContinuationCursor {
    pub fn new(key: impl Into<String>, timestamp: impl Into<String>) -> Self {
        Self {
            anchor_key: Some(key.into()),
            anchor_timestamp: Some(timestamp.into()),
        }
    }

    pub fn after(document: &Document) -> Self {
        Self::new(document.key.clone(), document.timestamp.clone())
    }

    pub fn is_empty(&self) -> bool {
        self.anchor_key.is_none() && self.anchor_timestamp.is_none()
    }
}

/// Result of a federated query
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FederatedResponse {
    pub documents: Vec<Document>,
    /// Size of the deduplicated candidate set
    pub total_approx_count: usize,
    pub facets: FacetCounts,
    /// Set when no partition answered
    pub partial: bool,
    pub timed_out: usize,
    pub failed: usize,
    pub elapsed_ms: u64,
    /// Cursor pinning this result walk: the one supplied, otherwise the
    /// newest merged document
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anchor: Option<ContinuationCursor>,
}

impl FederatedResponse {
    /// Cursor to pass with `QuerySpec::next_page` for the following page
    pub fn continuation(&self) -> Option<ContinuationCursor> {
        self.anchor.clone()
    }

    pub fn keys(&self) -> Vec<&str> {
        self.documents.iter().map(|d| d.key.as_str()).collect()
    }
}
