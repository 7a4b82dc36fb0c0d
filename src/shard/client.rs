use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::types::{Document, FacetCounts, Predicate};
use crate::ShardError;

/// Query sent to a single partition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShardQuery {
    pub predicate: Predicate,
    pub start: usize,
    pub rows: usize,
    pub facet_fields: Vec<String>,
}

impl ShardQuery {
    /// Point lookup by document key
    pub fn by_key(key: &str) -> Self {
        Self {
            predicate: Predicate::Key(key.to_string()),
            start: 0,
            rows: 1,
            facet_fields: Vec::new(),
        }
    }
}

/// One partition's answer
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShardResponse {
    pub documents: Vec<Document>,
    pub facet_counts: FacetCounts,
    pub num_found: u64,
    pub time_taken_ms: u64,
}

/// Backend acknowledgement of a write or commit
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShardAck {
    pub time_taken_ms: u64,
}

/// Handle to one search backend
#[async_trait]
pub trait ShardClient: Send + Sync {
    /// Stable endpoint identity; also seeds the partition's ring points
    fn endpoint(&self) -> &str;

    async fn query(&self, query: &ShardQuery) -> Result<ShardResponse, ShardError>;

    async fn put(&self, document: &Document) -> Result<ShardAck, ShardError>;

    async fn commit(&self, wait_flush: bool, wait_visible: bool) -> Result<ShardAck, ShardError>;
}
