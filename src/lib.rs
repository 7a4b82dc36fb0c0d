//! LumaDB Search Federation
//!
//! Turns a set of independent, horizontally partitioned search shards into one
//! logical search service:
//! - Writes are routed to exactly one shard by a consistent-hashing ring
//! - Queries fan out to every shard in parallel under a per-shard deadline
//! - Partial results are deduplicated, ordered and paginated client-side
//! - Commits are broadcast to all shards, rate limited cluster-wide

pub mod config;
pub mod metrics;
pub mod shard;
pub mod types;

pub use config::FederationConfig;
pub use metrics::FederationMetrics;
pub use shard::{
    CommitCoordinator, CommitOutcome, FederatedIndex, HashRing, HttpShardClient, MemoryShard,
    PartitionDirectory, QueryFederator, ShardClient, WriteRouter,
};
pub use types::{
    ContinuationCursor, Document, FacetCounts, FederatedResponse, FieldValue, Predicate,
    QuerySpec,
};

use thiserror::Error;

/// Errors reported by a single shard backend
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ShardError {
    #[error("Shard unavailable: {0}")]
    Unavailable(String),
    #[error("Shard request timed out: {0}")]
    Timeout(String),
    #[error("Shard returned status {status}: {message}")]
    Backend { status: u16, message: String },
    #[error("Malformed shard response: {0}")]
    Decode(String),
    #[error("Unsupported by shard: {0}")]
    Unsupported(String),
}

/// Core error type for federation operations
#[derive(Error, Debug)]
pub enum FederationError {
    #[error("No partitions configured")]
    NoPartitions,
    #[error("Document is missing required field '{0}'")]
    MissingField(&'static str),
    #[error("Write to partition {partition} failed")]
    Write {
        partition: usize,
        #[source]
        source: ShardError,
    },
    #[error("Partition {partition} failed")]
    Shard {
        partition: usize,
        #[source]
        source: ShardError,
    },
    #[error("Configuration Error: {0}")]
    Config(String),
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Metrics Error: {0}")]
    Metrics(#[from] prometheus::Error),
}

pub type Result<T> = std::result::Result<T, FederationError>;
