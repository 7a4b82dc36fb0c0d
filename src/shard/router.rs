use std::sync::Arc;

use tracing::{debug, warn};

use crate::metrics::FederationMetrics;
use crate::shard::client::{ShardAck, ShardQuery};
use crate::shard::directory::{Partition, PartitionDirectory};
use crate::shard::ring::HashRing;
use crate::types::Document;
use crate::{FederationError, Result};

/// Where a write landed
#[derive(Debug, Clone, PartialEq)]
pub struct WriteAck {
    pub partition: usize,
    pub key_hash: u32,
    pub ack: ShardAck,
}

/// Routes each document key to exactly one partition.
/// Write errors always reach the caller.
pub struct WriteRouter {
    directory: Arc<PartitionDirectory>,
    ring: Arc<HashRing>,
    metrics: Arc<FederationMetrics>,
}

impl WriteRouter {
    pub fn new(
        directory: Arc<PartitionDirectory>,
        ring: Arc<HashRing>,
        metrics: Arc<FederationMetrics>,
    ) -> Self {
        Self {
            directory,
            ring,
            metrics,
        }
    }

    /// Key hash and owning partition
    pub fn route_key(&self, key: &str) -> (u32, usize) {
        self.ring.route_key(key)
    }

    fn partition(&self, index: usize) -> Result<&Partition> {
        self.directory.get(index).ok_or_else(|| {
            FederationError::Config(format!(
                "ring located partition {} outside directory of {}",
                index,
                self.directory.len()
            ))
        })
    }

    /// Write one document to its owning partition, stamping it with the key
    /// hash so the data can be located again after re-partitioning.
    pub async fn put(&self, document: &mut Document) -> Result<WriteAck> {
        if document.key.is_empty() {
            return Err(FederationError::MissingField("key"));
        }
        if document.timestamp.is_empty() {
            return Err(FederationError::MissingField("timestamp"));
        }

        let (key_hash, index) = self.route_key(&document.key);
        document.partition_hash = Some(key_hash);
        let partition = self.partition(index)?;

        match partition.client().put(document).await {
            Ok(ack) => {
                self.metrics.writes_total.with_label_values(&[&index.to_string()]).inc();
                debug!(
                    "Added doc with key {} to partition {} ({})",
                    document.key,
                    index,
                    partition.endpoint()
                );
                Ok(WriteAck {
                    partition: index,
                    key_hash,
                    ack,
                })
            }
            Err(source) => {
                self.metrics.write_failures_total.inc();
                warn!("Write of key {} to partition {} failed: {}", document.key, index, source);
                Err(FederationError::Write {
                    partition: index,
                    source,
                })
            }
        }
    }

    /// Write documents one key at a time through `put`. Stops at the first
    /// failure; documents before it stay written.
    pub async fn put_batch(&self, documents: &mut [Document]) -> Result<Vec<WriteAck>> {
        debug!("Adding {} docs to sharded servers", documents.len());
        let mut acks = Vec::with_capacity(documents.len());
        for document in documents.iter_mut() {
            acks.push(self.put(document).await?);
        }
        Ok(acks)
    }

    /// Point lookup against the owning partition only
    pub async fn get_by_key(&self, key: &str) -> Result<Option<Document>> {
        let (_, index) = self.route_key(key);
        let partition = self.partition(index)?;
        debug!("Looking up doc with key {} from partition {}", key, index);

        let response = partition
            .client()
            .query(&ShardQuery::by_key(key))
            .await
            .map_err(|source| FederationError::Shard {
                partition: index,
                source,
            })?;

        let found = response.documents.into_iter().find(|d| d.key == key);
        if found.is_none() {
            debug!("No document found for key {}", key);
        }
        Ok(found)
    }
}
