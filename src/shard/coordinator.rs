use std::sync::Arc;

use tracing::info;

use crate::config::FederationConfig;
use crate::metrics::FederationMetrics;
use crate::shard::client::ShardClient;
use crate::shard::commit::{CommitCoordinator, CommitOutcome};
use crate::shard::directory::PartitionDirectory;
use crate::shard::federator::{FederatorSettings, QueryFederator};
use crate::shard::http::HttpShardClient;
use crate::shard::ring::HashRing;
use crate::shard::router::{WriteAck, WriteRouter};
use crate::types::{ContinuationCursor, Document, FederatedResponse, QuerySpec};
use crate::{FederationError, Result};

/// One logical search index spread over a fixed set of shards.
/// Writes go through the router, reads through the federator.
pub struct FederatedIndex {
    directory: Arc<PartitionDirectory>,
    ring: Arc<HashRing>,
    router: WriteRouter,
    federator: QueryFederator,
    committer: CommitCoordinator,
    metrics: Arc<FederationMetrics>,
}

impl FederatedIndex {
    /// Build over already-connected shard clients; `config.partitions` is
    /// not consulted.
    pub fn from_clients(config: &FederationConfig, clients: Vec<Arc<dyn ShardClient>>) -> Result<Self> {
        config.validate()?;
        let directory = Arc::new(PartitionDirectory::new(clients)?);
        let ring = Arc::new(HashRing::new(&directory.endpoints(), config.virtual_points)?);
        let metrics = Arc::new(FederationMetrics::new()?);

        let router = WriteRouter::new(Arc::clone(&directory), Arc::clone(&ring), Arc::clone(&metrics));
        let federator = QueryFederator::new(
            Arc::clone(&directory),
            FederatorSettings {
                query_timeout: config.query_timeout(),
                overfetch_multiplier: config.overfetch_multiplier,
                default_facet_fields: config.facet_fields.clone(),
            },
            Arc::clone(&metrics),
        );
        let committer = CommitCoordinator::new(
            Arc::clone(&directory),
            config.min_commit_interval(),
            Arc::clone(&metrics),
        )
        .with_wait(config.commit_wait_flush, config.commit_wait_visible);

        info!("Created federated index with {} partitions", directory.len());

        Ok(Self {
            directory,
            ring,
            router,
            federator,
            committer,
            metrics,
        })
    }

    /// Build with one HTTP client per configured endpoint
    pub fn connect(config: &FederationConfig) -> Result<Self> {
        let clients = config
            .partitions
            .iter()
            .enumerate()
            .map(|(partition, endpoint)| {
                HttpShardClient::new(endpoint.as_str())
                    .map(|c| Arc::new(c) as Arc<dyn ShardClient>)
                    .map_err(|source| FederationError::Shard { partition, source })
            })
            .collect::<Result<Vec<_>>>()?;
        Self::from_clients(config, clients)
    }

    pub async fn put(&self, document: &mut Document) -> Result<WriteAck> {
        self.router.put(document).await
    }

    pub async fn put_batch(&self, documents: &mut [Document]) -> Result<Vec<WriteAck>> {
        self.router.put_batch(documents).await
    }

    pub async fn get_by_key(&self, key: &str) -> Result<Option<Document>> {
        self.router.get_by_key(key).await
    }

    pub async fn query(
        &self,
        spec: &QuerySpec,
        cursor: Option<&ContinuationCursor>,
    ) -> FederatedResponse {
        self.federator.query(spec, cursor).await
    }

    pub async fn commit_all(&self) -> CommitOutcome {
        self.committer.commit_all().await
    }

    pub fn partition_count(&self) -> usize {
        self.directory.len()
    }

    pub fn directory(&self) -> &PartitionDirectory {
        &self.directory
    }

    pub fn ring(&self) -> &HashRing {
        &self.ring
    }

    pub fn router(&self) -> &WriteRouter {
        &self.router
    }

    pub fn federator(&self) -> &QueryFederator {
        &self.federator
    }

    pub fn metrics(&self) -> &FederationMetrics {
        &self.metrics
    }
}
