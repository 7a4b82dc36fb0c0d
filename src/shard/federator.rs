//! Query fan-out
//!
//! Every partition receives the same predicate with the window rewritten to
//! `start = 0, rows = offset + multiplier * count`. Partition tasks run in a
//! `JoinSet` under independent deadlines and the set is drained before the
//! merge, so no task outlives the call.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::metrics::FederationMetrics;
use crate::shard::client::{ShardQuery, ShardResponse};
use crate::shard::directory::PartitionDirectory;
use crate::shard::merge::{merge_responses, PageWindow};
use crate::types::{ContinuationCursor, FederatedResponse, QuerySpec};
use crate::ShardError;

#[derive(Debug, Clone)]
pub struct FederatorSettings {
    pub query_timeout: Duration,
    pub overfetch_multiplier: usize,
    /// Facets aggregated when a query names none
    pub default_facet_fields: Vec<String>,
}

impl Default for FederatorSettings {
    fn default() -> Self {
        Self {
            query_timeout: Duration::from_secs(10),
            overfetch_multiplier: 3,
            default_facet_fields: Vec::new(),
        }
    }
}

enum PartitionOutcome {
    Answered(ShardResponse),
    Failed(ShardError),
    TimedOut,
}

pub struct QueryFederator {
    directory: Arc<PartitionDirectory>,
    settings: FederatorSettings,
    metrics: Arc<FederationMetrics>,
}

impl QueryFederator {
    pub fn new(
        directory: Arc<PartitionDirectory>,
        settings: FederatorSettings,
        metrics: Arc<FederationMetrics>,
    ) -> Self {
        Self {
            directory,
            settings,
            metrics,
        }
    }

    pub fn settings(&self) -> &FederatorSettings {
        &self.settings
    }

    /// Per-partition form of a logical query
    pub fn rewrite(&self, spec: &QuerySpec) -> ShardQuery {
        let rows = spec
            .offset
            .saturating_add(self.settings.overfetch_multiplier.saturating_mul(spec.count));
        ShardQuery {
            predicate: spec.predicate.clone(),
            start: 0,
            rows,
            facet_fields: self.facet_fields(spec).to_vec(),
        }
    }

    fn facet_fields<'a>(&'a self, spec: &'a QuerySpec) -> &'a [String] {
        if spec.facet_fields.is_empty() {
            &self.settings.default_facet_fields
        } else {
            &spec.facet_fields
        }
    }

    /// Run a query on every partition and merge the answers.
    /// Partition failures and timeouts degrade the response; they are never
    /// returned as errors.
    pub async fn query(
        &self,
        spec: &QuerySpec,
        cursor: Option<&ContinuationCursor>,
    ) -> FederatedResponse {
        let started = Instant::now();
        let timer = self.metrics.query_duration_seconds.start_timer();
        self.metrics.queries_total.inc();

        let shard_query = Arc::new(self.rewrite(spec));
        debug!(
            "SHARD: Executing {:?} on {} partitions (rows={})",
            shard_query.predicate,
            self.directory.len(),
            shard_query.rows
        );

        let mut tasks = JoinSet::new();
        for partition in self.directory.iter() {
            let index = partition.index();
            let client = partition.client();
            let query = Arc::clone(&shard_query);
            let deadline = self.settings.query_timeout;
            tasks.spawn(async move {
                let outcome = match tokio::time::timeout(deadline, client.query(&query)).await {
                    Ok(Ok(response)) => PartitionOutcome::Answered(response),
                    Ok(Err(e)) => PartitionOutcome::Failed(e),
                    Err(_) => PartitionOutcome::TimedOut,
                };
                (index, outcome)
            });
            debug!("SHARD: Scheduled query on partition {} ({})", index, partition.endpoint());
        }

        let mut slots: Vec<Option<ShardResponse>> = (0..self.directory.len()).map(|_| None).collect();
        let mut timed_out = 0usize;
        let mut failed = 0usize;

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, PartitionOutcome::Answered(response))) => {
                    debug!(
                        "SHARD: Partition {} answered {} docs in {} ms",
                        index,
                        response.documents.len(),
                        response.time_taken_ms
                    );
                    slots[index] = Some(response);
                }
                Ok((index, PartitionOutcome::Failed(e))) => {
                    warn!("SHARD: Query on partition {} failed: {}", index, e);
                    self.metrics.partition_errors_total.inc();
                    failed += 1;
                }
                Ok((index, PartitionOutcome::TimedOut)) => {
                    info!(
                        "SHARD: Query timeout on partition {} after {:?}",
                        index, self.settings.query_timeout
                    );
                    self.metrics.partition_timeouts_total.inc();
                    timed_out += 1;
                }
                Err(e) => {
                    warn!("SHARD: Partition query task aborted: {}", e);
                    self.metrics.partition_errors_total.inc();
                    failed += 1;
                }
            }
        }

        // Partition order keeps first-seen order deterministic for ties
        let responses: Vec<ShardResponse> = slots.into_iter().flatten().collect();
        let partial = timed_out + failed == self.directory.len();
        if partial {
            self.metrics.partial_responses_total.inc();
            warn!("SHARD: No partition answered; returning partial response");
        }

        let merged = merge_responses(
            &responses,
            PageWindow {
                offset: spec.offset,
                count: spec.count,
            },
            cursor,
            self.facet_fields(spec),
        );

        // A walk stays pinned to the cursor it started with
        let anchor = match cursor.filter(|c| !c.is_empty()) {
            Some(cursor) => Some(cursor.clone()),
            None => merged.head,
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;
        timer.observe_duration();
        debug!(
            "SHARD: Merged {} unique docs into page of {} in {} ms",
            merged.total_approx_count,
            merged.documents.len(),
            elapsed_ms
        );

        FederatedResponse {
            documents: merged.documents,
            total_approx_count: merged.total_approx_count,
            facets: merged.facets,
            partial,
            timed_out,
            failed,
            elapsed_ms,
            anchor,
        }
    }
}
