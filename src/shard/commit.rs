//! Cluster-wide commit coordination
//!
//! One commit per partition, dispatched concurrently and awaited together.
//! A minimum interval between dispatches guards against commit storms; the
//! last dispatch time is claimed with a compare-and-set before any commit
//! is sent, so near-simultaneous callers cannot both pass the check.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, info};

use crate::metrics::FederationMetrics;
use crate::shard::directory::PartitionDirectory;
use crate::ShardError;

/// No commit dispatched yet
const NEVER: u64 = u64::MAX;

#[derive(Debug, Clone, PartialEq)]
pub enum CommitOutcome {
    /// Inside the minimum interval; nothing was sent
    Skipped { since_last: Duration },
    Dispatched(CommitReport),
}

impl CommitOutcome {
    pub fn is_skipped(&self) -> bool {
        matches!(self, CommitOutcome::Skipped { .. })
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommitReport {
    pub committed: Vec<usize>,
    pub failed: Vec<(usize, ShardError)>,
}

pub struct CommitCoordinator {
    directory: Arc<PartitionDirectory>,
    min_interval: Duration,
    wait_flush: bool,
    wait_visible: bool,
    origin: Instant,
    /// Milliseconds after `origin` of the last dispatch
    last_commit_ms: AtomicU64,
    metrics: Arc<FederationMetrics>,
}

impl CommitCoordinator {
    pub fn new(
        directory: Arc<PartitionDirectory>,
        min_interval: Duration,
        metrics: Arc<FederationMetrics>,
    ) -> Self {
        Self {
            directory,
            min_interval,
            wait_flush: true,
            wait_visible: true,
            origin: Instant::now(),
            last_commit_ms: AtomicU64::new(NEVER),
            metrics,
        }
    }

    pub fn with_wait(mut self, wait_flush: bool, wait_visible: bool) -> Self {
        self.wait_flush = wait_flush;
        self.wait_visible = wait_visible;
        self
    }

    fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }

    /// Claim the right to commit. Returns the time since the previous
    /// dispatch when the claim is refused.
    fn try_claim(&self) -> Result<(), Duration> {
        let min_ms = self.min_interval.as_millis() as u64;
        loop {
            let previous = self.last_commit_ms.load(Ordering::Acquire);
            let now = self.now_ms();
            if previous != NEVER {
                let since = now.saturating_sub(previous);
                if since < min_ms {
                    return Err(Duration::from_millis(since));
                }
            }
            if self
                .last_commit_ms
                .compare_exchange(previous, now, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return Ok(());
            }
        }
    }

    /// Commit every partition. Failures are isolated per partition.
    pub async fn commit_all(&self) -> CommitOutcome {
        if let Err(since_last) = self.try_claim() {
            info!(
                "Not enough time since last commit ({:?}), skipping commit to all {} servers",
                since_last,
                self.directory.len()
            );
            self.metrics.commits_skipped_total.inc();
            return CommitOutcome::Skipped { since_last };
        }

        self.metrics.commits_total.inc();
        debug!("Committing to all {} servers", self.directory.len());

        let mut tasks = JoinSet::new();
        for partition in self.directory.iter() {
            let index = partition.index();
            let endpoint = partition.endpoint().to_string();
            let client = partition.client();
            let (wait_flush, wait_visible) = (self.wait_flush, self.wait_visible);
            tasks.spawn(async move {
                info!("Committing to {}", endpoint);
                let result = client.commit(wait_flush, wait_visible).await;
                (index, endpoint, result)
            });
        }

        let mut report = CommitReport::default();
        let mut aborted: Vec<String> = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, endpoint, Ok(_))) => {
                    info!("Committed to {}", endpoint);
                    report.committed.push(index);
                }
                Ok((index, endpoint, Err(e))) => {
                    error!("Commit to {} failed: {}", endpoint, e);
                    self.metrics.commit_failures_total.inc();
                    report.failed.push((index, e));
                }
                Err(e) => {
                    error!("Commit task aborted: {}", e);
                    aborted.push(e.to_string());
                }
            }
        }

        // A task that panicked never reported its partition; charge it to
        // whichever partitions are unaccounted for
        if !aborted.is_empty() {
            for partition in self.directory.iter() {
                let index = partition.index();
                let reported = report.committed.contains(&index)
                    || report.failed.iter().any(|(i, _)| *i == index);
                if !reported {
                    let reason = aborted.pop().unwrap_or_else(|| "commit task aborted".to_string());
                    self.metrics.commit_failures_total.inc();
                    report.failed.push((index, ShardError::Unavailable(reason)));
                }
            }
        }

        report.committed.sort_unstable();
        report.failed.sort_by_key(|(index, _)| *index);
        debug!(
            "Committed to {} of {} servers",
            report.committed.len(),
            self.directory.len()
        );
        CommitOutcome::Dispatched(report)
    }
}
