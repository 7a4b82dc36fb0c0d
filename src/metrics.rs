//! Prometheus instrumentation for a federated index

use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};

/// Counters owned by one federated index. Each instance carries its own
/// registry so several indexes can live in one process.
pub struct FederationMetrics {
    registry: Registry,
    pub queries_total: IntCounter,
    pub partition_timeouts_total: IntCounter,
    pub partition_errors_total: IntCounter,
    pub partial_responses_total: IntCounter,
    pub writes_total: IntCounterVec,
    pub write_failures_total: IntCounter,
    pub commits_total: IntCounter,
    pub commits_skipped_total: IntCounter,
    pub commit_failures_total: IntCounter,
    pub query_duration_seconds: Histogram,
}

impl FederationMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let queries_total = IntCounter::new("lumafed_queries_total", "Federated queries executed")?;
        let partition_timeouts_total = IntCounter::new(
            "lumafed_partition_timeouts_total",
            "Partition queries abandoned at their deadline",
        )?;
        let partition_errors_total = IntCounter::new(
            "lumafed_partition_errors_total",
            "Partition queries that returned an error",
        )?;
        let partial_responses_total = IntCounter::new(
            "lumafed_partial_responses_total",
            "Federated queries where no partition answered",
        )?;
        let writes_total = IntCounterVec::new(
            Opts::new("lumafed_writes_total", "Documents written per partition"),
            &["partition"],
        )?;
        let write_failures_total =
            IntCounter::new("lumafed_write_failures_total", "Writes rejected by a partition")?;
        let commits_total =
            IntCounter::new("lumafed_commits_total", "Cluster-wide commits dispatched")?;
        let commits_skipped_total = IntCounter::new(
            "lumafed_commits_skipped_total",
            "Commits skipped by the minimum commit interval",
        )?;
        let commit_failures_total = IntCounter::new(
            "lumafed_commit_failures_total",
            "Per-partition commit failures",
        )?;
        let query_duration_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "lumafed_query_duration_seconds",
                "Federated query latency distribution",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
        )?;

        registry.register(Box::new(queries_total.clone()))?;
        registry.register(Box::new(partition_timeouts_total.clone()))?;
        registry.register(Box::new(partition_errors_total.clone()))?;
        registry.register(Box::new(partial_responses_total.clone()))?;
        registry.register(Box::new(writes_total.clone()))?;
        registry.register(Box::new(write_failures_total.clone()))?;
        registry.register(Box::new(commits_total.clone()))?;
        registry.register(Box::new(commits_skipped_total.clone()))?;
        registry.register(Box::new(commit_failures_total.clone()))?;
        registry.register(Box::new(query_duration_seconds.clone()))?;

        Ok(Self {
            registry,
            queries_total,
            partition_timeouts_total,
            partition_errors_total,
            partial_responses_total,
            writes_total,
            write_failures_total,
            commits_total,
            commits_skipped_total,
            commit_failures_total,
            query_duration_seconds,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Text exposition format
    pub fn encode_text(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}
