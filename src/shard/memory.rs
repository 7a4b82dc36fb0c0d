//! In-process shard backend
//!
//! Evaluates predicates, paging and facet counts over a DashMap of documents.
//! Latency and failures can be injected to exercise the federator's deadline
//! and partial-failure handling.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;

use crate::shard::client::{ShardAck, ShardClient, ShardQuery, ShardResponse};
use crate::types::{Document, FacetCounts, Predicate};
use crate::ShardError;

pub struct MemoryShard {
    endpoint: String,
    documents: DashMap<String, Document>,
    latency_ms: AtomicU64,
    fail_queries: AtomicBool,
    fail_writes: AtomicBool,
    fail_commits: AtomicBool,
    puts: AtomicU64,
    queries: AtomicU64,
    commits: AtomicU64,
    last_query: Mutex<Option<ShardQuery>>,
}

impl MemoryShard {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            documents: DashMap::new(),
            latency_ms: AtomicU64::new(0),
            fail_queries: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
            fail_commits: AtomicBool::new(false),
            puts: AtomicU64::new(0),
            queries: AtomicU64::new(0),
            commits: AtomicU64::new(0),
            last_query: Mutex::new(None),
        }
    }

    /// Store a document directly, bypassing routing
    pub fn insert(&self, document: Document) {
        self.documents.insert(document.key.clone(), document);
    }

    pub fn get(&self, key: &str) -> Option<Document> {
        self.documents.get(key).map(|d| d.value().clone())
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Delay applied to every operation
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms.store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn fail_queries(&self, fail: bool) {
        self.fail_queries.store(fail, Ordering::SeqCst);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn fail_commits(&self, fail: bool) {
        self.fail_commits.store(fail, Ordering::SeqCst);
    }

    pub fn put_count(&self) -> u64 {
        self.puts.load(Ordering::SeqCst)
    }

    pub fn query_count(&self) -> u64 {
        self.queries.load(Ordering::SeqCst)
    }

    pub fn commit_count(&self) -> u64 {
        self.commits.load(Ordering::SeqCst)
    }

    /// Most recent query received, as rewritten by the caller
    pub fn last_query(&self) -> Option<ShardQuery> {
        self.last_query.lock().clone()
    }

    async fn simulate_latency(&self) {
        let ms = self.latency_ms.load(Ordering::SeqCst);
        if ms > 0 {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
    }

    fn evaluate(&self, predicate: &Predicate, document: &Document) -> Result<bool, ShardError> {
        Ok(match predicate {
            Predicate::All => true,
            Predicate::Key(key) => &document.key == key,
            Predicate::Term { field, value } => document.terms(field).iter().any(|t| t == value),
            Predicate::And(parts) => {
                for part in parts {
                    if !self.evaluate(part, document)? {
                        return Ok(false);
                    }
                }
                true
            }
            Predicate::Or(parts) => {
                for part in parts {
                    if self.evaluate(part, document)? {
                        return Ok(true);
                    }
                }
                false
            }
            Predicate::Raw(text) => {
                return Err(ShardError::Unsupported(format!("raw query '{}'", text)));
            }
        })
    }
}

#[async_trait]
impl ShardClient for MemoryShard {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn query(&self, query: &ShardQuery) -> Result<ShardResponse, ShardError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        *self.last_query.lock() = Some(query.clone());
        let started = std::time::Instant::now();

        self.simulate_latency().await;
        if self.fail_queries.load(Ordering::SeqCst) {
            return Err(ShardError::Unavailable(format!("{} refused query", self.endpoint)));
        }

        let mut matched = Vec::new();
        for entry in self.documents.iter() {
            if self.evaluate(&query.predicate, entry.value())? {
                matched.push(entry.value().clone());
            }
        }

        // Newest first, key as tie-break so pages are reproducible
        matched.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then_with(|| a.key.cmp(&b.key)));

        // Facets count every match, not just the returned rows
        let mut facet_counts = FacetCounts::new();
        for field in &query.facet_fields {
            let mut counts: BTreeMap<String, u64> = BTreeMap::new();
            for document in &matched {
                for term in document.terms(field) {
                    *counts.entry(term).or_insert(0) += 1;
                }
            }
            facet_counts.insert(field.clone(), counts);
        }

        let num_found = matched.len() as u64;
        let documents = matched.into_iter().skip(query.start).take(query.rows).collect();

        Ok(ShardResponse {
            documents,
            facet_counts,
            num_found,
            time_taken_ms: started.elapsed().as_millis() as u64,
        })
    }

    async fn put(&self, document: &Document) -> Result<ShardAck, ShardError> {
        self.simulate_latency().await;
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(ShardError::Unavailable(format!("{} refused write", self.endpoint)));
        }
        self.puts.fetch_add(1, Ordering::SeqCst);
        self.insert(document.clone());
        Ok(ShardAck::default())
    }

    async fn commit(&self, _wait_flush: bool, _wait_visible: bool) -> Result<ShardAck, ShardError> {
        self.simulate_latency().await;
        if self.fail_commits.load(Ordering::SeqCst) {
            return Err(ShardError::Unavailable(format!("{} refused commit", self.endpoint)));
        }
        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(ShardAck::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shard() -> MemoryShard {
        let shard = MemoryShard::new("mem-0");
        shard.insert(Document::new("a", "2021-01-01T10:00:00Z").with_field("meta", "foo"));
        shard.insert(Document::new("b", "2021-01-01T12:00:00Z").with_field("meta", "bar"));
        shard.insert(Document::new("c", "2021-01-01T11:00:00Z").with_field("meta", "foo"));
        shard
    }

    #[tokio::test]
    async fn test_query_sorts_newest_first_and_pages() {
        let shard = shard();
        let query = ShardQuery {
            predicate: Predicate::All,
            start: 1,
            rows: 1,
            facet_fields: vec!["meta".into()],
        };
        let response = shard.query(&query).await.unwrap();
        assert_eq!(response.num_found, 3);
        assert_eq!(response.documents.len(), 1);
        assert_eq!(response.documents[0].key, "c");
        assert_eq!(response.facet_counts["meta"]["foo"], 2);
        assert_eq!(response.facet_counts["meta"]["bar"], 1);
        assert_eq!(shard.last_query(), Some(query));
    }

    #[tokio::test]
    async fn test_term_and_key_predicates() {
        let shard = shard();
        let query = ShardQuery {
            predicate: Predicate::And(vec![
                Predicate::term("meta", "foo"),
                Predicate::Or(vec![Predicate::Key("a".into()), Predicate::Key("b".into())]),
            ]),
            start: 0,
            rows: 10,
            facet_fields: vec![],
        };
        let response = shard.query(&query).await.unwrap();
        assert_eq!(response.documents.len(), 1);
        assert_eq!(response.documents[0].key, "a");
    }

    #[tokio::test]
    async fn test_raw_predicate_unsupported() {
        let shard = shard();
        let query = ShardQuery {
            predicate: Predicate::Raw("status:(google)".into()),
            start: 0,
            rows: 10,
            facet_fields: vec![],
        };
        assert!(matches!(shard.query(&query).await, Err(ShardError::Unsupported(_))));
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let shard = shard();
        shard.fail_writes(true);
        shard.fail_commits(true);
        assert!(shard.put(&Document::new("d", "2021-01-01T10:00:00Z")).await.is_err());
        assert!(shard.commit(true, true).await.is_err());
        assert_eq!(shard.put_count(), 0);
        assert_eq!(shard.commit_count(), 0);
        assert!(shard.get("d").is_none());
    }
}
