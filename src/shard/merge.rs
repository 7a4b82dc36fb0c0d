//! Merge of partial shard responses
//!
//! Deduplication by key (latest timestamp wins), newest-first ordering,
//! cursor anchoring, page windowing and facet summation. Everything here is
//! order-independent across partitions except the stable sort, which keeps
//! first-seen order among equal timestamps.

use std::collections::{BTreeMap, HashMap};

use tracing::{debug, warn};

use crate::shard::client::ShardResponse;
use crate::types::{ContinuationCursor, Document, FacetCounts};

/// Requested slice of the merged result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageWindow {
    pub offset: usize,
    pub count: usize,
}

/// Merged documents and facets, before response bookkeeping
#[derive(Debug, Default)]
pub struct MergedPage {
    pub documents: Vec<Document>,
    pub total_approx_count: usize,
    pub facets: FacetCounts,
    /// Cursor for the newest merged document
    pub head: Option<ContinuationCursor>,
}

pub fn merge_responses(
    responses: &[ShardResponse],
    window: PageWindow,
    cursor: Option<&ContinuationCursor>,
    facet_fields: &[String],
) -> MergedPage {
    let mut unique = dedup_latest(responses.iter().flat_map(|r| r.documents.iter().cloned()));
    let total_approx_count = unique.len();
    sort_newest_first(&mut unique);
    let head = unique.first().map(ContinuationCursor::after);

    MergedPage {
        documents: select_page(unique, cursor, window),
        total_approx_count,
        facets: merge_facets(responses, facet_fields),
        head,
    }
}

/// Collapse documents sharing a key, keeping the lexically greatest
/// timestamp. Keeps first-seen order.
pub fn dedup_latest(documents: impl IntoIterator<Item = Document>) -> Vec<Document> {
    let mut position: HashMap<String, usize> = HashMap::new();
    let mut unique: Vec<Document> = Vec::new();

    for document in documents {
        if document.key.is_empty() || document.timestamp.is_empty() {
            warn!("Dropping shard document without key or timestamp: {:?}", document.key);
            continue;
        }
        match position.get(&document.key) {
            Some(&slot) => {
                if document.timestamp > unique[slot].timestamp {
                    debug!(
                        "Duplicate key {} resolved to timestamp {}",
                        document.key, document.timestamp
                    );
                    unique[slot] = document;
                }
            }
            None => {
                position.insert(document.key.clone(), unique.len());
                unique.push(document);
            }
        }
    }
    unique
}

/// Stable descending sort on the timestamp string
pub fn sort_newest_first(documents: &mut [Document]) {
    documents.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
}

/// Apply the cursor anchor, then skip `offset` and take up to `count`.
///
/// Row 0 is the first document whose key equals the anchor key or whose
/// timestamp is strictly older than the anchor timestamp. If neither is
/// found the page is empty.
pub fn select_page(
    sorted: Vec<Document>,
    cursor: Option<&ContinuationCursor>,
    window: PageWindow,
) -> Vec<Document> {
    let cursor = cursor.filter(|c| !c.is_empty());
    let mut anchored = cursor.is_none();
    let mut page = Vec::with_capacity(window.count);
    let mut row = 0usize;

    if window.count == 0 {
        return page;
    }

    for document in sorted {
        if !anchored {
            if let Some(cursor) = cursor {
                if cursor.anchor_key.as_deref() == Some(document.key.as_str()) {
                    debug!("Found anchor by key {}", document.key);
                    anchored = true;
                } else if let Some(anchor_ts) = cursor.anchor_timestamp.as_deref() {
                    if document.timestamp.as_str() < anchor_ts {
                        debug!("Found anchor by timestamp at {}", document.key);
                        anchored = true;
                    }
                }
            }
            if !anchored {
                continue;
            }
        }

        if row >= window.offset {
            page.push(document);
            if page.len() == window.count {
                break;
            }
        }
        row += 1;
    }

    if !anchored {
        debug!("Continuation anchor not found; returning empty page");
    }
    page
}

/// Sum facet counts for the requested fields across responses.
/// Every requested field is present in the result, possibly empty.
pub fn merge_facets(responses: &[ShardResponse], facet_fields: &[String]) -> FacetCounts {
    let mut merged: FacetCounts = facet_fields
        .iter()
        .map(|field| (field.clone(), BTreeMap::new()))
        .collect();

    for response in responses {
        for (field, counts) in &response.facet_counts {
            let Some(target) = merged.get_mut(field) else {
                continue;
            };
            for (value, count) in counts {
                *target.entry(value.clone()).or_insert(0) += count;
            }
        }
    }
    merged
}
