//! HTTP shard client
//!
//! Talks to a Solr-style search server over JSON:
//! - `GET  {base}/select` for queries, facets as flat `[value, count, ...]` lists
//! - `POST {base}/update/json/docs` for single-document writes
//! - `POST {base}/update?commit=true` for commits

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Map, Value as JsonValue};
use tracing::warn;

use crate::shard::client::{ShardAck, ShardClient, ShardQuery, ShardResponse};
use crate::types::{Document, FacetCounts, FieldValue, Predicate};
use crate::ShardError;

pub const KEY_FIELD: &str = "key";
pub const TIMESTAMP_FIELD: &str = "timestamp";
pub const KEY_HASH_FIELD: &str = "keyHashCode";

pub struct HttpShardClient {
    base_url: String,
    http: reqwest::Client,
}

impl HttpShardClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, ShardError> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| ShardError::Unavailable(e.to_string()))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<JsonValue, ShardError> {
        let response = request.send().await.map_err(map_transport_error)?;
        let status = response.status();
        let body = response.text().await.map_err(map_transport_error)?;
        if !status.is_success() {
            return Err(ShardError::Backend {
                status: status.as_u16(),
                message: body,
            });
        }
        serde_json::from_str(&body).map_err(|e| ShardError::Decode(e.to_string()))
    }
}

fn map_transport_error(e: reqwest::Error) -> ShardError {
    if e.is_timeout() {
        ShardError::Timeout(e.to_string())
    } else {
        ShardError::Unavailable(e.to_string())
    }
}

/// Render a predicate in Solr query syntax
pub fn predicate_to_query(predicate: &Predicate) -> String {
    match predicate {
        Predicate::All => "*:*".to_string(),
        Predicate::Key(key) => format!("{}:\"{}\"", KEY_FIELD, escape_phrase(key)),
        Predicate::Term { field, value } => format!("{}:\"{}\"", field, escape_phrase(value)),
        Predicate::And(parts) => join_clauses(parts, " AND "),
        Predicate::Or(parts) => join_clauses(parts, " OR "),
        Predicate::Raw(text) => text.clone(),
    }
}

fn join_clauses(parts: &[Predicate], op: &str) -> String {
    if parts.is_empty() {
        return "*:*".to_string();
    }
    let clauses: Vec<String> = parts
        .iter()
        .map(|p| format!("({})", predicate_to_query(p)))
        .collect();
    clauses.join(op)
}

fn escape_phrase(text: &str) -> String {
    text.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Query-string parameters for `/select`
pub fn select_params(query: &ShardQuery) -> Vec<(String, String)> {
    let mut params = vec![
        ("q".to_string(), predicate_to_query(&query.predicate)),
        ("start".to_string(), query.start.to_string()),
        ("rows".to_string(), query.rows.to_string()),
        ("sort".to_string(), format!("{} desc", TIMESTAMP_FIELD)),
        ("wt".to_string(), "json".to_string()),
    ];
    if !query.facet_fields.is_empty() {
        params.push(("facet".to_string(), "true".to_string()));
        params.push(("facet.limit".to_string(), "-1".to_string()));
        params.push(("facet.mincount".to_string(), "1".to_string()));
        for field in &query.facet_fields {
            params.push(("facet.field".to_string(), field.clone()));
        }
    }
    params
}

/// Decode a `/select` JSON body
pub fn parse_select(body: &JsonValue) -> Result<ShardResponse, ShardError> {
    let response = body
        .get("response")
        .ok_or_else(|| ShardError::Decode("missing 'response'".into()))?;
    let docs = response
        .get("docs")
        .and_then(JsonValue::as_array)
        .ok_or_else(|| ShardError::Decode("missing 'response.docs'".into()))?;

    let documents = docs.iter().filter_map(document_from_json).collect();
    let num_found = response.get("numFound").and_then(JsonValue::as_u64).unwrap_or(0);
    let time_taken_ms = qtime(body);

    let mut facet_counts = FacetCounts::new();
    if let Some(fields) = body
        .pointer("/facet_counts/facet_fields")
        .and_then(JsonValue::as_object)
    {
        for (field, flat) in fields {
            let Some(flat) = flat.as_array() else {
                continue;
            };
            let mut counts = BTreeMap::new();
            for pair in flat.chunks(2) {
                if let [value, count] = pair {
                    let value = match value {
                        JsonValue::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    counts.insert(value, count.as_u64().unwrap_or(0));
                }
            }
            facet_counts.insert(field.clone(), counts);
        }
    }

    Ok(ShardResponse {
        documents,
        facet_counts,
        num_found,
        time_taken_ms,
    })
}

/// Decode one stored document. Documents without a string key or
/// timestamp are skipped, as are fields with no `FieldValue` form
/// (`null`, nested objects).
pub fn document_from_json(value: &JsonValue) -> Option<Document> {
    let object = value.as_object()?;
    let key = object.get(KEY_FIELD)?.as_str()?;
    let timestamp = object.get(TIMESTAMP_FIELD)?.as_str()?;

    let mut document = Document::new(key, timestamp);
    document.partition_hash = object
        .get(KEY_HASH_FIELD)
        .and_then(JsonValue::as_i64)
        .map(|h| h as u32);

    for (name, raw) in object {
        if name == KEY_FIELD || name == TIMESTAMP_FIELD || name == KEY_HASH_FIELD {
            continue;
        }
        match serde_json::from_value::<FieldValue>(raw.clone()) {
            Ok(field) => {
                document.fields.insert(name.clone(), field);
            }
            Err(_) => warn!("Dropping field {} of doc {}: unsupported value {}", name, key, raw),
        }
    }
    Some(document)
}

/// Encode a document for `/update/json/docs`
pub fn document_to_json(document: &Document) -> JsonValue {
    let mut object = Map::new();
    for (name, value) in &document.fields {
        object.insert(name.clone(), json!(value));
    }
    object.insert(KEY_FIELD.to_string(), json!(document.key));
    object.insert(TIMESTAMP_FIELD.to_string(), json!(document.timestamp));
    if let Some(hash) = document.partition_hash {
        object.insert(KEY_HASH_FIELD.to_string(), json!(hash));
    }
    JsonValue::Object(object)
}

fn qtime(body: &JsonValue) -> u64 {
    body.pointer("/responseHeader/QTime")
        .and_then(JsonValue::as_u64)
        .unwrap_or(0)
}

#[async_trait]
impl ShardClient for HttpShardClient {
    fn endpoint(&self) -> &str {
        &self.base_url
    }

    async fn query(&self, query: &ShardQuery) -> Result<ShardResponse, ShardError> {
        let request = self.http.get(self.url("select")).query(&select_params(query));
        let body = self.send(request).await?;
        parse_select(&body)
    }

    async fn put(&self, document: &Document) -> Result<ShardAck, ShardError> {
        let request = self
            .http
            .post(self.url("update/json/docs"))
            .query(&[("wt", "json")])
            .json(&document_to_json(document));
        let body = self.send(request).await?;
        Ok(ShardAck {
            time_taken_ms: qtime(&body),
        })
    }

    async fn commit(&self, wait_flush: bool, wait_visible: bool) -> Result<ShardAck, ShardError> {
        let request = self.http.post(self.url("update")).query(&[
            ("commit", "true".to_string()),
            ("waitFlush", wait_flush.to_string()),
            ("waitSearcher", wait_visible.to_string()),
            ("wt", "json".to_string()),
        ]);
        let body = self.send(request).await?;
        Ok(ShardAck {
            time_taken_ms: qtime(&body),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_predicate_rendering() {
        assert_eq!(predicate_to_query(&Predicate::All), "*:*");
        assert_eq!(
            predicate_to_query(&Predicate::Key("WEBDOC-http://en.wikipedia.org/wiki/Silverton".into())),
            "key:\"WEBDOC-http://en.wikipedia.org/wiki/Silverton\""
        );
        let compound = Predicate::And(vec![
            Predicate::term("meta", "say \"hi\""),
            Predicate::Raw("status:(google) OR web-title:(google)".into()),
        ]);
        assert_eq!(
            predicate_to_query(&compound),
            "(meta:\"say \\\"hi\\\"\") AND (status:(google) OR web-title:(google))"
        );
    }

    #[test]
    fn test_select_params_include_facets() {
        let query = ShardQuery {
            predicate: Predicate::All,
            start: 0,
            rows: 60,
            facet_fields: vec!["full-id".into(), "meta".into()],
        };
        let params = select_params(&query);
        assert!(params.contains(&("rows".to_string(), "60".to_string())));
        assert!(params.contains(&("start".to_string(), "0".to_string())));
        let facets: Vec<_> = params.iter().filter(|(k, _)| k == "facet.field").collect();
        assert_eq!(facets.len(), 2);
    }

    #[test]
    fn test_parse_select_body() {
        let body = json!({
            "responseHeader": {"status": 0, "QTime": 7},
            "response": {
                "numFound": 2,
                "start": 0,
                "docs": [
                    {"key": "a", "timestamp": "2021-01-01T10:00:00Z", "keyHashCode": 42,
                     "meta": ["foo", "bar"], "score": 1.5},
                    {"timestamp": "2021-01-01T09:00:00Z"}
                ]
            },
            "facet_counts": {
                "facet_fields": {"meta": ["foo", 3, "bar", 2]}
            }
        });

        let response = parse_select(&body).unwrap();
        assert_eq!(response.time_taken_ms, 7);
        assert_eq!(response.num_found, 2);
        assert_eq!(response.documents.len(), 1);
        let doc = &response.documents[0];
        assert_eq!(doc.partition_hash, Some(42));
        assert_eq!(doc.terms("meta"), vec!["foo".to_string(), "bar".to_string()]);
        assert_eq!(doc.field("score"), Some(&FieldValue::Float(1.5)));
        assert_eq!(response.facet_counts["meta"]["foo"], 3);
        assert_eq!(response.facet_counts["meta"]["bar"], 2);
    }

    #[test]
    fn test_parse_select_rejects_missing_response() {
        let body = json!({"error": {"msg": "undefined field"}});
        assert!(matches!(parse_select(&body), Err(ShardError::Decode(_))));
    }

    #[test]
    fn test_document_json_carries_hash() {
        let mut doc = Document::new("abc", "2021-01-01T10:00:00Z").with_field("meta", "foo");
        doc.partition_hash = Some(7);
        let encoded = document_to_json(&doc);
        assert_eq!(encoded["key"], "abc");
        assert_eq!(encoded["keyHashCode"], 7);
        assert_eq!(encoded["meta"], "foo");
        assert_eq!(document_from_json(&encoded), Some(doc));
    }

    #[test]
    fn test_unsupported_field_values_dropped() {
        let stored = json!({
            "key": "a",
            "timestamp": "2021-01-01T10:00:00Z",
            "meta": "foo",
            "location": {"lat": 1.0, "lon": 2.0},
            "caption": null
        });
        let doc = document_from_json(&stored).unwrap();
        assert_eq!(doc.field("meta"), Some(&FieldValue::Text("foo".into())));
        assert!(doc.field("location").is_none());
        assert!(doc.field("caption").is_none());
        assert_eq!(doc.fields.len(), 1);
    }

    #[test]
    fn test_trailing_slash_trimmed() {
        let client = HttpShardClient::new("http://localhost:8999/solr/").unwrap();
        assert_eq!(client.endpoint(), "http://localhost:8999/solr");
        assert_eq!(client.url("select"), "http://localhost:8999/solr/select");
    }
}
