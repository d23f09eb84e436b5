//! Elasticsearch sink connector for moviesearch-sync.
//!
//! Talks to the cluster over its REST API. Startup creates the three
//! indices idempotently from the embedded settings/mappings; delivery
//! goes through `_bulk` with upsert-by-id actions. Transport failures
//! are retried with backoff like the source side; documents the cluster
//! rejects individually are retried as a subset with a fixed delay until
//! a bounded retry count runs out, at which point the whole batch fails
//! and the engine aborts the run before committing its cursor.

pub mod schema;

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::error::{DocumentFailure, Result, SyncError};
use crate::retry::{with_backoff, Backoff};
use crate::sync::DocumentSink;
use crate::transform::Document;
use crate::ElasticOpts;

/// Sink connector for the search index.
pub struct ElasticSink {
    http: reqwest::Client,
    base_url: String,
    auth: Option<(String, String)>,
    backoff: Backoff,
    bulk_max_retries: u32,
    bulk_retry_delay: Duration,
}

impl ElasticSink {
    pub fn new(opts: &ElasticOpts, backoff: Backoff) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(SyncError::from)?;

        let auth = match (&opts.elastic_username, &opts.elastic_password) {
            (Some(user), Some(pass)) => Some((user.clone(), pass.clone())),
            (None, None) => None,
            _ => {
                return Err(SyncError::Configuration(
                    "elastic username and password must be provided together".to_string(),
                ))
            }
        };

        Ok(Self {
            http,
            base_url: opts.elastic_endpoint.trim_end_matches('/').to_string(),
            auth,
            backoff,
            bulk_max_retries: opts.bulk_max_retries,
            bulk_retry_delay: Duration::from_secs(opts.bulk_retry_delay_secs),
        })
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}/{}", self.base_url, path);
        let mut req = self.http.request(method, url);
        if let Some((user, pass)) = &self.auth {
            req = req.basic_auth(user, Some(pass));
        }
        req
    }

    /// Wait until the cluster answers, retrying with backoff.
    pub async fn connect(&self) -> Result<()> {
        with_backoff(&self.backoff, "elasticsearch ping", || async {
            let resp = self
                .request(Method::GET, "")
                .send()
                .await
                .map_err(SyncError::from)?;
            if resp.status().is_success() {
                Ok(())
            } else {
                Err(SyncError::Transport(format!(
                    "elasticsearch answered ping with {}",
                    resp.status()
                )))
            }
        })
        .await?;
        info!("Connected to Elasticsearch at {}", self.base_url);
        Ok(())
    }

    /// Create every index this connector writes to, tolerating the ones
    /// that already exist.
    pub async fn ensure_indices(&self) -> Result<()> {
        for (name, body) in schema::index_definitions() {
            self.ensure_index(name, &body).await?;
        }
        Ok(())
    }

    async fn ensure_index(&self, name: &str, body: &serde_json::Value) -> Result<()> {
        with_backoff(&self.backoff, "create index", || async {
            let resp = self
                .request(Method::PUT, name)
                .json(body)
                .send()
                .await
                .map_err(SyncError::from)?;
            let status = resp.status();

            if status.is_success() {
                info!("Created index {name}");
                return Ok(());
            }

            let payload: serde_json::Value = resp.json().await.map_err(SyncError::from)?;
            if payload["error"]["type"] == "resource_already_exists_exception" {
                debug!("Index {name} already exists");
                return Ok(());
            }

            Err(status_error(
                status,
                format!("failed to create index {name}: {payload}"),
            ))
        })
        .await
    }

    /// One `_bulk` attempt. Returns `PartialWrite` when the cluster
    /// accepted the request but rejected individual documents.
    async fn try_bulk(&self, index: &str, documents: &[Document]) -> Result<()> {
        let mut body = String::new();
        for doc in documents {
            let action = serde_json::json!({ "index": { "_index": index, "_id": doc.id() } });
            body.push_str(&action.to_string());
            body.push('\n');
            body.push_str(&doc.to_json().to_string());
            body.push('\n');
        }

        let resp = self
            .request(Method::POST, "_bulk")
            .header(CONTENT_TYPE, "application/x-ndjson")
            .body(body)
            .send()
            .await
            .map_err(SyncError::from)?;

        let status = resp.status();
        if !status.is_success() {
            return Err(status_error(
                status,
                format!("bulk request to {index} failed with {status}"),
            ));
        }

        let payload: BulkResponse = resp.json().await.map_err(SyncError::from)?;
        if !payload.errors {
            return Ok(());
        }

        let failures: Vec<DocumentFailure> = payload
            .items
            .into_iter()
            .filter_map(|item| item.index)
            .filter_map(|status| {
                status.error.map(|error| DocumentFailure {
                    id: status.id,
                    reason: error.to_string(),
                })
            })
            .collect();

        if failures.is_empty() {
            // errors flag set but nothing actionable in the items; treat
            // as a protocol-level problem rather than retrying blindly.
            return Err(SyncError::Query(format!(
                "bulk response for {index} flagged errors without failed items"
            )));
        }

        Err(SyncError::PartialWrite { failures })
    }
}

#[async_trait]
impl DocumentSink for ElasticSink {
    async fn bulk_upsert(&self, index: &str, documents: &[Document]) -> Result<()> {
        if documents.is_empty() {
            return Ok(());
        }

        let mut pending: Vec<Document> = documents.to_vec();
        let mut retry: u32 = 0;

        loop {
            let attempt = with_backoff(&self.backoff, "bulk write", || {
                self.try_bulk(index, &pending)
            })
            .await;

            match attempt {
                Ok(()) => {
                    info!("Indexed {} document(s) into {index}", pending.len());
                    return Ok(());
                }
                Err(SyncError::PartialWrite { failures }) => {
                    if retry >= self.bulk_max_retries {
                        for failure in &failures {
                            warn!(
                                "Document {} permanently rejected by {index}: {}",
                                failure.id, failure.reason
                            );
                        }
                        return Err(SyncError::FatalBatch(format!(
                            "{} document(s) still rejected by {index} after {retry} retries",
                            failures.len()
                        )));
                    }
                    retry += 1;
                    warn!(
                        "Sink rejected {} document(s) from {index}; retry {retry} in {:?}",
                        failures.len(),
                        self.bulk_retry_delay
                    );
                    tokio::time::sleep(self.bulk_retry_delay).await;

                    let failed_ids: HashSet<String> =
                        failures.into_iter().map(|f| f.id).collect();
                    pending.retain(|doc| failed_ids.contains(&doc.id().to_string()));
                }
                Err(other) => return Err(other),
            }
        }
    }
}

/// Map an HTTP error status to the taxonomy: overload and server-side
/// failures are worth retrying, everything else is a request we should
/// not repeat.
fn status_error(status: StatusCode, message: String) -> SyncError {
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        SyncError::Transport(message)
    } else {
        SyncError::Query(message)
    }
}

#[derive(Debug, Deserialize)]
struct BulkResponse {
    errors: bool,
    #[serde(default)]
    items: Vec<BulkItem>,
}

#[derive(Debug, Deserialize)]
struct BulkItem {
    index: Option<BulkItemStatus>,
}

#[derive(Debug, Deserialize)]
struct BulkItemStatus {
    #[serde(rename = "_id")]
    id: String,
    error: Option<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(status_error(StatusCode::SERVICE_UNAVAILABLE, String::new()).is_transport());
        assert!(status_error(StatusCode::TOO_MANY_REQUESTS, String::new()).is_transport());
        assert!(!status_error(StatusCode::BAD_REQUEST, String::new()).is_transport());
        assert!(!status_error(StatusCode::NOT_FOUND, String::new()).is_transport());
    }

    #[test]
    fn test_bulk_response_parsing() {
        let raw = serde_json::json!({
            "took": 3,
            "errors": true,
            "items": [
                { "index": { "_id": "a", "status": 200 } },
                { "index": { "_id": "b", "status": 400,
                             "error": { "type": "mapper_parsing_exception" } } }
            ]
        });
        let parsed: BulkResponse = serde_json::from_value(raw).unwrap();
        assert!(parsed.errors);
        assert_eq!(parsed.items.len(), 2);

        let failed: Vec<_> = parsed
            .items
            .into_iter()
            .filter_map(|i| i.index)
            .filter(|s| s.error.is_some())
            .collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].id, "b");
    }
}
