use super::{IndexDocument, SearchMode, VectorIndex};
use crate::config::VectorConfig;
use crate::models::SearchResult;
use crate::utils::error::ApiError;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const INDEX_BATCH_SIZE: usize = 50;
const INDEX_MAX_ATTEMPTS: u32 = 3;

#[derive(Debug, Deserialize)]
struct SearchEnvelope {
    #[serde(alias = "hits")]
    results: Vec<SearchResult>,
}

/// Retrying HTTP client for the vector engine.
///
/// The `/add` → `/upsert` pair of one batch must not interleave with other
/// batches, so the index path runs through a single internal lane; searches
/// and deletes stay concurrent.
pub struct VectorStoreClient {
    client: Client,
    base_url: String,
    hybrid_weights: [f32; 2],
    timeout: Duration,
    index_timeout: Duration,
    health_timeout: Duration,
    index_lane: Mutex<()>,
}

impl VectorStoreClient {
    pub fn new(config: &VectorConfig) -> Self {
        Self {
            client: Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            hybrid_weights: config.hybrid_weights,
            timeout: Duration::from_secs(config.timeout_seconds),
            index_timeout: Duration::from_secs(config.index_timeout_seconds),
            health_timeout: Duration::from_secs(config.health_timeout_seconds),
            index_lane: Mutex::new(()),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn parse_results(response: reqwest::Response) -> Result<Vec<SearchResult>, ApiError> {
        let status = response.status();
        if status.is_success() {
            let body = response
                .text()
                .await
                .map_err(|e| ApiError::BackendUnavailable(format!("read body: {}", e)))?;
            let envelope: SearchEnvelope = serde_json::from_str(&body)
                .map_err(|e| ApiError::ProtocolError(format!("malformed search response: {}", e)))?;
            Ok(envelope.results)
        } else {
            let body = response.text().await.unwrap_or_default();
            if status.is_client_error() {
                Err(ApiError::BackendRejected(format!("{}: {}", status, body)))
            } else {
                Err(ApiError::BackendUnavailable(format!("{}: {}", status, body)))
            }
        }
    }

    /// Run one batch through `/add` (or `/addobject`) then `/upsert`,
    /// holding the index lane so pairs never interleave.
    async fn submit_batch(&self, batch: &[IndexDocument], multimodal: bool) -> Result<(), ApiError> {
        let _lane = self.index_lane.lock().await;

        let mut add_url = self.url(if multimodal { "/addobject" } else { "/add" });
        let mut response = self
            .client
            .post(&add_url)
            .timeout(self.index_timeout)
            .json(batch)
            .send()
            .await
            .map_err(|e| ApiError::BackendUnavailable(format!("add failed: {}", e)))?;

        // Backends without a multimodal ingest path accept the same
        // payload on the text endpoint.
        if multimodal && response.status() == StatusCode::NOT_FOUND {
            debug!("addobject unsupported, falling back to /add");
            add_url = self.url("/add");
            response = self
                .client
                .post(&add_url)
                .timeout(self.index_timeout)
                .json(batch)
                .send()
                .await
                .map_err(|e| ApiError::BackendUnavailable(format!("add failed: {}", e)))?;
        }

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return if status.is_client_error() {
                Err(ApiError::BackendRejected(format!("add {}: {}", status, body)))
            } else {
                Err(ApiError::BackendUnavailable(format!(
                    "add {}: {}",
                    status, body
                )))
            };
        }

        let upsert = self
            .client
            .get(self.url("/upsert"))
            .timeout(self.index_timeout)
            .send()
            .await
            .map_err(|e| ApiError::BackendUnavailable(format!("upsert failed: {}", e)))?;

        let status = upsert.status();
        if status.is_success() {
            return Ok(());
        }
        let body = upsert.text().await.unwrap_or_default();
        // An upsert against an already-flushed buffer reports 500; that is
        // a commit of nothing, not a failure.
        if status == StatusCode::INTERNAL_SERVER_ERROR && body.to_lowercase().contains("empty") {
            debug!("upsert on empty buffer, treating as committed");
            return Ok(());
        }
        if status.is_client_error() {
            Err(ApiError::BackendRejected(format!(
                "upsert {}: {}",
                status, body
            )))
        } else {
            Err(ApiError::BackendUnavailable(format!(
                "upsert {}: {}",
                status, body
            )))
        }
    }

    async fn index_batches(
        &self,
        docs: Vec<IndexDocument>,
        multimodal: bool,
    ) -> Result<(), ApiError> {
        if docs.is_empty() {
            return Ok(());
        }

        let batches: Vec<&[IndexDocument]> = docs.chunks(INDEX_BATCH_SIZE).collect();
        let total = batches.len();
        let mut batch_errors: Vec<String> = Vec::new();

        for (batch_no, batch) in batches.into_iter().enumerate() {
            let mut last_error = None;

            for attempt in 1..=INDEX_MAX_ATTEMPTS {
                match self.submit_batch(batch, multimodal).await {
                    Ok(()) => {
                        debug!(batch = batch_no + 1, total, docs = batch.len(), "batch indexed");
                        last_error = None;
                        break;
                    }
                    Err(e) => {
                        warn!(
                            batch = batch_no + 1,
                            attempt,
                            error = %e,
                            "index batch attempt failed"
                        );
                        last_error = Some(e);
                        if attempt < INDEX_MAX_ATTEMPTS {
                            tokio::time::sleep(Duration::from_secs(u64::from(attempt))).await;
                        }
                    }
                }
            }

            if let Some(e) = last_error {
                batch_errors.push(format!("batch {}/{}: {}", batch_no + 1, total, e));
            }
        }

        if batch_errors.is_empty() {
            Ok(())
        } else {
            Err(ApiError::BackendUnavailable(batch_errors.join("; ")))
        }
    }
}

#[async_trait]
impl VectorIndex for VectorStoreClient {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchResult>, ApiError> {
        let response = self
            .client
            .post(self.url("/search"))
            .timeout(self.timeout)
            .json(&json!({ "query": query, "limit": limit }))
            .send()
            .await
            .map_err(|e| ApiError::BackendUnavailable(format!("search failed: {}", e)))?;

        Self::parse_results(response).await
    }

    async fn hybrid_search(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<(Vec<SearchResult>, SearchMode), ApiError> {
        let attempt = self
            .client
            .post(self.url("/hybrid"))
            .timeout(self.timeout)
            .json(&json!({
                "query": query,
                "limit": limit,
                "weights": self.hybrid_weights,
            }))
            .send()
            .await;

        match attempt {
            Ok(response) if response.status() == StatusCode::NOT_FOUND => {
                info!("hybrid endpoint unavailable (404), degrading to vector search");
                let results = self.search(query, limit).await?;
                Ok((results, SearchMode::Vector))
            }
            Ok(response) => {
                let results = Self::parse_results(response).await?;
                Ok((results, SearchMode::Hybrid))
            }
            Err(e) => {
                info!(error = %e, "hybrid endpoint unreachable, degrading to vector search");
                let results = self.search(query, limit).await?;
                Ok((results, SearchMode::Vector))
            }
        }
    }

    async fn index(&self, docs: Vec<IndexDocument>) -> Result<(), ApiError> {
        self.index_batches(docs, false).await
    }

    async fn index_multimodal(&self, docs: Vec<IndexDocument>) -> Result<(), ApiError> {
        self.index_batches(docs, true).await
    }

    async fn delete(&self, ids: Vec<String>) -> Result<(), ApiError> {
        if ids.is_empty() {
            return Ok(());
        }
        let response = self
            .client
            .post(self.url("/delete"))
            .timeout(self.timeout)
            .json(&ids)
            .send()
            .await
            .map_err(|e| ApiError::BackendUnavailable(format!("delete failed: {}", e)))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            if status.is_client_error() {
                Err(ApiError::BackendRejected(format!("{}: {}", status, body)))
            } else {
                Err(ApiError::BackendUnavailable(format!("{}: {}", status, body)))
            }
        }
    }

    async fn health(&self) -> bool {
        match self
            .client
            .get(self.url("/health"))
            .timeout(self.health_timeout)
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_document_flattens_metadata() {
        let mut metadata = serde_json::Map::new();
        metadata.insert("document_id".to_string(), json!("doc_1"));
        metadata.insert("chunk_index".to_string(), json!(0));

        let doc = IndexDocument {
            id: "doc_1_chunk_0".to_string(),
            text: "body".to_string(),
            metadata,
        };
        let value = serde_json::to_value(&doc).unwrap();
        assert_eq!(value["id"], "doc_1_chunk_0");
        assert_eq!(value["text"], "body");
        assert_eq!(value["document_id"], "doc_1");
        assert_eq!(value["chunk_index"], 0);
        assert!(value.get("metadata").is_none());
    }

    #[test]
    fn test_search_envelope_accepts_hits_alias() {
        let body = r#"{"hits": [{"id": "c1", "score": 0.8, "text": "t", "metadata": {}}]}"#;
        let envelope: SearchEnvelope = serde_json::from_str(body).unwrap();
        assert_eq!(envelope.results.len(), 1);
        assert_eq!(envelope.results[0].id, "c1");
    }

    #[test]
    fn test_base_url_trailing_slash_normalized() {
        let config = VectorConfig {
            base_url: "http://localhost:7700/".to_string(),
            ..Default::default()
        };
        let client = VectorStoreClient::new(&config);
        assert_eq!(client.url("/search"), "http://localhost:7700/search");
    }
}
