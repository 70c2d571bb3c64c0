pub mod client;

use crate::models::SearchResult;
use crate::utils::error::ApiError;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};

pub use client::VectorStoreClient;

/// Which retrieval path actually executed; hybrid degrades to vector when
/// the backend lacks the hybrid endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMode {
    Hybrid,
    Vector,
}

impl SearchMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchMode::Hybrid => "hybrid",
            SearchMode::Vector => "vector",
        }
    }
}

/// Chunk payload as shipped to the vector backend's ingest endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct IndexDocument {
    pub id: String,
    pub text: String,
    #[serde(flatten)]
    pub metadata: Map<String, Value>,
}

/// The remote vector engine, seen from the core. The embedding itself is
/// entirely the backend's business.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Purely semantic search.
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchResult>, ApiError>;

    /// Semantic + keyword fusion; reports which mode actually ran.
    async fn hybrid_search(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<(Vec<SearchResult>, SearchMode), ApiError>;

    async fn index(&self, docs: Vec<IndexDocument>) -> Result<(), ApiError>;

    async fn index_multimodal(&self, docs: Vec<IndexDocument>) -> Result<(), ApiError>;

    async fn delete(&self, ids: Vec<String>) -> Result<(), ApiError>;

    /// Non-throwing availability probe.
    async fn health(&self) -> bool;
}
