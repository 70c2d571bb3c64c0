use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Raw hit from the vector backend, pre-resolution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub id: String,
    pub score: f32,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

/// Fully-resolved chunk as returned to search clients.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderChunk {
    pub chunk_id: String,
    pub content: String,
    pub score: f32,
    pub document_id: String,
    pub document_title: String,
    pub media_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_url: Option<String>,
    pub metadata: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    pub user_id: String,
    pub query: String,
    pub limit: Option<usize>,
    pub token_budget: Option<usize>,
    #[serde(default)]
    pub filters: Option<Map<String, Value>>,
    #[serde(default)]
    pub metadata: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResponseMetadata {
    pub search_mode: String,
    pub results_count: usize,
    pub min_score: f32,
}

#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub provider_name: String,
    pub chunks: Vec<ProviderChunk>,
    pub total_tokens: usize,
    pub metadata: SearchResponseMetadata,
}
