use anyhow::Result;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub vector: VectorConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub rag: RagConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub query_expansion: QueryExpansionConfig,
    #[serde(default)]
    pub chat: ChatConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct StorageConfig {
    /// Directory holding the metadata database and legacy snapshots.
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default = "default_media_dir")]
    pub media_dir: String,
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct VectorConfig {
    #[serde(default = "default_vector_url")]
    pub base_url: String,
    /// `[vector, bm25]` fusion weights forwarded to the hybrid endpoint.
    #[serde(default = "default_hybrid_weights")]
    pub hybrid_weights: [f32; 2],
    #[serde(default = "default_vector_timeout")]
    pub timeout_seconds: u64,
    #[serde(default = "default_index_timeout")]
    pub index_timeout_seconds: u64,
    #[serde(default = "default_health_timeout")]
    pub health_timeout_seconds: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_llm_timeout")]
    pub timeout_seconds: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RagConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
    #[serde(default = "default_search_limit")]
    pub default_search_limit: usize,
    #[serde(default = "default_max_search_limit")]
    pub max_search_limit: usize,
    #[serde(default = "default_min_search_score")]
    pub min_search_score: f32,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RateLimitConfig {
    pub capacity: usize,
    pub refill_per_second: f64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct QueueConfig {
    pub concurrency: usize,
    pub max_size: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LimitsConfig {
    #[serde(default = "default_llm_rate")]
    pub llm_rate: RateLimitConfig,
    #[serde(default = "default_chat_rate")]
    pub chat_rate: RateLimitConfig,
    #[serde(default = "default_llm_queue")]
    pub llm_queue: QueueConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct QueryExpansionConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_max_queries")]
    pub max_queries: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ChatConfig {
    #[serde(default = "default_temperature")]
    pub default_temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub default_max_tokens: usize,
    #[serde(default = "default_search_limit")]
    pub default_search_limit: usize,
    #[serde(default = "default_true")]
    pub include_sources_default: bool,
    #[serde(default = "default_system_prompt")]
    pub system_prompt_template: String,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_data_dir() -> String {
    "data".to_string()
}
fn default_media_dir() -> String {
    "data/media".to_string()
}
fn default_max_file_bytes() -> usize {
    50 * 1024 * 1024
}
fn default_vector_url() -> String {
    "http://localhost:7700".to_string()
}
fn default_hybrid_weights() -> [f32; 2] {
    [0.4, 0.6]
}
fn default_vector_timeout() -> u64 {
    30
}
fn default_index_timeout() -> u64 {
    60
}
fn default_health_timeout() -> u64 {
    5
}
fn default_provider() -> String {
    "openai".to_string()
}
fn default_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_llm_timeout() -> u64 {
    60
}
fn default_max_retries() -> u32 {
    2
}
fn default_retry_delay_ms() -> u64 {
    1000
}
fn default_chunk_size() -> usize {
    500
}
fn default_chunk_overlap() -> usize {
    50
}
fn default_search_limit() -> usize {
    5
}
fn default_max_search_limit() -> usize {
    20
}
fn default_min_search_score() -> f32 {
    0.30
}
fn default_llm_rate() -> RateLimitConfig {
    RateLimitConfig {
        capacity: 10,
        refill_per_second: 2.0,
    }
}
fn default_chat_rate() -> RateLimitConfig {
    RateLimitConfig {
        capacity: 20,
        refill_per_second: 5.0,
    }
}
fn default_llm_queue() -> QueueConfig {
    QueueConfig {
        concurrency: 5,
        max_size: 50,
    }
}
fn default_true() -> bool {
    true
}
fn default_max_queries() -> usize {
    3
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> usize {
    2048
}
fn default_system_prompt() -> String {
    "You are a knowledgeable assistant answering questions over a private \
     knowledge base. Ground every answer in the context below; when the \
     context does not contain the answer, say so plainly.\n\nContext:\n{context}"
        .to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            media_dir: default_media_dir(),
            max_file_bytes: default_max_file_bytes(),
        }
    }
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self {
            base_url: default_vector_url(),
            hybrid_weights: default_hybrid_weights(),
            timeout_seconds: default_vector_timeout(),
            index_timeout_seconds: default_index_timeout(),
            health_timeout_seconds: default_health_timeout(),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            api_key: None,
            base_url: None,
            timeout_seconds: default_llm_timeout(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            default_search_limit: default_search_limit(),
            max_search_limit: default_max_search_limit(),
            min_search_score: default_min_search_score(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            llm_rate: default_llm_rate(),
            chat_rate: default_chat_rate(),
            llm_queue: default_llm_queue(),
        }
    }
}

impl Default for QueryExpansionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_queries: default_max_queries(),
        }
    }
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            default_temperature: default_temperature(),
            default_max_tokens: default_max_tokens(),
            default_search_limit: default_search_limit(),
            include_sources_default: true,
            system_prompt_template: default_system_prompt(),
        }
    }
}

impl Settings {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Config::builder()
            .add_source(File::with_name("config/settings").required(false))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let settings: Settings = config.try_deserialize()?;
        Ok(settings)
    }

    pub fn database_path(&self) -> std::path::PathBuf {
        std::path::Path::new(&self.storage.data_dir).join("documents.db")
    }

    pub fn legacy_snapshot_path(&self) -> std::path::PathBuf {
        std::path::Path::new(&self.storage.data_dir).join("documents.json")
    }
}
