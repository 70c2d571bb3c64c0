pub mod settings;

pub use settings::{
    ChatConfig, LimitsConfig, LlmConfig, QueryExpansionConfig, QueueConfig, RagConfig,
    RateLimitConfig, ServerConfig, Settings, StorageConfig, VectorConfig,
};
