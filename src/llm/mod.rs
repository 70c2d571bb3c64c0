pub mod provider;
pub mod sse;

use crate::utils::error::ApiError;
use async_trait::async_trait;
use futures::stream::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;

pub use provider::{create_provider, OpenAiCompatProvider, ProviderKind};

/// Token accounting as reported by the provider.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenUsage {
    pub prompt: u32,
    pub completion: u32,
    pub total: u32,
}

#[derive(Debug, Clone)]
pub struct LlmRequest {
    pub system_prompt: String,
    pub user_prompt: String,
    pub temperature: f32,
    pub max_tokens: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub text: String,
    pub usage: Option<TokenUsage>,
    pub model: String,
    pub finish_reason: Option<String>,
}

/// One element of a streaming inference.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamChunk {
    Content {
        content: String,
    },
    Done {
        usage: Option<TokenUsage>,
        finish_reason: Option<String>,
    },
    Error {
        message: String,
    },
}

pub type LlmStream = Pin<Box<dyn Stream<Item = StreamChunk> + Send>>;

/// OpenAI-compatible inference capability set. Concrete variants differ
/// only in their default endpoint; one provider is active at a time.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn infer(&self, request: LlmRequest) -> Result<LlmResponse, ApiError>;

    /// Streaming inference. Transport and protocol failures surface as a
    /// single in-stream `Error` chunk, never as a panic or hang.
    async fn infer_stream(&self, request: LlmRequest) -> LlmStream;

    async fn health(&self) -> bool;
}
