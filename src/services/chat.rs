use crate::config::ChatConfig;
use crate::llm::{LlmProvider, LlmRequest, StreamChunk, TokenUsage};
use crate::models::{
    ChatEvent, ChatRequest, ChatResponse, KnowledgeSource, ProviderChunk, SearchResponse,
};
use crate::services::query_processor::QueryProcessor;
use crate::services::search_engine::SearchEngine;
use crate::utils::error::ApiError;
use crate::utils::limiters::{RequestQueue, TokenBucket};
use async_stream::stream;
use futures::stream::Stream;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

const NO_CONTEXT_SENTENCE: &str = "No relevant context was found in the knowledge base.";
const SOURCE_PREVIEW_CHARS: usize = 100;
const LLM_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);

/// The full RAG loop: query rewriting, retrieval, prompt assembly, and
/// streaming inference, surfaced as one typed event stream per run.
pub struct ChatService {
    query_processor: Arc<QueryProcessor>,
    search_engine: Arc<SearchEngine>,
    provider: Option<Arc<dyn LlmProvider>>,
    chat_limiter: Arc<TokenBucket>,
    llm_limiter: Arc<TokenBucket>,
    llm_queue: Arc<RequestQueue>,
    config: ChatConfig,
}

struct PreparedRun {
    thread_id: String,
    run_id: String,
    message_id: String,
    user_id: String,
    message: String,
    search_limit: usize,
    temperature: f32,
    max_tokens: usize,
    include_sources: bool,
}

impl ChatService {
    pub fn new(
        query_processor: Arc<QueryProcessor>,
        search_engine: Arc<SearchEngine>,
        provider: Option<Arc<dyn LlmProvider>>,
        chat_limiter: Arc<TokenBucket>,
        llm_limiter: Arc<TokenBucket>,
        llm_queue: Arc<RequestQueue>,
        config: ChatConfig,
    ) -> Self {
        Self {
            query_processor,
            search_engine,
            provider,
            chat_limiter,
            llm_limiter,
            llm_queue,
            config,
        }
    }

    fn prepare(&self, request: &ChatRequest) -> Result<PreparedRun, ApiError> {
        if request.message.trim().is_empty() {
            return Err(ApiError::InvalidRequest("message is required".to_string()));
        }

        let options = request.options.clone().unwrap_or_default();
        Ok(PreparedRun {
            thread_id: request
                .thread_id
                .clone()
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            run_id: request
                .run_id
                .clone()
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            message_id: uuid::Uuid::new_v4().to_string(),
            user_id: request
                .user_id
                .clone()
                .unwrap_or_else(|| "anonymous".to_string()),
            message: request.message.clone(),
            search_limit: options
                .search_limit
                .unwrap_or(self.config.default_search_limit),
            temperature: options
                .temperature
                .unwrap_or(self.config.default_temperature),
            max_tokens: options.max_tokens.unwrap_or(self.config.default_max_tokens),
            include_sources: options
                .include_sources
                .unwrap_or(self.config.include_sources_default),
        })
    }

    async fn retrieve(&self, run: &PreparedRun) -> Result<SearchResponse, ApiError> {
        let processed = self.query_processor.process(&run.message).await;
        self.search_engine
            .search(
                &run.user_id,
                &run.message,
                Some(run.search_limit),
                None,
                Some(processed),
            )
            .await
    }

    fn llm_request(&self, run: &PreparedRun, context: &str) -> LlmRequest {
        LlmRequest {
            system_prompt: self
                .config
                .system_prompt_template
                .replace("{context}", context),
            user_prompt: run.message.clone(),
            temperature: run.temperature,
            max_tokens: Some(run.max_tokens),
        }
    }

    /// Streaming chat. A rate-limit rejection happens before the stream
    /// exists and emits no events; everything after `RUN_STARTED` ends in
    /// exactly one of `RUN_FINISHED` or `RUN_ERROR`.
    pub fn chat_stream(
        &self,
        request: ChatRequest,
    ) -> Result<impl Stream<Item = ChatEvent> + Send + 'static, ApiError> {
        let run = self.prepare(&request)?;

        if !self.chat_limiter.try_acquire() {
            return Err(ApiError::RateLimited(
                "chat admission rejected, try again shortly".to_string(),
            ));
        }

        info!(thread_id = %run.thread_id, run_id = %run.run_id, "chat run started");

        let query_processor = self.query_processor.clone();
        let search_engine = self.search_engine.clone();
        let provider = self.provider.clone();
        let llm_limiter = self.llm_limiter.clone();
        let llm_queue = self.llm_queue.clone();
        let config = self.config.clone();

        Ok(stream! {
            yield ChatEvent::RunStarted {
                thread_id: run.thread_id.clone(),
                run_id: run.run_id.clone(),
            };

            let Some(provider) = provider else {
                yield ChatEvent::RunError {
                    error: "no llm provider configured".to_string(),
                };
                return;
            };

            let processed = query_processor.process(&run.message).await;
            let search = match search_engine
                .search(
                    &run.user_id,
                    &run.message,
                    Some(run.search_limit),
                    None,
                    Some(processed),
                )
                .await
            {
                Ok(s) => s,
                Err(e) => {
                    yield ChatEvent::RunError { error: e.to_string() };
                    return;
                }
            };

            if run.include_sources && !search.chunks.is_empty() {
                let sources = build_sources(&search.chunks);
                match serde_json::to_value(&sources) {
                    Ok(value) => {
                        yield ChatEvent::Custom {
                            name: "knowledge_sources".to_string(),
                            value,
                        }
                    }
                    Err(e) => debug!(error = %e, "failed to serialize sources"),
                }
            }

            let context = build_context(&search.chunks);
            let llm_request = LlmRequest {
                system_prompt: config.system_prompt_template.replace("{context}", &context),
                user_prompt: run.message.clone(),
                temperature: run.temperature,
                max_tokens: Some(run.max_tokens),
            };

            if !llm_limiter.acquire(LLM_ACQUIRE_TIMEOUT).await {
                yield ChatEvent::RunError {
                    error: "llm rate limit exceeded".to_string(),
                };
                return;
            }
            // The slot covers the whole upstream stream; dropping the
            // generator releases it on every exit path.
            let _slot = match llm_queue.acquire_slot().await {
                Ok(slot) => slot,
                Err(e) => {
                    yield ChatEvent::RunError { error: e.to_string() };
                    return;
                }
            };

            yield ChatEvent::TextMessageStart {
                message_id: run.message_id.clone(),
                role: "assistant".to_string(),
            };

            let mut llm_stream = provider.infer_stream(llm_request).await;
            let mut usage: Option<TokenUsage> = None;

            while let Some(chunk) = llm_stream.next().await {
                match chunk {
                    StreamChunk::Content { content } => {
                        yield ChatEvent::TextMessageChunk {
                            message_id: run.message_id.clone(),
                            delta: content,
                        };
                    }
                    StreamChunk::Done {
                        usage: reported,
                        finish_reason,
                    } => {
                        usage = reported;
                        debug!(?finish_reason, "llm stream finished");
                        break;
                    }
                    StreamChunk::Error { message } => {
                        yield ChatEvent::RunError { error: message };
                        return;
                    }
                }
            }

            yield ChatEvent::TextMessageEnd {
                message_id: run.message_id.clone(),
            };
            if let Some(usage) = usage {
                match serde_json::to_value(usage) {
                    Ok(value) => {
                        yield ChatEvent::Custom {
                            name: "token_usage".to_string(),
                            value,
                        }
                    }
                    Err(e) => debug!(error = %e, "failed to serialize usage"),
                }
            }
            yield ChatEvent::RunFinished {
                thread_id: run.thread_id.clone(),
                run_id: run.run_id.clone(),
            };
        })
    }

    /// Synchronous variant: identical preparation, one blocking inference.
    pub async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, ApiError> {
        let run = self.prepare(&request)?;

        if !self.chat_limiter.try_acquire() {
            return Err(ApiError::RateLimited(
                "chat admission rejected, try again shortly".to_string(),
            ));
        }

        let provider = self
            .provider
            .clone()
            .ok_or_else(|| ApiError::LlmUnavailable("no llm provider configured".to_string()))?;

        let search = self.retrieve(&run).await?;
        let context = build_context(&search.chunks);
        let llm_request = self.llm_request(&run, &context);

        if !self.llm_limiter.acquire(LLM_ACQUIRE_TIMEOUT).await {
            return Err(ApiError::RateLimited("llm rate limit exceeded".to_string()));
        }

        let response = self
            .llm_queue
            .submit(async move { provider.infer(llm_request).await })
            .await??;

        Ok(ChatResponse {
            thread_id: run.thread_id,
            run_id: run.run_id,
            message_id: run.message_id,
            response: response.text,
            sources: run
                .include_sources
                .then(|| build_sources(&search.chunks)),
            usage: response.usage,
        })
    }
}

/// `【<title-or-index>】` blocks joined by a horizontal rule; no retrieved
/// context yields a fixed sentence instead of an empty prompt.
fn build_context(chunks: &[ProviderChunk]) -> String {
    if chunks.is_empty() {
        return NO_CONTEXT_SENTENCE.to_string();
    }

    chunks
        .iter()
        .enumerate()
        .map(|(index, chunk)| {
            let label = if chunk.document_title.trim().is_empty() {
                (index + 1).to_string()
            } else {
                chunk.document_title.clone()
            };
            format!("【{}】\n{}", label, chunk.content)
        })
        .collect::<Vec<_>>()
        .join("\n\n---\n\n")
}

fn build_sources(chunks: &[ProviderChunk]) -> Vec<KnowledgeSource> {
    chunks
        .iter()
        .map(|chunk| {
            let preview: String = chunk.content.chars().take(SOURCE_PREVIEW_CHARS).collect();
            let preview = if chunk.content.chars().count() > SOURCE_PREVIEW_CHARS {
                format!("{}...", preview)
            } else {
                preview
            };
            KnowledgeSource {
                chunk_id: chunk.chunk_id.clone(),
                document_title: chunk.document_title.clone(),
                content_preview: preview,
                score: chunk.score,
            }
        })
        .collect()
}
