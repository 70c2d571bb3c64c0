use super::sse::{data_payload, SseLineDecoder};
use super::{LlmProvider, LlmRequest, LlmResponse, LlmStream, StreamChunk, TokenUsage};
use crate::config::LlmConfig;
use crate::utils::error::ApiError;
use async_stream::stream;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    stream: bool,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream_options: Option<StreamOptions>,
}

#[derive(Debug, Serialize)]
struct StreamOptions {
    include_usage: bool,
}

#[derive(Debug, Deserialize)]
struct UsageWire {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
    #[serde(default)]
    total_tokens: u32,
}

impl From<UsageWire> for TokenUsage {
    fn from(wire: UsageWire) -> Self {
        TokenUsage {
            prompt: wire.prompt_tokens,
            completion: wire.completion_tokens,
            total: wire.total_tokens,
        }
    }
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
    #[serde(default)]
    usage: Option<UsageWire>,
    #[serde(default)]
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamChunkWire {
    #[serde(default)]
    choices: Vec<StreamChoiceWire>,
    #[serde(default)]
    usage: Option<UsageWire>,
}

#[derive(Debug, Deserialize)]
struct StreamChoiceWire {
    #[serde(default)]
    delta: DeltaWire,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct DeltaWire {
    #[serde(default)]
    content: Option<String>,
}

/// Concrete provider variants. They share the OpenAI chat-completions
/// protocol and differ only in default endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    OpenAi,
    DeepSeek,
    LiteLlm,
    Generic,
}

impl ProviderKind {
    pub fn parse(tag: &str) -> Self {
        match tag.to_lowercase().as_str() {
            "openai" => ProviderKind::OpenAi,
            "deepseek" => ProviderKind::DeepSeek,
            "litellm" => ProviderKind::LiteLlm,
            _ => ProviderKind::Generic,
        }
    }

    pub fn default_base_url(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "https://api.openai.com/v1",
            ProviderKind::DeepSeek => "https://api.deepseek.com/v1",
            ProviderKind::LiteLlm => "http://localhost:4000/v1",
            ProviderKind::Generic => "http://localhost:8000/v1",
        }
    }
}

/// Resolve the active provider from its configuration tag.
pub fn create_provider(config: &LlmConfig) -> Arc<dyn LlmProvider> {
    let kind = ProviderKind::parse(&config.provider);
    Arc::new(OpenAiCompatProvider::new(config, kind))
}

#[derive(Clone)]
pub struct OpenAiCompatProvider {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    timeout: Duration,
    max_retries: u32,
    retry_delay: Duration,
}

impl OpenAiCompatProvider {
    pub fn new(config: &LlmConfig, kind: ProviderKind) -> Self {
        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| kind.default_base_url().to_string());

        Self {
            // No blanket timeout on the client: streams outlive any fixed
            // deadline. Non-streaming calls set one per request.
            client: Client::builder()
                .connect_timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_else(|_| Client::new()),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            timeout: Duration::from_secs(config.timeout_seconds),
            max_retries: config.max_retries,
            retry_delay: Duration::from_millis(config.retry_delay_ms),
        }
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn request_body<'a>(&'a self, request: &'a LlmRequest, stream: bool) -> CompletionRequest<'a> {
        CompletionRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &request.system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: &request.user_prompt,
                },
            ],
            stream,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            stream_options: stream.then_some(StreamOptions {
                include_usage: true,
            }),
        }
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => builder.header("Authorization", format!("Bearer {}", key)),
            None => builder,
        }
    }

    async fn send_once(&self, request: &LlmRequest, stream: bool) -> reqwest::Result<reqwest::Response> {
        let mut builder = self
            .client
            .post(self.completions_url())
            .json(&self.request_body(request, stream));
        if !stream {
            builder = builder.timeout(self.timeout);
        }
        self.authorize(builder).send().await
    }
}

#[async_trait]
impl LlmProvider for OpenAiCompatProvider {
    async fn infer(&self, request: LlmRequest) -> Result<LlmResponse, ApiError> {
        let mut last_error = String::new();

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = self.retry_delay * 2u32.pow(attempt - 1);
                debug!(attempt, delay_ms = delay.as_millis() as u64, "retrying llm call");
                tokio::time::sleep(delay).await;
            }

            let response = match self.send_once(&request, false).await {
                Ok(r) => r,
                Err(e) => {
                    // Network errors and timeouts are retryable.
                    warn!(attempt, error = %e, "llm request failed");
                    last_error = e.to_string();
                    continue;
                }
            };

            let status = response.status();
            if status.is_client_error() {
                let body = response.text().await.unwrap_or_default();
                return Err(ApiError::LlmUnavailable(format!("{}: {}", status, body)));
            }
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                last_error = format!("{}: {}", status, body);
                continue;
            }

            let body = response
                .text()
                .await
                .map_err(|e| ApiError::LlmUnavailable(format!("read response: {}", e)))?;
            let parsed: CompletionResponse = serde_json::from_str(&body)
                .map_err(|e| ApiError::ProtocolError(format!("malformed completion: {}", e)))?;

            let choice = parsed
                .choices
                .into_iter()
                .next()
                .ok_or_else(|| ApiError::ProtocolError("completion without choices".to_string()))?;

            return Ok(LlmResponse {
                text: choice.message.content.unwrap_or_default(),
                usage: parsed.usage.map(TokenUsage::from),
                model: parsed.model.unwrap_or_else(|| self.model.clone()),
                finish_reason: choice.finish_reason,
            });
        }

        Err(ApiError::LlmUnavailable(format!(
            "llm call failed after {} attempts: {}",
            self.max_retries + 1,
            last_error
        )))
    }

    async fn infer_stream(&self, request: LlmRequest) -> LlmStream {
        let this = self.clone();

        Box::pin(stream! {
            let response = match this.send_once(&request, true).await {
                Ok(r) => r,
                Err(e) => {
                    yield StreamChunk::Error { message: format!("llm request failed: {}", e) };
                    return;
                }
            };

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                yield StreamChunk::Error { message: format!("llm error {}: {}", status, body) };
                return;
            }

            let mut bytes = response.bytes_stream();
            let mut decoder = SseLineDecoder::new();
            let mut usage: Option<TokenUsage> = None;
            let mut finish_reason: Option<String> = None;
            let mut done = false;

            'read: while let Some(frame) = bytes.next().await {
                let frame = match frame {
                    Ok(f) => f,
                    Err(e) => {
                        yield StreamChunk::Error { message: format!("stream read failed: {}", e) };
                        return;
                    }
                };

                for line in decoder.push(&frame) {
                    let Some(payload) = data_payload(&line) else { continue };
                    if payload == "[DONE]" {
                        done = true;
                        break 'read;
                    }

                    let chunk: StreamChunkWire = match serde_json::from_str(payload) {
                        Ok(c) => c,
                        Err(e) => {
                            yield StreamChunk::Error {
                                message: format!("malformed stream chunk: {}", e),
                            };
                            return;
                        }
                    };

                    if let Some(wire) = chunk.usage {
                        usage = Some(TokenUsage::from(wire));
                    }
                    for choice in chunk.choices {
                        if let Some(reason) = choice.finish_reason {
                            finish_reason = Some(reason);
                        }
                        if let Some(content) = choice.delta.content {
                            if !content.is_empty() {
                                yield StreamChunk::Content { content };
                            }
                        }
                    }
                }
            }

            if !done {
                debug!("llm stream closed without [DONE]");
            }
            yield StreamChunk::Done { usage, finish_reason };
        })
    }

    async fn health(&self) -> bool {
        let builder = self
            .client
            .get(format!("{}/models", self.base_url))
            .timeout(Duration::from_secs(5));
        match self.authorize(builder).send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_kind_parsing() {
        assert_eq!(ProviderKind::parse("openai"), ProviderKind::OpenAi);
        assert_eq!(ProviderKind::parse("DeepSeek"), ProviderKind::DeepSeek);
        assert_eq!(ProviderKind::parse("litellm"), ProviderKind::LiteLlm);
        assert_eq!(ProviderKind::parse("anything-else"), ProviderKind::Generic);
    }

    #[test]
    fn test_base_url_resolution() {
        let config = LlmConfig::default();
        let provider = OpenAiCompatProvider::new(&config, ProviderKind::DeepSeek);
        assert_eq!(
            provider.completions_url(),
            "https://api.deepseek.com/v1/chat/completions"
        );

        let config = LlmConfig {
            base_url: Some("http://llm.internal/v1/".to_string()),
            ..Default::default()
        };
        let provider = OpenAiCompatProvider::new(&config, ProviderKind::OpenAi);
        assert_eq!(
            provider.completions_url(),
            "http://llm.internal/v1/chat/completions"
        );
    }

    #[test]
    fn test_request_body_shape() {
        let config = LlmConfig::default();
        let provider = OpenAiCompatProvider::new(&config, ProviderKind::OpenAi);
        let request = LlmRequest {
            system_prompt: "sys".to_string(),
            user_prompt: "usr".to_string(),
            temperature: 0.2,
            max_tokens: Some(128),
        };

        let body = serde_json::to_value(provider.request_body(&request, true)).unwrap();
        assert_eq!(body["stream"], true);
        assert_eq!(body["stream_options"]["include_usage"], true);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "usr");
        assert_eq!(body["max_tokens"], 128);

        let body = serde_json::to_value(provider.request_body(&request, false)).unwrap();
        assert!(body.get("stream_options").is_none());
    }

    #[test]
    fn test_stream_chunk_wire_parsing() {
        let chunk: StreamChunkWire = serde_json::from_str(
            r#"{"choices":[{"delta":{"content":"he"},"finish_reason":null}]}"#,
        )
        .unwrap();
        assert_eq!(chunk.choices[0].delta.content.as_deref(), Some("he"));

        let final_chunk: StreamChunkWire = serde_json::from_str(
            r#"{"choices":[],"usage":{"prompt_tokens":5,"completion_tokens":7,"total_tokens":12}}"#,
        )
        .unwrap();
        let usage = TokenUsage::from(final_chunk.usage.unwrap());
        assert_eq!(usage.total, 12);
    }
}
