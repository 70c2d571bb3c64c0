use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(rename = "threadId")]
    pub thread_id: Option<String>,
    #[serde(rename = "runId")]
    pub run_id: Option<String>,
    pub user_id: Option<String>,
    #[serde(default)]
    pub options: Option<ChatOptions>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatOptions {
    pub search_limit: Option<usize>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<usize>,
    pub include_sources: Option<bool>,
}

/// Events emitted over the lifetime of one chat run.
///
/// Every run is terminated by exactly one of `RunFinished` or `RunError`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ChatEvent {
    #[serde(rename = "RUN_STARTED")]
    RunStarted {
        #[serde(rename = "threadId")]
        thread_id: String,
        #[serde(rename = "runId")]
        run_id: String,
    },
    #[serde(rename = "TEXT_MESSAGE_START")]
    TextMessageStart {
        #[serde(rename = "messageId")]
        message_id: String,
        role: String,
    },
    #[serde(rename = "TEXT_MESSAGE_CHUNK")]
    TextMessageChunk {
        #[serde(rename = "messageId")]
        message_id: String,
        delta: String,
    },
    #[serde(rename = "TEXT_MESSAGE_END")]
    TextMessageEnd {
        #[serde(rename = "messageId")]
        message_id: String,
    },
    #[serde(rename = "CUSTOM")]
    Custom { name: String, value: Value },
    #[serde(rename = "RUN_ERROR")]
    RunError { error: String },
    #[serde(rename = "RUN_FINISHED")]
    RunFinished {
        #[serde(rename = "threadId")]
        thread_id: String,
        #[serde(rename = "runId")]
        run_id: String,
    },
}

/// Entry of the `knowledge_sources` custom event payload.
#[derive(Debug, Clone, Serialize)]
pub struct KnowledgeSource {
    pub chunk_id: String,
    pub document_title: String,
    pub content_preview: String,
    pub score: f32,
}

/// Response of the synchronous (non-streaming) chat variant.
#[derive(Debug, Serialize)]
pub struct ChatResponse {
    #[serde(rename = "threadId")]
    pub thread_id: String,
    #[serde(rename = "runId")]
    pub run_id: String,
    #[serde(rename = "messageId")]
    pub message_id: String,
    pub response: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sources: Option<Vec<KnowledgeSource>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<crate::llm::TokenUsage>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization_tags() {
        let event = ChatEvent::RunStarted {
            thread_id: "t1".into(),
            run_id: "r1".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "RUN_STARTED");
        assert_eq!(json["threadId"], "t1");
        assert_eq!(json["runId"], "r1");
    }

    #[test]
    fn test_chunk_event_uses_delta_field() {
        let event = ChatEvent::TextMessageChunk {
            message_id: "m1".into(),
            delta: "hello".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "TEXT_MESSAGE_CHUNK");
        assert_eq!(json["delta"], "hello");
        assert!(json.get("content").is_none());
    }

    #[test]
    fn test_request_accepts_minimal_body() {
        let req: ChatRequest = serde_json::from_str(r#"{"message":"hi"}"#).unwrap();
        assert_eq!(req.message, "hi");
        assert!(req.thread_id.is_none());
        assert!(req.options.is_none());
    }
}
