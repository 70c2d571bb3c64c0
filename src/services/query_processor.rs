use crate::config::QueryExpansionConfig;
use crate::llm::{LlmProvider, LlmRequest};
use crate::utils::limiters::{RequestQueue, TokenBucket};
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

const EXPANSION_PROMPT: &str = "You rewrite knowledge-base search queries. \
Given the user query, respond with JSON only, in the form \
{\"intent\": \"<one line describing what the user wants>\", \
\"primary_query\": \"<the best single search query>\", \
\"expanded_queries\": [\"<alternative phrasing>\", ...]}. \
Keep every query short and self-contained.";

const REWRITE_PROMPT: &str = "Rewrite the user's query as one tighter search \
query for a knowledge base. Respond with the rewritten query only, no \
explanations or quotes.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryMethod {
    Llm,
    Original,
}

impl QueryMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryMethod::Llm => "llm",
            QueryMethod::Original => "original",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProcessedQuery {
    pub processed_query: String,
    pub method: QueryMethod,
    pub expanded_queries: Option<Vec<String>>,
    pub query_intent: Option<String>,
}

impl ProcessedQuery {
    pub fn original(query: &str) -> Self {
        Self {
            processed_query: query.to_string(),
            method: QueryMethod::Original,
            expanded_queries: None,
            query_intent: None,
        }
    }

    /// Every variant to search with, primary first.
    pub fn variants(&self) -> Vec<String> {
        match &self.expanded_queries {
            Some(queries) if !queries.is_empty() => queries.clone(),
            _ => vec![self.processed_query.clone()],
        }
    }
}

/// Optional LLM-backed query rewriting and expansion. Failures anywhere in
/// here degrade silently; a search is never blocked on expansion.
pub struct QueryProcessor {
    provider: Option<Arc<dyn LlmProvider>>,
    rate_limiter: Arc<TokenBucket>,
    queue: Arc<RequestQueue>,
    config: QueryExpansionConfig,
}

impl QueryProcessor {
    pub fn new(
        provider: Option<Arc<dyn LlmProvider>>,
        rate_limiter: Arc<TokenBucket>,
        queue: Arc<RequestQueue>,
        config: QueryExpansionConfig,
    ) -> Self {
        Self {
            provider,
            rate_limiter,
            queue,
            config,
        }
    }

    pub async fn process(&self, query: &str) -> ProcessedQuery {
        let trimmed = query.trim();
        if trimmed.chars().count() < 5 {
            return ProcessedQuery::original(query);
        }

        let Some(provider) = self.provider.clone() else {
            return ProcessedQuery::original(query);
        };
        if !self.rate_limiter.try_acquire() {
            debug!("query processing skipped: rate limiter rejected");
            return ProcessedQuery::original(query);
        }

        if self.config.enabled {
            if let Some(processed) = self.try_expand(&provider, trimmed).await {
                return processed;
            }
            // Expansion burned the admission; rewriting needs its own.
            if !self.rate_limiter.try_acquire() {
                return ProcessedQuery::original(query);
            }
        }

        if let Some(processed) = self.try_rewrite(&provider, trimmed).await {
            return processed;
        }

        ProcessedQuery::original(query)
    }

    async fn call_llm(
        &self,
        provider: &Arc<dyn LlmProvider>,
        system_prompt: &str,
        user_prompt: &str,
        temperature: f32,
        max_tokens: usize,
    ) -> Option<String> {
        let request = LlmRequest {
            system_prompt: system_prompt.to_string(),
            user_prompt: user_prompt.to_string(),
            temperature,
            max_tokens: Some(max_tokens),
        };

        let provider = provider.clone();
        let submitted = self
            .queue
            .submit(async move { provider.infer(request).await })
            .await;

        match submitted {
            Ok(Ok(response)) => Some(response.text),
            Ok(Err(e)) => {
                debug!(error = %e, "query-processing llm call failed");
                None
            }
            Err(e) => {
                debug!(error = %e, "query-processing llm call not admitted");
                None
            }
        }
    }

    async fn try_expand(
        &self,
        provider: &Arc<dyn LlmProvider>,
        query: &str,
    ) -> Option<ProcessedQuery> {
        let text = self
            .call_llm(provider, EXPANSION_PROMPT, query, 0.3, 300)
            .await?;
        let value = parse_loose_json(&text)?;

        let intent = value
            .get("intent")
            .and_then(Value::as_str)
            .map(str::to_string);
        let primary = value
            .get("primary_query")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        let mut expanded: Vec<String> = value
            .get("expanded_queries")
            .and_then(Value::as_array)
            .map(|arr| {
                arr.iter()
                    .filter_map(Value::as_str)
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        expanded.truncate(self.config.max_queries);

        let primary = primary.or_else(|| expanded.first().cloned())?;

        let mut queries = vec![primary.clone()];
        for candidate in expanded {
            if !queries.iter().any(|q| q.eq_ignore_ascii_case(&candidate)) {
                queries.push(candidate);
            }
        }
        if !queries.iter().any(|q| q.eq_ignore_ascii_case(query)) {
            queries.push(query.to_string());
        }

        Some(ProcessedQuery {
            processed_query: primary,
            method: QueryMethod::Llm,
            expanded_queries: Some(queries),
            query_intent: intent,
        })
    }

    async fn try_rewrite(
        &self,
        provider: &Arc<dyn LlmProvider>,
        query: &str,
    ) -> Option<ProcessedQuery> {
        let text = self
            .call_llm(provider, REWRITE_PROMPT, query, 0.1, 100)
            .await?;
        let rewritten = text.trim().trim_matches('"').to_string();

        if rewritten.chars().count() >= 2 && rewritten != query {
            Some(ProcessedQuery {
                processed_query: rewritten,
                method: QueryMethod::Llm,
                expanded_queries: None,
                query_intent: None,
            })
        } else {
            None
        }
    }
}

/// Accept bare JSON, JSON inside ```json fences, or the largest `{...}`
/// substring of a chatty response.
fn parse_loose_json(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return value.is_object().then_some(value);
    }

    if let Some(fenced) = trimmed.split("```").nth(1) {
        let inner = fenced.trim_start_matches("json").trim();
        if let Ok(value) = serde_json::from_str::<Value>(inner) {
            if value.is_object() {
                return Some(value);
            }
        }
    }

    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str::<Value>(&trimmed[start..=end])
        .ok()
        .filter(Value::is_object)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{LlmResponse, MockLlmProvider};

    fn processor_with(
        provider: Option<Arc<dyn LlmProvider>>,
        capacity: usize,
        enabled: bool,
    ) -> QueryProcessor {
        QueryProcessor::new(
            provider,
            Arc::new(TokenBucket::new(capacity, 0.0)),
            Arc::new(RequestQueue::new(2, 10)),
            QueryExpansionConfig {
                enabled,
                max_queries: 3,
            },
        )
    }

    fn infer_response(text: &str) -> LlmResponse {
        LlmResponse {
            text: text.to_string(),
            usage: None,
            model: "test".to_string(),
            finish_reason: Some("stop".to_string()),
        }
    }

    #[tokio::test]
    async fn test_short_query_passes_through() {
        let processor = processor_with(None, 10, true);
        let out = processor.process("hi").await;
        assert_eq!(out.method, QueryMethod::Original);
        assert_eq!(out.processed_query, "hi");
    }

    #[tokio::test]
    async fn test_missing_provider_passes_through() {
        let processor = processor_with(None, 10, true);
        let out = processor.process("what is the deployment process").await;
        assert_eq!(out.method, QueryMethod::Original);
    }

    #[tokio::test]
    async fn test_rate_limited_passes_through() {
        let mut mock = MockLlmProvider::new();
        mock.expect_infer().never();
        let processor = processor_with(Some(Arc::new(mock)), 1, true);

        // Drain the bucket first.
        assert!(processor.rate_limiter.try_acquire());
        let out = processor.process("what is the deployment process").await;
        assert_eq!(out.method, QueryMethod::Original);
    }

    #[tokio::test]
    async fn test_expansion_builds_variant_list() {
        let mut mock = MockLlmProvider::new();
        mock.expect_infer().returning(|_| {
            Ok(infer_response(
                r#"{"intent": "find deploy docs",
                    "primary_query": "deployment runbook",
                    "expanded_queries": ["release process", "deployment runbook", "ship to production"]}"#,
            ))
        });
        let processor = processor_with(Some(Arc::new(mock)), 10, true);

        let out = processor.process("how do we deploy things").await;
        assert_eq!(out.method, QueryMethod::Llm);
        assert_eq!(out.processed_query, "deployment runbook");
        assert_eq!(out.query_intent.as_deref(), Some("find deploy docs"));

        let variants = out.expanded_queries.unwrap();
        // Primary first, duplicates removed, original appended.
        assert_eq!(variants[0], "deployment runbook");
        assert!(variants.contains(&"release process".to_string()));
        assert!(variants.contains(&"how do we deploy things".to_string()));
        let dedup: std::collections::HashSet<&String> = variants.iter().collect();
        assert_eq!(dedup.len(), variants.len());
    }

    #[tokio::test]
    async fn test_expansion_failure_falls_back_to_rewrite() {
        let mut mock = MockLlmProvider::new();
        let mut call = 0;
        mock.expect_infer().returning_st(move |_| {
            call += 1;
            if call == 1 {
                Ok(infer_response("not json at all"))
            } else {
                Ok(infer_response("tightened query"))
            }
        });
        let processor = processor_with(Some(Arc::new(mock)), 10, true);

        let out = processor.process("please tell me about the thing").await;
        assert_eq!(out.method, QueryMethod::Llm);
        assert_eq!(out.processed_query, "tightened query");
        assert!(out.expanded_queries.is_none());
    }

    #[tokio::test]
    async fn test_llm_error_degrades_to_original() {
        let mut mock = MockLlmProvider::new();
        mock.expect_infer().returning(|_| {
            Err(crate::utils::error::ApiError::LlmUnavailable(
                "down".to_string(),
            ))
        });
        let processor = processor_with(Some(Arc::new(mock)), 10, true);

        let out = processor.process("what is the deployment process").await;
        assert_eq!(out.method, QueryMethod::Original);
        assert_eq!(out.processed_query, "what is the deployment process");
    }

    #[tokio::test]
    async fn test_rewrite_rejects_identical_output() {
        let mut mock = MockLlmProvider::new();
        mock.expect_infer()
            .returning(|req| Ok(infer_response(&req.user_prompt)));
        let processor = processor_with(Some(Arc::new(mock)), 10, false);

        let out = processor.process("what is the deployment process").await;
        assert_eq!(out.method, QueryMethod::Original);
    }

    #[test]
    fn test_parse_loose_json_variants() {
        assert!(parse_loose_json(r#"{"a": 1}"#).is_some());
        assert!(parse_loose_json("```json\n{\"a\": 1}\n```").is_some());
        assert!(parse_loose_json("Sure! Here you go: {\"a\": 1} hope it helps").is_some());
        assert!(parse_loose_json("no braces here").is_none());
        assert!(parse_loose_json("[1, 2, 3]").is_none());
    }

    #[test]
    fn test_variants_default_to_primary() {
        let processed = ProcessedQuery::original("plain query");
        assert_eq!(processed.variants(), vec!["plain query".to_string()]);
    }
}
