use crate::config::RagConfig;
use crate::models::{
    parse_chunk_id, DocumentRecord, ProviderChunk, SearchResponse, SearchResponseMetadata,
    SearchResult,
};
use crate::services::query_processor::{ProcessedQuery, QueryProcessor};
use crate::store::MetadataStore;
use crate::utils::error::ApiError;
use crate::utils::token_estimator;
use crate::vector::{SearchMode, VectorIndex};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

const RRF_K: f32 = 60.0;

static MD_HEADING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^#+\s+(.+)$").expect("static regex"));
static MD_MARKUP: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[#*_`>\[\]()!]").expect("static regex"));

struct FusedCandidate {
    result: SearchResult,
    rrf_score: f32,
    max_score: f32,
}

/// Hybrid retrieval with multi-query fusion, score filtering, and
/// token-budget capping.
pub struct SearchEngine {
    vector: Arc<dyn VectorIndex>,
    store: Arc<MetadataStore>,
    query_processor: Arc<QueryProcessor>,
    config: RagConfig,
    provider_name: String,
}

impl SearchEngine {
    pub fn new(
        vector: Arc<dyn VectorIndex>,
        store: Arc<MetadataStore>,
        query_processor: Arc<QueryProcessor>,
        config: RagConfig,
    ) -> Self {
        Self {
            vector,
            store,
            query_processor,
            config,
            provider_name: env!("CARGO_PKG_NAME").to_string(),
        }
    }

    pub async fn search(
        &self,
        user_id: &str,
        query: &str,
        limit: Option<usize>,
        token_budget: Option<usize>,
        preprocessed: Option<ProcessedQuery>,
    ) -> Result<SearchResponse, ApiError> {
        if user_id.trim().is_empty() {
            return Err(ApiError::InvalidRequest("user_id is required".to_string()));
        }
        if query.trim().is_empty() {
            return Err(ApiError::InvalidRequest("query is required".to_string()));
        }

        let effective_limit = limit
            .unwrap_or(self.config.default_search_limit)
            .clamp(1, self.config.max_search_limit);
        let fetch_limit = 2 * effective_limit;

        let processed = match preprocessed {
            Some(p) => p,
            None => self.query_processor.process(query).await,
        };
        let variants = processed.variants();

        info!(
            user_id,
            variants = variants.len(),
            limit = effective_limit,
            "searching knowledge base"
        );

        let (candidates, mode) = if variants.len() == 1 {
            let (results, mode) = self.vector.hybrid_search(&variants[0], fetch_limit).await?;
            let candidates = results
                .into_iter()
                .map(|result| FusedCandidate {
                    rrf_score: 0.0,
                    max_score: result.score,
                    result,
                })
                .collect();
            (candidates, mode)
        } else {
            self.fused_search(&variants, fetch_limit).await?
        };

        self.assemble_response(candidates, effective_limit, token_budget, mode)
            .await
    }

    /// Run every variant, then merge by Reciprocal Rank Fusion. A failing
    /// variant is skipped; the search only fails when no variant produced
    /// anything but at least one reported an error.
    async fn fused_search(
        &self,
        variants: &[String],
        fetch_limit: usize,
    ) -> Result<(Vec<FusedCandidate>, SearchMode), ApiError> {
        let lookups = variants
            .iter()
            .map(|variant| self.vector.hybrid_search(variant, fetch_limit));
        let outcomes = futures::future::join_all(lookups).await;

        let mut merged: HashMap<String, FusedCandidate> = HashMap::new();
        let mut mode = SearchMode::Vector;
        let mut succeeded = 0usize;
        let mut last_error = None;

        for (variant, outcome) in variants.iter().zip(outcomes) {
            let (results, variant_mode) = match outcome {
                Ok(hit) => hit,
                Err(e) => {
                    warn!(variant, error = %e, "search variant failed, skipping");
                    last_error = Some(e);
                    continue;
                }
            };
            succeeded += 1;
            if variant_mode == SearchMode::Hybrid {
                mode = SearchMode::Hybrid;
            }

            for (rank, result) in results.into_iter().enumerate() {
                let rrf = 1.0 / (RRF_K + rank as f32 + 1.0);
                merged
                    .entry(result.id.clone())
                    .and_modify(|candidate| {
                        candidate.rrf_score += rrf;
                        candidate.max_score = candidate.max_score.max(result.score);
                    })
                    .or_insert(FusedCandidate {
                        rrf_score: rrf,
                        max_score: result.score,
                        result,
                    });
            }
        }

        if succeeded == 0 {
            return Err(last_error.unwrap_or_else(|| {
                ApiError::BackendUnavailable("no search variant completed".to_string())
            }));
        }

        let mut candidates: Vec<FusedCandidate> = merged.into_values().collect();
        // Deterministic regardless of variant enumeration order: RRF sum,
        // then max semantic score, then chunk id.
        candidates.sort_by(|a, b| {
            b.rrf_score
                .partial_cmp(&a.rrf_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| {
                    b.max_score
                        .partial_cmp(&a.max_score)
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .then_with(|| a.result.id.cmp(&b.result.id))
        });
        candidates.truncate(fetch_limit);

        Ok((candidates, mode))
    }

    async fn assemble_response(
        &self,
        candidates: Vec<FusedCandidate>,
        effective_limit: usize,
        token_budget: Option<usize>,
        mode: SearchMode,
    ) -> Result<SearchResponse, ApiError> {
        let mut chunks = Vec::new();
        let mut total_tokens = 0usize;

        for candidate in candidates {
            if candidate.max_score < self.config.min_search_score {
                continue;
            }
            if chunks.len() >= effective_limit {
                break;
            }

            let tokens = token_estimator::estimate_tokens(&candidate.result.text);
            if let Some(budget) = token_budget {
                if total_tokens + tokens > budget {
                    debug!(
                        total_tokens,
                        tokens, budget, "token budget reached, stopping assembly"
                    );
                    break;
                }
            }

            total_tokens += tokens;
            chunks.push(self.resolve_chunk(candidate).await);
        }

        let results_count = chunks.len();
        Ok(SearchResponse {
            provider_name: self.provider_name.clone(),
            chunks,
            total_tokens,
            metadata: SearchResponseMetadata {
                search_mode: mode.as_str().to_string(),
                results_count,
                min_score: self.config.min_search_score,
            },
        })
    }

    /// Resolve a raw hit against the metadata store: store fields first,
    /// then result metadata, then whatever the chunk text itself offers.
    async fn resolve_chunk(&self, candidate: FusedCandidate) -> ProviderChunk {
        let result = candidate.result;
        let (document_id, doc) = match parse_chunk_id(&result.id) {
            Some((doc_id, _)) => {
                let doc = self.store.get(doc_id).await.unwrap_or_else(|e| {
                    warn!(chunk_id = %result.id, error = %e, "store lookup failed");
                    None
                });
                (doc_id.to_string(), doc)
            }
            None => (String::new(), None),
        };

        let metadata_str = |key: &str| -> Option<String> {
            result
                .metadata
                .get(key)
                .and_then(Value::as_str)
                .map(str::to_string)
        };

        let document_title = doc
            .as_ref()
            .map(|d| d.title.clone())
            .or_else(|| metadata_str("document_title"))
            .or_else(|| extract_title(&result.text))
            .unwrap_or_else(|| "Unknown".to_string());

        let media_type = doc
            .as_ref()
            .map(|d| d.media_type.as_str().to_string())
            .or_else(|| metadata_str("media_type"))
            .unwrap_or_else(|| "text".to_string());

        let media_url = doc
            .as_ref()
            .and_then(|d| d.media_url.clone())
            .or_else(|| metadata_str("media_url"));

        let category = doc
            .as_ref()
            .and_then(|d| d.category.clone())
            .or_else(|| metadata_str("category"));

        let mut metadata = result.metadata;
        if let Some(category) = category {
            metadata.insert("category".to_string(), json!(category));
        }

        ProviderChunk {
            chunk_id: result.id,
            content: result.text,
            score: candidate.max_score,
            document_id: doc
                .as_ref()
                .map(|d: &DocumentRecord| d.document_id.clone())
                .unwrap_or(document_id),
            document_title,
            media_type,
            media_url,
            metadata,
        }
    }
}

/// Title fallback from the chunk body: first Markdown heading, else the
/// first non-empty line with markup stripped, capped at 50 chars.
fn extract_title(text: &str) -> Option<String> {
    if let Some(caps) = MD_HEADING.captures(text) {
        return Some(caps[1].trim().to_string());
    }

    let line = text.lines().find(|l| !l.trim().is_empty())?;
    let stripped = MD_MARKUP.replace_all(line, "").trim().to_string();
    if stripped.is_empty() {
        return None;
    }
    Some(stripped.chars().take(50).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QueryExpansionConfig;
    use crate::models::{DocumentStatus, MediaType};
    use crate::services::query_processor::QueryMethod;
    use crate::utils::limiters::{RequestQueue, TokenBucket};
    use crate::vector::MockVectorIndex;
    use chrono::Utc;

    fn hit(id: &str, score: f32, text: &str) -> SearchResult {
        SearchResult {
            id: id.to_string(),
            score,
            text: text.to_string(),
            metadata: serde_json::Map::new(),
        }
    }

    fn passthrough_processor() -> Arc<QueryProcessor> {
        Arc::new(QueryProcessor::new(
            None,
            Arc::new(TokenBucket::new(10, 0.0)),
            Arc::new(RequestQueue::new(2, 10)),
            QueryExpansionConfig {
                enabled: false,
                max_queries: 3,
            },
        ))
    }

    async fn store_with_doc(dir: &tempfile::TempDir, doc_id: &str, title: &str) -> Arc<MetadataStore> {
        let store = MetadataStore::open(&dir.path().join("documents.db"))
            .await
            .unwrap();
        store
            .upsert(&DocumentRecord {
                document_id: doc_id.to_string(),
                title: title.to_string(),
                category: Some("kb".to_string()),
                description: None,
                metadata: serde_json::Map::new(),
                status: DocumentStatus::Indexed,
                chunks_count: 4,
                created_at: Utc::now(),
                updated_at: Utc::now(),
                media_type: MediaType::Text,
                media_url: None,
                content_hash: Some("h".to_string()),
            })
            .await
            .unwrap();
        Arc::new(store)
    }

    fn engine(vector: MockVectorIndex, store: Arc<MetadataStore>) -> SearchEngine {
        SearchEngine::new(
            Arc::new(vector),
            store,
            passthrough_processor(),
            RagConfig::default(),
        )
    }

    fn preprocessed(variants: &[&str]) -> ProcessedQuery {
        ProcessedQuery {
            processed_query: variants[0].to_string(),
            method: QueryMethod::Llm,
            expanded_queries: Some(variants.iter().map(|v| v.to_string()).collect()),
            query_intent: None,
        }
    }

    #[tokio::test]
    async fn test_rejects_blank_inputs() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_with_doc(&dir, "doc_a", "T").await;
        let engine = engine(MockVectorIndex::new(), store);

        let err = engine.search("", "q", None, None, None).await.unwrap_err();
        assert_eq!(err.kind(), "invalid_request");
        let err = engine
            .search("u", "   ", None, None, None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "invalid_request");
    }

    #[tokio::test]
    async fn test_single_query_uses_double_limit_and_filters_score() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_with_doc(&dir, "doc_a", "Handbook").await;

        let mut vector = MockVectorIndex::new();
        vector
            .expect_hybrid_search()
            .withf(|_, limit| *limit == 10)
            .returning(|_, _| {
                Ok((
                    vec![
                        hit("doc_a_chunk_0", 0.9, "alpha body"),
                        hit("doc_a_chunk_1", 0.1, "low score body"),
                    ],
                    SearchMode::Hybrid,
                ))
            });

        let response = engine(vector, store)
            .search("u", "alpha", Some(5), None, None)
            .await
            .unwrap();

        assert_eq!(response.chunks.len(), 1);
        assert_eq!(response.chunks[0].chunk_id, "doc_a_chunk_0");
        assert_eq!(response.chunks[0].document_title, "Handbook");
        assert!(response.chunks[0].score >= 0.30);
        assert_eq!(response.metadata.search_mode, "hybrid");
        assert_eq!(response.metadata.results_count, 1);
    }

    #[tokio::test]
    async fn test_limit_clamped_to_max() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_with_doc(&dir, "doc_a", "T").await;

        let mut vector = MockVectorIndex::new();
        vector
            .expect_hybrid_search()
            .withf(|_, limit| *limit == 40) // 2 * max_search_limit
            .returning(|_, _| Ok((Vec::new(), SearchMode::Hybrid)));

        let response = engine(vector, store)
            .search("u", "q", Some(500), None, None)
            .await
            .unwrap();
        assert!(response.chunks.is_empty());
    }

    #[tokio::test]
    async fn test_rrf_fusion_is_order_independent() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_with_doc(&dir, "doc_a", "T").await;

        let list_for = |query: &str| -> Vec<SearchResult> {
            match query {
                "q1" => vec![
                    hit("doc_a_chunk_0", 0.9, "a"),
                    hit("doc_a_chunk_1", 0.8, "b"),
                    hit("doc_a_chunk_2", 0.7, "c"),
                ],
                _ => vec![
                    hit("doc_a_chunk_2", 0.85, "c"),
                    hit("doc_a_chunk_0", 0.6, "a"),
                ],
            }
        };

        let run = |variants: Vec<String>| {
            let store = store.clone();
            let list_for = list_for;
            async move {
                let mut vector = MockVectorIndex::new();
                vector
                    .expect_hybrid_search()
                    .returning(move |q, _| Ok((list_for(q), SearchMode::Hybrid)));
                let variant_refs: Vec<&str> = variants.iter().map(String::as_str).collect();
                engine(vector, store)
                    .search("u", "q", Some(5), None, Some(preprocessed(&variant_refs)))
                    .await
                    .unwrap()
            }
        };

        let forward = run(vec!["q1".to_string(), "q2".to_string()]).await;
        let reversed = run(vec!["q2".to_string(), "q1".to_string()]).await;

        let ids = |r: &SearchResponse| -> Vec<String> {
            r.chunks.iter().map(|c| c.chunk_id.clone()).collect()
        };
        assert_eq!(ids(&forward), ids(&reversed));
        // chunk_0 and chunk_2 both appear in two lists; chunk_1 only once.
        assert_eq!(ids(&forward)[2], "doc_a_chunk_1");
    }

    #[tokio::test]
    async fn test_variant_failure_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_with_doc(&dir, "doc_a", "T").await;

        let mut vector = MockVectorIndex::new();
        vector.expect_hybrid_search().returning(|q, _| {
            if q == "bad" {
                Err(ApiError::BackendUnavailable("boom".to_string()))
            } else {
                Ok((vec![hit("doc_a_chunk_0", 0.9, "body")], SearchMode::Hybrid))
            }
        });

        let response = engine(vector, store)
            .search("u", "q", Some(5), None, Some(preprocessed(&["good", "bad"])))
            .await
            .unwrap();
        assert_eq!(response.chunks.len(), 1);
    }

    #[tokio::test]
    async fn test_all_variants_failing_surfaces_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_with_doc(&dir, "doc_a", "T").await;

        let mut vector = MockVectorIndex::new();
        vector
            .expect_hybrid_search()
            .returning(|_, _| Err(ApiError::BackendUnavailable("down".to_string())));

        let err = engine(vector, store)
            .search("u", "q", Some(5), None, Some(preprocessed(&["a", "b"])))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "backend_unavailable");
    }

    #[tokio::test]
    async fn test_token_budget_is_strict_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_with_doc(&dir, "doc_a", "T").await;

        // ~25 tokens each (100 ascii chars).
        let body = "x".repeat(100);
        let mut vector = MockVectorIndex::new();
        vector.expect_hybrid_search().returning(move |_, _| {
            Ok((
                vec![
                    hit("doc_a_chunk_0", 0.9, &body),
                    hit("doc_a_chunk_1", 0.8, &body),
                    hit("doc_a_chunk_2", 0.7, &body),
                ],
                SearchMode::Hybrid,
            ))
        });

        let response = engine(vector, store)
            .search("u", "q", Some(5), Some(55), None)
            .await
            .unwrap();

        // Two fit (50 tokens), the third would overflow the 55 budget.
        assert_eq!(response.chunks.len(), 2);
        assert!(response.total_tokens <= 55);
    }

    #[tokio::test]
    async fn test_title_fallback_from_markdown() {
        let dir = tempfile::tempdir().unwrap();
        // Store is empty: resolution must fall back to the chunk text.
        let store = Arc::new(
            MetadataStore::open(&dir.path().join("documents.db"))
                .await
                .unwrap(),
        );

        let mut vector = MockVectorIndex::new();
        vector.expect_hybrid_search().returning(|_, _| {
            Ok((
                vec![hit(
                    "doc_gone_chunk_0",
                    0.9,
                    "# Release Notes\n\nDetails follow.",
                )],
                SearchMode::Hybrid,
            ))
        });

        let response = engine(vector, store)
            .search("u", "q", Some(5), None, None)
            .await
            .unwrap();
        assert_eq!(response.chunks[0].document_title, "Release Notes");
        assert_eq!(response.chunks[0].document_id, "doc_gone");
    }

    #[test]
    fn test_extract_title_strips_markup_and_caps() {
        assert_eq!(
            extract_title("# Heading One\nbody").as_deref(),
            Some("Heading One")
        );
        assert_eq!(
            extract_title("**bold start** and more\nrest").as_deref(),
            Some("bold start and more")
        );
        let long = "word ".repeat(40);
        assert!(extract_title(&long).unwrap().chars().count() <= 50);
        assert!(extract_title("   \n\n").is_none());
    }
}
