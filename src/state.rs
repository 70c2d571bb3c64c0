use std::sync::Arc;

use crate::config::Settings;
use crate::document::MediaStorage;
use crate::llm::{create_provider, LlmProvider};
use crate::services::{ChatService, IngestionService, QueryProcessor, SearchEngine};
use crate::store::MetadataStore;
use crate::utils::error::ApiError;
use crate::utils::limiters::{RequestQueue, TokenBucket};
use crate::vector::{VectorIndex, VectorStoreClient};
use tracing::info;

/// Application state shared across handlers. Built once, in dependency
/// order; torn down in reverse by `shutdown`.
pub struct AppState {
    pub settings: Settings,
    pub store: Arc<MetadataStore>,
    pub vector: Arc<dyn VectorIndex>,
    pub provider: Option<Arc<dyn LlmProvider>>,
    pub llm_limiter: Arc<TokenBucket>,
    pub chat_limiter: Arc<TokenBucket>,
    pub llm_queue: Arc<RequestQueue>,
    pub query_processor: Arc<QueryProcessor>,
    pub search_engine: Arc<SearchEngine>,
    pub ingestion: Arc<IngestionService>,
    pub chat: Arc<ChatService>,
}

impl AppState {
    pub async fn initialize(settings: Settings) -> Result<Arc<Self>, ApiError> {
        let store = Arc::new(MetadataStore::open(&settings.database_path()).await?);
        let imported = store
            .import_legacy_snapshot(&settings.legacy_snapshot_path())
            .await?;
        if imported > 0 {
            info!(imported, "migrated legacy document snapshot");
        }

        let llm_limiter = Arc::new(TokenBucket::new(
            settings.limits.llm_rate.capacity,
            settings.limits.llm_rate.refill_per_second,
        ));
        let chat_limiter = Arc::new(TokenBucket::new(
            settings.limits.chat_rate.capacity,
            settings.limits.chat_rate.refill_per_second,
        ));
        let llm_queue = Arc::new(RequestQueue::new(
            settings.limits.llm_queue.concurrency,
            settings.limits.llm_queue.max_size,
        ));

        let vector: Arc<dyn VectorIndex> = Arc::new(VectorStoreClient::new(&settings.vector));

        let provider: Option<Arc<dyn LlmProvider>> =
            match settings.llm.provider.to_lowercase().as_str() {
                "none" | "disabled" => None,
                _ => Some(create_provider(&settings.llm)),
            };

        let query_processor = Arc::new(QueryProcessor::new(
            provider.clone(),
            llm_limiter.clone(),
            llm_queue.clone(),
            settings.query_expansion.clone(),
        ));

        let search_engine = Arc::new(SearchEngine::new(
            vector.clone(),
            store.clone(),
            query_processor.clone(),
            settings.rag.clone(),
        ));

        let media = Arc::new(MediaStorage::new(&settings.storage.media_dir));
        let ingestion = Arc::new(IngestionService::new(
            store.clone(),
            vector.clone(),
            media,
            settings.rag.chunk_size,
            settings.rag.chunk_overlap,
            settings.storage.max_file_bytes,
        ));

        let chat = Arc::new(ChatService::new(
            query_processor.clone(),
            search_engine.clone(),
            provider.clone(),
            chat_limiter.clone(),
            llm_limiter.clone(),
            llm_queue.clone(),
            settings.chat.clone(),
        ));

        Ok(Arc::new(Self {
            settings,
            store,
            vector,
            provider,
            llm_limiter,
            chat_limiter,
            llm_queue,
            query_processor,
            search_engine,
            ingestion,
            chat,
        }))
    }

    /// Reverse-order teardown: stop admitting queued work, then flush and
    /// close the store.
    pub async fn shutdown(&self) {
        info!("shutting down: clearing request queue");
        self.llm_queue.clear();
        self.store.close().await;
    }
}
