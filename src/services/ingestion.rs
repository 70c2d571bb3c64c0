use crate::document::{validate_upload, MediaStorage, TextChunker, TextExtractor};
use crate::models::{
    generate_document_id, Chunk, DocumentRecord, DocumentStatus, MediaType,
};
use crate::store::MetadataStore;
use crate::utils::error::ApiError;
use crate::utils::hashing::sha256_hex;
use crate::vector::{IndexDocument, VectorIndex};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Deserialize)]
pub struct IngestTextRequest {
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub metadata: Option<Map<String, Value>>,
}

#[derive(Debug)]
pub struct IngestFileRequest {
    pub title: String,
    pub filename: String,
    pub mime: String,
    pub bytes: Vec<u8>,
    pub category: Option<String>,
    pub description: Option<String>,
    pub metadata: Option<Map<String, Value>>,
}

#[derive(Debug, Serialize)]
pub struct IngestResponse {
    pub document_id: String,
    pub status: DocumentStatus,
    pub chunks_count: u32,
    pub message: String,
}

/// Dedup → chunk → batched index → metadata commit.
///
/// Metadata stays atomic per document: either `indexed` with the full
/// chunk count, or `failed` with zero chunks and no content hash so the
/// same content can be retried cleanly.
pub struct IngestionService {
    store: Arc<MetadataStore>,
    vector: Arc<dyn VectorIndex>,
    media: Arc<MediaStorage>,
    chunker: TextChunker,
    max_file_bytes: usize,
}

impl IngestionService {
    pub fn new(
        store: Arc<MetadataStore>,
        vector: Arc<dyn VectorIndex>,
        media: Arc<MediaStorage>,
        chunk_size: usize,
        chunk_overlap: usize,
        max_file_bytes: usize,
    ) -> Self {
        Self {
            store,
            vector,
            media,
            chunker: TextChunker::new(chunk_size, chunk_overlap),
            max_file_bytes,
        }
    }

    pub async fn ingest_text(&self, request: IngestTextRequest) -> Result<IngestResponse, ApiError> {
        if request.title.trim().is_empty() {
            return Err(ApiError::InvalidRequest("title is required".to_string()));
        }
        if request.content.trim().is_empty() {
            return Err(ApiError::InvalidRequest("content is required".to_string()));
        }

        let content_hash = sha256_hex(request.content.as_bytes());
        if let Some(existing) = self.store.find_by_content_hash(&content_hash).await? {
            return Ok(duplicate_response(existing));
        }

        let document_id = generate_document_id();
        let chunks = self.chunker.chunk(
            &request.content,
            &document_id,
            &request.title,
            &chunk_metadata(&request.category, MediaType::Text, &None, &request.metadata),
        );

        self.index_and_commit(
            document_id,
            request.title,
            request.category,
            request.description,
            request.metadata.unwrap_or_default(),
            MediaType::Text,
            None,
            content_hash,
            chunks,
            false,
        )
        .await
    }

    pub async fn ingest_file(&self, request: IngestFileRequest) -> Result<IngestResponse, ApiError> {
        if request.title.trim().is_empty() {
            return Err(ApiError::InvalidRequest("title is required".to_string()));
        }
        if request.bytes.is_empty() {
            return Err(ApiError::InvalidRequest("file is empty".to_string()));
        }
        validate_upload(&request.bytes, &request.mime, self.max_file_bytes)?;

        let content_hash = sha256_hex(&request.bytes);
        if let Some(existing) = self.store.find_by_content_hash(&content_hash).await? {
            return Ok(duplicate_response(existing));
        }

        let document_id = generate_document_id();
        let media_type = MediaType::from_mime(&request.mime);
        let multimodal = matches!(media_type, MediaType::Image | MediaType::Video);
        // Audio has no frame pipeline; it still gets a descriptive chunk
        // instead of text extraction.
        let synthetic = multimodal || media_type == MediaType::Audio;

        // Non-text media bytes live in blob storage; the index only ever
        // sees descriptive text.
        let media_url = match media_type {
            MediaType::Image | MediaType::Video | MediaType::Audio => Some(
                self.media
                    .store(&request.bytes, &request.filename)
                    .await?,
            ),
            MediaType::Text | MediaType::Document => None,
        };

        let chunks = if synthetic {
            vec![self.synthetic_media_chunk(&document_id, &request, media_type, &media_url)]
        } else {
            let mut body = TextExtractor::extract(&request.bytes, &request.mime)?;
            if body.trim().is_empty() {
                body = match &request.description {
                    Some(description) => format!("{}\n\n{}", request.title, description),
                    None => request.title.clone(),
                };
            }
            self.chunker.chunk(
                &body,
                &document_id,
                &request.title,
                &chunk_metadata(&request.category, media_type, &media_url, &request.metadata),
            )
        };

        self.index_and_commit(
            document_id,
            request.title,
            request.category,
            request.description,
            request.metadata.unwrap_or_default(),
            media_type,
            media_url,
            content_hash,
            chunks,
            multimodal,
        )
        .await
    }

    /// One synthetic chunk per media asset; the pixels are the backend's
    /// business.
    fn synthetic_media_chunk(
        &self,
        document_id: &str,
        request: &IngestFileRequest,
        media_type: MediaType,
        media_url: &Option<String>,
    ) -> Chunk {
        let mut text = request.title.clone();
        if let Some(description) = &request.description {
            text.push('\n');
            text.push_str(description);
        }
        text.push('\n');
        text.push_str(&request.filename);

        let mut metadata =
            chunk_metadata(&request.category, media_type, media_url, &request.metadata);
        metadata.insert("document_id".to_string(), json!(document_id));
        metadata.insert("document_title".to_string(), json!(request.title));
        metadata.insert("chunk_index".to_string(), json!(0));
        metadata.insert("frame_index".to_string(), json!(0));

        Chunk {
            chunk_id: crate::models::chunk_id(document_id, 0),
            text,
            metadata,
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn index_and_commit(
        &self,
        document_id: String,
        title: String,
        category: Option<String>,
        description: Option<String>,
        metadata: Map<String, Value>,
        media_type: MediaType,
        media_url: Option<String>,
        content_hash: String,
        chunks: Vec<Chunk>,
        multimodal: bool,
    ) -> Result<IngestResponse, ApiError> {
        let chunks_count = chunks.len() as u32;
        let docs: Vec<IndexDocument> = chunks
            .into_iter()
            .map(|chunk| IndexDocument {
                id: chunk.chunk_id,
                text: chunk.text,
                metadata: chunk.metadata,
            })
            .collect();

        let index_result = if multimodal {
            self.vector.index_multimodal(docs).await
        } else {
            self.vector.index(docs).await
        };

        let now = Utc::now();
        let mut record = DocumentRecord {
            document_id: document_id.clone(),
            title,
            category,
            description,
            metadata,
            status: DocumentStatus::Indexed,
            chunks_count,
            created_at: now,
            updated_at: now,
            media_type,
            media_url,
            content_hash: Some(content_hash),
        };

        match index_result {
            Ok(()) => {
                self.store.upsert(&record).await?;
                info!(document_id = %record.document_id, chunks_count, "document indexed");
                Ok(IngestResponse {
                    document_id,
                    status: DocumentStatus::Indexed,
                    chunks_count,
                    message: format!("indexed {} chunks", chunks_count),
                })
            }
            Err(e) => {
                // No content hash on failure: the next attempt with the
                // same bytes must not dedup against this record.
                record.status = DocumentStatus::Failed;
                record.chunks_count = 0;
                record.content_hash = None;
                self.store.upsert(&record).await?;
                warn!(document_id = %record.document_id, error = %e, "indexing failed");
                Ok(IngestResponse {
                    document_id,
                    status: DocumentStatus::Failed,
                    chunks_count: 0,
                    message: format!("indexing failed: {}", e),
                })
            }
        }
    }

    pub async fn delete(&self, document_id: &str) -> Result<(), ApiError> {
        let doc = self
            .store
            .get(document_id)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("document '{}'", document_id)))?;

        let chunk_ids = self.store.chunk_ids(document_id).await?;
        self.vector.delete(chunk_ids).await?;

        if let Some(media_url) = &doc.media_url {
            self.media.remove(media_url).await;
        }

        self.store.delete(document_id).await?;
        info!(document_id, "document deleted");
        Ok(())
    }
}

fn duplicate_response(existing: DocumentRecord) -> IngestResponse {
    info!(document_id = %existing.document_id, "duplicate content, returning existing document");
    IngestResponse {
        document_id: existing.document_id,
        status: existing.status,
        chunks_count: existing.chunks_count,
        message: "duplicate content, returning existing document".to_string(),
    }
}

fn chunk_metadata(
    category: &Option<String>,
    media_type: MediaType,
    media_url: &Option<String>,
    user_metadata: &Option<Map<String, Value>>,
) -> Map<String, Value> {
    let mut metadata = user_metadata.clone().unwrap_or_default();
    metadata.insert("media_type".to_string(), json!(media_type.as_str()));
    if let Some(category) = category {
        metadata.insert("category".to_string(), json!(category));
    }
    if let Some(media_url) = media_url {
        metadata.insert("media_url".to_string(), json!(media_url));
    }
    metadata
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector::MockVectorIndex;

    struct Fixture {
        _dir: tempfile::TempDir,
        store: Arc<MetadataStore>,
    }

    async fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(
            MetadataStore::open(&dir.path().join("documents.db"))
                .await
                .unwrap(),
        );
        Fixture { _dir: dir, store }
    }

    fn service(fixture: &Fixture, vector: MockVectorIndex) -> IngestionService {
        IngestionService::new(
            fixture.store.clone(),
            Arc::new(vector),
            Arc::new(MediaStorage::new(fixture._dir.path().join("media"))),
            500,
            50,
            1024 * 1024,
        )
    }

    fn text_request(content: &str) -> IngestTextRequest {
        IngestTextRequest {
            title: "T".to_string(),
            content: content.to_string(),
            category: None,
            description: None,
            metadata: None,
        }
    }

    #[tokio::test]
    async fn test_ingest_text_indexes_and_commits() {
        let fixture = fixture().await;
        let mut vector = MockVectorIndex::new();
        vector.expect_index().returning(|_| Ok(()));

        let response = service(&fixture, vector)
            .ingest_text(text_request("Alpha beta.\n\nGamma delta."))
            .await
            .unwrap();

        assert_eq!(response.status, DocumentStatus::Indexed);
        assert!(response.chunks_count >= 1);

        let stored = fixture
            .store
            .get(&response.document_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, DocumentStatus::Indexed);
        assert!(stored.content_hash.is_some());
        assert_eq!(stored.chunks_count, response.chunks_count);
    }

    #[tokio::test]
    async fn test_duplicate_content_returns_existing() {
        let fixture = fixture().await;
        let mut vector = MockVectorIndex::new();
        vector.expect_index().times(1).returning(|_| Ok(()));
        let service = service(&fixture, vector);

        let first = service.ingest_text(text_request("hello world")).await.unwrap();
        let second = service.ingest_text(text_request("hello world")).await.unwrap();

        assert_eq!(first.document_id, second.document_id);
        assert!(second.message.contains("duplicate"));
        assert_eq!(fixture.store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_index_failure_marks_failed_without_hash() {
        let fixture = fixture().await;
        let mut vector = MockVectorIndex::new();
        let mut calls = 0;
        vector.expect_index().returning_st(move |_| {
            calls += 1;
            if calls == 1 {
                Err(ApiError::BackendUnavailable("batch 2/3: add 500".to_string()))
            } else {
                Ok(())
            }
        });
        let service = service(&fixture, vector);

        let failed = service.ingest_text(text_request("some content")).await.unwrap();
        assert_eq!(failed.status, DocumentStatus::Failed);
        assert_eq!(failed.chunks_count, 0);

        let stored = fixture.store.get(&failed.document_id).await.unwrap().unwrap();
        assert_eq!(stored.status, DocumentStatus::Failed);
        assert!(stored.content_hash.is_none());

        // A retry with the same content is NOT deduped against the failure.
        let retried = service.ingest_text(text_request("some content")).await.unwrap();
        assert_ne!(retried.document_id, failed.document_id);
        assert_eq!(retried.status, DocumentStatus::Indexed);
    }

    #[tokio::test]
    async fn test_rejects_blank_input() {
        let fixture = fixture().await;
        let service = service(&fixture, MockVectorIndex::new());

        let err = service.ingest_text(text_request("   ")).await.unwrap_err();
        assert_eq!(err.kind(), "invalid_request");

        let err = service
            .ingest_text(IngestTextRequest {
                title: "".to_string(),
                content: "body".to_string(),
                category: None,
                description: None,
                metadata: None,
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "invalid_request");
    }

    #[tokio::test]
    async fn test_file_too_large_rejected() {
        let fixture = fixture().await;
        let service = IngestionService::new(
            fixture.store.clone(),
            Arc::new(MockVectorIndex::new()),
            Arc::new(MediaStorage::new(fixture._dir.path().join("media"))),
            500,
            50,
            8,
        );

        let err = service
            .ingest_file(IngestFileRequest {
                title: "T".to_string(),
                filename: "big.txt".to_string(),
                mime: "text/plain".to_string(),
                bytes: vec![b'a'; 64],
                category: None,
                description: None,
                metadata: None,
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "file_too_large");
    }

    #[tokio::test]
    async fn test_text_file_goes_through_extractor() {
        let fixture = fixture().await;
        let mut vector = MockVectorIndex::new();
        vector
            .expect_index()
            .withf(|docs| docs.iter().any(|d| d.text.contains("file body")))
            .returning(|_| Ok(()));

        let response = service(&fixture, vector)
            .ingest_file(IngestFileRequest {
                title: "Notes".to_string(),
                filename: "notes.txt".to_string(),
                mime: "text/plain".to_string(),
                bytes: b"file body text".to_vec(),
                category: None,
                description: None,
                metadata: None,
            })
            .await
            .unwrap();
        assert_eq!(response.status, DocumentStatus::Indexed);
    }

    #[tokio::test]
    async fn test_image_gets_one_synthetic_multimodal_chunk() {
        let fixture = fixture().await;
        let png = [0x89u8, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0];

        let mut vector = MockVectorIndex::new();
        vector
            .expect_index_multimodal()
            .withf(|docs| {
                docs.len() == 1
                    && docs[0].text.contains("Team offsite")
                    && docs[0].text.contains("photo.png")
                    && docs[0].metadata["frame_index"] == 0
            })
            .returning(|_| Ok(()));

        let response = service(&fixture, vector)
            .ingest_file(IngestFileRequest {
                title: "Team offsite".to_string(),
                filename: "photo.png".to_string(),
                mime: "image/png".to_string(),
                bytes: png.to_vec(),
                category: None,
                description: Some("group photo".to_string()),
                metadata: None,
            })
            .await
            .unwrap();

        assert_eq!(response.chunks_count, 1);
        let stored = fixture
            .store
            .get(&response.document_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.media_type, MediaType::Image);
        assert!(stored.media_url.as_deref().unwrap().starts_with("/media/"));
    }

    #[tokio::test]
    async fn test_delete_removes_chunks_and_row() {
        let fixture = fixture().await;
        let mut vector = MockVectorIndex::new();
        vector.expect_index().returning(|_| Ok(()));
        let service = service(&fixture, vector);

        let response = service
            .ingest_text(text_request("Alpha beta.\n\nGamma delta."))
            .await
            .unwrap();
        let doc_id = response.document_id.clone();

        // Swap in a vector mock that checks the derived chunk-id set.
        let expected: Vec<String> = (0..response.chunks_count)
            .map(|i| crate::models::chunk_id(&doc_id, i))
            .collect();
        let mut vector = MockVectorIndex::new();
        vector
            .expect_delete()
            .withf(move |ids| *ids == expected)
            .returning(|_| Ok(()));
        let deleter = IngestionService::new(
            fixture.store.clone(),
            Arc::new(vector),
            Arc::new(MediaStorage::new(fixture._dir.path().join("media"))),
            500,
            50,
            1024,
        );

        deleter.delete(&doc_id).await.unwrap();
        assert!(!fixture.store.exists(&doc_id).await.unwrap());

        let err = deleter.delete(&doc_id).await.unwrap_err();
        assert_eq!(err.kind(), "not_found");
    }
}
