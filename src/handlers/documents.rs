use crate::models::DocumentRecord;
use crate::services::ingestion::{IngestFileRequest, IngestResponse, IngestTextRequest};
use crate::state::AppState;
use crate::utils::error::ApiError;
use axum::{
    extract::{Multipart, Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

/// POST /documents/text
pub async fn ingest_text_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<IngestTextRequest>,
) -> Result<Json<IngestResponse>, ApiError> {
    info!(title = %request.title, "text ingestion request");
    let response = state.ingestion.ingest_text(request).await?;
    Ok(Json(response))
}

/// POST /documents/file (multipart: title, file, category?, description?, metadata?)
pub async fn ingest_file_handler(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Json<IngestResponse>, ApiError> {
    let mut title: Option<String> = None;
    let mut filename: Option<String> = None;
    let mut mime: Option<String> = None;
    let mut bytes: Option<Vec<u8>> = None;
    let mut category: Option<String> = None;
    let mut description: Option<String> = None;
    let mut metadata: Option<serde_json::Map<String, serde_json::Value>> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::InvalidRequest(format!("failed to read field: {}", e)))?
    {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "title" => title = Some(read_text_field(field, "title").await?),
            "category" => category = Some(read_text_field(field, "category").await?),
            "description" => description = Some(read_text_field(field, "description").await?),
            "metadata" => {
                let raw = read_text_field(field, "metadata").await?;
                metadata = Some(serde_json::from_str(&raw).map_err(|e| {
                    ApiError::InvalidRequest(format!("metadata must be a JSON object: {}", e))
                })?);
            }
            "file" => {
                filename = field.file_name().map(str::to_string);
                mime = field.content_type().map(str::to_string);
                bytes = Some(
                    field
                        .bytes()
                        .await
                        .map_err(|e| ApiError::InvalidRequest(format!("failed to read file: {}", e)))?
                        .to_vec(),
                );
            }
            _ => {}
        }
    }

    let filename =
        filename.ok_or_else(|| ApiError::InvalidRequest("file field is required".to_string()))?;
    let bytes =
        bytes.ok_or_else(|| ApiError::InvalidRequest("file field is required".to_string()))?;
    let title = title.unwrap_or_else(|| filename.clone());
    let mime = mime.unwrap_or_else(|| {
        mime_guess::from_path(&filename)
            .first_or_octet_stream()
            .essence_str()
            .to_string()
    });

    info!(title = %title, filename = %filename, mime = %mime, bytes = bytes.len(), "file ingestion request");

    let response = state
        .ingestion
        .ingest_file(IngestFileRequest {
            title,
            filename,
            mime,
            bytes,
            category,
            description,
            metadata,
        })
        .await?;
    Ok(Json(response))
}

async fn read_text_field(field: axum::extract::multipart::Field<'_>, name: &str) -> Result<String, ApiError> {
    field
        .text()
        .await
        .map_err(|e| ApiError::InvalidRequest(format!("invalid {} field: {}", name, e)))
}

#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct ListDocumentsResponse {
    pub documents: Vec<DocumentRecord>,
    pub total: u64,
}

/// GET /documents
pub async fn list_documents_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListParams>,
) -> Result<Json<ListDocumentsResponse>, ApiError> {
    let limit = params.limit.unwrap_or(50).min(200);
    let offset = params.offset.unwrap_or(0);

    let (documents, total) = state.store.list(limit, offset).await?;
    Ok(Json(ListDocumentsResponse { documents, total }))
}

/// GET /documents/{id}
pub async fn get_document_handler(
    State(state): State<Arc<AppState>>,
    Path(document_id): Path<String>,
) -> Result<Json<DocumentRecord>, ApiError> {
    let doc = state
        .store
        .get(&document_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("document '{}'", document_id)))?;
    Ok(Json(doc))
}

#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub document_id: String,
    pub deleted: bool,
}

/// DELETE /documents/{id}
pub async fn delete_document_handler(
    State(state): State<Arc<AppState>>,
    Path(document_id): Path<String>,
) -> Result<Json<DeleteResponse>, ApiError> {
    state.ingestion.delete(&document_id).await?;
    Ok(Json(DeleteResponse {
        document_id,
        deleted: true,
    }))
}
