use crate::models::{SearchRequest, SearchResponse};
use crate::state::AppState;
use crate::utils::error::ApiError;
use axum::{extract::State, Json};
use std::sync::Arc;
use tracing::info;

/// POST /provider/search
pub async fn search_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, ApiError> {
    info!(user_id = %request.user_id, "search request");

    let response = state
        .search_engine
        .search(
            &request.user_id,
            &request.query,
            request.limit,
            request.token_budget,
            None,
        )
        .await?;

    Ok(Json(response))
}
