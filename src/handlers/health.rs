use crate::state::AppState;
use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use std::sync::Arc;

#[derive(Serialize)]
pub struct HealthResponse {
    status: String,
    version: String,
    vector_backend: bool,
    llm: bool,
}

/// GET /health: liveness plus collaborator probes.
pub async fn health_check(
    State(state): State<Arc<AppState>>,
) -> (StatusCode, Json<HealthResponse>) {
    let vector_backend = state.vector.health().await;
    let llm = match &state.provider {
        Some(provider) => provider.health().await,
        None => false,
    };

    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "healthy".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            vector_backend,
            llm,
        }),
    )
}
