use crate::models::{ChatRequest, ChatResponse};
use crate::state::AppState;
use crate::utils::error::ApiError;
use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use futures::stream::Stream;
use futures::StreamExt;
use std::convert::Infallible;
use std::sync::Arc;
use tracing::info;

/// POST /chat/stream
///
/// Each chat event goes out as one SSE `data:` frame. Admission failures
/// happen before the stream exists and surface as plain error responses.
pub async fn chat_stream_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ChatRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    info!(
        thread_id = ?request.thread_id,
        user_id = ?request.user_id,
        "chat stream request"
    );

    let events = state.chat.chat_stream(request)?;
    let frames = events.map(|event| {
        let data = serde_json::to_string(&event).unwrap_or_else(|_| "{}".to_string());
        Ok(Event::default().data(data))
    });

    Ok(Sse::new(frames).keep_alive(KeepAlive::default()))
}

/// POST /chat, the synchronous variant returning the full answer.
pub async fn chat_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    let response = state.chat.chat(request).await?;
    Ok(Json(response))
}
