use anyhow::Result;
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{
    catch_panic::CatchPanicLayer,
    cors::CorsLayer,
    services::ServeDir,
    trace::{DefaultMakeSpan, TraceLayer},
};
use tracing::info;

use knowledge_api_server::config::Settings;
use knowledge_api_server::handlers;
use knowledge_api_server::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "info,knowledge_api_server=debug".to_string()),
        )
        .with_target(true)
        .json()
        .init();

    info!("starting knowledge API server");

    let settings = Settings::load()?;
    info!("configuration loaded");

    let state = AppState::initialize(settings.clone())
        .await
        .map_err(|e| anyhow::anyhow!("initialization failed: {}", e))?;
    info!("application state ready");

    let app = build_router(state.clone(), &settings);

    let addr = SocketAddr::from((
        settings.server.host.parse::<std::net::IpAddr>()?,
        settings.server.port,
    ));
    info!("listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(state))
        .await?;

    Ok(())
}

fn build_router(state: Arc<AppState>, settings: &Settings) -> Router {
    Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/chat", post(handlers::chat::chat_handler))
        .route("/chat/stream", post(handlers::chat::chat_stream_handler))
        .route("/provider/search", post(handlers::search::search_handler))
        .route(
            "/documents",
            get(handlers::documents::list_documents_handler),
        )
        .route(
            "/documents/text",
            post(handlers::documents::ingest_text_handler),
        )
        .route(
            "/documents/file",
            post(handlers::documents::ingest_file_handler),
        )
        .route(
            "/documents/{id}",
            get(handlers::documents::get_document_handler)
                .delete(handlers::documents::delete_document_handler),
        )
        .nest_service("/media", ServeDir::new(&settings.storage.media_dir))
        .layer(CorsLayer::permissive())
        .layer(CatchPanicLayer::new())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::default().include_headers(false)),
        )
        .layer(DefaultBodyLimit::max(
            settings.storage.max_file_bytes + 1024 * 1024,
        ))
        .with_state(state)
}

async fn shutdown_signal(state: Arc<AppState>) {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
    state.shutdown().await;
}
