//! HTTP surface: video analysis, annotated video download, FAQ chat and
//! text translation.

mod error;
mod routes;
mod state;

use std::net::SocketAddr;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use tower_http::cors::CorsLayer;

pub use error::ApiError;
pub use routes::{
    ChatRequest, ChatResponse, NO_TEXT, OPEN_FAILED, TranslateRequest, TranslateResponse,
    UNSUPPORTED_FORMAT, VIDEO_UNAVAILABLE,
};
#[cfg(feature = "ffmpeg")]
pub use state::FfmpegIo;
pub use state::{AppState, SharedDetector, VideoIo};

/// Build the application router over `state`.
pub fn create_router(state: AppState) -> Router {
    let upload_limit = state.upload_limit;
    Router::new()
        .route("/", get(routes::root))
        .route("/health", get(routes::health))
        .route("/detect-video", post(routes::detect_video))
        .route("/detect-video-stream", post(routes::detect_video_stream))
        .route("/chat", post(routes::chat))
        .route("/api/translate", post(routes::translate))
        .layer(DefaultBodyLimit::max(upload_limit))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Bind `addr` and serve until Ctrl-C.
pub async fn serve(addr: SocketAddr, router: Router) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "server listening");
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "cannot listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}
