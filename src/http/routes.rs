use super::handlers;
use super::state::AppState;
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

/// Multipart framing allowance on top of the audio size limit.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// Create the HTTP router with all routes
pub fn create_router(state: AppState) -> Router {
    let static_audio = ServeDir::new(&state.static_audio_path);
    let body_limit = state.max_audio_size + MULTIPART_OVERHEAD;

    Router::new()
        // Health check
        .route("/api/health", get(handlers::health_check))
        // Pipeline entry points
        .route("/api/voice", post(handlers::process_voice))
        .route("/api/text", post(handlers::process_text))
        // Conversation history
        .route(
            "/api/sessions/:session_id/history",
            get(handlers::get_session_history),
        )
        .nest_service("/static/audio", static_audio)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(CorsLayer::permissive())
        // Add tracing middleware for request logging
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
