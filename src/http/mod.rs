//! HTTP API over the request pipeline
//!
//! - POST /api/voice - Multipart audio upload, runs the full pipeline
//! - POST /api/text - JSON text input, skips recognition
//! - GET /api/sessions/:id/history - Stored conversation messages
//! - GET /api/health - Health check
//! - GET /static/audio/* - Synthesized speech

mod handlers;
mod routes;
mod state;

pub use handlers::{ErrorResponse, TextRequest};
pub use routes::create_router;
pub use state::AppState;
