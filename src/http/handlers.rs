use super::state::AppState;
use crate::error::{PipelineError, SessionError};
use crate::pipeline::VoiceResponse;
use crate::session::{validate_session_id, ConversationMessage};
use axum::{
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{error, info, warn};

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct TextRequest {
    pub text: String,

    /// Optional session ID (if not provided, one is generated)
    pub session_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    /// Most recent N messages (default: all)
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub session_id: String,
    pub messages: Vec<ConversationMessage>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub time: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
}

fn error_response(status: StatusCode, error: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            success: false,
            error: error.into(),
        }),
    )
        .into_response()
}

async fn finish(state: &AppState, result: Result<VoiceResponse, PipelineError>) -> Response {
    match result {
        Ok(response) => {
            if !response.recognized_text.is_empty() {
                if let Err(e) = state
                    .conversations
                    .record_interaction(
                        &response.session_id,
                        &response.recognized_text,
                        response.intent.as_deref(),
                        &response.text,
                    )
                    .await
                {
                    warn!("Failed to record conversation {}: {}", response.session_id, e);
                }
            }
            (StatusCode::OK, Json(response)).into_response()
        }
        Err(e) => {
            error!("Pipeline failed: {}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

/// Blank ids mean "generate one"; anything else must be usable as a file name.
fn check_session_id(session_id: Option<&str>) -> Result<(), Response> {
    match session_id.filter(|id| !id.trim().is_empty()) {
        Some(id) => validate_session_id(id)
            .map_err(|e| error_response(StatusCode::BAD_REQUEST, e.to_string())),
        None => Ok(()),
    }
}

/// Removes the staged upload when the request finishes, however it ends.
struct StagedUpload(PathBuf);

impl Drop for StagedUpload {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.0) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to remove staged audio {}: {}", self.0.display(), e);
            }
        }
    }
}

fn upload_extension(file_name: Option<&str>) -> &'static str {
    let ext = file_name
        .and_then(|n| std::path::Path::new(n).extension())
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("webm") => "webm",
        Some("mp3") => "mp3",
        Some("ogg") => "ogg",
        _ => "wav",
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /api/voice
/// Multipart form: `audio` file plus optional `session_id`
pub async fn process_voice(State(state): State<AppState>, mut multipart: Multipart) -> Response {
    let mut audio: Option<(Vec<u8>, &'static str)> = None;
    let mut session_id: Option<String> = None;

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => {
                return error_response(StatusCode::BAD_REQUEST, format!("Invalid multipart body: {}", e))
            }
        };

        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("audio") => {
                let ext = upload_extension(field.file_name());
                match field.bytes().await {
                    Ok(bytes) => audio = Some((bytes.to_vec(), ext)),
                    Err(e) => {
                        return error_response(
                            StatusCode::BAD_REQUEST,
                            format!("Failed to read audio: {}", e),
                        )
                    }
                }
            }
            Some("session_id") => session_id = field.text().await.ok(),
            _ => {}
        }
    }

    if let Err(response) = check_session_id(session_id.as_deref()) {
        return response;
    }
    let Some((bytes, ext)) = audio else {
        return error_response(StatusCode::BAD_REQUEST, "Missing audio file");
    };
    if bytes.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "Audio file is empty");
    }
    if bytes.len() > state.max_audio_size {
        return error_response(
            StatusCode::PAYLOAD_TOO_LARGE,
            format!(
                "Audio file too large: {} bytes (max {})",
                bytes.len(),
                state.max_audio_size
            ),
        );
    }

    if let Err(e) = tokio::fs::create_dir_all(&state.temp_audio_path).await {
        error!("Failed to create temp dir: {}", e);
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to stage audio");
    }
    let staged = StagedUpload(
        state
            .temp_audio_path
            .join(format!("voice_{}.{}", uuid::Uuid::new_v4().simple(), ext)),
    );
    if let Err(e) = tokio::fs::write(&staged.0, &bytes).await {
        error!("Failed to stage audio: {}", e);
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to stage audio");
    }

    info!("Processing voice request ({} bytes)", bytes.len());
    let result = state
        .orchestrator
        .run_from_audio(&staged.0, session_id)
        .await;
    drop(staged);

    finish(&state, result).await
}

/// POST /api/text
/// Run the pipeline on typed text
pub async fn process_text(
    State(state): State<AppState>,
    Json(req): Json<TextRequest>,
) -> Response {
    if req.text.trim().is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "Text must not be empty");
    }
    if let Err(response) = check_session_id(req.session_id.as_deref()) {
        return response;
    }

    info!("Processing text request: {}", req.text);
    let result = state
        .orchestrator
        .run_from_text(&req.text, req.session_id)
        .await;
    finish(&state, result).await
}

/// GET /api/sessions/:session_id/history
pub async fn get_session_history(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Response {
    match state
        .conversations
        .history(&session_id, query.limit.unwrap_or(0))
        .await
    {
        Ok(messages) => (
            StatusCode::OK,
            Json(HistoryResponse {
                session_id,
                messages,
            }),
        )
            .into_response(),
        Err(e @ SessionError::InvalidId(_)) => error_response(StatusCode::BAD_REQUEST, e.to_string()),
        Err(e) => {
            error!("Failed to load history for {}: {}", session_id, e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

/// GET /api/health
/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok",
            time: chrono::Utc::now().to_rfc3339(),
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upload_extension_defaults_to_wav() {
        assert_eq!(upload_extension(Some("clip.WEBM")), "webm");
        assert_eq!(upload_extension(Some("a.mp3")), "mp3");
        assert_eq!(upload_extension(Some("../../evil.sh")), "wav");
        assert_eq!(upload_extension(None), "wav");
    }

    #[test]
    fn session_ids_are_checked_unless_blank() {
        assert!(check_session_id(None).is_ok());
        assert!(check_session_id(Some("  ")).is_ok());
        assert!(check_session_id(Some("web-1")).is_ok());
        let rejected = check_session_id(Some("../etc")).unwrap_err();
        assert_eq!(rejected.status(), StatusCode::BAD_REQUEST);
    }
}
