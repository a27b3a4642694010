use crate::pipeline::Orchestrator;
use crate::session::ConversationStore;
use std::path::PathBuf;
use std::sync::Arc;

/// Shared application state for HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,

    /// Conversation history (session_id → messages)
    pub conversations: Arc<ConversationStore>,

    /// Uploaded audio is staged here while the pipeline runs
    pub temp_audio_path: PathBuf,

    /// Synthesized audio served under /static/audio
    pub static_audio_path: PathBuf,

    pub max_audio_size: usize,
}

impl AppState {
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        conversations: Arc<ConversationStore>,
        temp_audio_path: impl Into<PathBuf>,
        static_audio_path: impl Into<PathBuf>,
        max_audio_size: usize,
    ) -> Self {
        Self {
            orchestrator,
            conversations,
            temp_audio_path: temp_audio_path.into(),
            static_audio_path: static_audio_path.into(),
            max_audio_size,
        }
    }
}
