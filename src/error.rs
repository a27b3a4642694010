//! Error types for the recognition transport, cloud collaborators and the pipeline.

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Binary frame codec errors.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame too short: {len} bytes, need at least {needed}")]
    TooShort { len: usize, needed: usize },

    #[error("payload length mismatch: header declares {declared} bytes, {actual} follow")]
    LengthMismatch { declared: usize, actual: usize },

    #[error("unknown message type 0x{0:x}")]
    UnknownMessageType(u8),

    #[error("failed to compress payload: {0}")]
    Compression(#[source] std::io::Error),

    #[error("failed to decompress payload: {0}")]
    Decompression(#[source] std::io::Error),
}

/// Errors talking to the remote cloud REST endpoints.
#[derive(Debug, Error)]
pub enum CloudError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{endpoint} returned status {status}: {body}")]
    Status {
        endpoint: &'static str,
        status: u16,
        body: String,
    },

    #[error("failed to decode {endpoint} response: {message}")]
    Decode {
        endpoint: &'static str,
        message: String,
    },

    #[error("{endpoint} response has no {field}")]
    MissingField {
        endpoint: &'static str,
        field: &'static str,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Object storage upload errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object storage credentials are not configured (access key and secret key required)")]
    MissingCredentials,

    #[error("upload failed: {0}")]
    Upload(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Speech recognition errors, covering both strategies.
#[derive(Debug, Error)]
pub enum AsrError {
    #[error("failed to read audio: {0}")]
    Io(#[from] std::io::Error),

    #[error("audio conversion failed: {0}")]
    Conversion(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("protocol error: {0}")]
    Protocol(#[from] FrameError),

    #[error("recognizer rejected the request: {0}")]
    Rejected(String),

    #[error("timed out after {0:?} waiting for recognition result")]
    Timeout(Duration),

    #[error("no recognition result received")]
    NoRecognitionResult,

    #[error("object storage: {0}")]
    Storage(#[from] StorageError),

    #[error("batch recognition: {0}")]
    Batch(#[from] CloudError),

    #[error("speech recognition is unavailable, please use text input instead (upload: {primary}; streaming: {fallback})")]
    Unavailable { primary: String, fallback: String },
}

impl From<tokio_tungstenite::tungstenite::Error> for AsrError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        AsrError::Transport(err.to_string())
    }
}

/// Conversation store errors.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("invalid session id: {0:?}")]
    InvalidId(String),

    #[error("session storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt session file: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// The fixed stages of the request pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Recognize,
    ClassifyIntent,
    Plan,
    Gate,
    Execute,
    Respond,
    Synthesize,
}

impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Recognize => "recognize",
            Stage::ClassifyIntent => "classify_intent",
            Stage::Plan => "plan",
            Stage::Gate => "gate",
            Stage::Execute => "execute",
            Stage::Respond => "respond",
            Stage::Synthesize => "synthesize",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Cause of a fatal stage failure.
#[derive(Debug, Error)]
pub enum StageFailure {
    #[error(transparent)]
    Recognition(#[from] AsrError),

    #[error(transparent)]
    Completion(#[from] CloudError),
}

/// A fatal pipeline failure, tagged with the stage that raised it.
#[derive(Debug, Error)]
#[error("{stage} stage failed: {source}")]
pub struct PipelineError {
    pub stage: Stage,
    #[source]
    pub source: StageFailure,
}

impl PipelineError {
    pub fn new(stage: Stage, source: impl Into<StageFailure>) -> Self {
        Self {
            stage,
            source: source.into(),
        }
    }

    /// True when recognition failed on every strategy and the caller should
    /// fall back to text input.
    pub fn is_recognition_unavailable(&self) -> bool {
        matches!(
            self.source,
            StageFailure::Recognition(AsrError::Unavailable { .. })
        )
    }
}
