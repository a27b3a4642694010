pub mod actions;
pub mod asr;
pub mod cloud;
pub mod config;
pub mod error;
pub mod http;
pub mod pipeline;
pub mod session;

pub use actions::{Action, ActionKind, Executor, SecurityGate};
pub use asr::{RecognitionStrategySelector, SpeechRecognizer, StreamingRecognizer};
pub use cloud::{CloudClient, CloudSettings, QiniuStorage};
pub use config::Config;
pub use error::{AsrError, CloudError, PipelineError, Stage};
pub use http::{create_router, AppState};
pub use pipeline::{Orchestrator, VoiceResponse};
pub use session::{ConversationStore, SessionJanitor};
