//! Speech recognition: the framed duplex protocol, audio preparation and
//! the two recognition strategies.

pub mod audio;
pub mod frame;
pub mod strategy;
pub mod streaming;

use async_trait::async_trait;

use crate::error::AsrError;

pub use audio::{sniff_format, AudioFormat, PreparedAudio};
pub use frame::{Frame, MessageType};
pub use strategy::{RecognitionStrategySelector, UploadThenRecognize};
pub use streaming::{EndOfStream, ProtocolCompat, StreamingConfig, StreamingRecognizer};

/// One way of turning prepared audio into text.
#[async_trait]
pub trait SpeechRecognizer: Send + Sync {
    /// Short label used in logs and error reports
    fn name(&self) -> &'static str;

    async fn recognize(&self, audio: &PreparedAudio) -> Result<String, AsrError>;
}
