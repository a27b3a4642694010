use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use super::audio::PreparedAudio;
use super::SpeechRecognizer;
use crate::cloud::{BatchRecognizer, ObjectStore};
use crate::error::AsrError;

/// Stateless recognition: put the audio in object storage, then hand the
/// public URL to the batch endpoint.
pub struct UploadThenRecognize {
    store: Arc<dyn ObjectStore>,
    batch: Arc<dyn BatchRecognizer>,
}

impl UploadThenRecognize {
    pub fn new(store: Arc<dyn ObjectStore>, batch: Arc<dyn BatchRecognizer>) -> Self {
        Self { store, batch }
    }
}

#[async_trait]
impl SpeechRecognizer for UploadThenRecognize {
    fn name(&self) -> &'static str {
        "upload"
    }

    async fn recognize(&self, audio: &PreparedAudio) -> Result<String, AsrError> {
        let url = self.store.upload(&audio.path).await?;
        info!("Audio available at {}, calling batch recognizer", url);

        let text = self.batch.recognize_url(&url).await?;
        if text.trim().is_empty() {
            return Err(AsrError::NoRecognitionResult);
        }
        Ok(text)
    }
}

/// Tries the primary recognizer, then the fallback. Neither is retried.
pub struct RecognitionStrategySelector {
    primary: Arc<dyn SpeechRecognizer>,
    fallback: Arc<dyn SpeechRecognizer>,
}

impl RecognitionStrategySelector {
    pub fn new(primary: Arc<dyn SpeechRecognizer>, fallback: Arc<dyn SpeechRecognizer>) -> Self {
        Self { primary, fallback }
    }
}

#[async_trait]
impl SpeechRecognizer for RecognitionStrategySelector {
    fn name(&self) -> &'static str {
        "selector"
    }

    async fn recognize(&self, audio: &PreparedAudio) -> Result<String, AsrError> {
        let primary_err = match self.primary.recognize(audio).await {
            Ok(text) => {
                info!("Recognized via {} strategy", self.primary.name());
                return Ok(text);
            }
            Err(e) => {
                warn!(
                    "{} strategy failed: {}, falling back to {}",
                    self.primary.name(),
                    e,
                    self.fallback.name()
                );
                e
            }
        };

        match self.fallback.recognize(audio).await {
            Ok(text) => {
                info!("Recognized via {} strategy", self.fallback.name());
                Ok(text)
            }
            Err(fallback_err) => {
                warn!("{} strategy failed: {}", self.fallback.name(), fallback_err);
                Err(AsrError::Unavailable {
                    primary: primary_err.to_string(),
                    fallback: fallback_err.to_string(),
                })
            }
        }
    }
}
