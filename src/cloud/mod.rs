//! Remote REST collaborators: chat completion, speech synthesis, batch
//! recognition and object storage.

pub mod client;
pub mod extract;
pub mod storage;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::CloudError;

pub use client::{CloudClient, CloudSettings};
pub use storage::{ObjectStore, QiniuStorage};

/// One chat message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Return the assistant reply for the given conversation.
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, CloudError>;
}

#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Render text to audio and return a servable locator.
    async fn synthesize(&self, text: &str) -> Result<String, CloudError>;
}

#[async_trait]
pub trait BatchRecognizer: Send + Sync {
    /// Recognize audio that is already reachable at `url`.
    async fn recognize_url(&self, url: &str) -> Result<String, CloudError>;
}
