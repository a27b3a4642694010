use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::extract::{extract_audio, extract_text, SynthesizedAudio, BATCH_TEXT_RULES};
use super::{BatchRecognizer, ChatMessage, ChatModel, SpeechSynthesizer};
use crate::config::Config;
use crate::error::CloudError;

/// Public prefix under which synthesized audio is served.
pub const STATIC_AUDIO_ROUTE: &str = "/static/audio";

/// Everything the REST client needs, flattened out of [`Config`].
#[derive(Debug, Clone)]
pub struct CloudSettings {
    pub base_url: String,
    pub api_key: String,
    pub request_timeout: Duration,
    pub llm_model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub voice_type: String,
    pub encoding: String,
    pub speed_ratio: f32,
    pub asr_model: String,
    pub asr_format: String,
    /// Where decoded synthesis output is written
    pub static_audio_path: PathBuf,
}

impl CloudSettings {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            base_url: cfg.cloud.base_url.trim_end_matches('/').to_string(),
            api_key: cfg.cloud.api_key.clone(),
            request_timeout: cfg.request_timeout(),
            llm_model: cfg.llm.model.clone(),
            max_tokens: cfg.llm.max_tokens,
            temperature: cfg.llm.temperature,
            voice_type: cfg.tts.voice_type.clone(),
            encoding: cfg.tts.encoding.clone(),
            speed_ratio: cfg.tts.speed_ratio,
            asr_model: cfg.asr.model.clone(),
            asr_format: cfg.asr.format.clone(),
            static_audio_path: cfg.server.static_audio_path.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    max_tokens: u32,
    temperature: f32,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Serialize)]
struct TtsRequest<'a> {
    audio: TtsAudio<'a>,
    request: TtsText<'a>,
}

#[derive(Debug, Serialize)]
struct TtsAudio<'a> {
    voice_type: &'a str,
    encoding: &'a str,
    speed_ratio: f32,
}

#[derive(Debug, Serialize)]
struct TtsText<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
struct AsrRequest<'a> {
    model: &'a str,
    audio: AsrAudio<'a>,
}

#[derive(Debug, Serialize)]
struct AsrAudio<'a> {
    format: &'a str,
    url: &'a str,
}

/// HTTP client for the cloud REST endpoints.
#[derive(Debug, Clone)]
pub struct CloudClient {
    http: reqwest::Client,
    settings: CloudSettings,
}

impl CloudClient {
    pub fn new(settings: CloudSettings) -> Result<Self, CloudError> {
        let http = reqwest::Client::builder()
            .timeout(settings.request_timeout)
            .build()?;
        Ok(Self { http, settings })
    }

    pub fn settings(&self) -> &CloudSettings {
        &self.settings
    }

    /// POST a JSON body and decode the JSON reply, mapping non-2xx to `Status`.
    async fn post_json<B: Serialize + ?Sized>(
        &self,
        endpoint: &'static str,
        path: &str,
        body: &B,
    ) -> Result<Value, CloudError> {
        let url = format!("{}{}", self.settings.base_url, path);
        debug!("POST {}", url);

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.settings.api_key)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            warn!("{} returned {}: {}", endpoint, status, text);
            return Err(CloudError::Status {
                endpoint,
                status: status.as_u16(),
                body: text,
            });
        }

        serde_json::from_str(&text).map_err(|e| CloudError::Decode {
            endpoint,
            message: e.to_string(),
        })
    }

    async fn save_audio(&self, encoded: &str) -> Result<String, CloudError> {
        let bytes = STANDARD.decode(encoded.trim()).map_err(|e| CloudError::Decode {
            endpoint: "tts",
            message: format!("invalid base64 audio: {e}"),
        })?;

        tokio::fs::create_dir_all(&self.settings.static_audio_path).await?;
        let filename = format!(
            "tts_{}_{}.{}",
            chrono::Utc::now().timestamp(),
            uuid::Uuid::new_v4().simple(),
            self.settings.encoding
        );
        let path = self.settings.static_audio_path.join(&filename);
        tokio::fs::write(&path, &bytes).await?;

        info!("Saved {} bytes of synthesized audio to {}", bytes.len(), path.display());
        Ok(format!("{}/{}", STATIC_AUDIO_ROUTE, filename))
    }
}

#[async_trait]
impl ChatModel for CloudClient {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, CloudError> {
        let request = ChatRequest {
            model: &self.settings.llm_model,
            messages,
            max_tokens: self.settings.max_tokens,
            temperature: self.settings.temperature,
            stream: false,
        };
        let value = self.post_json("chat", "/chat/completions", &request).await?;

        let response: ChatResponse =
            serde_json::from_value(value).map_err(|e| CloudError::Decode {
                endpoint: "chat",
                message: e.to_string(),
            })?;

        response
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or(CloudError::MissingField {
                endpoint: "chat",
                field: "choices",
            })
    }
}

#[async_trait]
impl SpeechSynthesizer for CloudClient {
    async fn synthesize(&self, text: &str) -> Result<String, CloudError> {
        info!("Synthesizing {} chars of speech", text.chars().count());
        let request = TtsRequest {
            audio: TtsAudio {
                voice_type: &self.settings.voice_type,
                encoding: &self.settings.encoding,
                speed_ratio: self.settings.speed_ratio,
            },
            request: TtsText { text },
        };
        let value = self.post_json("tts", "/voice/tts", &request).await?;

        match extract_audio(&value) {
            Some((rule, SynthesizedAudio::Url(url))) => {
                debug!("TTS audio resolved by rule {}", rule);
                Ok(url)
            }
            Some((rule, SynthesizedAudio::Base64(data))) => {
                debug!("TTS audio resolved by rule {}", rule);
                self.save_audio(&data).await
            }
            None => Err(CloudError::MissingField {
                endpoint: "tts",
                field: "audio url or data",
            }),
        }
    }
}

#[async_trait]
impl BatchRecognizer for CloudClient {
    async fn recognize_url(&self, url: &str) -> Result<String, CloudError> {
        let request = AsrRequest {
            model: &self.settings.asr_model,
            audio: AsrAudio {
                format: &self.settings.asr_format,
                url,
            },
        };
        let value = self.post_json("asr", "/voice/asr", &request).await?;

        extract_text(&value, BATCH_TEXT_RULES).ok_or(CloudError::MissingField {
            endpoint: "asr",
            field: "text",
        })
    }
}
