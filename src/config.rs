use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::asr::{EndOfStream, ProtocolCompat, StreamingConfig};

/// Flat variables honoured for deployments configured before the sectioned layout.
const LEGACY_OVERRIDES: &[(&str, &str)] = &[
    ("QINIU_API_KEY", "cloud.api_key"),
    ("QINIU_BASE_URL", "cloud.base_url"),
    ("QINIU_ACCESS_KEY", "storage.access_key"),
    ("QINIU_SECRET_KEY", "storage.secret_key"),
    ("QINIU_BUCKET", "storage.bucket"),
    ("QINIU_DOMAIN", "storage.domain"),
    ("PORT", "server.port"),
    ("ENABLE_SAFE_MODE", "security.enable_safe_mode"),
];

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub cloud: CloudConfig,
    pub llm: LlmConfig,
    pub tts: TtsConfig,
    pub asr: AsrConfig,
    pub storage: StorageConfig,
    pub session: SessionConfig,
    pub security: SecurityConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    pub static_audio_path: PathBuf,
    pub temp_audio_path: PathBuf,
    /// Upload limit for voice requests, in bytes
    pub max_audio_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: 8080,
            static_audio_path: PathBuf::from("./static/audio"),
            temp_audio_path: PathBuf::from("./temp"),
            max_audio_size: 10 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CloudConfig {
    pub api_key: String,
    pub base_url: String,
    pub asr_ws_url: String,
    pub request_timeout_secs: u64,
}

impl Default for CloudConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://openai.qiniu.com/v1".to_string(),
            asr_ws_url: "wss://openai.qiniu.com/v1/voice/asr".to_string(),
            request_timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: "deepseek/deepseek-v3.1-terminus".to_string(),
            max_tokens: 2000,
            temperature: 0.7,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TtsConfig {
    pub voice_type: String,
    pub encoding: String,
    pub speed_ratio: f32,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            voice_type: "qiniu_zh_female_wwxkjx".to_string(),
            encoding: "mp3".to_string(),
            speed_ratio: 1.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AsrConfig {
    pub model: String,
    /// Container format announced to the batch recognizer
    pub format: String,
    pub enable_punctuation: bool,
    pub result_timeout_secs: u64,
    pub handshake_timeout_secs: u64,
    pub pacing_ms: u64,
    pub gzip_config: bool,
    pub first_sequence: i32,
    pub end_of_stream: EndOfStream,
}

impl Default for AsrConfig {
    fn default() -> Self {
        Self {
            model: "asr".to_string(),
            format: "wav".to_string(),
            enable_punctuation: true,
            result_timeout_secs: 30,
            handshake_timeout_secs: 10,
            pacing_ms: 100,
            gzip_config: false,
            first_sequence: 1,
            end_of_stream: EndOfStream::Close,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub access_key: String,
    pub secret_key: String,
    pub bucket: String,
    /// Public download domain; derived from the bucket when empty
    pub domain: String,
    pub upload_url: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            access_key: String::new(),
            secret_key: String::new(),
            bucket: "voicepilot-audio".to_string(),
            domain: String::new(),
            upload_url: "https://up.qiniup.com".to_string(),
        }
    }
}

impl StorageConfig {
    pub fn public_domain(&self) -> String {
        if self.domain.is_empty() {
            format!("{}.example.com", self.bucket)
        } else {
            self.domain.clone()
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub storage_path: PathBuf,
    pub max_history: usize,
    pub expiry_hours: u64,
    pub cleanup_interval_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            storage_path: PathBuf::from("./data/sessions"),
            max_history: 50,
            expiry_hours: 72,
            cleanup_interval_secs: 3600,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    pub enable_safe_mode: bool,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            enable_safe_mode: true,
        }
    }
}

impl Config {
    /// Load from an optional file, `VOICEPILOT__*` variables and the legacy
    /// flat variables, in increasing precedence.
    pub fn load(path: &str) -> Result<Self> {
        Self::load_with(path, |key| std::env::var(key).ok())
    }

    /// Same as [`Config::load`] with legacy variables read through `lookup`.
    pub fn load_with(path: &str, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut builder = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix("VOICEPILOT")
                    .separator("__")
                    .try_parsing(true),
            );

        for (var, key) in LEGACY_OVERRIDES {
            if let Some(value) = lookup(var).filter(|v| !v.is_empty()) {
                builder = builder
                    .set_override(*key, value)
                    .with_context(|| format!("Invalid value for {}", var))?;
            }
        }

        let settings = builder.build().context("Failed to build configuration")?;
        let cfg: Config = settings
            .try_deserialize()
            .context("Failed to parse configuration")?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.cloud.api_key.trim().is_empty() {
            bail!("cloud.api_key is required (set VOICEPILOT__CLOUD__API_KEY or QINIU_API_KEY)");
        }
        if self.session.max_history == 0 {
            bail!("session.max_history must be at least 1");
        }
        if self.server.max_audio_size == 0 {
            bail!("server.max_audio_size must be positive");
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.cloud.request_timeout_secs)
    }

    pub fn session_expiry(&self) -> Duration {
        Duration::from_secs(self.session.expiry_hours * 3600)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.session.cleanup_interval_secs.max(1))
    }

    /// Streaming recognizer settings derived from the `cloud` and `asr` sections.
    pub fn streaming(&self) -> StreamingConfig {
        StreamingConfig {
            url: self.cloud.asr_ws_url.clone(),
            api_key: self.cloud.api_key.clone(),
            model_name: self.asr.model.clone(),
            enable_punctuation: self.asr.enable_punctuation,
            pacing: Duration::from_millis(self.asr.pacing_ms),
            handshake_timeout: Duration::from_secs(self.asr.handshake_timeout_secs),
            result_timeout: Duration::from_secs(self.asr.result_timeout_secs),
            compat: ProtocolCompat {
                gzip_config: self.asr.gzip_config,
                first_sequence: self.asr.first_sequence,
                end_of_stream: self.asr.end_of_stream,
            },
            ..StreamingConfig::default()
        }
    }
}
