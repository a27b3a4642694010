use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE, Engine as _};
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha1::Sha1;
use tracing::{info, warn};

use crate::config::StorageConfig;
use crate::error::StorageError;

type HmacSha1 = Hmac<Sha1>;

/// Upload token lifetime, in seconds.
const TOKEN_TTL_SECS: i64 = 3600;

/// Somewhere audio can be put to obtain a publicly fetchable URL.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn upload(&self, path: &Path) -> Result<String, StorageError>;
}

#[derive(Debug, Serialize)]
struct PutPolicy<'a> {
    scope: &'a str,
    deadline: i64,
}

/// Form-upload client for a Qiniu-compatible bucket.
#[derive(Debug, Clone)]
pub struct QiniuStorage {
    http: reqwest::Client,
    config: StorageConfig,
}

impl QiniuStorage {
    /// `timeout` bounds each upload request, so a stalled bucket fails over
    /// instead of blocking recognition.
    pub fn new(config: StorageConfig, timeout: Duration) -> Result<Self, StorageError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| StorageError::Upload(format!("build http client: {e}")))?;
        Ok(Self { http, config })
    }

    pub fn has_credentials(&self) -> bool {
        !self.config.access_key.is_empty() && !self.config.secret_key.is_empty()
    }

    /// `access_key:sign(policy):policy` for a token expiring at `deadline`.
    pub fn upload_token(&self, deadline: i64) -> Result<String, StorageError> {
        if !self.has_credentials() {
            return Err(StorageError::MissingCredentials);
        }

        let policy = serde_json::to_vec(&PutPolicy {
            scope: &self.config.bucket,
            deadline,
        })
        .map_err(|e| StorageError::Upload(format!("encode put policy: {e}")))?;
        let encoded_policy = URL_SAFE.encode(policy);

        let mut mac = HmacSha1::new_from_slice(self.config.secret_key.as_bytes())
            .map_err(|e| StorageError::Upload(format!("invalid secret key: {e}")))?;
        mac.update(encoded_policy.as_bytes());
        let signature = URL_SAFE.encode(mac.finalize().into_bytes());

        Ok(format!(
            "{}:{}:{}",
            self.config.access_key, signature, encoded_policy
        ))
    }

    pub fn object_key(file_name: &str, unix_secs: i64) -> String {
        format!("asr/{}_{}", unix_secs, file_name)
    }

    pub fn public_url(&self, key: &str) -> String {
        format!("https://{}/{}", self.config.public_domain(), key)
    }
}

#[async_trait]
impl ObjectStore for QiniuStorage {
    async fn upload(&self, path: &Path) -> Result<String, StorageError> {
        if !self.has_credentials() {
            warn!("Storage credentials not configured, skipping upload");
            return Err(StorageError::MissingCredentials);
        }

        let now = chrono::Utc::now().timestamp();
        let token = self.upload_token(now + TOKEN_TTL_SECS)?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "audio.wav".to_string());
        let key = Self::object_key(&file_name, now);

        let bytes = tokio::fs::read(path).await?;
        let size = bytes.len();
        let form = reqwest::multipart::Form::new()
            .text("token", token)
            .text("key", key.clone())
            .part(
                "file",
                reqwest::multipart::Part::bytes(bytes).file_name(file_name),
            );

        let response = self
            .http
            .post(&self.config.upload_url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| StorageError::Upload(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StorageError::Upload(format!("status {}: {}", status, body)));
        }

        let url = self.public_url(&key);
        info!("Uploaded {} bytes to {}", size, url);
        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn storage(access: &str, secret: &str) -> QiniuStorage {
        QiniuStorage::new(
            StorageConfig {
                access_key: access.to_string(),
                secret_key: secret.to_string(),
                bucket: "voice".to_string(),
                domain: "cdn.example.org".to_string(),
                ..StorageConfig::default()
            },
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[test]
    fn token_has_three_parts_and_encodes_policy() {
        let token = storage("ak", "sk").upload_token(1_700_000_000).unwrap();
        let parts: Vec<&str> = token.split(':').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "ak");

        let policy = URL_SAFE.decode(parts[2]).unwrap();
        let policy: serde_json::Value = serde_json::from_slice(&policy).unwrap();
        assert_eq!(policy["scope"], "voice");
        assert_eq!(policy["deadline"], 1_700_000_000i64);

        // HMAC-SHA1 digests are 20 bytes
        assert_eq!(URL_SAFE.decode(parts[1]).unwrap().len(), 20);
    }

    #[test]
    fn token_signature_depends_on_secret() {
        let a = storage("ak", "one").upload_token(1).unwrap();
        let b = storage("ak", "two").upload_token(1).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn missing_credentials_are_reported() {
        assert!(matches!(
            storage("", "sk").upload_token(1),
            Err(StorageError::MissingCredentials)
        ));
    }

    #[test]
    fn keys_and_urls() {
        let key = QiniuStorage::object_key("clip.wav", 42);
        assert_eq!(key, "asr/42_clip.wav");
        assert_eq!(
            storage("ak", "sk").public_url(&key),
            "https://cdn.example.org/asr/42_clip.wav"
        );
    }

    #[tokio::test]
    async fn upload_without_credentials_fails_fast() {
        let err = storage("", "")
            .upload(Path::new("/nonexistent.wav"))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::MissingCredentials));
    }
}
