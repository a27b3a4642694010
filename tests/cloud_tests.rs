use anyhow::Result;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde_json::json;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use voicepilot::cloud::{BatchRecognizer, ChatMessage, ChatModel, ObjectStore, SpeechSynthesizer};
use voicepilot::config::StorageConfig;
use voicepilot::error::StorageError;
use voicepilot::{CloudClient, CloudError, CloudSettings, QiniuStorage};
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn settings(base_url: &str, static_dir: PathBuf) -> CloudSettings {
    CloudSettings {
        base_url: base_url.to_string(),
        api_key: "secret".to_string(),
        request_timeout: Duration::from_secs(5),
        llm_model: "test-llm".to_string(),
        max_tokens: 256,
        temperature: 0.2,
        voice_type: "female".to_string(),
        encoding: "mp3".to_string(),
        speed_ratio: 1.0,
        asr_model: "asr".to_string(),
        asr_format: "wav".to_string(),
        static_audio_path: static_dir,
    }
}

#[tokio::test]
async fn chat_sends_model_and_returns_first_choice() -> Result<()> {
    let server = MockServer::start().await;
    let dir = TempDir::new()?;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer secret"))
        .and(body_partial_json(json!({
            "model": "test-llm",
            "stream": false,
            "messages": [{"role": "system", "content": "sys"}, {"role": "user", "content": "你好"}]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{"message": {"role": "assistant", "content": "{\"intent\":\"chat\"}"}}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = CloudClient::new(settings(&server.uri(), dir.path().to_path_buf()))?;
    let reply = client
        .complete(&[ChatMessage::system("sys"), ChatMessage::user("你好")])
        .await?;
    assert_eq!(reply, "{\"intent\":\"chat\"}");
    Ok(())
}

#[tokio::test]
async fn chat_without_choices_is_missing_field() -> Result<()> {
    let server = MockServer::start().await;
    let dir = TempDir::new()?;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"choices": []})))
        .mount(&server)
        .await;

    let client = CloudClient::new(settings(&server.uri(), dir.path().to_path_buf()))?;
    let err = client.complete(&[ChatMessage::user("hi")]).await.unwrap_err();
    assert!(
        matches!(err, CloudError::MissingField { field: "choices", .. }),
        "{err:?}"
    );
    Ok(())
}

#[tokio::test]
async fn error_status_is_surfaced_with_body() -> Result<()> {
    let server = MockServer::start().await;
    let dir = TempDir::new()?;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(429).set_body_string("rate limited"))
        .mount(&server)
        .await;

    let client = CloudClient::new(settings(&server.uri(), dir.path().to_path_buf()))?;
    match client.complete(&[ChatMessage::user("hi")]).await {
        Err(CloudError::Status { status, body, .. }) => {
            assert_eq!(status, 429);
            assert_eq!(body, "rate limited");
        }
        other => panic!("expected status error, got {:?}", other),
    }
    Ok(())
}

#[tokio::test]
async fn tts_url_is_returned_as_is() -> Result<()> {
    let server = MockServer::start().await;
    let dir = TempDir::new()?;

    Mock::given(method("POST"))
        .and(path("/voice/tts"))
        .and(body_partial_json(json!({
            "audio": {"voice_type": "female", "encoding": "mp3"},
            "request": {"text": "好的"}
        })))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"url": "https://cdn/a.mp3"})),
        )
        .mount(&server)
        .await;

    let client = CloudClient::new(settings(&server.uri(), dir.path().to_path_buf()))?;
    assert_eq!(client.synthesize("好的").await?, "https://cdn/a.mp3");
    Ok(())
}

#[tokio::test]
async fn tts_base64_audio_is_saved_locally() -> Result<()> {
    let server = MockServer::start().await;
    let dir = TempDir::new()?;
    let audio = b"ID3 fake mp3 bytes".to_vec();

    Mock::given(method("POST"))
        .and(path("/voice/tts"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"data": STANDARD.encode(&audio)})),
        )
        .mount(&server)
        .await;

    let static_dir = dir.path().join("static");
    let client = CloudClient::new(settings(&server.uri(), static_dir.clone()))?;
    let url = client.synthesize("好的").await?;

    let file_name = url
        .strip_prefix("/static/audio/")
        .expect("served under the static audio route");
    assert!(file_name.starts_with("tts_"));
    assert!(file_name.ends_with(".mp3"));
    assert_eq!(std::fs::read(static_dir.join(file_name))?, audio);
    Ok(())
}

#[tokio::test]
async fn tts_without_audio_is_missing_field() -> Result<()> {
    let server = MockServer::start().await;
    let dir = TempDir::new()?;

    Mock::given(method("POST"))
        .and(path("/voice/tts"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"code": 0})))
        .mount(&server)
        .await;

    let client = CloudClient::new(settings(&server.uri(), dir.path().to_path_buf()))?;
    let err = client.synthesize("好的").await.unwrap_err();
    assert!(matches!(err, CloudError::MissingField { .. }), "{err:?}");
    Ok(())
}

#[tokio::test]
async fn batch_recognition_reads_nested_text() -> Result<()> {
    let server = MockServer::start().await;
    let dir = TempDir::new()?;

    Mock::given(method("POST"))
        .and(path("/voice/asr"))
        .and(body_partial_json(json!({
            "model": "asr",
            "audio": {"format": "wav", "url": "https://cdn/asr/1_a.wav"}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {"result": {"text": "播放周杰伦的歌"}}
        })))
        .mount(&server)
        .await;

    let client = CloudClient::new(settings(&server.uri(), dir.path().to_path_buf()))?;
    assert_eq!(
        client.recognize_url("https://cdn/asr/1_a.wav").await?,
        "播放周杰伦的歌"
    );
    Ok(())
}

#[tokio::test]
async fn storage_upload_posts_form_and_returns_public_url() -> Result<()> {
    let server = MockServer::start().await;
    let dir = TempDir::new()?;
    let file = dir.path().join("clip.wav");
    std::fs::write(&file, b"RIFF....WAVE")?;

    Mock::given(method("POST"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"key": "ignored"})))
        .expect(1)
        .mount(&server)
        .await;

    let storage = QiniuStorage::new(
        StorageConfig {
            access_key: "ak".to_string(),
            secret_key: "sk".to_string(),
            bucket: "voice".to_string(),
            domain: "cdn.example.org".to_string(),
            upload_url: format!("{}/", server.uri()),
        },
        Duration::from_secs(5),
    )?;

    let url = storage.upload(&file).await?;
    assert!(url.starts_with("https://cdn.example.org/asr/"), "{url}");
    assert!(url.ends_with("_clip.wav"), "{url}");

    let requests = server.received_requests().await.unwrap_or_default();
    let body = String::from_utf8_lossy(&requests[0].body);
    assert!(body.contains("name=\"token\""));
    assert!(body.contains("name=\"key\""));
    assert!(body.contains("filename=\"clip.wav\""));
    Ok(())
}

#[tokio::test]
async fn storage_upload_failure_is_reported() -> Result<()> {
    let server = MockServer::start().await;
    let dir = TempDir::new()?;
    let file = dir.path().join("clip.wav");
    std::fs::write(&file, b"RIFF")?;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(401).set_body_string("bad token"))
        .mount(&server)
        .await;

    let storage = QiniuStorage::new(
        StorageConfig {
            access_key: "ak".to_string(),
            secret_key: "sk".to_string(),
            upload_url: server.uri(),
            ..StorageConfig::default()
        },
        Duration::from_secs(5),
    )?;

    let err = storage.upload(&file).await.unwrap_err();
    assert!(err.to_string().contains("bad token"), "{err}");
    Ok(())
}

#[tokio::test]
async fn stalled_storage_upload_times_out() -> Result<()> {
    let server = MockServer::start().await;
    let dir = TempDir::new()?;
    let file = dir.path().join("clip.wav");
    std::fs::write(&file, b"RIFF")?;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(10)))
        .mount(&server)
        .await;

    let storage = QiniuStorage::new(
        StorageConfig {
            access_key: "ak".to_string(),
            secret_key: "sk".to_string(),
            upload_url: server.uri(),
            ..StorageConfig::default()
        },
        Duration::from_millis(300),
    )?;

    let started = Instant::now();
    let err = storage.upload(&file).await.unwrap_err();
    assert!(matches!(err, StorageError::Upload(_)), "{err:?}");
    assert!(started.elapsed() < Duration::from_secs(5));
    Ok(())
}
