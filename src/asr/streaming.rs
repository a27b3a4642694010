use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use super::audio::{PreparedAudio, TARGET_SAMPLE_RATE};
use super::frame::{audio_chunks, Compression, Frame, MessageType};
use super::SpeechRecognizer;
use crate::cloud::extract::{extract_text, STREAMING_TEXT_RULES};
use crate::error::AsrError;

/// 0.2s of 16-bit mono PCM at 16kHz.
pub const AUDIO_CHUNK_SIZE: usize = 3200;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// How end-of-audio is signalled to the recognizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndOfStream {
    /// Send a WebSocket close frame after the last chunk.
    Close,
    /// Flag the last chunk as final and negate its sequence number.
    NegativeSequence,
}

/// Protocol knobs where observed recognizer deployments disagree.
#[derive(Debug, Clone)]
pub struct ProtocolCompat {
    pub gzip_config: bool,
    pub first_sequence: i32,
    pub end_of_stream: EndOfStream,
}

impl Default for ProtocolCompat {
    fn default() -> Self {
        Self {
            gzip_config: false,
            first_sequence: 1,
            end_of_stream: EndOfStream::Close,
        }
    }
}

/// Configuration for one streaming recognizer
#[derive(Debug, Clone)]
pub struct StreamingConfig {
    pub url: String,
    pub api_key: String,
    pub model_name: String,
    pub enable_punctuation: bool,
    pub chunk_size: usize,
    /// Delay between audio chunks
    pub pacing: Duration,
    pub handshake_timeout: Duration,
    /// Hard limit on waiting for the final result
    pub result_timeout: Duration,
    pub compat: ProtocolCompat,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            url: "wss://openai.qiniu.com/v1/voice/asr".to_string(),
            api_key: String::new(),
            model_name: "asr".to_string(),
            enable_punctuation: true,
            chunk_size: AUDIO_CHUNK_SIZE,
            pacing: Duration::from_millis(100),
            handshake_timeout: Duration::from_secs(10),
            result_timeout: Duration::from_secs(30),
            compat: ProtocolCompat::default(),
        }
    }
}

#[derive(Debug, Serialize)]
struct SessionRequest<'a> {
    user: UserInfo,
    audio: AudioParams,
    request: RecognitionOptions<'a>,
}

#[derive(Debug, Serialize)]
struct UserInfo {
    uid: String,
}

#[derive(Debug, Serialize)]
struct AudioParams {
    format: &'static str,
    sample_rate: u32,
    bits: u16,
    channel: u16,
    codec: &'static str,
}

#[derive(Debug, Serialize)]
struct RecognitionOptions<'a> {
    model_name: &'a str,
    enable_punc: bool,
}

/// Lifecycle of one streaming attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Open,
    ClosedNormal,
    ClosedError,
    TimedOut,
}

/// Recognizer that drives the duplex framed protocol.
pub struct StreamingRecognizer {
    config: StreamingConfig,
}

impl StreamingRecognizer {
    pub fn new(config: StreamingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &StreamingConfig {
        &self.config
    }

    /// Open the connection and run one session over the given PCM.
    pub async fn recognize_pcm(&self, pcm: &[u8]) -> Result<String, AsrError> {
        let mut request = self.config.url.as_str().into_client_request()?;
        if !self.config.api_key.is_empty() {
            let value = HeaderValue::from_str(&format!("Bearer {}", self.config.api_key))
                .map_err(|e| AsrError::Transport(format!("invalid api key header: {e}")))?;
            request.headers_mut().insert("Authorization", value);
        }

        let (stream, _) = tokio::time::timeout(
            self.config.handshake_timeout,
            tokio_tungstenite::connect_async(request),
        )
        .await
        .map_err(|_| AsrError::Timeout(self.config.handshake_timeout))??;

        info!("Streaming ASR connection established: {}", self.config.url);

        let mut session = StreamingSession::new(stream, &self.config);
        let result = session.run(pcm).await;
        debug!("Streaming session ended in state {:?}", session.state());
        result
    }
}

#[async_trait]
impl SpeechRecognizer for StreamingRecognizer {
    fn name(&self) -> &'static str {
        "streaming"
    }

    async fn recognize(&self, audio: &PreparedAudio) -> Result<String, AsrError> {
        let pcm = audio.pcm();
        info!("Streaming {} bytes of PCM", pcm.len());
        self.recognize_pcm(pcm).await
    }
}

/// One recognition attempt bound to one open connection.
pub struct StreamingSession<'a> {
    stream: Option<WsStream>,
    config: &'a StreamingConfig,
    next_sequence: i32,
    state: SessionState,
}

impl<'a> StreamingSession<'a> {
    pub fn new(stream: WsStream, config: &'a StreamingConfig) -> Self {
        Self {
            stream: Some(stream),
            config,
            next_sequence: config.compat.first_sequence,
            state: SessionState::Open,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Handshake, upload, and wait for the final text.
    pub async fn run(&mut self, pcm: &[u8]) -> Result<String, AsrError> {
        let result = self.drive(pcm).await;
        self.state = match &result {
            Ok(_) => SessionState::ClosedNormal,
            Err(AsrError::Timeout(_)) => SessionState::TimedOut,
            Err(_) => SessionState::ClosedError,
        };
        result
    }

    async fn drive(&mut self, pcm: &[u8]) -> Result<String, AsrError> {
        let stream = self
            .stream
            .take()
            .ok_or_else(|| AsrError::Transport("session already used".to_string()))?;
        let (mut sink, mut source) = stream.split();

        self.send_config(&mut sink).await?;
        self.await_config_ack(&mut source).await?;

        let (outcome_tx, outcome_rx) = oneshot::channel();
        let reader = tokio::spawn(read_results(source, outcome_tx));

        // One deadline covers the upload and the wait, so a peer that stops
        // reading cannot stall the send loop past it.
        let budget = time_budget(self.config, pcm.len());
        let exchange = async {
            self.send_audio(&mut sink, pcm).await?;
            outcome_rx.await.unwrap_or_else(|_| {
                Err(AsrError::Transport(
                    "result reader stopped without an outcome".to_string(),
                ))
            })
        };
        let outcome = match tokio::time::timeout(budget, exchange).await {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!("No recognition result within {:?}", budget);
                Err(AsrError::Timeout(budget))
            }
        };
        reader.abort();

        match outcome {
            Ok(text) if text.is_empty() => Err(AsrError::NoRecognitionResult),
            other => other,
        }
    }

    async fn send_config(
        &mut self,
        sink: &mut SplitSink<WsStream, Message>,
    ) -> Result<(), AsrError> {
        let request = SessionRequest {
            user: UserInfo {
                uid: uuid::Uuid::new_v4().to_string(),
            },
            audio: AudioParams {
                format: "pcm",
                sample_rate: TARGET_SAMPLE_RATE,
                bits: 16,
                channel: 1,
                codec: "raw",
            },
            request: RecognitionOptions {
                model_name: &self.config.model_name,
                enable_punc: self.config.enable_punctuation,
            },
        };
        let json = serde_json::to_vec(&request)
            .map_err(|e| AsrError::Transport(format!("serialize config: {e}")))?;

        let compression = if self.config.compat.gzip_config {
            Compression::Gzip
        } else {
            Compression::None
        };
        let frame = Frame::full_client_request(json, compression).encode()?;
        sink.send(Message::Binary(frame)).await?;
        debug!("Configuration frame sent");
        Ok(())
    }

    async fn await_config_ack(
        &mut self,
        source: &mut SplitStream<WsStream>,
    ) -> Result<(), AsrError> {
        let timeout = self.config.result_timeout;
        let ack = tokio::time::timeout(timeout, next_binary(source))
            .await
            .map_err(|_| AsrError::Timeout(timeout))??;

        let frame = Frame::decode(&ack)?;
        if frame.message_type == MessageType::Error {
            return Err(AsrError::Rejected(
                String::from_utf8_lossy(&frame.payload).into_owned(),
            ));
        }
        debug!("Configuration acknowledged ({:?})", frame.message_type);
        Ok(())
    }

    async fn send_audio(
        &mut self,
        sink: &mut SplitSink<WsStream, Message>,
        pcm: &[u8],
    ) -> Result<(), AsrError> {
        let chunks: Vec<_> =
            audio_chunks(pcm, self.config.chunk_size, self.next_sequence).collect();
        let total = chunks.len();
        let negative_end = self.config.compat.end_of_stream == EndOfStream::NegativeSequence;

        for (i, (sequence, chunk)) in chunks.into_iter().enumerate() {
            let is_last = i + 1 == total;
            let frame = if is_last && negative_end {
                Frame::audio_only(-sequence, chunk).into_last()
            } else {
                Frame::audio_only(sequence, chunk)
            };
            debug!("Sending audio chunk seq={} ({} bytes)", sequence, chunk.len());
            sink.send(Message::Binary(frame.encode()?)).await?;
            self.next_sequence = sequence + 1;

            if !is_last && !self.config.pacing.is_zero() {
                tokio::time::sleep(self.config.pacing).await;
            }
        }

        info!("All {} audio chunks sent", total);

        if self.config.compat.end_of_stream == EndOfStream::Close || total == 0 {
            sink.send(Message::Close(Some(CloseFrame {
                code: CloseCode::Normal,
                reason: "".into(),
            })))
            .await?;
        }
        Ok(())
    }
}

/// Result timeout plus the time pacing alone adds to the upload.
fn time_budget(config: &StreamingConfig, pcm_len: usize) -> Duration {
    let chunks = pcm_len.div_ceil(config.chunk_size.max(1));
    let pauses = u32::try_from(chunks.saturating_sub(1)).unwrap_or(u32::MAX);
    config
        .result_timeout
        .saturating_add(config.pacing.saturating_mul(pauses))
}

async fn next_binary(source: &mut SplitStream<WsStream>) -> Result<Vec<u8>, AsrError> {
    loop {
        match source.next().await {
            Some(Ok(Message::Binary(data))) => return Ok(data),
            Some(Ok(Message::Close(frame))) => {
                return Err(AsrError::Transport(format!(
                    "connection closed during handshake: {:?}",
                    frame
                )))
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(e.into()),
            None => {
                return Err(AsrError::Transport(
                    "connection closed during handshake".to_string(),
                ))
            }
        }
    }
}

/// Consumer side of the session: read frames until the connection closes,
/// keeping the latest non-empty recognized text.
async fn read_results(
    mut source: SplitStream<WsStream>,
    outcome_tx: oneshot::Sender<Result<String, AsrError>>,
) {
    let mut text = String::new();

    let outcome = loop {
        match source.next().await {
            Some(Ok(Message::Binary(data))) => {
                let frame = match Frame::decode(&data) {
                    Ok(frame) => frame,
                    Err(e) => break Err(AsrError::Protocol(e)),
                };
                match frame.message_type {
                    MessageType::FullServiceResponse => {
                        if let Some(latest) = parse_result_text(&frame.payload) {
                            info!("Recognized text: {}", latest);
                            text = latest;
                        }
                    }
                    MessageType::Error => {
                        break Err(AsrError::Rejected(
                            String::from_utf8_lossy(&frame.payload).into_owned(),
                        ))
                    }
                    other => debug!("Ignoring {:?} frame from recognizer", other),
                }
            }
            Some(Ok(Message::Close(frame))) => match frame {
                None => break Ok(text),
                Some(f) if matches!(f.code, CloseCode::Normal | CloseCode::Away) => {
                    break Ok(text)
                }
                Some(f) => {
                    break Err(AsrError::Transport(format!(
                        "connection closed with {}: {}",
                        f.code, f.reason
                    )))
                }
            },
            Some(Ok(_)) => continue,
            Some(Err(WsError::ConnectionClosed)) | None => break Ok(text),
            Some(Err(e)) => break Err(AsrError::Transport(format!("read failed: {e}"))),
        }
    };

    if matches!(&outcome, Ok(t) if t.is_empty()) {
        debug!("Recognizer closed without text");
    }
    let _ = outcome_tx.send(outcome);
}

/// Pull the recognized text out of a response payload, if any.
pub fn parse_result_text(payload: &[u8]) -> Option<String> {
    let value: serde_json::Value = serde_json::from_slice(payload).ok()?;
    extract_text(&value, STREAMING_TEXT_RULES)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_top_level_result_text() {
        let payload = br#"{"code":0,"result":{"text":"hello"}}"#;
        assert_eq!(parse_result_text(payload).as_deref(), Some("hello"));
    }

    #[test]
    fn extracts_nested_data_result_text() {
        let payload = br#"{"data":{"result":{"text":"nested"}}}"#;
        assert_eq!(parse_result_text(payload).as_deref(), Some("nested"));
    }

    #[test]
    fn empty_or_invalid_payloads_yield_nothing() {
        assert_eq!(parse_result_text(br#"{"result":{"text":""}}"#), None);
        assert_eq!(parse_result_text(b"not json"), None);
    }

    #[test]
    fn budget_grows_with_paced_chunks() {
        let config = StreamingConfig::default();
        assert_eq!(time_budget(&config, 0), Duration::from_secs(30));
        assert_eq!(time_budget(&config, 3200), Duration::from_secs(30));
        // 4 chunks, 3 pauses of 100ms
        assert_eq!(time_budget(&config, 3201 + 6400), Duration::from_millis(30_300));

        let unpaced = StreamingConfig {
            pacing: Duration::ZERO,
            ..StreamingConfig::default()
        };
        assert_eq!(time_budget(&unpaced, 10 << 20), Duration::from_secs(30));
    }

    #[test]
    fn default_config_matches_canonical_protocol() {
        let config = StreamingConfig::default();
        assert_eq!(config.chunk_size, 3200);
        assert_eq!(config.pacing, Duration::from_millis(100));
        assert_eq!(config.result_timeout, Duration::from_secs(30));
        assert!(!config.compat.gzip_config);
        assert_eq!(config.compat.first_sequence, 1);
        assert_eq!(config.compat.end_of_stream, EndOfStream::Close);
    }
}
