use std::path::Path;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use tracing::{info, warn};

use super::context::{Intent, TaskPlan, TaskStep, VoiceResponse, WorkflowContext};
use super::prompts;
use crate::actions::{Executor, SecurityGate, DEFAULT_CLARIFY_MESSAGE};
use crate::asr::{PreparedAudio, SpeechRecognizer};
use crate::cloud::{ChatMessage, ChatModel, SpeechSynthesizer};
use crate::error::{AsrError, PipelineError, Stage};

/// Intents below this confidence are answered with a clarification request.
pub const CONFIDENCE_THRESHOLD: f64 = 0.5;

/// Runs the fixed seven-stage pipeline. Holds no per-request state.
pub struct Orchestrator {
    recognizer: Arc<dyn SpeechRecognizer>,
    chat: Arc<dyn ChatModel>,
    gate: Arc<SecurityGate>,
    executor: Arc<Executor>,
    synthesizer: Arc<dyn SpeechSynthesizer>,
}

impl Orchestrator {
    pub fn new(
        recognizer: Arc<dyn SpeechRecognizer>,
        chat: Arc<dyn ChatModel>,
        gate: Arc<SecurityGate>,
        executor: Arc<Executor>,
        synthesizer: Arc<dyn SpeechSynthesizer>,
    ) -> Self {
        Self {
            recognizer,
            chat,
            gate,
            executor,
            synthesizer,
        }
    }

    /// Full pipeline starting from an audio file.
    pub async fn run_from_audio(
        &self,
        audio_path: &Path,
        session_id: Option<String>,
    ) -> Result<VoiceResponse, PipelineError> {
        let mut ctx = WorkflowContext::new(session_id);
        ctx.audio_path = Some(audio_path.to_path_buf());
        info!("[{}] Starting voice workflow", ctx.session_id);

        self.recognize(&mut ctx).await?;
        self.run_stages(ctx).await
    }

    /// Pipeline starting from text, skipping recognition.
    pub async fn run_from_text(
        &self,
        text: &str,
        session_id: Option<String>,
    ) -> Result<VoiceResponse, PipelineError> {
        let mut ctx = WorkflowContext::new(session_id);
        ctx.recognized_text = text.trim().to_string();
        info!("[{}] Starting text workflow: {}", ctx.session_id, ctx.recognized_text);

        self.run_stages(ctx).await
    }

    async fn run_stages(&self, mut ctx: WorkflowContext) -> Result<VoiceResponse, PipelineError> {
        self.classify_intent(&mut ctx).await?;
        self.plan(&mut ctx).await?;
        self.apply_gate(&mut ctx);
        self.execute(&mut ctx).await;
        self.respond(&mut ctx).await;
        self.synthesize(&mut ctx).await;

        info!(
            "[{}] Workflow finished (success: {})",
            ctx.session_id, ctx.result.success
        );
        Ok(VoiceResponse::from(ctx))
    }

    async fn recognize(&self, ctx: &mut WorkflowContext) -> Result<(), PipelineError> {
        let Some(path) = ctx.audio_path.as_deref() else {
            return Err(PipelineError::new(
                Stage::Recognize,
                AsrError::NoRecognitionResult,
            ));
        };
        info!("[{}] Recognize: {}", ctx.session_id, path.display());

        let audio = PreparedAudio::load(path)
            .await
            .map_err(|e| PipelineError::new(Stage::Recognize, e))?;
        let text = self
            .recognizer
            .recognize(&audio)
            .await
            .map_err(|e| PipelineError::new(Stage::Recognize, e))?;

        info!("[{}] Recognized text: {}", ctx.session_id, text);
        ctx.recognized_text = text;
        Ok(())
    }

    async fn classify_intent(&self, ctx: &mut WorkflowContext) -> Result<(), PipelineError> {
        let messages = [
            ChatMessage::system(prompts::INTENT_SYSTEM),
            ChatMessage::user(ctx.recognized_text.clone()),
        ];
        let raw = self
            .chat
            .complete(&messages)
            .await
            .map_err(|e| PipelineError::new(Stage::ClassifyIntent, e))?;

        let mut intent = match parse_model_json::<Intent>(&raw) {
            Ok(intent) => intent,
            Err(e) => {
                warn!(
                    "[{}] Failed to parse intent JSON: {}, raw response: {}",
                    ctx.session_id, e, raw
                );
                Intent::unknown()
            }
        };
        intent.confidence = intent.confidence.clamp(0.0, 1.0);

        info!(
            "[{}] Intent: {} (confidence: {:.2})",
            ctx.session_id, intent.intent, intent.confidence
        );
        ctx.intent = Some(intent);
        Ok(())
    }

    async fn plan(&self, ctx: &mut WorkflowContext) -> Result<(), PipelineError> {
        let intent = ctx.intent.clone().unwrap_or_else(Intent::unknown);

        if intent.is_unknown() || intent.confidence < CONFIDENCE_THRESHOLD {
            info!("[{}] Plan: asking for clarification", ctx.session_id);
            ctx.plan = TaskPlan::single(
                TaskStep::new("clarify").with_param("message", DEFAULT_CLARIFY_MESSAGE),
            );
            return Ok(());
        }

        let intent_json = serde_json::to_string(&intent).unwrap_or_default();
        let messages = [
            ChatMessage::system(prompts::PLANNER_SYSTEM),
            ChatMessage::user(prompts::planner_user(&intent_json, &ctx.recognized_text)),
        ];
        let raw = self
            .chat
            .complete(&messages)
            .await
            .map_err(|e| PipelineError::new(Stage::Plan, e))?;

        ctx.plan = match parse_model_json::<TaskPlan>(&raw) {
            Ok(plan) if !plan.steps.is_empty() => plan,
            parsed => {
                let reason = parsed.err().map(|e| e.to_string()).unwrap_or_else(|| "no steps".into());
                warn!(
                    "[{}] Unusable task plan ({}), raw response: {}",
                    ctx.session_id, reason, raw
                );
                TaskPlan::single(TaskStep {
                    action: intent.intent.clone(),
                    parameters: intent.parameters.clone(),
                })
            }
        };

        info!("[{}] Plan: {} steps", ctx.session_id, ctx.plan.steps.len());
        Ok(())
    }

    /// Replaces the whole plan with one error step on the first violation.
    fn apply_gate(&self, ctx: &mut WorkflowContext) {
        let first_violation = ctx.plan.steps.iter().enumerate().find_map(|(i, step)| {
            self.gate
                .validate(step)
                .err()
                .map(|violation| (i, step.action.clone(), violation))
        });

        match first_violation {
            Some((i, action, violation)) => {
                warn!(
                    "[{}] Security check failed for step {} ({}): {}",
                    ctx.session_id, i, action, violation
                );
                ctx.plan = TaskPlan::single(
                    TaskStep::new("error")
                        .with_param("message", prompts::safety_refusal(&violation.reason)),
                );
            }
            None => info!("[{}] Gate: all steps allowed", ctx.session_id),
        }
    }

    async fn execute(&self, ctx: &mut WorkflowContext) {
        ctx.result = self.executor.execute(&ctx.plan).await;
        info!(
            "[{}] Execute: success={}",
            ctx.session_id, ctx.result.success
        );
    }

    async fn respond(&self, ctx: &mut WorkflowContext) {
        if !ctx.result.success {
            ctx.response_text = ctx.result.error_text().to_string();
            return;
        }

        let result_json = serde_json::to_string(&ctx.result).unwrap_or_default();
        let messages = [
            ChatMessage::system(prompts::RESPONSE_SYSTEM),
            ChatMessage::user(prompts::response_user(&ctx.recognized_text, &result_json)),
        ];

        ctx.response_text = match self.chat.complete(&messages).await {
            Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
            Ok(_) => {
                warn!("[{}] Empty response from model, using execution message", ctx.session_id);
                ctx.result.message.clone()
            }
            Err(e) => {
                warn!(
                    "[{}] Response generation failed: {}, using execution message",
                    ctx.session_id, e
                );
                ctx.result.message.clone()
            }
        };
        info!("[{}] Respond: {}", ctx.session_id, ctx.response_text);
    }

    /// Never fails the request; the response just goes out without audio.
    async fn synthesize(&self, ctx: &mut WorkflowContext) {
        if ctx.response_text.trim().is_empty() {
            return;
        }
        match self.synthesizer.synthesize(&ctx.response_text).await {
            Ok(url) => {
                info!("[{}] Synthesize: {}", ctx.session_id, url);
                ctx.response_audio = Some(url);
            }
            Err(e) => warn!(
                "[{}] TTS failed: {}, continuing without audio",
                ctx.session_id, e
            ),
        }
    }
}

/// Parse a JSON object the model was asked to emit, tolerating a
/// surrounding markdown code fence.
pub fn parse_model_json<T: DeserializeOwned>(raw: &str) -> Result<T, serde_json::Error> {
    let trimmed = raw.trim();
    let body = trimmed
        .strip_prefix("```")
        .map(|rest| {
            let rest = rest.strip_prefix("json").unwrap_or(rest);
            rest.strip_suffix("```").unwrap_or(rest)
        })
        .unwrap_or(trimmed);
    serde_json::from_str(body.trim())
}
