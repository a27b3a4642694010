use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::PathBuf;

/// String-keyed parameters as produced by the chat model.
pub type Parameters = Map<String, Value>;

/// Structured intent parsed from the user's utterance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Intent {
    pub intent: String,
    #[serde(default)]
    pub parameters: Parameters,
    #[serde(default)]
    pub confidence: f64,
}

impl Intent {
    pub const UNKNOWN: &'static str = "unknown";

    pub fn unknown() -> Self {
        Self {
            intent: Self::UNKNOWN.to_string(),
            parameters: Parameters::new(),
            confidence: 0.0,
        }
    }

    pub fn is_unknown(&self) -> bool {
        self.intent == Self::UNKNOWN
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStep {
    pub action: String,
    #[serde(default)]
    pub parameters: Parameters,
}

impl TaskStep {
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            parameters: Parameters::new(),
        }
    }

    pub fn with_param(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.parameters.insert(key.to_string(), value.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TaskPlan {
    #[serde(default)]
    pub steps: Vec<TaskStep>,
}

impl TaskPlan {
    pub fn single(step: TaskStep) -> Self {
        Self { steps: vec![step] }
    }
}

/// Outcome of executing one step or a whole plan.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExecutionResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            ..Default::default()
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }

    pub fn with_data(mut self, data: impl Into<Value>) -> Self {
        self.data = Some(data.into());
        self
    }

    pub fn error_text(&self) -> &str {
        self.error.as_deref().unwrap_or_default()
    }
}

/// Mutable per-request state threaded through the pipeline stages.
#[derive(Debug, Clone, Default)]
pub struct WorkflowContext {
    pub session_id: String,
    pub audio_path: Option<PathBuf>,
    pub recognized_text: String,
    pub intent: Option<Intent>,
    pub plan: TaskPlan,
    pub result: ExecutionResult,
    pub response_text: String,
    pub response_audio: Option<String>,
}

impl WorkflowContext {
    /// Use the caller's session id or generate one.
    pub fn new(session_id: Option<String>) -> Self {
        let session_id = session_id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| format!("session-{}", uuid::Uuid::new_v4()));
        Self {
            session_id,
            ..Default::default()
        }
    }
}

/// What the pipeline hands back to its caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoiceResponse {
    pub recognized_text: String,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_url: Option<String>,
    pub session_id: String,
    /// Classified intent name, absent when recognition failed first
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent: Option<String>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<WorkflowContext> for VoiceResponse {
    fn from(ctx: WorkflowContext) -> Self {
        let error = ctx.result.error.clone().filter(|_| !ctx.result.success);
        Self {
            recognized_text: ctx.recognized_text,
            text: ctx.response_text,
            audio_url: ctx.response_audio,
            session_id: ctx.session_id,
            intent: ctx.intent.map(|i| i.intent),
            success: ctx.result.success,
            error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intent_defaults_missing_fields() {
        let intent: Intent = serde_json::from_str(r#"{"intent":"open_app"}"#).unwrap();
        assert_eq!(intent.intent, "open_app");
        assert!(intent.parameters.is_empty());
        assert_eq!(intent.confidence, 0.0);
    }

    #[test]
    fn generated_session_ids_are_unique() {
        let a = WorkflowContext::new(None);
        let b = WorkflowContext::new(Some("  ".to_string()));
        assert!(a.session_id.starts_with("session-"));
        assert_ne!(a.session_id, b.session_id);
        assert_eq!(WorkflowContext::new(Some("s1".into())).session_id, "s1");
    }

    #[test]
    fn response_carries_error_only_on_failure() {
        let mut ctx = WorkflowContext::new(Some("s".into()));
        ctx.result = ExecutionResult::failed("boom");
        ctx.response_text = "boom".into();
        let resp = VoiceResponse::from(ctx);
        assert!(!resp.success);
        assert_eq!(resp.error.as_deref(), Some("boom"));
    }
}
