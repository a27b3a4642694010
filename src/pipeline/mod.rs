//! The fixed request pipeline: recognize, classify intent, plan, gate,
//! execute, respond, synthesize.

pub mod context;
pub mod orchestrator;
pub mod prompts;

pub use context::{
    ExecutionResult, Intent, Parameters, TaskPlan, TaskStep, VoiceResponse, WorkflowContext,
};
pub use orchestrator::{parse_model_json, Orchestrator, CONFIDENCE_THRESHOLD};
