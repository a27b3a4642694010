//! Typed actions, the security gate in front of them, and the dispatch
//! table that executes them.

pub mod executor;
pub mod security;

use serde_json::Value;
use std::fmt;
use thiserror::Error;

use crate::pipeline::{Parameters, TaskStep};

pub use executor::{ActionHandler, Executor};
pub use security::{SecurityGate, Violation};

pub const DEFAULT_CLARIFY_MESSAGE: &str = "抱歉，我没有理解您的意思，能否请您再说一遍？";
pub const DEFAULT_ERROR_MESSAGE: &str = "执行过程中发生错误";

/// Discriminant used to key the dispatch table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    OpenApp,
    PlayMusic,
    ExecuteCommand,
    GenerateText,
    Clarify,
    Error,
}

impl ActionKind {
    pub const ALL: [ActionKind; 6] = [
        ActionKind::OpenApp,
        ActionKind::PlayMusic,
        ActionKind::ExecuteCommand,
        ActionKind::GenerateText,
        ActionKind::Clarify,
        ActionKind::Error,
    ];

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "open_app" => Some(ActionKind::OpenApp),
            "play_music" => Some(ActionKind::PlayMusic),
            "execute_command" => Some(ActionKind::ExecuteCommand),
            "generate_text" | "write_article" => Some(ActionKind::GenerateText),
            "clarify" => Some(ActionKind::Clarify),
            "error" => Some(ActionKind::Error),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ActionKind::OpenApp => "open_app",
            ActionKind::PlayMusic => "play_music",
            ActionKind::ExecuteCommand => "execute_command",
            ActionKind::GenerateText => "generate_text",
            ActionKind::Clarify => "clarify",
            ActionKind::Error => "error",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A plan step with its parameters checked and typed.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    OpenApp {
        name: String,
    },
    PlayMusic {
        song: String,
    },
    ExecuteCommand {
        command: String,
    },
    GenerateText {
        topic: String,
        length: String,
        content_type: String,
    },
    Clarify {
        message: String,
    },
    Error {
        message: String,
    },
}

/// Why a step could not be turned into an [`Action`].
///
/// Display strings are shown to the end user.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ActionError {
    #[error("未知的操作类型：{0}")]
    UnknownAction(String),

    #[error("{message}")]
    InvalidParameter {
        kind: ActionKind,
        message: &'static str,
    },
}

impl Action {
    pub fn kind(&self) -> ActionKind {
        match self {
            Action::OpenApp { .. } => ActionKind::OpenApp,
            Action::PlayMusic { .. } => ActionKind::PlayMusic,
            Action::ExecuteCommand { .. } => ActionKind::ExecuteCommand,
            Action::GenerateText { .. } => ActionKind::GenerateText,
            Action::Clarify { .. } => ActionKind::Clarify,
            Action::Error { .. } => ActionKind::Error,
        }
    }

    pub fn from_step(step: &TaskStep) -> Result<Self, ActionError> {
        let kind = ActionKind::from_name(&step.action)
            .ok_or_else(|| ActionError::UnknownAction(step.action.clone()))?;
        let params = &step.parameters;
        let missing = |message| ActionError::InvalidParameter { kind, message };

        Ok(match kind {
            ActionKind::OpenApp => Action::OpenApp {
                name: param(params, &["name", "app", "app_name"])
                    .ok_or_else(|| missing("缺少应用程序名称参数"))?,
            },
            ActionKind::PlayMusic => Action::PlayMusic {
                song: param(params, &["song", "song_name", "name"])
                    .ok_or_else(|| missing("缺少歌曲名称参数"))?,
            },
            ActionKind::ExecuteCommand => Action::ExecuteCommand {
                command: param(params, &["command"]).ok_or_else(|| missing("缺少命令参数"))?,
            },
            ActionKind::GenerateText => Action::GenerateText {
                topic: param(params, &["topic", "content", "subject"])
                    .ok_or_else(|| missing("缺少主题参数"))?,
                length: param(params, &["length"]).unwrap_or_else(|| "适中".to_string()),
                content_type: param(params, &["content_type"])
                    .unwrap_or_else(|| "文章".to_string()),
            },
            ActionKind::Clarify => Action::Clarify {
                message: param(params, &["message"])
                    .unwrap_or_else(|| DEFAULT_CLARIFY_MESSAGE.to_string()),
            },
            ActionKind::Error => Action::Error {
                message: param(params, &["message"])
                    .unwrap_or_else(|| DEFAULT_ERROR_MESSAGE.to_string()),
            },
        })
    }
}

/// First non-empty scalar among `keys`, rendered as a string.
fn param(params: &Parameters, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match params.get(*key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    })
}
