use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{info, warn};

use super::{Action, ActionError, ActionKind};
use crate::cloud::{ChatMessage, ChatModel};
use crate::pipeline::{ExecutionResult, TaskPlan};

/// Performs one kind of action.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    async fn handle(&self, action: &Action) -> ExecutionResult;
}

/// Dispatch table from action kind to handler, fixed at construction.
pub struct Executor {
    handlers: HashMap<ActionKind, Arc<dyn ActionHandler>>,
}

impl Executor {
    /// An executor with no handlers; every step reports an unknown action.
    pub fn empty() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// All built-in handlers, using `chat` for text generation.
    pub fn with_builtin(chat: Arc<dyn ChatModel>) -> Self {
        Self::empty()
            .with_handler(ActionKind::OpenApp, Arc::new(OpenApp))
            .with_handler(ActionKind::PlayMusic, Arc::new(PlayMusic))
            .with_handler(ActionKind::ExecuteCommand, Arc::new(RunCommand))
            .with_handler(ActionKind::GenerateText, Arc::new(GenerateText { chat }))
            .with_handler(ActionKind::Clarify, Arc::new(Reply))
            .with_handler(ActionKind::Error, Arc::new(Reply))
    }

    pub fn with_handler(mut self, kind: ActionKind, handler: Arc<dyn ActionHandler>) -> Self {
        self.handlers.insert(kind, handler);
        self
    }

    pub fn handles(&self, kind: ActionKind) -> bool {
        self.handlers.contains_key(&kind)
    }

    /// Run steps in order, stopping at the first failure.
    pub async fn execute(&self, plan: &TaskPlan) -> ExecutionResult {
        info!("Executing task plan with {} steps", plan.steps.len());

        let mut messages = Vec::new();
        for (i, step) in plan.steps.iter().enumerate() {
            info!("Executing step {}: {}", i + 1, step.action);

            let action = match Action::from_step(step) {
                Ok(action) => action,
                Err(e) => return ExecutionResult::failed(e.to_string()),
            };

            let Some(handler) = self.handlers.get(&action.kind()) else {
                return ExecutionResult::failed(
                    ActionError::UnknownAction(step.action.clone()).to_string(),
                );
            };

            let result = handler.handle(&action).await;
            if !result.success {
                warn!("Step {} ({}) failed: {}", i + 1, step.action, result.error_text());
                return result;
            }
            if !result.message.is_empty() {
                messages.push(result.message);
            }
        }

        ExecutionResult::ok(messages.join("\n"))
    }
}

async fn spawn_status(program: &str, args: &[&str]) -> Result<(), String> {
    let output = Command::new(program)
        .args(args)
        .output()
        .await
        .map_err(|e| format!("{}: {}", program, e))?;
    if output.status.success() {
        Ok(())
    } else {
        Err(format!(
            "{} exited with {}: {}",
            program,
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        ))
    }
}

/// Hand a URL or file to the desktop's default opener.
async fn open_with_default(target: &str) -> Result<(), String> {
    if cfg!(target_os = "macos") {
        spawn_status("open", &[target]).await
    } else if cfg!(target_os = "windows") {
        spawn_status("cmd", &["/c", "start", target]).await
    } else {
        spawn_status("xdg-open", &[target]).await
    }
}

struct OpenApp;

#[async_trait]
impl ActionHandler for OpenApp {
    async fn handle(&self, action: &Action) -> ExecutionResult {
        let Action::OpenApp { name } = action else {
            return ExecutionResult::failed("缺少应用程序名称参数");
        };
        info!("Opening application: {}", name);

        let result = if cfg!(target_os = "macos") {
            spawn_status("open", &["-a", name.as_str()]).await
        } else if cfg!(target_os = "windows") {
            spawn_status("cmd", &["/c", "start", name.as_str()]).await
        } else {
            spawn_status("xdg-open", &[name.as_str()]).await
        };

        match result {
            Ok(()) => ExecutionResult::ok(format!("已打开应用程序：{}", name)),
            Err(e) => ExecutionResult::failed(format!("打开应用程序失败：{}", e)),
        }
    }
}

/// Web search URL used where the desktop client cannot be scripted.
pub fn netease_search_url(song: &str) -> String {
    format!(
        "https://music.163.com/#/search/m/?s={}",
        urlencoding::encode(song)
    )
}

fn netease_search_script(song: &str) -> String {
    let escaped = song.replace('\\', "\\\\").replace('"', "\\\"");
    format!(
        r#"tell application "NeteaseMusic" to activate
delay 1.5
set the clipboard to "{escaped}"
tell application "System Events"
    keystroke "f" using command down
    delay 0.5
    keystroke "v" using command down
    delay 0.5
    keystroke return
end tell"#
    )
}

struct PlayMusic;

#[async_trait]
impl ActionHandler for PlayMusic {
    async fn handle(&self, action: &Action) -> ExecutionResult {
        let Action::PlayMusic { song } = action else {
            return ExecutionResult::failed("缺少歌曲名称参数");
        };
        info!("Searching NetEase Music for: {}", song);

        if cfg!(target_os = "macos") {
            let script = netease_search_script(song);
            return match spawn_status("osascript", &["-e", script.as_str()]).await {
                Ok(()) => ExecutionResult::ok(format!("已在网易云音乐中搜索：{}", song))
                    .with_data(song.clone()),
                Err(e) => ExecutionResult::failed(format!("无法在网易云音乐中搜索：{}", e)),
            };
        }

        match open_with_default(&netease_search_url(song)).await {
            Ok(()) => ExecutionResult::ok(format!("已为您打开网易云音乐搜索：{}", song))
                .with_data(song.clone()),
            Err(e) => ExecutionResult::failed(format!("无法打开网易云音乐搜索：{}", e)),
        }
    }
}

/// Runs a command directly, never through a shell.
struct RunCommand;

#[async_trait]
impl ActionHandler for RunCommand {
    async fn handle(&self, action: &Action) -> ExecutionResult {
        let Action::ExecuteCommand { command } = action else {
            return ExecutionResult::failed("缺少命令参数");
        };
        let mut parts = command.split_whitespace();
        let Some(program) = parts.next() else {
            return ExecutionResult::failed("命令为空");
        };
        info!("Executing command: {}", command);

        match Command::new(program).args(parts).output().await {
            Ok(output) if output.status.success() => ExecutionResult::ok("命令执行成功")
                .with_data(String::from_utf8_lossy(&output.stdout).into_owned()),
            Ok(output) => {
                let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
                combined.push_str(&String::from_utf8_lossy(&output.stderr));
                ExecutionResult::failed(format!(
                    "命令执行失败：{}\n输出：{}",
                    output.status, combined
                ))
            }
            Err(e) => ExecutionResult::failed(format!("命令执行失败：{}", e)),
        }
    }
}

struct GenerateText {
    chat: Arc<dyn ChatModel>,
}

#[async_trait]
impl ActionHandler for GenerateText {
    async fn handle(&self, action: &Action) -> ExecutionResult {
        let Action::GenerateText {
            topic,
            length,
            content_type,
        } = action
        else {
            return ExecutionResult::failed("缺少主题参数");
        };
        info!("Generating text for topic: {}", topic);

        let messages = [
            ChatMessage::system("你是一个专业的内容创作助手。请根据用户的要求生成高质量的文本内容。"),
            ChatMessage::user(format!(
                "请写一篇关于「{}」的{}，长度要求：{}。",
                topic, content_type, length
            )),
        ];

        match self.chat.complete(&messages).await {
            Ok(text) => ExecutionResult::ok(text.clone()).with_data(text),
            Err(e) => {
                warn!("Text generation failed: {}", e);
                ExecutionResult::failed(format!("文本生成失败：{}", e))
            }
        }
    }
}

/// Clarify succeeds with its message; error fails with it.
struct Reply;

#[async_trait]
impl ActionHandler for Reply {
    async fn handle(&self, action: &Action) -> ExecutionResult {
        match action {
            Action::Clarify { message } => ExecutionResult::ok(message.clone()),
            Action::Error { message } => ExecutionResult::failed(message.clone()),
            other => ExecutionResult::failed(format!("未知的操作类型：{}", other.kind())),
        }
    }
}
