use std::collections::HashSet;

use thiserror::Error;
use tracing::{info, warn};

use super::{Action, ActionKind};
use crate::pipeline::TaskStep;

const DANGEROUS_KEYWORDS: &[&str] = &[
    "rm -rf", "del", "format", "shutdown", "reboot", "kill", "pkill", "killall", "sudo", "su",
    "chmod", "chown", "dd if=", "mkfs", "> /dev/", "curl", "wget", "passwd", "useradd",
    "userdel",
];

/// A refused step. The reason is shown to the user.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{reason}")]
pub struct Violation {
    pub reason: String,
}

impl Violation {
    fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Validates plan steps before anything is executed.
#[derive(Debug, Clone)]
pub struct SecurityGate {
    safe_mode: bool,
    disabled: HashSet<ActionKind>,
    dangerous_keywords: Vec<String>,
}

impl SecurityGate {
    pub fn new(safe_mode: bool) -> Self {
        Self {
            safe_mode,
            disabled: HashSet::new(),
            dangerous_keywords: DANGEROUS_KEYWORDS.iter().map(|k| k.to_string()).collect(),
        }
    }

    pub fn safe_mode(&self) -> bool {
        self.safe_mode
    }

    pub fn add_dangerous_keyword(&mut self, keyword: impl Into<String>) {
        let keyword = keyword.into();
        info!("Added dangerous keyword: {}", keyword);
        self.dangerous_keywords.push(keyword);
    }

    pub fn disable_action(&mut self, kind: ActionKind) {
        info!("Disabled action: {}", kind);
        self.disabled.insert(kind);
    }

    pub fn enable_action(&mut self, kind: ActionKind) {
        self.disabled.remove(&kind);
    }

    /// Check one step, returning its typed form when it is allowed.
    pub fn validate(&self, step: &TaskStep) -> Result<Action, Violation> {
        info!("Security check for action: {}", step.action);

        let kind = ActionKind::from_name(&step.action)
            .ok_or_else(|| Violation::new(format!("未知的操作类型：{}", step.action)))?;

        if self.safe_mode && kind == ActionKind::ExecuteCommand {
            return Err(Violation::new("在安全模式下不允许执行系统命令"));
        }
        if self.disabled.contains(&kind) {
            return Err(Violation::new(format!("操作 {} 已被禁用", kind)));
        }

        let action = Action::from_step(step).map_err(|e| Violation::new(e.to_string()))?;
        self.check(&action)?;
        Ok(action)
    }

    /// Content checks on an already typed action.
    pub fn check(&self, action: &Action) -> Result<(), Violation> {
        match action {
            Action::ExecuteCommand { command } => self.check_command(command),
            Action::OpenApp { name } => check_app_name(name),
            _ => Ok(()),
        }
    }

    fn check_command(&self, command: &str) -> Result<(), Violation> {
        let lowered = command.to_lowercase();

        for keyword in &self.dangerous_keywords {
            if lowered.contains(&keyword.to_lowercase()) {
                warn!("Blocked dangerous command: {} (keyword: {})", command, keyword);
                return Err(Violation::new(format!("命令包含危险关键字：{}", keyword)));
            }
        }
        if lowered.contains("..") {
            return Err(Violation::new("命令包含危险路径模式"));
        }
        if lowered.contains('|') || lowered.contains(';') || lowered.contains("&&") {
            return Err(Violation::new("不允许使用管道或命令链"));
        }
        Ok(())
    }
}

impl Default for SecurityGate {
    fn default() -> Self {
        Self::new(true)
    }
}

fn check_app_name(name: &str) -> Result<(), Violation> {
    if name.contains("..") || name.contains('/') || name.contains('\\') {
        return Err(Violation::new("应用程序名称包含非法字符"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command(cmd: &str) -> TaskStep {
        TaskStep::new("execute_command").with_param("command", cmd)
    }

    #[test]
    fn safe_mode_forbids_commands() {
        let gate = SecurityGate::new(true);
        let err = gate.validate(&command("ls")).unwrap_err();
        assert_eq!(err.reason, "在安全模式下不允许执行系统命令");
    }

    #[test]
    fn unsafe_mode_allows_plain_commands() {
        let gate = SecurityGate::new(false);
        assert_eq!(
            gate.validate(&command("ls -la")).unwrap(),
            Action::ExecuteCommand {
                command: "ls -la".to_string()
            }
        );
    }

    #[test]
    fn dangerous_keywords_are_case_insensitive() {
        let gate = SecurityGate::new(false);
        let err = gate.validate(&command("SUDO ls")).unwrap_err();
        assert!(err.reason.contains("sudo"), "{}", err.reason);
        assert!(gate.validate(&command("rm -rf /tmp/x")).is_err());
    }

    #[test]
    fn chaining_and_traversal_are_refused() {
        let gate = SecurityGate::new(false);
        assert_eq!(
            gate.validate(&command("ls ../secret")).unwrap_err().reason,
            "命令包含危险路径模式"
        );
        for chained in ["ls | grep a", "ls; pwd", "ls && pwd"] {
            assert_eq!(
                gate.validate(&command(chained)).unwrap_err().reason,
                "不允许使用管道或命令链"
            );
        }
    }

    #[test]
    fn runtime_keywords_apply() {
        let mut gate = SecurityGate::new(false);
        assert!(gate.validate(&command("git push")).is_ok());
        gate.add_dangerous_keyword("git push");
        assert!(gate.validate(&command("git push")).is_err());
    }

    #[test]
    fn app_names_cannot_be_paths() {
        let gate = SecurityGate::default();
        let open = |name: &str| TaskStep::new("open_app").with_param("name", name);
        assert!(gate.validate(&open("Music")).is_ok());
        for bad in ["../Music", "/Applications/Music", "C:\\Music"] {
            assert_eq!(
                gate.validate(&open(bad)).unwrap_err().reason,
                "应用程序名称包含非法字符"
            );
        }
    }

    #[test]
    fn unknown_and_disabled_actions_are_violations() {
        let mut gate = SecurityGate::default();
        assert_eq!(
            gate.validate(&TaskStep::new("save_file")).unwrap_err().reason,
            "未知的操作类型：save_file"
        );
        gate.disable_action(ActionKind::PlayMusic);
        let step = TaskStep::new("play_music").with_param("song", "x");
        assert!(gate.validate(&step).is_err());
        gate.enable_action(ActionKind::PlayMusic);
        assert!(gate.validate(&step).is_ok());
    }

    #[test]
    fn clarify_passes() {
        assert!(SecurityGate::default()
            .validate(&TaskStep::new("clarify"))
            .is_ok());
    }
}
