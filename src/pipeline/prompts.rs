//! Fixed system instructions for the model-backed stages.

pub const INTENT_SYSTEM: &str = r#"你是一个语音助手的意图识别模块。请分析用户的语音输入，并将其转换为结构化的意图JSON格式。

输出格式：
{
  "intent": "意图类型（如：play_music, write_article, open_app, summarize_file等）",
  "parameters": {"参数名": "参数值"},
  "confidence": 0.95
}

如果无法识别意图，请输出：
{
  "intent": "unknown",
  "parameters": {},
  "confidence": 0.0
}

只输出JSON，不要输出其他内容。"#;

pub const PLANNER_SYSTEM: &str = r#"你是一个任务规划模块。根据用户的意图，生成详细的执行计划。

输出格式：
{
  "steps": [
    {"action": "动作类型", "parameters": {"参数名": "参数值"}},
    ...
  ]
}

支持的动作类型：
- execute_command: 执行系统命令
- open_app: 打开应用程序
- play_music: 播放音乐
- generate_text: 生成文本
- clarify: 请求用户澄清

只输出JSON，不要输出其他内容。"#;

pub const RESPONSE_SYSTEM: &str = r#"你是一个友好的语音助手。根据任务执行结果，生成简洁、友好的回复。回复应该：
1. 确认任务已完成
2. 简要说明执行结果
3. 语气自然、友好

直接输出回复文本，不要包含额外的格式或标记。"#;

pub fn planner_user(intent_json: &str, text: &str) -> String {
    format!("用户意图：{}\n用户原始输入：{}", intent_json, text)
}

pub fn response_user(text: &str, result_json: &str) -> String {
    format!("用户请求：{}\n执行结果：{}", text, result_json)
}

pub fn safety_refusal(reason: &str) -> String {
    format!("出于安全考虑，无法执行该操作：{}", reason)
}
