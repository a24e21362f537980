//! Agent trait and shared input shape.

use async_trait::async_trait;
use medikit_core::AgentResult;
use serde_json::Value;
use std::collections::HashMap;
use tracing::info;

/// What the orchestrator hands a specialist agent.
#[derive(Debug, Clone, Default)]
pub struct AgentInput {
    pub question: String,
    /// Sub-type hint (`diagnosis`, `drug`, `plan`, `faq`, ...); agents
    /// classify themselves when absent.
    pub request_type: Option<String>,
    /// Conversation context: history, user_profile, metrics.
    pub context: HashMap<String, Value>,
    pub trace_id: Option<String>,
}

impl AgentInput {
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            ..Default::default()
        }
    }

    pub fn with_type(mut self, request_type: &str) -> Self {
        self.request_type = Some(request_type.to_string());
        self
    }

    pub fn with_context(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.context.insert(key.to_string(), value.into());
        self
    }

    /// Render the conversation history for a prompt, truncating long
    /// messages.
    pub fn format_history(&self) -> String {
        let Some(history) = self.context.get("history").and_then(|v| v.as_array()) else {
            return String::new();
        };
        if history.is_empty() {
            return String::new();
        }

        let mut text = String::from("\n【对话历史】\n");
        for message in history {
            let role = if message.get("role").and_then(|v| v.as_str()) == Some("user") {
                "用户"
            } else {
                "AI助手"
            };
            let content = message.get("content").and_then(|v| v.as_str()).unwrap_or("");
            let content: String = if content.chars().count() > 200 {
                format!("{}...", content.chars().take(200).collect::<String>())
            } else {
                content.to_string()
            };
            text.push_str(&format!("{}: {}\n", role, content));
        }
        text.push('\n');
        text
    }
}

/// A specialist agent: one domain of conversation, one prompt, one set of
/// tools.
///
/// `process` never propagates an error; failures come back as a result
/// with `error` set and a generic answer.
#[async_trait]
pub trait Agent: Send + Sync {
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    fn system_prompt(&self) -> &'static str;

    async fn process(&self, input: &AgentInput) -> AgentResult;
}

/// Structured execution log emitted after every agent run.
pub fn log_execution(agent: &str, input: &AgentInput, result: &AgentResult) {
    info!(
        agent,
        question = %input.question.chars().take(50).collect::<String>(),
        tools_used = ?result.tools_used.iter().map(|t| t.as_str()).collect::<Vec<_>>(),
        execution_time_ms = result.execution_time_ms,
        error = result.error.is_some(),
        "agent execution"
    );
}

/// Generic failure result keeping the contract shape.
pub fn error_result(error: impl std::fmt::Display, execution_time_ms: u64) -> AgentResult {
    AgentResult {
        answer: "处理请求时发生错误，请稍后重试。".to_string(),
        error: Some(error.to_string()),
        execution_time_ms,
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn history_formatting_truncates_long_messages() {
        let input = AgentInput::new("问题").with_context(
            "history",
            json!([
                {"role": "user", "content": "之前的问题"},
                {"role": "assistant", "content": "答".repeat(300)},
            ]),
        );
        let history = input.format_history();
        assert!(history.contains("用户: 之前的问题"));
        assert!(history.contains("..."));
        assert!(!history.contains(&"答".repeat(300)));
    }

    #[test]
    fn missing_history_renders_empty() {
        assert_eq!(AgentInput::new("问题").format_history(), "");
    }

    #[test]
    fn error_result_keeps_shape() {
        let result = error_result("boom", 12);
        assert!(result.error.is_some());
        assert!(!result.answer.is_empty());
        assert_eq!(result.execution_time_ms, 12);
        assert!(result.tools_used.is_empty());
    }
}
