//! Core LLM backend trait.

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// LLM-related errors.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("API error: {0}")]
    ApiError(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Rate limited: retry after {0} seconds")]
    RateLimited(u32),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Parsing failed: {0}")]
    ParseError(String),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Authentication failed")]
    AuthenticationFailed,

    #[error("Timeout after {0} seconds")]
    Timeout(u32),

    #[error("Circuit breaker open")]
    BreakerOpen,
}

/// Result type for LLM operations.
pub type LlmResult<T> = Result<T, LlmError>;

/// Chat role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One chat-completions message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    /// Build a prompt + optional system prompt into a message list.
    pub fn from_prompt(prompt: &str, system_prompt: Option<&str>) -> Vec<ChatMessage> {
        let mut messages = Vec::new();
        if let Some(system) = system_prompt {
            messages.push(ChatMessage::system(system));
        }
        messages.push(ChatMessage::user(prompt));
        messages
    }
}

/// Configuration for LLM requests.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// Model name/identifier.
    pub model: String,
    /// Maximum tokens to generate.
    pub max_tokens: u32,
    /// Temperature (0.0 = deterministic).
    pub temperature: f32,
    /// Request timeout in seconds.
    pub timeout_secs: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: "default".to_string(),
            max_tokens: 2000,
            temperature: 0.7,
            timeout_secs: 60,
        }
    }
}

impl LlmConfig {
    /// Config for the chat-completions-compatible cloud provider.
    pub fn deepseek() -> Self {
        Self {
            model: "deepseek-chat".to_string(),
            ..Default::default()
        }
    }

    /// Config for the proprietary-API cloud provider.
    pub fn qwen() -> Self {
        Self {
            model: "qwen-turbo".to_string(),
            ..Default::default()
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature.clamp(0.0, 2.0);
        self
    }

    pub fn with_timeout(mut self, timeout_secs: u32) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }
}

/// Per-call parameter overrides; unset fields fall back to the backend's
/// config.
#[derive(Debug, Clone, Copy, Default)]
pub struct GenerateOptions {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

/// Core trait for LLM providers.
#[async_trait]
pub trait LlmBackend: Send + Sync {
    /// Provider name.
    fn name(&self) -> &str;

    /// Current configuration.
    fn config(&self) -> &LlmConfig;

    /// Complete a chat conversation.
    async fn chat(&self, messages: &[ChatMessage], options: GenerateOptions)
        -> LlmResult<String>;

    /// Complete a single prompt.
    async fn complete(&self, prompt: &str, system_prompt: Option<&str>) -> LlmResult<String> {
        let messages = ChatMessage::from_prompt(prompt, system_prompt);
        self.chat(&messages, GenerateOptions::default()).await
    }

    /// Stream text deltas for a chat conversation.
    ///
    /// Retries apply only to establishing the connection; once the first
    /// delta has arrived, failures surface immediately through the stream.
    async fn chat_stream(
        &self,
        messages: &[ChatMessage],
        options: GenerateOptions,
    ) -> LlmResult<BoxStream<'static, LlmResult<String>>>;

    /// Provider liveness probe.
    async fn health_check(&self) -> bool {
        match self.complete("ping", None).await {
            Ok(_) => true,
            Err(LlmError::ConnectionFailed(_)) | Err(LlmError::AuthenticationFailed) => false,
            Err(_) => true,
        }
    }
}

/// Canned-response backend for tests.
pub struct MockBackend {
    config: LlmConfig,
    responses: Vec<(String, String)>,
    calls: std::sync::atomic::AtomicUsize,
    /// Fail this many leading calls before succeeding.
    fail_first: usize,
}

impl MockBackend {
    pub fn new() -> Self {
        Self {
            config: LlmConfig::default(),
            responses: Vec::new(),
            calls: std::sync::atomic::AtomicUsize::new(0),
            fail_first: 0,
        }
    }

    /// Add a canned response for prompts containing `pattern`.
    pub fn with_response(mut self, pattern: &str, response: &str) -> Self {
        self.responses.push((pattern.to_string(), response.to_string()));
        self
    }

    /// Make the first `n` calls fail with a connection error.
    pub fn failing_first(mut self, n: usize) -> Self {
        self.fail_first = n;
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(std::sync::atomic::Ordering::SeqCst)
    }

    fn lookup(&self, prompt: &str) -> String {
        for (pattern, response) in &self.responses {
            if prompt.contains(pattern.as_str()) {
                return response.clone();
            }
        }
        "Mock response".to_string()
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmBackend for MockBackend {
    fn name(&self) -> &str {
        "mock"
    }

    fn config(&self) -> &LlmConfig {
        &self.config
    }

    async fn chat(
        &self,
        messages: &[ChatMessage],
        _options: GenerateOptions,
    ) -> LlmResult<String> {
        let call = self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        if call < self.fail_first {
            return Err(LlmError::ConnectionFailed("mock failure".to_string()));
        }
        let prompt = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or("");
        Ok(self.lookup(prompt))
    }

    async fn chat_stream(
        &self,
        messages: &[ChatMessage],
        options: GenerateOptions,
    ) -> LlmResult<BoxStream<'static, LlmResult<String>>> {
        let text = self.chat(messages, options).await?;
        let chunks: Vec<LlmResult<String>> = text
            .chars()
            .map(|c| Ok(c.to_string()))
            .collect();
        Ok(Box::pin(futures::stream::iter(chunks)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn mock_backend_matches_patterns() {
        let backend = MockBackend::new().with_response("高血压", "限盐饮食。");
        let answer = backend.complete("高血压怎么办", None).await.unwrap();
        assert_eq!(answer, "限盐饮食。");

        let fallback = backend.complete("别的问题", None).await.unwrap();
        assert_eq!(fallback, "Mock response");
    }

    #[tokio::test]
    async fn mock_stream_yields_full_text() {
        let backend = MockBackend::new().with_response("q", "abc");
        let mut stream = backend
            .chat_stream(&ChatMessage::from_prompt("q", None), GenerateOptions::default())
            .await
            .unwrap();
        let mut collected = String::new();
        while let Some(delta) = stream.next().await {
            collected.push_str(&delta.unwrap());
        }
        assert_eq!(collected, "abc");
    }

    #[test]
    fn config_builders_clamp_temperature() {
        let config = LlmConfig::qwen().with_temperature(5.0).with_max_tokens(100);
        assert_eq!(config.temperature, 2.0);
        assert_eq!(config.max_tokens, 100);
        assert!(config.model.contains("qwen"));
    }
}
