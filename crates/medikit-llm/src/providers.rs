//! Cloud LLM providers.
//!
//! Both providers speak a chat-completions-shaped request. Responses are
//! extracted leniently: the standard `choices[0].message.content` shape and
//! the flat `output.text` shape are both accepted, because the proprietary
//! API switches between them depending on generation parameters.

use crate::backend::{
    ChatMessage, GenerateOptions, LlmBackend, LlmConfig, LlmError, LlmResult,
};
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    max_tokens: u32,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

/// Pull the generated text out of a provider response, tolerating either
/// the chat-completions shape or the flat `output.text` shape. Missing both
/// is an error.
pub(crate) fn extract_content(value: &Value) -> LlmResult<String> {
    if let Some(content) = value
        .pointer("/choices/0/message/content")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
    {
        return Ok(content.to_string());
    }
    if let Some(content) = value
        .pointer("/output/choices/0/message/content")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
    {
        return Ok(content.to_string());
    }
    if let Some(text) = value
        .pointer("/output/text")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
    {
        return Ok(text.to_string());
    }
    Err(LlmError::InvalidResponse(
        "neither choices[0].message.content nor output.text present".to_string(),
    ))
}

/// Pull a streaming delta out of an SSE event payload. Empty deltas are not
/// errors; `None` means skip.
pub(crate) fn extract_delta(value: &Value) -> Option<String> {
    value
        .pointer("/choices/0/delta/content")
        .or_else(|| value.pointer("/output/choices/0/message/content"))
        .or_else(|| value.pointer("/output/text"))
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
}

fn map_status(status: reqwest::StatusCode, model: &str, body: &str) -> LlmError {
    match status.as_u16() {
        401 => LlmError::AuthenticationFailed,
        429 => LlmError::RateLimited(60),
        404 => LlmError::ModelNotFound(model.to_string()),
        _ => LlmError::ApiError(format!("provider error {}: {}", status, body)),
    }
}

fn map_transport(e: reqwest::Error, timeout_secs: u32) -> LlmError {
    if e.is_connect() {
        LlmError::ConnectionFailed(e.to_string())
    } else if e.is_timeout() {
        LlmError::Timeout(timeout_secs)
    } else {
        LlmError::ApiError(e.to_string())
    }
}

/// Convert a byte stream of SSE lines into a stream of text deltas.
fn sse_delta_stream(
    response: reqwest::Response,
) -> BoxStream<'static, LlmResult<String>> {
    // Boxed so the stream is Unpin for `next()`.
    let byte_stream = response.bytes_stream().boxed();

    let stream = futures::stream::unfold(
        (byte_stream, Vec::<u8>::new(), false),
        |(mut bytes, mut buffer, done)| async move {
            if done {
                return None;
            }
            loop {
                // Emit any complete line already buffered.
                if let Some(pos) = buffer.iter().position(|&b| b == b'\n') {
                    let line: Vec<u8> = buffer.drain(..=pos).collect();
                    let line = String::from_utf8_lossy(&line);
                    let line = line.trim();
                    let Some(payload) = line.strip_prefix("data:") else {
                        continue;
                    };
                    let payload = payload.trim();
                    if payload == "[DONE]" {
                        return None;
                    }
                    match serde_json::from_str::<Value>(payload) {
                        Ok(value) => {
                            if let Some(delta) = extract_delta(&value) {
                                return Some((Ok(delta), (bytes, buffer, false)));
                            }
                            continue;
                        }
                        Err(_) => continue,
                    }
                }

                match bytes.next().await {
                    Some(Ok(chunk)) => buffer.extend_from_slice(&chunk),
                    Some(Err(e)) => {
                        return Some((
                            Err(LlmError::ApiError(e.to_string())),
                            (bytes, buffer, true),
                        ));
                    }
                    None => return None,
                }
            }
        },
    );

    Box::pin(stream)
}

macro_rules! chat_provider {
    ($name:ident, $provider:literal, $default_endpoint:expr, $default_config:expr) => {
        /// See the module docs for the response shapes this provider
        /// tolerates.
        pub struct $name {
            api_key: String,
            config: LlmConfig,
            client: reqwest::Client,
            endpoint: String,
        }

        impl $name {
            pub fn new(api_key: &str) -> Self {
                Self::with_config(api_key, $default_config)
            }

            pub fn with_config(api_key: &str, config: LlmConfig) -> Self {
                let client = reqwest::Client::builder()
                    .timeout(std::time::Duration::from_secs(config.timeout_secs as u64))
                    .build()
                    .expect("failed to build HTTP client");

                Self {
                    api_key: api_key.to_string(),
                    config,
                    client,
                    endpoint: $default_endpoint.to_string(),
                }
            }

            /// Use a custom endpoint (self-hosted gateway or compatible API).
            pub fn with_endpoint(mut self, endpoint: &str) -> Self {
                self.endpoint = endpoint.to_string();
                self
            }

            pub fn with_model(mut self, model: &str) -> Self {
                self.config.model = model.to_string();
                self
            }

            async fn send(
                &self,
                messages: &[ChatMessage],
                options: GenerateOptions,
                stream: bool,
            ) -> LlmResult<reqwest::Response> {
                let request = ChatRequest {
                    model: &self.config.model,
                    messages,
                    temperature: options.temperature.unwrap_or(self.config.temperature),
                    max_tokens: options.max_tokens.unwrap_or(self.config.max_tokens),
                    stream,
                };

                let response = self
                    .client
                    .post(&self.endpoint)
                    .header("Authorization", format!("Bearer {}", self.api_key))
                    .header("Content-Type", "application/json")
                    .json(&request)
                    .send()
                    .await
                    .map_err(|e| map_transport(e, self.config.timeout_secs))?;

                let status = response.status();
                if !status.is_success() {
                    let body = response.text().await.unwrap_or_default();
                    return Err(map_status(status, &self.config.model, &body));
                }
                Ok(response)
            }
        }

        #[async_trait]
        impl LlmBackend for $name {
            fn name(&self) -> &str {
                $provider
            }

            fn config(&self) -> &LlmConfig {
                &self.config
            }

            async fn chat(
                &self,
                messages: &[ChatMessage],
                options: GenerateOptions,
            ) -> LlmResult<String> {
                let response = self.send(messages, options, false).await?;
                let value: Value = response
                    .json()
                    .await
                    .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;
                extract_content(&value)
            }

            async fn chat_stream(
                &self,
                messages: &[ChatMessage],
                options: GenerateOptions,
            ) -> LlmResult<BoxStream<'static, LlmResult<String>>> {
                let response = self.send(messages, options, true).await?;
                Ok(sse_delta_stream(response))
            }
        }
    };
}

chat_provider!(
    DeepSeekBackend,
    "deepseek",
    "https://api.deepseek.com/chat/completions",
    LlmConfig::deepseek()
);

chat_provider!(
    QwenBackend,
    "qwen",
    "https://dashscope.aliyuncs.com/compatible-mode/v1/chat/completions",
    LlmConfig::qwen()
);

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extracts_chat_completions_shape() {
        let value = json!({"choices": [{"message": {"content": "回答"}}]});
        assert_eq!(extract_content(&value).unwrap(), "回答");
    }

    #[test]
    fn extracts_flat_output_shape() {
        let value = json!({"output": {"text": "回答"}});
        assert_eq!(extract_content(&value).unwrap(), "回答");
    }

    #[test]
    fn extracts_nested_output_choices_shape() {
        let value = json!({"output": {"choices": [{"message": {"content": "回答"}}]}});
        assert_eq!(extract_content(&value).unwrap(), "回答");
    }

    #[test]
    fn missing_both_shapes_is_an_error() {
        let value = json!({"output": {"choices": null, "text": ""}});
        assert!(matches!(
            extract_content(&value),
            Err(LlmError::InvalidResponse(_))
        ));
    }

    #[test]
    fn delta_extraction_skips_empty() {
        assert_eq!(
            extract_delta(&json!({"choices": [{"delta": {"content": "字"}}]})).as_deref(),
            Some("字")
        );
        assert!(extract_delta(&json!({"choices": [{"delta": {}}]})).is_none());
    }

    #[test]
    fn provider_configs() {
        let deepseek = DeepSeekBackend::new("key");
        assert!(deepseek.endpoint.contains("deepseek"));

        let qwen = QwenBackend::new("key").with_model("qwen-plus");
        assert_eq!(qwen.config.model, "qwen-plus");
    }
}
