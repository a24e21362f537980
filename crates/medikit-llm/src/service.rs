//! High-level LLM service.
//!
//! Wraps a provider backend with the semantic cache, a retry policy, and a
//! circuit breaker, and emits a [`GenerationRecord`] for every call. The
//! breaker wraps the retry loop so a burned retry budget counts as a single
//! breaker failure.

use crate::backend::{ChatMessage, GenerateOptions, LlmBackend, LlmResult};
use crate::breaker::CircuitBreaker;
use crate::record::GenerationRecord;
use crate::retry::RetryPolicy;
use futures::stream::BoxStream;
use futures::StreamExt;
use medikit_cache::SemanticCache;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

/// Outcome of a generation, with cache annotations for the orchestrator.
#[derive(Debug, Clone)]
pub struct Generation {
    pub text: String,
    pub cache_hit: bool,
    /// Similarity of the cached query when `cache_hit` is true.
    pub similarity: Option<f32>,
}

/// Provider-abstracted generate/chat/stream with caching, retry, and
/// circuit breaking.
pub struct LlmService {
    backend: Arc<dyn LlmBackend>,
    cache: Option<Arc<SemanticCache>>,
    retry: RetryPolicy,
    breaker: CircuitBreaker,
}

impl LlmService {
    pub fn new(backend: Arc<dyn LlmBackend>) -> Self {
        let breaker = CircuitBreaker::for_provider(backend.name());
        Self {
            backend,
            cache: None,
            retry: RetryPolicy::default(),
            breaker,
        }
    }

    pub fn with_cache(mut self, cache: Arc<SemanticCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn model(&self) -> &str {
        &self.backend.config().model
    }

    /// Generate with cache annotations.
    pub async fn generate_with_info(
        &self,
        prompt: &str,
        system_prompt: Option<&str>,
        options: GenerateOptions,
        trace_id: Option<&str>,
    ) -> LlmResult<Generation> {
        let trace_id = trace_id
            .map(|t| t.to_string())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let start = Instant::now();
        let config = self.backend.config();

        // Cache key covers the system prompt; two agents sharing a user
        // question must not share an answer shaped by different roles.
        let cache_key = match system_prompt {
            Some(system) => format!("{}:{}", system, prompt),
            None => prompt.to_string(),
        };

        if let Some(cache) = &self.cache {
            if let Some(hit) = cache.get(&cache_key).await {
                info!(similarity = hit.similarity, "serving generation from semantic cache");
                let mut record = GenerationRecord::new(&trace_id, "llm.generate", &config.model)
                    .with_usage(prompt, &hit.response);
                record.cache_hit = true;
                record.latency_ms = start.elapsed().as_millis() as u64;
                record.emit();
                return Ok(Generation {
                    text: hit.response,
                    cache_hit: true,
                    similarity: Some(hit.similarity),
                });
            }
        }

        let messages = ChatMessage::from_prompt(prompt, system_prompt);
        let backend = &self.backend;
        let retry = self.retry;
        let result = self
            .breaker
            .call(|| async {
                retry
                    .run(backend.name(), || backend.chat(&messages, options))
                    .await
            })
            .await;

        let mut record = GenerationRecord::new(&trace_id, "llm.generate", &config.model);
        record.temperature = options.temperature.unwrap_or(config.temperature);
        record.max_tokens = options.max_tokens.unwrap_or(config.max_tokens);
        record.latency_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(text) => {
                record = record.with_usage(prompt, &text);
                record.latency_ms = start.elapsed().as_millis() as u64;
                record.emit();

                if let Some(cache) = &self.cache {
                    // Write-through happens after the generation it caches.
                    cache
                        .set(
                            &cache_key,
                            &text,
                            serde_json::json!({
                                "model": config.model,
                                "temperature": record.temperature,
                                "max_tokens": record.max_tokens,
                            }),
                        )
                        .await;
                }

                Ok(Generation {
                    text,
                    cache_hit: false,
                    similarity: None,
                })
            }
            Err(e) => {
                record.error = true;
                record.emit();
                Err(e)
            }
        }
    }

    /// Generate text.
    pub async fn generate(
        &self,
        prompt: &str,
        system_prompt: Option<&str>,
        options: GenerateOptions,
    ) -> LlmResult<String> {
        self.generate_with_info(prompt, system_prompt, options, None)
            .await
            .map(|g| g.text)
    }

    /// Multi-turn chat. Not cached: conversation state makes embedding-keyed
    /// reuse unsafe.
    pub async fn chat(
        &self,
        messages: &[ChatMessage],
        options: GenerateOptions,
    ) -> LlmResult<String> {
        let trace_id = uuid::Uuid::new_v4().to_string();
        let start = Instant::now();
        let backend = &self.backend;
        let retry = self.retry;

        let result = self
            .breaker
            .call(|| async { retry.run(backend.name(), || backend.chat(messages, options)).await })
            .await;

        let input: String = messages
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        let mut record = GenerationRecord::new(&trace_id, "llm.chat", &backend.config().model);
        record.latency_ms = start.elapsed().as_millis() as u64;
        match &result {
            Ok(text) => record = record.with_usage(&input, text),
            Err(_) => record.error = true,
        }
        record.latency_ms = start.elapsed().as_millis() as u64;
        record.emit();

        result
    }

    /// Stream text deltas.
    ///
    /// The retry budget applies only to establishing the stream; after the
    /// first delta, failures surface through the stream immediately. The
    /// generation record (with first-token latency) is emitted when the
    /// stream ends.
    pub async fn stream_generate(
        &self,
        prompt: &str,
        system_prompt: Option<&str>,
        options: GenerateOptions,
    ) -> LlmResult<BoxStream<'static, LlmResult<String>>> {
        let trace_id = uuid::Uuid::new_v4().to_string();
        let start = Instant::now();
        let messages = ChatMessage::from_prompt(prompt, system_prompt);
        let backend = &self.backend;
        let retry = self.retry;

        let inner = self
            .breaker
            .call(|| async {
                retry
                    .run(backend.name(), || backend.chat_stream(&messages, options))
                    .await
            })
            .await?;

        let model = backend.config().model.clone();
        let prompt_owned = prompt.to_string();

        struct StreamState {
            inner: BoxStream<'static, LlmResult<String>>,
            record: GenerationRecord,
            start: Instant,
            output: String,
            finished: bool,
        }

        let state = StreamState {
            inner,
            record: GenerationRecord::new(&trace_id, "llm.stream_generate", &model),
            start,
            output: String::new(),
            finished: false,
        };

        let stream = futures::stream::unfold(state, move |mut state| {
            let prompt = prompt_owned.clone();
            async move {
                if state.finished {
                    return None;
                }
                match state.inner.next().await {
                    Some(Ok(delta)) => {
                        if state.record.first_token_latency_ms == 0 {
                            state.record.first_token_latency_ms =
                                state.start.elapsed().as_millis() as u64;
                        }
                        state.output.push_str(&delta);
                        Some((Ok(delta), state))
                    }
                    Some(Err(e)) => {
                        state.record.error = true;
                        state.finished = true;
                        state.record.latency_ms = state.start.elapsed().as_millis() as u64;
                        state.record.emit();
                        Some((Err(e), state))
                    }
                    None => {
                        let record =
                            std::mem::replace(&mut state.record, GenerationRecord::new("", "", ""));
                        let mut record = record.with_usage(&prompt, &state.output);
                        record.latency_ms = state.start.elapsed().as_millis() as u64;
                        record.emit();
                        None
                    }
                }
            }
        });

        Ok(Box::pin(stream))
    }
}
