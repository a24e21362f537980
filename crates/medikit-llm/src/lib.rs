//! # Medikit LLM
//!
//! Provider-abstracted language-model client for the consultation engine.
//!
//! [`backend::LlmBackend`] is the low-level provider trait; [`service::LlmService`]
//! composes a backend with the semantic cache, a retry policy, and a circuit
//! breaker, and emits a structured generation record for every call.
//!
//! The breaker wraps the retry loop, never the other way around: a retried
//! call counts as one breaker outcome, and only a successful half-open probe
//! closes the breaker again.

pub mod backend;
pub mod breaker;
pub mod prompt;
pub mod providers;
pub mod record;
pub mod retry;
pub mod service;

pub use backend::{ChatMessage, LlmBackend, LlmConfig, LlmError, LlmResult, MockBackend, Role};
pub use breaker::{BreakerState, CircuitBreaker};
pub use prompt::PromptTemplate;
pub use providers::{DeepSeekBackend, QwenBackend};
pub use record::GenerationRecord;
pub use retry::RetryPolicy;
pub use service::LlmService;
