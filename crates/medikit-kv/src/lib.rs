//! # Medikit KV
//!
//! Key-value caching behind a [`KvStore`] trait, with an in-memory
//! implementation and a [`DegradedKv`] wrapper that turns store failures
//! into cache misses.
//!
//! Keys are namespaced (`cache:<fn>:<md5>`, `semantic_cache:<md5>`,
//! `rate_limit:<identity>`); values are JSON. A rate limiter or cache being
//! down must never fail a request, so everything above this crate talks to
//! the degraded wrapper, not the raw store.

pub mod memory;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

/// KV-store errors.
#[derive(Debug, Error)]
pub enum KvError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Operation failed: {0}")]
    OperationFailed(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for KV operations.
pub type KvResult<T> = Result<T, KvError>;

/// Minimal KV contract: JSON payloads, mandatory-TTL caches, pattern delete.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> KvResult<Option<String>>;

    /// Set with a TTL. Caches and rate-limit keys always expire.
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> KvResult<()>;

    async fn delete(&self, key: &str) -> KvResult<bool>;

    /// Delete all keys matching a `prefix*` pattern, returning the count.
    async fn delete_pattern(&self, prefix: &str) -> KvResult<usize>;

    /// List keys matching a `prefix*` pattern.
    async fn keys(&self, prefix: &str) -> KvResult<Vec<String>>;

    async fn exists(&self, key: &str) -> KvResult<bool> {
        Ok(self.get(key).await?.is_some())
    }
}

/// JSON helpers layered over the string contract.
pub async fn get_json<T: serde::de::DeserializeOwned>(
    store: &dyn KvStore,
    key: &str,
) -> KvResult<Option<T>> {
    match store.get(key).await? {
        Some(raw) => Ok(serde_json::from_str(&raw).ok()),
        None => Ok(None),
    }
}

pub async fn set_json<T: serde::Serialize>(
    store: &dyn KvStore,
    key: &str,
    value: &T,
    ttl: Duration,
) -> KvResult<()> {
    let raw = serde_json::to_string(value)?;
    store.set(key, &raw, ttl).await
}

/// Wrapper that degrades instead of failing.
///
/// Reads become misses and writes become no-ops when the underlying store
/// errors; each failure is logged once at warn level per call site.
pub struct DegradedKv {
    inner: Arc<dyn KvStore>,
}

impl DegradedKv {
    pub fn new(inner: Arc<dyn KvStore>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl KvStore for DegradedKv {
    async fn get(&self, key: &str) -> KvResult<Option<String>> {
        match self.inner.get(key).await {
            Ok(value) => Ok(value),
            Err(e) => {
                warn!(key, error = %e, "kv get failed, treating as miss");
                Ok(None)
            }
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> KvResult<()> {
        if let Err(e) = self.inner.set(key, value, ttl).await {
            warn!(key, error = %e, "kv set failed, dropping write");
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> KvResult<bool> {
        match self.inner.delete(key).await {
            Ok(deleted) => Ok(deleted),
            Err(e) => {
                warn!(key, error = %e, "kv delete failed");
                Ok(false)
            }
        }
    }

    async fn delete_pattern(&self, prefix: &str) -> KvResult<usize> {
        match self.inner.delete_pattern(prefix).await {
            Ok(count) => Ok(count),
            Err(e) => {
                warn!(prefix, error = %e, "kv pattern delete failed");
                Ok(0)
            }
        }
    }

    async fn keys(&self, prefix: &str) -> KvResult<Vec<String>> {
        match self.inner.keys(prefix).await {
            Ok(keys) => Ok(keys),
            Err(e) => {
                warn!(prefix, error = %e, "kv keys failed");
                Ok(Vec::new())
            }
        }
    }
}

pub use memory::InMemoryKv;

#[cfg(test)]
mod tests {
    use super::*;

    /// Store that fails every operation, standing in for a down server.
    struct DownStore;

    #[async_trait]
    impl KvStore for DownStore {
        async fn get(&self, _key: &str) -> KvResult<Option<String>> {
            Err(KvError::ConnectionFailed("refused".into()))
        }
        async fn set(&self, _key: &str, _value: &str, _ttl: Duration) -> KvResult<()> {
            Err(KvError::ConnectionFailed("refused".into()))
        }
        async fn delete(&self, _key: &str) -> KvResult<bool> {
            Err(KvError::ConnectionFailed("refused".into()))
        }
        async fn delete_pattern(&self, _prefix: &str) -> KvResult<usize> {
            Err(KvError::ConnectionFailed("refused".into()))
        }
        async fn keys(&self, _prefix: &str) -> KvResult<Vec<String>> {
            Err(KvError::ConnectionFailed("refused".into()))
        }
    }

    #[tokio::test]
    async fn degraded_store_never_errors() {
        let kv = DegradedKv::new(Arc::new(DownStore));

        assert!(kv.get("cache:x:abc").await.unwrap().is_none());
        kv.set("cache:x:abc", "{}", Duration::from_secs(60))
            .await
            .unwrap();
        assert!(!kv.delete("cache:x:abc").await.unwrap());
        assert_eq!(kv.delete_pattern("cache:x:").await.unwrap(), 0);
        assert!(kv.keys("semantic_cache:").await.unwrap().is_empty());
        assert!(!kv.exists("rate_limit:u1").await.unwrap());
    }

    #[tokio::test]
    async fn json_helpers_round_trip() {
        let kv = InMemoryKv::new();
        set_json(
            &kv,
            "cache:fn:key",
            &serde_json::json!({"answer": 42}),
            Duration::from_secs(60),
        )
        .await
        .unwrap();

        let value: Option<serde_json::Value> = get_json(&kv, "cache:fn:key").await.unwrap();
        assert_eq!(value.unwrap()["answer"], 42);
    }
}
