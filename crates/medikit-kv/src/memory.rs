//! In-memory KV store with TTL expiry.

use crate::{KvResult, KvStore};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

struct Entry {
    value: String,
    expires_at: Instant,
}

/// Process-local store used in tests and single-node deployments.
///
/// Expiry is lazy: entries are dropped when read or enumerated after their
/// deadline.
#[derive(Default)]
pub struct InMemoryKv {
    entries: RwLock<HashMap<String, Entry>>,
}

impl InMemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    fn live(entry: &Entry) -> bool {
        Instant::now() < entry.expires_at
    }
}

#[async_trait]
impl KvStore for InMemoryKv {
    async fn get(&self, key: &str) -> KvResult<Option<String>> {
        {
            let entries = self.entries.read().expect("lock poisoned");
            match entries.get(key) {
                Some(entry) if Self::live(entry) => return Ok(Some(entry.value.clone())),
                None => return Ok(None),
                _ => {}
            }
        }
        // Expired: drop it.
        self.entries.write().expect("lock poisoned").remove(key);
        Ok(None)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> KvResult<()> {
        self.entries.write().expect("lock poisoned").insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> KvResult<bool> {
        Ok(self
            .entries
            .write()
            .expect("lock poisoned")
            .remove(key)
            .is_some())
    }

    async fn delete_pattern(&self, prefix: &str) -> KvResult<usize> {
        let mut entries = self.entries.write().expect("lock poisoned");
        let before = entries.len();
        // Expired entries are purged alongside the matching ones.
        entries.retain(|key, entry| Self::live(entry) && !key.starts_with(prefix));
        Ok(before - entries.len())
    }

    async fn keys(&self, prefix: &str) -> KvResult<Vec<String>> {
        let entries = self.entries.read().expect("lock poisoned");
        Ok(entries
            .iter()
            .filter(|(key, entry)| key.starts_with(prefix) && Self::live(entry))
            .map(|(key, _)| key.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_get_delete() {
        let kv = InMemoryKv::new();
        kv.set("cache:ner:abc", "{\"a\":1}", Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(
            kv.get("cache:ner:abc").await.unwrap().as_deref(),
            Some("{\"a\":1}")
        );
        assert!(kv.delete("cache:ner:abc").await.unwrap());
        assert!(kv.get("cache:ner:abc").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn expired_entries_read_as_misses() {
        let kv = InMemoryKv::new();
        kv.set("rate_limit:u1", "3", Duration::from_millis(5))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(kv.get("rate_limit:u1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn pattern_delete_respects_namespace() {
        let kv = InMemoryKv::new();
        let ttl = Duration::from_secs(60);
        kv.set("semantic_cache:a", "1", ttl).await.unwrap();
        kv.set("semantic_cache:b", "2", ttl).await.unwrap();
        kv.set("cache:other:c", "3", ttl).await.unwrap();

        let removed = kv.delete_pattern("semantic_cache:").await.unwrap();
        assert_eq!(removed, 2);
        assert!(kv.get("cache:other:c").await.unwrap().is_some());
    }
}
