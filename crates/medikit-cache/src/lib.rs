//! # Medikit Cache
//!
//! Semantic response cache: LLM answers keyed by query-embedding
//! similarity instead of exact string match.
//!
//! Lookups embed the query, run a top-1 ANN search against the cache
//! collection, and return the stored response verbatim when cosine
//! similarity clears the threshold (default 0.95). A hit never reformats
//! the stored text. When the vector collection is unavailable the cache
//! degrades to a linear scan over KV entries keyed `semantic_cache:<md5>`;
//! when both stores are down every lookup is a miss and no error escapes.

use chrono::Utc;
use md5::{Digest, Md5};
use medikit_embeddings::{cosine_similarity, Embedder};
use medikit_kv::KvStore;
use medikit_vectors::{VectorRecord, VectorStore};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default cosine threshold for a hit.
pub const DEFAULT_SIMILARITY_THRESHOLD: f32 = 0.95;

/// Default entry lifetime.
pub const DEFAULT_TTL_DAYS: i64 = 7;

/// How many KV entries the fallback scan inspects per lookup.
const KV_SCAN_LIMIT: usize = 100;

/// A cache hit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheHit {
    /// The stored response, byte-for-byte as it was written.
    pub response: String,
    pub similarity: f32,
    pub query_text: String,
    pub metadata: serde_json::Value,
}

/// Payload persisted per entry (vector-store metadata column and KV value).
#[derive(Debug, Serialize, Deserialize)]
struct CacheEntry {
    query_text: String,
    response: String,
    metadata: serde_json::Value,
    timestamp: i64,
    /// Present only in the KV fallback, where the store keeps no vector.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    embedding: Option<Vec<f32>>,
}

/// Embedding-similarity cache over past generations.
pub struct SemanticCache {
    embedder: Arc<dyn Embedder>,
    store: Option<Arc<dyn VectorStore>>,
    kv: Arc<dyn KvStore>,
    threshold: f32,
    ttl_days: i64,
    enabled: bool,
}

impl SemanticCache {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        store: Option<Arc<dyn VectorStore>>,
        kv: Arc<dyn KvStore>,
    ) -> Self {
        if store.is_none() {
            warn!("semantic cache vector collection unavailable, using KV fallback");
        }
        Self {
            embedder,
            store,
            kv,
            threshold: DEFAULT_SIMILARITY_THRESHOLD,
            ttl_days: DEFAULT_TTL_DAYS,
            enabled: true,
        }
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_ttl_days(mut self, days: i64) -> Self {
        self.ttl_days = days;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    fn kv_key(query: &str) -> String {
        let digest = Md5::digest(query.as_bytes());
        format!("semantic_cache:{}", hex::encode(digest))
    }

    /// Look up a response for a semantically similar past query.
    pub async fn get(&self, query: &str) -> Option<CacheHit> {
        if !self.enabled {
            return None;
        }

        let embedding = match self.embedder.embed(query).await {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "semantic cache lookup skipped, embed failed");
                return None;
            }
        };

        if let Some(store) = &self.store {
            match self.get_from_store(store.as_ref(), &embedding).await {
                Ok(hit) => return hit,
                Err(e) => warn!(error = %e, "semantic cache store lookup failed"),
            }
        }

        self.get_from_kv(&embedding).await
    }

    async fn get_from_store(
        &self,
        store: &dyn VectorStore,
        embedding: &[f32],
    ) -> Result<Option<CacheHit>, medikit_vectors::VectorError> {
        let hits = store.search(embedding, 1).await?;
        let Some(top) = hits.into_iter().next() else {
            return Ok(None);
        };

        if top.score < self.threshold {
            debug!(similarity = top.score, "semantic cache below threshold");
            return Ok(None);
        }

        let entry: CacheEntry = match serde_json::from_str(&top.metadata) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "semantic cache entry unreadable");
                return Ok(None);
            }
        };

        info!(similarity = top.score, "semantic cache hit");
        Ok(Some(CacheHit {
            response: entry.response,
            similarity: top.score,
            query_text: entry.query_text,
            metadata: entry.metadata,
        }))
    }

    async fn get_from_kv(&self, embedding: &[f32]) -> Option<CacheHit> {
        let keys = self.kv.keys("semantic_cache:").await.ok()?;

        let mut best: Option<CacheHit> = None;
        for key in keys.into_iter().take(KV_SCAN_LIMIT) {
            let Ok(Some(entry)) = medikit_kv::get_json::<CacheEntry>(self.kv.as_ref(), &key).await
            else {
                continue;
            };
            let Some(stored) = &entry.embedding else {
                continue;
            };
            let similarity = cosine_similarity(embedding, stored);
            if similarity >= self.threshold
                && best.as_ref().map_or(true, |b| similarity > b.similarity)
            {
                best = Some(CacheHit {
                    response: entry.response,
                    similarity,
                    query_text: entry.query_text,
                    metadata: entry.metadata,
                });
            }
        }

        if let Some(hit) = &best {
            info!(similarity = hit.similarity, "semantic cache hit (kv fallback)");
        }
        best
    }

    /// Store a response. Write failures are logged and swallowed; the cache
    /// never fails the generation it rides on.
    pub async fn set(&self, query: &str, response: &str, metadata: serde_json::Value) {
        if !self.enabled {
            return;
        }

        let embedding = match self.embedder.embed(query).await {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "semantic cache write skipped, embed failed");
                return;
            }
        };
        let timestamp = Utc::now().timestamp();

        if let Some(store) = &self.store {
            let entry = CacheEntry {
                query_text: query.chars().take(1000).collect(),
                response: response.chars().take(10_000).collect(),
                metadata: metadata.clone(),
                timestamp,
                embedding: None,
            };
            let payload = serde_json::to_string(&entry).unwrap_or_else(|_| "{}".to_string());
            let record = VectorRecord {
                vector: embedding.clone(),
                text: entry.query_text.clone(),
                document_id: 0,
                source: "semantic_cache".to_string(),
                metadata: payload,
            };
            if let Err(e) = store.insert(vec![record]).await {
                warn!(error = %e, "semantic cache store write failed");
            } else {
                debug!("semantic cache stored");
                return;
            }
        }

        let entry = CacheEntry {
            query_text: query.to_string(),
            response: response.to_string(),
            metadata,
            timestamp,
            embedding: Some(embedding),
        };
        let ttl = Duration::from_secs(self.ttl_days.max(0) as u64 * 24 * 3600);
        if let Err(e) =
            medikit_kv::set_json(self.kv.as_ref(), &Self::kv_key(query), &entry, ttl).await
        {
            warn!(error = %e, "semantic cache kv write failed");
        }
    }

    /// Remove entries older than `older_than_days`. Returns how many were
    /// dropped from each backing store.
    pub async fn cleanup(&self, older_than_days: i64) -> usize {
        let cutoff = Utc::now().timestamp() - older_than_days * 24 * 3600;
        let mut removed = 0;

        if let Some(store) = &self.store {
            match store.delete_older_than(cutoff).await {
                Ok(count) => removed += count,
                Err(e) => warn!(error = %e, "semantic cache store cleanup failed"),
            }
        }

        if let Ok(keys) = self.kv.keys("semantic_cache:").await {
            for key in keys {
                let Ok(Some(entry)) =
                    medikit_kv::get_json::<CacheEntry>(self.kv.as_ref(), &key).await
                else {
                    continue;
                };
                if entry.timestamp < cutoff && self.kv.delete(&key).await.unwrap_or(false) {
                    removed += 1;
                }
            }
        }

        info!(removed, "semantic cache cleanup");
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use medikit_embeddings::HashedEmbedder;
    use medikit_kv::InMemoryKv;
    use medikit_vectors::InMemoryStore;

    fn cache_with_store(threshold: f32) -> SemanticCache {
        let embedder = Arc::new(HashedEmbedder::new(256));
        let store = Arc::new(InMemoryStore::new(256));
        let kv = Arc::new(InMemoryKv::new());
        SemanticCache::new(embedder, Some(store), kv).with_threshold(threshold)
    }

    #[tokio::test]
    async fn near_duplicate_query_hits_and_returns_exact_text() {
        let cache = cache_with_store(0.5);
        let response = "高血压患者应限制钠盐摄入，每日不超过6g。";
        cache
            .set("高血压饮食注意事项", response, serde_json::json!({"model": "qwen-turbo"}))
            .await;

        let hit = cache.get("高血压的饮食注意").await.expect("expected hit");
        assert_eq!(hit.response, response);
        assert!(hit.similarity >= 0.5);
        assert_eq!(hit.metadata["model"], "qwen-turbo");
    }

    #[tokio::test]
    async fn unrelated_query_misses() {
        let cache = cache_with_store(0.95);
        cache.set("高血压饮食注意事项", "限盐。", serde_json::json!({})).await;
        assert!(cache.get("骨折术后康复训练计划").await.is_none());
    }

    #[tokio::test]
    async fn kv_fallback_serves_hits_without_vector_store() {
        let embedder = Arc::new(HashedEmbedder::new(256));
        let kv = Arc::new(InMemoryKv::new());
        let cache = SemanticCache::new(embedder, None, kv).with_threshold(0.99);

        cache.set("高血压饮食注意事项", "限盐。", serde_json::json!({})).await;
        let hit = cache.get("高血压饮食注意事项").await.expect("expected hit");
        assert_eq!(hit.response, "限盐。");
        assert!(hit.similarity > 0.99);
    }

    #[tokio::test]
    async fn disabled_cache_never_hits() {
        let cache = cache_with_store(0.0).disabled();
        cache.set("q", "r", serde_json::json!({})).await;
        assert!(cache.get("q").await.is_none());
    }

    #[tokio::test]
    async fn cleanup_drops_old_kv_entries() {
        let embedder = Arc::new(HashedEmbedder::new(128));
        let kv = Arc::new(InMemoryKv::new());
        let cache = SemanticCache::new(embedder, None, kv.clone());

        // Write an entry whose timestamp is far in the past.
        let entry = CacheEntry {
            query_text: "旧查询".into(),
            response: "旧回答".into(),
            metadata: serde_json::json!({}),
            timestamp: 1_000,
            embedding: Some(vec![0.0; 128]),
        };
        medikit_kv::set_json(
            kv.as_ref(),
            &SemanticCache::kv_key("旧查询"),
            &entry,
            Duration::from_secs(3600),
        )
        .await
        .unwrap();

        let removed = cache.cleanup(30).await;
        assert_eq!(removed, 1);
    }
}
