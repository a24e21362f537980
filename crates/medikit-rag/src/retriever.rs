//! Dense vector retrieval over the document chunk index.

use crate::Retriever;
use async_trait::async_trait;
use medikit_core::{RetrievalMethod, RetrievalResult};
use medikit_embeddings::Embedder;
use medikit_vectors::VectorStore;
use std::sync::Arc;
use tracing::{info, warn};

/// Embeds the query and searches the chunk collection.
pub struct VectorRetriever {
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
}

impl VectorRetriever {
    pub fn new(embedder: Arc<dyn Embedder>, store: Arc<dyn VectorStore>) -> Self {
        Self { embedder, store }
    }
}

#[async_trait]
impl Retriever for VectorRetriever {
    fn name(&self) -> &'static str {
        "vector"
    }

    async fn retrieve(&self, query: &str, top_k: usize) -> Vec<RetrievalResult> {
        let vector = match self.embedder.embed(query).await {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "vector retrieval skipped, embedding failed");
                return Vec::new();
            }
        };

        let hits = match self.store.search(&vector, top_k).await {
            Ok(hits) => hits,
            Err(e) => {
                warn!(error = %e, "vector retrieval failed");
                return Vec::new();
            }
        };

        info!(count = hits.len(), "vector retrieval");
        hits.into_iter()
            .map(|hit| {
                let mut result =
                    RetrievalResult::new(hit.text, hit.source, RetrievalMethod::Vector)
                        .with_score(hit.score);
                result.document_id = Some(hit.document_id);
                if let Ok(serde_json::Value::Object(map)) = serde_json::from_str(&hit.metadata) {
                    result.metadata = map.into_iter().collect();
                }
                result
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use medikit_embeddings::HashedEmbedder;
    use medikit_vectors::{InMemoryStore, VectorRecord};

    async fn seeded() -> VectorRetriever {
        let embedder = Arc::new(HashedEmbedder::new(256));
        let store = Arc::new(InMemoryStore::new(256));

        for (doc_id, text) in [
            (1i64, "高血压患者应限制钠盐摄入。"),
            (2, "骨折术后康复训练计划。"),
        ] {
            let vector = embedder.embed(text).await.unwrap();
            store
                .insert(vec![VectorRecord::new(vector, text)
                    .with_document(doc_id, "指南")
                    .with_metadata(&serde_json::json!({"page": 3}))])
                .await
                .unwrap();
        }
        VectorRetriever::new(embedder, store)
    }

    #[tokio::test]
    async fn retrieves_nearest_chunks_with_metadata() {
        let retriever = seeded().await;
        let results = retriever.retrieve("高血压饮食", 1).await;

        assert_eq!(results.len(), 1);
        assert!(results[0].text.contains("高血压"));
        assert_eq!(results[0].method, RetrievalMethod::Vector);
        assert_eq!(results[0].document_id, Some(1));
        assert_eq!(results[0].metadata.get("page").and_then(|v| v.as_u64()), Some(3));
    }

    #[tokio::test]
    async fn empty_store_yields_empty_results() {
        let embedder = Arc::new(HashedEmbedder::new(64));
        let store = Arc::new(InMemoryStore::new(64));
        let retriever = VectorRetriever::new(embedder, store);
        assert!(retriever.retrieve("查询", 5).await.is_empty());
    }
}
