//! Semantic retrieval: LLM query rewrite plus cosine rescoring.
//!
//! Embedding every corpus document per query would be prohibitive, so this
//! path rescores the vector retriever's candidate list instead; only the
//! (possibly rewritten) query is embedded fresh.

use medikit_core::{RetrievalMethod, RetrievalResult};
use medikit_embeddings::{cosine_similarity, Embedder};
use medikit_llm::backend::GenerateOptions;
use medikit_llm::{LlmService, PromptTemplate};
use std::sync::Arc;
use tracing::{info, warn};

/// Query-rewrite + similarity retriever over a candidate set.
pub struct SemanticRetriever {
    embedder: Arc<dyn Embedder>,
    llm: Arc<LlmService>,
}

impl SemanticRetriever {
    pub fn new(embedder: Arc<dyn Embedder>, llm: Arc<LlmService>) -> Self {
        Self { embedder, llm }
    }

    /// Rewrite a query into a retrieval-friendlier form. Falls back to the
    /// original on any failure.
    pub async fn rewrite_query(&self, query: &str, context: Option<&str>) -> String {
        let prompt = PromptTemplate::format_rewrite_prompt(query, context);
        match self
            .llm
            .generate(
                &prompt,
                None,
                GenerateOptions {
                    temperature: Some(0.2),
                    max_tokens: Some(200),
                },
            )
            .await
        {
            Ok(rewritten) => {
                let rewritten = rewritten.trim();
                if rewritten.is_empty() {
                    query.to_string()
                } else {
                    rewritten.to_string()
                }
            }
            Err(e) => {
                warn!(error = %e, "query rewrite failed, using original query");
                query.to_string()
            }
        }
    }

    /// Rescore `candidates` by cosine similarity to the rewritten query.
    pub async fn semantic_search(
        &self,
        query: &str,
        candidates: &[RetrievalResult],
        top_k: usize,
    ) -> Vec<RetrievalResult> {
        if candidates.is_empty() {
            return Vec::new();
        }

        let rewritten = self.rewrite_query(query, None).await;
        let query_vector = match self.embedder.embed(&rewritten).await {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "semantic retrieval skipped, embedding failed");
                return Vec::new();
            }
        };

        let texts: Vec<&str> = candidates.iter().map(|c| c.text.as_str()).collect();
        let doc_vectors = match self.embedder.embed_batch(&texts).await {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "semantic retrieval skipped, candidate embedding failed");
                return Vec::new();
            }
        };

        let mut results: Vec<RetrievalResult> = candidates
            .iter()
            .zip(doc_vectors.iter())
            .map(|(candidate, vector)| {
                let similarity = cosine_similarity(&query_vector, vector);
                let mut result = candidate.clone().with_score(similarity);
                result.method = RetrievalMethod::Semantic;
                result
                    .metadata
                    .insert("expanded_query".to_string(), rewritten.clone().into());
                result
            })
            .collect();

        results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        results.truncate(top_k);
        info!(count = results.len(), "semantic retrieval");
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use medikit_embeddings::HashedEmbedder;
    use medikit_llm::MockBackend;

    fn retriever(rewrite: Option<(&str, &str)>) -> SemanticRetriever {
        let mut backend = MockBackend::new();
        if let Some((pattern, response)) = rewrite {
            backend = backend.with_response(pattern, response);
        }
        SemanticRetriever::new(
            Arc::new(HashedEmbedder::new(256)),
            Arc::new(LlmService::new(Arc::new(backend))),
        )
    }

    fn candidate(text: &str) -> RetrievalResult {
        RetrievalResult::new(text, "指南", RetrievalMethod::Vector)
    }

    #[tokio::test]
    async fn rescores_candidates_by_similarity() {
        let retriever = retriever(Some(("重写", "高血压 饮食")));
        let candidates = vec![
            candidate("骨折术后康复训练计划与注意事项。"),
            candidate("高血压患者饮食应当低盐低脂。"),
        ];

        let results = retriever.semantic_search("高血压饮食", &candidates, 2).await;
        assert_eq!(results.len(), 2);
        assert!(results[0].text.contains("高血压"));
        assert_eq!(results[0].method, RetrievalMethod::Semantic);
        assert!(results[0]
            .metadata
            .get("expanded_query")
            .and_then(|v| v.as_str())
            .is_some());
        assert!(results[0].score >= results[1].score);
    }

    #[tokio::test]
    async fn empty_candidates_short_circuit() {
        let retriever = retriever(None);
        assert!(retriever.semantic_search("查询", &[], 5).await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_rewrite_keeps_original_query() {
        let backend = Arc::new(MockBackend::new().failing_first(usize::MAX));
        let retriever = SemanticRetriever::new(
            Arc::new(HashedEmbedder::new(128)),
            Arc::new(LlmService::new(backend)),
        );
        let rewritten = retriever.rewrite_query("高血压饮食", None).await;
        assert_eq!(rewritten, "高血压饮食");
    }
}
