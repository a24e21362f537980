//! The full retrieval pipeline: fusion → relevance scoring → rerank chain
//! → final weighted ordering.

use crate::fusion::{MultiRetrieval, RetrievalFlags};
use crate::rerank::{CrossEncoderReranker, MlReranker, RankingOptimizer, Reranker};
use crate::scoring::RelevanceScorer;
use medikit_core::{ExtractedEntities, QuestionType, RetrievalResult};
use tracing::info;

const FINAL_RELEVANCE_WEIGHT: f32 = 0.3;
const FINAL_BGE_WEIGHT: f32 = 0.3;
const FINAL_ML_WEIGHT: f32 = 0.2;
const FINAL_OPTIMIZED_WEIGHT: f32 = 0.2;
const FINAL_RRF_WEIGHT: f32 = 0.1;

/// Which rerank stages run.
#[derive(Debug, Clone, Copy)]
pub struct RagConfig {
    pub enable_rerank: bool,
    pub enable_ml_rerank: bool,
    pub enable_ranking_optimization: bool,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            enable_rerank: true,
            enable_ml_rerank: true,
            enable_ranking_optimization: true,
        }
    }
}

impl RagConfig {
    pub fn from_settings(settings: &medikit_core::Settings) -> Self {
        Self {
            enable_rerank: settings.enable_rerank,
            enable_ml_rerank: settings.enable_ml_rerank,
            enable_ranking_optimization: settings.enable_ranking_optimization,
        }
    }
}

/// Ranked evidence ready for answer synthesis.
#[derive(Debug, Clone)]
pub struct RagResponse {
    pub query: String,
    pub documents: Vec<RetrievalResult>,
    pub fused_count: usize,
}

/// Multi-path retrieval with learned reranking.
pub struct AdvancedRag {
    fusion: MultiRetrieval,
    scorer: RelevanceScorer,
    cross_encoder: Option<CrossEncoderReranker>,
    ml_reranker: Option<MlReranker>,
    optimizer: Option<RankingOptimizer>,
}

impl AdvancedRag {
    pub fn new(fusion: MultiRetrieval, config: RagConfig) -> Self {
        Self {
            fusion,
            scorer: RelevanceScorer::new(),
            cross_encoder: config.enable_rerank.then(CrossEncoderReranker::new),
            ml_reranker: config.enable_ml_rerank.then(MlReranker::new),
            optimizer: config.enable_ranking_optimization.then(RankingOptimizer::new),
        }
    }

    /// Retrieve, rerank, and order evidence for a query.
    pub async fn retrieve(
        &self,
        query: &str,
        top_k: usize,
        flags: RetrievalFlags,
    ) -> RagResponse {
        let mut documents = self.fusion.retrieve(query, top_k * 2, flags).await;
        let fused_count = documents.len();
        if documents.is_empty() {
            info!(query, "no documents retrieved");
            return RagResponse {
                query: query.to_string(),
                documents,
                fused_count,
            };
        }

        documents = self.scorer.score_and_sort(
            documents,
            query,
            &ExtractedEntities::default(),
            QuestionType::GeneralConsultation,
        );

        if let Some(stage) = &self.cross_encoder {
            documents = stage.rerank(query, documents);
        }
        if let Some(stage) = &self.ml_reranker {
            documents = stage.rerank(query, documents);
        }
        if let Some(stage) = &self.optimizer {
            documents = stage.rerank(query, documents);
        }

        documents = Self::final_ranking(documents);
        documents.truncate(top_k);

        info!(query, count = documents.len(), "advanced retrieval complete");
        RagResponse {
            query: query.to_string(),
            documents,
            fused_count,
        }
    }

    /// Final ordering: a weighted sum over every score a result collected.
    /// A stage that never ran contributes zero.
    fn final_ranking(mut documents: Vec<RetrievalResult>) -> Vec<RetrievalResult> {
        for doc in documents.iter_mut() {
            let mut score = 0.0;
            if let Some(relevance) = doc.scores.relevance {
                score += relevance * FINAL_RELEVANCE_WEIGHT;
            }
            if let Some(bge) = doc.scores.bge {
                score += bge * FINAL_BGE_WEIGHT;
            }
            if let Some(ml) = doc.scores.ml {
                score += ml * FINAL_ML_WEIGHT;
            }
            if let Some(optimized) = doc.scores.optimized {
                score += optimized * FINAL_OPTIMIZED_WEIGHT;
            }
            if let Some(rrf) = doc.scores.rrf {
                score += rrf * FINAL_RRF_WEIGHT;
            }
            doc.final_score = score;
        }
        documents.sort_by(|a, b| {
            b.final_score
                .partial_cmp(&a.final_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        documents
    }

    /// Format ranked evidence into a cited context block for the prompt.
    pub fn format_context(response: &RagResponse) -> String {
        let mut parts = Vec::new();
        for (i, doc) in response.documents.iter().enumerate() {
            let mut citation = format!("[来源{}: {}", i + 1, doc.source);
            if let Some(page) = doc.metadata.get("page").and_then(|v| v.as_u64()) {
                citation.push_str(&format!(", 页码: {}", page));
            }
            citation.push_str(&format!(", 相关性: {:.2}]", doc.final_score));
            parts.push(format!("{}\n{}", citation, doc.text));
        }
        parts.join("\n\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Retriever;
    use async_trait::async_trait;
    use medikit_core::RetrievalMethod;
    use std::collections::HashSet;
    use std::sync::Arc;

    struct FixedRetriever(Vec<RetrievalResult>);

    #[async_trait]
    impl Retriever for FixedRetriever {
        fn name(&self) -> &'static str {
            "fixed"
        }
        async fn retrieve(&self, _query: &str, _top_k: usize) -> Vec<RetrievalResult> {
            self.0.clone()
        }
    }

    fn rag(texts: &[&str]) -> AdvancedRag {
        let results: Vec<RetrievalResult> = texts
            .iter()
            .map(|t| RetrievalResult::new(*t, "指南", RetrievalMethod::Vector))
            .collect();
        let fusion = MultiRetrieval::new(Some(Arc::new(FixedRetriever(results))), None, None, None);
        AdvancedRag::new(fusion, RagConfig::default())
    }

    #[tokio::test]
    async fn pipeline_scores_every_stage_and_orders_by_final_score() {
        let rag = rag(&[
            "骨折康复训练。",
            "高血压饮食应当低盐低脂，每日盐摄入不超过6克。",
        ]);

        let response = rag
            .retrieve("高血压饮食", 10, RetrievalFlags::default())
            .await;
        assert_eq!(response.documents.len(), 2);

        let top = &response.documents[0];
        assert!(top.text.contains("高血压"));
        assert!(top.scores.relevance.is_some());
        assert!(top.scores.bge.is_some());
        assert!(top.scores.ml.is_some());
        assert!(top.scores.optimized.is_some());
        assert!(top.scores.rrf.is_some());
        assert!(top.final_score > response.documents[1].final_score);

        // Monotone: ordering follows final_score descending.
        let scores: Vec<f32> = response.documents.iter().map(|d| d.final_score).collect();
        assert!(scores.windows(2).all(|w| w[0] >= w[1]));
    }

    #[tokio::test]
    async fn rerank_chain_is_a_permutation_until_truncation() {
        let texts: Vec<String> = (0..6).map(|i| format!("文档{}的内容与高血压相关。", i)).collect();
        let text_refs: Vec<&str> = texts.iter().map(|s| s.as_str()).collect();
        let rag = rag(&text_refs);

        let full = rag.retrieve("高血压", 10, RetrievalFlags::default()).await;
        let returned: HashSet<&str> = full.documents.iter().map(|d| d.text.as_str()).collect();
        let expected: HashSet<&str> = text_refs.iter().copied().collect();
        assert_eq!(returned, expected);

        let truncated = rag.retrieve("高血压", 3, RetrievalFlags::default()).await;
        assert_eq!(truncated.documents.len(), 3);
    }

    #[tokio::test]
    async fn disabled_stages_contribute_zero_weight() {
        let results = vec![RetrievalResult::new(
            "高血压饮食应当低盐。",
            "指南",
            RetrievalMethod::Vector,
        )];
        let fusion = MultiRetrieval::new(Some(Arc::new(FixedRetriever(results))), None, None, None);
        let rag = AdvancedRag::new(
            fusion,
            RagConfig {
                enable_rerank: false,
                enable_ml_rerank: false,
                enable_ranking_optimization: false,
            },
        );

        let response = rag.retrieve("高血压", 5, RetrievalFlags::default()).await;
        let doc = &response.documents[0];
        assert!(doc.scores.bge.is_none());
        assert!(doc.scores.ml.is_none());
        // Only relevance and rrf contribute.
        let expected = doc.scores.relevance.unwrap() * 0.3 + doc.scores.rrf.unwrap() * 0.1;
        assert!((doc.final_score - expected).abs() < 1e-6);
    }

    #[tokio::test]
    async fn context_formatting_cites_sources() {
        let rag = rag(&["高血压饮食应当低盐。"]);
        let response = rag.retrieve("高血压", 5, RetrievalFlags::default()).await;
        let context = AdvancedRag::format_context(&response);
        assert!(context.contains("[来源1: 指南"));
        assert!(context.contains("相关性:"));
        assert!(context.contains("高血压饮食应当低盐。"));
    }
}
