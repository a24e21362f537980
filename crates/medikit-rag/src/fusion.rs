//! Multi-path retrieval with weighted Reciprocal Rank Fusion.
//!
//! The four sub-retrievers run with independent fate: any path failing or
//! returning nothing simply drops out, its weight is redistributed over the
//! paths that answered, and fusion proceeds. Ordering is deterministic for
//! identical inputs: documents are sorted by fused score with ties broken
//! by first appearance in the fusion input.

use crate::kg::KnowledgeGraphRetriever;
use crate::semantic::SemanticRetriever;
use crate::Retriever;
use medikit_core::RetrievalResult;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// RRF constant from the original formulation.
pub const RRF_K: f32 = 60.0;

/// Which retrieval paths a call enables.
#[derive(Debug, Clone, Copy)]
pub struct RetrievalFlags {
    pub vector: bool,
    pub bm25: bool,
    pub semantic: bool,
    pub kg: bool,
}

impl Default for RetrievalFlags {
    fn default() -> Self {
        Self {
            vector: true,
            bm25: true,
            semantic: true,
            kg: true,
        }
    }
}

/// Path weights, normalized before use.
#[derive(Debug, Clone, Copy)]
pub struct FusionWeights {
    pub vector: f32,
    pub bm25: f32,
    pub semantic: f32,
    pub kg: f32,
}

impl Default for FusionWeights {
    fn default() -> Self {
        Self {
            vector: 0.4,
            bm25: 0.3,
            semantic: 0.2,
            kg: 0.1,
        }
    }
}

impl FusionWeights {
    pub fn from_settings(settings: &medikit_core::Settings) -> Self {
        let [vector, bm25, semantic, kg] = settings.retrieval_weights();
        Self {
            vector,
            bm25,
            semantic,
            kg,
        }
    }
}

/// Per-method result counts from a stats probe.
#[derive(Debug, Clone, Default)]
pub struct RetrievalStats {
    pub vector: usize,
    pub bm25: usize,
    pub kg: usize,
    pub total: usize,
}

/// Weighted RRF over ranked lists.
///
/// `score(doc) = Σ weight / (k + rank)` with 1-based ranks, documents keyed
/// by body text; the first-seen instance keeps the full payload and its
/// fused score lands in `scores.rrf`.
pub fn weighted_rrf(
    lists: Vec<(Vec<RetrievalResult>, f32)>,
    k: f32,
) -> Vec<RetrievalResult> {
    let mut scores: HashMap<String, f32> = HashMap::new();
    let mut order: Vec<String> = Vec::new();
    let mut payloads: HashMap<String, RetrievalResult> = HashMap::new();

    for (results, weight) in lists {
        for (index, result) in results.into_iter().enumerate() {
            if result.text.is_empty() {
                continue;
            }
            let rank = index as f32 + 1.0;
            let key = result.text.clone();
            *scores.entry(key.clone()).or_insert(0.0) += weight / (k + rank);
            if !payloads.contains_key(&key) {
                order.push(key.clone());
                payloads.insert(key, result);
            }
        }
    }

    // Walk in first-seen order so the stable sort breaks ties
    // deterministically.
    let mut fused: Vec<RetrievalResult> = order
        .into_iter()
        .map(|key| {
            let mut result = payloads.remove(&key).expect("payload recorded");
            result.scores.rrf = Some(scores[&key]);
            result
        })
        .collect();

    fused.sort_by(|a, b| {
        b.scores
            .rrf
            .partial_cmp(&a.scores.rrf)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    fused
}

/// Drop near-duplicates, keyed by the first 100 characters of the body.
pub fn deduplicate(results: Vec<RetrievalResult>) -> Vec<RetrievalResult> {
    let mut seen = std::collections::HashSet::new();
    results
        .into_iter()
        .filter(|r| seen.insert(r.dedup_key()))
        .collect()
}

/// Fan-out retriever fusing vector, BM25, semantic, and knowledge-graph
/// paths.
pub struct MultiRetrieval {
    vector: Option<Arc<dyn Retriever>>,
    bm25: Option<Arc<dyn Retriever>>,
    semantic: Option<Arc<SemanticRetriever>>,
    kg: Option<Arc<KnowledgeGraphRetriever>>,
    weights: FusionWeights,
}

impl MultiRetrieval {
    pub fn new(
        vector: Option<Arc<dyn Retriever>>,
        bm25: Option<Arc<dyn Retriever>>,
        semantic: Option<Arc<SemanticRetriever>>,
        kg: Option<Arc<KnowledgeGraphRetriever>>,
    ) -> Self {
        Self {
            vector,
            bm25,
            semantic,
            kg,
            weights: FusionWeights::default(),
        }
    }

    pub fn with_weights(mut self, weights: FusionWeights) -> Self {
        self.weights = weights;
        self
    }

    /// Retrieve through every enabled path and fuse the results.
    pub async fn retrieve(
        &self,
        query: &str,
        top_k: usize,
        flags: RetrievalFlags,
    ) -> Vec<RetrievalResult> {
        // Vector, BM25, and KG fan out concurrently; each failure is
        // contained inside its retriever and surfaces as an empty list.
        let vector_fut = async {
            match (&self.vector, flags.vector) {
                (Some(retriever), true) => retriever.retrieve(query, top_k * 2).await,
                _ => Vec::new(),
            }
        };
        let bm25_fut = async {
            match (&self.bm25, flags.bm25) {
                (Some(retriever), true) => retriever.retrieve(query, top_k * 2).await,
                _ => Vec::new(),
            }
        };
        let kg_fut = async {
            match (&self.kg, flags.kg) {
                (Some(retriever), true) => retriever.retrieve(query, top_k).await,
                _ => Vec::new(),
            }
        };
        let (vector_results, bm25_results, kg_results) =
            tokio::join!(vector_fut, bm25_fut, kg_fut);

        // The semantic path re-scores the vector candidates rather than
        // embedding the corpus, so it runs once those are in.
        let semantic_results = match (&self.semantic, flags.semantic) {
            (Some(retriever), true) if !vector_results.is_empty() => {
                retriever.semantic_search(query, &vector_results, top_k).await
            }
            _ => Vec::new(),
        };

        let mut lists: Vec<(Vec<RetrievalResult>, f32)> = Vec::new();
        for (results, weight, name) in [
            (vector_results, self.weights.vector, "vector"),
            (bm25_results, self.weights.bm25, "bm25"),
            (semantic_results, self.weights.semantic, "semantic"),
            (kg_results, self.weights.kg, "kg"),
        ] {
            if results.is_empty() {
                continue;
            }
            info!(path = name, count = results.len(), "retrieval path produced results");
            lists.push((results, weight));
        }

        if lists.is_empty() {
            warn!("all retrieval paths returned empty, nothing to fuse");
            return Vec::new();
        }

        // Renormalize over the paths that actually produced results.
        let total_weight: f32 = lists.iter().map(|(_, w)| w).sum();
        if total_weight > 0.0 {
            for (_, weight) in lists.iter_mut() {
                *weight /= total_weight;
            }
        }

        let fused = weighted_rrf(lists, RRF_K);
        let mut unique = deduplicate(fused);
        unique.truncate(top_k);

        info!(query, count = unique.len(), "multi-path retrieval fused");
        unique
    }

    /// Probe each path with a small query, for diagnostics.
    pub async fn stats(&self, query: &str) -> RetrievalStats {
        let mut stats = RetrievalStats::default();
        if let Some(vector) = &self.vector {
            stats.vector = vector.retrieve(query, 5).await.len();
        }
        if let Some(bm25) = &self.bm25 {
            stats.bm25 = bm25.retrieve(query, 5).await.len();
        }
        if let Some(kg) = &self.kg {
            stats.kg = kg.retrieve(query, 5).await.len();
        }
        stats.total = stats.vector + stats.bm25 + stats.kg;
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use medikit_core::RetrievalMethod;

    fn result(text: &str, method: RetrievalMethod) -> RetrievalResult {
        RetrievalResult::new(text, "unit", method)
    }

    struct FixedRetriever {
        name: &'static str,
        results: Vec<RetrievalResult>,
    }

    #[async_trait]
    impl Retriever for FixedRetriever {
        fn name(&self) -> &'static str {
            self.name
        }
        async fn retrieve(&self, _query: &str, _top_k: usize) -> Vec<RetrievalResult> {
            self.results.clone()
        }
    }

    fn fixed(name: &'static str, method: RetrievalMethod, texts: &[&str]) -> Arc<dyn Retriever> {
        Arc::new(FixedRetriever {
            name,
            results: texts.iter().map(|t| result(t, method)).collect(),
        })
    }

    #[test]
    fn rrf_scores_are_exact() {
        let vector = vec![
            result("A", RetrievalMethod::Vector),
            result("B", RetrievalMethod::Vector),
            result("C", RetrievalMethod::Vector),
        ];
        let bm25 = vec![
            result("B", RetrievalMethod::Bm25),
            result("A", RetrievalMethod::Bm25),
            result("D", RetrievalMethod::Bm25),
        ];

        let fused = weighted_rrf(vec![(vector, 0.4), (bm25, 0.3)], 60.0);
        let score = |text: &str| {
            fused
                .iter()
                .find(|r| r.text == text)
                .and_then(|r| r.scores.rrf)
                .unwrap()
        };

        assert!((score("A") - (0.4 / 61.0 + 0.3 / 62.0)).abs() < 1e-6);
        assert!((score("B") - (0.4 / 62.0 + 0.3 / 61.0)).abs() < 1e-6);
        assert!((score("C") - 0.4 / 63.0).abs() < 1e-6);
        assert!((score("D") - 0.3 / 63.0).abs() < 1e-6);

        // Deterministic ordering by fused score.
        let order: Vec<&str> = fused.iter().map(|r| r.text.as_str()).collect();
        assert_eq!(order, vec!["A", "B", "C", "D"]);
        // First-seen payload wins: A carries the vector-path method.
        assert_eq!(fused[0].method, RetrievalMethod::Vector);
    }

    #[test]
    fn unanimous_top_document_beats_all_lower_ranked() {
        // A document ranked 1 by every list must outscore one ranked >= 2
        // everywhere, for any weights summing to 1.
        let lists = vec![
            (
                vec![result("top", RetrievalMethod::Vector), result("second", RetrievalMethod::Vector)],
                0.7,
            ),
            (
                vec![result("top", RetrievalMethod::Bm25), result("second", RetrievalMethod::Bm25)],
                0.3,
            ),
        ];
        let fused = weighted_rrf(lists, 60.0);
        assert_eq!(fused[0].text, "top");
        assert!(fused[0].scores.rrf.unwrap() > fused[1].scores.rrf.unwrap());
    }

    #[test]
    fn dedup_keys_on_first_100_chars() {
        let long_a = format!("{}后缀一", "甲".repeat(100));
        let long_b = format!("{}后缀二", "甲".repeat(100));
        let results = vec![
            result(&long_a, RetrievalMethod::Vector),
            result(&long_b, RetrievalMethod::Bm25),
            result("独立文本", RetrievalMethod::Bm25),
        ];
        let unique = deduplicate(results);
        assert_eq!(unique.len(), 2);
        // First-seen instance keeps its payload.
        assert_eq!(unique[0].method, RetrievalMethod::Vector);
    }

    #[tokio::test]
    async fn surviving_paths_carry_a_failed_one() {
        // KG path yields nothing (no graph behind it); vector and bm25
        // still fuse.
        let fusion = MultiRetrieval::new(
            Some(fixed("vector", RetrievalMethod::Vector, &["文档一", "文档二"])),
            Some(fixed("bm25", RetrievalMethod::Bm25, &["文档二", "文档三"])),
            None,
            None,
        );

        let results = fusion.retrieve("查询", 10, RetrievalFlags::default()).await;
        assert_eq!(results.len(), 3);
        // 文档二 appears in both lists and wins.
        assert_eq!(results[0].text, "文档二");
        assert!(results.iter().all(|r| r.scores.rrf.is_some()));
    }

    #[tokio::test]
    async fn disabled_paths_are_skipped() {
        let fusion = MultiRetrieval::new(
            Some(fixed("vector", RetrievalMethod::Vector, &["甲"])),
            Some(fixed("bm25", RetrievalMethod::Bm25, &["乙"])),
            None,
            None,
        );

        let flags = RetrievalFlags {
            bm25: false,
            ..Default::default()
        };
        let results = fusion.retrieve("查询", 10, flags).await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].text, "甲");
        // Sole surviving path carries normalized weight 1.
        assert!((results[0].scores.rrf.unwrap() - 1.0 / 61.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn empty_everything_returns_empty() {
        let fusion = MultiRetrieval::new(None, None, None, None);
        assert!(fusion
            .retrieve("查询", 5, RetrievalFlags::default())
            .await
            .is_empty());
    }
}
