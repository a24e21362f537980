//! Pointwise reranking stages.
//!
//! Three optional stages run in order: a cross-encoder-style scorer
//! (`bge` score), a learned pointwise reranker (`svm`/`dtree`/`ml`
//! scores), and a ranking optimizer (`ranking`/`optimized` scores). Every
//! stage re-sorts but never drops a result, so the chain's output is a
//! permutation of its input.

use crate::bm25::tokenize;
use medikit_core::RetrievalResult;
use std::collections::HashSet;
use tracing::debug;

/// A rerank stage: rescoring plus a re-sort, no drops.
pub trait Reranker: Send + Sync {
    fn name(&self) -> &'static str;

    fn rerank(&self, query: &str, results: Vec<RetrievalResult>) -> Vec<RetrievalResult>;
}

fn sort_by(results: &mut [RetrievalResult], key: fn(&RetrievalResult) -> f32) {
    results.sort_by(|a, b| key(b).partial_cmp(&key(a)).unwrap_or(std::cmp::Ordering::Equal));
}

/// Cross-encoder scorer over query/document pairs.
///
/// Scores are a Dice coefficient over the BM25 token sets, which keeps the
/// output in `[0, 1]` and fully deterministic.
pub struct CrossEncoderReranker;

impl CrossEncoderReranker {
    pub fn new() -> Self {
        Self
    }

    /// Pair score in `[0, 1]`.
    pub fn score(&self, query: &str, text: &str) -> f32 {
        let query_tokens: HashSet<String> = tokenize(query).into_iter().collect();
        let doc_tokens: HashSet<String> = tokenize(text).into_iter().collect();
        if query_tokens.is_empty() || doc_tokens.is_empty() {
            return 0.0;
        }
        let intersection = query_tokens.intersection(&doc_tokens).count() as f32;
        2.0 * intersection / (query_tokens.len() + doc_tokens.len()) as f32
    }
}

impl Default for CrossEncoderReranker {
    fn default() -> Self {
        Self::new()
    }
}

impl Reranker for CrossEncoderReranker {
    fn name(&self) -> &'static str {
        "cross_encoder"
    }

    fn rerank(&self, query: &str, mut results: Vec<RetrievalResult>) -> Vec<RetrievalResult> {
        for result in results.iter_mut() {
            result.scores.bge = Some(self.score(query, &result.text));
        }
        sort_by(&mut results, |r| r.scores.bge.unwrap_or(0.0));
        debug!(count = results.len(), "cross-encoder rerank");
        results
    }
}

/// Pointwise feature vector shared by the learned stages.
///
/// Layout: query length, doc length, length delta, token-overlap ratio,
/// raw score, rrf score, relevance score, one-hot retrieval method
/// (vector/bm25/semantic/kg/unknown), keyword match count, keyword match
/// ratio, chunk index.
pub fn extract_features(query: &str, result: &RetrievalResult) -> Vec<f32> {
    let mut features = Vec::with_capacity(15);

    let query_chars = query.chars().count() as f32;
    let doc_chars = result.text.chars().count() as f32;
    features.push(query_chars);
    features.push(doc_chars);
    features.push((query_chars - doc_chars).abs());

    let query_tokens: HashSet<String> = tokenize(query).into_iter().collect();
    let doc_tokens: HashSet<String> = tokenize(&result.text).into_iter().collect();
    let overlap = if query_tokens.is_empty() {
        0.0
    } else {
        query_tokens.intersection(&doc_tokens).count() as f32 / query_tokens.len() as f32
    };
    features.push(overlap);

    features.push(result.score);
    features.push(result.scores.rrf.unwrap_or(0.0));
    features.push(result.scores.relevance.unwrap_or(0.0));

    let method = result.method.as_str();
    for candidate in ["vector", "bm25", "semantic", "knowledge_graph", "unknown"] {
        features.push(if method == candidate { 1.0 } else { 0.0 });
    }

    let keyword_matches = query_tokens
        .iter()
        .filter(|t| result.text.contains(t.as_str()))
        .count() as f32;
    features.push(keyword_matches);
    features.push(if query_tokens.is_empty() {
        0.0
    } else {
        keyword_matches / query_tokens.len() as f32
    });

    let chunk_index = result.metadata_count("chunk_index") as f32;
    features.push(chunk_index);

    features
}

/// Learned pointwise reranker.
///
/// The scoring heads are fixed linear models over [`extract_features`]:
/// the `svm` head maps through a sigmoid to a probability, the `dtree`
/// head is a shallow threshold cascade. When both run, `ml` is their mean.
pub struct MlReranker {
    pub use_svm: bool,
    pub use_dtree: bool,
}

impl MlReranker {
    pub fn new() -> Self {
        Self {
            use_svm: true,
            use_dtree: true,
        }
    }

    fn svm_score(features: &[f32]) -> f32 {
        // Overlap, fused score, relevance, and keyword ratio carry the
        // signal; lengths only dampen degenerate results.
        let z = -1.2
            + 2.6 * features[3]
            + 8.0 * features[5]
            + 1.4 * features[6]
            + 1.8 * features[13]
            + 0.002 * features[1].min(500.0);
        1.0 / (1.0 + (-z).exp())
    }

    fn dtree_score(features: &[f32]) -> f32 {
        let overlap = features[3];
        let relevance = features[6];
        if overlap >= 0.6 {
            if relevance >= 0.5 {
                0.9
            } else {
                0.75
            }
        } else if overlap >= 0.3 {
            0.6
        } else if relevance >= 0.5 {
            0.45
        } else {
            0.2
        }
    }
}

impl Default for MlReranker {
    fn default() -> Self {
        Self::new()
    }
}

impl Reranker for MlReranker {
    fn name(&self) -> &'static str {
        "ml_reranker"
    }

    fn rerank(&self, query: &str, mut results: Vec<RetrievalResult>) -> Vec<RetrievalResult> {
        if !self.use_svm && !self.use_dtree {
            return results;
        }

        for result in results.iter_mut() {
            let features = extract_features(query, result);
            if self.use_svm {
                let score = Self::svm_score(&features);
                result.scores.svm = Some(score);
                result.scores.ml = Some(score);
            }
            if self.use_dtree {
                let score = Self::dtree_score(&features);
                result.scores.dtree = Some(score);
                result.scores.ml = Some(match result.scores.svm {
                    Some(svm) => (svm + score) / 2.0,
                    None => score,
                });
            }
        }

        sort_by(&mut results, |r| r.scores.ml.unwrap_or(0.0));
        debug!(count = results.len(), "ml rerank");
        results
    }
}

/// Final learned stage with position-aware features.
///
/// Scores combine the best signal seen so far with a mild decay on the
/// original position, so earlier evidence wins ties.
pub struct RankingOptimizer;

impl RankingOptimizer {
    pub fn new() -> Self {
        Self
    }

    fn score(result: &RetrievalResult, position: usize) -> f32 {
        let best = [
            result.scores.relevance,
            result.scores.bge,
            result.scores.ml,
            result.scores.rrf,
            Some(result.score),
        ]
        .into_iter()
        .flatten()
        .fold(0.0f32, f32::max);

        let position_decay = 1.0 / (position as f32 + 1.0);
        best * (0.9 + 0.1 * position_decay)
    }
}

impl Default for RankingOptimizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Reranker for RankingOptimizer {
    fn name(&self) -> &'static str {
        "ranking_optimizer"
    }

    fn rerank(&self, _query: &str, mut results: Vec<RetrievalResult>) -> Vec<RetrievalResult> {
        for (position, result) in results.iter_mut().enumerate() {
            let score = Self::score(result, position);
            result.scores.ranking = Some(score);
            result.scores.optimized = Some(score);
        }
        sort_by(&mut results, |r| r.scores.ranking.unwrap_or(0.0));
        debug!(count = results.len(), "ranking optimization");
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use medikit_core::RetrievalMethod;

    fn result(text: &str, method: RetrievalMethod) -> RetrievalResult {
        RetrievalResult::new(text, "unit", method)
    }

    #[test]
    fn cross_encoder_prefers_overlapping_documents() {
        let reranker = CrossEncoderReranker::new();
        let results = vec![
            result("骨折术后康复训练。", RetrievalMethod::Vector),
            result("高血压饮食应当低盐。", RetrievalMethod::Vector),
        ];

        let reranked = reranker.rerank("高血压饮食", results);
        assert!(reranked[0].text.contains("高血压"));
        let top = reranked[0].scores.bge.unwrap();
        assert!(top > 0.0 && top <= 1.0);
        assert!(top > reranked[1].scores.bge.unwrap());
    }

    #[test]
    fn feature_vector_has_stable_layout() {
        let mut r = result("高血压饮食建议低盐。", RetrievalMethod::Bm25).with_score(1.5);
        r.metadata.insert("chunk_index".into(), serde_json::json!(4));
        let features = extract_features("高血压饮食", &r);

        assert_eq!(features.len(), 15);
        // One-hot: bm25 flag set, the others clear.
        assert_eq!(&features[7..12], &[0.0, 1.0, 0.0, 0.0, 0.0]);
        assert_eq!(features[14], 4.0);
        assert!(features[3] > 0.0);
    }

    #[test]
    fn ml_reranker_fuses_svm_and_tree() {
        let reranker = MlReranker::new();
        let results = vec![
            result("高血压饮食应当低盐低脂，每日盐摄入不超过6克。", RetrievalMethod::Vector),
            result("与查询完全无关的一段文字。", RetrievalMethod::Bm25),
        ];

        let reranked = reranker.rerank("高血压饮食", results);
        for r in &reranked {
            let svm = r.scores.svm.unwrap();
            let dtree = r.scores.dtree.unwrap();
            assert!((r.scores.ml.unwrap() - (svm + dtree) / 2.0).abs() < 1e-6);
        }
        assert!(reranked[0].text.contains("高血压"));
    }

    #[test]
    fn disabled_stages_leave_results_untouched() {
        let reranker = MlReranker {
            use_svm: false,
            use_dtree: false,
        };
        let results = vec![result("甲", RetrievalMethod::Vector)];
        let reranked = reranker.rerank("查询", results);
        assert!(reranked[0].scores.ml.is_none());
    }

    #[test]
    fn chain_preserves_the_candidate_set() {
        let chain: Vec<Box<dyn Reranker>> = vec![
            Box::new(CrossEncoderReranker::new()),
            Box::new(MlReranker::new()),
            Box::new(RankingOptimizer::new()),
        ];

        let mut results = vec![
            result("高血压饮食应当低盐。", RetrievalMethod::Vector),
            result("骨折康复训练计划。", RetrievalMethod::Bm25),
            result("头痛可能与高血压有关。", RetrievalMethod::KnowledgeGraph),
        ];
        let original: HashSet<String> = results.iter().map(|r| r.text.clone()).collect();

        for stage in &chain {
            results = stage.rerank("高血压饮食", results);
        }

        let after: HashSet<String> = results.iter().map(|r| r.text.clone()).collect();
        assert_eq!(original, after);
        assert!(results.iter().all(|r| r.scores.optimized.is_some()));
    }

    #[test]
    fn optimizer_records_both_score_aliases() {
        let optimizer = RankingOptimizer::new();
        let mut r = result("文本", RetrievalMethod::Vector);
        r.scores.relevance = Some(0.8);
        let reranked = optimizer.rerank("查询", vec![r]);
        assert_eq!(reranked[0].scores.ranking, reranked[0].scores.optimized);
        assert!(reranked[0].scores.ranking.unwrap() > 0.0);
    }
}
