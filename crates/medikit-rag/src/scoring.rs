//! Relevance scoring for knowledge-graph results.

use medikit_core::{ExtractedEntities, QuestionType, RetrievalResult};
use std::collections::HashSet;

const ENTITY_MATCH_WEIGHT: f32 = 0.4;
const QUERY_SIMILARITY_WEIGHT: f32 = 0.3;
const RELATIONSHIP_WEIGHT: f32 = 0.2;
const COMPLETENESS_WEIGHT: f32 = 0.1;

/// Weighted-sum scorer producing a relevance score in `[0, 1]`.
pub struct RelevanceScorer;

impl RelevanceScorer {
    pub fn new() -> Self {
        Self
    }

    /// Score every result and sort descending by relevance.
    pub fn score_and_sort(
        &self,
        mut results: Vec<RetrievalResult>,
        query: &str,
        entities: &ExtractedEntities,
        question_type: QuestionType,
    ) -> Vec<RetrievalResult> {
        for result in results.iter_mut() {
            let score = self.score(result, query, entities, question_type);
            result.scores.relevance = Some(score);
        }
        results.sort_by(|a, b| {
            b.scores
                .relevance
                .partial_cmp(&a.scores.relevance)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        results
    }

    fn score(
        &self,
        result: &RetrievalResult,
        query: &str,
        entities: &ExtractedEntities,
        question_type: QuestionType,
    ) -> f32 {
        let score = self.entity_match(result, entities) * ENTITY_MATCH_WEIGHT
            + self.query_similarity(result, query) * QUERY_SIMILARITY_WEIGHT
            + self.relationship_strength(result, question_type) * RELATIONSHIP_WEIGHT
            + self.completeness(result) * COMPLETENESS_WEIGHT;
        score.min(1.0)
    }

    /// Share of extracted entities mentioned in the result text or named as
    /// the result's anchor entity. With no entities extracted, a neutral
    /// 0.5.
    fn entity_match(&self, result: &RetrievalResult, entities: &ExtractedEntities) -> f32 {
        let total = entities.total();
        if total == 0 {
            return 0.5;
        }

        let text = result.text.to_lowercase();
        let anchor = result
            .metadata
            .get("entity_name")
            .and_then(|v| v.as_str())
            .unwrap_or("");

        let mut matched = 0usize;
        for entity_type in medikit_core::EntityType::all() {
            for name in entities.get(entity_type) {
                if text.contains(&name.to_lowercase()) || anchor == name {
                    matched += 1;
                }
            }
        }
        matched as f32 / total as f32
    }

    /// Jaccard overlap of whitespace tokens, damped for very short texts.
    fn query_similarity(&self, result: &RetrievalResult, query: &str) -> f32 {
        let query_lower = query.to_lowercase();
        let text_lower = result.text.to_lowercase();
        let query_words: HashSet<&str> = query_lower.split_whitespace().collect();
        let text_words: HashSet<&str> = text_lower.split_whitespace().collect();

        if query_words.is_empty() || text_words.is_empty() {
            return 0.0;
        }

        let intersection = query_words.intersection(&text_words).count();
        let union = query_words.union(&text_words).count();
        if union == 0 {
            return 0.0;
        }
        let jaccard = intersection as f32 / union as f32;

        let length_damping = (result.text.chars().count() as f32 / 100.0).min(1.0);
        jaccard * length_damping
    }

    /// Log-damped count of related entities, weighted per question type.
    fn relationship_strength(&self, result: &RetrievalResult, question_type: QuestionType) -> f32 {
        let weights: &[(&str, f32)] = match question_type {
            QuestionType::DiseaseInfo => &[
                ("symptoms_count", 0.3),
                ("drugs_count", 0.3),
                ("exams_count", 0.2),
            ],
            QuestionType::SymptomDiagnosis => {
                &[("diseases_count", 0.5), ("exams_count", 0.3)]
            }
            QuestionType::DrugInfo => &[("diseases_count", 0.5)],
            QuestionType::TreatmentPlan => &[
                ("symptoms_count", 0.2),
                ("drugs_count", 0.4),
                ("exams_count", 0.2),
            ],
            _ => &[
                ("symptoms_count", 0.25),
                ("drugs_count", 0.25),
                ("exams_count", 0.25),
                ("diseases_count", 0.25),
            ],
        };

        let mut score = 0.0;
        for (key, weight) in weights {
            let count = result.metadata_count(key) as f32;
            let normalized = ((count + 1.0).ln() / 10f32.ln()).min(1.0);
            score += normalized * weight;
        }
        score.min(1.0)
    }

    /// Structural completeness of the result.
    fn completeness(&self, result: &RetrievalResult) -> f32 {
        let mut score: f32 = 0.0;

        if result.text.chars().count() >= 20 {
            score += 0.3;
        }
        if !result.metadata.is_empty() {
            score += 0.2;
        }

        let non_zero = ["symptoms_count", "drugs_count", "exams_count", "diseases_count"]
            .iter()
            .filter(|key| result.metadata_count(key) > 0)
            .count();
        if non_zero >= 2 {
            score += 0.3;
        } else if non_zero == 1 {
            score += 0.2;
        }

        if !result.source.is_empty() {
            score += 0.2;
        }

        score.min(1.0)
    }
}

impl Default for RelevanceScorer {
    fn default() -> Self {
        Self::new()
    }
}
