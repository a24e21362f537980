//! Question-type classification and retrieval-strategy selection.

use medikit_core::{EntityType, ExtractedEntities, QueryPlan, QuestionType};
use regex::Regex;
use tracing::debug;

struct PatternBundle {
    question_type: QuestionType,
    patterns: Vec<Regex>,
}

/// Pure classifier: `(query, entities) -> QueryPlan`.
pub struct StrategySelector {
    bundles: Vec<PatternBundle>,
}

impl StrategySelector {
    pub fn new() -> Self {
        let compile = |question_type, sources: &[&str]| PatternBundle {
            question_type,
            patterns: sources
                .iter()
                .map(|p| Regex::new(p).expect("static regex"))
                .collect(),
        };

        // Declaration order doubles as the tie-break order.
        let bundles = vec![
            compile(
                QuestionType::DiseaseInfo,
                &[
                    r"什么是(.+?)[？?]",
                    r"(.+?)是什么",
                    r"(.+?)的介绍",
                    r"了解(.+?)",
                    r"(.+?)的症状",
                    r"(.+?)的治疗",
                    r"(.+?)怎么治",
                    r"(.+?)吃什么药",
                ],
            ),
            compile(
                QuestionType::SymptomDiagnosis,
                &[
                    r"(.+?)可能是什么病",
                    r"(.+?)是什么原因",
                    r"(.+?)会不会是(.+?)",
                    r"(.+?)需要检查什么",
                    r"(.+?)怎么办",
                    r"(.+?)怎么治疗",
                    r"根据(.+?)诊断",
                ],
            ),
            compile(
                QuestionType::DrugInfo,
                &[
                    r"(.+?)的作用",
                    r"(.+?)的副作用",
                    r"(.+?)怎么吃",
                    r"(.+?)的用法",
                    r"(.+?)的剂量",
                    r"(.+?)适合(.+?)吗",
                ],
            ),
            compile(
                QuestionType::DrugInteraction,
                &[
                    r"(.+?)和(.+?)能一起吃",
                    r"(.+?)和(.+?)的相互作用",
                    r"(.+?)不能和(.+?)一起",
                    r"药物相互作用",
                ],
            ),
            compile(
                QuestionType::ExaminationAdvice,
                &[
                    r"需要做什么检查",
                    r"(.+?)检查什么",
                    r"(.+?)需要(.+?)检查",
                    r"检查项目",
                    r"化验什么",
                ],
            ),
            compile(
                QuestionType::TreatmentPlan,
                &[
                    r"(.+?)的治疗方案",
                    r"(.+?)怎么治疗",
                    r"(.+?)的治疗方法",
                    r"(.+?)的用药",
                    r"(.+?)的护理",
                ],
            ),
            compile(
                QuestionType::GeneralConsultation,
                &[r"咨询", r"问一下", r"请问", r"帮忙"],
            ),
        ];

        Self { bundles }
    }

    /// Classify the question and emit the retrieval plan.
    pub fn classify(&self, query: &str, entities: &ExtractedEntities) -> QueryPlan {
        let question_type = self.classify_by_pattern(query);
        let question_type = Self::adjust_by_entities(question_type, entities);
        let (strategy, priority, depth, max_results) = Self::strategy_for(question_type);
        let confidence = self.confidence(query, question_type, entities);

        let plan = QueryPlan {
            question_type,
            strategy: strategy.to_string(),
            entity_priority: priority,
            depth,
            max_results,
            confidence,
        };
        debug!(query, question_type = question_type.as_str(), strategy = %plan.strategy, confidence, "query classified");
        plan
    }

    fn classify_by_pattern(&self, query: &str) -> QuestionType {
        let mut best = QuestionType::GeneralConsultation;
        let mut best_hits = 0usize;

        for bundle in &self.bundles {
            let hits = bundle
                .patterns
                .iter()
                .filter(|p| p.is_match(query))
                .count();
            // Strictly greater keeps declaration order on ties.
            if hits > best_hits {
                best_hits = hits;
                best = bundle.question_type;
            }
        }
        best
    }

    /// Promote a general consultation when the entities say more than the
    /// phrasing does.
    fn adjust_by_entities(
        question_type: QuestionType,
        entities: &ExtractedEntities,
    ) -> QuestionType {
        if question_type != QuestionType::GeneralConsultation {
            return question_type;
        }
        if !entities.symptoms.is_empty() && entities.diseases.is_empty() {
            return QuestionType::SymptomDiagnosis;
        }
        if !entities.drugs.is_empty() {
            return QuestionType::DrugInfo;
        }
        if !entities.diseases.is_empty() {
            return QuestionType::DiseaseInfo;
        }
        question_type
    }

    fn strategy_for(
        question_type: QuestionType,
    ) -> (&'static str, Vec<EntityType>, u8, usize) {
        use EntityType::*;
        match question_type {
            QuestionType::DiseaseInfo => (
                "disease_centric",
                vec![Disease, Symptom, Drug, Examination],
                2,
                10,
            ),
            QuestionType::SymptomDiagnosis => {
                ("symptom_centric", vec![Symptom, Disease, Examination], 2, 15)
            }
            QuestionType::DrugInfo => ("drug_centric", vec![Drug, Disease], 1, 10),
            QuestionType::DrugInteraction => ("drug_interaction", vec![Drug], 1, 20),
            QuestionType::ExaminationAdvice => {
                ("examination_centric", vec![Examination, Disease], 1, 10)
            }
            QuestionType::TreatmentPlan => (
                "multi_entity",
                vec![Disease, Symptom, Drug, Examination],
                3,
                20,
            ),
            QuestionType::GeneralConsultation => {
                ("general", vec![Disease, Symptom, Drug, Examination], 2, 10)
            }
        }
    }

    /// Confidence = 0.5 base + pattern evidence (≤ 0.3) + entity evidence
    /// (≤ 0.2), clamped to 1.
    fn confidence(
        &self,
        query: &str,
        question_type: QuestionType,
        entities: &ExtractedEntities,
    ) -> f32 {
        let mut confidence = 0.5f32;

        let pattern_hits = self
            .bundles
            .iter()
            .find(|b| b.question_type == question_type)
            .map(|b| b.patterns.iter().filter(|p| p.is_match(query)).count())
            .unwrap_or(0);
        if pattern_hits > 0 {
            confidence += (pattern_hits as f32 * 0.1).min(0.3);
        }

        let entity_count = entities.total();
        if entity_count > 0 {
            confidence += (entity_count as f32 * 0.05).min(0.2);
        }

        confidence.min(1.0)
    }
}

impl Default for StrategySelector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn symptoms_only(symptoms: &[&str]) -> ExtractedEntities {
        ExtractedEntities {
            symptoms: symptoms.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn symptom_only_query_selects_symptom_centric_strategy() {
        let selector = StrategySelector::new();
        let plan = selector.classify("头痛 头晕", &symptoms_only(&["头痛", "头晕"]));

        assert_eq!(plan.question_type, QuestionType::SymptomDiagnosis);
        assert_eq!(plan.strategy, "symptom_centric");
        assert!(plan.confidence >= 0.55, "confidence {}", plan.confidence);
        assert_eq!(plan.entity_priority[0], EntityType::Symptom);
        assert_eq!(plan.max_results, 15);
    }

    #[test]
    fn disease_question_matches_patterns() {
        let selector = StrategySelector::new();
        let plan = selector.classify("什么是高血压？", &ExtractedEntities::default());
        assert_eq!(plan.question_type, QuestionType::DiseaseInfo);
        assert_eq!(plan.strategy, "disease_centric");
        assert_eq!(plan.depth, 2);
    }

    #[test]
    fn drug_interaction_patterns_win() {
        let selector = StrategySelector::new();
        let plan = selector.classify(
            "阿司匹林和布洛芬能一起吃吗",
            &ExtractedEntities {
                drugs: vec!["阿司匹林".into(), "布洛芬".into()],
                ..Default::default()
            },
        );
        assert_eq!(plan.question_type, QuestionType::DrugInteraction);
        assert_eq!(plan.entity_priority, vec![EntityType::Drug]);
        assert_eq!(plan.max_results, 20);
        assert_eq!(plan.depth, 1);
    }

    #[test]
    fn drug_entities_promote_general_queries() {
        let selector = StrategySelector::new();
        let plan = selector.classify(
            "请问这个可以长期用吗",
            &ExtractedEntities {
                drugs: vec!["缬沙坦".into()],
                ..Default::default()
            },
        );
        assert_eq!(plan.question_type, QuestionType::DrugInfo);
    }

    #[test]
    fn confidence_is_clamped() {
        let selector = StrategySelector::new();
        let mut entities = ExtractedEntities::default();
        entities.diseases = (0..20).map(|i| format!("病{}", i)).collect();
        let plan = selector.classify(
            "什么是高血压？高血压是什么？高血压的症状？高血压的治疗？高血压怎么治？",
            &entities,
        );
        assert!(plan.confidence <= 1.0);
        assert!(plan.confidence >= 0.9);
    }

    #[test]
    fn bare_query_defaults_to_general() {
        let selector = StrategySelector::new();
        let plan = selector.classify("你好", &ExtractedEntities::default());
        assert_eq!(plan.question_type, QuestionType::GeneralConsultation);
        assert_eq!(plan.strategy, "general");
        assert!((plan.confidence - 0.5).abs() < 1e-6);
    }
}
