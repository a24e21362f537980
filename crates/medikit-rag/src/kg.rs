//! Knowledge-graph retrieval: entity linking, strategy-driven Cypher
//! expansion, and relevance-scored evidence blobs.

use crate::entities::EntityRecognizer;
use crate::scoring::RelevanceScorer;
use crate::strategy::StrategySelector;
use crate::Retriever;
use async_trait::async_trait;
use medikit_core::{
    EntityType, ExtractedEntities, QueryPlan, QuestionType, RetrievalMethod, RetrievalResult,
};
use medikit_graph::{params, queries, GraphClient};
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};

const KG_SOURCE: &str = "knowledge_graph";

/// Entity-linked, strategy-selected graph retriever.
pub struct KnowledgeGraphRetriever {
    graph: Option<Arc<dyn GraphClient>>,
    recognizer: Arc<EntityRecognizer>,
    selector: StrategySelector,
    scorer: RelevanceScorer,
    use_kg_validation: bool,
}

impl KnowledgeGraphRetriever {
    pub fn new(graph: Option<Arc<dyn GraphClient>>, recognizer: Arc<EntityRecognizer>) -> Self {
        Self {
            graph,
            recognizer,
            selector: StrategySelector::new(),
            scorer: RelevanceScorer::new(),
            use_kg_validation: true,
        }
    }

    pub fn without_validation(mut self) -> Self {
        self.use_kg_validation = false;
        self
    }

    /// Extract entities, optionally confirmed against the graph.
    pub async fn extract_entities(&self, query: &str) -> ExtractedEntities {
        match (&self.graph, self.use_kg_validation) {
            (Some(graph), true) => {
                self.recognizer
                    .extract_with_validation(query, graph.as_ref())
                    .await
            }
            _ => self.recognizer.extract_entities(query).await,
        }
    }

    async fn execute_strategy(
        &self,
        graph: &dyn GraphClient,
        entities: &ExtractedEntities,
        plan: &QueryPlan,
    ) -> Vec<RetrievalResult> {
        let mut results = Vec::new();
        let per_type_limit = if plan.entity_priority.is_empty() {
            plan.max_results
        } else {
            (plan.max_results / plan.entity_priority.len()).max(1)
        };

        for entity_type in &plan.entity_priority {
            for name in entities.get(*entity_type).iter().take(per_type_limit) {
                let batch = match entity_type {
                    EntityType::Disease => self.retrieve_disease(graph, name).await,
                    EntityType::Symptom => self.retrieve_symptom(graph, name).await,
                    EntityType::Drug => {
                        self.retrieve_drug(graph, name, plan.question_type).await
                    }
                    EntityType::Examination => self.retrieve_examination(graph, name).await,
                    EntityType::Department => Vec::new(),
                };
                results.extend(batch);
            }
        }
        results
    }

    /// Disease-centric expansion: node plus its symptoms, drugs, and exams,
    /// fetched concurrently and composed into one evidence blob.
    async fn retrieve_disease(&self, graph: &dyn GraphClient, name: &str) -> Vec<RetrievalResult> {
        let found = match graph
            .execute_query(queries::FIND_DISEASE_BY_NAME, params([("name", json!(name))]))
            .await
        {
            Ok(rows) => !rows.is_empty(),
            Err(e) => {
                warn!(error = %e, "disease lookup failed");
                return Vec::new();
            }
        };
        if !found {
            return Vec::new();
        }

        let p = params([("disease_name", json!(name))]);
        let (symptoms, drugs, exams) = tokio::join!(
            graph.execute_query(queries::FIND_DISEASE_SYMPTOMS, p.clone()),
            graph.execute_query(queries::FIND_DISEASE_DRUGS, p.clone()),
            graph.execute_query(queries::FIND_DISEASE_EXAMINATIONS, p),
        );
        let symptoms = symptoms.unwrap_or_default();
        let drugs = drugs.unwrap_or_default();
        let exams = exams.unwrap_or_default();

        let mut text_parts = vec![format!("疾病：{}", name)];
        if !symptoms.is_empty() {
            let list: Vec<&str> = symptoms
                .iter()
                .filter_map(|r| r.get("symptom").and_then(|v| v.as_str()))
                .collect();
            text_parts.push(format!("症状：{}", list.join(", ")));
        }
        if !drugs.is_empty() {
            let list: Vec<&str> = drugs
                .iter()
                .filter_map(|r| r.get("drug").and_then(|v| v.as_str()))
                .collect();
            text_parts.push(format!("治疗药物：{}", list.join(", ")));
        }
        if !exams.is_empty() {
            let list: Vec<&str> = exams
                .iter()
                .filter_map(|r| r.get("examination").and_then(|v| v.as_str()))
                .collect();
            text_parts.push(format!("检查项目：{}", list.join(", ")));
        }

        vec![RetrievalResult::new(
            text_parts.join("\n"),
            KG_SOURCE,
            RetrievalMethod::KnowledgeGraph,
        )
        .with_score(1.0)
        .with_metadata("entity_type", "Disease")
        .with_metadata("entity_name", name)
        .with_metadata("symptoms_count", symptoms.len())
        .with_metadata("drugs_count", drugs.len())
        .with_metadata("exams_count", exams.len())]
    }

    /// Symptom-centric expansion: diseases presenting the symptom.
    async fn retrieve_symptom(&self, graph: &dyn GraphClient, name: &str) -> Vec<RetrievalResult> {
        let diseases = match graph
            .execute_query(
                queries::FIND_DISEASES_BY_SYMPTOM,
                params([("symptom_name", json!(name))]),
            )
            .await
        {
            Ok(rows) => rows,
            Err(e) => {
                warn!(error = %e, "symptom lookup failed");
                return Vec::new();
            }
        };
        if diseases.is_empty() {
            return Vec::new();
        }

        let list: Vec<&str> = diseases
            .iter()
            .filter_map(|r| r.get("disease").and_then(|v| v.as_str()))
            .collect();
        vec![RetrievalResult::new(
            format!("症状：{}\n可能相关疾病：{}", name, list.join(", ")),
            KG_SOURCE,
            RetrievalMethod::KnowledgeGraph,
        )
        .with_score(1.0)
        .with_metadata("entity_type", "Symptom")
        .with_metadata("entity_name", name)
        .with_metadata("diseases_count", diseases.len())]
    }

    /// Drug expansion: interactions when the plan asks for them, treated
    /// diseases otherwise.
    async fn retrieve_drug(
        &self,
        graph: &dyn GraphClient,
        name: &str,
        question_type: QuestionType,
    ) -> Vec<RetrievalResult> {
        if question_type == QuestionType::DrugInteraction {
            let interactions = match graph
                .execute_query(
                    queries::FIND_DRUG_INTERACTIONS,
                    params([("drug_name", json!(name))]),
                )
                .await
            {
                Ok(rows) => rows,
                Err(e) => {
                    warn!(error = %e, "drug interaction lookup failed");
                    return Vec::new();
                }
            };
            if interactions.is_empty() {
                return Vec::new();
            }

            let list: Vec<String> = interactions
                .iter()
                .map(|r| {
                    let other = r
                        .get("interacting_drug")
                        .and_then(|v| v.as_str())
                        .unwrap_or("");
                    let description =
                        r.get("description").and_then(|v| v.as_str()).unwrap_or("");
                    format!("- {}: {}", other, description)
                })
                .collect();
            return vec![RetrievalResult::new(
                format!("药物：{}\n相互作用：\n{}", name, list.join("\n")),
                KG_SOURCE,
                RetrievalMethod::KnowledgeGraph,
            )
            .with_score(1.0)
            .with_metadata("entity_type", "Drug")
            .with_metadata("entity_name", name)
            .with_metadata("interactions_count", interactions.len())];
        }

        let rows = match graph
            .execute_query(queries::FIND_DRUG_DISEASES, params([("drug_name", json!(name))]))
            .await
        {
            Ok(rows) => rows,
            Err(e) => {
                warn!(error = %e, "drug lookup failed");
                return Vec::new();
            }
        };
        let Some(row) = rows.first() else {
            return Vec::new();
        };

        let diseases: Vec<String> = row
            .get("diseases")
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str().map(|s| s.to_string()))
                    .collect()
            })
            .unwrap_or_default();
        let list = if diseases.is_empty() {
            "无".to_string()
        } else {
            diseases
                .iter()
                .take(10)
                .cloned()
                .collect::<Vec<_>>()
                .join(", ")
        };

        vec![RetrievalResult::new(
            format!("药物：{}\n适用疾病：{}", name, list),
            KG_SOURCE,
            RetrievalMethod::KnowledgeGraph,
        )
        .with_score(1.0)
        .with_metadata("entity_type", "Drug")
        .with_metadata("entity_name", name)
        .with_metadata("diseases_count", diseases.len())]
    }

    /// Examination expansion: diseases requiring the exam.
    async fn retrieve_examination(
        &self,
        graph: &dyn GraphClient,
        name: &str,
    ) -> Vec<RetrievalResult> {
        let rows = match graph
            .execute_query(
                queries::FIND_EXAMINATION_DISEASES,
                params([("exam_name", json!(name))]),
            )
            .await
        {
            Ok(rows) => rows,
            Err(e) => {
                warn!(error = %e, "examination lookup failed");
                return Vec::new();
            }
        };
        let Some(row) = rows.first() else {
            return Vec::new();
        };

        let diseases: Vec<String> = row
            .get("diseases")
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str().map(|s| s.to_string()))
                    .collect()
            })
            .unwrap_or_default();
        let list = if diseases.is_empty() {
            "无".to_string()
        } else {
            diseases
                .iter()
                .take(10)
                .cloned()
                .collect::<Vec<_>>()
                .join(", ")
        };

        vec![RetrievalResult::new(
            format!("检查项目：{}\n适用疾病：{}", name, list),
            KG_SOURCE,
            RetrievalMethod::KnowledgeGraph,
        )
        .with_score(1.0)
        .with_metadata("entity_type", "Examination")
        .with_metadata("entity_name", name)
        .with_metadata("diseases_count", diseases.len())]
    }

    fn deduplicate(results: Vec<RetrievalResult>) -> Vec<RetrievalResult> {
        let mut seen = HashSet::new();
        results
            .into_iter()
            .filter(|r| !r.text.is_empty() && seen.insert(r.text.clone()))
            .collect()
    }
}

#[async_trait]
impl Retriever for KnowledgeGraphRetriever {
    fn name(&self) -> &'static str {
        "knowledge_graph"
    }

    async fn retrieve(&self, query: &str, top_k: usize) -> Vec<RetrievalResult> {
        let Some(graph) = self.graph.clone() else {
            warn!("graph client unavailable, knowledge-graph retrieval skipped");
            return Vec::new();
        };

        let entities = self.extract_entities(query).await;
        let plan = self.selector.classify(query, &entities);
        info!(
            question_type = plan.question_type.as_str(),
            strategy = %plan.strategy,
            confidence = plan.confidence,
            "knowledge-graph query plan"
        );

        let results = self.execute_strategy(graph.as_ref(), &entities, &plan).await;
        let unique = Self::deduplicate(results);
        let mut scored =
            self.scorer
                .score_and_sort(unique, query, &entities, plan.question_type);
        scored.truncate(top_k);

        info!(count = scored.len(), "knowledge-graph retrieval");
        scored
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use medikit_graph::MemoryGraph;
    use medikit_llm::{LlmService, MockBackend};

    fn seeded_graph() -> Arc<MemoryGraph> {
        let graph = Arc::new(MemoryGraph::new());
        graph.add_edge("Disease", "高血压", "HAS_SYMPTOM", "Symptom", "头晕");
        graph.add_edge("Disease", "高血压", "HAS_SYMPTOM", "Symptom", "头痛");
        graph.add_edge("Disease", "偏头痛", "HAS_SYMPTOM", "Symptom", "头痛");
        graph.add_edge("Disease", "偏头痛", "HAS_SYMPTOM", "Symptom", "头晕");
        graph.add_edge("Disease", "高血压", "TREATED_BY", "Drug", "缬沙坦");
        graph.add_edge("Disease", "高血压", "REQUIRES_EXAM", "Examination", "血压监测");
        graph
    }

    fn recognizer(pattern: &str, response: &str) -> Arc<EntityRecognizer> {
        let backend = Arc::new(MockBackend::new().with_response(pattern, response));
        Arc::new(EntityRecognizer::new(Arc::new(LlmService::new(backend))))
    }

    #[tokio::test]
    async fn symptom_query_links_diseases_through_has_symptom() {
        let retriever = KnowledgeGraphRetriever::new(
            Some(seeded_graph()),
            recognizer("头痛", "{\"symptoms\": [\"头痛\", \"头晕\"]}"),
        );

        let results = retriever.retrieve("头痛 头晕", 10).await;
        assert!(!results.is_empty());
        assert!(results
            .iter()
            .all(|r| r.method == RetrievalMethod::KnowledgeGraph));
        // Both symptoms are linked to both seeded diseases.
        let all_text: String = results.iter().map(|r| r.text.as_str()).collect();
        assert!(all_text.contains("高血压"));
        assert!(all_text.contains("偏头痛"));
        assert!(results.iter().all(|r| r.scores.relevance.is_some()));
    }

    #[tokio::test]
    async fn disease_query_composes_full_evidence_blob() {
        let retriever = KnowledgeGraphRetriever::new(
            Some(seeded_graph()),
            recognizer("高血压", "{\"diseases\": [\"高血压\"]}"),
        );

        let results = retriever.retrieve("什么是高血压？", 5).await;
        assert_eq!(results.len(), 1);
        let blob = &results[0];
        assert!(blob.text.contains("疾病：高血压"));
        assert!(blob.text.contains("症状："));
        assert!(blob.text.contains("治疗药物：缬沙坦"));
        assert!(blob.text.contains("检查项目：血压监测"));
        assert_eq!(blob.metadata_count("symptoms_count"), 2);
        assert_eq!(blob.metadata_count("drugs_count"), 1);
    }

    #[tokio::test]
    async fn missing_graph_client_returns_empty_without_error() {
        let retriever = KnowledgeGraphRetriever::new(
            None,
            recognizer("任何", "{\"diseases\": [\"高血压\"]}"),
        );
        assert!(retriever.retrieve("高血压", 5).await.is_empty());
    }

    #[tokio::test]
    async fn validation_drops_entities_missing_from_graph() {
        let retriever = KnowledgeGraphRetriever::new(
            Some(seeded_graph()),
            recognizer("糖尿病", "{\"diseases\": [\"糖尿病\"]}"),
        );
        // 糖尿病 is not in the seeded graph, so validation leaves nothing
        // to expand.
        assert!(retriever.retrieve("什么是糖尿病？", 5).await.is_empty());
    }

    #[tokio::test]
    async fn duplicate_blobs_are_removed() {
        let results = vec![
            RetrievalResult::new("同一段文本", KG_SOURCE, RetrievalMethod::KnowledgeGraph),
            RetrievalResult::new("同一段文本", KG_SOURCE, RetrievalMethod::KnowledgeGraph),
            RetrievalResult::new("另一段文本", KG_SOURCE, RetrievalMethod::KnowledgeGraph),
        ];
        assert_eq!(KnowledgeGraphRetriever::deduplicate(results).len(), 2);
    }
}
