//! Medical named-entity extraction.
//!
//! Primary path is a low-temperature LLM call with a JSON-only prompt,
//! parsed leniently (first balanced JSON object in the response). With a
//! graph client available, candidates are confirmed by existence probes and
//! unconfirmed ones dropped. When the LLM call fails entirely, regex
//! patterns over common medical morphemes stand in.

use medikit_core::{EntityType, ExtractedEntities};
use medikit_graph::{params, queries, GraphClient};
use medikit_llm::backend::GenerateOptions;
use medikit_llm::{LlmService, PromptTemplate};
use regex::Regex;
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};

/// Pull the first balanced JSON object out of an LLM response.
fn first_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, c) in text[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..=start + offset]);
                }
            }
            _ => {}
        }
    }
    None
}

/// LLM-based recognizer with KG validation and a pattern fallback.
pub struct EntityRecognizer {
    llm: Arc<LlmService>,
    memo: RwLock<HashMap<String, ExtractedEntities>>,
    fallback_patterns: Vec<(EntityType, Vec<Regex>)>,
}

impl EntityRecognizer {
    pub fn new(llm: Arc<LlmService>) -> Self {
        let patterns = |sources: &[&str]| -> Vec<Regex> {
            sources
                .iter()
                .map(|p| Regex::new(p).expect("static regex"))
                .collect()
        };

        let fallback_patterns = vec![
            (
                EntityType::Disease,
                patterns(&[
                    r"[\x{4e00}-\x{9fa5}]+(?:病|症|炎|癌|瘤|症候群)",
                    r"高血压|糖尿病|心脏病|癌症|肿瘤|感冒|发烧",
                ]),
            ),
            (
                EntityType::Symptom,
                patterns(&[
                    r"[\x{4e00}-\x{9fa5}]*(?:痛|疼|热|烧|咳|吐|泻|晕|乏|累)",
                    r"头痛|发热|咳嗽|疼痛|乏力|头晕|恶心|呕吐",
                ]),
            ),
            (
                EntityType::Drug,
                patterns(&[
                    r"[\x{4e00}-\x{9fa5}]+(?:药|片|胶囊|注射液|颗粒)",
                    r"阿司匹林|布洛芬|青霉素|头孢",
                ]),
            ),
            (
                EntityType::Examination,
                patterns(&[
                    r"[\x{4e00}-\x{9fa5}]*(?:检查|化验|检测|CT|MRI|X光|B超)",
                    r"血常规|尿常规|心电图|CT|MRI",
                ]),
            ),
        ];

        Self {
            llm,
            memo: RwLock::new(HashMap::new()),
            fallback_patterns,
        }
    }

    /// Extract entities from a query, memoized per query text.
    pub async fn extract_entities(&self, query: &str) -> ExtractedEntities {
        if let Some(cached) = self.memo.read().expect("lock poisoned").get(query) {
            return cached.clone();
        }

        let entities = match self.extract_with_llm(query).await {
            Ok(entities) => entities,
            Err(e) => {
                warn!(error = %e, "LLM entity extraction failed, using pattern fallback");
                self.fallback_extraction(query)
            }
        };

        self.memo
            .write()
            .expect("lock poisoned")
            .insert(query.to_string(), entities.clone());
        debug!(query, total = entities.total(), "entities extracted");
        entities
    }

    /// Extract and confirm each candidate against the knowledge graph,
    /// dropping anything without a matching node. A validation failure
    /// falls back to the unvalidated set.
    pub async fn extract_with_validation(
        &self,
        query: &str,
        graph: &dyn GraphClient,
    ) -> ExtractedEntities {
        let entities = self.extract_entities(query).await;

        let mut validated = ExtractedEntities::default();
        for entity_type in EntityType::all() {
            let probe = match entity_type {
                EntityType::Disease => queries::VALIDATE_DISEASE,
                EntityType::Symptom => queries::VALIDATE_SYMPTOM,
                EntityType::Drug => queries::VALIDATE_DRUG,
                EntityType::Examination => queries::VALIDATE_EXAMINATION,
                EntityType::Department => queries::VALIDATE_DEPARTMENT,
            };
            for name in entities.get(entity_type) {
                match graph
                    .execute_query(probe, params([("name", json!(name))]))
                    .await
                {
                    Ok(rows) if !rows.is_empty() => {
                        validated.get_mut(entity_type).push(name.clone());
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "KG validation failed, keeping unvalidated entities");
                        return entities;
                    }
                }
            }
        }
        validated
    }

    async fn extract_with_llm(&self, query: &str) -> medikit_llm::LlmResult<ExtractedEntities> {
        let prompt = PromptTemplate::format_ner_prompt(query);
        let response = self
            .llm
            .generate(
                &prompt,
                Some(PromptTemplate::NER_SYSTEM),
                GenerateOptions {
                    temperature: Some(0.1),
                    max_tokens: Some(500),
                },
            )
            .await?;

        let mut entities = first_json_object(&response)
            .and_then(|raw| serde_json::from_str::<ExtractedEntities>(raw).ok())
            .unwrap_or_default();
        entities.normalize();
        Ok(entities)
    }

    /// Pattern-based extraction over common medical morphemes.
    pub fn fallback_extraction(&self, query: &str) -> ExtractedEntities {
        let mut entities = ExtractedEntities::default();
        for (entity_type, patterns) in &self.fallback_patterns {
            let list = entities.get_mut(*entity_type);
            for pattern in patterns {
                for m in pattern.find_iter(query) {
                    list.push(m.as_str().to_string());
                }
            }
        }
        entities.normalize();
        entities
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use medikit_graph::MemoryGraph;
    use medikit_llm::MockBackend;

    fn recognizer(pattern: &str, response: &str) -> EntityRecognizer {
        let backend = Arc::new(MockBackend::new().with_response(pattern, response));
        EntityRecognizer::new(Arc::new(LlmService::new(backend)))
    }

    #[test]
    fn balanced_json_extraction_handles_noise() {
        let text = "好的，结果如下：\n```json\n{\"diseases\": [\"高血压\"], \"symptoms\": []}\n```";
        let raw = first_json_object(text).unwrap();
        assert!(raw.starts_with('{') && raw.ends_with('}'));

        let nested = "{\"a\": {\"b\": 1}} trailing";
        assert_eq!(first_json_object(nested).unwrap(), "{\"a\": {\"b\": 1}}");
    }

    #[tokio::test]
    async fn llm_extraction_parses_and_dedups() {
        let recognizer = recognizer(
            "头痛",
            "{\"diseases\": [], \"symptoms\": [\"头痛\", \"头痛\", \" 头晕 \"], \"drugs\": []}",
        );
        let entities = recognizer.extract_entities("我头痛头晕").await;
        assert_eq!(entities.symptoms, vec!["头痛", "头晕"]);
        assert!(entities.diseases.is_empty());
    }

    #[tokio::test]
    async fn memoization_reuses_first_extraction() {
        let backend = Arc::new(
            MockBackend::new().with_response("头痛", "{\"symptoms\": [\"头痛\"]}"),
        );
        let recognizer = EntityRecognizer::new(Arc::new(LlmService::new(backend.clone())));

        recognizer.extract_entities("头痛怎么办").await;
        recognizer.extract_entities("头痛怎么办").await;
        assert_eq!(backend.call_count(), 1);
    }

    #[tokio::test]
    async fn failed_llm_falls_back_to_patterns() {
        let backend = Arc::new(MockBackend::new().failing_first(usize::MAX));
        let recognizer = EntityRecognizer::new(Arc::new(LlmService::new(backend)));

        let entities = recognizer.extract_entities("我得了高血压，经常头晕").await;
        assert!(entities.diseases.contains(&"高血压".to_string()));
        assert!(entities.symptoms.iter().any(|s| s.contains("头晕")));
    }

    #[tokio::test]
    async fn kg_validation_drops_unknown_entities() {
        let recognizer = recognizer(
            "头晕",
            "{\"diseases\": [\"高血压\", \"不存在的病\"], \"symptoms\": [\"头晕\"]}",
        );
        let graph = MemoryGraph::new();
        graph.add_node("Disease", "高血压");
        graph.add_node("Symptom", "头晕");

        let entities = recognizer
            .extract_with_validation("高血压头晕", &graph)
            .await;
        assert_eq!(entities.diseases, vec!["高血压"]);
        assert_eq!(entities.symptoms, vec!["头晕"]);
    }
}
