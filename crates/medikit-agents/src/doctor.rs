//! Doctor agent: general consultation, diagnosis, and drug sub-types.

use crate::base::{error_result, log_execution, Agent, AgentInput};
use crate::diagnosis::DiagnosisTool;
use async_trait::async_trait;
use medikit_core::{AgentResult, ToolKind};
use medikit_graph::{params, queries, GraphClient};
use medikit_llm::backend::GenerateOptions;
use medikit_llm::{LlmError, LlmService, PromptTemplate};
use medikit_rag::fusion::RetrievalFlags;
use medikit_rag::{AdvancedRag, EntityRecognizer};
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

enum ConsultationType {
    General,
    Diagnosis,
    Drug,
}

/// AI doctor: diagnosis suggestions, drug consultation, and general
/// medical Q&A over the retrieval stack.
pub struct DoctorAgent {
    rag: Arc<AdvancedRag>,
    graph: Option<Arc<dyn GraphClient>>,
    recognizer: Arc<EntityRecognizer>,
    llm: Arc<LlmService>,
    diagnosis_tool: DiagnosisTool,
}

impl DoctorAgent {
    pub fn new(
        rag: Arc<AdvancedRag>,
        graph: Option<Arc<dyn GraphClient>>,
        recognizer: Arc<EntityRecognizer>,
        llm: Arc<LlmService>,
    ) -> Self {
        Self {
            rag,
            graph,
            recognizer,
            llm,
            diagnosis_tool: DiagnosisTool::new(),
        }
    }

    fn classify_consultation(&self, input: &AgentInput) -> ConsultationType {
        match input.request_type.as_deref() {
            Some("diagnosis") => return ConsultationType::Diagnosis,
            Some("drug") => return ConsultationType::Drug,
            Some("general") => return ConsultationType::General,
            _ => {}
        }

        let question = &input.question;
        if ["症状", "诊断", "可能"].iter().any(|k| question.contains(k))
            || !self.diagnosis_tool.extract_symptoms(question).is_empty()
        {
            ConsultationType::Diagnosis
        } else if ["用药", "药物", "药"].iter().any(|k| question.contains(k)) {
            ConsultationType::Drug
        } else {
            ConsultationType::General
        }
    }

    /// RAG context plus sources for a question.
    async fn rag_context(&self, question: &str, top_k: usize) -> (String, Vec<String>) {
        let response = self.rag.retrieve(question, top_k, RetrievalFlags::default()).await;
        let sources = response
            .documents
            .iter()
            .map(|d| d.source.clone())
            .collect();
        (AdvancedRag::format_context(&response), sources)
    }

    async fn generate(
        &self,
        prompt: &str,
        system_prompt: &str,
        trace_id: Option<&str>,
    ) -> Result<(String, bool, Option<f32>), LlmError> {
        let generation = self
            .llm
            .generate_with_info(
                prompt,
                Some(system_prompt),
                GenerateOptions::default(),
                trace_id,
            )
            .await?;
        Ok((generation.text, generation.cache_hit, generation.similarity))
    }

    async fn handle_general(&self, input: &AgentInput) -> Result<AgentResult, LlmError> {
        let mut result = AgentResult::default();

        // RAG search and direct KG expansion run in parallel; either may
        // come back empty without sinking the turn.
        let rag_fut = self.rag_context(&input.question, 5);
        let kg_fut = async {
            let Some(graph) = &self.graph else {
                return String::new();
            };
            let entities = self.recognizer.extract_entities(&input.question).await;
            let mut parts = Vec::new();
            for disease in entities.diseases.iter().take(3) {
                if let Ok(rows) = graph
                    .execute_query(queries::FIND_DISEASE_SYMPTOMS, params([("disease_name", json!(disease))]))
                    .await
                {
                    if !rows.is_empty() {
                        let symptoms: Vec<&str> = rows
                            .iter()
                            .filter_map(|r| r.get("symptom").and_then(|v| v.as_str()))
                            .collect();
                        parts.push(format!("- 疾病 {} 常见症状：{}", disease, symptoms.join(", ")));
                    }
                }
            }
            parts.join("\n")
        };
        let ((rag_context, sources), kg_context) = tokio::join!(rag_fut, kg_fut);

        if !rag_context.is_empty() {
            result.tools_used.push(ToolKind::RagSearch);
        }
        if !kg_context.is_empty() {
            result.tools_used.push(ToolKind::KnowledgeGraphQuery);
        }

        let full_context = if kg_context.is_empty() {
            rag_context
        } else {
            format!("{}\n\n{}", rag_context, kg_context)
        };

        let prompt = PromptTemplate::format_medical_prompt(&full_context, &input.question);
        let (answer, cache_hit, similarity) = self
            .generate(&prompt, self.system_prompt(), input.trace_id.as_deref())
            .await?;

        result.answer = answer;
        result.sources = sources;
        if cache_hit {
            result.annotate("cache_hit", true);
            if let Some(similarity) = similarity {
                result.annotate("similarity", similarity);
            }
        }
        Ok(result)
    }

    async fn handle_diagnosis(&self, input: &AgentInput) -> Result<AgentResult, LlmError> {
        let mut result = AgentResult::default();

        // 1. Triage the complaint.
        let analysis = self.diagnosis_tool.analyze(&input.question);
        result.tools_used.push(ToolKind::DiagnosisAssistant);
        result.risk_level = Some(analysis.risk_level);
        result.annotate(
            "diagnosis_analysis",
            serde_json::to_value(&analysis).unwrap_or_default(),
        );

        // 2. Candidate diseases from the symptom set.
        let mut kg_context = String::new();
        if let (Some(graph), false) = (&self.graph, analysis.symptom_keywords.is_empty()) {
            let min_matches = (analysis.symptom_keywords.len() / 2 + 1) as u64;
            match graph
                .execute_query(
                    queries::FIND_DISEASES_BY_SYMPTOMS,
                    params([
                        ("symptom_names", json!(analysis.symptom_keywords)),
                        ("min_matches", json!(min_matches)),
                    ]),
                )
                .await
            {
                Ok(rows) if !rows.is_empty() => {
                    result.tools_used.push(ToolKind::KnowledgeGraphQuery);
                    kg_context.push_str("可能的疾病:\n");
                    for row in rows.iter().take(5) {
                        if let Some(disease) = row.get("disease").and_then(|v| v.as_str()) {
                            kg_context.push_str(&format!("- {}\n", disease));
                        }
                    }
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "candidate disease lookup failed"),
            }
        }

        // 3. Supporting literature.
        let (rag_context, sources) = self.rag_context(&input.question, 3).await;
        if !rag_context.is_empty() {
            result.tools_used.push(ToolKind::RagSearch);
        }

        let full_context = if kg_context.is_empty() {
            rag_context
        } else {
            format!("{}\n\n{}", rag_context, kg_context)
        };

        // 4. Generate the assessment.
        let prompt = PromptTemplate::format_diagnosis_prompt(&input.question, &full_context);
        let (mut answer, _, _) = self
            .generate(
                &prompt,
                PromptTemplate::DIAGNOSIS_ASSISTANT_SYSTEM,
                input.trace_id.as_deref(),
            )
            .await?;

        // 5. High-risk complaints carry the urgent-care notice.
        if analysis.risk_level.requires_immediate_attention() {
            answer.push_str(&format!(
                "\n\n⚠️ 风险提示: {}",
                self.diagnosis_tool.recommendation(analysis.risk_level)
            ));
        }

        result.answer = answer;
        result.sources = sources;
        Ok(result)
    }

    async fn handle_drug(&self, input: &AgentInput) -> Result<AgentResult, LlmError> {
        let mut result = AgentResult::default();

        // Drug facts from the graph, keyed by recognized drug names.
        let mut drug_context = String::new();
        if let Some(graph) = &self.graph {
            let entities = self.recognizer.extract_entities(&input.question).await;
            for drug in entities.drugs.iter().take(2) {
                if let Ok(rows) = graph
                    .execute_query(queries::FIND_DRUG_DISEASES, params([("drug_name", json!(drug))]))
                    .await
                {
                    if let Some(row) = rows.first() {
                        let diseases: Vec<String> = row
                            .get("diseases")
                            .and_then(|v| v.as_array())
                            .map(|arr| {
                                arr.iter()
                                    .filter_map(|v| v.as_str().map(|s| s.to_string()))
                                    .collect()
                            })
                            .unwrap_or_default();
                        drug_context.push_str(&format!(
                            "药物信息: {}\n适用疾病: {}\n",
                            drug,
                            if diseases.is_empty() {
                                "无".to_string()
                            } else {
                                diseases.join(", ")
                            }
                        ));
                    }
                }
                if let Ok(rows) = graph
                    .execute_query(
                        queries::FIND_DRUG_CONTRAINDICATIONS,
                        params([("drug_name", json!(drug))]),
                    )
                    .await
                {
                    if !rows.is_empty() {
                        drug_context.push_str("禁忌症:\n");
                        for row in rows {
                            if let Some(disease) = row.get("disease").and_then(|v| v.as_str()) {
                                drug_context.push_str(&format!("- {}\n", disease));
                            }
                        }
                    }
                }
            }
            if !drug_context.is_empty() {
                result.tools_used.push(ToolKind::KnowledgeGraphQuery);
            }
        }

        let (rag_context, sources) = self.rag_context(&input.question, 3).await;
        if !rag_context.is_empty() {
            result.tools_used.push(ToolKind::RagSearch);
        }

        let prompt =
            PromptTemplate::format_drug_prompt(&input.question, &drug_context, &rag_context);
        let (answer, _, _) = self
            .generate(
                &prompt,
                PromptTemplate::DRUG_CONSULTATION_SYSTEM,
                input.trace_id.as_deref(),
            )
            .await?;

        result.answer = answer;
        result.sources = sources;
        Ok(result)
    }
}

#[async_trait]
impl Agent for DoctorAgent {
    fn name(&self) -> &'static str {
        "doctor"
    }

    fn description(&self) -> &'static str {
        "专业的AI医生助手，提供诊断建议、用药咨询、检查建议"
    }

    fn system_prompt(&self) -> &'static str {
        PromptTemplate::MEDICAL_CONSULTATION_SYSTEM
    }

    async fn process(&self, input: &AgentInput) -> AgentResult {
        let start = Instant::now();
        info!(question = %input.question.chars().take(50).collect::<String>(), "doctor agent processing");

        let outcome = match self.classify_consultation(input) {
            ConsultationType::Diagnosis => self.handle_diagnosis(input).await,
            ConsultationType::Drug => self.handle_drug(input).await,
            ConsultationType::General => self.handle_general(input).await,
        };

        let mut result = match outcome {
            Ok(result) => result,
            Err(e) => {
                warn!(error = %e, "doctor agent failed");
                error_result(e, start.elapsed().as_millis() as u64)
            }
        };
        result.execution_time_ms = start.elapsed().as_millis() as u64;
        log_execution(self.name(), input, &result);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use medikit_core::RiskLevel;
    use medikit_graph::MemoryGraph;
    use medikit_llm::MockBackend;
    use medikit_rag::fusion::MultiRetrieval;
    use medikit_rag::pipeline::RagConfig;
    use medikit_rag::{Bm25Index, Retriever};

    fn agent_with(backend: MockBackend, graph: Option<Arc<MemoryGraph>>) -> DoctorAgent {
        let llm = Arc::new(LlmService::new(Arc::new(backend)));

        let bm25 = Arc::new(Bm25Index::new());
        bm25.build_index(
            vec!["胸痛可能提示心绞痛或心肌梗死，应尽快就医。".to_string()],
            vec![Default::default()],
        );
        let bm25: Arc<dyn Retriever> = bm25;
        let fusion = MultiRetrieval::new(None, Some(bm25), None, None);
        let rag = Arc::new(AdvancedRag::new(fusion, RagConfig::default()));

        let recognizer = Arc::new(EntityRecognizer::new(llm.clone()));
        let graph: Option<Arc<dyn GraphClient>> = graph.map(|g| g as Arc<dyn GraphClient>);
        DoctorAgent::new(rag, graph, recognizer, llm)
    }

    #[tokio::test]
    async fn sudden_chest_pain_runs_the_diagnosis_path_at_high_risk() {
        let graph = Arc::new(MemoryGraph::new());
        graph.add_edge("Disease", "心绞痛", "HAS_SYMPTOM", "Symptom", "胸痛");
        graph.add_edge("Disease", "心绞痛", "HAS_SYMPTOM", "Symptom", "呼吸困难");

        let backend = MockBackend::new()
            .with_response("患者症状描述", "可能为心源性胸痛，建议立刻完善心电图。")
            .with_response("提取所有医疗相关实体", "{\"symptoms\": [\"胸痛\"]}");
        let agent = agent_with(backend, Some(graph));

        let result = agent.process(&AgentInput::new("我突然胸痛伴呼吸困难")).await;

        assert_eq!(result.risk_level, Some(RiskLevel::High));
        assert!(result.answer.contains("立即"));
        assert!(result.tools_used.contains(&ToolKind::DiagnosisAssistant));
        assert!(result.tools_used.contains(&ToolKind::KnowledgeGraphQuery));
        assert!(result.tools_used.contains(&ToolKind::RagSearch));
        assert!(result.error.is_none());
    }

    #[tokio::test]
    async fn drug_questions_take_the_drug_path() {
        let graph = Arc::new(MemoryGraph::new());
        graph.add_edge("Disease", "高血压", "TREATED_BY", "Drug", "缬沙坦");

        let backend = MockBackend::new()
            .with_response("用药咨询问题", "缬沙坦适用于高血压，请遵医嘱。")
            .with_response("提取所有医疗相关实体", "{\"drugs\": [\"缬沙坦\"]}");
        let agent = agent_with(backend, Some(graph));

        let result = agent
            .process(&AgentInput::new("缬沙坦这种药物怎么服用"))
            .await;

        assert!(result.answer.contains("缬沙坦"));
        assert!(result.tools_used.contains(&ToolKind::KnowledgeGraphQuery));
        assert!(result.risk_level.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn llm_failure_yields_error_shaped_result() {
        let agent = agent_with(MockBackend::new().failing_first(usize::MAX), None);
        let result = agent.process(&AgentInput::new("最近睡眠不好")).await;
        assert!(result.error.is_some());
        assert!(!result.answer.is_empty());
    }
}
