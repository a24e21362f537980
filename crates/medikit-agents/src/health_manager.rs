//! Health-manager agent: chronic-disease management and lifestyle plans.

use crate::base::{error_result, log_execution, Agent, AgentInput};
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

/// Health butler: plans, tracking insights, and general health advice,
/// enriched through recognized diseases in the knowledge graph.
pub struct HealthManagerAgent {
    rag: Arc<AdvancedRag>,
    graph: Option<Arc<dyn GraphClient>>,
    recognizer: Arc<EntityRecognizer>,
    llm: Arc<LlmService>,
}

impl HealthManagerAgent {
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
        }
    }

    fn request_type(input: &AgentInput) -> &str {
        if let Some(request_type) = input.request_type.as_deref() {
            return request_type;
        }
        let question = &input.question;
        if ["计划", "制定"].iter().any(|k| question.contains(k)) {
            "plan"
        } else if ["追踪", "记录", "数据"].iter().any(|k| question.contains(k)) {
            "tracking"
        } else {
            "general"
        }
    }

    /// Knowledge-graph enrichment keyed by recognized diseases.
    async fn kg_enrichment(&self, question: &str) -> String {
        let Some(graph) = &self.graph else {
            return String::new();
        };

        let entities = self.recognizer.extract_entities(question).await;
        let mut parts = Vec::new();
        for disease in &entities.diseases {
            let p = params([("disease_name", json!(disease))]);
            let (symptoms, drugs) = tokio::join!(
                graph.execute_query(queries::FIND_DISEASE_SYMPTOMS, p.clone()),
                graph.execute_query(queries::FIND_DISEASE_DRUGS, p),
            );
            let mut lines = vec![format!("疾病：{}", disease)];
            if let Ok(rows) = symptoms {
                let list: Vec<&str> = rows
                    .iter()
                    .filter_map(|r| r.get("symptom").and_then(|v| v.as_str()))
                    .collect();
                if !list.is_empty() {
                    lines.push(format!("常见症状：{}", list.join(", ")));
                }
            }
            if let Ok(rows) = drugs {
                let list: Vec<&str> = rows
                    .iter()
                    .filter_map(|r| r.get("drug").and_then(|v| v.as_str()))
                    .collect();
                if !list.is_empty() {
                    lines.push(format!("常用药物：{}", list.join(", ")));
                }
            }
            if lines.len() > 1 {
                parts.push(lines.join("\n"));
            }
        }
        parts.join("\n\n")
    }

    async fn handle(&self, input: &AgentInput) -> Result<AgentResult, LlmError> {
        let mut result = AgentResult::default();

        // RAG search and KG enrichment in parallel, independent fate.
        let rag_fut = async {
            let response = self
                .rag
                .retrieve(&input.question, 3, RetrievalFlags::default())
                .await;
            let sources: Vec<String> =
                response.documents.iter().map(|d| d.source.clone()).collect();
            (AdvancedRag::format_context(&response), sources)
        };
        let ((rag_context, sources), kg_context) =
            tokio::join!(rag_fut, self.kg_enrichment(&input.question));

        if !rag_context.is_empty() {
            result.tools_used.push(ToolKind::RagSearch);
        }
        if !kg_context.is_empty() {
            result.tools_used.push(ToolKind::KnowledgeGraphQuery);
        }

        let mut combined = String::new();
        if !rag_context.is_empty() {
            combined.push_str(&format!("【相关文档】\n{}\n", rag_context));
        }
        if !kg_context.is_empty() {
            combined.push_str(&format!("\n【知识图谱信息】\n{}\n", kg_context));
        }
        let history = input.format_history();

        let user_profile = input
            .context
            .get("user_profile")
            .map(|v| v.to_string())
            .unwrap_or_default();

        let prompt = match Self::request_type(input) {
            "plan" => format!(
                "{}{}用户画像：{}\n\n请根据以上信息为用户制定一份可执行的健康管理计划，\
                 包含饮食、运动、作息与随访建议：\n{}",
                history, combined, user_profile, input.question
            ),
            "tracking" => format!(
                "{}{}用户画像：{}\n\n请解读用户的健康数据趋势并给出改善建议：\n{}",
                history, combined, user_profile, input.question
            ),
            _ => format!(
                "{}{}请回答用户的健康管理问题：\n{}",
                history, combined, input.question
            ),
        };

        let answer = self
            .llm
            .generate(
                &prompt,
                Some(self.system_prompt()),
                GenerateOptions::default(),
            )
            .await?;

        result.answer = answer;
        result.sources = sources;
        Ok(result)
    }
}

#[async_trait]
impl Agent for HealthManagerAgent {
    fn name(&self) -> &'static str {
        "health_manager"
    }

    fn description(&self) -> &'static str {
        "健康管家，提供慢病管理计划、生活方式建议、健康数据追踪"
    }

    fn system_prompt(&self) -> &'static str {
        PromptTemplate::HEALTH_MANAGER_SYSTEM
    }

    async fn process(&self, input: &AgentInput) -> AgentResult {
        let start = Instant::now();
        info!(question = %input.question.chars().take(50).collect::<String>(), "health manager processing");

        let mut result = match self.handle(input).await {
            Ok(result) => result,
            Err(e) => {
                warn!(error = %e, "health manager failed");
                error_result(e, start.elapsed().as_millis() as u64)
            }
        };
        result.execution_time_ms = start.elapsed().as_millis() as u64;
        log_execution(self.name(), input, &result);
        result
    }
}
