//! Operations agent: analysis and reporting over structured metrics, no
//! retrieval.

use crate::base::{error_result, log_execution, Agent, AgentInput};
use async_trait::async_trait;
use medikit_core::AgentResult;
use medikit_llm::backend::GenerateOptions;
use medikit_llm::{LlmService, PromptTemplate};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// Pure-generation agent for operational analysis.
pub struct OperationsAgent {
    llm: Arc<LlmService>,
}

impl OperationsAgent {
    pub fn new(llm: Arc<LlmService>) -> Self {
        Self { llm }
    }

    fn build_prompt(input: &AgentInput) -> String {
        let request_type = input.request_type.as_deref().unwrap_or("analysis");
        let data = input
            .context
            .get("data")
            .map(|v| v.to_string())
            .unwrap_or_else(|| "{}".to_string());
        let metrics = input
            .context
            .get("metrics")
            .map(|v| v.to_string())
            .unwrap_or_else(|| "{}".to_string());

        match request_type {
            "monitoring" => format!(
                "请根据以下系统指标评估运行状态，指出异常并给出处理建议：\n{}",
                metrics
            ),
            "optimization" => format!(
                "请根据以下使用数据提出知识库和系统的优化建议：\n{}",
                data
            ),
            _ => format!(
                "请分析以下咨询数据，总结使用趋势并生成简要运营报告：\n数据：{}\n指标：{}",
                data, metrics
            ),
        }
    }
}

#[async_trait]
impl Agent for OperationsAgent {
    fn name(&self) -> &'static str {
        "operations"
    }

    fn description(&self) -> &'static str {
        "运营分析Agent，提供数据分析、系统监控、优化建议"
    }

    fn system_prompt(&self) -> &'static str {
        PromptTemplate::OPERATIONS_SYSTEM
    }

    async fn process(&self, input: &AgentInput) -> AgentResult {
        let start = Instant::now();
        info!(request_type = input.request_type.as_deref().unwrap_or("analysis"), "operations processing");

        let prompt = Self::build_prompt(input);
        let mut result = match self
            .llm
            .generate(&prompt, Some(self.system_prompt()), GenerateOptions::default())
            .await
        {
            Ok(answer) => AgentResult {
                answer,
                ..Default::default()
            },
            Err(e) => {
                warn!(error = %e, "operations agent failed");
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
    use medikit_llm::MockBackend;
    use serde_json::json;

    #[tokio::test]
    async fn analysis_prompt_embeds_data_and_metrics() {
        let backend = MockBackend::new().with_response("运营报告", "本周咨询量上升12%。");
        let agent = OperationsAgent::new(Arc::new(LlmService::new(Arc::new(backend))));

        let input = AgentInput::new("")
            .with_context("data", json!({"consultations": 420}))
            .with_context("metrics", json!({"p99_ms": 850}));
        let result = agent.process(&input).await;

        assert_eq!(result.answer, "本周咨询量上升12%。");
        assert!(result.tools_used.is_empty());
        assert!(result.error.is_none());
    }

    #[test]
    fn monitoring_requests_use_metrics_only() {
        let input = AgentInput::new("")
            .with_type("monitoring")
            .with_context("metrics", json!({"error_rate": 0.02}));
        let prompt = OperationsAgent::build_prompt(&input);
        assert!(prompt.contains("error_rate"));
        assert!(prompt.contains("运行状态"));
    }
}
