//! Customer-service agent: FAQ lookup first, retrieval-backed answers
//! after.

use crate::base::{error_result, log_execution, Agent, AgentInput};
use async_trait::async_trait;
use medikit_core::{AgentResult, ToolKind};
use medikit_llm::backend::GenerateOptions;
use medikit_llm::{LlmError, LlmService, PromptTemplate};
use medikit_rag::fusion::RetrievalFlags;
use medikit_rag::AdvancedRag;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

const FAQ: [(&str, &str); 4] = [
    (
        "如何使用系统",
        "您可以通过对话界面与AI医生进行咨询，也可以使用知识库搜索功能查找医疗信息。",
    ),
    ("系统功能", "本系统提供医疗咨询、健康管理、知识库查询等功能。"),
    ("数据安全", "我们严格遵守数据保护法规，所有用户数据都经过加密处理。"),
    ("如何联系", "您可以通过系统内的反馈功能联系我们。"),
];

/// Support agent for product questions, guidance, and feedback.
pub struct CustomerServiceAgent {
    rag: Arc<AdvancedRag>,
    llm: Arc<LlmService>,
}

impl CustomerServiceAgent {
    pub fn new(rag: Arc<AdvancedRag>, llm: Arc<LlmService>) -> Self {
        Self { rag, llm }
    }

    fn request_type(input: &AgentInput) -> &str {
        if let Some(request_type) = input.request_type.as_deref() {
            return request_type;
        }
        let question = &input.question;
        if ["指导", "如何", "怎么"].iter().any(|k| question.contains(k)) {
            "guidance"
        } else if ["反馈", "建议", "意见"].iter().any(|k| question.contains(k)) {
            "feedback"
        } else {
            "faq"
        }
    }

    fn lookup_faq(question: &str) -> Option<(&'static str, &'static str)> {
        let lowered = question.to_lowercase();
        FAQ.iter()
            .find(|(key, _)| lowered.contains(&key.to_lowercase()))
            .copied()
    }

    async fn handle_inquiry(
        &self,
        input: &AgentInput,
        request_type: &str,
    ) -> Result<AgentResult, LlmError> {
        let mut result = AgentResult::default();

        // Static FAQ first; a hit costs nothing.
        if request_type == "faq" {
            if let Some((key, answer)) = Self::lookup_faq(&input.question) {
                result.answer = answer.to_string();
                result.tools_used.push(ToolKind::StaticFaq);
                result.annotate("matched_key", key);
                return Ok(result);
            }
        }

        // System documentation through retrieval.
        let response = self
            .rag
            .retrieve(&input.question, 3, RetrievalFlags::default())
            .await;
        let rag_context = AdvancedRag::format_context(&response);
        if !rag_context.is_empty() {
            result.tools_used.push(ToolKind::RagSearch);
            result.sources = response.documents.iter().map(|d| d.source.clone()).collect();
        }

        let history = input.format_history();
        let full_context = format!("{}{}", history, rag_context);
        let prompt = PromptTemplate::format_customer_service_prompt(&input.question, &full_context);

        result.answer = self
            .llm
            .generate(&prompt, Some(self.system_prompt()), GenerateOptions::default())
            .await?;
        Ok(result)
    }

    async fn handle_feedback(&self, input: &AgentInput) -> Result<AgentResult, LlmError> {
        let mut result = AgentResult::default();
        let history = input.format_history();
        let feedback_data = input
            .context
            .get("feedback_data")
            .map(|v| v.to_string())
            .unwrap_or_default();

        let prompt = format!(
            "{}用户反馈：\n\n反馈内容：{}\n反馈数据：{}\n\n请确认收到反馈，并表示感谢。",
            history, input.question, feedback_data
        );
        result.answer = self
            .llm
            .generate(&prompt, Some(self.system_prompt()), GenerateOptions::default())
            .await?;
        result.annotate("feedback_received", true);
        Ok(result)
    }
}

#[async_trait]
impl Agent for CustomerServiceAgent {
    fn name(&self) -> &'static str {
        "customer_service"
    }

    fn description(&self) -> &'static str {
        "客服助手，处理常见问题、系统使用指导、用户反馈"
    }

    fn system_prompt(&self) -> &'static str {
        PromptTemplate::CUSTOMER_SERVICE_SYSTEM
    }

    async fn process(&self, input: &AgentInput) -> AgentResult {
        let start = Instant::now();
        info!(question = %input.question.chars().take(50).collect::<String>(), "customer service processing");

        let request_type = Self::request_type(input);
        let outcome = if request_type == "feedback" {
            self.handle_feedback(input).await
        } else {
            self.handle_inquiry(input, request_type).await
        };

        let mut result = match outcome {
            Ok(result) => result,
            Err(e) => {
                warn!(error = %e, "customer service failed");
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
    use medikit_rag::fusion::MultiRetrieval;
    use medikit_rag::pipeline::RagConfig;

    fn agent(backend: MockBackend) -> CustomerServiceAgent {
        let llm = Arc::new(LlmService::new(Arc::new(backend)));
        let rag = Arc::new(AdvancedRag::new(
            MultiRetrieval::new(None, None, None, None),
            RagConfig::default(),
        ));
        CustomerServiceAgent::new(rag, llm)
    }

    #[tokio::test]
    async fn faq_hits_bypass_the_llm() {
        let backend = MockBackend::new();
        let agent = agent(backend);

        let result = agent.process(&AgentInput::new("请问系统功能有哪些").with_type("faq")).await;
        assert!(result.tools_used.contains(&ToolKind::StaticFaq));
        assert!(result.answer.contains("医疗咨询"));
        assert_eq!(result.annotations["matched_key"], "系统功能");
    }

    #[tokio::test]
    async fn faq_miss_falls_through_to_generation() {
        let backend = MockBackend::new().with_response("用户问题", "请在设置页修改资料。");
        let agent = agent(backend);

        let result = agent
            .process(&AgentInput::new("个人资料在哪里改").with_type("faq"))
            .await;
        assert!(!result.tools_used.contains(&ToolKind::StaticFaq));
        assert_eq!(result.answer, "请在设置页修改资料。");
    }

    #[tokio::test]
    async fn feedback_requests_are_acknowledged() {
        let backend = MockBackend::new().with_response("用户反馈", "感谢您的反馈！");
        let agent = agent(backend);

        let result = agent.process(&AgentInput::new("我想反馈一个页面问题")).await;
        assert_eq!(result.answer, "感谢您的反馈！");
        assert_eq!(result.annotations["feedback_received"], true);
    }
}
