//! The consultation orchestrator.
//!
//! An explicit state machine over [`AgentState`]:
//!
//! ```text
//! start → classify_intent → route(intent) → {doctor | health_manager |
//!         customer_service | operations}
//!       → (doctor) risk_assess → finalize
//!       → (others)              finalize → end
//! ```
//!
//! Transitions are total: every branch terminates at finalize, and the
//! orchestrator never raises to the caller — unexpected failures produce a
//! stable error-shaped result.

use crate::base::{Agent, AgentInput};
use crate::customer_service::CustomerServiceAgent;
use crate::doctor::DoctorAgent;
use crate::health_manager::HealthManagerAgent;
use crate::operations::OperationsAgent;
use medikit_core::{AgentKind, AgentResult, AgentState, RiskLevel, ServiceError};
use medikit_llm::PromptTemplate;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Optional learned intent classifier plugged in front of the keyword
/// rules.
pub trait IntentClassifier: Send + Sync {
    /// Classified intent label and confidence, or `None` to defer to the
    /// rules.
    fn classify(&self, user_input: &str) -> Option<(String, f32)>;
}

/// Keyword bundles for the rule-based classifier, in routing priority
/// order.
const INTENT_KEYWORDS: [(AgentKind, &[&str]); 4] = [
    (
        AgentKind::Doctor,
        &["症状", "诊断", "疾病", "用药", "检查", "治疗", "病"],
    ),
    (
        AgentKind::HealthManager,
        &["健康", "管理", "计划", "生活方式", "慢病", "追踪"],
    ),
    (
        AgentKind::CustomerService,
        &["如何使用", "功能", "帮助", "问题", "反馈"],
    ),
    (
        AgentKind::Operations,
        &["数据", "分析", "报告", "监控", "优化"],
    ),
];

/// Mapping from learned intent labels to specialist agents.
fn map_learned_intent(intent: &str) -> AgentKind {
    match intent {
        "diagnosis" | "medication" | "examination" | "symptom_inquiry" | "disease_info" => {
            AgentKind::Doctor
        }
        "health_management" => AgentKind::HealthManager,
        _ => AgentKind::CustomerService,
    }
}

/// Routes each user turn through intent classification, a specialist
/// agent, the risk gate, and finalization.
pub struct Orchestrator {
    doctor: DoctorAgent,
    health_manager: HealthManagerAgent,
    customer_service: CustomerServiceAgent,
    operations: OperationsAgent,
    classifier: Option<Arc<dyn IntentClassifier>>,
}

impl Orchestrator {
    pub fn new(
        doctor: DoctorAgent,
        health_manager: HealthManagerAgent,
        customer_service: CustomerServiceAgent,
        operations: OperationsAgent,
    ) -> Self {
        Self {
            doctor,
            health_manager,
            customer_service,
            operations,
            classifier: None,
        }
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn IntentClassifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    fn classify_intent(&self, state: &mut AgentState) {
        if let Some(classifier) = &self.classifier {
            if let Some((intent, confidence)) = classifier.classify(&state.user_input) {
                let agent_type = map_learned_intent(&intent);
                info!(intent = %intent, agent = agent_type.as_str(), confidence, "intent classified (model)");
                state.intent = intent;
                state.agent_type = Some(agent_type);
                state.set_context("intent_confidence", confidence);
                return;
            }
        }

        // Rule fallback: keyword hit counts, ties resolved by declaration
        // order.
        let input = state.user_input.to_lowercase();
        let mut best = AgentKind::Doctor;
        let mut best_score = 0usize;
        for (agent, keywords) in INTENT_KEYWORDS {
            let score = keywords.iter().filter(|k| input.contains(*k)).count();
            if score > best_score {
                best = agent;
                best_score = score;
            }
        }

        info!(agent = best.as_str(), score = best_score, "intent classified (rules)");
        state.intent = best.as_str().to_string();
        state.agent_type = Some(best);
        state.set_context("intent_confidence", 0.7);
    }

    async fn route(&self, state: &mut AgentState) {
        let agent_type = state.agent_type.unwrap_or(AgentKind::CustomerService);
        let mut input = AgentInput {
            question: state.user_input.clone(),
            request_type: None,
            context: state.context.clone(),
            trace_id: state.trace_id().map(|t| t.to_string()),
        };
        if let Some(Value::String(request_type)) = state.context.get("request_type") {
            input.request_type = Some(request_type.clone());
        }

        state.result = match agent_type {
            AgentKind::Doctor => self.doctor.process(&input).await,
            AgentKind::HealthManager => self.health_manager.process(&input).await,
            AgentKind::CustomerService => self.customer_service.process(&input).await,
            AgentKind::Operations => self.operations.process(&input).await,
        };
    }

    /// Risk gate after the doctor agent: a high or critical risk level
    /// upgrades the answer with the urgent-care notice.
    fn assess_risk(state: &mut AgentState) {
        let risk_level = state.result.risk_level.unwrap_or(RiskLevel::Low);
        state.set_context("risk_level", risk_level.as_str());

        if risk_level.requires_immediate_attention() {
            state
                .result
                .answer
                .push_str("\n\n⚠️ 重要提示：建议立即就医或拨打急救电话。");
            info!(risk_level = risk_level.as_str(), "risk gate triggered");
        }
    }

    /// Finalization: disclaimer on medical answers, operations logging,
    /// and the stable result shape.
    fn finalize(&self, state: &mut AgentState) {
        let is_medical = matches!(
            state.agent_type,
            Some(AgentKind::Doctor) | Some(AgentKind::HealthManager)
        );
        if is_medical
            && state.result.error.is_none()
            && !state.result.answer.contains(PromptTemplate::MEDICAL_DISCLAIMER)
        {
            state
                .result
                .answer
                .push_str(&format!("\n\n{}", PromptTemplate::MEDICAL_DISCLAIMER));
        }

        info!(
            agent = state.agent_type.map(|a| a.as_str()).unwrap_or("none"),
            intent = %state.intent,
            error = state.result.error.is_some(),
            "turn finalized"
        );
    }

    /// Process one user turn. Never fails: unexpected conditions come back
    /// as an error-shaped result.
    pub async fn process(
        &self,
        user_input: &str,
        context: Option<HashMap<String, Value>>,
    ) -> AgentResult {
        let mut state = AgentState::new(user_input);
        state.context = context.unwrap_or_default();
        if state.trace_id().is_none() {
            state.set_context("trace_id", uuid::Uuid::new_v4().to_string());
        }

        if user_input.trim().is_empty() {
            warn!("empty user input");
            return AgentResult {
                answer: "请输入您的问题。".to_string(),
                error: Some(
                    ServiceError::Validation("empty user input".to_string()).to_string(),
                ),
                ..Default::default()
            };
        }

        self.classify_intent(&mut state);
        self.route(&mut state).await;
        if state.agent_type == Some(AgentKind::Doctor) {
            Self::assess_risk(&mut state);
        }
        self.finalize(&mut state);

        state.result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use medikit_core::ToolKind;
    use medikit_graph::{GraphClient, MemoryGraph};
    use medikit_llm::{LlmService, MockBackend};
    use medikit_rag::fusion::MultiRetrieval;
    use medikit_rag::pipeline::RagConfig;
    use medikit_rag::{AdvancedRag, Bm25Index, EntityRecognizer, Retriever};

    fn orchestrator(backend: MockBackend) -> Orchestrator {
        let llm = Arc::new(LlmService::new(Arc::new(backend)));

        let graph = Arc::new(MemoryGraph::new());
        graph.add_edge("Disease", "心绞痛", "HAS_SYMPTOM", "Symptom", "胸痛");
        graph.add_edge("Disease", "心绞痛", "HAS_SYMPTOM", "Symptom", "呼吸困难");
        let graph: Arc<dyn GraphClient> = graph;

        let bm25 = Arc::new(Bm25Index::new());
        bm25.build_index(
            vec!["胸痛伴呼吸困难需警惕急性心血管事件。".to_string()],
            vec![Default::default()],
        );
        let bm25: Arc<dyn Retriever> = bm25;

        let rag = || {
            Arc::new(AdvancedRag::new(
                MultiRetrieval::new(None, Some(bm25.clone()), None, None),
                RagConfig::default(),
            ))
        };
        let recognizer = Arc::new(EntityRecognizer::new(llm.clone()));

        Orchestrator::new(
            DoctorAgent::new(rag(), Some(graph.clone()), recognizer.clone(), llm.clone()),
            HealthManagerAgent::new(rag(), Some(graph), recognizer, llm.clone()),
            CustomerServiceAgent::new(rag(), llm.clone()),
            OperationsAgent::new(llm),
        )
    }

    #[tokio::test]
    async fn high_risk_complaint_routes_to_doctor_and_trips_the_risk_gate() {
        let backend = MockBackend::new()
            .with_response("患者症状描述", "可能为心源性胸痛，请完善心电图检查。")
            .with_response("提取所有医疗相关实体", "{\"symptoms\": [\"胸痛\"]}");
        let orchestrator = orchestrator(backend);

        let result = orchestrator.process("我突然胸痛伴呼吸困难", None).await;

        assert_eq!(result.risk_level, Some(RiskLevel::High));
        assert!(result.answer.contains("立即"));
        assert!(result.answer.contains(PromptTemplate::MEDICAL_DISCLAIMER));
        assert!(result.tools_used.contains(&ToolKind::DiagnosisAssistant));
        assert!(result.error.is_none());
    }

    #[tokio::test]
    async fn health_keywords_route_to_the_health_manager() {
        let backend = MockBackend::new()
            .with_response("健康管理问题", "规律作息并坚持有氧运动。")
            .with_response("提取所有医疗相关实体", "{}");
        let orchestrator = orchestrator(backend);

        let result = orchestrator.process("帮我做个健康管理计划的追踪", None).await;
        assert!(result.answer.contains(PromptTemplate::MEDICAL_DISCLAIMER));
        assert!(result.error.is_none());
    }

    #[tokio::test]
    async fn service_questions_route_to_customer_service_without_disclaimer() {
        let backend = MockBackend::new();
        let orchestrator = orchestrator(backend);

        let result = orchestrator.process("请问系统功能有哪些帮助", None).await;
        assert!(result.tools_used.contains(&ToolKind::StaticFaq));
        assert!(!result.answer.contains(PromptTemplate::MEDICAL_DISCLAIMER));
    }

    #[tokio::test]
    async fn learned_classifier_takes_precedence() {
        struct Fixed;
        impl IntentClassifier for Fixed {
            fn classify(&self, _input: &str) -> Option<(String, f32)> {
                Some(("health_management".to_string(), 0.92))
            }
        }

        let backend = MockBackend::new().with_response("健康管理问题", "好的。");
        let orchestrator = orchestrator(backend).with_classifier(Arc::new(Fixed));

        // Without the classifier these keywords would go to the doctor.
        let result = orchestrator.process("胸痛要治疗吗", None).await;
        assert!(result.error.is_none());
        assert!(result.answer.contains(PromptTemplate::MEDICAL_DISCLAIMER));
    }

    #[tokio::test]
    async fn empty_input_returns_stable_error_shape() {
        let orchestrator = orchestrator(MockBackend::new());
        let result = orchestrator.process("   ", None).await;
        assert!(result.error.is_some());
        assert!(!result.answer.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn orchestrator_never_raises_even_when_the_llm_is_down() {
        let orchestrator = orchestrator(MockBackend::new().failing_first(usize::MAX));
        let result = orchestrator.process("我头晕恶心是什么病", None).await;
        assert!(result.error.is_some());
        assert!(!result.answer.is_empty());
    }
}
