//! Prompt templates for the consultation domain.

/// Template bundle. Each specialist agent picks its system prompt here and
/// builds the user prompt with the matching `format_*` helper.
pub struct PromptTemplate;

impl PromptTemplate {
    pub const MEDICAL_CONSULTATION_SYSTEM: &'static str = "\
你是一位专业的AI医疗助手。你的职责是：
1. 基于提供的医疗文献和知识图谱信息，为用户提供准确的医疗咨询
2. 所有回答必须标注数据来源，格式：[来源1]、[来源2]等
3. 对于不确定的信息，明确说明“暂无明确指南支持”
4. 禁止编造医疗建议或诊断
5. 对于高风险场景（如紧急病症、手术方案、药物剂量调整），必须提示用户前往医院就诊
6. 使用专业但易懂的语言，避免过度技术化";

    pub const DIAGNOSIS_ASSISTANT_SYSTEM: &'static str = "\
你是一位专业的诊断辅助AI。基于患者的症状描述和医疗知识，提供可能的诊断建议。

重要原则：
1. 这仅是辅助参考，最终诊断需要医生确认
2. 基于症状提供可能的疾病方向，不要给出确定诊断
3. 建议相关检查项目
4. 对于紧急症状，必须提示立即就医
5. 明确说明这不是最终诊断";

    pub const DRUG_CONSULTATION_SYSTEM: &'static str = "\
你是一位专业的用药咨询AI。基于药物信息和知识图谱，回答用药相关问题。

重要原则：
1. 具体用药方案需要医生根据患者情况制定
2. 提供药物的一般信息、适应症、禁忌症、注意事项
3. 不提供具体的剂量建议（除非是通用指南）
4. 强调个体化用药的重要性
5. 提醒药物相互作用和副作用";

    pub const CUSTOMER_SERVICE_SYSTEM: &'static str = "\
你是一位友好的客服助手。你的职责是：
1. 解答系统使用问题和常见疑问
2. 指导用户使用医疗咨询和健康管理功能
3. 收集和确认用户反馈
4. 无法解答时引导用户联系人工客服";

    pub const HEALTH_MANAGER_SYSTEM: &'static str = "\
你是一位专业的健康管家AI。你的职责是：
1. 基于用户的健康状况提供慢病管理建议
2. 制定个性化的生活方式和健康计划
3. 解读健康数据趋势并给出改善建议
4. 涉及诊断和用药的问题提醒用户咨询医生";

    pub const OPERATIONS_SYSTEM: &'static str = "\
你是一位专业的运营分析AI。你的职责是：
1. 分析咨询数据和系统使用情况
2. 监控系统性能指标
3. 提供知识库优化建议
4. 生成运营报告
5. 识别系统改进机会";

    /// Disclaimer appended to every medical answer at finalization.
    pub const MEDICAL_DISCLAIMER: &'static str =
        "本回答仅供参考，不替代医生诊断和治疗，具体医疗方案请遵医嘱。";

    pub fn format_medical_prompt(context: &str, question: &str) -> String {
        format!(
            "基于以下医疗信息，回答用户的问题：\n\n{context}\n\n用户问题：{question}\n\n\
             请提供专业、准确的回答，并标注信息来源。如果信息不足，请明确说明。"
        )
    }

    pub fn format_diagnosis_prompt(symptoms: &str, context: &str) -> String {
        format!(
            "患者症状描述：{symptoms}\n\n{context}\n\n请提供：\n\
             1. 可能的诊断方向（按可能性排序）\n\
             2. 建议的检查项目\n\
             3. 是否需要立即就医\n\
             4. 注意事项\n\n\
             请明确说明这仅是辅助参考，最终诊断需要医生确认。"
        )
    }

    pub fn format_drug_prompt(question: &str, drug_info: &str, context: &str) -> String {
        format!(
            "用药咨询问题：{question}\n\n药物信息：\n{drug_info}\n\n相关医疗信息：\n{context}\n\n\
             请提供专业的用药建议，包括适应症、禁忌症、注意事项等。"
        )
    }

    pub fn format_customer_service_prompt(question: &str, context: &str) -> String {
        format!("{context}用户问题：{question}\n\n请给出清晰、友好的解答。")
    }

    /// NER extraction prompt with a strict JSON-only contract.
    pub fn format_ner_prompt(query: &str) -> String {
        format!(
            "请从以下医疗咨询问题中提取所有医疗相关实体，并按类型分类。\n\n\
             问题：{query}\n\n\
             请以JSON格式返回，格式如下：\n\
             {{\n    \"diseases\": [\"疾病名称1\", \"疾病名称2\"],\
             \n    \"symptoms\": [\"症状名称1\", \"症状名称2\"],\
             \n    \"drugs\": [\"药物名称1\", \"药物名称2\"],\
             \n    \"examinations\": [\"检查项目1\", \"检查项目2\"],\
             \n    \"departments\": [\"科室名称1\", \"科室名称2\"]\n}}\n\n\
             要求：\n\
             1. 只提取明确提到的实体，不要推测\n\
             2. 实体名称要完整准确\n\
             3. 如果某个类型没有实体，返回空数组\n\
             4. 只返回JSON，不要其他文字\n\n\
             JSON:"
        )
    }

    pub const NER_SYSTEM: &'static str =
        "你是一个专业的医疗实体识别助手，擅长从医疗相关文本中准确提取实体。";

    /// Query rewrite prompt for the semantic retriever.
    pub fn format_rewrite_prompt(query: &str, context: Option<&str>) -> String {
        let context_part = context
            .map(|c| format!("\n上下文：{c}"))
            .unwrap_or_default();
        format!(
            "请将以下医疗查询重写为更适合检索的形式，保持核心医疗概念：\n\n\
             查询：{query}{context_part}\n\n\
             请直接返回重写后的查询，不要添加其他说明。"
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn medical_prompt_embeds_context_and_question() {
        let prompt = PromptTemplate::format_medical_prompt("[来源1]\n限盐", "高血压怎么吃");
        assert!(prompt.contains("[来源1]"));
        assert!(prompt.contains("高血压怎么吃"));
    }

    #[test]
    fn ner_prompt_demands_json_only() {
        let prompt = PromptTemplate::format_ner_prompt("头痛吃布洛芬行吗");
        assert!(prompt.contains("\"diseases\""));
        assert!(prompt.ends_with("JSON:"));
    }

    #[test]
    fn rewrite_prompt_optionally_carries_context() {
        let bare = PromptTemplate::format_rewrite_prompt("头痛", None);
        assert!(!bare.contains("上下文"));
        let with = PromptTemplate::format_rewrite_prompt("头痛", Some("患者正在服用抗凝药"));
        assert!(with.contains("上下文：患者正在服用抗凝药"));
    }
}
