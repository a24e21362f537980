//! Diagnosis assistant: symptom keyword extraction and risk triage.

use medikit_core::RiskLevel;
use serde::{Deserialize, Serialize};
use tracing::info;

const SYMPTOM_KEYWORDS: [&str; 18] = [
    "疼痛", "发热", "咳嗽", "呼吸困难", "胸痛", "腹痛", "头痛", "头晕", "恶心", "呕吐", "腹泻",
    "便秘", "乏力", "失眠", "心悸", "水肿", "皮疹", "出血",
];

const HIGH_RISK_KEYWORDS: [&str; 10] = [
    "胸痛", "呼吸困难", "意识不清", "大出血", "剧烈疼痛", "休克", "昏迷", "抽搐", "急性", "紧急",
];

const MEDIUM_RISK_KEYWORDS: [&str; 5] = ["持续发热", "持续疼痛", "反复", "加重", "恶化"];

/// One triage pass over a free-text complaint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosisAnalysis {
    pub symptoms: String,
    pub symptom_keywords: Vec<String>,
    pub risk_level: RiskLevel,
    pub requires_immediate_attention: bool,
}

/// Keyword-dictionary triage tool used by the doctor agent.
pub struct DiagnosisTool;

impl DiagnosisTool {
    pub fn new() -> Self {
        Self
    }

    /// Symptom mentions found in the text, in dictionary order.
    pub fn extract_symptoms(&self, text: &str) -> Vec<String> {
        SYMPTOM_KEYWORDS
            .iter()
            .filter(|keyword| text.contains(**keyword))
            .map(|keyword| keyword.to_string())
            .collect()
    }

    /// Three-tier risk triage over the raw complaint text.
    pub fn assess_risk_level(&self, text: &str) -> RiskLevel {
        if HIGH_RISK_KEYWORDS.iter().any(|k| text.contains(k)) {
            return RiskLevel::High;
        }
        if MEDIUM_RISK_KEYWORDS.iter().any(|k| text.contains(k)) {
            return RiskLevel::Medium;
        }
        RiskLevel::Low
    }

    /// Full analysis: symptoms plus risk.
    pub fn analyze(&self, text: &str) -> DiagnosisAnalysis {
        let symptom_keywords = self.extract_symptoms(text);
        let risk_level = self.assess_risk_level(text);
        info!(risk_level = risk_level.as_str(), symptoms = symptom_keywords.len(), "diagnosis triage");

        DiagnosisAnalysis {
            symptoms: text.to_string(),
            symptom_keywords,
            requires_immediate_attention: risk_level.requires_immediate_attention(),
            risk_level,
        }
    }

    /// Care recommendation per risk tier.
    pub fn recommendation(&self, risk_level: RiskLevel) -> &'static str {
        match risk_level {
            RiskLevel::High | RiskLevel::Critical => {
                "建议立即前往医院急诊科就诊，或拨打急救电话。"
            }
            RiskLevel::Medium => "建议尽快前往医院就诊，进行详细检查。",
            RiskLevel::Low => "建议观察症状变化，如持续或加重，请及时就医。",
        }
    }
}

impl Default for DiagnosisTool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sudden_chest_pain_is_high_risk() {
        let tool = DiagnosisTool::new();
        let analysis = tool.analyze("我突然胸痛伴呼吸困难");

        assert_eq!(analysis.risk_level, RiskLevel::High);
        assert!(analysis.requires_immediate_attention);
        assert!(analysis.symptom_keywords.contains(&"胸痛".to_string()));
        assert!(analysis.symptom_keywords.contains(&"呼吸困难".to_string()));
        assert!(tool.recommendation(analysis.risk_level).contains("立即"));
    }

    #[test]
    fn worsening_symptoms_are_medium_risk() {
        let tool = DiagnosisTool::new();
        assert_eq!(tool.assess_risk_level("咳嗽反复加重"), RiskLevel::Medium);
    }

    #[test]
    fn mild_complaints_are_low_risk() {
        let tool = DiagnosisTool::new();
        let analysis = tool.analyze("偶尔有点头晕");
        assert_eq!(analysis.risk_level, RiskLevel::Low);
        assert!(!analysis.requires_immediate_attention);
        assert!(tool.recommendation(RiskLevel::Low).contains("观察"));
    }
}
