//! Core data model: chunks, retrieval results, entities, plans, agent state.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The kind of content a chunk carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkType {
    Text,
    Table,
    Image,
    Heading,
}

/// Positional metadata attached to a chunk.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChunkMetadata {
    /// Source document id.
    pub document_id: Option<i64>,
    /// 1-based page number, when known.
    pub page: Option<u32>,
    /// Character position within the source text.
    pub position: Option<usize>,
    /// Bounding box `[x0, y0, x1, y1]` for table/image chunks.
    pub bbox: Option<[f32; 4]>,
    /// Monotonically assigned index within the document.
    pub chunk_index: usize,
    /// Whether the chunk sits under a recognized heading.
    pub has_title: bool,
    /// Extra annotations (table HTML size, element counts, export hints).
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub extra: HashMap<String, serde_json::Value>,
}

/// A unit of retrievable evidence produced by the chunker.
///
/// Table and image chunks always carry their AI-description field, even when
/// it is the empty string; downstream indexing relies on the field being
/// present.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub chunk_type: ChunkType,
    /// Heading text for the chunk (`# ...` / `## ...`), empty for untitled.
    pub title: String,
    /// Heading level: 0 untitled, 1 for H1 sections, 2 for H2 sections.
    pub level: u8,
    /// Nearest enclosing heading at a strictly lower level.
    pub parent_title: Option<String>,
    /// The retrievable body text. Never empty.
    pub text: String,
    /// Raw table HTML (table chunks only).
    pub table_html: Option<String>,
    /// Image path on disk (image chunks only).
    pub image_path: Option<String>,
    /// Generated description for table/image chunks. Present (possibly
    /// empty) whenever `chunk_type` is `Table` or `Image`.
    pub ai_description: Option<String>,
    /// Text immediately before an image in the source.
    pub context_before: Option<String>,
    /// Text immediately after an image in the source.
    pub context_after: Option<String>,
    pub metadata: ChunkMetadata,
}

impl Chunk {
    /// Create a plain text chunk.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            chunk_type: ChunkType::Text,
            title: String::new(),
            level: 0,
            parent_title: None,
            text: text.into(),
            table_html: None,
            image_path: None,
            ai_description: None,
            context_before: None,
            context_after: None,
            metadata: ChunkMetadata::default(),
        }
    }

    /// Set the heading this chunk belongs to.
    pub fn with_title(mut self, title: impl Into<String>, level: u8) -> Self {
        self.title = title.into();
        self.level = level;
        self.metadata.has_title = !self.title.is_empty();
        self
    }

    /// Set the parent heading.
    pub fn with_parent(mut self, parent: Option<String>) -> Self {
        self.parent_title = parent;
        self
    }
}

/// Which retrieval path produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalMethod {
    Vector,
    Bm25,
    Semantic,
    KnowledgeGraph,
}

impl RetrievalMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            RetrievalMethod::Vector => "vector",
            RetrievalMethod::Bm25 => "bm25",
            RetrievalMethod::Semantic => "semantic",
            RetrievalMethod::KnowledgeGraph => "knowledge_graph",
        }
    }
}

/// Per-stage scores accumulated while a result moves through fusion and the
/// reranker chain. A `None` means the stage never ran for this result.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreCard {
    /// Weighted reciprocal-rank-fusion score.
    pub rrf: Option<f32>,
    /// Relevance-scorer output in `[0, 1]`.
    pub relevance: Option<f32>,
    /// Cross-encoder rerank score.
    pub bge: Option<f32>,
    /// SVM pointwise score.
    pub svm: Option<f32>,
    /// Decision-tree pointwise score.
    pub dtree: Option<f32>,
    /// Fused learned score (mean of svm and dtree when both ran).
    pub ml: Option<f32>,
    /// Ranking-optimizer score.
    pub ranking: Option<f32>,
    /// Alias the optimizer also writes; kept distinct for observability.
    pub optimized: Option<f32>,
}

/// A single ranked piece of evidence.
///
/// Created by a retriever, rescored by fusion and the reranker chain, and
/// dropped at the end of the request. `final_score` is only meaningful after
/// the pipeline's final ordering pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub text: String,
    pub source: String,
    pub document_id: Option<i64>,
    pub method: RetrievalMethod,
    /// Raw score from the originating retriever.
    pub score: f32,
    pub scores: ScoreCard,
    pub final_score: f32,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl RetrievalResult {
    pub fn new(text: impl Into<String>, source: impl Into<String>, method: RetrievalMethod) -> Self {
        Self {
            text: text.into(),
            source: source.into(),
            document_id: None,
            method,
            score: 0.0,
            scores: ScoreCard::default(),
            final_score: 0.0,
            metadata: HashMap::new(),
        }
    }

    pub fn with_score(mut self, score: f32) -> Self {
        self.score = score;
        self
    }

    pub fn with_metadata(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Key used for cross-path deduplication: the first 100 characters of
    /// the body text.
    pub fn dedup_key(&self) -> String {
        self.text.chars().take(100).collect()
    }

    /// Integer metadata lookup, tolerant of JSON number widening.
    pub fn metadata_count(&self, key: &str) -> u64 {
        self.metadata.get(key).and_then(|v| v.as_u64()).unwrap_or(0)
    }
}

/// Node labels in the medical knowledge graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityType {
    Disease,
    Symptom,
    Drug,
    Examination,
    Department,
}

impl EntityType {
    /// Graph node label.
    pub fn label(&self) -> &'static str {
        match self {
            EntityType::Disease => "Disease",
            EntityType::Symptom => "Symptom",
            EntityType::Drug => "Drug",
            EntityType::Examination => "Examination",
            EntityType::Department => "Department",
        }
    }

    /// Plural key used in extraction payloads and strategy priorities.
    pub fn key(&self) -> &'static str {
        match self {
            EntityType::Disease => "diseases",
            EntityType::Symptom => "symptoms",
            EntityType::Drug => "drugs",
            EntityType::Examination => "examinations",
            EntityType::Department => "departments",
        }
    }

    pub fn all() -> [EntityType; 5] {
        [
            EntityType::Disease,
            EntityType::Symptom,
            EntityType::Drug,
            EntityType::Examination,
            EntityType::Department,
        ]
    }
}

/// A named node in the knowledge graph. Created at ingestion, read-only at
/// query time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub entity_type: EntityType,
    pub name: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub properties: HashMap<String, serde_json::Value>,
}

impl Entity {
    pub fn new(entity_type: EntityType, name: impl Into<String>) -> Self {
        Self {
            entity_type,
            name: name.into(),
            properties: HashMap::new(),
        }
    }

    pub fn with_property(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }
}

/// Edge labels in the knowledge graph.
///
/// `Accompanies` (disease ↔ disease) and `InteractsWith` (drug ↔ drug) are
/// intentionally symmetric; queries disambiguate direction in the MATCH
/// pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RelationType {
    HasSymptom,
    TreatedBy,
    RequiresExam,
    BelongsTo,
    InteractsWith,
    ContraindicatedFor,
    Accompanies,
}

impl RelationType {
    pub fn label(&self) -> &'static str {
        match self {
            RelationType::HasSymptom => "HAS_SYMPTOM",
            RelationType::TreatedBy => "TREATED_BY",
            RelationType::RequiresExam => "REQUIRES_EXAM",
            RelationType::BelongsTo => "BELONGS_TO",
            RelationType::InteractsWith => "INTERACTS_WITH",
            RelationType::ContraindicatedFor => "CONTRAINDICATED_FOR",
            RelationType::Accompanies => "ACCOMPANIES",
        }
    }
}

/// A subject–predicate–object edge. Insertion is idempotent on the triple.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relation {
    pub subject: Entity,
    pub predicate: RelationType,
    pub object: Entity,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub properties: HashMap<String, serde_json::Value>,
}

/// Entities extracted from a query, grouped by category and deduplicated.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractedEntities {
    pub diseases: Vec<String>,
    pub symptoms: Vec<String>,
    pub drugs: Vec<String>,
    pub examinations: Vec<String>,
    pub departments: Vec<String>,
}

impl ExtractedEntities {
    pub fn get(&self, entity_type: EntityType) -> &[String] {
        match entity_type {
            EntityType::Disease => &self.diseases,
            EntityType::Symptom => &self.symptoms,
            EntityType::Drug => &self.drugs,
            EntityType::Examination => &self.examinations,
            EntityType::Department => &self.departments,
        }
    }

    pub fn get_mut(&mut self, entity_type: EntityType) -> &mut Vec<String> {
        match entity_type {
            EntityType::Disease => &mut self.diseases,
            EntityType::Symptom => &mut self.symptoms,
            EntityType::Drug => &mut self.drugs,
            EntityType::Examination => &mut self.examinations,
            EntityType::Department => &mut self.departments,
        }
    }

    /// Total entity mentions across all categories.
    pub fn total(&self) -> usize {
        EntityType::all().iter().map(|t| self.get(*t).len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }

    /// Drop empty strings and duplicates, preserving first-seen order.
    pub fn normalize(&mut self) {
        for entity_type in EntityType::all() {
            let list = self.get_mut(entity_type);
            let mut seen = std::collections::HashSet::new();
            list.retain(|name| {
                let trimmed = name.trim();
                !trimmed.is_empty() && seen.insert(trimmed.to_string())
            });
            for name in list.iter_mut() {
                *name = name.trim().to_string();
            }
        }
    }
}

/// A table extracted by a document parser, before chunking.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TableElement {
    pub title: Option<String>,
    /// 1-based page number, 0 when unknown.
    pub page: u32,
    pub index: usize,
    pub html: String,
    pub bbox: Option<[f32; 4]>,
    /// Always present once description generation has run (possibly empty).
    pub ai_description: String,
}

/// An image extracted by a document parser, before chunking.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImageElement {
    pub title: Option<String>,
    pub page: u32,
    pub index: usize,
    pub path: String,
    pub bbox: Option<[f32; 4]>,
    pub context_before: String,
    pub context_after: String,
    pub ai_description: String,
}

/// Parser output handed to the chunker: body text plus sidecar elements.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocumentContent {
    pub text: String,
    pub markdown: String,
    pub tables: Vec<TableElement>,
    pub images: Vec<ImageElement>,
}

impl DocumentContent {
    /// The text the chunker walks: plain text when present, the rendered
    /// markdown otherwise.
    pub fn body(&self) -> &str {
        if !self.text.is_empty() {
            &self.text
        } else {
            &self.markdown
        }
    }
}

/// Question types the strategy selector distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionType {
    DiseaseInfo,
    SymptomDiagnosis,
    DrugInfo,
    DrugInteraction,
    ExaminationAdvice,
    TreatmentPlan,
    GeneralConsultation,
}

impl QuestionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuestionType::DiseaseInfo => "disease_info",
            QuestionType::SymptomDiagnosis => "symptom_diagnosis",
            QuestionType::DrugInfo => "drug_info",
            QuestionType::DrugInteraction => "drug_interaction",
            QuestionType::ExaminationAdvice => "examination_advice",
            QuestionType::TreatmentPlan => "treatment_plan",
            QuestionType::GeneralConsultation => "general_consultation",
        }
    }

    /// Declaration order, used for deterministic tie-breaking.
    pub fn all() -> [QuestionType; 7] {
        [
            QuestionType::DiseaseInfo,
            QuestionType::SymptomDiagnosis,
            QuestionType::DrugInfo,
            QuestionType::DrugInteraction,
            QuestionType::ExaminationAdvice,
            QuestionType::TreatmentPlan,
            QuestionType::GeneralConsultation,
        ]
    }
}

/// Per-turn retrieval plan. Immutable once emitted by the strategy selector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryPlan {
    pub question_type: QuestionType,
    pub strategy: String,
    /// Entity categories in traversal order.
    pub entity_priority: Vec<EntityType>,
    /// Graph expansion depth, 1–3.
    pub depth: u8,
    pub max_results: usize,
    /// Classification confidence in `[0, 1]`.
    pub confidence: f32,
}

/// Risk tiers emitted by the diagnosis tool and read by the risk gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        }
    }

    /// Whether the risk gate should append the urgent-care notice.
    pub fn requires_immediate_attention(&self) -> bool {
        matches!(self, RiskLevel::High | RiskLevel::Critical)
    }
}

/// The specialist agents the orchestrator routes between.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    Doctor,
    HealthManager,
    CustomerService,
    Operations,
}

impl AgentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentKind::Doctor => "doctor",
            AgentKind::HealthManager => "health_manager",
            AgentKind::CustomerService => "customer_service",
            AgentKind::Operations => "operations",
        }
    }
}

/// Tools an agent may record in `tools_used`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    RagSearch,
    KnowledgeGraphQuery,
    DiagnosisAssistant,
    StaticFaq,
}

impl ToolKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolKind::RagSearch => "rag_search",
            ToolKind::KnowledgeGraphQuery => "knowledge_graph_query",
            ToolKind::DiagnosisAssistant => "diagnosis_assistant",
            ToolKind::StaticFaq => "static_faq",
        }
    }
}

/// What a specialist agent hands back to the orchestrator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentResult {
    pub answer: String,
    pub sources: Vec<String>,
    pub tools_used: Vec<ToolKind>,
    pub risk_level: Option<RiskLevel>,
    pub execution_time_ms: u64,
    /// Set when processing failed; the answer then carries a generic notice.
    pub error: Option<String>,
    /// Annotations the orchestrator or transport may read (cache_hit,
    /// similarity, diagnosis analysis, matched FAQ key).
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub annotations: HashMap<String, serde_json::Value>,
}

impl AgentResult {
    pub fn annotate(&mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) {
        self.annotations.insert(key.into(), value.into());
    }
}

/// Mutable state for one orchestration run. Never persisted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentState {
    pub user_input: String,
    pub intent: String,
    pub agent_type: Option<AgentKind>,
    pub result: AgentResult,
    /// Bag of arbitrary annotations: history, user_profile, risk_level,
    /// trace_id, intent_confidence.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub context: HashMap<String, serde_json::Value>,
}

impl AgentState {
    pub fn new(user_input: impl Into<String>) -> Self {
        Self {
            user_input: user_input.into(),
            ..Default::default()
        }
    }

    pub fn trace_id(&self) -> Option<&str> {
        self.context.get("trace_id").and_then(|v| v.as_str())
    }

    pub fn set_context(&mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) {
        self.context.insert(key.into(), value.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedup_key_truncates_at_100_chars() {
        let long = "甲".repeat(250);
        let result = RetrievalResult::new(&long, "doc", RetrievalMethod::Vector);
        assert_eq!(result.dedup_key().chars().count(), 100);

        let short = RetrievalResult::new("短文本", "doc", RetrievalMethod::Bm25);
        assert_eq!(short.dedup_key(), "短文本");
    }

    #[test]
    fn entities_normalize_dedups_and_trims() {
        let mut entities = ExtractedEntities {
            diseases: vec!["高血压 ".into(), "高血压".into(), "".into(), "糖尿病".into()],
            ..Default::default()
        };
        entities.normalize();
        assert_eq!(entities.diseases, vec!["高血压", "糖尿病"]);
        assert_eq!(entities.total(), 2);
    }

    #[test]
    fn risk_level_ordering_and_gate() {
        assert!(RiskLevel::Critical > RiskLevel::High);
        assert!(RiskLevel::High.requires_immediate_attention());
        assert!(!RiskLevel::Medium.requires_immediate_attention());
    }

    #[test]
    fn relation_labels_match_graph_schema() {
        assert_eq!(RelationType::HasSymptom.label(), "HAS_SYMPTOM");
        assert_eq!(RelationType::ContraindicatedFor.label(), "CONTRAINDICATED_FOR");
        assert_eq!(EntityType::Examination.label(), "Examination");
        assert_eq!(EntityType::Examination.key(), "examinations");
    }

    #[test]
    fn chunk_builder_tracks_title() {
        let chunk = Chunk::text("正文").with_title("# 概述", 1);
        assert!(chunk.metadata.has_title);
        assert_eq!(chunk.level, 1);
        assert_eq!(chunk.chunk_type, ChunkType::Text);
    }
}
