//! # Medikit Core
//!
//! Shared types for the medikit consultation engine: retrieval results,
//! document chunks, medical entities and relations, query plans, and the
//! per-turn agent state passed through the orchestrator.
//!
//! Crates higher in the stack (retrieval, LLM, agents) exchange these types
//! instead of loosely-typed maps, so score provenance and entity categories
//! stay visible in signatures.

pub mod config;
pub mod error;
pub mod types;

pub use config::Settings;
pub use error::{Result, ServiceError};
pub use types::{
    AgentKind, AgentResult, AgentState, Chunk, ChunkMetadata, ChunkType, DocumentContent, Entity,
    EntityType, ExtractedEntities, ImageElement, QueryPlan, QuestionType, Relation, RelationType,
    RetrievalMethod, RetrievalResult, RiskLevel, ScoreCard, TableElement, ToolKind,
};
