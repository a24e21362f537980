//! # Medikit Graph
//!
//! Knowledge-graph access for the consultation engine: a [`GraphClient`]
//! trait over parameterized Cypher, an HTTP client with lazy mutex-protected
//! reconnection, the medical schema, query templates, and a builder that
//! writes entities and relations with MERGE semantics.

pub mod builder;
pub mod client;
pub mod memory;
pub mod queries;
pub mod schema;

use async_trait::async_trait;
use std::collections::HashMap;
use thiserror::Error;

/// Graph-related errors.
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Authentication failed")]
    AuthenticationFailed,
}

/// Result type for graph operations.
pub type GraphResult<T> = Result<T, GraphError>;

/// A row returned by a Cypher query: column name → JSON value.
pub type Row = HashMap<String, serde_json::Value>;

/// Parameters bound into a Cypher query.
pub type Params = HashMap<String, serde_json::Value>;

/// Build a parameter map from `(name, value)` pairs.
pub fn params<const N: usize>(pairs: [(&str, serde_json::Value); N]) -> Params {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}

/// Parameterized Cypher execution.
///
/// Implementations are process-wide singletons; connections are established
/// lazily and re-established after failures, behind a mutex so concurrent
/// callers do not stampede the server.
#[async_trait]
pub trait GraphClient: Send + Sync {
    /// Run a read query.
    async fn execute_query(&self, query: &str, params: Params) -> GraphResult<Vec<Row>>;

    /// Run a write query inside a transaction.
    async fn execute_write(&self, query: &str, params: Params) -> GraphResult<Vec<Row>>;

    /// Cheap liveness probe.
    async fn health_check(&self) -> bool {
        self.execute_query("RETURN 1 as health", Params::new())
            .await
            .map(|rows| !rows.is_empty())
            .unwrap_or(false)
    }
}

pub use builder::GraphBuilder;
pub use client::HttpGraphClient;
pub use memory::MemoryGraph;
