//! HTTP Cypher client with lazy, single-flight reconnection.

use crate::{GraphClient, GraphError, GraphResult, Params, Row};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Configuration for the graph endpoint.
#[derive(Debug, Clone)]
pub struct GraphConfig {
    pub url: String,
    pub user: String,
    pub password: String,
    pub timeout_secs: u64,
}

impl GraphConfig {
    pub fn new(url: &str, user: &str, password: &str) -> Self {
        Self {
            url: url.trim_end_matches('/').to_string(),
            user: user.to_string(),
            password: password.to_string(),
            timeout_secs: 30,
        }
    }
}

#[derive(Serialize)]
struct CypherStatement<'a> {
    statement: &'a str,
    parameters: &'a Params,
}

#[derive(Serialize)]
struct CypherRequest<'a> {
    statements: Vec<CypherStatement<'a>>,
}

#[derive(Deserialize)]
struct CypherResponse {
    results: Vec<CypherResult>,
    #[serde(default)]
    errors: Vec<CypherError>,
}

#[derive(Deserialize)]
struct CypherResult {
    columns: Vec<String>,
    data: Vec<CypherRow>,
}

#[derive(Deserialize)]
struct CypherRow {
    row: Vec<serde_json::Value>,
}

#[derive(Deserialize)]
struct CypherError {
    code: String,
    message: String,
}

/// Graph client over the transactional Cypher HTTP endpoint.
///
/// The connection is verified lazily on first use and re-verified after a
/// failure. Reconnection runs under a mutex so a burst of failing callers
/// produces one probe, not a thundering herd.
pub struct HttpGraphClient {
    config: GraphConfig,
    client: Client,
    connected: Mutex<bool>,
}

impl HttpGraphClient {
    pub fn new(config: GraphConfig) -> GraphResult<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| GraphError::ConnectionFailed(e.to_string()))?;

        Ok(Self {
            config,
            client,
            connected: Mutex::new(false),
        })
    }

    fn commit_url(&self) -> String {
        format!("{}/db/neo4j/tx/commit", self.config.url)
    }

    /// Verify connectivity, reconnecting if needed. Single-flight: only one
    /// caller probes at a time; the rest observe the flag it sets.
    async fn ensure_connected(&self) -> GraphResult<()> {
        let mut connected = self.connected.lock().await;
        if *connected {
            return Ok(());
        }

        let response = self
            .client
            .post(self.commit_url())
            .basic_auth(&self.config.user, Some(&self.config.password))
            .json(&CypherRequest {
                statements: vec![CypherStatement {
                    statement: "RETURN 1",
                    parameters: &Params::new(),
                }],
            })
            .send()
            .await
            .map_err(|e| GraphError::ConnectionFailed(e.to_string()))?;

        if response.status().as_u16() == 401 {
            return Err(GraphError::AuthenticationFailed);
        }
        if !response.status().is_success() {
            return Err(GraphError::ConnectionFailed(format!(
                "probe returned {}",
                response.status()
            )));
        }

        *connected = true;
        info!(url = %self.config.url, "graph store connected");
        Ok(())
    }

    async fn mark_disconnected(&self) {
        let mut connected = self.connected.lock().await;
        *connected = false;
    }

    async fn run(&self, query: &str, params: Params) -> GraphResult<Vec<Row>> {
        self.ensure_connected().await?;

        let request = CypherRequest {
            statements: vec![CypherStatement {
                statement: query,
                parameters: &params,
            }],
        };

        let response = self
            .client
            .post(self.commit_url())
            .basic_auth(&self.config.user, Some(&self.config.password))
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                // Connection may be gone; force a re-probe next call.
                GraphError::ConnectionFailed(e.to_string())
            });

        let response = match response {
            Ok(r) => r,
            Err(e) => {
                self.mark_disconnected().await;
                warn!(error = %e, "graph query transport failure");
                return Err(e);
            }
        };

        if !response.status().is_success() {
            self.mark_disconnected().await;
            return Err(GraphError::QueryFailed(format!(
                "status {}",
                response.status()
            )));
        }

        let parsed: CypherResponse = response
            .json()
            .await
            .map_err(|e| GraphError::InvalidResponse(e.to_string()))?;

        if let Some(err) = parsed.errors.first() {
            return Err(GraphError::QueryFailed(format!(
                "{}: {}",
                err.code, err.message
            )));
        }

        let result = parsed
            .results
            .into_iter()
            .next()
            .ok_or_else(|| GraphError::InvalidResponse("no result set".to_string()))?;

        let rows = result
            .data
            .into_iter()
            .map(|data| {
                result
                    .columns
                    .iter()
                    .cloned()
                    .zip(data.row)
                    .collect::<Row>()
            })
            .collect();

        Ok(rows)
    }

    /// Create the schema indexes. Failures are logged and skipped so a
    /// partially-initialized store does not block startup.
    pub async fn create_indexes(&self) {
        for statement in crate::queries::CREATE_INDEXES {
            if let Err(e) = self.execute_write(statement, Params::new()).await {
                warn!(statement, error = %e, "index creation failed");
            }
        }
    }
}

#[async_trait]
impl GraphClient for HttpGraphClient {
    async fn execute_query(&self, query: &str, params: Params) -> GraphResult<Vec<Row>> {
        self.run(query, params).await
    }

    async fn execute_write(&self, query: &str, params: Params) -> GraphResult<Vec<Row>> {
        self.run(query, params).await
    }
}
