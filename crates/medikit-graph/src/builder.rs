//! Knowledge-graph construction with MERGE semantics.

use crate::{params, queries, GraphClient, GraphResult, Row};
use medikit_core::{Entity, Relation};
use serde_json::json;
use std::sync::Arc;
use tracing::info;

/// Writes entities and relations into the graph store.
///
/// Both writes are idempotent: nodes MERGE on `name`, relations MERGE on the
/// (subject, predicate, object) triple. Re-ingesting a document leaves the
/// graph unchanged.
pub struct GraphBuilder {
    client: Arc<dyn GraphClient>,
}

impl GraphBuilder {
    pub fn new(client: Arc<dyn GraphClient>) -> Self {
        Self { client }
    }

    /// Create the schema indexes once at initialization.
    pub async fn initialize_schema(&self) -> GraphResult<()> {
        for statement in queries::CREATE_INDEXES {
            self.client
                .execute_write(statement, crate::Params::new())
                .await?;
        }
        info!("knowledge-graph schema initialized");
        Ok(())
    }

    pub async fn create_entity(&self, entity: &Entity) -> GraphResult<Vec<Row>> {
        let query = queries::merge_entity(entity.entity_type.label());
        let rows = self
            .client
            .execute_write(
                &query,
                params([
                    ("name", json!(entity.name)),
                    ("props", json!(entity.properties)),
                ]),
            )
            .await?;
        info!(label = entity.entity_type.label(), name = %entity.name, "entity merged");
        Ok(rows)
    }

    pub async fn create_relation(&self, relation: &Relation) -> GraphResult<Vec<Row>> {
        let query = queries::merge_relation(
            relation.subject.entity_type.label(),
            relation.predicate.label(),
            relation.object.entity_type.label(),
        );
        let rows = self
            .client
            .execute_write(
                &query,
                params([
                    ("from_name", json!(relation.subject.name)),
                    ("to_name", json!(relation.object.name)),
                    ("props", json!(relation.properties)),
                ]),
            )
            .await?;
        info!(
            rel = relation.predicate.label(),
            from = %relation.subject.name,
            to = %relation.object.name,
            "relation merged"
        );
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryGraph;
    use medikit_core::{EntityType, RelationType};

    fn relation(from: &str, to: &str) -> Relation {
        Relation {
            subject: Entity::new(EntityType::Disease, from),
            predicate: RelationType::HasSymptom,
            object: Entity::new(EntityType::Symptom, to),
            properties: Default::default(),
        }
    }

    #[tokio::test]
    async fn relation_insert_is_idempotent() {
        let graph = Arc::new(MemoryGraph::new());
        let builder = GraphBuilder::new(graph.clone());

        builder
            .create_entity(&Entity::new(EntityType::Disease, "高血压"))
            .await
            .unwrap();
        builder
            .create_entity(&Entity::new(EntityType::Symptom, "头晕"))
            .await
            .unwrap();

        builder.create_relation(&relation("高血压", "头晕")).await.unwrap();
        builder.create_relation(&relation("高血压", "头晕")).await.unwrap();

        assert_eq!(graph.edge_count(), 1);
    }

    #[tokio::test]
    async fn entity_merge_updates_properties() {
        let graph = Arc::new(MemoryGraph::new());
        let builder = GraphBuilder::new(graph.clone());

        builder
            .create_entity(&Entity::new(EntityType::Disease, "高血压"))
            .await
            .unwrap();
        let rows = builder
            .create_entity(
                &Entity::new(EntityType::Disease, "高血压").with_property("icd10", "I10"),
            )
            .await
            .unwrap();

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["e"]["icd10"], "I10");
    }

    #[tokio::test]
    async fn schema_bootstrap_succeeds() {
        let graph = Arc::new(MemoryGraph::new());
        let builder = GraphBuilder::new(graph);
        builder.initialize_schema().await.unwrap();
    }
}
