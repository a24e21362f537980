//! In-memory graph used by tests in place of a live store.
//!
//! Holds labeled nodes and typed edges and answers the query templates from
//! [`crate::queries`]. Unknown query text fails, which keeps retriever code
//! honest about using the templates.

use crate::{GraphClient, GraphError, GraphResult, Params, Row};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::RwLock;

#[derive(Clone)]
struct Node {
    props: HashMap<String, Value>,
}

#[derive(Clone, PartialEq)]
struct Edge {
    from_label: String,
    from_name: String,
    rel: String,
    to_label: String,
    to_name: String,
    props: HashMap<String, Value>,
}

#[derive(Default)]
struct GraphData {
    // label -> name -> node
    nodes: HashMap<String, HashMap<String, Node>>,
    edges: Vec<Edge>,
}

/// Test double for [`GraphClient`].
#[derive(Default)]
pub struct MemoryGraph {
    data: RwLock<GraphData>,
}

impl MemoryGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a node directly (test setup convenience).
    pub fn add_node(&self, label: &str, name: &str) {
        let mut data = self.data.write().expect("lock poisoned");
        data.nodes
            .entry(label.to_string())
            .or_default()
            .entry(name.to_string())
            .or_insert_with(|| Node {
                props: HashMap::from([("name".to_string(), json!(name))]),
            });
    }

    /// Insert an edge directly, creating endpoints as needed.
    pub fn add_edge(&self, from_label: &str, from_name: &str, rel: &str, to_label: &str, to_name: &str) {
        self.add_node(from_label, from_name);
        self.add_node(to_label, to_name);
        let edge = Edge {
            from_label: from_label.to_string(),
            from_name: from_name.to_string(),
            rel: rel.to_string(),
            to_label: to_label.to_string(),
            to_name: to_name.to_string(),
            props: HashMap::new(),
        };
        let mut data = self.data.write().expect("lock poisoned");
        if !data.edges.contains(&edge) {
            data.edges.push(edge);
        }
    }

    pub fn edge_count(&self) -> usize {
        self.data.read().expect("lock poisoned").edges.len()
    }

    fn param_str(params: &Params, key: &str) -> GraphResult<String> {
        params
            .get(key)
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| GraphError::QueryFailed(format!("missing parameter ${}", key)))
    }

    fn prop(node: &Node, key: &str) -> Value {
        node.props.get(key).cloned().unwrap_or(Value::Null)
    }

    fn answer(&self, query: &str, params: &Params) -> GraphResult<Vec<Row>> {
        use crate::queries as q;

        let data = self.data.read().expect("lock poisoned");
        let trimmed = query.trim();

        if trimmed == "RETURN 1 as health" || trimmed == "RETURN 1" {
            return Ok(vec![Row::from([("health".to_string(), json!(1))])]);
        }
        if trimmed.starts_with("CREATE INDEX") {
            return Ok(vec![]);
        }

        if trimmed == q::FIND_DISEASE_BY_NAME {
            let name = Self::param_str(params, "name")?;
            return Ok(data
                .nodes
                .get("Disease")
                .and_then(|nodes| nodes.get(&name))
                .map(|node| vec![Row::from([("d".to_string(), json!(node.props))])])
                .unwrap_or_default());
        }

        if trimmed == q::FIND_DISEASE_SYMPTOMS
            || trimmed == q::FIND_DISEASE_DRUGS
            || trimmed == q::FIND_DISEASE_EXAMINATIONS
        {
            let disease = Self::param_str(params, "disease_name")?;
            let (rel, column) = if trimmed == q::FIND_DISEASE_SYMPTOMS {
                ("HAS_SYMPTOM", "symptom")
            } else if trimmed == q::FIND_DISEASE_DRUGS {
                ("TREATED_BY", "drug")
            } else {
                ("REQUIRES_EXAM", "examination")
            };
            return Ok(data
                .edges
                .iter()
                .filter(|e| e.rel == rel && e.from_label == "Disease" && e.from_name == disease)
                .map(|e| Row::from([(column.to_string(), json!(e.to_name))]))
                .collect());
        }

        if trimmed == q::FIND_DISEASES_BY_SYMPTOM {
            let symptom = Self::param_str(params, "symptom_name")?;
            let mut rows: Vec<Row> = data
                .edges
                .iter()
                .filter(|e| e.rel == "HAS_SYMPTOM" && e.to_name == symptom)
                .map(|e| {
                    let icd10 = data
                        .nodes
                        .get("Disease")
                        .and_then(|n| n.get(&e.from_name))
                        .map(|n| Self::prop(n, "icd10"))
                        .unwrap_or(Value::Null);
                    Row::from([
                        ("disease".to_string(), json!(e.from_name)),
                        ("icd10".to_string(), icd10),
                    ])
                })
                .collect();
            rows.truncate(10);
            return Ok(rows);
        }

        if trimmed == q::FIND_DISEASES_BY_SYMPTOMS {
            let names: Vec<String> = params
                .get("symptom_names")
                .and_then(|v| v.as_array())
                .map(|arr| {
                    arr.iter()
                        .filter_map(|v| v.as_str().map(|s| s.to_string()))
                        .collect()
                })
                .unwrap_or_default();
            let min_matches = params
                .get("min_matches")
                .and_then(|v| v.as_u64())
                .unwrap_or(1);

            let mut counts: HashMap<String, u64> = HashMap::new();
            for edge in data
                .edges
                .iter()
                .filter(|e| e.rel == "HAS_SYMPTOM" && names.contains(&e.to_name))
            {
                *counts.entry(edge.from_name.clone()).or_insert(0) += 1;
            }
            let mut rows: Vec<(String, u64)> = counts
                .into_iter()
                .filter(|(_, count)| *count >= min_matches)
                .collect();
            rows.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
            rows.truncate(10);
            return Ok(rows
                .into_iter()
                .map(|(disease, count)| {
                    Row::from([
                        ("disease".to_string(), json!(disease)),
                        ("icd10".to_string(), Value::Null),
                        ("symptom_count".to_string(), json!(count)),
                    ])
                })
                .collect());
        }

        if trimmed == q::FIND_DRUG_INTERACTIONS {
            let drug = Self::param_str(params, "drug_name")?;
            let mut rows = Vec::new();
            for edge in data.edges.iter().filter(|e| e.rel == "INTERACTS_WITH") {
                // Symmetric relation: match either endpoint.
                let other = if edge.from_name == drug {
                    Some(&edge.to_name)
                } else if edge.to_name == drug {
                    Some(&edge.from_name)
                } else {
                    None
                };
                if let Some(other) = other {
                    rows.push(Row::from([
                        ("interacting_drug".to_string(), json!(other)),
                        (
                            "type".to_string(),
                            edge.props.get("interaction_type").cloned().unwrap_or(Value::Null),
                        ),
                        (
                            "severity".to_string(),
                            edge.props.get("severity").cloned().unwrap_or(Value::Null),
                        ),
                        (
                            "description".to_string(),
                            edge.props.get("description").cloned().unwrap_or(Value::Null),
                        ),
                    ]));
                }
            }
            rows.truncate(10);
            return Ok(rows);
        }

        if trimmed == q::FIND_DRUG_DISEASES {
            let drug = Self::param_str(params, "drug_name")?;
            if data.nodes.get("Drug").map_or(true, |n| !n.contains_key(&drug)) {
                return Ok(vec![]);
            }
            let diseases: Vec<String> = data
                .edges
                .iter()
                .filter(|e| e.rel == "TREATED_BY" && e.to_name == drug)
                .map(|e| e.from_name.clone())
                .collect();
            return Ok(vec![Row::from([
                ("drug".to_string(), json!(drug)),
                ("diseases".to_string(), json!(diseases)),
            ])]);
        }

        if trimmed == q::FIND_DRUG_CONTRAINDICATIONS {
            let drug = Self::param_str(params, "drug_name")?;
            return Ok(data
                .edges
                .iter()
                .filter(|e| e.rel == "CONTRAINDICATED_FOR" && e.from_name == drug)
                .map(|e| {
                    Row::from([
                        ("disease".to_string(), json!(e.to_name)),
                        ("icd10".to_string(), Value::Null),
                    ])
                })
                .collect());
        }

        if trimmed == q::FIND_EXAMINATION_DISEASES {
            let exam = Self::param_str(params, "exam_name")?;
            if data
                .nodes
                .get("Examination")
                .map_or(true, |n| !n.contains_key(&exam))
            {
                return Ok(vec![]);
            }
            let diseases: Vec<String> = data
                .edges
                .iter()
                .filter(|e| e.rel == "REQUIRES_EXAM" && e.to_name == exam)
                .map(|e| e.from_name.clone())
                .collect();
            return Ok(vec![Row::from([
                ("examination".to_string(), json!(exam)),
                ("diseases".to_string(), json!(diseases)),
            ])]);
        }

        for (probe, label) in [
            (q::VALIDATE_DISEASE, "Disease"),
            (q::VALIDATE_SYMPTOM, "Symptom"),
            (q::VALIDATE_DRUG, "Drug"),
            (q::VALIDATE_EXAMINATION, "Examination"),
            (q::VALIDATE_DEPARTMENT, "Department"),
        ] {
            if trimmed == probe {
                let name = Self::param_str(params, "name")?;
                let found = data
                    .nodes
                    .get(label)
                    .map(|nodes| nodes.keys().any(|k| k.contains(&name)))
                    .unwrap_or(false);
                return Ok(if found {
                    vec![Row::from([("name".to_string(), json!(name))])]
                } else {
                    vec![]
                });
            }
        }

        Err(GraphError::QueryFailed(format!(
            "memory graph has no handler for query: {}",
            trimmed.lines().next().unwrap_or("")
        )))
    }

    fn write(&self, query: &str, params: &Params) -> GraphResult<Vec<Row>> {
        let trimmed = query.trim();

        if trimmed.starts_with("CREATE INDEX") {
            return Ok(vec![]);
        }

        // MERGE (e:<Label> {name: $name}) SET e += $props RETURN e
        if trimmed.starts_with("MERGE (e:") {
            let label = trimmed["MERGE (e:".len()..]
                .split(' ')
                .next()
                .unwrap_or("")
                .to_string();
            let name = Self::param_str(params, "name")?;
            let props = params
                .get("props")
                .and_then(|v| v.as_object())
                .map(|m| m.clone().into_iter().collect::<HashMap<_, _>>())
                .unwrap_or_default();

            let mut data = self.data.write().expect("lock poisoned");
            let node = data
                .nodes
                .entry(label)
                .or_default()
                .entry(name.clone())
                .or_insert_with(|| Node {
                    props: HashMap::from([("name".to_string(), json!(name))]),
                });
            node.props.extend(props);
            return Ok(vec![Row::from([("e".to_string(), json!(node.props))])]);
        }

        // MATCH (a:<From> {name: $from_name}) MATCH (b:<To> {name: $to_name})
        // MERGE (a)-[r:<REL>]->(b) ...
        if trimmed.starts_with("MATCH (a:") && trimmed.contains("MERGE (a)-[r:") {
            let from_label = trimmed["MATCH (a:".len()..]
                .split(' ')
                .next()
                .unwrap_or("")
                .to_string();
            let to_label = trimmed
                .split("MATCH (b:")
                .nth(1)
                .and_then(|rest| rest.split(' ').next())
                .unwrap_or("")
                .to_string();
            let rel = trimmed
                .split("MERGE (a)-[r:")
                .nth(1)
                .and_then(|rest| rest.split(']').next())
                .unwrap_or("")
                .to_string();
            let from_name = Self::param_str(params, "from_name")?;
            let to_name = Self::param_str(params, "to_name")?;
            let props = params
                .get("props")
                .and_then(|v| v.as_object())
                .map(|m| m.clone().into_iter().collect::<HashMap<_, _>>())
                .unwrap_or_default();

            let mut data = self.data.write().expect("lock poisoned");
            let both_exist = data
                .nodes
                .get(&from_label)
                .map_or(false, |n| n.contains_key(&from_name))
                && data
                    .nodes
                    .get(&to_label)
                    .map_or(false, |n| n.contains_key(&to_name));
            if !both_exist {
                return Ok(vec![]);
            }

            if let Some(existing) = data.edges.iter_mut().find(|e| {
                e.from_label == from_label
                    && e.from_name == from_name
                    && e.rel == rel
                    && e.to_label == to_label
                    && e.to_name == to_name
            }) {
                existing.props.extend(props);
            } else {
                data.edges.push(Edge {
                    from_label,
                    from_name,
                    rel,
                    to_label,
                    to_name,
                    props,
                });
            }
            return Ok(vec![Row::from([("r".to_string(), json!({}))])]);
        }

        self.answer(query, params)
    }
}

#[async_trait]
impl GraphClient for MemoryGraph {
    async fn execute_query(&self, query: &str, params: Params) -> GraphResult<Vec<Row>> {
        self.answer(query, &params)
    }

    async fn execute_write(&self, query: &str, params: Params) -> GraphResult<Vec<Row>> {
        self.write(query, &params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queries;

    fn seeded() -> MemoryGraph {
        let graph = MemoryGraph::new();
        graph.add_edge("Disease", "偏头痛", "HAS_SYMPTOM", "Symptom", "头痛");
        graph.add_edge("Disease", "偏头痛", "HAS_SYMPTOM", "Symptom", "头晕");
        graph.add_edge("Disease", "高血压", "HAS_SYMPTOM", "Symptom", "头晕");
        graph.add_edge("Disease", "高血压", "TREATED_BY", "Drug", "缬沙坦");
        graph
    }

    #[tokio::test]
    async fn symptom_lookup_finds_diseases() {
        let graph = seeded();
        let rows = graph
            .execute_query(
                queries::FIND_DISEASES_BY_SYMPTOM,
                crate::params([("symptom_name", json!("头晕"))]),
            )
            .await
            .unwrap();
        let diseases: Vec<&str> = rows.iter().filter_map(|r| r["disease"].as_str()).collect();
        assert!(diseases.contains(&"偏头痛"));
        assert!(diseases.contains(&"高血压"));
    }

    #[tokio::test]
    async fn validation_probe_uses_contains() {
        let graph = seeded();
        let rows = graph
            .execute_query(
                queries::VALIDATE_DISEASE,
                crate::params([("name", json!("头痛"))]),
            )
            .await
            .unwrap();
        // "偏头痛" contains "头痛"
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn unknown_query_is_rejected() {
        let graph = seeded();
        let result = graph
            .execute_query("MATCH (n) RETURN n", Params::new())
            .await;
        assert!(result.is_err());
    }
}
