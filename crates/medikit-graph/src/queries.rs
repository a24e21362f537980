//! Cypher query templates over the medical schema.
//!
//! All templates are parameterized; entity names are never spliced into the
//! query text.

/// Disease node by exact name.
pub const FIND_DISEASE_BY_NAME: &str = "MATCH (d:Disease {name: $name}) RETURN d";

/// Symptoms of a disease.
pub const FIND_DISEASE_SYMPTOMS: &str = "\
MATCH (d:Disease {name: $disease_name})-[:HAS_SYMPTOM]->(s:Symptom)
RETURN s.name as symptom, s.severity as severity";

/// Drugs that treat a disease.
pub const FIND_DISEASE_DRUGS: &str = "\
MATCH (d:Disease {name: $disease_name})-[:TREATED_BY]->(dr:Drug)
RETURN dr.name as drug, dr.generic_name as generic_name, dr.dosage_form as dosage_form";

/// Examinations a disease requires.
pub const FIND_DISEASE_EXAMINATIONS: &str = "\
MATCH (d:Disease {name: $disease_name})-[:REQUIRES_EXAM]->(e:Examination)
RETURN e.name as examination, e.type as type, e.reference_range as reference_range";

/// Diseases presenting a symptom.
pub const FIND_DISEASES_BY_SYMPTOM: &str = "\
MATCH (d:Disease)-[:HAS_SYMPTOM]->(s:Symptom {name: $symptom_name})
RETURN d.name as disease, d.icd10 as icd10
LIMIT 10";

/// Diseases matching at least half of a symptom set.
///
/// The `INTERACTS_WITH` and `ACCOMPANIES` relations are symmetric, so
/// direction-sensitive templates below always anchor the pattern on the
/// named node.
pub const FIND_DISEASES_BY_SYMPTOMS: &str = "\
MATCH (d:Disease)-[:HAS_SYMPTOM]->(s:Symptom)
WHERE s.name IN $symptom_names
WITH d, count(s) as symptom_count
WHERE symptom_count >= $min_matches
RETURN d.name as disease, d.icd10 as icd10, symptom_count
ORDER BY symptom_count DESC
LIMIT 10";

/// Interaction partners of a drug.
pub const FIND_DRUG_INTERACTIONS: &str = "\
MATCH (d1:Drug {name: $drug_name})-[r:INTERACTS_WITH]-(d2:Drug)
RETURN d2.name as interacting_drug, r.interaction_type as type,
       r.severity as severity, r.description as description
LIMIT 10";

/// Diseases a drug treats (collected).
pub const FIND_DRUG_DISEASES: &str = "\
MATCH (dr:Drug {name: $drug_name})
OPTIONAL MATCH (d:Disease)-[:TREATED_BY]->(dr)
RETURN dr.name as drug, collect(d.name) as diseases";

/// Diseases a drug is contraindicated for.
pub const FIND_DRUG_CONTRAINDICATIONS: &str = "\
MATCH (dr:Drug {name: $drug_name})-[:CONTRAINDICATED_FOR]->(d:Disease)
RETURN d.name as disease, d.icd10 as icd10";

/// Diseases requiring an examination (collected).
pub const FIND_EXAMINATION_DISEASES: &str = "\
MATCH (e:Examination {name: $exam_name})
OPTIONAL MATCH (d:Disease)-[:REQUIRES_EXAM]->(e)
RETURN e.name as examination, collect(d.name) as diseases";

/// Existence probes used by entity validation, one per node label.
pub const VALIDATE_DISEASE: &str =
    "MATCH (d:Disease) WHERE d.name CONTAINS $name RETURN d.name LIMIT 1";
pub const VALIDATE_SYMPTOM: &str =
    "MATCH (s:Symptom) WHERE s.name CONTAINS $name RETURN s.name LIMIT 1";
pub const VALIDATE_DRUG: &str =
    "MATCH (d:Drug) WHERE d.name CONTAINS $name RETURN d.name LIMIT 1";
pub const VALIDATE_EXAMINATION: &str =
    "MATCH (e:Examination) WHERE e.name CONTAINS $name RETURN e.name LIMIT 1";
pub const VALIDATE_DEPARTMENT: &str =
    "MATCH (d:Department) WHERE d.name CONTAINS $name RETURN d.name LIMIT 1";

/// Index bootstrap statements run once at initialization.
pub const CREATE_INDEXES: [&str; 5] = [
    "CREATE INDEX IF NOT EXISTS FOR (d:Disease) ON (d.name)",
    "CREATE INDEX IF NOT EXISTS FOR (d:Disease) ON (d.icd10)",
    "CREATE INDEX IF NOT EXISTS FOR (s:Symptom) ON (s.name)",
    "CREATE INDEX IF NOT EXISTS FOR (dr:Drug) ON (dr.name)",
    "CREATE INDEX IF NOT EXISTS FOR (e:Examination) ON (e.name)",
];

/// MERGE an entity node keyed by name. `{label}` is substituted by the
/// builder from the closed label set, never from user input.
pub fn merge_entity(label: &str) -> String {
    format!("MERGE (e:{label} {{name: $name}}) SET e += $props RETURN e")
}

/// MERGE a relation between two named nodes. Idempotent on the
/// (subject, predicate, object) triple.
pub fn merge_relation(from_label: &str, rel_type: &str, to_label: &str) -> String {
    format!(
        "MATCH (a:{from_label} {{name: $from_name}})\n\
         MATCH (b:{to_label} {{name: $to_name}})\n\
         MERGE (a)-[r:{rel_type}]->(b)\n\
         SET r += $props\n\
         RETURN r"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_relation_uses_merge_not_create() {
        let query = merge_relation("Disease", "HAS_SYMPTOM", "Symptom");
        assert!(query.contains("MERGE (a)-[r:HAS_SYMPTOM]->(b)"));
        assert!(!query.contains("CREATE"));
    }

    #[test]
    fn validation_probes_are_limited() {
        for probe in [
            VALIDATE_DISEASE,
            VALIDATE_SYMPTOM,
            VALIDATE_DRUG,
            VALIDATE_EXAMINATION,
            VALIDATE_DEPARTMENT,
        ] {
            assert!(probe.contains("CONTAINS $name"));
            assert!(probe.ends_with("LIMIT 1"));
        }
    }
}
