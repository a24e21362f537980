//! Medical knowledge-graph schema: node labels, relation types, and the
//! properties each carries.

use medikit_core::{EntityType, RelationType};

/// Properties a node label carries.
pub fn entity_properties(entity_type: EntityType) -> &'static [&'static str] {
    match entity_type {
        EntityType::Disease => &["name", "icd10", "description", "etiology", "pathophysiology"],
        EntityType::Symptom => &["name", "severity", "description"],
        EntityType::Drug => &[
            "name",
            "generic_name",
            "dosage_form",
            "indication",
            "contraindication",
        ],
        EntityType::Examination => &["name", "type", "reference_range", "description"],
        EntityType::Department => &["name", "description", "scope"],
    }
}

/// Endpoint labels of a relation type.
pub fn relation_endpoints(relation: RelationType) -> (EntityType, EntityType) {
    match relation {
        RelationType::HasSymptom => (EntityType::Disease, EntityType::Symptom),
        RelationType::TreatedBy => (EntityType::Disease, EntityType::Drug),
        RelationType::RequiresExam => (EntityType::Disease, EntityType::Examination),
        RelationType::BelongsTo => (EntityType::Symptom, EntityType::Department),
        RelationType::InteractsWith => (EntityType::Drug, EntityType::Drug),
        RelationType::ContraindicatedFor => (EntityType::Drug, EntityType::Disease),
        RelationType::Accompanies => (EntityType::Disease, EntityType::Disease),
    }
}

/// Properties a relation type carries.
pub fn relation_properties(relation: RelationType) -> &'static [&'static str] {
    match relation {
        RelationType::HasSymptom => &["frequency", "severity"],
        RelationType::TreatedBy => &["effectiveness", "dosage", "duration"],
        RelationType::RequiresExam => &["necessity", "priority"],
        RelationType::BelongsTo => &[],
        RelationType::InteractsWith => &["interaction_type", "severity", "description"],
        RelationType::ContraindicatedFor => &["reason", "severity"],
        RelationType::Accompanies => &["frequency"],
    }
}

/// Whether a relation connects a label to itself. Such relations are
/// traversed undirected and queries must fix direction in the pattern.
pub fn is_symmetric(relation: RelationType) -> bool {
    let (from, to) = relation_endpoints(relation);
    from == to
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symmetric_relations_are_the_cyclic_ones() {
        assert!(is_symmetric(RelationType::InteractsWith));
        assert!(is_symmetric(RelationType::Accompanies));
        assert!(!is_symmetric(RelationType::HasSymptom));
        assert!(!is_symmetric(RelationType::ContraindicatedFor));
    }

    #[test]
    fn endpoints_cover_schema() {
        assert_eq!(
            relation_endpoints(RelationType::BelongsTo),
            (EntityType::Symptom, EntityType::Department)
        );
        assert_eq!(
            relation_endpoints(RelationType::ContraindicatedFor),
            (EntityType::Drug, EntityType::Disease)
        );
    }
}
