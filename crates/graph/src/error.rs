use extract::RelationType;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GraphError {
    /// An edge points at an entity the resolver never produced.
    #[error("{relation} edge {source_id} -> {target_id} references missing entity {missing}")]
    DataIntegrity {
        source_id: String,
        target_id: String,
        relation: RelationType,
        missing: String,
    },

    #[error("duplicate entity id {0}")]
    DuplicateEntity(String),

    #[error("self-loop {relation} on {entity_id}")]
    SelfLoop {
        entity_id: String,
        relation: RelationType,
    },
}
