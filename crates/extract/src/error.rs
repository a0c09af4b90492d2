use thiserror::Error;

/// Structural problems in an extraction payload, detected on entry.
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("extraction result has an empty document id")]
    EmptyDocumentId,

    #[error("invalid span {start}..{end} on {field}")]
    InvalidSpan {
        field: String,
        start: usize,
        end: usize,
    },

    #[error("monetary value #{index} has a non-finite amount")]
    InvalidAmount { index: usize },

    #[error("clause #{index} has an empty type tag")]
    EmptyClauseType { index: usize },

    #[error("malformed extraction payload: {0}")]
    Json(#[from] serde_json::Error),
}
