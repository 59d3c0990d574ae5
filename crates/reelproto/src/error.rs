use thiserror::Error;

/// A payload or identifier that does not follow the wire format.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("empty payload")]
    Empty,

    #[error("unknown topic: {0}")]
    UnknownTopic(String),

    #[error("expected {expected} fields, got {got}")]
    FieldCount { expected: usize, got: usize },

    #[error("invalid {field}: {value:?}")]
    InvalidField { field: &'static str, value: String },

    #[error("invalid identifier {0:?}: must be non-empty without ':', ',' or whitespace")]
    InvalidIdentifier(String),
}
