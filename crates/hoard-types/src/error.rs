use thiserror::Error;

/// Errors from parsing or constructing core types.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("unknown digest algorithm: {0}")]
    UnknownAlgorithm(String),

    #[error("malformed blob ref: {0}")]
    MalformedRef(String),

    #[error("invalid hex digest: {0}")]
    InvalidHex(String),

    #[error("digest length mismatch: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("invalid claim date: {0}")]
    InvalidDate(String),
}
