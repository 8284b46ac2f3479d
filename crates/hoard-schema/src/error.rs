use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("not a schema blob")]
    NotSchema,

    #[error("unrecognized camliType: {0}")]
    UnknownType(String),

    #[error("schema blob missing field: {0}")]
    MissingField(&'static str),

    #[error("schema blob field {field} is malformed: {reason}")]
    BadField { field: &'static str, reason: String },

    #[error("malformed JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("signature missing from blob")]
    NoSignature,

    #[error("signature verification failed: {0}")]
    BadSignature(String),

    #[error("signer public key blob is malformed")]
    BadKeyBlob,

    #[error(transparent)]
    Type(#[from] hoard_types::TypeError),

    #[error(transparent)]
    Store(#[from] hoard_store::StoreError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type SchemaResult<T> = Result<T, SchemaError>;
