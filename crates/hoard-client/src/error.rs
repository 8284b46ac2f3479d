use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("unexpected server response: {0}")]
    BadResponse(String),

    #[error("upload of {blob} failed after {attempts} attempts: {last_error}")]
    UploadFailed {
        blob: String,
        attempts: u32,
        last_error: String,
    },

    #[error(transparent)]
    Schema(#[from] hoard_schema::SchemaError),

    #[error(transparent)]
    Store(#[from] hoard_store::StoreError),

    #[error(transparent)]
    Kv(#[from] hoard_kv::KvError),

    #[error(transparent)]
    Type(#[from] hoard_types::TypeError),
}

pub type ClientResult<T> = Result<T, ClientError>;
