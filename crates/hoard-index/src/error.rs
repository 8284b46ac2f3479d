use hoard_types::BlobRef;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("index schema version is {found}, want {required}; reindex needed")]
    SchemaVersion { found: u32, required: u32 },

    #[error("index has no blob source configured")]
    NoBlobSource,

    #[error("blob not indexed: {0}")]
    NotFound(BlobRef),

    #[error(transparent)]
    Kv(#[from] hoard_kv::KvError),

    #[error(transparent)]
    Store(#[from] hoard_store::StoreError),

    #[error(transparent)]
    Schema(#[from] hoard_schema::SchemaError),

    #[error(transparent)]
    Type(#[from] hoard_types::TypeError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("reindex failed: {failed} blobs could not be indexed")]
    ReindexIncomplete { failed: usize },
}

pub type IndexResult<T> = Result<T, IndexError>;
