use hoard_types::BlobRef;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("sync canceled")]
    Canceled,

    #[error("copy of {blob} failed after {attempts} attempts: {last_error}")]
    CopyFailed {
        blob: BlobRef,
        attempts: u32,
        last_error: String,
    },

    #[error(transparent)]
    Store(#[from] hoard_store::StoreError),

    #[error(transparent)]
    Kv(#[from] hoard_kv::KvError),
}

pub type SyncResult<T> = Result<T, SyncError>;
