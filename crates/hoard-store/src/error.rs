use hoard_types::BlobRef;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    /// The received bytes do not hash to the claimed ref. The blob was not
    /// persisted.
    #[error("corrupt blob: claimed {claimed}, got {actual}")]
    Corrupt { claimed: BlobRef, actual: BlobRef },

    #[error("blob not found: {0}")]
    NotFound(BlobRef),

    #[error("blob exceeds max size of {max} bytes")]
    TooLarge { max: u64 },

    #[error("operation canceled")]
    Canceled,

    #[error("backend does not support storage generations")]
    GenerationUnsupported,

    #[error("backend does not support blob removal")]
    RemoveUnsupported,

    #[error("replica write failed on {failed} of {total} replicas: {first_error}")]
    ReplicaWrite {
        failed: usize,
        total: usize,
        first_error: String,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
