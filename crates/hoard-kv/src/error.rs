use thiserror::Error;

#[derive(Debug, Error)]
pub enum KvError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt kv snapshot: {0}")]
    Corrupt(String),

    #[error("kv backend does not support wipe")]
    WipeUnsupported,
}

pub type KvResult<T> = Result<T, KvError>;
