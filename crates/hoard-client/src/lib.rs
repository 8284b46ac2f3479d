//! Client for hoard servers: stat-aware uploads behind a have-cache, file
//! chunking, claim signing, and sync-friendly fetches.

pub mod client;
pub mod error;
pub mod havecache;
pub mod uploader;

pub use client::{ClientAuth, HoardClient};
pub use error::{ClientError, ClientResult};
pub use havecache::HaveCache;
pub use uploader::{PutResult, UploadOutcome};
