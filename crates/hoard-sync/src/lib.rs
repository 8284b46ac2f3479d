//! Replication of blobs from a source store to a destination, in BlobRef
//! order, resumable from a persisted checkpoint.

pub mod error;
pub mod handler;

pub use error::{SyncError, SyncResult};
pub use handler::{SyncHandler, SyncReport};
