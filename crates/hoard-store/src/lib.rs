//! Blob storage backends.
//!
//! [`BlobStore`] is the backend contract: digest-verified receive, stat,
//! fetch, sorted enumeration, remove, and an optional storage generation.
//! Backends here: [`MemoryStore`], [`LocalDiskStore`], and the
//! [`ReplicaStore`]/[`ShardStore`] composites. [`merged_enumerate`]
//! interleaves several sorted sources into one deduplicated stream.

pub mod enumerate;
pub mod error;
pub mod localdisk;
pub mod memory;
pub mod replica;
pub mod shard;
pub mod tee;
pub mod traits;

pub use enumerate::{enumerate_all, merged_enumerate};
pub use error::{StoreError, StoreResult};
pub use localdisk::LocalDiskStore;
pub use memory::MemoryStore;
pub use replica::ReplicaStore;
pub use shard::ShardStore;
pub use tee::{Spool, TeeWriter};
pub use traits::{
    fetch_bytes, receive_bytes, stat_one, BlobIter, BlobStore, Generation, MAX_BLOB_SIZE,
};
