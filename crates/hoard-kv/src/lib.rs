//! Sorted key/value storage used by the index.
//!
//! The [`SortedKv`] trait is the contract: an ordered map of string keys to
//! string values with range scans and atomic batches. [`MemoryKv`] backs
//! tests and ephemeral indexes; [`FileKv`] persists a snapshot container to
//! disk on every commit.

pub mod error;
pub mod file;
pub mod memory;
pub mod traits;

pub use error::{KvError, KvResult};
pub use file::FileKv;
pub use memory::MemoryKv;
pub use traits::{find_prefix, prefix_end, Batch, BatchOp, SortedKv};
