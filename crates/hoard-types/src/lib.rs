//! Core types shared across the hoard workspace.
//!
//! The central type is [`BlobRef`]: a digest-algorithm name plus the
//! lowercase hex digest of a blob's bytes. Everything else in the system —
//! storage, indexing, claims, sync — keys off this identifier.

pub mod blobref;
pub mod cancel;
pub mod error;
pub mod time;

pub use blobref::{BlobRef, HashAlgo, Hasher, SizedBlobRef};
pub use cancel::CancelToken;
pub use error::TypeError;
pub use time::{format_claim_date, parse_claim_date, reverse_time, unreverse_time};
