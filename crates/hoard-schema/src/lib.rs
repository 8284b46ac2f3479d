//! Schema blobs: the JSON envelopes that give structure to the blob soup.
//!
//! A schema blob is a JSON object whose first bytes are the magic prefix
//! `{"camliVersion":` and whose `camliType` discriminator is one of the
//! recognized kinds. Claims are signed schema blobs; files are trees of
//! content-defined chunks.

pub mod build;
pub mod envelope;
pub mod error;
pub mod filereader;
pub mod filewriter;
pub mod rollsum;
pub mod sign;

pub use build::Builder;
pub use envelope::{
    CamliType, Claim, ClaimType, Part, PartRef, SchemaBlob, MAGIC_PREFIX,
};
pub use error::{SchemaError, SchemaResult};
pub use filereader::FileReader;
pub use filewriter::{write_file, write_file_bytes, FANOUT_THRESHOLD, MAX_CHUNK, MIN_CHUNK};
pub use sign::{Fetcher, Signer, StoreFetcher, VerifiedSignature};
