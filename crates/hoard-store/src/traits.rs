use std::io::Read;

use chrono::{DateTime, Utc};
use hoard_types::{BlobRef, CancelToken, SizedBlobRef};

use crate::error::{StoreError, StoreResult};

/// The largest blob any backend accepts. Schema blobs are built to stay
/// well under this; the HTTP layer rejects larger uploads before they
/// reach a backend.
pub const MAX_BLOB_SIZE: u64 = 16 << 20;

/// A backend's storage generation: its initialization time plus a random
/// id, stable across restarts and reset on wipe. Clients mix it into their
/// have-cache keys.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Generation {
    pub init_time: DateTime<Utc>,
    pub random: String,
}

/// Sorted stream of blob refs from an enumeration. Yields in ascending
/// BlobRef order; ends with `Err(StoreError::Canceled)` if the token fires
/// mid-stream.
pub type BlobIter<'a> = Box<dyn Iterator<Item = StoreResult<SizedBlobRef>> + Send + 'a>;

/// A blob storage backend.
///
/// Contract, for every implementation:
/// - `receive` hashes the stream and refuses (leaving the backend
///   unchanged) if the digest does not match `br`. Visibility is atomic:
///   no half-written blob is observable via `stat` or `fetch`.
/// - `stat` omits missing refs; output order is unspecified.
/// - `enumerate` yields refs strictly greater than `after` (compared as
///   formatted strings) in ascending order, no duplicates.
/// - `remove` is idempotent; removing a missing blob is not an error.
///   Backends that cannot remove report it via `can_remove`.
pub trait BlobStore: Send + Sync {
    fn receive(&self, br: &BlobRef, source: &mut dyn Read) -> StoreResult<SizedBlobRef>;

    fn stat(&self, refs: &[BlobRef]) -> StoreResult<Vec<SizedBlobRef>>;

    /// Open the blob for reading. Returns the reader and the blob size.
    fn fetch(&self, br: &BlobRef) -> StoreResult<(Box<dyn Read + Send>, u64)>;

    fn enumerate(&self, after: &str, cancel: CancelToken) -> StoreResult<BlobIter<'_>>;

    fn remove(&self, refs: &[BlobRef]) -> StoreResult<()> {
        let _ = refs;
        Err(StoreError::RemoveUnsupported)
    }

    fn can_remove(&self) -> bool {
        false
    }

    fn generation(&self) -> StoreResult<Generation> {
        Err(StoreError::GenerationUnsupported)
    }
}

/// Receive `data` under its own sha1 ref. Test and client convenience.
pub fn receive_bytes(store: &dyn BlobStore, data: &[u8]) -> StoreResult<SizedBlobRef> {
    let br = BlobRef::sha1_of(data);
    store.receive(&br, &mut std::io::Cursor::new(data))
}

/// Fetch a blob fully into memory.
pub fn fetch_bytes(store: &dyn BlobStore, br: &BlobRef) -> StoreResult<Vec<u8>> {
    let (mut reader, size) = store.fetch(br)?;
    let mut buf = Vec::with_capacity(size as usize);
    reader.read_to_end(&mut buf)?;
    Ok(buf)
}

/// Stat a single ref.
pub fn stat_one(store: &dyn BlobStore, br: &BlobRef) -> StoreResult<Option<SizedBlobRef>> {
    let got = store.stat(std::slice::from_ref(br))?;
    Ok(got.into_iter().find(|sb| &sb.blob_ref == br))
}
