use std::io::Read;

use chrono::{DateTime, Utc};
use hoard_store::BlobStore;
use hoard_types::BlobRef;

use crate::build;
use crate::envelope::{Part, PartRef};
use crate::error::SchemaResult;
use crate::rollsum::RollSum;

/// Chunk size bounds for the content-defined splitter.
pub const MIN_CHUNK: usize = 64 << 10;
pub const MAX_CHUNK: usize = 1 << 20;

/// A schema blob lists at most this many parts; beyond it, chunks are
/// grouped under intermediate `bytes` blobs so no schema blob approaches
/// the max blob size.
pub const FANOUT_THRESHOLD: usize = 255;

// Mean chunk size 2^18 = 256 KiB, between the bounds above.
const SPLIT_BITS: u32 = 18;

/// Chunk `source`, upload every chunk plus the schema tree, and return the
/// root `file` blob's ref.
pub fn write_file(
    store: &dyn BlobStore,
    name: &str,
    mod_time: Option<DateTime<Utc>>,
    source: &mut dyn Read,
) -> SchemaResult<BlobRef> {
    let parts = upload_chunks(store, source)?;
    let parts = fold_parts(store, parts)?;
    let json = build::file(name, mod_time, &parts).build();
    let sb = hoard_store::receive_bytes(store, json.as_bytes())?;
    Ok(sb.blob_ref)
}

/// [`write_file`] over an in-memory buffer.
pub fn write_file_bytes(store: &dyn BlobStore, name: &str, data: &[u8]) -> SchemaResult<BlobRef> {
    write_file(store, name, None, &mut std::io::Cursor::new(data))
}

fn upload_chunks(store: &dyn BlobStore, source: &mut dyn Read) -> SchemaResult<Vec<Part>> {
    let mut parts = Vec::new();
    let mut chunk: Vec<u8> = Vec::with_capacity(MAX_CHUNK);
    let mut rs = RollSum::new();
    let mut buf = [0u8; 32 << 10];
    loop {
        let n = source.read(&mut buf)?;
        if n == 0 {
            break;
        }
        for &b in &buf[..n] {
            chunk.push(b);
            rs.roll(b);
            if chunk.len() >= MAX_CHUNK || (chunk.len() >= MIN_CHUNK && rs.on_split(SPLIT_BITS)) {
                parts.push(upload_chunk(store, &chunk)?);
                chunk.clear();
            }
        }
    }
    if !chunk.is_empty() || parts.is_empty() {
        parts.push(upload_chunk(store, &chunk)?);
    }
    Ok(parts)
}

fn upload_chunk(store: &dyn BlobStore, chunk: &[u8]) -> SchemaResult<Part> {
    let sb = hoard_store::receive_bytes(store, chunk)?;
    Ok(Part {
        size: sb.size,
        part_ref: PartRef::Blob(sb.blob_ref),
    })
}

/// Group `parts` under intermediate `bytes` blobs until the list fits one
/// schema blob.
pub(crate) fn fold_parts(store: &dyn BlobStore, mut parts: Vec<Part>) -> SchemaResult<Vec<Part>> {
    while parts.len() > FANOUT_THRESHOLD {
        let mut grouped = Vec::with_capacity(parts.len() / FANOUT_THRESHOLD + 1);
        for group in parts.chunks(FANOUT_THRESHOLD) {
            let json = build::bytes(group).build();
            let sb = hoard_store::receive_bytes(store, json.as_bytes())?;
            grouped.push(Part {
                size: group.iter().map(|p| p.size).sum(),
                part_ref: PartRef::Bytes(sb.blob_ref),
            });
        }
        parts = grouped;
    }
    Ok(parts)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::envelope::{CamliType, SchemaBlob};
    use hoard_store::{fetch_bytes, MemoryStore};

    pub(crate) fn pseudo_random(len: usize) -> Vec<u8> {
        let mut state: u64 = 0x2545F4914F6CDD1D;
        (0..len)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 7;
                state ^= state << 17;
                state as u8
            })
            .collect()
    }

    #[test]
    fn empty_file_still_has_one_part() {
        let store = MemoryStore::new();
        let root = write_file_bytes(&store, "empty", b"").unwrap();
        let sb = SchemaBlob::parse(&root, &fetch_bytes(&store, &root).unwrap()).unwrap();
        assert_eq!(sb.camli_type(), CamliType::File);
        assert_eq!(sb.parts().unwrap().len(), 1);
        assert_eq!(sb.parts_size().unwrap(), 0);
    }

    #[test]
    fn large_file_splits_into_bounded_chunks() {
        let store = MemoryStore::new();
        let data = pseudo_random(3 << 20);
        let root = write_file_bytes(&store, "big.bin", &data).unwrap();
        let sb = SchemaBlob::parse(&root, &fetch_bytes(&store, &root).unwrap()).unwrap();
        let parts = sb.parts().unwrap();
        assert!(parts.len() >= 3, "3 MiB should split into several chunks");
        assert_eq!(sb.parts_size().unwrap(), data.len() as u64);
        for p in &parts {
            assert!(p.size as usize <= MAX_CHUNK);
        }
        // All but the final chunk honor the minimum.
        for p in &parts[..parts.len() - 1] {
            assert!(p.size as usize >= MIN_CHUNK);
        }
    }

    #[test]
    fn identical_content_dedups_chunks() {
        let store = MemoryStore::new();
        let data = pseudo_random(1 << 20);
        let before = store.len();
        write_file_bytes(&store, "a.bin", &data).unwrap();
        let after_first = store.len();
        write_file_bytes(&store, "b.bin", &data).unwrap();
        // Second upload adds only the root (different fileName), no chunks.
        assert_eq!(store.len(), after_first + 1);
        assert!(after_first > before);
    }

    #[test]
    fn fold_groups_excess_parts() {
        let store = MemoryStore::new();
        let parts: Vec<Part> = (0..600u32)
            .map(|i| Part {
                size: 1,
                part_ref: PartRef::Blob(hoard_types::BlobRef::sha1_of(&i.to_be_bytes())),
            })
            .collect();
        let folded = fold_parts(&store, parts).unwrap();
        assert!(folded.len() <= FANOUT_THRESHOLD);
        assert_eq!(folded.iter().map(|p| p.size).sum::<u64>(), 600);
        assert!(matches!(folded[0].part_ref, PartRef::Bytes(_)));
    }
}
