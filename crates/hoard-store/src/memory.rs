use std::collections::BTreeMap;
use std::io::Read;
use std::sync::RwLock;

use chrono::Utc;
use hoard_types::{BlobRef, CancelToken, Hasher, SizedBlobRef};
use rand::RngCore;

use crate::error::{StoreError, StoreResult};
use crate::traits::{BlobIter, BlobStore, Generation, MAX_BLOB_SIZE};

/// In-memory blob store.
///
/// Blobs live in a `BTreeMap` keyed by ref, so enumeration order falls out
/// of the map order. Used by tests and as the staging store of composites.
pub struct MemoryStore {
    blobs: RwLock<BTreeMap<BlobRef, Vec<u8>>>,
    generation: Generation,
}

impl MemoryStore {
    pub fn new() -> Self {
        let mut randbuf = [0u8; 10];
        rand::thread_rng().fill_bytes(&mut randbuf);
        Self {
            blobs: RwLock::new(BTreeMap::new()),
            generation: Generation {
                init_time: Utc::now(),
                random: hex::encode(randbuf),
            },
        }
    }

    pub fn len(&self) -> usize {
        self.blobs.read().expect("lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.read().expect("lock poisoned").is_empty()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl BlobStore for MemoryStore {
    fn receive(&self, br: &BlobRef, source: &mut dyn Read) -> StoreResult<SizedBlobRef> {
        let mut buf = Vec::new();
        let mut limited = source.take(MAX_BLOB_SIZE + 1);
        limited.read_to_end(&mut buf)?;
        if buf.len() as u64 > MAX_BLOB_SIZE {
            return Err(StoreError::TooLarge { max: MAX_BLOB_SIZE });
        }
        let mut h = Hasher::new(br.algo());
        h.update(&buf);
        let actual = h.finish();
        if actual != *br {
            return Err(StoreError::Corrupt {
                claimed: br.clone(),
                actual,
            });
        }
        let size = buf.len() as u64;
        self.blobs
            .write()
            .expect("lock poisoned")
            .entry(br.clone())
            .or_insert(buf);
        Ok(br.clone().sized(size))
    }

    fn stat(&self, refs: &[BlobRef]) -> StoreResult<Vec<SizedBlobRef>> {
        let blobs = self.blobs.read().expect("lock poisoned");
        Ok(refs
            .iter()
            .filter_map(|br| {
                blobs
                    .get(br)
                    .map(|data| br.clone().sized(data.len() as u64))
            })
            .collect())
    }

    fn fetch(&self, br: &BlobRef) -> StoreResult<(Box<dyn Read + Send>, u64)> {
        let blobs = self.blobs.read().expect("lock poisoned");
        let data = blobs
            .get(br)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(br.clone()))?;
        let size = data.len() as u64;
        Ok((Box::new(std::io::Cursor::new(data)), size))
    }

    fn enumerate(&self, after: &str, cancel: CancelToken) -> StoreResult<BlobIter<'_>> {
        let blobs = self.blobs.read().expect("lock poisoned");
        let after = after.to_string();
        let snapshot: Vec<SizedBlobRef> = blobs
            .iter()
            .filter(|(br, _)| br.to_string() > after)
            .map(|(br, data)| br.clone().sized(data.len() as u64))
            .collect();
        Ok(Box::new(snapshot.into_iter().map(move |sb| {
            if cancel.is_canceled() {
                Err(StoreError::Canceled)
            } else {
                Ok(sb)
            }
        })))
    }

    fn remove(&self, refs: &[BlobRef]) -> StoreResult<()> {
        let mut blobs = self.blobs.write().expect("lock poisoned");
        for br in refs {
            blobs.remove(br);
        }
        Ok(())
    }

    fn can_remove(&self) -> bool {
        true
    }

    fn generation(&self) -> StoreResult<Generation> {
        Ok(self.generation.clone())
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("blob_count", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::{fetch_bytes, receive_bytes, stat_one};

    #[test]
    fn roundtrip() {
        let store = MemoryStore::new();
        let sb = receive_bytes(&store, b"hello").unwrap();
        assert_eq!(sb.size, 5);
        assert_eq!(fetch_bytes(&store, &sb.blob_ref).unwrap(), b"hello");
    }

    #[test]
    fn receive_rejects_digest_mismatch() {
        let store = MemoryStore::new();
        let wrong = BlobRef::sha1_of(b"other content");
        let err = store
            .receive(&wrong, &mut std::io::Cursor::new(b"actual content"))
            .unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { .. }));
        // Backend unchanged.
        assert!(store.is_empty());
        assert!(stat_one(&store, &wrong).unwrap().is_none());
    }

    #[test]
    fn receive_is_idempotent() {
        let store = MemoryStore::new();
        receive_bytes(&store, b"dup").unwrap();
        receive_bytes(&store, b"dup").unwrap();
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn stat_omits_missing() {
        let store = MemoryStore::new();
        let present = receive_bytes(&store, b"present").unwrap().blob_ref;
        let missing = BlobRef::sha1_of(b"missing");
        let got = store.stat(&[present.clone(), missing]).unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].blob_ref, present);
    }

    #[test]
    fn fetch_missing_is_not_found() {
        let store = MemoryStore::new();
        let err = match store.fetch(&BlobRef::sha1_of(b"nope")) {
            Ok(_) => panic!("expected error"),
            Err(e) => e,
        };
        assert!(err.is_not_found());
    }

    #[test]
    fn enumerate_sorted_with_after() {
        let store = MemoryStore::new();
        for content in [&b"a"[..], b"b", b"c"] {
            receive_bytes(&store, content).unwrap();
        }
        let all: Vec<SizedBlobRef> = store
            .enumerate("", CancelToken::new())
            .unwrap()
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(all.len(), 3);
        for w in all.windows(2) {
            assert!(w[0].blob_ref < w[1].blob_ref);
        }
        let after = all[0].blob_ref.to_string();
        let rest: Vec<SizedBlobRef> = store
            .enumerate(&after, CancelToken::new())
            .unwrap()
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(rest, all[1..].to_vec());
    }

    #[test]
    fn enumerate_observes_cancellation() {
        let store = MemoryStore::new();
        for i in 0..10u8 {
            receive_bytes(&store, &[i]).unwrap();
        }
        let cancel = CancelToken::new();
        let mut iter = store.enumerate("", cancel.clone()).unwrap();
        assert!(iter.next().unwrap().is_ok());
        cancel.cancel();
        assert!(matches!(iter.next(), Some(Err(StoreError::Canceled))));
    }

    #[test]
    fn remove_is_idempotent() {
        let store = MemoryStore::new();
        let br = receive_bytes(&store, b"gone").unwrap().blob_ref;
        store.remove(&[br.clone()]).unwrap();
        store.remove(&[br.clone()]).unwrap();
        assert!(stat_one(&store, &br).unwrap().is_none());
    }

    #[test]
    fn generation_is_stable() {
        let store = MemoryStore::new();
        let g1 = store.generation().unwrap();
        let g2 = store.generation().unwrap();
        assert_eq!(g1, g2);
        assert_eq!(g1.random.len(), 20);
    }
}
