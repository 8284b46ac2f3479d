use std::io::Read;
use std::sync::Arc;

use hoard_types::{BlobRef, CancelToken, SizedBlobRef};

use crate::enumerate::merged_enumerate;
use crate::error::{StoreError, StoreResult};
use crate::traits::{BlobIter, BlobStore, Generation, MAX_BLOB_SIZE};

/// Fan-out composite: every write goes to all replicas.
///
/// A receive succeeds only when every replica accepted the blob (quorum =
/// all). Reads try replicas in order; enumeration merges all of them.
pub struct ReplicaStore {
    replicas: Vec<Arc<dyn BlobStore>>,
}

impl ReplicaStore {
    /// `replicas` must be non-empty.
    pub fn new(replicas: Vec<Arc<dyn BlobStore>>) -> Self {
        assert!(!replicas.is_empty(), "replica store needs at least one child");
        Self { replicas }
    }
}

impl BlobStore for ReplicaStore {
    fn receive(&self, br: &BlobRef, source: &mut dyn Read) -> StoreResult<SizedBlobRef> {
        // The source is consumed once; buffer it so each replica gets a
        // fresh reader. Size is bounded by MAX_BLOB_SIZE anyway.
        let mut buf = Vec::new();
        source.take(MAX_BLOB_SIZE + 1).read_to_end(&mut buf)?;
        if buf.len() as u64 > MAX_BLOB_SIZE {
            return Err(StoreError::TooLarge { max: MAX_BLOB_SIZE });
        }
        let mut result = None;
        let mut failures = Vec::new();
        for replica in &self.replicas {
            match replica.receive(br, &mut std::io::Cursor::new(&buf)) {
                Ok(sb) => result = Some(sb),
                Err(e) => failures.push(e.to_string()),
            }
        }
        if !failures.is_empty() {
            return Err(StoreError::ReplicaWrite {
                failed: failures.len(),
                total: self.replicas.len(),
                first_error: failures.remove(0),
            });
        }
        Ok(result.expect("non-empty replicas"))
    }

    fn stat(&self, refs: &[BlobRef]) -> StoreResult<Vec<SizedBlobRef>> {
        let mut out: Vec<SizedBlobRef> = Vec::new();
        for replica in &self.replicas {
            for sb in replica.stat(refs)? {
                if !out.iter().any(|have| have.blob_ref == sb.blob_ref) {
                    out.push(sb);
                }
            }
        }
        Ok(out)
    }

    fn fetch(&self, br: &BlobRef) -> StoreResult<(Box<dyn Read + Send>, u64)> {
        let mut last = None;
        for replica in &self.replicas {
            match replica.fetch(br) {
                Ok(found) => return Ok(found),
                Err(e) => last = Some(e),
            }
        }
        Err(last.unwrap_or_else(|| StoreError::NotFound(br.clone())))
    }

    fn enumerate(&self, after: &str, cancel: CancelToken) -> StoreResult<BlobIter<'_>> {
        let mut iters = Vec::with_capacity(self.replicas.len());
        for replica in &self.replicas {
            iters.push(replica.enumerate(after, cancel.clone())?);
        }
        Ok(merged_enumerate(iters))
    }

    fn remove(&self, refs: &[BlobRef]) -> StoreResult<()> {
        if !self.can_remove() {
            return Err(StoreError::RemoveUnsupported);
        }
        for replica in &self.replicas {
            replica.remove(refs)?;
        }
        Ok(())
    }

    fn can_remove(&self) -> bool {
        self.replicas.iter().all(|r| r.can_remove())
    }

    fn generation(&self) -> StoreResult<Generation> {
        self.replicas[0].generation()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use crate::traits::{fetch_bytes, receive_bytes, stat_one};

    fn replica_of(n: usize) -> (ReplicaStore, Vec<Arc<MemoryStore>>) {
        let children: Vec<Arc<MemoryStore>> = (0..n).map(|_| Arc::new(MemoryStore::new())).collect();
        let store = ReplicaStore::new(
            children
                .iter()
                .map(|c| Arc::clone(c) as Arc<dyn BlobStore>)
                .collect(),
        );
        (store, children)
    }

    #[test]
    fn write_fans_out_to_all() {
        let (store, children) = replica_of(3);
        let sb = receive_bytes(&store, b"replicated").unwrap();
        for child in &children {
            assert!(stat_one(child.as_ref(), &sb.blob_ref).unwrap().is_some());
        }
    }

    #[test]
    fn fetch_reads_from_any_child() {
        let (store, children) = replica_of(2);
        // Blob present only in the second child.
        let sb = receive_bytes(children[1].as_ref(), b"only in b").unwrap();
        assert_eq!(fetch_bytes(&store, &sb.blob_ref).unwrap(), b"only in b");
    }

    #[test]
    fn enumerate_merges_and_dedups() {
        let (store, children) = replica_of(2);
        receive_bytes(&store, b"both").unwrap();
        receive_bytes(children[0].as_ref(), b"left only").unwrap();
        receive_bytes(children[1].as_ref(), b"right only").unwrap();
        let refs: Vec<String> = store
            .enumerate("", CancelToken::new())
            .unwrap()
            .map(|r| r.unwrap().blob_ref.to_string())
            .collect();
        assert_eq!(refs.len(), 3);
        let mut sorted = refs.clone();
        sorted.sort();
        assert_eq!(refs, sorted);
    }

    #[test]
    fn corrupt_receive_fails_everywhere() {
        let (store, children) = replica_of(2);
        let wrong = BlobRef::sha1_of(b"claimed");
        let err = store
            .receive(&wrong, &mut std::io::Cursor::new(b"real"))
            .unwrap_err();
        assert!(matches!(err, StoreError::ReplicaWrite { failed: 2, .. }));
        for child in children {
            assert!(child.is_empty());
        }
    }
}
