use std::io::Read;
use std::sync::Arc;

use hoard_types::{BlobRef, CancelToken, SizedBlobRef};

use crate::enumerate::merged_enumerate;
use crate::error::{StoreError, StoreResult};
use crate::traits::{BlobIter, BlobStore, Generation};

/// Sharding composite: each blob lives in exactly one child, chosen by a
/// stable function of its digest.
pub struct ShardStore {
    shards: Vec<Arc<dyn BlobStore>>,
}

impl ShardStore {
    /// `shards` must be non-empty.
    pub fn new(shards: Vec<Arc<dyn BlobStore>>) -> Self {
        assert!(!shards.is_empty(), "shard store needs at least one child");
        Self { shards }
    }

    fn shard_for(&self, br: &BlobRef) -> &Arc<dyn BlobStore> {
        let idx = br.digest()[0] as usize % self.shards.len();
        &self.shards[idx]
    }
}

impl BlobStore for ShardStore {
    fn receive(&self, br: &BlobRef, source: &mut dyn Read) -> StoreResult<SizedBlobRef> {
        self.shard_for(br).receive(br, source)
    }

    fn stat(&self, refs: &[BlobRef]) -> StoreResult<Vec<SizedBlobRef>> {
        let mut out = Vec::new();
        for br in refs {
            out.extend(self.shard_for(br).stat(std::slice::from_ref(br))?);
        }
        Ok(out)
    }

    fn fetch(&self, br: &BlobRef) -> StoreResult<(Box<dyn Read + Send>, u64)> {
        self.shard_for(br).fetch(br)
    }

    fn enumerate(&self, after: &str, cancel: CancelToken) -> StoreResult<BlobIter<'_>> {
        let mut iters = Vec::with_capacity(self.shards.len());
        for shard in &self.shards {
            iters.push(shard.enumerate(after, cancel.clone())?);
        }
        Ok(merged_enumerate(iters))
    }

    fn remove(&self, refs: &[BlobRef]) -> StoreResult<()> {
        if !self.can_remove() {
            return Err(StoreError::RemoveUnsupported);
        }
        for br in refs {
            self.shard_for(br).remove(std::slice::from_ref(br))?;
        }
        Ok(())
    }

    fn can_remove(&self) -> bool {
        self.shards.iter().all(|s| s.can_remove())
    }

    fn generation(&self) -> StoreResult<Generation> {
        self.shards[0].generation()
    }
}
