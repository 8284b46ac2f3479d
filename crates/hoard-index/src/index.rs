use std::collections::HashMap;
use std::io::Read;
use std::sync::{Arc, Mutex, RwLock};

use hoard_kv::{find_prefix, Batch, SortedKv};
use hoard_store::{BlobIter, BlobStore, StoreError, StoreResult};
use hoard_types::{parse_claim_date, unreverse_time, BlobRef, CancelToken, SizedBlobRef};
use tracing::{info, warn};

use crate::corpus::Corpus;
use crate::deletes::{insert_deletion, DeletesCache, DeletionMap};
use crate::error::{IndexError, IndexResult};
use crate::keys;
use crate::receive::MutationMap;

/// Version of the index row schema. Bumped when row formats change; an
/// on-disk index with a different version must be reindexed.
pub const SCHEMA_VERSION: u32 = 4;

/// The indexer: owns the sorted KV store, the deletes cache, and an
/// optional corpus; computes row mutations for every received blob.
pub struct Index {
    kv: Arc<dyn SortedKv>,
    source: RwLock<Option<Arc<dyn BlobStore>>>,
    deletes: DeletesCache,
    corpus: RwLock<Option<Arc<Corpus>>>,
    /// missing blob -> file blobs whose indexing is waiting on it.
    missing: Mutex<HashMap<BlobRef, Vec<BlobRef>>>,
}

impl Index {
    /// Open an index over `kv`.
    ///
    /// An empty store is stamped with the current schema version; a store
    /// carrying a different version is refused (reindex needed). The
    /// deletes cache is rebuilt from the `deleted|` rows.
    pub fn open(kv: Arc<dyn SortedKv>) -> IndexResult<Self> {
        let idx = Self {
            kv,
            source: RwLock::new(None),
            deletes: DeletesCache::new(),
            corpus: RwLock::new(None),
            missing: Mutex::new(HashMap::new()),
        };
        match idx.schema_version()? {
            None => {
                idx.kv
                    .set(keys::SCHEMA_VERSION_KEY, &SCHEMA_VERSION.to_string())?;
            }
            Some(v) if v != SCHEMA_VERSION => {
                return Err(IndexError::SchemaVersion {
                    found: v,
                    required: SCHEMA_VERSION,
                });
            }
            Some(_) => {}
        }
        idx.rebuild_deletes_cache()?;
        Ok(idx)
    }

    pub(crate) fn kv(&self) -> &dyn SortedKv {
        self.kv.as_ref()
    }

    pub fn deletes(&self) -> &DeletesCache {
        &self.deletes
    }

    /// Wire up the blob source used for claim verification, file-tree
    /// reads, and reindexing.
    pub fn set_blob_source(&self, source: Arc<dyn BlobStore>) {
        *self.source.write().expect("lock poisoned") = Some(source);
    }

    pub fn blob_source(&self) -> Option<Arc<dyn BlobStore>> {
        self.source.read().expect("lock poisoned").clone()
    }

    /// Build the in-memory corpus from the KV store and keep it updated
    /// from here on.
    pub fn attach_corpus(&self) -> IndexResult<Arc<Corpus>> {
        let corpus = Arc::new(Corpus::build(self.kv.as_ref())?);
        *self.corpus.write().expect("lock poisoned") = Some(Arc::clone(&corpus));
        Ok(corpus)
    }

    pub fn corpus(&self) -> Option<Arc<Corpus>> {
        self.corpus.read().expect("lock poisoned").clone()
    }

    fn schema_version(&self) -> IndexResult<Option<u32>> {
        let Some(v) = self.kv.get(keys::SCHEMA_VERSION_KEY)? else {
            return Ok(None);
        };
        match v.parse() {
            Ok(n) => Ok(Some(n)),
            Err(_) => {
                warn!(value = %v, "bogus index schema version; treating as 0");
                Ok(Some(0))
            }
        }
    }

    /// Commit a mutation batch and apply its delete claims to the deletes
    /// cache. The cache's write lock is held across the KV commit so the
    /// two never diverge observably.
    pub(crate) fn commit(&self, mm: &MutationMap) -> IndexResult<()> {
        let mut guard = self.deletes.lock_for_commit();
        let mut batch = Batch::new();
        for (k, v) in mm.rows() {
            batch.set(k.clone(), v.clone());
        }
        self.kv.commit_batch(batch)?;
        for claim in mm.deletes() {
            let Some(target) = claim.target.clone() else {
                continue;
            };
            insert_deletion(&mut guard, target, claim.blob_ref.clone(), claim.date);
        }
        Ok(())
    }

    /// Rebuild the deletes cache from `deleted|` rows.
    pub(crate) fn rebuild_deletes_cache(&self) -> IndexResult<()> {
        let mut map = DeletionMap::new();
        for (key, _) in find_prefix(self.kv.as_ref(), "deleted|")? {
            let parts: Vec<&str> = key.split('|').collect();
            if parts.len() != 4 {
                warn!(key, "bogus deleted row");
                continue;
            }
            let (Some(target), Some(claim_ref)) =
                (BlobRef::parse_opt(parts[1]), BlobRef::parse_opt(parts[3]))
            else {
                warn!(key, "bogus refs in deleted row");
                continue;
            };
            let Ok(when) = parse_claim_date(&unreverse_time(parts[2])) else {
                warn!(key, "bogus date in deleted row");
                continue;
            };
            insert_deletion(&mut map, target, claim_ref, when);
        }
        self.deletes.replace(map);
        Ok(())
    }

    /// Record that `waiting_blob`'s indexing is blocked on `missing` refs.
    ///
    /// `available_now` re-checks a dependency after recording: the dep may
    /// have landed between the caller's failed lookup and the recording
    /// (reindex workers race), in which case its own post-commit retry ran
    /// too early and we retry here. The predicate must test the same
    /// condition whose failure led here, so a successful retry cannot
    /// re-record the same dependency.
    pub(crate) fn record_missing(
        &self,
        waiting_blob: &BlobRef,
        missing: Vec<BlobRef>,
        available_now: impl Fn(&BlobRef) -> bool,
    ) {
        if missing.is_empty() {
            return;
        }
        {
            let mut map = self.missing.lock().expect("lock poisoned");
            for m in &missing {
                info!(missing = %m, blob = %waiting_blob, "indexing blocked on missing blob");
                let waiters = map.entry(m.clone()).or_default();
                if !waiters.contains(waiting_blob) {
                    waiters.push(waiting_blob.clone());
                }
            }
        }
        for m in missing {
            if available_now(&m) {
                self.retry_waiters_on(&m);
            }
        }
    }

    /// Availability predicate for dependencies that must be fetchable from
    /// the blob source (file chunks, static sets).
    pub(crate) fn in_source(&self, br: &BlobRef) -> bool {
        self.blob_source()
            .and_then(|s| s.stat(std::slice::from_ref(br)).ok())
            .is_some_and(|found| !found.is_empty())
    }

    /// Availability predicate for dependencies that must already be
    /// indexed (delete-claim targets).
    pub(crate) fn in_index(&self, br: &BlobRef) -> bool {
        matches!(self.kv.get(&keys::meta(br)), Ok(Some(_)))
    }

    /// Refs whose absence is blocking file indexing.
    pub fn missing_blobs(&self) -> Vec<BlobRef> {
        self.missing
            .lock()
            .expect("lock poisoned")
            .keys()
            .cloned()
            .collect()
    }

    /// If `br` just arrived and something was waiting on it, re-index the
    /// waiters now that their dependency exists.
    pub(crate) fn retry_waiters_on(&self, br: &BlobRef) {
        let waiters = self
            .missing
            .lock()
            .expect("lock poisoned")
            .remove(br)
            .unwrap_or_default();
        for file_ref in waiters {
            info!(file = %file_ref, arrived = %br, "retrying file index after dependency arrived");
            if let Err(e) = self.reindex_one(&file_ref) {
                warn!(file = %file_ref, "dependency retry failed: {e}");
            }
        }
    }

    /// Fetch `br` from the blob source and run it through the pipeline
    /// again, bypassing the have-row fast path.
    pub(crate) fn reindex_one(&self, br: &BlobRef) -> IndexResult<()> {
        let source = self.blob_source().ok_or(IndexError::NoBlobSource)?;
        let (mut reader, _) = source.fetch(br)?;
        self.index_blob(br, &mut reader, true)?;
        Ok(())
    }
}

/// The index doubles as a `BlobStore` destination so a sync handler can
/// replicate into it: receives are indexed, stats answer from `have:`
/// rows. It stores no blob bytes, so fetch is always not-found.
impl BlobStore for Index {
    fn receive(&self, br: &BlobRef, source: &mut dyn Read) -> StoreResult<SizedBlobRef> {
        self.receive_blob(br, source)
            .map_err(|e| match e {
                IndexError::Store(se) => se,
                other => StoreError::Io(std::io::Error::other(other.to_string())),
            })
    }

    fn stat(&self, refs: &[BlobRef]) -> StoreResult<Vec<SizedBlobRef>> {
        let mut out = Vec::new();
        for br in refs {
            if let Some(size) = self
                .kv
                .get(&keys::have(br))
                .map_err(|e| StoreError::Io(std::io::Error::other(e.to_string())))?
            {
                if let Ok(size) = size.parse() {
                    out.push(br.clone().sized(size));
                }
            }
        }
        Ok(out)
    }

    fn fetch(&self, br: &BlobRef) -> StoreResult<(Box<dyn Read + Send>, u64)> {
        Err(StoreError::NotFound(br.clone()))
    }

    fn enumerate(&self, after: &str, cancel: CancelToken) -> StoreResult<BlobIter<'_>> {
        let rows = find_prefix(self.kv.as_ref(), "have:")
            .map_err(|e| StoreError::Io(std::io::Error::other(e.to_string())))?;
        let after = after.to_string();
        let mut refs: Vec<SizedBlobRef> = rows
            .filter_map(|(k, v)| {
                let br = BlobRef::parse_opt(k.strip_prefix("have:")?)?;
                let size: u64 = v.parse().ok()?;
                Some(br.sized(size))
            })
            .filter(|sb| sb.blob_ref.to_string() > after)
            .collect();
        refs.sort_by(|a, b| a.blob_ref.cmp(&b.blob_ref));
        Ok(Box::new(refs.into_iter().map(move |sb| {
            if cancel.is_canceled() {
                Err(StoreError::Canceled)
            } else {
                Ok(sb)
            }
        })))
    }
}
