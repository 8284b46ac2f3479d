use std::sync::Arc;
use std::time::Duration;

use hoard_kv::SortedKv;
use hoard_store::{BlobStore, StoreError};
use hoard_types::{BlobRef, CancelToken, SizedBlobRef};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{SyncError, SyncResult};

/// Blobs statted per round trip to the destination.
const STAT_BATCH: usize = 256;

/// Retry ceiling for a single blob copy.
const MAX_ATTEMPTS: u32 = 4;

/// Backoff cap between copy retries.
const MAX_BACKOFF: Duration = Duration::from_secs(300);

/// Outcome of one sync pass.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub blobs_copied: u64,
    pub bytes_copied: u64,
    pub already_present: u64,
}

/// Replicates blobs from `source` to `dest`.
///
/// Enumeration starts at the persisted checkpoint; each batch is statted
/// against the destination, missing blobs are copied with bounded
/// exponential-backoff retries, and the checkpoint advances only past
/// fully copied prefixes.
pub struct SyncHandler {
    name: String,
    source: Arc<dyn BlobStore>,
    dest: Arc<dyn BlobStore>,
    checkpoint: Arc<dyn SortedKv>,
    initial_backoff: Duration,
}

impl SyncHandler {
    pub fn new(
        name: impl Into<String>,
        source: Arc<dyn BlobStore>,
        dest: Arc<dyn BlobStore>,
        checkpoint: Arc<dyn SortedKv>,
    ) -> Self {
        Self {
            name: name.into(),
            source,
            dest,
            checkpoint,
            initial_backoff: Duration::from_secs(1),
        }
    }

    /// Shorten the retry backoff; for tests.
    pub fn with_initial_backoff(mut self, d: Duration) -> Self {
        self.initial_backoff = d;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn checkpoint_key(&self) -> String {
        format!("synccheckpoint|{}", self.name)
    }

    pub fn checkpoint(&self) -> SyncResult<Option<String>> {
        Ok(self.checkpoint.get(&self.checkpoint_key())?)
    }

    fn set_checkpoint(&self, last: &str) -> SyncResult<()> {
        self.checkpoint.set(&self.checkpoint_key(), last)?;
        Ok(())
    }

    /// One full pass over the source from the checkpoint. After a clean
    /// return, everything the source contained at enumeration start is
    /// present in the destination.
    pub fn run_once(&self, cancel: &CancelToken) -> SyncResult<SyncReport> {
        let after = self.checkpoint()?.unwrap_or_default();
        debug!(sync = %self.name, %after, "starting sync pass");

        let mut report = SyncReport::default();
        let mut batch: Vec<SizedBlobRef> = Vec::with_capacity(STAT_BATCH);
        let mut iter = self.source.enumerate(&after, cancel.clone())?;
        loop {
            let next = iter.next();
            if let Some(item) = &next {
                if let Ok(sb) = item {
                    batch.push(sb.clone());
                    if batch.len() < STAT_BATCH {
                        continue;
                    }
                }
            }
            if !batch.is_empty() {
                self.copy_batch(&batch, cancel, &mut report)?;
                self.set_checkpoint(&batch.last().expect("non-empty").blob_ref.to_string())?;
                batch.clear();
            }
            match next {
                None => break,
                Some(Ok(_)) => {}
                Some(Err(StoreError::Canceled)) => return Err(SyncError::Canceled),
                Some(Err(e)) => return Err(e.into()),
            }
        }
        info!(
            sync = %self.name,
            copied = report.blobs_copied,
            bytes = report.bytes_copied,
            skipped = report.already_present,
            "sync pass complete"
        );
        Ok(report)
    }

    fn copy_batch(
        &self,
        batch: &[SizedBlobRef],
        cancel: &CancelToken,
        report: &mut SyncReport,
    ) -> SyncResult<()> {
        let refs: Vec<BlobRef> = batch.iter().map(|sb| sb.blob_ref.clone()).collect();
        let have = self.dest.stat(&refs)?;
        for sb in batch {
            if cancel.is_canceled() {
                return Err(SyncError::Canceled);
            }
            if have.iter().any(|h| h.blob_ref == sb.blob_ref) {
                report.already_present += 1;
                continue;
            }
            self.copy_one(&sb.blob_ref)?;
            report.blobs_copied += 1;
            report.bytes_copied += sb.size;
        }
        Ok(())
    }

    fn copy_one(&self, br: &BlobRef) -> SyncResult<()> {
        let mut backoff = self.initial_backoff;
        let mut last_error = String::new();
        for attempt in 1..=MAX_ATTEMPTS {
            let result = self
                .source
                .fetch(br)
                .and_then(|(mut reader, _)| self.dest.receive(br, &mut reader));
            match result {
                Ok(_) => return Ok(()),
                Err(e) => {
                    warn!(sync = %self.name, blob = %br, attempt, "copy failed: {e}");
                    last_error = e.to_string();
                }
            }
            if attempt < MAX_ATTEMPTS {
                std::thread::sleep(backoff);
                backoff = (backoff * 2).min(MAX_BACKOFF);
            }
        }
        Err(SyncError::CopyFailed {
            blob: br.clone(),
            attempts: MAX_ATTEMPTS,
            last_error,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hoard_kv::MemoryKv;
    use hoard_store::{receive_bytes, MemoryStore};

    fn handler(
        source: &Arc<MemoryStore>,
        dest: &Arc<MemoryStore>,
    ) -> SyncHandler {
        SyncHandler::new(
            "test",
            Arc::clone(source) as Arc<dyn BlobStore>,
            Arc::clone(dest) as Arc<dyn BlobStore>,
            Arc::new(MemoryKv::new()),
        )
        .with_initial_backoff(Duration::from_millis(1))
    }

    #[test]
    fn copies_everything_then_nothing() {
        let source = Arc::new(MemoryStore::new());
        let dest = Arc::new(MemoryStore::new());
        for i in 0..100u32 {
            receive_bytes(source.as_ref(), &i.to_be_bytes()).unwrap();
        }
        let sync = handler(&source, &dest);

        let first = sync.run_once(&CancelToken::new()).unwrap();
        assert_eq!(first.blobs_copied, 100);
        assert_eq!(dest.len(), 100);

        // Destination and source enumerate identically.
        let list = |s: &MemoryStore| -> Vec<String> {
            s.enumerate("", CancelToken::new())
                .unwrap()
                .map(|r| r.unwrap().blob_ref.to_string())
                .collect()
        };
        assert_eq!(list(&source), list(&dest));

        // A second pass finds nothing new.
        let second = sync.run_once(&CancelToken::new()).unwrap();
        assert_eq!(second.blobs_copied, 0);
        assert_eq!(second.already_present, 0, "checkpoint skips the copied prefix");
    }

    #[test]
    fn skips_blobs_already_in_dest() {
        let source = Arc::new(MemoryStore::new());
        let dest = Arc::new(MemoryStore::new());
        receive_bytes(source.as_ref(), b"both").unwrap();
        receive_bytes(dest.as_ref(), b"both").unwrap();
        receive_bytes(source.as_ref(), b"only source").unwrap();

        let report = handler(&source, &dest).run_once(&CancelToken::new()).unwrap();
        assert_eq!(report.blobs_copied, 1);
        assert_eq!(report.already_present, 1);
    }

    #[test]
    fn checkpoint_resumes_where_it_left_off() {
        let source = Arc::new(MemoryStore::new());
        let dest = Arc::new(MemoryStore::new());
        let checkpoint: Arc<dyn SortedKv> = Arc::new(MemoryKv::new());
        for i in 0..10u32 {
            receive_bytes(source.as_ref(), &i.to_be_bytes()).unwrap();
        }
        let sync = SyncHandler::new(
            "ckpt",
            Arc::clone(&source) as Arc<dyn BlobStore>,
            Arc::clone(&dest) as Arc<dyn BlobStore>,
            Arc::clone(&checkpoint),
        )
        .with_initial_backoff(Duration::from_millis(1));
        sync.run_once(&CancelToken::new()).unwrap();

        let saved = sync.checkpoint().unwrap().unwrap();
        let max_ref = source
            .enumerate("", CancelToken::new())
            .unwrap()
            .map(|r| r.unwrap().blob_ref.to_string())
            .max()
            .unwrap();
        assert_eq!(saved, max_ref);
    }

    #[test]
    fn cancellation_stops_the_pass() {
        let source = Arc::new(MemoryStore::new());
        let dest = Arc::new(MemoryStore::new());
        receive_bytes(source.as_ref(), b"x").unwrap();
        let cancel = CancelToken::new();
        cancel.cancel();
        let err = handler(&source, &dest).run_once(&cancel).unwrap_err();
        assert!(matches!(err, SyncError::Canceled));
    }
}
