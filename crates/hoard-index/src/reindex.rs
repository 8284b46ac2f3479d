//! Reindexing: wipe the KV store, replay every blob from the source, and
//! rebuild the derived caches.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::Mutex;

use hoard_types::{BlobRef, CancelToken};
use tracing::{info, warn};

use crate::error::{IndexError, IndexResult};
use crate::index::{Index, SCHEMA_VERSION};
use crate::keys;

/// Fixed worker pool size for replaying blobs.
const WORKERS: usize = 4;

impl Index {
    /// Wipe the KV store (backend must support it) and rebuild the whole
    /// index from the blob source.
    ///
    /// `start` resumes a previously interrupted run: refs sorting below it
    /// are skipped. Returns the number of blobs replayed.
    pub fn reindex(&self, start: Option<BlobRef>, cancel: CancelToken) -> IndexResult<usize> {
        let source = self.blob_source().ok_or(IndexError::NoBlobSource)?;
        if start.is_none() {
            info!("wiping index storage");
            self.kv().wipe()?;
            self.kv()
                .set(keys::SCHEMA_VERSION_KEY, &SCHEMA_VERSION.to_string())?;
            self.rebuild_deletes_cache()?;
        }

        let (tx, rx) = mpsc::sync_channel::<BlobRef>(32);
        let rx = Mutex::new(rx);
        let replayed = AtomicUsize::new(0);
        let failed = AtomicUsize::new(0);

        let enum_result: IndexResult<()> = std::thread::scope(|scope| {
            for _ in 0..WORKERS {
                scope.spawn(|| loop {
                    let Ok(br) = rx.lock().expect("lock poisoned").recv() else {
                        return;
                    };
                    match self.reindex_one(&br) {
                        Ok(()) => {
                            replayed.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(e) => {
                            warn!(blob = %br, "error reindexing: {e}");
                            failed.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                });
            }

            let start_str = start.as_ref().map(|s| s.to_string()).unwrap_or_default();
            for item in source.enumerate("", cancel.clone())? {
                let sb = item?;
                if !start_str.is_empty() && sb.blob_ref.to_string() < start_str {
                    continue;
                }
                if tx.send(sb.blob_ref).is_err() {
                    break;
                }
            }
            drop(tx);
            Ok(())
        });
        enum_result?;

        self.rebuild_deletes_cache()?;
        if self.corpus().is_some() {
            // Swap in a corpus rebuilt from the fresh rows.
            self.attach_corpus()?;
        }

        let failed = failed.load(Ordering::Relaxed);
        if failed > 0 {
            return Err(IndexError::ReindexIncomplete { failed });
        }
        let n = replayed.load(Ordering::Relaxed);
        info!(blobs = n, "index rebuild complete");
        Ok(n)
    }
}
