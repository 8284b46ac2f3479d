use chrono::Utc;
use hoard_schema::{build, ClaimType, Signer};
use hoard_store::{BlobStore, MemoryStore};
use hoard_types::{BlobRef, CancelToken};
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::client::HoardClient;
use crate::error::{ClientError, ClientResult};

const MAX_UPLOAD_ATTEMPTS: u32 = 3;
const STAT_BATCH: usize = 256;

/// How a blob reached the DONE state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UploadOutcome {
    /// The have-cache already knew the server has it.
    HaveCacheHit,
    /// A stat round-trip found it on the server.
    StatHit,
    /// The bytes were uploaded.
    Uploaded,
}

#[derive(Clone, Debug)]
pub struct PutResult {
    pub blob_ref: BlobRef,
    pub size: u64,
    pub outcome: UploadOutcome,
}

impl HoardClient {
    /// Upload one blob, cheapest path first: have-cache, then stat, then
    /// upload with bounded retries.
    pub async fn put_blob(&self, data: &[u8]) -> ClientResult<PutResult> {
        let br = BlobRef::sha1_of(data);
        let size = data.len() as u64;

        if let Some(cache) = &self.have_cache {
            if cache.has(&br) {
                return Ok(PutResult {
                    blob_ref: br,
                    size,
                    outcome: UploadOutcome::HaveCacheHit,
                });
            }
        }

        let present = self.stat(std::slice::from_ref(&br)).await?;
        if present.iter().any(|sb| sb.blob_ref == br) {
            self.note_have(&br, size);
            return Ok(PutResult {
                blob_ref: br,
                size,
                outcome: UploadOutcome::StatHit,
            });
        }

        let mut last_error = String::new();
        for attempt in 1..=MAX_UPLOAD_ATTEMPTS {
            match self.upload(&[(br.clone(), data.to_vec())]).await {
                Ok(received) if received.iter().any(|sb| sb.blob_ref == br) => {
                    self.note_have(&br, size);
                    return Ok(PutResult {
                        blob_ref: br,
                        size,
                        outcome: UploadOutcome::Uploaded,
                    });
                }
                Ok(_) => last_error = "server did not acknowledge the blob".to_string(),
                Err(e) => last_error = e.to_string(),
            }
            warn!(blob = %br, attempt, "upload attempt failed: {last_error}");
        }
        Err(ClientError::UploadFailed {
            blob: br.to_string(),
            attempts: MAX_UPLOAD_ATTEMPTS,
            last_error,
        })
    }

    /// Upload many blobs concurrently. The shared gate bounds actual HTTP
    /// parallelism. Results come back in input order.
    pub async fn put_blobs(&self, blobs: Vec<Vec<u8>>) -> ClientResult<Vec<PutResult>> {
        let mut set = JoinSet::new();
        for (i, data) in blobs.into_iter().enumerate() {
            let client = self.clone();
            set.spawn(async move { (i, client.put_blob(&data).await) });
        }
        let mut results: Vec<Option<PutResult>> = Vec::new();
        while let Some(joined) = set.join_next().await {
            let (i, result) = joined.expect("upload task panicked");
            let result = result?;
            if results.len() <= i {
                results.resize(i + 1, None);
            }
            results[i] = Some(result);
        }
        Ok(results.into_iter().map(|r| r.expect("slot filled")).collect())
    }

    fn note_have(&self, br: &BlobRef, size: u64) {
        if let Some(cache) = &self.have_cache {
            cache.note(br, size);
        }
    }

    /// Chunk a file locally and upload whatever the server is missing.
    /// Returns the root `file` schema ref.
    pub async fn upload_file(&self, name: &str, data: &[u8]) -> ClientResult<BlobRef> {
        // Stage the whole tree in memory first; the chunker dedups
        // identical content by construction.
        let staging = MemoryStore::new();
        let root = hoard_schema::write_file_bytes(&staging, name, data)?;

        let mut staged: Vec<(BlobRef, u64)> = Vec::new();
        for item in staging.enumerate("", CancelToken::new())? {
            let sb = item?;
            staged.push((sb.blob_ref, sb.size));
        }

        // Filter down to blobs the server doesn't have.
        let mut to_upload: Vec<BlobRef> = Vec::new();
        for batch in staged.chunks(STAT_BATCH) {
            let unknown: Vec<BlobRef> = batch
                .iter()
                .map(|(br, _)| br.clone())
                .filter(|br| {
                    self.have_cache
                        .as_ref()
                        .is_none_or(|cache| !cache.has(br))
                })
                .collect();
            let present = self.stat(&unknown).await?;
            for br in unknown {
                if let Some(found) = present.iter().find(|sb| sb.blob_ref == br) {
                    self.note_have(&br, found.size);
                } else {
                    to_upload.push(br);
                }
            }
        }
        debug!(
            total = staged.len(),
            missing = to_upload.len(),
            "uploading file tree"
        );

        let blobs: Vec<Vec<u8>> = to_upload
            .iter()
            .map(|br| hoard_store::fetch_bytes(&staging, br))
            .collect::<Result<_, _>>()?;
        self.put_blobs(blobs).await?;
        Ok(root)
    }

    /// Upload the signer's public key blob (idempotent; once per session
    /// is plenty).
    pub async fn upload_public_key(&self, signer: &Signer) -> ClientResult<PutResult> {
        self.put_blob(signer.public_key_blob().as_bytes()).await
    }

    /// Create a fresh signed permanode and return its ref.
    pub async fn create_permanode(&self, signer: &Signer) -> ClientResult<BlobRef> {
        self.upload_public_key(signer).await?;
        let signed = build::permanode().sign(signer)?;
        Ok(self.put_blob(signed.as_bytes()).await?.blob_ref)
    }

    /// Sign and upload an attribute claim.
    pub async fn upload_attribute_claim(
        &self,
        signer: &Signer,
        permanode: &BlobRef,
        claim_type: ClaimType,
        attr: &str,
        value: &str,
    ) -> ClientResult<BlobRef> {
        self.upload_public_key(signer).await?;
        let signed =
            build::attribute_claim(permanode, claim_type, attr, value, Utc::now()).sign(signer)?;
        Ok(self.put_blob(signed.as_bytes()).await?.blob_ref)
    }

    /// Sign and upload a delete claim against `target`.
    pub async fn upload_delete_claim(
        &self,
        signer: &Signer,
        target: &BlobRef,
    ) -> ClientResult<BlobRef> {
        self.upload_public_key(signer).await?;
        let signed = build::delete_claim(target, Utc::now()).sign(signer)?;
        Ok(self.put_blob(signed.as_bytes()).await?.blob_ref)
    }
}
