//! The ingest pipeline: every received blob becomes a batch of row
//! mutations, computed here and committed by [`Index::commit`].

use std::io::{Read, Seek, SeekFrom};
use std::sync::Mutex;

use hoard_schema::sign;
use hoard_schema::{CamliType, Claim, ClaimType, FileReader, SchemaBlob, SchemaError};
use hoard_store::BlobStore;
use hoard_types::{format_claim_date, BlobRef, Hasher, SizedBlobRef};
use sha1::Digest;
use tracing::warn;

use crate::error::IndexResult;
use crate::index::Index;
use crate::keys;
use crate::media;
use crate::sniff::{mime_from_magic, Sniffer};

/// The rows (and delete-claim side channel) produced by indexing one blob.
#[derive(Debug, Default)]
pub struct MutationMap {
    rows: Vec<(String, String)>,
    deletes: Vec<Claim>,
}

impl MutationMap {
    pub fn set(&mut self, key: String, value: String) {
        self.rows.push((key, value));
    }

    /// Record a delete claim for the post-commit deletes-cache update.
    pub fn note_delete(&mut self, claim: Claim) {
        self.deletes.push(claim);
    }

    pub fn rows(&self) -> &[(String, String)] {
        &self.rows
    }

    pub fn deletes(&self) -> &[Claim] {
        &self.deletes
    }
}

/// Blob fetcher that remembers which refs were missing, so files whose
/// chunks haven't arrived yet can be retried later.
pub(crate) struct MissTracker {
    source: std::sync::Arc<dyn BlobStore>,
    missing: Mutex<Vec<BlobRef>>,
}

impl MissTracker {
    pub(crate) fn new(source: std::sync::Arc<dyn BlobStore>) -> Self {
        Self {
            source,
            missing: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn take_missing(&self) -> Vec<BlobRef> {
        std::mem::take(&mut self.missing.lock().expect("lock poisoned"))
    }
}

impl hoard_schema::Fetcher for MissTracker {
    fn fetch_blob(&self, br: &BlobRef) -> Result<Vec<u8>, SchemaError> {
        match hoard_store::fetch_bytes(self.source.as_ref(), br) {
            Ok(data) => Ok(data),
            Err(e) => {
                if e.is_not_found() {
                    self.missing.lock().expect("lock poisoned").push(br.clone());
                }
                Err(e.into())
            }
        }
    }
}

impl Index {
    /// Index a blob. The caller has already verified the digest (the blob
    /// came off a verified receive or a trusted enumeration).
    pub fn receive_blob(&self, br: &BlobRef, source: &mut dyn Read) -> IndexResult<SizedBlobRef> {
        self.index_blob(br, source, false)
    }

    pub(crate) fn index_blob(
        &self,
        br: &BlobRef,
        source: &mut dyn Read,
        force: bool,
    ) -> IndexResult<SizedBlobRef> {
        let mut sniffer = Sniffer::new(br.clone());
        std::io::copy(source, &mut sniffer)?;
        let size = sniffer.size();

        if !force && self.kv().get(&keys::have(br))?.is_some() {
            return Ok(br.clone().sized(size));
        }
        sniffer.parse();

        let mm = self.populate_mutation_map(br, &sniffer)?;
        self.commit(&mm)?;
        if let Some(corpus) = self.corpus() {
            corpus.add_blob(&mm);
        }
        self.retry_waiters_on(br);
        Ok(br.clone().sized(size))
    }

    fn populate_mutation_map(&self, br: &BlobRef, sniffer: &Sniffer) -> IndexResult<MutationMap> {
        let mut mm = MutationMap::default();
        mm.set(keys::have(br), sniffer.size().to_string());
        mm.set(keys::meta(br), keys::meta_val(sniffer.size(), &sniffer.mime_type()));

        if let Some(sb) = sniffer.schema_blob() {
            match sb.camli_type() {
                CamliType::Claim => self.populate_claim(sb, &mut mm)?,
                CamliType::File => self.populate_file(sb, &mut mm)?,
                CamliType::Directory => self.populate_dir(sb, &mut mm)?,
                // Permanodes, static sets, bytes, and shares carry no
                // extra rows; their meta: row is enough.
                _ => {}
            }
        }
        Ok(mm)
    }

    fn populate_claim(&self, sb: &SchemaBlob, mm: &mut MutationMap) -> IndexResult<()> {
        let claim = match sb.as_claim() {
            Ok(c) => c,
            Err(e) => {
                warn!(blob = %sb.blob_ref(), "skipping malformed claim: {e}");
                return Ok(());
            }
        };
        let Some(source) = self.blob_source() else {
            warn!(blob = %sb.blob_ref(), "cannot verify claim without a blob source");
            return Ok(());
        };
        let key_fetcher = hoard_schema::StoreFetcher(source.as_ref());
        let vs = match sign::verify(sb.bytes(), &key_fetcher) {
            Ok(vs) => vs,
            Err(e) => {
                // Signature failure: the blob stays stored, but no claim
                // rows are emitted and the deletes cache is untouched.
                warn!(blob = %sb.blob_ref(), "claim signature did not verify: {e}");
                return Ok(());
            }
        };
        mm.set(keys::signer_key_id(&vs.signer), vs.key_id.clone());

        if claim.claim_type == ClaimType::Delete {
            self.populate_delete_claim(&claim, &vs.key_id, mm)?;
            return Ok(());
        }

        let Some(pn) = claim.permanode.clone() else {
            return Ok(());
        };
        let claim_ref = sb.blob_ref();

        mm.set(
            keys::recent_permanode(&vs.key_id, &claim.date_string, claim_ref),
            pn.to_string(),
        );
        mm.set(
            keys::permanode_claim(&pn, &vs.key_id, &claim.date_string, claim_ref),
            keys::permanode_claim_val(
                claim.claim_type.name(),
                &claim.attr,
                &claim.value,
                &vs.signer,
            ),
        );

        if let Some(suffix) = claim.attr.strip_prefix("camliPath:") {
            if let Some(target) = BlobRef::parse_opt(&claim.value) {
                let active = claim.claim_type != ClaimType::DelAttribute;
                mm.set(
                    keys::path_backward(&vs.key_id, &target, claim_ref),
                    keys::path_backward_val(&claim.date_string, &pn, active, suffix),
                );
                mm.set(
                    keys::path_forward(&vs.key_id, &pn, suffix, &claim.date_string, claim_ref),
                    keys::path_forward_val(active, &target),
                );
            }
        }

        if claim.claim_type != ClaimType::DelAttribute && keys::is_indexed_attribute(&claim.attr) {
            mm.set(
                keys::signer_attr_value(
                    &vs.key_id,
                    &claim.attr,
                    &claim.value,
                    &claim.date_string,
                    claim_ref,
                ),
                pn.to_string(),
            );
        }

        if keys::is_blob_reference_attribute(&claim.attr) {
            if let Some(target) = BlobRef::parse_opt(&claim.value) {
                mm.set(
                    keys::edge_backward(&target, &pn, claim_ref),
                    keys::edge_backward_val("permanode", ""),
                );
            }
        }
        Ok(())
    }

    fn populate_delete_claim(
        &self,
        claim: &Claim,
        key_id: &str,
        mm: &mut MutationMap,
    ) -> IndexResult<()> {
        let Some(target) = claim.target.clone() else {
            warn!(claim = %claim.blob_ref, "delete claim without target");
            return Ok(());
        };
        let meta = match self.get_blob_meta(&target)? {
            Some(m) => m,
            None => {
                // Out-of-order arrival (common during reindex): retry this
                // claim once the target lands.
                warn!(claim = %claim.blob_ref, %target, "delete claim target not indexed yet");
                self.record_missing(&claim.blob_ref, vec![target], |m| self.in_index(m));
                return Ok(());
            }
        };
        // Only permanodes and claims are deletable.
        if !matches!(meta.camli_type, Some(CamliType::Permanode) | Some(CamliType::Claim)) {
            warn!(
                claim = %claim.blob_ref, %target,
                "delete claim target is neither permanode nor claim"
            );
            return Ok(());
        }
        mm.set(
            keys::deleted(&target, &claim.date_string, &claim.blob_ref),
            String::new(),
        );
        if meta.camli_type == Some(CamliType::Permanode) {
            mm.set(
                keys::recent_permanode(key_id, &claim.date_string, &claim.blob_ref),
                target.to_string(),
            );
            mm.set(
                keys::permanode_claim(&target, key_id, &claim.date_string, &claim.blob_ref),
                keys::permanode_claim_val(ClaimType::Delete.name(), "", "", &claim.signer),
            );
        }
        mm.note_delete(claim.clone());
        Ok(())
    }

    fn populate_file(&self, sb: &SchemaBlob, mm: &mut MutationMap) -> IndexResult<()> {
        let Some(source) = self.blob_source() else {
            warn!(blob = %sb.blob_ref(), "cannot index file contents without a blob source");
            return Ok(());
        };
        let fetcher = MissTracker::new(source);
        let file_ref = sb.blob_ref().clone();

        let mut fr = match FileReader::new(&fetcher, sb) {
            Ok(fr) => fr,
            Err(e) => {
                warn!(blob = %file_ref, "error opening file tree: {e}");
                self.record_missing(&file_ref, fetcher.take_missing(), |m| self.in_source(m));
                return Ok(());
            }
        };

        // One streaming pass: hash the whole contents, keep the first
        // MiB for image metadata, learn the MIME type from the head.
        let mut whole = Hasher::new(hoard_types::HashAlgo::Sha1);
        let mut prefix: Vec<u8> = Vec::new();
        let mut buf = [0u8; 64 << 10];
        let mut size = 0u64;
        loop {
            match fr.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    whole.update(&buf[..n]);
                    let room = (1 << 20) - prefix.len().min(1 << 20);
                    prefix.extend_from_slice(&buf[..n.min(room)]);
                    size += n as u64;
                }
                Err(e) => {
                    warn!(blob = %file_ref, "error reading file contents: {e}");
                    self.record_missing(&file_ref, fetcher.take_missing(), |m| {
                        self.in_source(m)
                    });
                    return Ok(());
                }
            }
        }
        let whole_ref = whole.finish();
        let mime = mime_from_magic(&prefix);

        mm.set(keys::whole_to_file(&whole_ref, &file_ref), "1".to_string());
        mm.set(
            keys::file_info(&file_ref),
            keys::file_info_val(size, sb.file_name().unwrap_or(""), mime),
        );
        let times = sb.mod_time().map(format_claim_date).unwrap_or_default();
        mm.set(keys::file_times(&file_ref), times);

        if mime.starts_with("image/") {
            if let Some((w, h)) = media::image_dimensions(&prefix) {
                mm.set(keys::image_size(&file_ref), keys::image_size_val(w, h));
            }
            match media::parse_exif(&prefix) {
                Ok(exif) => {
                    for (tag, value) in &exif.tags {
                        mm.set(keys::exif_tag(&whole_ref, *tag), keys::urle(value));
                    }
                    if let Some((lat, long)) = exif.gps {
                        mm.set(keys::exif_gps(&whole_ref), keys::exif_gps_val(lat, long));
                    }
                }
                Err(e) => {
                    // Best-effort only; a broken EXIF segment produces no
                    // rows and no failure.
                    warn!(blob = %file_ref, "ignoring invalid EXIF data: {e}");
                }
            }
        }

        if mime.starts_with("audio/") {
            if let Err(e) = index_audio(&mut fr, &prefix, size, &whole_ref, mm) {
                warn!(blob = %file_ref, "ignoring unparseable audio tags: {e}");
            }
        }
        Ok(())
    }

    fn populate_dir(&self, sb: &SchemaBlob, mm: &mut MutationMap) -> IndexResult<()> {
        let Some(source) = self.blob_source() else {
            warn!(blob = %sb.blob_ref(), "cannot index directory without a blob source");
            return Ok(());
        };
        let dir_ref = sb.blob_ref();
        let set_ref = match sb.entries() {
            Ok(r) => r,
            Err(e) => {
                warn!(blob = %dir_ref, "directory without entries: {e}");
                return Ok(());
            }
        };
        let set_bytes = match hoard_store::fetch_bytes(source.as_ref(), &set_ref) {
            Ok(b) => b,
            Err(e) => {
                if e.is_not_found() {
                    self.record_missing(dir_ref, vec![set_ref], |m| self.in_source(m));
                }
                warn!(blob = %dir_ref, "cannot fetch static-set: {e}");
                return Ok(());
            }
        };
        let members = match SchemaBlob::parse(&set_ref, &set_bytes).and_then(|s| s.members()) {
            Ok(m) => m,
            Err(e) => {
                warn!(blob = %dir_ref, "malformed static-set: {e}");
                return Ok(());
            }
        };
        mm.set(
            keys::file_info(dir_ref),
            keys::file_info_val(members.len() as u64, sb.file_name().unwrap_or(""), ""),
        );
        for child in &members {
            mm.set(keys::dir_child(dir_ref, child), "1".to_string());
            mm.set(
                keys::edge_backward(child, dir_ref, dir_ref),
                keys::edge_backward_val("directory", sb.file_name().unwrap_or("")),
            );
        }
        Ok(())
    }
}

/// Extract ID3 tags and the tag-free audio digest from a seekable file.
fn index_audio<F: hoard_schema::Fetcher>(
    fr: &mut FileReader<F>,
    prefix: &[u8],
    size: u64,
    whole_ref: &BlobRef,
    mm: &mut MutationMap,
) -> std::io::Result<()> {
    let mut tags = std::collections::BTreeMap::new();
    let mut audio_start = 0u64;
    if let Some((v2_tags, start)) = media::parse_id3v2(prefix) {
        tags = v2_tags;
        audio_start = start;
    }
    let mut trailer = 0u64;
    if size >= 128 {
        fr.seek(SeekFrom::Start(size - 128))?;
        let mut tail = vec![0u8; 128];
        fr.read_exact(&mut tail)?;
        if let Some(v1) = media::parse_id3v1(&tail) {
            trailer = 128;
            for (k, v) in v1 {
                tags.entry(k).or_insert(v);
            }
        }
    }
    if tags.is_empty() {
        return Ok(());
    }

    // mediaref: sha1 over the audio bytes, both tags excluded, so the
    // same recording with retagged metadata still dedups.
    let audio_len = size.saturating_sub(audio_start).saturating_sub(trailer);
    fr.seek(SeekFrom::Start(audio_start))?;
    let mut hasher = sha1::Sha1::new();
    let mut remaining = audio_len;
    let mut buf = [0u8; 64 << 10];
    while remaining > 0 {
        let want = (buf.len() as u64).min(remaining) as usize;
        let n = fr.read(&mut buf[..want])?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        remaining -= n as u64;
    }
    let media_ref = BlobRef::from_digest(
        hoard_types::HashAlgo::Sha1,
        hasher.finalize().to_vec(),
    )
    .expect("sha1 digest length");
    tags.insert("mediaref".to_string(), media_ref.to_string());

    for (tag, value) in &tags {
        if !value.is_empty() {
            mm.set(keys::media_tag(whole_ref, tag), keys::urle(value));
        }
    }
    Ok(())
}
