use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use hoard_kv::{find_prefix, SortedKv};
use hoard_schema::{CamliType, ClaimType};
use hoard_types::{parse_claim_date, BlobRef};
use tracing::warn;

use crate::deletes::DeletesCache;
use crate::error::IndexResult;
use crate::keys::urld;
use crate::receive::MutationMap;
use crate::sniff::camli_type_from_mime;
use crate::types::{BlobMeta, FileInfo, IndexedClaim, RecentPermanode};

/// Shares one allocation per distinct string. Claim attribute names and
/// values repeat heavily across a corpus.
#[derive(Default)]
struct Interner {
    strings: HashSet<Arc<str>>,
}

impl Interner {
    fn intern(&mut self, s: &str) -> Arc<str> {
        if let Some(existing) = self.strings.get(s) {
            return Arc::clone(existing);
        }
        let arc: Arc<str> = Arc::from(s);
        self.strings.insert(Arc::clone(&arc));
        arc
    }
}

#[derive(Clone)]
struct CorpusClaim {
    blob_ref: BlobRef,
    signer: BlobRef,
    claim_type: ClaimType,
    attr: Arc<str>,
    value: Arc<str>,
    date: DateTime<Utc>,
}

impl CorpusClaim {
    fn to_indexed(&self, permanode: &BlobRef) -> IndexedClaim {
        IndexedClaim {
            blob_ref: self.blob_ref.clone(),
            signer: self.signer.clone(),
            permanode: permanode.clone(),
            claim_type: self.claim_type,
            attr: self.attr.to_string(),
            value: self.value.to_string(),
            date: self.date,
        }
    }
}

#[derive(Default)]
struct CorpusInner {
    metas: HashMap<BlobRef, BlobMeta>,
    key_ids: HashMap<BlobRef, String>,
    claims: HashMap<BlobRef, Vec<CorpusClaim>>,
    files: HashMap<BlobRef, FileInfo>,
    image_sizes: HashMap<BlobRef, (u32, u32)>,
    media_tags: HashMap<BlobRef, BTreeMap<String, String>>,
    whole_to_file: HashMap<BlobRef, Vec<BlobRef>>,
    interner: Interner,
}

/// In-memory mirror of the index, rebuilt from the KV store at startup and
/// kept current by the ingest pipeline.
///
/// One RW mutex guards the whole corpus: queries read, ingest writes.
pub struct Corpus {
    inner: RwLock<CorpusInner>,
}

impl Corpus {
    /// Scan the KV store and build the mirror. `meta:` rows are scanned
    /// first so later families can size their maps from the counts.
    pub fn build(kv: &dyn SortedKv) -> IndexResult<Self> {
        let mut inner = CorpusInner::default();
        for (k, v) in find_prefix(kv, "meta:")? {
            inner.merge_row(&k, &v);
        }
        let schema_blobs = inner.metas.len();
        inner.claims.reserve(schema_blobs / 4);
        for family in [
            "signerkeyid:",
            "claim|",
            "fileinfo|",
            "filetimes|",
            "imagesize|",
            "mediatag|",
            "wholetofile|",
        ] {
            for (k, v) in find_prefix(kv, family)? {
                inner.merge_row(&k, &v);
            }
        }
        for list in inner.claims.values_mut() {
            list.sort_by(|a, b| a.date.cmp(&b.date));
        }
        Ok(Self {
            inner: RwLock::new(inner),
        })
    }

    pub fn empty() -> Self {
        Self {
            inner: RwLock::new(CorpusInner::default()),
        }
    }

    /// Feed one received blob's row mutations into the mirror. Called by
    /// the ingest pipeline after its KV batch commits.
    pub fn add_blob(&self, mm: &MutationMap) {
        let mut inner = self.inner.write().expect("lock poisoned");
        let mut touched: Vec<BlobRef> = Vec::new();
        for (k, v) in mm.rows() {
            if let Some(pn) = inner.merge_row(k, v) {
                touched.push(pn);
            }
        }
        for pn in touched {
            if let Some(list) = inner.claims.get_mut(&pn) {
                list.sort_by(|a, b| a.date.cmp(&b.date));
            }
        }
    }

    // ---- queries -------------------------------------------------------

    pub fn blob_meta(&self, br: &BlobRef) -> Option<BlobMeta> {
        self.inner
            .read()
            .expect("lock poisoned")
            .metas
            .get(br)
            .cloned()
    }

    pub fn key_id(&self, signer: &BlobRef) -> Option<String> {
        self.inner
            .read()
            .expect("lock poisoned")
            .key_ids
            .get(signer)
            .cloned()
    }

    /// All claims on `permanode` in date order, optionally filtered.
    pub fn claims_of(
        &self,
        permanode: &BlobRef,
        signer_filter: Option<&BlobRef>,
        attr_filter: Option<&str>,
    ) -> Vec<IndexedClaim> {
        let inner = self.inner.read().expect("lock poisoned");
        let Some(list) = inner.claims.get(permanode) else {
            return Vec::new();
        };
        list.iter()
            .filter(|c| signer_filter.is_none_or(|s| &c.signer == s))
            .filter(|c| attr_filter.is_none_or(|a| &*c.attr == a))
            .map(|c| c.to_indexed(permanode))
            .collect()
    }

    /// Replay claims up to `at`, applying set/add/del semantics for one
    /// attribute. Claims that are themselves deleted are skipped.
    pub fn attr_values(
        &self,
        permanode: &BlobRef,
        attr: &str,
        at: Option<DateTime<Utc>>,
        deletes: &DeletesCache,
    ) -> Vec<String> {
        let claims = self.claims_of(permanode, None, None);
        apply_claims(&claims, attr, at, deletes)
    }

    /// Max claim date over non-deleted claims of `permanode`.
    pub fn permanode_modtime(
        &self,
        permanode: &BlobRef,
        deletes: &DeletesCache,
    ) -> Option<DateTime<Utc>> {
        let inner = self.inner.read().expect("lock poisoned");
        inner
            .claims
            .get(permanode)?
            .iter()
            .filter(|c| !deletes.is_deleted(&c.blob_ref))
            .map(|c| c.date)
            .max()
    }

    /// Latest live `camliContent` set-attribute value.
    pub fn permanode_camli_content(
        &self,
        permanode: &BlobRef,
        deletes: &DeletesCache,
    ) -> Option<(BlobRef, DateTime<Utc>)> {
        let inner = self.inner.read().expect("lock poisoned");
        inner
            .claims
            .get(permanode)?
            .iter()
            .rev()
            .filter(|c| !deletes.is_deleted(&c.blob_ref))
            .find(|c| &*c.attr == "camliContent" && c.claim_type == ClaimType::SetAttribute)
            .and_then(|c| BlobRef::parse_opt(&c.value).map(|br| (br, c.date)))
    }

    /// Permanodes sorted by modification time, newest first, deleted ones
    /// skipped, paged by `before`/`limit`.
    pub fn recent_permanodes(
        &self,
        before: Option<DateTime<Utc>>,
        limit: usize,
        deletes: &DeletesCache,
    ) -> Vec<RecentPermanode> {
        let inner = self.inner.read().expect("lock poisoned");
        let mut out: Vec<RecentPermanode> = inner
            .claims
            .iter()
            .filter(|(pn, _)| !deletes.is_deleted(pn))
            .filter(|(pn, _)| {
                inner
                    .metas
                    .get(pn)
                    .is_some_and(|m| m.camli_type == Some(CamliType::Permanode))
            })
            .filter_map(|(pn, claims)| {
                let live_max = claims
                    .iter()
                    .filter(|c| !deletes.is_deleted(&c.blob_ref))
                    .map(|c| (c.date, c.signer.clone()))
                    .max_by_key(|(d, _)| *d)?;
                Some(RecentPermanode {
                    permanode: pn.clone(),
                    signer: live_max.1,
                    mod_time: live_max.0,
                })
            })
            .filter(|rp| before.is_none_or(|b| rp.mod_time < b))
            .collect();
        out.sort_by(|a, b| b.mod_time.cmp(&a.mod_time));
        out.truncate(limit);
        out
    }

    /// Every permanode the corpus knows of.
    pub fn permanodes(&self) -> Vec<BlobRef> {
        let inner = self.inner.read().expect("lock poisoned");
        inner
            .metas
            .iter()
            .filter(|(_, m)| m.camli_type == Some(CamliType::Permanode))
            .map(|(br, _)| br.clone())
            .collect()
    }

    pub fn file_info(&self, br: &BlobRef) -> Option<FileInfo> {
        self.inner
            .read()
            .expect("lock poisoned")
            .files
            .get(br)
            .cloned()
    }

    pub fn image_size(&self, br: &BlobRef) -> Option<(u32, u32)> {
        self.inner
            .read()
            .expect("lock poisoned")
            .image_sizes
            .get(br)
            .copied()
    }

    pub fn media_tags(&self, whole: &BlobRef) -> Option<BTreeMap<String, String>> {
        self.inner
            .read()
            .expect("lock poisoned")
            .media_tags
            .get(whole)
            .cloned()
    }

    pub fn file_refs_of_whole(&self, whole: &BlobRef) -> Vec<BlobRef> {
        self.inner
            .read()
            .expect("lock poisoned")
            .whole_to_file
            .get(whole)
            .cloned()
            .unwrap_or_default()
    }

    pub fn blob_count(&self) -> usize {
        self.inner.read().expect("lock poisoned").metas.len()
    }
}

/// Reduce a date-ordered claim list to the live values of `attr` at `at`.
pub fn apply_claims(
    claims: &[IndexedClaim],
    attr: &str,
    at: Option<DateTime<Utc>>,
    deletes: &DeletesCache,
) -> Vec<String> {
    let mut values: Vec<String> = Vec::new();
    for c in claims {
        if at.is_some_and(|t| c.date > t) {
            break;
        }
        if c.attr != attr || deletes.is_deleted(&c.blob_ref) {
            continue;
        }
        match c.claim_type {
            ClaimType::SetAttribute => {
                values.clear();
                values.push(c.value.clone());
            }
            ClaimType::AddAttribute => {
                if !values.contains(&c.value) {
                    values.push(c.value.clone());
                }
            }
            ClaimType::DelAttribute => {
                if c.value.is_empty() {
                    values.clear();
                } else {
                    values.retain(|v| v != &c.value);
                }
            }
            ClaimType::Delete => {}
        }
    }
    values
}

impl CorpusInner {
    /// Merge one index row. Returns the permanode whose claim list was
    /// touched, so the caller can re-sort it.
    fn merge_row(&mut self, key: &str, value: &str) -> Option<BlobRef> {
        if let Some(rest) = key.strip_prefix("meta:") {
            let br = BlobRef::parse_opt(rest)?;
            let (size, mime) = value.split_once('|')?;
            let Ok(size) = size.parse() else {
                warn!(key, value, "bogus meta row");
                return None;
            };
            self.metas.insert(
                br.clone(),
                BlobMeta {
                    blob_ref: br,
                    size,
                    camli_type: camli_type_from_mime(mime),
                    mime_type: mime.to_string(),
                },
            );
            return None;
        }
        if let Some(rest) = key.strip_prefix("signerkeyid:") {
            let br = BlobRef::parse_opt(rest)?;
            self.key_ids.insert(br, value.to_string());
            return None;
        }
        if key.starts_with("claim|") {
            let kp: Vec<&str> = key.split('|').collect();
            let vp: Vec<&str> = value.split('|').collect();
            if kp.len() != 5 || vp.len() != 4 {
                warn!(key, value, "bogus claim row");
                return None;
            }
            let pn = BlobRef::parse_opt(kp[1])?;
            let claim_ref = BlobRef::parse_opt(kp[4])?;
            let date = parse_claim_date(kp[3]).ok()?;
            let claim_type = ClaimType::from_name(&urld(vp[0]))?;
            let signer = BlobRef::parse_opt(vp[3])?;
            // Re-indexing a blob replays its rows; a claim contributes one
            // row per permanode, so the ref is enough to dedup.
            if self
                .claims
                .get(&pn)
                .is_some_and(|list| list.iter().any(|c| c.blob_ref == claim_ref))
            {
                return None;
            }
            let attr = self.interner.intern(&urld(vp[1]));
            let val = self.interner.intern(&urld(vp[2]));
            self.claims.entry(pn.clone()).or_default().push(CorpusClaim {
                blob_ref: claim_ref,
                signer,
                claim_type,
                attr,
                value: val,
                date,
            });
            return Some(pn);
        }
        if let Some(rest) = key.strip_prefix("fileinfo|") {
            let br = BlobRef::parse_opt(rest)?;
            let vp: Vec<&str> = value.splitn(3, '|').collect();
            if vp.len() != 3 {
                warn!(key, value, "bogus fileinfo row");
                return None;
            }
            let entry = self.files.entry(br).or_default();
            entry.size = vp[0].parse().unwrap_or(0);
            entry.file_name = urld(vp[1]);
            entry.mime_type = vp[2].to_string();
            return None;
        }
        if let Some(rest) = key.strip_prefix("filetimes|") {
            let br = BlobRef::parse_opt(rest)?;
            let entry = self.files.entry(br).or_default();
            entry.time = (!value.is_empty()).then(|| value.to_string());
            return None;
        }
        if let Some(rest) = key.strip_prefix("imagesize|") {
            let br = BlobRef::parse_opt(rest)?;
            let (w, h) = value.split_once('|')?;
            if let (Ok(w), Ok(h)) = (w.parse(), h.parse()) {
                self.image_sizes.insert(br, (w, h));
            }
            return None;
        }
        if key.starts_with("mediatag|") {
            let kp: Vec<&str> = key.splitn(3, '|').collect();
            if kp.len() != 3 {
                return None;
            }
            let whole = BlobRef::parse_opt(kp[1])?;
            self.media_tags
                .entry(whole)
                .or_default()
                .insert(urld(kp[2]), urld(value));
            return None;
        }
        if key.starts_with("wholetofile|") {
            let kp: Vec<&str> = key.split('|').collect();
            if kp.len() != 3 {
                return None;
            }
            let whole = BlobRef::parse_opt(kp[1])?;
            let file = BlobRef::parse_opt(kp[2])?;
            let list = self.whole_to_file.entry(whole).or_default();
            if !list.contains(&file) {
                list.push(file);
            }
            return None;
        }
        None
    }
}
