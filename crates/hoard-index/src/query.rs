//! Queries over the index rows, with a corpus fast path and KV-scan
//! fallbacks.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{DateTime, Utc};
use hoard_kv::find_prefix;
use hoard_schema::ClaimType;
use hoard_types::{parse_claim_date, unreverse_time, BlobRef};
use tracing::warn;

use crate::corpus::apply_claims;
use crate::error::IndexResult;
use crate::index::Index;
use crate::keys::{self, urld};
use crate::sniff::camli_type_from_mime;
use crate::types::{BlobMeta, Edge, FileInfo, IndexedClaim, PathClaim, RecentPermanode};

impl Index {
    /// Whether `br` is currently soft-deleted (recursively resolved).
    pub fn is_deleted(&self, br: &BlobRef) -> bool {
        self.deletes().is_deleted(br)
    }

    pub fn get_blob_meta(&self, br: &BlobRef) -> IndexResult<Option<BlobMeta>> {
        if let Some(corpus) = self.corpus() {
            return Ok(corpus.blob_meta(br));
        }
        let Some(v) = self.kv().get(&keys::meta(br))? else {
            return Ok(None);
        };
        let Some((size, mime)) = v.split_once('|') else {
            warn!(blob = %br, value = %v, "bogus meta row");
            return Ok(None);
        };
        Ok(Some(BlobMeta {
            blob_ref: br.clone(),
            size: size.parse().unwrap_or(0),
            camli_type: camli_type_from_mime(mime),
            mime_type: mime.to_string(),
        }))
    }

    pub fn key_id(&self, signer: &BlobRef) -> IndexResult<Option<String>> {
        if let Some(corpus) = self.corpus() {
            return Ok(corpus.key_id(signer));
        }
        Ok(self.kv().get(&keys::signer_key_id(signer))?)
    }

    /// All live claims on `permanode` in date order, optionally filtered
    /// by signer and attribute. Claims that are themselves deleted are
    /// omitted.
    pub fn claims_of(
        &self,
        permanode: &BlobRef,
        signer_filter: Option<&BlobRef>,
        attr_filter: Option<&str>,
    ) -> IndexResult<Vec<IndexedClaim>> {
        let mut claims = if let Some(corpus) = self.corpus() {
            corpus.claims_of(permanode, signer_filter, attr_filter)
        } else {
            let prefix = format!("claim|{permanode}|");
            let mut out = Vec::new();
            for (k, v) in find_prefix(self.kv(), &prefix)? {
                let Some(claim) = kv_claim(&k, &v) else {
                    warn!(key = %k, "bogus claim row");
                    continue;
                };
                if signer_filter.is_some_and(|s| &claim.signer != s) {
                    continue;
                }
                if attr_filter.is_some_and(|a| claim.attr != a) {
                    continue;
                }
                out.push(claim);
            }
            out.sort_by(|a, b| a.date.cmp(&b.date));
            out
        };
        claims.retain(|c| !self.is_deleted(&c.blob_ref));
        Ok(claims)
    }

    /// The live values of `attr` on `permanode` as of `at` (or now).
    pub fn attr_values(
        &self,
        permanode: &BlobRef,
        attr: &str,
        at: Option<DateTime<Utc>>,
    ) -> IndexResult<Vec<String>> {
        let claims = self.claims_of(permanode, None, None)?;
        Ok(apply_claims(&claims, attr, at, self.deletes()))
    }

    /// Max claim date over live claims.
    pub fn permanode_modtime(&self, permanode: &BlobRef) -> IndexResult<Option<DateTime<Utc>>> {
        if let Some(corpus) = self.corpus() {
            return Ok(corpus.permanode_modtime(permanode, self.deletes()));
        }
        Ok(self
            .claims_of(permanode, None, None)?
            .iter()
            .map(|c| c.date)
            .max())
    }

    /// Latest live `camliContent` value of a permanode.
    pub fn permanode_camli_content(
        &self,
        permanode: &BlobRef,
    ) -> IndexResult<Option<(BlobRef, DateTime<Utc>)>> {
        if let Some(corpus) = self.corpus() {
            return Ok(corpus.permanode_camli_content(permanode, self.deletes()));
        }
        Ok(self
            .claims_of(permanode, None, Some("camliContent"))?
            .iter()
            .rev()
            .find(|c| c.claim_type == ClaimType::SetAttribute)
            .and_then(|c| BlobRef::parse_opt(&c.value).map(|br| (br, c.date))))
    }

    /// Recent permanodes, newest modification first, deleted skipped.
    pub fn recent_permanodes(
        &self,
        before: Option<DateTime<Utc>>,
        limit: usize,
    ) -> IndexResult<Vec<RecentPermanode>> {
        if let Some(corpus) = self.corpus() {
            return Ok(corpus.recent_permanodes(before, limit, self.deletes()));
        }
        // Reverse map keyId -> signer blob, for result attribution.
        let mut signer_of: HashMap<String, BlobRef> = HashMap::new();
        for (k, v) in find_prefix(self.kv(), "signerkeyid:")? {
            if let Some(br) = k.strip_prefix("signerkeyid:").and_then(BlobRef::parse_opt) {
                signer_of.insert(v, br);
            }
        }
        let mut seen: HashSet<String> = HashSet::new();
        let mut out = Vec::new();
        for (k, v) in find_prefix(self.kv(), "recpn|")? {
            let parts: Vec<&str> = k.split('|').collect();
            if parts.len() != 4 {
                continue;
            }
            let Ok(mod_time) = parse_claim_date(&unreverse_time(parts[2])) else {
                continue;
            };
            let Some(pn) = BlobRef::parse_opt(&v) else {
                continue;
            };
            if self.is_deleted(&pn) || !seen.insert(v.clone()) {
                continue;
            }
            // A permanode whose newest activity is at or past `before`
            // belongs to an earlier page; its older rows are dup-skipped.
            if before.is_some_and(|b| mod_time >= b) {
                continue;
            }
            let Some(signer) = signer_of.get(parts[1]).cloned() else {
                continue;
            };
            out.push(RecentPermanode {
                permanode: pn,
                signer,
                mod_time,
            });
            if out.len() == limit {
                break;
            }
        }
        Ok(out)
    }

    /// Most recent live permanode carrying `attr = value`, per the
    /// `signerattrvalue|` rows.
    pub fn permanode_of_signer_attr_value(
        &self,
        key_id: &str,
        attr: &str,
        value: &str,
    ) -> IndexResult<Option<BlobRef>> {
        let prefix = format!("signerattrvalue|{key_id}|{}|{}|", keys::urle(attr), keys::urle(value));
        for (_, v) in find_prefix(self.kv(), &prefix)? {
            if let Some(pn) = BlobRef::parse_opt(&v) {
                if !self.is_deleted(&pn) {
                    return Ok(Some(pn));
                }
            }
        }
        Ok(None)
    }

    /// Unique live permanodes with `attr` set (optionally to a value
    /// prefixed by `query`).
    pub fn search_permanodes_with_attr(
        &self,
        key_id: &str,
        attr: &str,
        query: &str,
        max: usize,
    ) -> IndexResult<Vec<BlobRef>> {
        let mut prefix = format!("signerattrvalue|{key_id}|{}|", keys::urle(attr));
        if !query.is_empty() {
            prefix.push_str(&keys::urle(query));
        }
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for (k, v) in find_prefix(self.kv(), &prefix)? {
            let parts: Vec<&str> = k.split('|').collect();
            if parts.len() != 6 {
                continue;
            }
            let Some(claim_ref) = BlobRef::parse_opt(parts[5]) else {
                continue;
            };
            let Some(pn) = BlobRef::parse_opt(&v) else {
                continue;
            };
            if self.is_deleted(&claim_ref) || self.is_deleted(&pn) {
                continue;
            }
            if seen.insert(pn.to_string()) {
                out.push(pn);
                if out.len() == max {
                    break;
                }
            }
        }
        Ok(out)
    }

    /// All live path claims by `key_id` pointing at `target`, newest claim
    /// per (base, suffix), inactive heads dropped.
    pub fn paths_of_signer_target(
        &self,
        key_id: &str,
        target: &BlobRef,
    ) -> IndexResult<Vec<PathClaim>> {
        let prefix = format!("signertargetpath|{key_id}|{target}|");
        let mut newest: BTreeMap<String, PathClaim> = BTreeMap::new();
        for (k, v) in find_prefix(self.kv(), &prefix)? {
            let kp: Vec<&str> = k.split('|').collect();
            let vp: Vec<&str> = v.split('|').collect();
            if kp.len() != 4 || vp.len() != 4 {
                warn!(key = %k, "bogus signertargetpath row");
                continue;
            }
            let Some(claim) = BlobRef::parse_opt(kp[3]) else {
                continue;
            };
            let Some(base) = BlobRef::parse_opt(vp[1]) else {
                continue;
            };
            let Ok(date) = parse_claim_date(vp[0]) else {
                continue;
            };
            if self.is_deleted(&claim) || self.is_deleted(&base) {
                continue;
            }
            let p = PathClaim {
                claim,
                base: base.clone(),
                target: target.clone(),
                claim_date: date,
                suffix: urld(vp[3]),
                active: vp[2] == "Y",
            };
            let slot = format!("{base}/{}", p.suffix);
            match newest.get(&slot) {
                Some(existing) if existing.claim_date >= p.claim_date => {}
                _ => {
                    newest.insert(slot, p);
                }
            }
        }
        Ok(newest.into_values().filter(|p| p.active).collect())
    }

    /// Every live path claim for (signer, base, suffix).
    pub fn paths_lookup(
        &self,
        key_id: &str,
        base: &BlobRef,
        suffix: &str,
    ) -> IndexResult<Vec<PathClaim>> {
        let prefix = format!("path|{key_id}|{base}|{}|", keys::urle(suffix));
        let mut out = Vec::new();
        for (k, v) in find_prefix(self.kv(), &prefix)? {
            let kp: Vec<&str> = k.split('|').collect();
            let vp: Vec<&str> = v.split('|').collect();
            if kp.len() != 6 || vp.len() != 2 {
                warn!(key = %k, "bogus path row");
                continue;
            }
            let (Some(claim), Some(target)) =
                (BlobRef::parse_opt(kp[5]), BlobRef::parse_opt(vp[1]))
            else {
                continue;
            };
            let Ok(date) = parse_claim_date(&unreverse_time(kp[4])) else {
                continue;
            };
            if self.is_deleted(&claim) || self.is_deleted(&target) {
                continue;
            }
            out.push(PathClaim {
                claim,
                base: base.clone(),
                target,
                claim_date: date,
                suffix: urld(kp[3]),
                active: vp[0] == "Y",
            });
        }
        Ok(out)
    }

    /// The path claim in effect at `at` (or now) for (signer, base,
    /// suffix): the newest active claim not newer than `at`.
    pub fn path_lookup(
        &self,
        key_id: &str,
        base: &BlobRef,
        suffix: &str,
        at: Option<DateTime<Utc>>,
    ) -> IndexResult<Option<PathClaim>> {
        // The newest claim at `at` decides; if that claim is a del, the
        // path does not resolve.
        let newest = self
            .paths_lookup(key_id, base, suffix)?
            .into_iter()
            .filter(|p| at.is_none_or(|t| p.claim_date <= t))
            .max_by_key(|p| p.claim_date);
        Ok(newest.filter(|p| p.active))
    }

    /// File schema blobs whose contents hash to `whole` — the dedup hint.
    pub fn existing_file_schemas(&self, whole: &BlobRef) -> IndexResult<Vec<BlobRef>> {
        if let Some(corpus) = self.corpus() {
            return Ok(corpus.file_refs_of_whole(whole));
        }
        let prefix = format!("wholetofile|{whole}|");
        Ok(find_prefix(self.kv(), &prefix)?
            .filter_map(|(k, _)| {
                let parts: Vec<&str> = k.split('|').collect();
                (parts.len() == 3).then(|| BlobRef::parse_opt(parts[2]))?
            })
            .collect())
    }

    pub fn file_info(&self, file_ref: &BlobRef) -> IndexResult<Option<FileInfo>> {
        if let Some(corpus) = self.corpus() {
            return Ok(corpus.file_info(file_ref));
        }
        let Some(v) = self.kv().get(&keys::file_info(file_ref))? else {
            return Ok(None);
        };
        let vp: Vec<&str> = v.splitn(3, '|').collect();
        if vp.len() != 3 {
            warn!(blob = %file_ref, value = %v, "bogus fileinfo row");
            return Ok(None);
        }
        let time = self
            .kv()
            .get(&keys::file_times(file_ref))?
            .filter(|t| !t.is_empty());
        Ok(Some(FileInfo {
            size: vp[0].parse().unwrap_or(0),
            file_name: urld(vp[1]),
            mime_type: vp[2].to_string(),
            time,
        }))
    }

    pub fn image_size(&self, file_ref: &BlobRef) -> IndexResult<Option<(u32, u32)>> {
        if let Some(corpus) = self.corpus() {
            return Ok(corpus.image_size(file_ref));
        }
        let Some(v) = self.kv().get(&keys::image_size(file_ref))? else {
            return Ok(None);
        };
        let Some((w, h)) = v.split_once('|') else {
            return Ok(None);
        };
        Ok(w.parse().ok().zip(h.parse().ok()))
    }

    pub fn media_tags(&self, whole: &BlobRef) -> IndexResult<BTreeMap<String, String>> {
        if let Some(corpus) = self.corpus() {
            return Ok(corpus.media_tags(whole).unwrap_or_default());
        }
        let prefix = format!("mediatag|{whole}|");
        Ok(find_prefix(self.kv(), &prefix)?
            .filter_map(|(k, v)| {
                let kp: Vec<&str> = k.splitn(3, '|').collect();
                (kp.len() == 3).then(|| (urld(kp[2]), urld(&v)))
            })
            .collect())
    }

    /// Reverse references: permanodes and directories pointing at `to`.
    pub fn edges_to(&self, to: &BlobRef, max: usize) -> IndexResult<Vec<Edge>> {
        let prefix = format!("edgeback|{to}|");
        let mut out = Vec::new();
        for (k, v) in find_prefix(self.kv(), &prefix)? {
            let kp: Vec<&str> = k.split('|').collect();
            let vp: Vec<&str> = v.splitn(2, '|').collect();
            if kp.len() != 4 || vp.len() != 2 {
                warn!(key = %k, "bogus edgeback row");
                continue;
            }
            let Some(from) = BlobRef::parse_opt(kp[2]) else {
                continue;
            };
            if self.is_deleted(&from) {
                continue;
            }
            out.push(Edge {
                from,
                from_type: vp[0].to_string(),
                from_title: urld(vp[1]),
                to: to.clone(),
            });
            if out.len() == max {
                break;
            }
        }
        Ok(out)
    }

    /// Children of a static directory, in ref order.
    pub fn dir_members(&self, dir: &BlobRef, limit: usize) -> IndexResult<Vec<BlobRef>> {
        let prefix = format!("dirchild|{dir}|");
        Ok(find_prefix(self.kv(), &prefix)?
            .filter_map(|(k, _)| {
                let parts: Vec<&str> = k.split('|').collect();
                (parts.len() == 3).then(|| BlobRef::parse_opt(parts[2]))?
            })
            .take(limit)
            .collect())
    }

    /// Every permanode the index knows of (live or deleted).
    pub fn all_permanodes(&self) -> IndexResult<Vec<BlobRef>> {
        if let Some(corpus) = self.corpus() {
            return Ok(corpus.permanodes());
        }
        let mut out = Vec::new();
        for (k, v) in find_prefix(self.kv(), "meta:")? {
            let Some(br) = k.strip_prefix("meta:").and_then(BlobRef::parse_opt) else {
                continue;
            };
            if let Some((_, mime)) = v.split_once('|') {
                if camli_type_from_mime(mime) == Some(hoard_schema::CamliType::Permanode) {
                    out.push(br);
                }
            }
        }
        Ok(out)
    }
}

/// Decode a `claim|` row back into a claim.
fn kv_claim(k: &str, v: &str) -> Option<IndexedClaim> {
    let kp: Vec<&str> = k.split('|').collect();
    let vp: Vec<&str> = v.split('|').collect();
    if kp.len() != 5 || vp.len() != 4 {
        return None;
    }
    Some(IndexedClaim {
        permanode: BlobRef::parse_opt(kp[1])?,
        date: parse_claim_date(kp[3]).ok()?,
        blob_ref: BlobRef::parse_opt(kp[4])?,
        claim_type: ClaimType::from_name(&urld(vp[0]))?,
        attr: urld(vp[1]),
        value: urld(vp[2]),
        signer: BlobRef::parse_opt(vp[3])?,
    })
}
