use std::sync::Arc;

use chrono::{DateTime, Utc};
use hoard_index::{Index, RecentPermanode};
use hoard_schema::CamliType;
use hoard_types::BlobRef;
use serde::Serialize;

use crate::constraint::{Constraint, FileConstraint, PermanodeConstraint, SearchQuery};
use crate::describe::{describe, DescribeResponse};
use crate::error::{SearchError, SearchResult};
use crate::expr::parse_expression;

const DEFAULT_LIMIT: usize = 1000;

/// Answers search requests against the index.
pub struct SearchHandler {
    index: Arc<Index>,
    /// The single owner's public-key blob; scopes signer-keyed queries.
    owner: Option<BlobRef>,
}

#[derive(Clone, Debug, Serialize)]
pub struct QueryResponse {
    pub blobs: Vec<QueryResultBlob>,
}

#[derive(Clone, Debug, Serialize)]
pub struct QueryResultBlob {
    pub blob: BlobRef,
}

#[derive(Clone, Debug, Serialize)]
pub struct RecentResponse {
    pub recent: Vec<RecentPermanode>,
}

#[derive(Clone, Debug, Serialize)]
pub struct ClaimsResponse {
    pub claims: Vec<ClaimDescription>,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimDescription {
    pub blob_ref: BlobRef,
    pub signer: BlobRef,
    pub permanode: BlobRef,
    #[serde(rename = "type")]
    pub claim_type: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub attr: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub value: String,
    pub date: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize)]
pub struct WholeRefResponse {
    pub files: Vec<BlobRef>,
}

impl SearchHandler {
    pub fn new(index: Arc<Index>, owner: Option<BlobRef>) -> Self {
        Self { index, owner }
    }

    pub fn index(&self) -> &Index {
        &self.index
    }

    /// Run a query: an expression, a constraint tree, or (neither) the
    /// default all-non-hidden listing. Results are permanodes sorted by
    /// modification time, newest first.
    pub fn query(&self, q: &SearchQuery) -> SearchResult<QueryResponse> {
        let constraint = match (&q.expression, &q.constraint) {
            (Some(e), _) => parse_expression(e)?
                .constraint
                .expect("parse always yields a constraint"),
            (None, Some(c)) => c.clone(),
            (None, None) => Constraint::all_non_hidden(),
        };
        let limit = if q.limit == 0 { DEFAULT_LIMIT } else { q.limit };

        let mut matched: Vec<(BlobRef, Option<DateTime<Utc>>)> = Vec::new();
        for pn in self.index.all_permanodes()? {
            if self.index.is_deleted(&pn) {
                continue;
            }
            if self.matches(&pn, &constraint)? {
                let mtime = self.index.permanode_modtime(&pn)?;
                matched.push((pn, mtime));
            }
        }
        matched.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        matched.truncate(limit);
        Ok(QueryResponse {
            blobs: matched
                .into_iter()
                .map(|(blob, _)| QueryResultBlob { blob })
                .collect(),
        })
    }

    pub fn recent(
        &self,
        limit: usize,
        before: Option<DateTime<Utc>>,
    ) -> SearchResult<RecentResponse> {
        let limit = if limit == 0 { 50 } else { limit };
        Ok(RecentResponse {
            recent: self.index.recent_permanodes(before, limit)?,
        })
    }

    pub fn claims(&self, permanode: &BlobRef) -> SearchResult<ClaimsResponse> {
        let claims = self
            .index
            .claims_of(permanode, None, None)?
            .into_iter()
            .map(|c| ClaimDescription {
                blob_ref: c.blob_ref,
                signer: c.signer,
                permanode: c.permanode,
                claim_type: c.claim_type.name().to_string(),
                attr: c.attr,
                value: c.value,
                date: c.date,
            })
            .collect();
        Ok(ClaimsResponse { claims })
    }

    pub fn describe(&self, br: &BlobRef, depth: usize) -> SearchResult<DescribeResponse> {
        describe(&self.index, br, depth)
    }

    /// Permanodes of the owner carrying `attr = value` (or any value when
    /// `value` is empty).
    pub fn permanodes_with_attr(
        &self,
        attr: &str,
        value: &str,
        max: usize,
    ) -> SearchResult<Vec<BlobRef>> {
        if attr.is_empty() {
            return Err(SearchError::BadQuery("missing attribute".into()));
        }
        let key_id = self.owner_key_id()?;
        let max = if max == 0 { 100 } else { max };
        Ok(self
            .index
            .search_permanodes_with_attr(&key_id, attr, value, max)?)
    }

    /// File schema blobs whose contents hash to `whole`.
    pub fn files_by_whole_ref(&self, whole: &BlobRef) -> SearchResult<WholeRefResponse> {
        Ok(WholeRefResponse {
            files: self.index.existing_file_schemas(whole)?,
        })
    }

    pub fn paths_of_target(
        &self,
        target: &BlobRef,
    ) -> SearchResult<Vec<hoard_index::PathClaim>> {
        let key_id = self.owner_key_id()?;
        Ok(self.index.paths_of_signer_target(&key_id, target)?)
    }

    fn owner_key_id(&self) -> SearchResult<String> {
        let owner = self
            .owner
            .as_ref()
            .ok_or_else(|| SearchError::BadQuery("no owner configured".into()))?;
        self.index
            .key_id(owner)?
            .ok_or_else(|| SearchError::BadQuery("owner key not indexed yet".into()))
    }

    // ---- constraint evaluation ----------------------------------------

    fn matches(&self, br: &BlobRef, c: &Constraint) -> SearchResult<bool> {
        if let Some(l) = &c.logical {
            return Ok(match l.op.as_str() {
                "and" => {
                    self.matches(br, &l.a)?
                        && match &l.b {
                            Some(b) => self.matches(br, b)?,
                            None => true,
                        }
                }
                "or" => {
                    self.matches(br, &l.a)?
                        || match &l.b {
                            Some(b) => self.matches(br, b)?,
                            None => false,
                        }
                }
                "not" => !self.matches(br, &l.a)?,
                other => {
                    return Err(SearchError::BadQuery(format!(
                        "unknown logical op {other:?}"
                    )))
                }
            });
        }
        if let Some(pc) = &c.permanode {
            return self.matches_permanode(br, pc);
        }
        if let Some(fc) = &c.file {
            return self.matches_file(br, fc);
        }
        // An empty constraint matches everything.
        Ok(true)
    }

    fn matches_permanode(&self, br: &BlobRef, pc: &PermanodeConstraint) -> SearchResult<bool> {
        let Some(meta) = self.index.get_blob_meta(br)? else {
            return Ok(false);
        };
        if meta.camli_type != Some(CamliType::Permanode) {
            return Ok(false);
        }
        if pc.skip_hidden {
            let vis = self.index.attr_values(br, "camliDefVis", None)?;
            if vis.iter().any(|v| v == "hide") {
                return Ok(false);
            }
        }
        let Some(attr) = &pc.attr else {
            return Ok(true);
        };
        let values = self.index.attr_values(br, attr, None)?;
        if let Some(want) = &pc.value {
            if !values.iter().any(|v| v == want) {
                return Ok(false);
            }
        }
        if let Some(sc) = &pc.value_matches {
            if !values.iter().any(|v| sc.matches(v)) {
                return Ok(false);
            }
        }
        if let Some(sub) = &pc.value_in_set {
            let mut any = false;
            for v in &values {
                if let Some(child) = BlobRef::parse_opt(v) {
                    if self.matches(&child, sub)? {
                        any = true;
                        break;
                    }
                }
            }
            if !any {
                return Ok(false);
            }
        }
        if pc.value.is_none() && pc.value_matches.is_none() && pc.value_in_set.is_none() {
            // Bare attr constraint: any value counts.
            return Ok(!values.is_empty());
        }
        Ok(true)
    }

    fn matches_file(&self, br: &BlobRef, fc: &FileConstraint) -> SearchResult<bool> {
        let Some(info) = self.index.file_info(br)? else {
            return Ok(false);
        };
        if fc.is_image && !info.is_image() {
            return Ok(false);
        }
        if let Some(want) = &fc.mime_type {
            if &info.mime_type != want {
                return Ok(false);
            }
        }
        if let Some(sc) = &fc.file_name {
            if !sc.matches(&info.file_name) {
                return Ok(false);
            }
        }
        if fc.width.is_some() || fc.height.is_some() || fc.wh_ratio.is_some() {
            let Some((w, h)) = self.index.image_size(br)? else {
                return Ok(false);
            };
            if let Some(ic) = &fc.width {
                if !ic.matches(w as i64) {
                    return Ok(false);
                }
            }
            if let Some(ic) = &fc.height {
                if !ic.matches(h as i64) {
                    return Ok(false);
                }
            }
            if let Some(rc) = &fc.wh_ratio {
                if h == 0 || !rc.matches(w as f64 / h as f64) {
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }
}
