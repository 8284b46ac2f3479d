//! Recursive blob description: metadata expansion to a bounded depth, the
//! backing of the `camli/search/describe` endpoint and the UI's detail
//! panes.

use std::collections::{BTreeMap, VecDeque};

use chrono::{DateTime, Utc};
use hoard_index::{FileInfo, Index};
use hoard_schema::CamliType;
use hoard_types::BlobRef;
use serde::Serialize;

use crate::error::SearchResult;

/// Version token baked into thumbnail URLs so clients re-fetch when the
/// thumbnailer changes.
pub const THUMB_VERSION: &str = "2";

#[derive(Clone, Debug, Serialize)]
pub struct DescribeResponse {
    /// Map from blob ref string to its description.
    pub meta: BTreeMap<String, DescribedBlob>,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DescribedBlob {
    pub blob_ref: BlobRef,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub camli_type: Option<String>,
    pub size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permanode: Option<DescribedPermanode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<FileInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<DescribedImage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DescribedPermanode {
    pub attr: BTreeMap<String, Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mod_time: Option<DateTime<Utc>>,
}

#[derive(Clone, Copy, Debug, Serialize)]
pub struct DescribedImage {
    pub width: u32,
    pub height: u32,
}

/// Describe `root` and everything it references, to `depth` hops.
pub fn describe(index: &Index, root: &BlobRef, depth: usize) -> SearchResult<DescribeResponse> {
    let mut meta = BTreeMap::new();
    let mut queue = VecDeque::new();
    queue.push_back((root.clone(), depth.max(1)));

    while let Some((br, depth_left)) = queue.pop_front() {
        let key = br.to_string();
        if meta.contains_key(&key) {
            continue;
        }
        let Some(blob_meta) = index.get_blob_meta(&br)? else {
            continue;
        };
        let mut described = DescribedBlob {
            blob_ref: br.clone(),
            camli_type: blob_meta.camli_type.map(|t| t.name().to_string()),
            size: blob_meta.size,
            permanode: None,
            file: None,
            image: None,
            thumbnail_url: None,
        };
        let mut children: Vec<BlobRef> = Vec::new();

        match blob_meta.camli_type {
            Some(CamliType::Permanode) => {
                let mut attr: BTreeMap<String, Vec<String>> = BTreeMap::new();
                for claim in index.claims_of(&br, None, None)? {
                    if claim.attr.is_empty() {
                        continue;
                    }
                    attr.entry(claim.attr.clone()).or_default();
                }
                for (name, values) in attr.iter_mut() {
                    *values = index.attr_values(&br, name, None)?;
                }
                attr.retain(|_, v| !v.is_empty());
                for values in attr.values() {
                    for v in values {
                        if let Some(child) = BlobRef::parse_opt(v) {
                            children.push(child);
                        }
                    }
                }
                described.permanode = Some(DescribedPermanode {
                    attr,
                    mod_time: index.permanode_modtime(&br)?,
                });
            }
            Some(CamliType::File) => {
                described.file = index.file_info(&br)?;
                if let Some((width, height)) = index.image_size(&br)? {
                    described.image = Some(DescribedImage { width, height });
                    described.thumbnail_url =
                        Some(format!("thumbnail/{br}?v={THUMB_VERSION}"));
                }
            }
            Some(CamliType::Directory) => {
                children.extend(index.dir_members(&br, 1000)?);
                described.file = index.file_info(&br)?;
            }
            _ => {}
        }

        meta.insert(key, described);
        if depth_left > 1 {
            for child in children {
                queue.push_back((child, depth_left - 1));
            }
        }
    }
    Ok(DescribeResponse { meta })
}
