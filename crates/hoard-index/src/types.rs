//! Row types the query layer returns.

use chrono::{DateTime, Utc};
use hoard_schema::{CamliType, ClaimType};
use hoard_types::BlobRef;
use serde::Serialize;

/// What the index knows about a blob from its `meta:` row.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlobMeta {
    pub blob_ref: BlobRef,
    pub size: u64,
    /// Recognized schema kind, decoded from the stored MIME type;
    /// `None` for opaque blobs.
    pub camli_type: Option<CamliType>,
    pub mime_type: String,
}

/// A claim as reconstructed from its index row.
#[derive(Clone, Debug)]
pub struct IndexedClaim {
    pub blob_ref: BlobRef,
    pub signer: BlobRef,
    pub permanode: BlobRef,
    pub claim_type: ClaimType,
    pub attr: String,
    pub value: String,
    pub date: DateTime<Utc>,
}

/// One page entry of the recent-permanodes query.
#[derive(Clone, Debug, Serialize)]
pub struct RecentPermanode {
    pub permanode: BlobRef,
    pub signer: BlobRef,
    #[serde(rename = "modTime")]
    pub mod_time: DateTime<Utc>,
}

/// File metadata from `fileinfo|` and `filetimes|` rows.
#[derive(Clone, Debug, Default, Serialize)]
pub struct FileInfo {
    #[serde(rename = "fileName")]
    pub file_name: String,
    pub size: u64,
    #[serde(rename = "mimeType", skip_serializing_if = "String::is_empty")]
    pub mime_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
}

impl FileInfo {
    pub fn is_image(&self) -> bool {
        self.mime_type.starts_with("image/")
    }
}

/// A `camliPath:<suffix>` claim row.
#[derive(Clone, Debug)]
pub struct PathClaim {
    pub claim: BlobRef,
    pub base: BlobRef,
    pub target: BlobRef,
    pub claim_date: DateTime<Utc>,
    pub suffix: String,
    pub active: bool,
}

/// A reverse reference: something pointing at `to`.
#[derive(Clone, Debug, Serialize)]
pub struct Edge {
    pub from: BlobRef,
    #[serde(rename = "fromType")]
    pub from_type: String,
    #[serde(rename = "fromTitle", skip_serializing_if = "String::is_empty")]
    pub from_title: String,
    pub to: BlobRef,
}
