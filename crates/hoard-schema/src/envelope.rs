use chrono::{DateTime, Utc};
use hoard_types::{parse_claim_date, BlobRef};
use serde_json::{Map, Value};

use crate::error::{SchemaError, SchemaResult};

/// Every schema blob starts with exactly these bytes.
pub const MAGIC_PREFIX: &[u8] = br#"{"camliVersion""#;

/// The recognized `camliType` discriminators.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CamliType {
    File,
    Bytes,
    Directory,
    StaticSet,
    Permanode,
    Claim,
    Share,
}

impl CamliType {
    pub fn name(&self) -> &'static str {
        match self {
            CamliType::File => "file",
            CamliType::Bytes => "bytes",
            CamliType::Directory => "directory",
            CamliType::StaticSet => "static-set",
            CamliType::Permanode => "permanode",
            CamliType::Claim => "claim",
            CamliType::Share => "share",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "file" => CamliType::File,
            "bytes" => CamliType::Bytes,
            "directory" => CamliType::Directory,
            "static-set" => CamliType::StaticSet,
            "permanode" => CamliType::Permanode,
            "claim" => CamliType::Claim,
            "share" => CamliType::Share,
            _ => return None,
        })
    }
}

impl std::fmt::Display for CamliType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// The kinds of attribute mutation a claim can carry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClaimType {
    SetAttribute,
    AddAttribute,
    DelAttribute,
    Delete,
}

impl ClaimType {
    pub fn name(&self) -> &'static str {
        match self {
            ClaimType::SetAttribute => "set-attribute",
            ClaimType::AddAttribute => "add-attribute",
            ClaimType::DelAttribute => "del-attribute",
            ClaimType::Delete => "delete",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "set-attribute" => ClaimType::SetAttribute,
            "add-attribute" => ClaimType::AddAttribute,
            "del-attribute" => ClaimType::DelAttribute,
            "delete" => ClaimType::Delete,
            _ => return None,
        })
    }
}

impl std::fmt::Display for ClaimType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// One chunk reference inside a `file` or `bytes` blob.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Part {
    pub size: u64,
    pub part_ref: PartRef,
}

/// A part points either at a raw data blob or at a nested `bytes` blob.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PartRef {
    Blob(BlobRef),
    Bytes(BlobRef),
}

/// A claim decoded from a schema blob (not yet verified).
#[derive(Clone, Debug)]
pub struct Claim {
    /// The claim blob itself.
    pub blob_ref: BlobRef,
    /// The signer's public-key blob.
    pub signer: BlobRef,
    pub claim_type: ClaimType,
    /// Mutated permanode, for attribute claims.
    pub permanode: Option<BlobRef>,
    /// Deleted blob, for delete claims.
    pub target: Option<BlobRef>,
    pub attr: String,
    pub value: String,
    pub date: DateTime<Utc>,
    /// The original fixed-width date string, used verbatim in index keys.
    pub date_string: String,
}

/// A parsed schema blob: the raw bytes, the decoded JSON object, and the
/// recognized type.
#[derive(Clone, Debug)]
pub struct SchemaBlob {
    blob_ref: BlobRef,
    bytes: Vec<u8>,
    json: Map<String, Value>,
    camli_type: CamliType,
}

impl SchemaBlob {
    /// Parse `bytes` as the schema blob named by `br`.
    ///
    /// Fails with [`SchemaError::NotSchema`] when the magic prefix is
    /// absent or the JSON doesn't decode to an object, and with
    /// [`SchemaError::UnknownType`] for unrecognized `camliType` values.
    pub fn parse(br: &BlobRef, bytes: &[u8]) -> SchemaResult<Self> {
        if !bytes.starts_with(MAGIC_PREFIX) {
            return Err(SchemaError::NotSchema);
        }
        let value: Value = serde_json::from_slice(bytes)?;
        let Value::Object(json) = value else {
            return Err(SchemaError::NotSchema);
        };
        match json.get("camliVersion") {
            Some(Value::Number(n)) if n.as_u64() == Some(1) => {}
            _ => return Err(SchemaError::NotSchema),
        }
        let type_name = json
            .get("camliType")
            .and_then(Value::as_str)
            .ok_or(SchemaError::MissingField("camliType"))?;
        let camli_type = CamliType::from_name(type_name)
            .ok_or_else(|| SchemaError::UnknownType(type_name.to_string()))?;
        Ok(Self {
            blob_ref: br.clone(),
            bytes: bytes.to_vec(),
            json,
            camli_type,
        })
    }

    pub fn blob_ref(&self) -> &BlobRef {
        &self.blob_ref
    }

    pub fn camli_type(&self) -> CamliType {
        self.camli_type
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn json(&self) -> &Map<String, Value> {
        &self.json
    }

    fn str_field(&self, field: &'static str) -> Option<&str> {
        self.json.get(field).and_then(Value::as_str)
    }

    fn ref_field(&self, field: &'static str) -> SchemaResult<BlobRef> {
        let s = self
            .str_field(field)
            .ok_or(SchemaError::MissingField(field))?;
        BlobRef::parse(s).map_err(|e| SchemaError::BadField {
            field,
            reason: e.to_string(),
        })
    }

    // ---- file / bytes ----

    pub fn file_name(&self) -> Option<&str> {
        self.str_field("fileName")
    }

    pub fn mod_time(&self) -> Option<DateTime<Utc>> {
        self.str_field("modTime")
            .and_then(|s| parse_claim_date(s).ok())
    }

    /// The chunk list of a `file` or `bytes` blob.
    pub fn parts(&self) -> SchemaResult<Vec<Part>> {
        let raw = self
            .json
            .get("parts")
            .and_then(Value::as_array)
            .ok_or(SchemaError::MissingField("parts"))?;
        let mut out = Vec::with_capacity(raw.len());
        for entry in raw {
            let obj = entry.as_object().ok_or(SchemaError::BadField {
                field: "parts",
                reason: "part is not an object".into(),
            })?;
            let size = obj
                .get("size")
                .and_then(Value::as_u64)
                .ok_or(SchemaError::BadField {
                    field: "parts",
                    reason: "part missing size".into(),
                })?;
            let part_ref = if let Some(s) = obj.get("blobRef").and_then(Value::as_str) {
                PartRef::Blob(BlobRef::parse(s).map_err(|e| SchemaError::BadField {
                    field: "parts",
                    reason: e.to_string(),
                })?)
            } else if let Some(s) = obj.get("bytesRef").and_then(Value::as_str) {
                PartRef::Bytes(BlobRef::parse(s).map_err(|e| SchemaError::BadField {
                    field: "parts",
                    reason: e.to_string(),
                })?)
            } else {
                return Err(SchemaError::BadField {
                    field: "parts",
                    reason: "part has neither blobRef nor bytesRef".into(),
                });
            };
            out.push(Part { size, part_ref });
        }
        Ok(out)
    }

    /// Declared total size: the sum of part sizes.
    pub fn parts_size(&self) -> SchemaResult<u64> {
        Ok(self.parts()?.iter().map(|p| p.size).sum())
    }

    // ---- directory / static-set ----

    /// The static-set ref a `directory` blob points at.
    pub fn entries(&self) -> SchemaResult<BlobRef> {
        self.ref_field("entries")
    }

    /// Members of a `static-set` blob.
    pub fn members(&self) -> SchemaResult<Vec<BlobRef>> {
        let raw = self
            .json
            .get("members")
            .and_then(Value::as_array)
            .ok_or(SchemaError::MissingField("members"))?;
        raw.iter()
            .map(|v| {
                let s = v.as_str().ok_or(SchemaError::BadField {
                    field: "members",
                    reason: "member is not a string".into(),
                })?;
                BlobRef::parse(s).map_err(|e| SchemaError::BadField {
                    field: "members",
                    reason: e.to_string(),
                })
            })
            .collect()
    }

    // ---- claims ----

    /// The signer's public-key blob ref, if present.
    pub fn signer(&self) -> Option<BlobRef> {
        self.str_field("camliSigner").and_then(BlobRef::parse_opt)
    }

    /// Decode this blob as a claim. The signature is NOT checked here;
    /// that's [`crate::sign::verify`]'s job.
    pub fn as_claim(&self) -> SchemaResult<Claim> {
        if self.camli_type != CamliType::Claim {
            return Err(SchemaError::BadField {
                field: "camliType",
                reason: format!("expected claim, got {}", self.camli_type),
            });
        }
        let signer = self.ref_field("camliSigner")?;
        let type_name = self
            .str_field("claimType")
            .ok_or(SchemaError::MissingField("claimType"))?;
        let claim_type =
            ClaimType::from_name(type_name).ok_or_else(|| SchemaError::BadField {
                field: "claimType",
                reason: format!("unknown claim type {type_name}"),
            })?;
        let date_string = self
            .str_field("claimDate")
            .ok_or(SchemaError::MissingField("claimDate"))?
            .to_string();
        let date = parse_claim_date(&date_string).map_err(|e| SchemaError::BadField {
            field: "claimDate",
            reason: e.to_string(),
        })?;
        let (permanode, target) = match claim_type {
            ClaimType::Delete => (None, Some(self.ref_field("target")?)),
            _ => (Some(self.ref_field("permaNode")?), None),
        };
        Ok(Claim {
            blob_ref: self.blob_ref.clone(),
            signer,
            claim_type,
            permanode,
            target,
            attr: self.str_field("attribute").unwrap_or_default().to_string(),
            value: self.str_field("value").unwrap_or_default().to_string(),
            date,
            date_string,
        })
    }

    // ---- share ----

    pub fn share_auth_type(&self) -> Option<&str> {
        self.str_field("authType")
    }

    pub fn share_target(&self) -> Option<BlobRef> {
        self.str_field("target").and_then(BlobRef::parse_opt)
    }

    pub fn share_transitive(&self) -> bool {
        self.json
            .get("transitive")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(bytes: &[u8]) -> SchemaResult<SchemaBlob> {
        SchemaBlob::parse(&BlobRef::sha1_of(bytes), bytes)
    }

    #[test]
    fn rejects_non_magic_prefix() {
        assert!(matches!(parse(b"not json"), Err(SchemaError::NotSchema)));
        assert!(matches!(
            parse(br#"{"camliType":"file","camliVersion":1}"#),
            Err(SchemaError::NotSchema)
        ));
    }

    #[test]
    fn rejects_unknown_type() {
        let bytes = br#"{"camliVersion":1,"camliType":"frobnicator"}"#;
        assert!(matches!(parse(bytes), Err(SchemaError::UnknownType(_))));
    }

    #[test]
    fn parses_file_with_parts() {
        let chunk = BlobRef::sha1_of(b"chunk");
        let nested = BlobRef::sha1_of(b"nested");
        let bytes = format!(
            r#"{{"camliVersion":1,"camliType":"file","fileName":"a.txt","parts":[{{"blobRef":"{chunk}","size":5}},{{"bytesRef":"{nested}","size":7}}]}}"#
        );
        let sb = parse(bytes.as_bytes()).unwrap();
        assert_eq!(sb.camli_type(), CamliType::File);
        assert_eq!(sb.file_name(), Some("a.txt"));
        let parts = sb.parts().unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].part_ref, PartRef::Blob(chunk));
        assert_eq!(parts[1].part_ref, PartRef::Bytes(nested));
        assert_eq!(sb.parts_size().unwrap(), 12);
    }

    #[test]
    fn parses_static_set_members() {
        let m1 = BlobRef::sha1_of(b"m1");
        let m2 = BlobRef::sha1_of(b"m2");
        let bytes = format!(
            r#"{{"camliVersion":1,"camliType":"static-set","members":["{m1}","{m2}"]}}"#
        );
        let sb = parse(bytes.as_bytes()).unwrap();
        assert_eq!(sb.members().unwrap(), vec![m1, m2]);
    }

    #[test]
    fn parses_attribute_claim() {
        let signer = BlobRef::sha1_of(b"key");
        let pn = BlobRef::sha1_of(b"pn");
        let bytes = format!(
            r#"{{"camliVersion":1,"camliSigner":"{signer}","camliType":"claim","claimDate":"2013-02-03T04:05:06Z","claimType":"set-attribute","attribute":"title","value":"hi","permaNode":"{pn}"}}"#
        );
        let sb = parse(bytes.as_bytes()).unwrap();
        let claim = sb.as_claim().unwrap();
        assert_eq!(claim.claim_type, ClaimType::SetAttribute);
        assert_eq!(claim.permanode, Some(pn));
        assert_eq!(claim.target, None);
        assert_eq!(claim.attr, "title");
        assert_eq!(claim.value, "hi");
        assert_eq!(claim.date_string, "2013-02-03T04:05:06Z");
    }

    #[test]
    fn parses_delete_claim() {
        let signer = BlobRef::sha1_of(b"key");
        let target = BlobRef::sha1_of(b"victim");
        let bytes = format!(
            r#"{{"camliVersion":1,"camliSigner":"{signer}","camliType":"claim","claimDate":"2013-02-03T04:05:06Z","claimType":"delete","target":"{target}"}}"#
        );
        let claim = parse(bytes.as_bytes()).unwrap().as_claim().unwrap();
        assert_eq!(claim.claim_type, ClaimType::Delete);
        assert_eq!(claim.target, Some(target));
        assert_eq!(claim.permanode, None);
    }

    #[test]
    fn claim_with_bad_date_is_rejected() {
        let signer = BlobRef::sha1_of(b"key");
        let pn = BlobRef::sha1_of(b"pn");
        let bytes = format!(
            r#"{{"camliVersion":1,"camliSigner":"{signer}","camliType":"claim","claimDate":"yesterday","claimType":"set-attribute","attribute":"a","value":"v","permaNode":"{pn}"}}"#
        );
        let sb = parse(bytes.as_bytes()).unwrap();
        assert!(sb.as_claim().is_err());
    }

    #[test]
    fn parses_share() {
        let target = BlobRef::sha1_of(b"shared");
        let bytes = format!(
            r#"{{"camliVersion":1,"camliType":"share","authType":"haveref","target":"{target}","transitive":true}}"#
        );
        let sb = parse(bytes.as_bytes()).unwrap();
        assert_eq!(sb.share_auth_type(), Some("haveref"));
        assert_eq!(sb.share_target(), Some(target));
        assert!(sb.share_transitive());
    }
}
