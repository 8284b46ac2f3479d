use base64::Engine;
use chrono::{DateTime, Utc};
use hoard_types::{format_claim_date, BlobRef};
use rand::RngCore;
use serde_json::{Map, Number, Value};

use crate::envelope::{CamliType, ClaimType, Part, PartRef};
use crate::error::SchemaResult;
use crate::sign::Signer;

/// Builds the canonical JSON form of a schema blob.
///
/// Field order is insertion order and is part of the wire format:
/// `camliVersion` always comes first so the magic prefix holds.
#[derive(Clone, Debug)]
pub struct Builder {
    map: Map<String, Value>,
}

impl Builder {
    pub fn new(t: CamliType) -> Self {
        let mut map = Map::new();
        map.insert("camliVersion".into(), Value::Number(Number::from(1u32)));
        map.insert("camliType".into(), Value::String(t.name().into()));
        Self { map }
    }

    fn set(mut self, key: &str, value: Value) -> Self {
        self.map.insert(key.into(), value);
        self
    }

    pub fn set_file_name(self, name: &str) -> Self {
        self.set("fileName", Value::String(name.into()))
    }

    pub fn set_mod_time(self, t: DateTime<Utc>) -> Self {
        self.set("modTime", Value::String(format_claim_date(t)))
    }

    pub fn set_parts(self, parts: &[Part]) -> Self {
        let arr: Vec<Value> = parts
            .iter()
            .map(|p| {
                let mut obj = Map::new();
                match &p.part_ref {
                    PartRef::Blob(br) => {
                        obj.insert("blobRef".into(), Value::String(br.to_string()));
                    }
                    PartRef::Bytes(br) => {
                        obj.insert("bytesRef".into(), Value::String(br.to_string()));
                    }
                }
                obj.insert("size".into(), Value::Number(Number::from(p.size)));
                Value::Object(obj)
            })
            .collect();
        self.set("parts", Value::Array(arr))
    }

    pub fn set_entries(self, static_set: &BlobRef) -> Self {
        self.set("entries", Value::String(static_set.to_string()))
    }

    pub fn set_members(self, members: &[BlobRef]) -> Self {
        let arr = members
            .iter()
            .map(|m| Value::String(m.to_string()))
            .collect();
        self.set("members", Value::Array(arr))
    }

    /// Serialize the (unsigned) canonical JSON.
    pub fn build(&self) -> String {
        serde_json::to_string(&Value::Object(self.map.clone())).expect("map serializes")
    }

    /// Serialize, sign, and return the final signed blob bytes.
    pub fn sign(mut self, signer: &Signer) -> SchemaResult<String> {
        // camliSigner participates in the signed payload.
        self.map.insert(
            "camliSigner".into(),
            Value::String(signer.public_key_ref().to_string()),
        );
        signer.sign_json(&self.build())
    }
}

/// A fresh permanode envelope: inert content plus a random nonce so every
/// permanode is a distinct blob.
pub fn permanode() -> Builder {
    let mut nonce = [0u8; 20];
    rand::thread_rng().fill_bytes(&mut nonce);
    Builder::new(CamliType::Permanode).set(
        "random",
        Value::String(base64::engine::general_purpose::STANDARD.encode(nonce)),
    )
}

/// An attribute claim against `permanode`. `claim_type` must not be
/// `Delete`; use [`delete_claim`] for that.
pub fn attribute_claim(
    permanode: &BlobRef,
    claim_type: ClaimType,
    attr: &str,
    value: &str,
    date: DateTime<Utc>,
) -> Builder {
    debug_assert!(claim_type != ClaimType::Delete);
    Builder::new(CamliType::Claim)
        .set("claimDate", Value::String(format_claim_date(date)))
        .set("claimType", Value::String(claim_type.name().into()))
        .set("attribute", Value::String(attr.into()))
        .set("value", Value::String(value.into()))
        .set("permaNode", Value::String(permanode.to_string()))
}

/// A delete claim against `target` (a permanode or another claim).
pub fn delete_claim(target: &BlobRef, date: DateTime<Utc>) -> Builder {
    Builder::new(CamliType::Claim)
        .set("claimDate", Value::String(format_claim_date(date)))
        .set("claimType", Value::String(ClaimType::Delete.name().into()))
        .set("target", Value::String(target.to_string()))
}

pub fn file(name: &str, mod_time: Option<DateTime<Utc>>, parts: &[Part]) -> Builder {
    let mut b = Builder::new(CamliType::File).set_file_name(name);
    if let Some(t) = mod_time {
        b = b.set_mod_time(t);
    }
    b.set_parts(parts)
}

pub fn bytes(parts: &[Part]) -> Builder {
    Builder::new(CamliType::Bytes).set_parts(parts)
}

pub fn static_set(members: &[BlobRef]) -> Builder {
    Builder::new(CamliType::StaticSet).set_members(members)
}

pub fn directory(name: &str, entries: &BlobRef) -> Builder {
    Builder::new(CamliType::Directory)
        .set_file_name(name)
        .set_entries(entries)
}

/// A haveref share: possession of the share blob's ref grants read access
/// to `target` (and, if `transitive`, to everything reachable from it).
pub fn share(target: &BlobRef, transitive: bool) -> Builder {
    Builder::new(CamliType::Share)
        .set("authType", Value::String("haveref".into()))
        .set("target", Value::String(target.to_string()))
        .set("transitive", Value::Bool(transitive))
}
