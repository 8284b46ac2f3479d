//! The index key space: structured, pipe-delimited string keys over the
//! sorted KV store.
//!
//! Dates inside keys use the reverse-time encoding so that a forward range
//! scan within a prefix yields newest-first order.

use hoard_types::{reverse_time, BlobRef};

pub const SCHEMA_VERSION_KEY: &str = "schemaversion";

pub fn meta(br: &BlobRef) -> String {
    format!("meta:{br}")
}

pub fn meta_val(size: u64, mime: &str) -> String {
    format!("{size}|{mime}")
}

pub fn have(br: &BlobRef) -> String {
    format!("have:{br}")
}

pub fn signer_key_id(signer: &BlobRef) -> String {
    format!("signerkeyid:{signer}")
}

pub fn recent_permanode(key_id: &str, claim_date: &str, claim: &BlobRef) -> String {
    format!("recpn|{key_id}|{}|{claim}", reverse_time(claim_date))
}

pub fn permanode_claim(
    permanode: &BlobRef,
    key_id: &str,
    claim_date: &str,
    claim: &BlobRef,
) -> String {
    format!("claim|{permanode}|{key_id}|{claim_date}|{claim}")
}

pub fn permanode_claim_val(
    claim_type: &str,
    attr: &str,
    value: &str,
    signer: &BlobRef,
) -> String {
    format!("{}|{}|{}|{signer}", urle(claim_type), urle(attr), urle(value))
}

pub fn signer_attr_value(
    key_id: &str,
    attr: &str,
    value: &str,
    claim_date: &str,
    claim: &BlobRef,
) -> String {
    format!(
        "signerattrvalue|{key_id}|{}|{}|{}|{claim}",
        urle(attr),
        urle(value),
        reverse_time(claim_date)
    )
}

pub fn path_forward(
    key_id: &str,
    base: &BlobRef,
    suffix: &str,
    claim_date: &str,
    claim: &BlobRef,
) -> String {
    format!(
        "path|{key_id}|{base}|{}|{}|{claim}",
        urle(suffix),
        reverse_time(claim_date)
    )
}

pub fn path_forward_val(active: bool, target: &BlobRef) -> String {
    format!("{}|{target}", if active { "Y" } else { "N" })
}

pub fn path_backward(key_id: &str, target: &BlobRef, claim: &BlobRef) -> String {
    format!("signertargetpath|{key_id}|{target}|{claim}")
}

pub fn path_backward_val(claim_date: &str, base: &BlobRef, active: bool, suffix: &str) -> String {
    format!(
        "{claim_date}|{base}|{}|{}",
        if active { "Y" } else { "N" },
        urle(suffix)
    )
}

pub fn deleted(target: &BlobRef, claim_date: &str, claim: &BlobRef) -> String {
    format!("deleted|{target}|{}|{claim}", reverse_time(claim_date))
}

pub fn edge_backward(to: &BlobRef, from: &BlobRef, claim: &BlobRef) -> String {
    format!("edgeback|{to}|{from}|{claim}")
}

pub fn edge_backward_val(from_type: &str, from_title: &str) -> String {
    format!("{from_type}|{}", urle(from_title))
}

pub fn dir_child(dir: &BlobRef, child: &BlobRef) -> String {
    format!("dirchild|{dir}|{child}")
}

pub fn whole_to_file(whole: &BlobRef, file: &BlobRef) -> String {
    format!("wholetofile|{whole}|{file}")
}

pub fn file_info(file: &BlobRef) -> String {
    format!("fileinfo|{file}")
}

pub fn file_info_val(size: u64, name: &str, mime: &str) -> String {
    format!("{size}|{}|{mime}", urle(name))
}

pub fn file_times(file: &BlobRef) -> String {
    format!("filetimes|{file}")
}

pub fn image_size(file: &BlobRef) -> String {
    format!("imagesize|{file}")
}

pub fn image_size_val(width: u32, height: u32) -> String {
    format!("{width}|{height}")
}

pub fn exif_gps(whole: &BlobRef) -> String {
    format!("exifgps|{whole}")
}

pub fn exif_gps_val(lat: f64, long: f64) -> String {
    format!("{lat}|{long}")
}

pub fn exif_tag(whole: &BlobRef, tag_id: u16) -> String {
    format!("exiftag|{whole}|{tag_id:04x}")
}

pub fn media_tag(whole: &BlobRef, tag: &str) -> String {
    format!("mediatag|{whole}|{}", urle(tag))
}

/// Attributes worth a `signerattrvalue` row (exact-lookup allowlist).
pub fn is_indexed_attribute(attr: &str) -> bool {
    matches!(attr, "camliRoot" | "tag" | "title")
}

/// Attributes whose value is a blob ref, meriting a reverse edge.
pub fn is_blob_reference_attribute(attr: &str) -> bool {
    attr == "camliMember" || attr == "camliContent"
}

/// Percent-escape a string for embedding in a pipe-delimited row: `%`,
/// `|`, and non-printable bytes become `%XX`.
pub fn urle(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        if b == b'%' || b == b'|' || b < 0x20 || b == 0x7f {
            out.push('%');
            out.push_str(&format!("{b:02x}"));
        } else {
            out.push(b as char);
        }
    }
    out
}

/// Invert [`urle`]. Malformed escapes pass through untouched.
pub fn urld(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let Ok(v) = u8::from_str_radix(&s[i + 1..i + 3], 16) {
                out.push(v);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}
