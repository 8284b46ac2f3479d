use hoard_schema::{CamliType, SchemaBlob, MAGIC_PREFIX};
use hoard_types::BlobRef;

/// How much of a blob the sniffer buffers: enough to parse any schema blob
/// (tuned just under the chunker's max chunk, well under the max blob
/// size).
pub const MAX_SNIFF: usize = 900 << 10;

const SCHEMA_MIME_PREFIX: &str = "application/json; camliType=";

/// Buffers a bounded prefix of a blob while it streams past, then decides
/// whether the blob is a schema blob and what MIME type to record.
///
/// The caller can replay the buffered prefix via [`body`](Sniffer::body)
/// followed by the remainder of its own stream, so nothing is fetched
/// twice.
pub struct Sniffer {
    blob_ref: BlobRef,
    buf: Vec<u8>,
    written: u64,
    schema: Option<SchemaBlob>,
}

impl Sniffer {
    pub fn new(blob_ref: BlobRef) -> Self {
        Self {
            blob_ref,
            buf: Vec::new(),
            written: 0,
            schema: None,
        }
    }

    /// Total bytes seen (not just buffered).
    pub fn size(&self) -> u64 {
        self.written
    }

    /// The buffered prefix.
    pub fn body(&self) -> &[u8] {
        &self.buf
    }

    /// True when the blob was larger than the sniff buffer.
    pub fn is_truncated(&self) -> bool {
        self.written > self.buf.len() as u64
    }

    /// Attempt schema detection over the buffered prefix. Call after the
    /// whole blob has been written.
    pub fn parse(&mut self) {
        if self.is_truncated() || !self.buf.starts_with(MAGIC_PREFIX) {
            return;
        }
        self.schema = SchemaBlob::parse(&self.blob_ref, &self.buf).ok();
    }

    pub fn schema_blob(&self) -> Option<&SchemaBlob> {
        self.schema.as_ref()
    }

    /// The MIME type recorded in the blob's `meta:` row. Schema blobs get
    /// `application/json; camliType=<type>` so the kind survives in the
    /// index; everything else is sniffed from magic bytes.
    pub fn mime_type(&self) -> String {
        match &self.schema {
            Some(sb) => format!("{SCHEMA_MIME_PREFIX}{}", sb.camli_type()),
            None => mime_from_magic(&self.buf).to_string(),
        }
    }
}

impl std::io::Write for Sniffer {
    fn write(&mut self, data: &[u8]) -> std::io::Result<usize> {
        self.written += data.len() as u64;
        let room = MAX_SNIFF.saturating_sub(self.buf.len());
        self.buf.extend_from_slice(&data[..data.len().min(room)]);
        Ok(data.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Recover the schema kind from a `meta:` row MIME value.
pub fn camli_type_from_mime(mime: &str) -> Option<CamliType> {
    mime.strip_prefix(SCHEMA_MIME_PREFIX)
        .and_then(CamliType::from_name)
}

/// Best-effort MIME detection from leading magic bytes.
pub fn mime_from_magic(buf: &[u8]) -> &'static str {
    if buf.starts_with(&[0xff, 0xd8, 0xff]) {
        return "image/jpeg";
    }
    if buf.starts_with(&[0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a]) {
        return "image/png";
    }
    if buf.starts_with(b"GIF87a") || buf.starts_with(b"GIF89a") {
        return "image/gif";
    }
    if buf.starts_with(b"ID3") || buf.starts_with(&[0xff, 0xfb]) {
        return "audio/mpeg";
    }
    if buf.starts_with(b"%PDF") {
        return "application/pdf";
    }
    if buf.starts_with(b"PK\x03\x04") {
        return "application/zip";
    }
    if !buf.is_empty() && std::str::from_utf8(buf).is_ok() && !buf.contains(&0) {
        return "text/plain; charset=utf-8";
    }
    "application/octet-stream"
}
