use std::io::{self, Read, Seek, SeekFrom};

use hoard_types::BlobRef;

use crate::envelope::{CamliType, PartRef, SchemaBlob};
use crate::error::{SchemaError, SchemaResult};
use crate::sign::Fetcher;

// Nested `bytes` indirection is shallow in practice; content addressing
// rules out cycles, this bounds a maliciously deep tree.
const MAX_DEPTH: usize = 32;

#[derive(Clone, Debug)]
struct Span {
    offset: u64,
    size: u64,
    blob: BlobRef,
}

/// Lazy, seekable view over a `file` (or `bytes`) schema tree.
///
/// The part list is resolved up front — nested `bytes` blobs flattened
/// into spans — but chunk data is fetched on demand, one chunk cached at a
/// time.
pub struct FileReader<F: Fetcher> {
    fetcher: F,
    spans: Vec<Span>,
    size: u64,
    pos: u64,
    cached: Option<(usize, Vec<u8>)>,
}

impl<F: Fetcher> FileReader<F> {
    pub fn new(fetcher: F, file_blob: &SchemaBlob) -> SchemaResult<Self> {
        if !matches!(file_blob.camli_type(), CamliType::File | CamliType::Bytes) {
            return Err(SchemaError::BadField {
                field: "camliType",
                reason: format!("cannot read {} as a file", file_blob.camli_type()),
            });
        }
        let mut spans = Vec::new();
        let mut offset = 0u64;
        flatten(&fetcher, file_blob, &mut spans, &mut offset, 0)?;
        Ok(Self {
            fetcher,
            spans,
            size: offset,
            pos: 0,
            cached: None,
        })
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Read the whole tree into memory.
    pub fn read_all(&mut self) -> SchemaResult<Vec<u8>> {
        self.seek(SeekFrom::Start(0))?;
        let mut out = Vec::with_capacity(self.size as usize);
        self.read_to_end(&mut out)?;
        Ok(out)
    }

    fn span_at(&self, pos: u64) -> Option<usize> {
        // Spans are contiguous and sorted by offset.
        let idx = self.spans.partition_point(|s| s.offset + s.size <= pos);
        (idx < self.spans.len()).then_some(idx)
    }

    fn chunk(&mut self, idx: usize) -> io::Result<&[u8]> {
        if self.cached.as_ref().map(|(i, _)| *i) != Some(idx) {
            let span = &self.spans[idx];
            let data = self
                .fetcher
                .fetch_blob(&span.blob)
                .map_err(|e| io::Error::other(e.to_string()))?;
            if data.len() as u64 != span.size {
                return Err(io::Error::other(format!(
                    "chunk {} is {} bytes, schema says {}",
                    span.blob,
                    data.len(),
                    span.size
                )));
            }
            self.cached = Some((idx, data));
        }
        Ok(&self.cached.as_ref().expect("just cached").1)
    }
}

fn flatten<F: Fetcher>(
    fetcher: &F,
    blob: &SchemaBlob,
    spans: &mut Vec<Span>,
    offset: &mut u64,
    depth: usize,
) -> SchemaResult<()> {
    if depth > MAX_DEPTH {
        return Err(SchemaError::BadField {
            field: "parts",
            reason: "bytes nesting too deep".into(),
        });
    }
    for part in blob.parts()? {
        match part.part_ref {
            PartRef::Blob(br) => {
                if part.size > 0 {
                    spans.push(Span {
                        offset: *offset,
                        size: part.size,
                        blob: br,
                    });
                    *offset += part.size;
                }
            }
            PartRef::Bytes(br) => {
                let bytes = fetcher.fetch_blob(&br)?;
                let nested = SchemaBlob::parse(&br, &bytes)?;
                if nested.camli_type() != CamliType::Bytes {
                    return Err(SchemaError::BadField {
                        field: "parts",
                        reason: format!("bytesRef {br} is a {}", nested.camli_type()),
                    });
                }
                flatten(fetcher, &nested, spans, offset, depth + 1)?;
            }
        }
    }
    Ok(())
}

impl<F: Fetcher> Read for FileReader<F> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pos >= self.size || buf.is_empty() {
            return Ok(0);
        }
        let Some(idx) = self.span_at(self.pos) else {
            return Ok(0);
        };
        let span_offset = self.spans[idx].offset;
        let pos = self.pos;
        let chunk = self.chunk(idx)?;
        let start = (pos - span_offset) as usize;
        let n = (chunk.len() - start).min(buf.len());
        buf[..n].copy_from_slice(&chunk[start..start + n]);
        self.pos += n as u64;
        Ok(n)
    }
}

impl<F: Fetcher> Seek for FileReader<F> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(n) => n as i64,
            SeekFrom::End(n) => self.size as i64 + n,
            SeekFrom::Current(n) => self.pos as i64 + n,
        };
        if target < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek before start",
            ));
        }
        self.pos = target as u64;
        Ok(self.pos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filewriter::{tests::pseudo_random, write_file_bytes};
    use crate::sign::StoreFetcher;
    use hoard_store::{fetch_bytes, MemoryStore};

    fn open<'a>(store: &'a MemoryStore, root: &BlobRef) -> FileReader<StoreFetcher<'a>> {
        let bytes = fetch_bytes(store, root).unwrap();
        let sb = SchemaBlob::parse(root, &bytes).unwrap();
        FileReader::new(StoreFetcher(store), &sb).unwrap()
    }

    #[test]
    fn roundtrip_small() {
        let store = MemoryStore::new();
        let root = write_file_bytes(&store, "s.txt", b"tiny contents").unwrap();
        let mut fr = open(&store, &root);
        assert_eq!(fr.size(), 13);
        assert_eq!(fr.read_all().unwrap(), b"tiny contents");
    }

    #[test]
    fn roundtrip_multi_chunk() {
        let store = MemoryStore::new();
        let data = pseudo_random(3 << 20);
        let root = write_file_bytes(&store, "big.bin", &data).unwrap();
        let mut fr = open(&store, &root);
        assert_eq!(fr.size(), data.len() as u64);
        assert_eq!(fr.read_all().unwrap(), data);
    }

    #[test]
    fn seek_and_read_mid_file() {
        let store = MemoryStore::new();
        let data = pseudo_random(1 << 20);
        let root = write_file_bytes(&store, "seek.bin", &data).unwrap();
        let mut fr = open(&store, &root);

        let off = 700_000u64;
        fr.seek(SeekFrom::Start(off)).unwrap();
        let mut got = vec![0u8; 1024];
        fr.read_exact(&mut got).unwrap();
        assert_eq!(got, data[off as usize..off as usize + 1024]);
    }

    #[test]
    fn missing_chunk_surfaces_as_read_error() {
        let store = MemoryStore::new();
        let data = pseudo_random(200 << 10);
        let root = write_file_bytes(&store, "gone.bin", &data).unwrap();
        // Remove one data chunk out from under the reader.
        let root_bytes = fetch_bytes(&store, &root).unwrap();
        let sb = SchemaBlob::parse(&root, &root_bytes).unwrap();
        let parts = sb.parts().unwrap();
        if let PartRef::Blob(first) = &parts[0].part_ref {
            use hoard_store::BlobStore as _;
            store.remove(std::slice::from_ref(first)).unwrap();
        }
        let mut fr = FileReader::new(StoreFetcher(&store), &sb).unwrap();
        assert!(fr.read_all().is_err());
    }
}
