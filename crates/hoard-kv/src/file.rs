use std::collections::BTreeMap;
use std::fs;
use std::ops::Bound;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use crate::error::{KvError, KvResult};
use crate::traits::{Batch, BatchOp, SortedKv};

const MAGIC: &[u8; 4] = b"HKV1";
const CHECKSUM_LEN: usize = 32;

/// Disk-persisted sorted KV: the full map is loaded at open and a snapshot
/// container is rewritten on every mutation.
///
/// Container layout: `HKV1` magic, bincode-encoded rows, then a 32-byte
/// BLAKE3 checksum over everything before it. Writes go to a sibling temp
/// file and rename into place, so a crash leaves either the old or the new
/// snapshot, never a torn one.
pub struct FileKv {
    path: PathBuf,
    rows: RwLock<BTreeMap<String, String>>,
}

impl FileKv {
    /// Open (or create) the snapshot at `path`.
    pub fn open(path: impl Into<PathBuf>) -> KvResult<Self> {
        let path = path.into();
        let rows = if path.exists() {
            load_snapshot(&path)?
        } else {
            BTreeMap::new()
        };
        Ok(Self {
            path,
            rows: RwLock::new(rows),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, rows: &BTreeMap<String, String>) -> KvResult<()> {
        let entries: Vec<(&String, &String)> = rows.iter().collect();
        let mut buf = Vec::with_capacity(64 + entries.len() * 32);
        buf.extend_from_slice(MAGIC);
        bincode::serialize_into(&mut buf, &entries)
            .map_err(|e| KvError::Corrupt(format!("encode: {e}")))?;
        let checksum = blake3::hash(&buf);
        buf.extend_from_slice(checksum.as_bytes());

        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, &buf)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

fn load_snapshot(path: &Path) -> KvResult<BTreeMap<String, String>> {
    let data = fs::read(path)?;
    if data.len() < MAGIC.len() + CHECKSUM_LEN || &data[..MAGIC.len()] != MAGIC {
        return Err(KvError::Corrupt(format!("{}: bad header", path.display())));
    }
    let (body, trailer) = data.split_at(data.len() - CHECKSUM_LEN);
    if blake3::hash(body).as_bytes() != trailer {
        return Err(KvError::Corrupt(format!(
            "{}: checksum mismatch",
            path.display()
        )));
    }
    let entries: Vec<(String, String)> = bincode::deserialize(&body[MAGIC.len()..])
        .map_err(|e| KvError::Corrupt(format!("decode: {e}")))?;
    Ok(entries.into_iter().collect())
}

impl SortedKv for FileKv {
    fn get(&self, key: &str) -> KvResult<Option<String>> {
        Ok(self.rows.read().expect("lock poisoned").get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> KvResult<()> {
        let mut rows = self.rows.write().expect("lock poisoned");
        rows.insert(key.to_string(), value.to_string());
        self.persist(&rows)
    }

    fn delete(&self, key: &str) -> KvResult<()> {
        let mut rows = self.rows.write().expect("lock poisoned");
        rows.remove(key);
        self.persist(&rows)
    }

    fn find(&self, start: &str, end: &str) -> KvResult<Box<dyn Iterator<Item = (String, String)> + Send>> {
        let rows = self.rows.read().expect("lock poisoned");
        let upper = if end.is_empty() {
            Bound::Unbounded
        } else {
            Bound::Excluded(end.to_string())
        };
        let snapshot: Vec<(String, String)> = rows
            .range((Bound::Included(start.to_string()), upper))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Ok(Box::new(snapshot.into_iter()))
    }

    fn commit_batch(&self, batch: Batch) -> KvResult<()> {
        let mut rows = self.rows.write().expect("lock poisoned");
        for op in batch.ops {
            match op {
                BatchOp::Set { key, value } => {
                    rows.insert(key, value);
                }
                BatchOp::Delete { key } => {
                    rows.remove(&key);
                }
            }
        }
        self.persist(&rows)
    }

    fn wipe(&self) -> KvResult<()> {
        let mut rows = self.rows.write().expect("lock poisoned");
        rows.clear();
        self.persist(&rows)
    }
}
