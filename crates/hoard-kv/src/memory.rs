use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::RwLock;

use crate::error::KvResult;
use crate::traits::{Batch, BatchOp, SortedKv};

/// In-memory, BTreeMap-based sorted KV.
///
/// Intended for tests and ephemeral indexes. All rows live behind a
/// `RwLock`; range scans snapshot the requested range.
#[derive(Debug, Default)]
pub struct MemoryKv {
    rows: RwLock<BTreeMap<String, String>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.read().expect("lock poisoned").len()
    }
}

impl SortedKv for MemoryKv {
    fn get(&self, key: &str) -> KvResult<Option<String>> {
        Ok(self.rows.read().expect("lock poisoned").get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> KvResult<()> {
        self.rows
            .write()
            .expect("lock poisoned")
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&self, key: &str) -> KvResult<()> {
        self.rows.write().expect("lock poisoned").remove(key);
        Ok(())
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
        Ok(())
    }

    fn wipe(&self) -> KvResult<()> {
        self.rows.write().expect("lock poisoned").clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_get_delete() {
        let kv = MemoryKv::new();
        kv.set("k", "v").unwrap();
        assert_eq!(kv.get("k").unwrap(), Some("v".into()));
        kv.delete("k").unwrap();
        assert_eq!(kv.get("k").unwrap(), None);
    }

    #[test]
    fn find_is_sorted_and_bounded() {
        let kv = MemoryKv::new();
        for k in ["b", "a", "c", "d"] {
            kv.set(k, k).unwrap();
        }
        let got: Vec<String> = kv.find("a", "d").unwrap().map(|(k, _)| k).collect();
        assert_eq!(got, vec!["a", "b", "c"]);
    }

    #[test]
    fn find_unbounded_end() {
        let kv = MemoryKv::new();
        kv.set("x", "1").unwrap();
        kv.set("y", "2").unwrap();
        let got: Vec<String> = kv.find("x", "").unwrap().map(|(k, _)| k).collect();
        assert_eq!(got, vec!["x", "y"]);
    }

    #[test]
    fn batch_is_applied_in_order() {
        let kv = MemoryKv::new();
        let mut b = Batch::new();
        b.set("k", "1");
        b.set("k", "2");
        b.delete("gone");
        kv.commit_batch(b).unwrap();
        assert_eq!(kv.get("k").unwrap(), Some("2".into()));
    }

    #[test]
    fn wipe_clears_everything() {
        let kv = MemoryKv::new();
        kv.set("a", "1").unwrap();
        kv.wipe().unwrap();
        assert!(kv.is_empty().unwrap());
    }

    #[test]
    fn iterator_is_a_snapshot() {
        let kv = MemoryKv::new();
        kv.set("a", "1").unwrap();
        let iter = kv.find("", "").unwrap();
        kv.set("b", "2").unwrap();
        assert_eq!(iter.count(), 1);
    }
}
