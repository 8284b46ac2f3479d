use crate::error::KvResult;

/// An ordered map of string keys to string values.
///
/// Implementations must satisfy:
/// - `find` yields entries in ascending key order, `start` inclusive,
///   `end` exclusive (`""` meaning unbounded).
/// - `commit_batch` applies all operations atomically: a reader never
///   observes a partially applied batch.
/// - Iterators are snapshots; mutations after `find` returns are not
///   reflected in the already-returned iterator.
pub trait SortedKv: Send + Sync {
    fn get(&self, key: &str) -> KvResult<Option<String>>;

    fn set(&self, key: &str, value: &str) -> KvResult<()>;

    fn delete(&self, key: &str) -> KvResult<()>;

    /// Range scan over `[start, end)`; `end == ""` scans to the end.
    fn find(&self, start: &str, end: &str) -> KvResult<Box<dyn Iterator<Item = (String, String)> + Send>>;

    /// Apply a batch of mutations atomically.
    fn commit_batch(&self, batch: Batch) -> KvResult<()>;

    /// Erase everything. Only backends that advertise the capability
    /// support this; it is required for reindexing.
    fn wipe(&self) -> KvResult<()> {
        Err(crate::error::KvError::WipeUnsupported)
    }

    /// Reports whether the store holds no rows.
    fn is_empty(&self) -> KvResult<bool> {
        Ok(self.find("", "")?.next().is_none())
    }
}

/// One mutation inside a [`Batch`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BatchOp {
    Set { key: String, value: String },
    Delete { key: String },
}

/// An ordered collection of mutations committed atomically.
#[derive(Clone, Debug, Default)]
pub struct Batch {
    pub(crate) ops: Vec<BatchOp>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.ops.push(BatchOp::Set {
            key: key.into(),
            value: value.into(),
        });
    }

    pub fn delete(&mut self, key: impl Into<String>) {
        self.ops.push(BatchOp::Delete { key: key.into() });
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn ops(&self) -> &[BatchOp] {
        &self.ops
    }
}

/// Smallest string strictly greater than every key with `prefix`, for use
/// as a `find` end bound. Panics on a prefix ending in `\u{10FFFF}`, which
/// no hoard key uses.
pub fn prefix_end(prefix: &str) -> String {
    let mut chars: Vec<char> = prefix.chars().collect();
    let last = chars.pop().expect("empty prefix");
    let bumped = char::from_u32(last as u32 + 1).expect("unsupported prefix end");
    chars.push(bumped);
    chars.into_iter().collect()
}

/// Range scan of every key starting with `prefix`.
pub fn find_prefix(
    kv: &dyn SortedKv,
    prefix: &str,
) -> KvResult<Box<dyn Iterator<Item = (String, String)> + Send>> {
    if prefix.is_empty() {
        return kv.find("", "");
    }
    kv.find(prefix, &prefix_end(prefix))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_records_ops_in_order() {
        let mut b = Batch::new();
        b.set("a", "1");
        b.delete("b");
        assert_eq!(b.len(), 2);
        assert_eq!(
            b.ops()[1],
            BatchOp::Delete { key: "b".into() }
        );
    }

    #[test]
    fn prefix_end_bumps_last_char() {
        assert_eq!(prefix_end("meta:"), "meta;");
        assert_eq!(prefix_end("claim|"), "claim}");
    }
}
