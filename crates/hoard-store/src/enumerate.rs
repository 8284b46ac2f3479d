use hoard_types::{BlobRef, CancelToken, SizedBlobRef};

use crate::error::StoreResult;
use crate::traits::{BlobIter, BlobStore};

/// Interleave several sorted enumerations into a single globally sorted,
/// deduplicated stream. Each input must already satisfy the `enumerate`
/// ordering contract.
pub fn merged_enumerate(iters: Vec<BlobIter<'_>>) -> BlobIter<'_> {
    Box::new(MergedIter {
        peeked: iters.iter().map(|_| None).collect(),
        iters,
        last: None,
        done: false,
    })
}

struct MergedIter<'a> {
    iters: Vec<BlobIter<'a>>,
    peeked: Vec<Option<SizedBlobRef>>,
    last: Option<BlobRef>,
    done: bool,
}

impl Iterator for MergedIter<'_> {
    type Item = StoreResult<SizedBlobRef>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        // Refill peek slots, skipping anything at or below the last ref
        // sent (duplicate suppression across sources).
        for (slot, iter) in self.peeked.iter_mut().zip(self.iters.iter_mut()) {
            while slot.is_none() {
                match iter.next() {
                    None => break,
                    Some(Err(e)) => {
                        self.done = true;
                        return Some(Err(e));
                    }
                    Some(Ok(sb)) => {
                        if self.last.as_ref().is_some_and(|l| sb.blob_ref <= *l) {
                            continue;
                        }
                        *slot = Some(sb);
                    }
                }
            }
        }
        let lowest_idx = self
            .peeked
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|sb| (i, sb.blob_ref.clone())))
            .min_by(|a, b| a.1.cmp(&b.1))
            .map(|(i, _)| i)?;
        let sb = self.peeked[lowest_idx].take().expect("peeked slot full");
        self.last = Some(sb.blob_ref.clone());
        Some(Ok(sb))
    }
}

/// Drive a full enumeration, invoking `f` for every blob in order.
pub fn enumerate_all(
    store: &dyn BlobStore,
    cancel: CancelToken,
    mut f: impl FnMut(SizedBlobRef) -> StoreResult<()>,
) -> StoreResult<()> {
    for item in store.enumerate("", cancel)? {
        f(item?)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use crate::traits::receive_bytes;

    #[test]
    fn merged_is_sorted_union_without_duplicates() {
        let a = MemoryStore::new();
        let b = MemoryStore::new();
        let c = MemoryStore::new();
        // "shared" lives in two sources.
        for content in [&b"one"[..], b"two", b"shared"] {
            receive_bytes(&a, content).unwrap();
        }
        for content in [&b"three"[..], b"shared"] {
            receive_bytes(&b, content).unwrap();
        }
        receive_bytes(&c, b"four").unwrap();

        let iters = vec![
            a.enumerate("", CancelToken::new()).unwrap(),
            b.enumerate("", CancelToken::new()).unwrap(),
            c.enumerate("", CancelToken::new()).unwrap(),
        ];
        let merged: Vec<String> = merged_enumerate(iters)
            .map(|r| r.unwrap().blob_ref.to_string())
            .collect();

        let mut expected: Vec<String> = [&b"one"[..], b"two", b"shared", b"three", b"four"]
            .iter()
            .map(|c| BlobRef::sha1_of(c).to_string())
            .collect();
        expected.sort();
        assert_eq!(merged, expected);
    }

    #[test]
    fn merged_of_empty_sources_is_empty() {
        let a = MemoryStore::new();
        let iters = vec![a.enumerate("", CancelToken::new()).unwrap()];
        assert_eq!(merged_enumerate(iters).count(), 0);
    }

    #[test]
    fn enumerate_all_visits_everything() {
        let store = MemoryStore::new();
        for i in 0..5u8 {
            receive_bytes(&store, &[i]).unwrap();
        }
        let mut n = 0;
        enumerate_all(&store, CancelToken::new(), |_| {
            n += 1;
            Ok(())
        })
        .unwrap();
        assert_eq!(n, 5);
    }
}
