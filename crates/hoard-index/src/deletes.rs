use std::collections::HashMap;
use std::sync::{RwLock, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use hoard_types::BlobRef;

/// One delete-claim edge: `deleter` deletes the map key.
#[derive(Clone, Debug)]
pub struct Deletion {
    pub deleter: BlobRef,
    pub when: DateTime<Utc>,
}

pub type DeletionMap = HashMap<BlobRef, Vec<Deletion>>;

/// In-memory resolver for delete-claim chains.
///
/// A blob is deleted iff some delete-claim targeting it is itself not
/// deleted. The recursion terminates: a claim cannot target itself or an
/// ancestor, since its ref depends on its content.
///
/// The write lock is held across the index commit that introduces a
/// delete, so readers never observe the KV rows and the cache out of step.
#[derive(Debug, Default)]
pub struct DeletesCache {
    map: RwLock<DeletionMap>,
}

impl DeletesCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_deleted(&self, br: &BlobRef) -> bool {
        let map = self.map.read().expect("lock poisoned");
        is_deleted_in(&map, br)
    }

    /// Take the write lock for a commit critical section; mutate through
    /// [`insert_deletion`].
    pub fn lock_for_commit(&self) -> RwLockWriteGuard<'_, DeletionMap> {
        self.map.write().expect("lock poisoned")
    }

    /// Replace the whole cache (deletes-cache rebuild after reindex).
    pub fn replace(&self, new_map: DeletionMap) {
        *self.map.write().expect("lock poisoned") = new_map;
    }

    pub fn len(&self) -> usize {
        self.map.read().expect("lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.read().expect("lock poisoned").is_empty()
    }
}

/// Resolve deletion status against an already-locked map.
pub fn is_deleted_in(map: &DeletionMap, br: &BlobRef) -> bool {
    let Some(deletions) = map.get(br) else {
        return false;
    };
    deletions.iter().any(|d| !is_deleted_in(map, &d.deleter))
}

/// Record a deletion, keeping each target's list sorted newest-first.
/// Re-recording the same deleter is a no-op.
pub fn insert_deletion(map: &mut DeletionMap, target: BlobRef, deleter: BlobRef, when: DateTime<Utc>) {
    let list = map.entry(target).or_default();
    if list.iter().any(|d| d.deleter == deleter) {
        return;
    }
    list.push(Deletion { deleter, when });
    list.sort_by(|a, b| b.when.cmp(&a.when));
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2013, 1, 1, 0, 0, s).unwrap()
    }

    #[test]
    fn undeleted_by_default() {
        let cache = DeletesCache::new();
        assert!(!cache.is_deleted(&BlobRef::sha1_of(b"p")));
    }

    #[test]
    fn delete_chain_alternates() {
        // D1 deletes P; D2 deletes D1; D3 deletes D2.
        let cache = DeletesCache::new();
        let p = BlobRef::sha1_of(b"p");
        let d1 = BlobRef::sha1_of(b"d1");
        let d2 = BlobRef::sha1_of(b"d2");
        let d3 = BlobRef::sha1_of(b"d3");

        {
            let mut map = cache.lock_for_commit();
            insert_deletion(&mut map, p.clone(), d1.clone(), t(1));
        }
        assert!(cache.is_deleted(&p));

        {
            let mut map = cache.lock_for_commit();
            insert_deletion(&mut map, d1.clone(), d2.clone(), t(2));
        }
        assert!(!cache.is_deleted(&p), "deleting the deleter revives P");

        {
            let mut map = cache.lock_for_commit();
            insert_deletion(&mut map, d2.clone(), d3.clone(), t(3));
        }
        assert!(cache.is_deleted(&p), "deleting D2 re-activates D1");
        assert!(cache.is_deleted(&d2));
        assert!(!cache.is_deleted(&d3));
    }

    #[test]
    fn two_deleters_need_both_neutralized() {
        let cache = DeletesCache::new();
        let p = BlobRef::sha1_of(b"p");
        let d1 = BlobRef::sha1_of(b"d1");
        let d2 = BlobRef::sha1_of(b"d2");
        let d3 = BlobRef::sha1_of(b"d3");
        {
            let mut map = cache.lock_for_commit();
            insert_deletion(&mut map, p.clone(), d1.clone(), t(1));
            insert_deletion(&mut map, p.clone(), d2.clone(), t(2));
            insert_deletion(&mut map, d1.clone(), d3.clone(), t(3));
        }
        // D2 still live.
        assert!(cache.is_deleted(&p));
    }

    #[test]
    fn lists_are_sorted_newest_first() {
        let mut map = DeletionMap::new();
        let p = BlobRef::sha1_of(b"p");
        insert_deletion(&mut map, p.clone(), BlobRef::sha1_of(b"a"), t(1));
        insert_deletion(&mut map, p.clone(), BlobRef::sha1_of(b"b"), t(5));
        insert_deletion(&mut map, p.clone(), BlobRef::sha1_of(b"c"), t(3));
        let whens: Vec<u32> = map[&p]
            .iter()
            .map(|d| d.when.timestamp() as u32 % 60)
            .collect();
        assert_eq!(whens, vec![5, 3, 1]);
    }

    #[test]
    fn replace_swaps_contents() {
        let cache = DeletesCache::new();
        let p = BlobRef::sha1_of(b"p");
        let mut map = DeletionMap::new();
        insert_deletion(&mut map, p.clone(), BlobRef::sha1_of(b"d"), t(0));
        cache.replace(map);
        assert!(cache.is_deleted(&p));
        cache.replace(DeletionMap::new());
        assert!(!cache.is_deleted(&p));
    }
}
