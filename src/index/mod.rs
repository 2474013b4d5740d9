//! Concurrent primary index mapping stable identifiers to version lists.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam_skiplist::SkipMap;

use crate::model::Gid;
use crate::storage::mvcc::{Record, VersionList};

/// Mints stable identifiers from a monotonically-increasing atomic counter.
/// Ids are never reused, even after the record they named is erased.
#[derive(Debug)]
pub struct GidGenerator {
    next: AtomicU64,
}

impl Default for GidGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl GidGenerator {
    pub fn new() -> Self {
        // Gid 0 is the null sentinel and is never handed out.
        Self {
            next: AtomicU64::new(1),
        }
    }

    pub fn next(&self) -> Gid {
        self.next.fetch_add(1, Ordering::AcqRel)
    }

    /// Advances the counter past `gid`; used when loading persisted state.
    pub fn bump_past(&self, gid: Gid) {
        self.next.fetch_max(gid + 1, Ordering::AcqRel);
    }
}

/// Ordered concurrent map from gid to version list, backed by a
/// probabilistic multi-level skip list: point lookups and scans are
/// lock-free, insertion takes fine-grained per-node locks inside the map.
/// Iteration is weakly consistent — it sees every entry present throughout
/// the scan and may or may not see concurrent inserts.
pub struct PrimaryIndex<R: Record> {
    map: SkipMap<Gid, Arc<VersionList<R>>>,
}

impl<R: Record> Default for PrimaryIndex<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Record> PrimaryIndex<R> {
    pub fn new() -> Self {
        Self {
            map: SkipMap::new(),
        }
    }

    pub fn find(&self, gid: Gid) -> Option<Arc<VersionList<R>>> {
        self.map.get(&gid).map(|entry| Arc::clone(entry.value()))
    }

    /// Inserts `list` iff `gid` is absent; the insert-wins-if-absent
    /// discipline is linearizable inside the map. Returns the resident list
    /// and whether this call inserted it.
    pub fn insert_unique(&self, gid: Gid, list: Arc<VersionList<R>>) -> (Arc<VersionList<R>>, bool) {
        let entry = self.map.get_or_insert(gid, Arc::clone(&list));
        let resident = Arc::clone(entry.value());
        let inserted = Arc::ptr_eq(&resident, &list);
        (resident, inserted)
    }

    /// Logical removal; the gid is never minted again.
    pub fn erase(&self, gid: Gid) -> bool {
        self.map.remove(&gid).is_some()
    }

    /// Ascending scan over all currently-present entries.
    pub fn iter(&self) -> impl Iterator<Item = (Gid, Arc<VersionList<R>>)> + '_ {
        self.map
            .iter()
            .map(|entry| (*entry.key(), Arc::clone(entry.value())))
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}
