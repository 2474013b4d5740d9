use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::{GraphError, Result};
use crate::model::Gid;
use crate::storage::transaction::{CmdId, CommitLog, Transaction, TxId};

/// Logical collection a version list belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordSpace {
    Vertex,
    Edge,
}

/// Payload stored in a version chain. Updates clone the currently visible
/// payload into a fresh version, so payloads must be cheaply clonable.
pub trait Record: Clone + Send + Sync + 'static {
    const SPACE: RecordSpace;
}

/// One immutable-once-published version of a logical record.
///
/// The payload lock is uncontended in the common case: a version is mutated
/// in place only while it is private to its creating transaction.
pub struct Version<R> {
    created_by: TxId,
    created_cmd: CmdId,
    /// Expiring transaction id; 0 means not expired. The command is stored
    /// before the id is published, so a reader that observes the id sees a
    /// matching command.
    expired_by: AtomicU64,
    expired_cmd: AtomicU64,
    payload: RwLock<R>,
    /// Link toward the next older version; the GC sweep truncates it.
    older: Mutex<Option<Arc<Version<R>>>>,
}

impl<R> Version<R> {
    fn new(created_by: TxId, created_cmd: CmdId, payload: R, older: Option<Arc<Self>>) -> Self {
        Self {
            created_by,
            created_cmd,
            expired_by: AtomicU64::new(0),
            expired_cmd: AtomicU64::new(0),
            payload: RwLock::new(payload),
            older: Mutex::new(older),
        }
    }

    pub fn created_by(&self) -> TxId {
        self.created_by
    }

    pub fn created_cmd(&self) -> CmdId {
        self.created_cmd
    }

    pub fn expired(&self) -> Option<(TxId, CmdId)> {
        let expirer = self.expired_by.load(Ordering::Acquire);
        if expirer == 0 {
            return None;
        }
        Some((expirer, self.expired_cmd.load(Ordering::Acquire)))
    }

    fn mark_expired(&self, tx: &Transaction) {
        self.expired_cmd.store(tx.cmd(), Ordering::Release);
        self.expired_by.store(tx.id(), Ordering::Release);
    }

    pub fn payload(&self) -> RwLockReadGuard<'_, R> {
        self.payload.read()
    }

    pub fn payload_mut(&self) -> RwLockWriteGuard<'_, R> {
        self.payload.write()
    }

    fn older(&self) -> Option<Arc<Self>> {
        self.older.lock().clone()
    }

    /// Full visibility test: created by something this transaction sees and
    /// not expired by something it sees.
    pub fn visible_to(&self, tx: &Transaction) -> bool {
        if !tx.sees(self.created_by, self.created_cmd) {
            return false;
        }
        match self.expired() {
            Some((expirer, cmd)) => !tx.sees(expirer, cmd),
            None => true,
        }
    }

    /// Visibility disregarding the transaction's own writes: the version the
    /// record had before this transaction touched it.
    fn committed_visible_to(&self, tx: &Transaction) -> bool {
        if !tx.sees_committed(self.created_by) {
            return false;
        }
        match self.expired() {
            Some((expirer, _)) if expirer != tx.id() && tx.sees_committed(expirer) => false,
            _ => true,
        }
    }
}

/// Outcome of one garbage-collection pass over a version list.
#[derive(Debug, Default, Clone, Copy)]
pub struct SweepOutcome {
    /// Versions unlinked by this pass.
    pub pruned: usize,
    /// The whole record is unobservable; the index entry can be erased.
    pub dead: bool,
}

/// Head of the version chain for one logical record, newest first.
///
/// Readers clone the head under a brief shared lock and traverse without
/// further coordination; writers and the GC sweep serialize on the
/// exclusive side, which is the per-list lightweight lock tip swaps and
/// sweeps synchronize on.
pub struct VersionList<R: Record> {
    gid: Gid,
    head: RwLock<Option<Arc<Version<R>>>>,
}

impl<R: Record> VersionList<R> {
    /// Creates the list together with its initial version, owned by `tx`.
    pub fn insert(gid: Gid, tx: &Transaction, payload: R) -> Arc<Self> {
        tx.mark_write();
        let version = Arc::new(Version::new(tx.id(), tx.cmd(), payload, None));
        Arc::new(Self {
            gid,
            head: RwLock::new(Some(version)),
        })
    }

    pub fn gid(&self) -> Gid {
        self.gid
    }

    fn head(&self) -> Option<Arc<Version<R>>> {
        self.head.read().clone()
    }

    /// Returns the version visible to `tx`, newest first; `None` when the
    /// record is logically deleted for this transaction.
    pub fn find(&self, tx: &Transaction) -> Option<Arc<Version<R>>> {
        let mut cursor = self.head();
        while let Some(version) = cursor {
            if version.visible_to(tx) {
                return Some(version);
            }
            cursor = version.older();
        }
        None
    }

    /// Resolves the accessor caches in one walk: the version created by `tx`
    /// (if any) and the newest version visible disregarding `tx`'s writes.
    pub fn find_old_new(
        &self,
        tx: &Transaction,
    ) -> (Option<Arc<Version<R>>>, Option<Arc<Version<R>>>) {
        let mut old = None;
        let mut new = None;
        let mut cursor = self.head();
        while let Some(version) = cursor {
            if new.is_none()
                && version.created_by() == tx.id()
                && version.created_cmd() <= tx.cmd()
            {
                new = Some(Arc::clone(&version));
            }
            if old.is_none() && version.committed_visible_to(tx) {
                old = Some(Arc::clone(&version));
            }
            if old.is_some() && new.is_some() {
                break;
            }
            cursor = version.older();
        }
        (old, new)
    }

    /// Returns the in-progress version created by `tx`, if any.
    pub fn find_created_by(&self, tx: &Transaction) -> Option<Arc<Version<R>>> {
        let mut cursor = self.head();
        while let Some(version) = cursor {
            if version.created_by() == tx.id() && version.created_cmd() <= tx.cmd() {
                return Some(version);
            }
            cursor = version.older();
        }
        None
    }

    /// Produces an updatable successor of the version visible to `tx`,
    /// enforcing the single-writer-per-list rule with no-wait semantics.
    pub fn update(&self, tx: &Transaction) -> Result<Arc<Version<R>>> {
        let mut head = self.head.write();
        let visible = Self::visible_for_write(&head, tx)?;
        if visible.created_by() == tx.id() {
            // Already ours; later statements mutate it in place.
            return Ok(visible);
        }
        tx.mark_write();
        let payload = visible.payload().clone();
        let fresh = Arc::new(Version::new(tx.id(), tx.cmd(), payload, head.clone()));
        visible.mark_expired(tx);
        *head = Some(Arc::clone(&fresh));
        Ok(fresh)
    }

    /// Marks the version visible to `tx` expired without a successor. Same
    /// preconditions as [`update`].
    ///
    /// [`update`]: VersionList::update
    pub fn remove(&self, tx: &Transaction) -> Result<()> {
        let head = self.head.write();
        let visible = Self::visible_for_write(&head, tx)?;
        tx.mark_write();
        visible.mark_expired(tx);
        Ok(())
    }

    /// Walks newest-first under the list lock, returning the version a write
    /// may build on. Any non-aborted foreign mark above (or on) it means a
    /// conflicting writer already acted.
    fn visible_for_write(
        head: &Option<Arc<Version<R>>>,
        tx: &Transaction,
    ) -> Result<Arc<Version<R>>> {
        let clog = tx.engine().clog();
        let mut cursor = head.clone();
        let mut visible = None;
        while let Some(version) = cursor {
            if version.visible_to(tx) {
                visible = Some(version);
                break;
            }
            let creator = version.created_by();
            if creator == tx.id() {
                // Our own version made invisible by our own expiration.
                return Err(GraphError::RecordDeleted);
            }
            if !clog.is_aborted(creator) && !tx.sees(creator, version.created_cmd()) {
                // An active writer's tip, or a successor committed outside
                // our snapshot; first writer wins, fail fast.
                return Err(GraphError::Serialization(
                    "version list already has a newer writer",
                ));
            }
            if let Some((expirer, _)) = version.expired() {
                if expirer == tx.id() {
                    // We removed this record in an earlier command.
                    return Err(GraphError::RecordDeleted);
                }
            }
            // Aborted creation, or a version expired before our snapshot;
            // keep walking toward older versions.
            cursor = version.older();
        }
        let visible = visible.ok_or(GraphError::RecordDeleted)?;
        if let Some((expirer, _)) = visible.expired() {
            if expirer == tx.id() {
                return Err(GraphError::RecordDeleted);
            }
            if !clog.is_aborted(expirer) {
                return Err(GraphError::Serialization(
                    "version already expired by a concurrent transaction",
                ));
            }
        }
        Ok(visible)
    }

    /// One garbage-collection pass: pops aborted heads, truncates the chain
    /// below the newest version every active and future transaction can see
    /// (`horizon` per the engine), and reports whether the whole record died.
    pub fn sweep(&self, horizon: TxId, clog: &CommitLog) -> SweepOutcome {
        let mut head = self.head.write();
        let mut outcome = SweepOutcome::default();
        while let Some(version) = head.clone() {
            if !clog.is_aborted(version.created_by()) {
                break;
            }
            *head = version.older();
            outcome.pruned += 1;
        }
        let mut cursor = head.clone();
        let mut barrier = None;
        while let Some(version) = cursor {
            if clog.is_committed(version.created_by()) && version.created_by() < horizon {
                barrier = Some(version);
                break;
            }
            cursor = version.older();
        }
        let Some(barrier) = barrier else {
            outcome.dead = head.is_none();
            return outcome;
        };
        let mut dropped = {
            let mut older = barrier.older.lock();
            older.take()
        };
        while let Some(version) = dropped {
            outcome.pruned += 1;
            dropped = version.older.lock().take();
        }
        let barrier_is_tip = head
            .as_ref()
            .map_or(false, |tip| Arc::ptr_eq(tip, &barrier));
        if barrier_is_tip {
            if let Some((expirer, _)) = barrier.expired() {
                if clog.is_committed(expirer) && expirer < horizon {
                    *head = None;
                    outcome.pruned += 1;
                    outcome.dead = true;
                }
            }
        }
        outcome
    }

    /// Number of versions currently linked; diagnostic only.
    pub fn chain_len(&self) -> usize {
        let mut len = 0;
        let mut cursor = self.head();
        while let Some(version) = cursor {
            len += 1;
            cursor = version.older();
        }
        len
    }
}

/// Commit-time validation hook: a transaction records one witness per record
/// it read, and the engine asks each witness whether the observed version
/// has since been expired by a transaction that committed outside the
/// snapshot (first committer wins).
pub trait ReadWitness: Send + Sync {
    fn read_conflicts(&self, tx: &Transaction) -> bool;
}

impl<R: Record> ReadWitness for VersionList<R> {
    fn read_conflicts(&self, tx: &Transaction) -> bool {
        let Some(seen) = self.find(tx) else {
            return false;
        };
        match seen.expired() {
            Some((expirer, _)) if expirer != tx.id() => {
                tx.engine().is_committed(expirer) && !tx.sees_committed(expirer)
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::transaction::TransactionEngine;

    #[derive(Debug, Clone, PartialEq)]
    struct Counter(i64);

    impl Record for Counter {
        const SPACE: RecordSpace = RecordSpace::Vertex;
    }

    fn engine() -> Arc<TransactionEngine> {
        Arc::new(TransactionEngine::new())
    }

    #[test]
    fn creator_sees_its_own_insert_before_commit() {
        let engine = engine();
        let creator = engine.begin();
        let list = VersionList::insert(1, &creator, Counter(0));
        assert!(list.find(&creator).is_some());

        let other = engine.begin();
        assert!(list.find(&other).is_none());
        engine.commit(&creator).unwrap();
        // Still invisible: `other` began before the commit.
        assert!(list.find(&other).is_none());
        let late = engine.begin();
        assert!(list.find(&late).is_some());
    }

    #[test]
    fn update_appends_and_expires_previous_tip() {
        let engine = engine();
        let creator = engine.begin();
        let list = VersionList::insert(1, &creator, Counter(0));
        engine.commit(&creator).unwrap();

        let writer = engine.begin();
        let version = list.update(&writer).unwrap();
        version.payload_mut().0 = 42;
        assert_eq!(list.chain_len(), 2);
        assert_eq!(list.find(&writer).unwrap().payload().0, 42);

        let reader = engine.begin();
        assert_eq!(list.find(&reader).unwrap().payload().0, 0);
        engine.commit(&writer).unwrap();
        assert_eq!(list.find(&reader).unwrap().payload().0, 0);
        let late = engine.begin();
        assert_eq!(list.find(&late).unwrap().payload().0, 42);
    }

    #[test]
    fn second_update_by_same_transaction_reuses_the_tip() {
        let engine = engine();
        let creator = engine.begin();
        let list = VersionList::insert(1, &creator, Counter(0));
        engine.commit(&creator).unwrap();

        let writer = engine.begin();
        let first = list.update(&writer).unwrap();
        writer.advance();
        let second = list.update(&writer).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(list.chain_len(), 2);
    }

    #[test]
    fn concurrent_writers_fail_fast() {
        let engine = engine();
        let creator = engine.begin();
        let list = VersionList::insert(1, &creator, Counter(0));
        engine.commit(&creator).unwrap();

        let first = engine.begin();
        let second = engine.begin();
        list.update(&first).unwrap();
        assert!(matches!(
            list.update(&second),
            Err(GraphError::Serialization(_))
        ));
        assert!(matches!(
            list.remove(&second),
            Err(GraphError::Serialization(_))
        ));
    }

    #[test]
    fn committed_successor_outside_snapshot_conflicts() {
        let engine = engine();
        let creator = engine.begin();
        let list = VersionList::insert(1, &creator, Counter(0));
        engine.commit(&creator).unwrap();

        let slow = engine.begin();
        let fast = engine.begin();
        list.update(&fast).unwrap();
        engine.commit(&fast).unwrap();
        assert!(matches!(
            list.update(&slow),
            Err(GraphError::Serialization(_))
        ));
    }

    #[test]
    fn aborted_writer_marks_are_overwritten() {
        let engine = engine();
        let creator = engine.begin();
        let list = VersionList::insert(1, &creator, Counter(0));
        engine.commit(&creator).unwrap();

        let loser = engine.begin();
        list.update(&loser).unwrap();
        engine.abort(&loser);

        let winner = engine.begin();
        let version = list.update(&winner).unwrap();
        version.payload_mut().0 = 7;
        engine.commit(&winner).unwrap();
        let reader = engine.begin();
        assert_eq!(list.find(&reader).unwrap().payload().0, 7);
    }

    #[test]
    fn remove_deletes_for_later_transactions_only() {
        let engine = engine();
        let creator = engine.begin();
        let list = VersionList::insert(1, &creator, Counter(0));
        engine.commit(&creator).unwrap();

        let remover = engine.begin();
        let concurrent = engine.begin();
        list.remove(&remover).unwrap();
        assert!(list.find(&remover).is_none());
        assert!(list.find(&concurrent).is_some());
        engine.commit(&remover).unwrap();
        assert!(list.find(&concurrent).is_some());
        let late = engine.begin();
        assert!(list.find(&late).is_none());
    }

    #[test]
    fn update_after_own_remove_reports_deleted() {
        let engine = engine();
        let creator = engine.begin();
        let list = VersionList::insert(1, &creator, Counter(0));
        engine.commit(&creator).unwrap();

        let tx = engine.begin();
        list.remove(&tx).unwrap();
        tx.advance();
        assert!(matches!(list.update(&tx), Err(GraphError::RecordDeleted)));
    }

    #[test]
    fn sweep_truncates_superseded_suffix() {
        let engine = engine();
        let creator = engine.begin();
        let list = VersionList::insert(1, &creator, Counter(0));
        engine.commit(&creator).unwrap();
        for value in 1..=10 {
            let writer = engine.begin();
            list.update(&writer).unwrap().payload_mut().0 = value;
            engine.commit(&writer).unwrap();
        }
        assert_eq!(list.chain_len(), 11);

        let outcome = list.sweep(engine.gc_horizon(), engine.clog());
        assert_eq!(outcome.pruned, 10);
        assert!(!outcome.dead);
        assert_eq!(list.chain_len(), 1);
        let reader = engine.begin();
        assert_eq!(list.find(&reader).unwrap().payload().0, 10);
    }

    #[test]
    fn sweep_respects_open_snapshots() {
        let engine = engine();
        let creator = engine.begin();
        let list = VersionList::insert(1, &creator, Counter(0));
        engine.commit(&creator).unwrap();

        let long_running = engine.begin();
        for value in 1..=5 {
            let writer = engine.begin();
            list.update(&writer).unwrap().payload_mut().0 = value;
            engine.commit(&writer).unwrap();
        }
        let outcome = list.sweep(engine.gc_horizon(), engine.clog());
        assert_eq!(outcome.pruned, 0);
        assert_eq!(list.find(&long_running).unwrap().payload().0, 0);
        engine.commit(&long_running).unwrap();

        let outcome = list.sweep(engine.gc_horizon(), engine.clog());
        assert_eq!(outcome.pruned, 5);
        assert_eq!(list.chain_len(), 1);
    }

    #[test]
    fn sweep_reclaims_aborted_creations_and_dead_records() {
        let engine = engine();
        let creator = engine.begin();
        let list = VersionList::insert(1, &creator, Counter(0));
        engine.abort(&creator);
        let outcome = list.sweep(engine.gc_horizon(), engine.clog());
        assert!(outcome.dead);
        assert_eq!(outcome.pruned, 1);

        let creator = engine.begin();
        let removed = VersionList::insert(2, &creator, Counter(0));
        engine.commit(&creator).unwrap();
        let remover = engine.begin();
        removed.remove(&remover).unwrap();
        engine.commit(&remover).unwrap();
        let outcome = removed.sweep(engine.gc_horizon(), engine.clog());
        assert!(outcome.dead);
        assert_eq!(removed.chain_len(), 0);
    }

    #[test]
    fn read_witness_flags_concurrent_committed_expiration() {
        let engine = engine();
        let creator = engine.begin();
        let list = VersionList::insert(1, &creator, Counter(10));
        engine.commit(&creator).unwrap();

        let reader = engine.begin();
        assert!(list.find(&reader).is_some());
        assert!(!list.read_conflicts(&reader));

        let writer = engine.begin();
        list.update(&writer).unwrap().payload_mut().0 = 5;
        // Uncommitted expiration is not a conflict yet.
        assert!(!list.read_conflicts(&reader));
        engine.commit(&writer).unwrap();
        assert!(list.read_conflicts(&reader));
    }
}
