use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::error::{GraphError, Result};
use crate::model::Gid;
use crate::storage::mvcc::{ReadWitness, RecordSpace};

/// Monotonically-increasing transaction identifier; 0 is never assigned.
pub type TxId = u64;

/// Per-transaction command counter.
pub type CmdId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    Active,
    Committed,
    Aborted,
}

impl TxState {
    fn from_bits(bits: u8) -> Self {
        match bits {
            COMMITTED => TxState::Committed,
            ABORTED => TxState::Aborted,
            _ => TxState::Active,
        }
    }
}

const ACTIVE: u8 = 0b00;
const COMMITTED: u8 = 0b01;
const ABORTED: u8 = 0b10;

/// Growable map from transaction id to terminal state, two bits per id.
///
/// Entries are written exactly once (commit or abort) and read on every
/// visibility check, so reads take the shared side of the lock.
pub struct CommitLog {
    bits: RwLock<Vec<u8>>,
}

impl CommitLog {
    fn new() -> Self {
        Self {
            bits: RwLock::new(Vec::new()),
        }
    }

    fn set(&self, id: TxId, state: u8) {
        let slot = id as usize / 4;
        let shift = (id as usize % 4) * 2;
        let mut bits = self.bits.write();
        if slot >= bits.len() {
            bits.resize(slot + 1, 0);
        }
        bits[slot] = (bits[slot] & !(0b11 << shift)) | (state << shift);
    }

    fn get(&self, id: TxId) -> u8 {
        let slot = id as usize / 4;
        let shift = (id as usize % 4) * 2;
        let bits = self.bits.read();
        bits.get(slot).map_or(ACTIVE, |byte| (byte >> shift) & 0b11)
    }

    pub fn is_committed(&self, id: TxId) -> bool {
        self.get(id) == COMMITTED
    }

    pub fn is_aborted(&self, id: TxId) -> bool {
        self.get(id) == ABORTED
    }

    pub fn state(&self, id: TxId) -> TxState {
        TxState::from_bits(self.get(id))
    }
}

/// Set of transactions that were active when a transaction began, kept
/// sorted for binary-search membership tests.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    ids: Vec<TxId>,
}

impl Snapshot {
    fn new(ids: Vec<TxId>) -> Self {
        debug_assert!(ids.windows(2).all(|pair| pair[0] < pair[1]));
        Self { ids }
    }

    pub fn contains(&self, id: TxId) -> bool {
        self.ids.binary_search(&id).is_ok()
    }

    pub fn oldest(&self) -> Option<TxId> {
        self.ids.first().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }
}

/// Shareable flag observed by the owning thread at statement boundaries and
/// by blocking receives in the layers above.
#[derive(Debug, Clone, Default)]
pub struct TerminationSignal {
    flag: Arc<AtomicBool>,
}

impl TerminationSignal {
    pub fn terminate(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_terminated(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

struct EngineInner {
    counter: TxId,
    /// Active transaction id -> oldest id its snapshot can still observe.
    active: BTreeMap<TxId, TxId>,
}

/// Assigns transaction identifiers, tracks active/committed/aborted sets and
/// answers visibility queries. Commit sections are serialized on the engine
/// mutex so read validation is linearizable with commit ordering.
pub struct TransactionEngine {
    inner: Mutex<EngineInner>,
    clog: CommitLog,
}

impl Default for TransactionEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl TransactionEngine {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(EngineInner {
                counter: 0,
                active: BTreeMap::new(),
            }),
            clog: CommitLog::new(),
        }
    }

    /// Starts a new transaction with a snapshot of the currently active set.
    pub fn begin(self: &Arc<Self>) -> Transaction {
        let (id, snapshot) = {
            let mut inner = self.inner.lock();
            inner.counter += 1;
            let id = inner.counter;
            let snapshot = Snapshot::new(inner.active.keys().copied().collect());
            let horizon = snapshot.oldest().unwrap_or(id).min(id);
            inner.active.insert(id, horizon);
            (id, snapshot)
        };
        debug!(tx_id = id, snapshot_len = snapshot.len(), "tx.begin");
        Transaction {
            id,
            snapshot,
            engine: Arc::clone(self),
            cmd: AtomicU64::new(1),
            phase: AtomicU8::new(ACTIVE),
            signal: TerminationSignal::default(),
            has_writes: AtomicBool::new(false),
            read_set: Mutex::new(HashMap::new()),
        }
    }

    /// Commits `tx`. Fails with [`GraphError::Serialization`] when a version
    /// this transaction observed has since been expired by a transaction
    /// that committed outside the snapshot; the transaction stays Active so
    /// the caller can abort it.
    pub fn commit(&self, tx: &Transaction) -> Result<()> {
        tx.check_terminated()?;
        tx.ensure_active()?;
        let inner = self.inner.lock();
        // Read-only transactions serialize trivially at their snapshot;
        // only writers need first-committer-wins validation.
        if tx.has_writes() {
            for ((space, gid), witness) in tx.read_set.lock().iter() {
                if witness.read_conflicts(tx) {
                    warn!(tx_id = tx.id, space = ?space, gid = *gid, "tx.commit.conflict");
                    return Err(GraphError::Serialization(
                        "record was modified by a concurrently committed transaction",
                    ));
                }
            }
        }
        self.finish(inner, tx, COMMITTED);
        debug!(tx_id = tx.id, "tx.commit");
        Ok(())
    }

    /// Aborts `tx`; its writes become invisible to every observer.
    pub fn abort(&self, tx: &Transaction) {
        if tx.state() != TxState::Active {
            return;
        }
        let inner = self.inner.lock();
        self.finish(inner, tx, ABORTED);
        debug!(tx_id = tx.id, "tx.abort");
    }

    fn finish(
        &self,
        mut inner: parking_lot::MutexGuard<'_, EngineInner>,
        tx: &Transaction,
        state: u8,
    ) {
        self.clog.set(tx.id, state);
        inner.active.remove(&tx.id);
        drop(inner);
        tx.phase.store(state, Ordering::Release);
    }

    pub fn is_committed(&self, id: TxId) -> bool {
        self.clog.is_committed(id)
    }

    pub fn is_active(&self, id: TxId) -> bool {
        self.inner.lock().active.contains_key(&id)
    }

    pub fn clog(&self) -> &CommitLog {
        &self.clog
    }

    /// Oldest transaction id any active or future transaction could still
    /// observe. Every id strictly below it is terminated and outside every
    /// live snapshot.
    pub fn gc_horizon(&self) -> TxId {
        let inner = self.inner.lock();
        inner
            .active
            .values()
            .copied()
            .min()
            .unwrap_or(inner.counter + 1)
    }
}

/// A unit of work against the graph. Mutated only by its owning thread
/// (command advance) and by the engine on commit/abort.
pub struct Transaction {
    id: TxId,
    snapshot: Snapshot,
    engine: Arc<TransactionEngine>,
    cmd: AtomicU64,
    phase: AtomicU8,
    signal: TerminationSignal,
    has_writes: AtomicBool,
    read_set: Mutex<HashMap<(RecordSpace, Gid), Arc<dyn ReadWitness>>>,
}

impl Transaction {
    pub fn id(&self) -> TxId {
        self.id
    }

    pub fn cmd(&self) -> CmdId {
        self.cmd.load(Ordering::Acquire)
    }

    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    pub fn engine(&self) -> &Arc<TransactionEngine> {
        &self.engine
    }

    pub fn state(&self) -> TxState {
        TxState::from_bits(self.phase.load(Ordering::Acquire))
    }

    /// Opens the next command: later statements of this transaction observe
    /// the effects of earlier ones.
    pub fn advance(&self) -> CmdId {
        self.cmd.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn termination_signal(&self) -> TerminationSignal {
        self.signal.clone()
    }

    pub fn check_terminated(&self) -> Result<()> {
        if self.signal.is_terminated() {
            return Err(GraphError::Cancelled);
        }
        Ok(())
    }

    fn ensure_active(&self) -> Result<()> {
        if self.state() != TxState::Active {
            return Err(GraphError::Invalid("transaction is no longer active"));
        }
        Ok(())
    }

    /// True when a write stamped `(writer, at_cmd)` is visible to this
    /// transaction at its current command. Applied to creation marks and,
    /// mirrored, to expiration marks.
    pub fn sees(&self, writer: TxId, at_cmd: CmdId) -> bool {
        if writer == self.id {
            return at_cmd <= self.cmd();
        }
        self.sees_committed(writer)
    }

    /// True when `writer` committed before this transaction began.
    pub fn sees_committed(&self, writer: TxId) -> bool {
        writer < self.id && !self.snapshot.contains(writer) && self.engine.is_committed(writer)
    }

    /// Registers a version list this transaction read from, for commit-time
    /// validation. Repeated reads of one record collapse to one witness.
    pub fn record_read(&self, space: RecordSpace, gid: Gid, witness: Arc<dyn ReadWitness>) {
        self.read_set.lock().entry((space, gid)).or_insert(witness);
    }

    /// Marks this transaction as having published a write; set by the
    /// version-list write paths.
    pub fn mark_write(&self) {
        self.has_writes.store(true, Ordering::Release);
    }

    pub fn has_writes(&self) -> bool {
        self.has_writes.load(Ordering::Acquire)
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.state() == TxState::Active {
            debug!(tx_id = self.id, "tx.drop_without_commit");
            self.engine.clone().abort(self);
        }
    }
}
