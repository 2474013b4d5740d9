use std::sync::Arc;

use crate::error::{GraphError, Result};
use crate::model::{EdgeTypeId, Gid, LabelId, PropertyId, PropertyStore, PropertyValue, WorkerId};
use crate::storage::address::Address;
use crate::storage::delta::{DeltaSink, StateDelta};
use crate::storage::edge::Edge;
use crate::storage::mvcc::{Record, Version};
use crate::storage::transaction::Transaction;
use crate::storage::vertex::{EdgeEntry, Vertex};
use crate::storage::Propertied;

/// Capabilities the accessor needs from its environment. Held by reference
/// so accessors stay cheap to create and copy; implementations carry no
/// per-record state.
pub trait AccessorBackend<R: Record>: Send + Sync {
    /// Globally-routable form of `address`.
    fn global_address(&self, address: &Address<R>) -> Address<R>;

    /// Resolves the old/new version caches against the transaction state.
    fn set_old_new(
        &self,
        tx: &Transaction,
        address: &Address<R>,
        old: &mut Option<Arc<Version<R>>>,
        new: &mut Option<Arc<Version<R>>>,
    ) -> Result<()>;

    /// Finds the transaction's in-progress version, if one exists.
    fn find_new(&self, tx: &Transaction, address: &Address<R>) -> Result<Option<Arc<Version<R>>>>;

    /// Consumes one state delta, e.g. by handing it to the WAL.
    fn process_delta(&self, tx: &Transaction, delta: StateDelta) -> Result<()>;

    /// Id exposed to the query language.
    fn cypher_id(&self, address: &Address<R>) -> i64;
}

/// Backend for records owned by this worker: resolves versions straight
/// from the local version list and forwards deltas to the configured sink.
pub struct LocalBackend {
    worker: WorkerId,
    sink: Arc<dyn DeltaSink>,
}

impl LocalBackend {
    pub fn new(worker: WorkerId, sink: Arc<dyn DeltaSink>) -> Self {
        Self { worker, sink }
    }
}

impl<R: Record> AccessorBackend<R> for LocalBackend {
    fn global_address(&self, address: &Address<R>) -> Address<R> {
        Address::remote(self.worker, address.gid())
    }

    fn set_old_new(
        &self,
        tx: &Transaction,
        address: &Address<R>,
        old: &mut Option<Arc<Version<R>>>,
        new: &mut Option<Arc<Version<R>>>,
    ) -> Result<()> {
        let list = address.require_local()?;
        // Every resolved read participates in commit-time validation.
        let witness: Arc<dyn crate::storage::mvcc::ReadWitness> =
            Arc::clone(list) as Arc<dyn crate::storage::mvcc::ReadWitness>;
        tx.record_read(R::SPACE, list.gid(), witness);
        let (found_old, found_new) = list.find_old_new(tx);
        *old = found_old;
        *new = found_new;
        Ok(())
    }

    fn find_new(&self, tx: &Transaction, address: &Address<R>) -> Result<Option<Arc<Version<R>>>> {
        Ok(address.require_local()?.find_created_by(tx))
    }

    fn process_delta(&self, _tx: &Transaction, delta: StateDelta) -> Result<()> {
        self.sink.emit(&delta);
        Ok(())
    }

    fn cypher_id(&self, address: &Address<R>) -> i64 {
        address.gid() as i64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Old,
    New,
}

/// Handle to one record paired with the governing transaction.
///
/// Holds two cached version pointers: `old` is the newest version visible
/// before this transaction's writes, `new` the transaction's in-progress
/// update. Reads come from `new` when set, writes always ensure `new`.
/// The handle does not own the underlying versions and is cheap to clone.
pub struct RecordAccessor<'a, R: Record> {
    address: Address<R>,
    tx: &'a Transaction,
    backend: &'a dyn AccessorBackend<R>,
    old: Option<Arc<Version<R>>>,
    new: Option<Arc<Version<R>>>,
    current: Side,
}

impl<'a, R: Record> Clone for RecordAccessor<'a, R> {
    fn clone(&self) -> Self {
        Self {
            address: self.address.clone(),
            tx: self.tx,
            backend: self.backend,
            old: self.old.clone(),
            new: self.new.clone(),
            current: self.current,
        }
    }
}

impl<'a, R: Record> RecordAccessor<'a, R> {
    pub fn new(
        address: Address<R>,
        tx: &'a Transaction,
        backend: &'a dyn AccessorBackend<R>,
    ) -> Self {
        Self {
            address,
            tx,
            backend,
            old: None,
            new: None,
            current: Side::Old,
        }
    }

    pub fn address(&self) -> &Address<R> {
        &self.address
    }

    pub fn global_address(&self) -> Address<R> {
        self.backend.global_address(&self.address)
    }

    pub fn gid(&self) -> Gid {
        self.address.gid()
    }

    pub fn cypher_id(&self) -> i64 {
        self.backend.cypher_id(&self.address)
    }

    /// Whether this record is owned by this worker; distributed callers use
    /// this to dispatch between local access and RPC.
    pub fn is_local(&self) -> bool {
        self.address.is_local()
    }

    pub fn transaction(&self) -> &'a Transaction {
        self.tx
    }

    /// Re-resolves `old` and `new` against the current transaction state.
    /// Returns whether at least one version was found, i.e. whether the
    /// accessor is still valid.
    pub fn reconstruct(&mut self) -> Result<bool> {
        self.old = None;
        self.new = None;
        self.backend
            .set_old_new(self.tx, &self.address, &mut self.old, &mut self.new)?;
        self.current = if self.new.is_some() { Side::New } else { Side::Old };
        Ok(self.old.is_some() || self.new.is_some())
    }

    /// Switches to the version owned by the current transaction+command,
    /// resolving it lazily if this accessor has not seen it yet.
    pub fn switch_new(&mut self) -> Result<&mut Self> {
        if self.new.is_none() {
            self.new = self.backend.find_new(self.tx, &self.address)?;
        }
        if self.new.is_some() {
            self.current = Side::New;
        }
        Ok(self)
    }

    /// Switches to the latest version not written by the current
    /// transaction; does nothing when the record was created by it.
    pub fn switch_old(&mut self) -> &mut Self {
        if self.old.is_some() {
            self.current = Side::Old;
        }
        self
    }

    fn current_version(&self) -> Result<&Arc<Version<R>>> {
        let version = match self.current {
            Side::New => self.new.as_ref().or(self.old.as_ref()),
            Side::Old => self.old.as_ref().or(self.new.as_ref()),
        };
        version.ok_or(GraphError::RecordDeleted)
    }

    /// Ensures there is an updatable version owned by this transaction and
    /// that `new` points to it.
    pub fn update(&mut self) -> Result<()> {
        if let Some(new) = &self.new {
            if let Some((expirer, cmd)) = new.expired() {
                if self.tx.sees(expirer, cmd) {
                    return Err(GraphError::RecordDeleted);
                }
            }
            self.current = Side::New;
            return Ok(());
        }
        let list = self.address.require_local()?;
        let fresh = list.update(self.tx)?;
        self.new = Some(fresh);
        self.current = Side::New;
        Ok(())
    }

    pub(crate) fn process_delta(&self, delta: StateDelta) -> Result<()> {
        self.backend.process_delta(self.tx, delta)
    }

    /// Runs `read` against the version the accessor currently points at.
    pub fn read<T>(&self, read: impl FnOnce(&R) -> T) -> Result<T> {
        let version = self.current_version()?;
        Ok(read(&version.payload()))
    }

    /// Runs `write` against the transaction's private version, creating it
    /// on first use.
    pub fn write<T>(&mut self, write: impl FnOnce(&mut R) -> T) -> Result<T> {
        self.update()?;
        let version = self
            .new
            .as_ref()
            .ok_or(GraphError::Invalid("update left no private version"))?;
        Ok(write(&mut version.payload_mut()))
    }
}

impl<'a, R: Record + Propertied> RecordAccessor<'a, R> {
    /// Gets the property for the given key.
    pub fn props_at(&self, key: PropertyId) -> Result<Option<PropertyValue>> {
        self.read(|record| record.properties().get(key).cloned())
    }

    /// Sets a value on the record, returning the previous one.
    pub fn props_set(
        &mut self,
        key: PropertyId,
        value: PropertyValue,
    ) -> Result<Option<PropertyValue>> {
        let previous = self.write(|record| record.properties_mut().set(key, value.clone()))?;
        self.process_delta(StateDelta::SetProperty {
            tx: self.tx.id(),
            gid: self.gid(),
            property: key,
            value,
        })?;
        Ok(previous)
    }

    /// Erases the property for the given key, returning the removed value.
    pub fn props_erase(&mut self, key: PropertyId) -> Result<Option<PropertyValue>> {
        let removed = self.write(|record| record.properties_mut().erase(key))?;
        if removed.is_some() {
            self.process_delta(StateDelta::RemoveProperty {
                tx: self.tx.id(),
                gid: self.gid(),
                property: key,
            })?;
        }
        Ok(removed)
    }

    /// Snapshot of all properties of this record.
    pub fn properties(&self) -> Result<PropertyStore> {
        self.read(|record| record.properties().clone())
    }
}

/// Accessor to a vertex record.
pub struct VertexAccessor<'a> {
    inner: RecordAccessor<'a, Vertex>,
}

impl<'a> Clone for VertexAccessor<'a> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<'a> VertexAccessor<'a> {
    pub fn new(
        address: Address<Vertex>,
        tx: &'a Transaction,
        backend: &'a dyn AccessorBackend<Vertex>,
    ) -> Self {
        Self {
            inner: RecordAccessor::new(address, tx, backend),
        }
    }

    pub fn labels(&self) -> Result<Vec<LabelId>> {
        self.read(|vertex| vertex.labels.to_vec())
    }

    pub fn has_label(&self, label: LabelId) -> Result<bool> {
        self.read(|vertex| vertex.has_label(label))
    }

    /// Adds `label`; returns whether the label set changed.
    pub fn add_label(&mut self, label: LabelId) -> Result<bool> {
        let added = self.write(|vertex| vertex.add_label(label))?;
        if added {
            self.process_delta(StateDelta::AddLabel {
                tx: self.transaction().id(),
                gid: self.gid(),
                label,
            })?;
        }
        Ok(added)
    }

    pub fn remove_label(&mut self, label: LabelId) -> Result<bool> {
        let removed = self.write(|vertex| vertex.remove_label(label))?;
        if removed {
            self.process_delta(StateDelta::RemoveLabel {
                tx: self.transaction().id(),
                gid: self.gid(),
                label,
            })?;
        }
        Ok(removed)
    }

    pub fn out_edges(&self) -> Result<Vec<EdgeEntry>> {
        self.read(|vertex| vertex.out_edges.iter().cloned().collect())
    }

    pub fn in_edges(&self) -> Result<Vec<EdgeEntry>> {
        self.read(|vertex| vertex.in_edges.iter().cloned().collect())
    }

    pub fn out_degree(&self) -> Result<usize> {
        self.read(|vertex| vertex.out_edges.len())
    }

    pub fn in_degree(&self) -> Result<usize> {
        self.read(|vertex| vertex.in_edges.len())
    }

    pub fn degree(&self) -> Result<usize> {
        self.read(Vertex::degree)
    }
}

impl<'a> std::ops::Deref for VertexAccessor<'a> {
    type Target = RecordAccessor<'a, Vertex>;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl<'a> std::ops::DerefMut for VertexAccessor<'a> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.inner
    }
}

/// Accessor to an edge record.
pub struct EdgeAccessor<'a> {
    inner: RecordAccessor<'a, Edge>,
}

impl<'a> Clone for EdgeAccessor<'a> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<'a> EdgeAccessor<'a> {
    pub fn new(
        address: Address<Edge>,
        tx: &'a Transaction,
        backend: &'a dyn AccessorBackend<Edge>,
    ) -> Self {
        Self {
            inner: RecordAccessor::new(address, tx, backend),
        }
    }

    pub fn edge_type(&self) -> Result<EdgeTypeId> {
        self.read(|edge| edge.edge_type)
    }

    pub fn from_address(&self) -> Result<Address<Vertex>> {
        self.read(|edge| edge.from.clone())
    }

    pub fn to_address(&self) -> Result<Address<Vertex>> {
        self.read(|edge| edge.to.clone())
    }

    pub fn is_cycle(&self) -> Result<bool> {
        self.read(Edge::is_cycle)
    }
}

impl<'a> std::ops::Deref for EdgeAccessor<'a> {
    type Target = RecordAccessor<'a, Edge>;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl<'a> std::ops::DerefMut for EdgeAccessor<'a> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.inner
    }
}
