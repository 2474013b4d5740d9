mod config;
mod counters;
mod ids;

pub use config::Config;
pub use counters::{Counters, SingleNodeCounters};
pub use ids::{IdMapper, IdMapperExt, SingleNodeIdMapper, SymbolKind};

use std::sync::Arc;

use crate::error::{GraphError, Result};
use crate::index::{GidGenerator, PrimaryIndex};
use crate::model::{EdgeTypeId, Gid, LabelId, PropertyId, WorkerId};
use crate::storage::accessor::{EdgeAccessor, LocalBackend, VertexAccessor};
use crate::storage::address::Address;
use crate::storage::delta::{DeltaSink, NullDeltaSink, StateDelta};
use crate::storage::edge::Edge;
use crate::storage::gc::{self, GarbageCollector, GcStats, GcTarget};
use crate::storage::mvcc::VersionList;
use crate::storage::transaction::{CmdId, Transaction, TransactionEngine};
use crate::storage::vertex::Vertex;

struct DbInner {
    engine: Arc<TransactionEngine>,
    vertices: PrimaryIndex<Vertex>,
    edges: PrimaryIndex<Edge>,
    vertex_gids: GidGenerator,
    edge_gids: GidGenerator,
    id_mapper: SingleNodeIdMapper,
    counters: SingleNodeCounters,
    sink: Arc<dyn DeltaSink>,
    backend: LocalBackend,
    worker_id: WorkerId,
}

impl GcTarget for DbInner {
    fn collect(&self) -> GcStats {
        let mut stats = GcStats {
            horizon: self.engine.gc_horizon(),
            ..GcStats::default()
        };
        let clog = self.engine.clog();
        gc::sweep_index(&self.vertices, stats.horizon, clog, &mut stats);
        gc::sweep_index(&self.edges, stats.horizon, clog, &mut stats);
        stats
    }
}

/// The storage-facing database: transaction engine, both primary indexes
/// and the ambient services (id mapper, counters, delta sink, background
/// garbage collection).
pub struct GraphDb {
    inner: Arc<DbInner>,
    _gc: Option<GarbageCollector>,
}

impl Default for GraphDb {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphDb {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        Self::with_sink(config, Arc::new(NullDeltaSink))
    }

    pub fn with_sink(config: Config, sink: Arc<dyn DeltaSink>) -> Self {
        let inner = Arc::new(DbInner {
            engine: Arc::new(TransactionEngine::new()),
            vertices: PrimaryIndex::new(),
            edges: PrimaryIndex::new(),
            vertex_gids: GidGenerator::new(),
            edge_gids: GidGenerator::new(),
            id_mapper: SingleNodeIdMapper::new(),
            counters: SingleNodeCounters::new(),
            backend: LocalBackend::new(config.worker_id, Arc::clone(&sink)),
            sink,
            worker_id: config.worker_id,
        });
        let gc = config.gc_interval.map(|interval| {
            let target: Arc<dyn GcTarget> = Arc::clone(&inner) as Arc<dyn GcTarget>;
            GarbageCollector::spawn(interval, target)
        });
        Self { inner, _gc: gc }
    }

    /// Begins a transaction and returns an accessor bound to it.
    pub fn access(&self) -> GraphDbAccessor<'_> {
        GraphDbAccessor {
            db: self,
            tx: self.inner.engine.begin(),
        }
    }

    /// Runs one garbage-collection pass immediately.
    pub fn collect_garbage(&self) -> GcStats {
        gc::run_pass(&*self.inner)
    }

    pub fn engine(&self) -> &Arc<TransactionEngine> {
        &self.inner.engine
    }

    pub fn worker_id(&self) -> WorkerId {
        self.inner.worker_id
    }

    pub fn counters(&self) -> &dyn Counters {
        &self.inner.counters
    }

    pub fn id_mapper(&self) -> &dyn IdMapper {
        &self.inner.id_mapper
    }

    pub fn label(&self, name: &str) -> Result<LabelId> {
        self.inner.id_mapper.label(name)
    }

    pub fn edge_type(&self, name: &str) -> Result<EdgeTypeId> {
        self.inner.id_mapper.edge_type(name)
    }

    pub fn property(&self, name: &str) -> Result<PropertyId> {
        self.inner.id_mapper.property(name)
    }

    /// Number of vertex records resident in the primary index, including
    /// ones not yet visible to any snapshot.
    pub fn vertex_count(&self) -> usize {
        self.inner.vertices.len()
    }

    pub fn edge_count(&self) -> usize {
        self.inner.edges.len()
    }
}

/// One transaction's view of the database. All graph operations go through
/// an accessor; dropping it without `commit` aborts the transaction.
pub struct GraphDbAccessor<'a> {
    db: &'a GraphDb,
    tx: Transaction,
}

impl<'a> GraphDbAccessor<'a> {
    pub fn transaction(&self) -> &Transaction {
        &self.tx
    }

    pub fn db(&self) -> &'a GraphDb {
        self.db
    }

    /// Opens the next command of this transaction: statements that follow
    /// observe the effects of statements that came before.
    pub fn advance_command(&self) -> Result<CmdId> {
        self.tx.check_terminated()?;
        Ok(self.tx.advance())
    }

    /// Commits the transaction. A serialization failure aborts it before
    /// returning, so the caller can simply retry with a fresh accessor.
    pub fn commit(self) -> Result<()> {
        match self.db.inner.engine.commit(&self.tx) {
            Ok(()) => Ok(()),
            Err(err) => {
                self.db.inner.engine.abort(&self.tx);
                Err(err)
            }
        }
    }

    pub fn abort(self) {
        self.db.inner.engine.abort(&self.tx);
    }

    fn emit(&self, delta: StateDelta) {
        self.db.inner.sink.emit(&delta);
    }

    /// Creates a vertex owned by this transaction.
    pub fn insert_vertex(&self) -> Result<VertexAccessor<'_>> {
        self.tx.check_terminated()?;
        let gid = self.db.inner.vertex_gids.next();
        let list = VersionList::insert(gid, &self.tx, Vertex::new());
        let (resident, inserted) = self.db.inner.vertices.insert_unique(gid, list);
        if !inserted {
            return Err(GraphError::Invalid("vertex gid minted twice"));
        }
        self.emit(StateDelta::CreateVertex {
            tx: self.tx.id(),
            gid,
        });
        let mut accessor =
            VertexAccessor::new(Address::local(resident), &self.tx, &self.db.inner.backend);
        accessor.reconstruct()?;
        Ok(accessor)
    }

    /// Returns the vertex with `gid` if it is visible to this transaction.
    pub fn find_vertex(&self, gid: Gid) -> Result<Option<VertexAccessor<'_>>> {
        self.tx.check_terminated()?;
        let Some(list) = self.db.inner.vertices.find(gid) else {
            return Ok(None);
        };
        if list.find(&self.tx).is_none() {
            return Ok(None);
        }
        let mut accessor =
            VertexAccessor::new(Address::local(list), &self.tx, &self.db.inner.backend);
        accessor.reconstruct()?;
        Ok(Some(accessor))
    }

    /// Visibility-filtered scan over all vertices in ascending gid order.
    pub fn vertices(&self) -> impl Iterator<Item = VertexAccessor<'_>> + '_ {
        self.db.inner.vertices.iter().filter_map(move |(_, list)| {
            list.find(&self.tx)?;
            let mut accessor =
                VertexAccessor::new(Address::local(list), &self.tx, &self.db.inner.backend);
            match accessor.reconstruct() {
                Ok(true) => Some(accessor),
                _ => None,
            }
        })
    }

    /// Creates an edge between `from` and `to`, wiring both endpoint
    /// adjacencies through the MVCC write path: a concurrent writer on
    /// either endpoint surfaces as a serialization conflict here.
    pub fn insert_edge(
        &self,
        from: &VertexAccessor<'_>,
        to: &VertexAccessor<'_>,
        edge_type: EdgeTypeId,
    ) -> Result<EdgeAccessor<'_>> {
        self.tx.check_terminated()?;
        let from_addr = from.address().clone();
        let to_addr = to.address().clone();
        let from_list = from_addr.require_local()?;
        let to_list = to_addr.require_local()?;
        let gid = self.db.inner.edge_gids.next();
        let payload = Edge::new(from_addr.clone(), to_addr.clone(), edge_type);
        let list = VersionList::insert(gid, &self.tx, payload);
        let (resident, inserted) = self.db.inner.edges.insert_unique(gid, list);
        if !inserted {
            return Err(GraphError::Invalid("edge gid minted twice"));
        }
        let edge_addr = Address::local(resident);

        let from_version = from_list.update(&self.tx)?;
        from_version
            .payload_mut()
            .out_edges
            .add(to_addr.clone(), edge_addr.clone(), edge_type);
        let to_version = to_list.update(&self.tx)?;
        to_version
            .payload_mut()
            .in_edges
            .add(from_addr.clone(), edge_addr.clone(), edge_type);

        self.emit(StateDelta::CreateEdge {
            tx: self.tx.id(),
            gid,
            from: from_addr.gid(),
            to: to_addr.gid(),
            edge_type,
        });
        self.emit(StateDelta::AddOutEdge {
            tx: self.tx.id(),
            gid: from_addr.gid(),
            edge: gid,
            to: to_addr.gid(),
            edge_type,
        });
        self.emit(StateDelta::AddInEdge {
            tx: self.tx.id(),
            gid: to_addr.gid(),
            edge: gid,
            from: from_addr.gid(),
            edge_type,
        });

        let mut accessor = EdgeAccessor::new(edge_addr, &self.tx, &self.db.inner.backend);
        accessor.reconstruct()?;
        Ok(accessor)
    }

    /// Returns the edge with `gid` if it is visible to this transaction.
    pub fn find_edge(&self, gid: Gid) -> Result<Option<EdgeAccessor<'_>>> {
        self.tx.check_terminated()?;
        let Some(list) = self.db.inner.edges.find(gid) else {
            return Ok(None);
        };
        if list.find(&self.tx).is_none() {
            return Ok(None);
        }
        let mut accessor =
            EdgeAccessor::new(Address::local(list), &self.tx, &self.db.inner.backend);
        accessor.reconstruct()?;
        Ok(Some(accessor))
    }

    /// Visibility-filtered scan over all edges in ascending gid order.
    pub fn edges(&self) -> impl Iterator<Item = EdgeAccessor<'_>> + '_ {
        self.db.inner.edges.iter().filter_map(move |(_, list)| {
            list.find(&self.tx)?;
            let mut accessor =
                EdgeAccessor::new(Address::local(list), &self.tx, &self.db.inner.backend);
            match accessor.reconstruct() {
                Ok(true) => Some(accessor),
                _ => None,
            }
        })
    }

    /// Removes `edge`, detaching it from both endpoint adjacencies.
    pub fn remove_edge(&self, edge: &EdgeAccessor<'_>) -> Result<()> {
        self.remove_edge_address(edge.address())
    }

    fn remove_edge_address(&self, address: &Address<Edge>) -> Result<()> {
        self.tx.check_terminated()?;
        let list = address.require_local()?;
        let Some(version) = list.find(&self.tx) else {
            // Already gone for this transaction (e.g. the second visit of a
            // self-loop during detach).
            return Ok(());
        };
        let (from_addr, to_addr) = {
            let payload = version.payload();
            (payload.from.clone(), payload.to.clone())
        };
        let gid = list.gid();
        let from_list = from_addr.require_local()?;
        let to_list = to_addr.require_local()?;
        from_list
            .update(&self.tx)?
            .payload_mut()
            .out_edges
            .remove(gid);
        to_list.update(&self.tx)?.payload_mut().in_edges.remove(gid);
        list.remove(&self.tx)?;
        self.emit(StateDelta::RemoveEdge {
            tx: self.tx.id(),
            gid,
        });
        Ok(())
    }

    /// Removes `vertex` if it has no edges; returns whether it was removed.
    pub fn remove_vertex(&self, vertex: &VertexAccessor<'_>) -> Result<bool> {
        self.tx.check_terminated()?;
        let list = vertex.address().require_local()?;
        if let Some(version) = list.find(&self.tx) {
            if version.payload().degree() > 0 {
                return Ok(false);
            }
        }
        list.remove(&self.tx)?;
        self.emit(StateDelta::DeleteVertex {
            tx: self.tx.id(),
            gid: list.gid(),
        });
        Ok(true)
    }

    /// Removes `vertex` together with every edge attached to it.
    pub fn detach_remove_vertex(&self, vertex: &VertexAccessor<'_>) -> Result<()> {
        self.tx.check_terminated()?;
        let list = vertex.address().require_local()?;
        let Some(version) = list.find(&self.tx) else {
            return Err(GraphError::RecordDeleted);
        };
        let edge_addresses: Vec<Address<Edge>> = {
            let payload = version.payload();
            payload
                .out_edges
                .iter()
                .map(|entry| entry.edge.clone())
                .chain(payload.in_edges.iter().map(|entry| entry.edge.clone()))
                .collect()
        };
        for address in edge_addresses {
            self.remove_edge_address(&address)?;
        }
        list.remove(&self.tx)?;
        self.emit(StateDelta::DeleteVertex {
            tx: self.tx.id(),
            gid: list.gid(),
        });
        Ok(())
    }
}
