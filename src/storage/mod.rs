pub mod accessor;
pub mod address;
pub mod delta;
pub mod edge;
pub mod gc;
pub mod mvcc;
pub mod transaction;
pub mod vertex;

pub use accessor::{AccessorBackend, EdgeAccessor, LocalBackend, RecordAccessor, VertexAccessor};
pub use address::Address;
pub use delta::{BufferedDeltaSink, DeltaSink, NullDeltaSink, StateDelta};
pub use edge::Edge;
pub use gc::{GarbageCollector, GcStats};
pub use mvcc::{Record, RecordSpace, SweepOutcome, Version, VersionList};
pub use transaction::{
    CmdId, CommitLog, Snapshot, TerminationSignal, Transaction, TransactionEngine, TxId, TxState,
};
pub use vertex::{Adjacency, EdgeEntry, Vertex};

use crate::model::PropertyStore;

/// Records that carry a property map; lets the generic accessor implement
/// the property operations once for vertices and edges.
pub trait Propertied {
    fn properties(&self) -> &PropertyStore;
    fn properties_mut(&mut self) -> &mut PropertyStore;
}

impl Propertied for Vertex {
    fn properties(&self) -> &PropertyStore {
        &self.properties
    }

    fn properties_mut(&mut self) -> &mut PropertyStore {
        &mut self.properties
    }
}

impl Propertied for Edge {
    fn properties(&self) -> &PropertyStore {
        &self.properties
    }

    fn properties_mut(&mut self) -> &mut PropertyStore {
        &mut self.properties
    }
}
