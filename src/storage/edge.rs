use crate::model::{EdgeTypeId, PropertyStore};
use crate::storage::address::Address;
use crate::storage::mvcc::{Record, RecordSpace};
use crate::storage::vertex::Vertex;

/// Edge payload: endpoint addresses, edge type and properties. Endpoints
/// are addresses into vertex version lists so the edge stays valid across
/// endpoint updates.
#[derive(Debug, Clone)]
pub struct Edge {
    pub from: Address<Vertex>,
    pub to: Address<Vertex>,
    pub edge_type: EdgeTypeId,
    pub properties: PropertyStore,
}

impl Edge {
    pub fn new(from: Address<Vertex>, to: Address<Vertex>, edge_type: EdgeTypeId) -> Self {
        Self {
            from,
            to,
            edge_type,
            properties: PropertyStore::new(),
        }
    }

    pub fn is_cycle(&self) -> bool {
        self.from == self.to
    }
}

impl Record for Edge {
    const SPACE: RecordSpace = RecordSpace::Edge;
}
