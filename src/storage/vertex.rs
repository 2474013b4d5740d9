use smallvec::SmallVec;

use crate::model::{EdgeTypeId, Gid, LabelId, PropertyStore};
use crate::storage::address::Address;
use crate::storage::edge::Edge;
use crate::storage::mvcc::{Record, RecordSpace};

/// One entry of a vertex's adjacency: the neighbouring vertex, the edge
/// connecting to it and the edge's type, kept inline so most traversals
/// never touch the edge record itself.
#[derive(Debug, Clone, PartialEq)]
pub struct EdgeEntry {
    pub vertex: Address<Vertex>,
    pub edge: Address<Edge>,
    pub edge_type: EdgeTypeId,
}

/// Adjacency collection of one direction (out- or in-edges).
#[derive(Debug, Clone, Default)]
pub struct Adjacency {
    entries: Vec<EdgeEntry>,
}

impl Adjacency {
    pub fn add(&mut self, vertex: Address<Vertex>, edge: Address<Edge>, edge_type: EdgeTypeId) {
        self.entries.push(EdgeEntry {
            vertex,
            edge,
            edge_type,
        });
    }

    /// Removes the entry referencing `edge_gid`; returns whether an entry
    /// was removed.
    pub fn remove(&mut self, edge_gid: Gid) -> bool {
        let before = self.entries.len();
        self.entries.retain(|entry| entry.edge.gid() != edge_gid);
        before != self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &EdgeEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Vertex payload: labels, properties and both adjacency directions.
#[derive(Debug, Clone, Default)]
pub struct Vertex {
    pub labels: SmallVec<[LabelId; 4]>,
    pub properties: PropertyStore,
    pub out_edges: Adjacency,
    pub in_edges: Adjacency,
}

impl Vertex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_label(&self, label: LabelId) -> bool {
        self.labels.contains(&label)
    }

    /// Adds `label` if absent; returns whether the label set changed.
    pub fn add_label(&mut self, label: LabelId) -> bool {
        if self.has_label(label) {
            return false;
        }
        self.labels.push(label);
        true
    }

    pub fn remove_label(&mut self, label: LabelId) -> bool {
        let before = self.labels.len();
        self.labels.retain(|existing| *existing != label);
        before != self.labels.len()
    }

    pub fn degree(&self) -> usize {
        self.out_edges.len() + self.in_edges.len()
    }
}

impl Record for Vertex {
    const SPACE: RecordSpace = RecordSpace::Vertex;
}
