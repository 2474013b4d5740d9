use std::collections::HashMap;

use parking_lot::RwLock;

use crate::error::{GraphError, Result};
use crate::model::{EdgeTypeId, LabelId, PropertyId};

/// Kinds of names the mapper interns. A name belongs to exactly one kind;
/// reusing it under another raises [`GraphError::TypeMismatch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SymbolKind {
    Label,
    EdgeType,
    Property,
}

impl SymbolKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SymbolKind::Label => "label",
            SymbolKind::EdgeType => "edge type",
            SymbolKind::Property => "property",
        }
    }

    fn index(self) -> usize {
        match self {
            SymbolKind::Label => 0,
            SymbolKind::EdgeType => 1,
            SymbolKind::Property => 2,
        }
    }
}

/// Translation between externally-supplied names and internal small ids.
/// In distributed mode the master holds the authoritative mapping and
/// workers cache lookups, deferring new-name assignment to the master over
/// RPC; this trait is what both sides implement.
pub trait IdMapper: Send + Sync {
    /// Returns the id for `name`, assigning the next free one on first use.
    fn value_to_id(&self, kind: SymbolKind, name: &str) -> Result<u32>;

    fn id_to_value(&self, kind: SymbolKind, id: u32) -> Option<String>;
}

#[derive(Debug, Default)]
struct MapperInner {
    names: HashMap<String, (SymbolKind, u32)>,
    values: [Vec<String>; 3],
}

/// Authoritative single-node mapper: dense per-kind id assignment under one
/// lock, reads on the shared side.
#[derive(Debug, Default)]
pub struct SingleNodeIdMapper {
    inner: RwLock<MapperInner>,
}

impl SingleNodeIdMapper {
    pub fn new() -> Self {
        Self::default()
    }
}

impl IdMapper for SingleNodeIdMapper {
    fn value_to_id(&self, kind: SymbolKind, name: &str) -> Result<u32> {
        if let Some(&(existing, id)) = self.inner.read().names.get(name) {
            if existing != kind {
                return Err(GraphError::TypeMismatch {
                    name: name.to_owned(),
                    existing: existing.as_str(),
                    requested: kind.as_str(),
                });
            }
            return Ok(id);
        }
        let mut inner = self.inner.write();
        // Racing registration may have won between the two locks.
        if let Some(&(existing, id)) = inner.names.get(name) {
            if existing != kind {
                return Err(GraphError::TypeMismatch {
                    name: name.to_owned(),
                    existing: existing.as_str(),
                    requested: kind.as_str(),
                });
            }
            return Ok(id);
        }
        let id = inner.values[kind.index()].len() as u32;
        inner.values[kind.index()].push(name.to_owned());
        inner.names.insert(name.to_owned(), (kind, id));
        Ok(id)
    }

    fn id_to_value(&self, kind: SymbolKind, id: u32) -> Option<String> {
        self.inner.read().values[kind.index()]
            .get(id as usize)
            .cloned()
    }
}

/// Typed convenience wrappers used throughout the storage layer.
pub trait IdMapperExt: IdMapper {
    fn label(&self, name: &str) -> Result<LabelId> {
        self.value_to_id(SymbolKind::Label, name).map(LabelId)
    }

    fn label_name(&self, id: LabelId) -> Option<String> {
        self.id_to_value(SymbolKind::Label, id.0)
    }

    fn edge_type(&self, name: &str) -> Result<EdgeTypeId> {
        self.value_to_id(SymbolKind::EdgeType, name).map(EdgeTypeId)
    }

    fn edge_type_name(&self, id: EdgeTypeId) -> Option<String> {
        self.id_to_value(SymbolKind::EdgeType, id.0)
    }

    fn property(&self, name: &str) -> Result<PropertyId> {
        self.value_to_id(SymbolKind::Property, name).map(PropertyId)
    }

    fn property_name(&self, id: PropertyId) -> Option<String> {
        self.id_to_value(SymbolKind::Property, id.0)
    }
}

impl<M: IdMapper + ?Sized> IdMapperExt for M {}
