use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::model::{EdgeTypeId, Gid, LabelId, PropertyId, PropertyValue};
use crate::storage::transaction::TxId;

/// One logical state mutation, emitted by accessors in per-transaction
/// program order. The core is agnostic about what a sink does with them
/// (write-ahead logging, replication, test capture).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StateDelta {
    CreateVertex {
        tx: TxId,
        gid: Gid,
    },
    CreateEdge {
        tx: TxId,
        gid: Gid,
        from: Gid,
        to: Gid,
        edge_type: EdgeTypeId,
    },
    SetProperty {
        tx: TxId,
        gid: Gid,
        property: PropertyId,
        value: PropertyValue,
    },
    RemoveProperty {
        tx: TxId,
        gid: Gid,
        property: PropertyId,
    },
    AddLabel {
        tx: TxId,
        gid: Gid,
        label: LabelId,
    },
    RemoveLabel {
        tx: TxId,
        gid: Gid,
        label: LabelId,
    },
    AddOutEdge {
        tx: TxId,
        gid: Gid,
        edge: Gid,
        to: Gid,
        edge_type: EdgeTypeId,
    },
    AddInEdge {
        tx: TxId,
        gid: Gid,
        edge: Gid,
        from: Gid,
        edge_type: EdgeTypeId,
    },
    RemoveEdge {
        tx: TxId,
        gid: Gid,
    },
    DeleteVertex {
        tx: TxId,
        gid: Gid,
    },
}

impl StateDelta {
    /// Gid of the record the delta applies to.
    pub fn gid(&self) -> Gid {
        match self {
            StateDelta::CreateVertex { gid, .. }
            | StateDelta::CreateEdge { gid, .. }
            | StateDelta::SetProperty { gid, .. }
            | StateDelta::RemoveProperty { gid, .. }
            | StateDelta::AddLabel { gid, .. }
            | StateDelta::RemoveLabel { gid, .. }
            | StateDelta::AddOutEdge { gid, .. }
            | StateDelta::AddInEdge { gid, .. }
            | StateDelta::RemoveEdge { gid, .. }
            | StateDelta::DeleteVertex { gid, .. } => *gid,
        }
    }

    pub fn tx(&self) -> TxId {
        match self {
            StateDelta::CreateVertex { tx, .. }
            | StateDelta::CreateEdge { tx, .. }
            | StateDelta::SetProperty { tx, .. }
            | StateDelta::RemoveProperty { tx, .. }
            | StateDelta::AddLabel { tx, .. }
            | StateDelta::RemoveLabel { tx, .. }
            | StateDelta::AddOutEdge { tx, .. }
            | StateDelta::AddInEdge { tx, .. }
            | StateDelta::RemoveEdge { tx, .. }
            | StateDelta::DeleteVertex { tx, .. } => *tx,
        }
    }
}

/// Consumer of state deltas. A single sink receives deltas in
/// per-transaction program order; no ordering is guaranteed across sinks.
pub trait DeltaSink: Send + Sync {
    fn emit(&self, delta: &StateDelta);
}

/// Sink that drops every delta; the default when durability is handled
/// elsewhere or not at all.
#[derive(Debug, Default)]
pub struct NullDeltaSink;

impl DeltaSink for NullDeltaSink {
    fn emit(&self, _delta: &StateDelta) {}
}

/// Sink that retains every delta in memory, in arrival order.
#[derive(Debug, Default)]
pub struct BufferedDeltaSink {
    deltas: Mutex<Vec<StateDelta>>,
}

impl BufferedDeltaSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn drain(&self) -> Vec<StateDelta> {
        std::mem::take(&mut *self.deltas.lock())
    }

    pub fn len(&self) -> usize {
        self.deltas.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.deltas.lock().is_empty()
    }
}

impl DeltaSink for BufferedDeltaSink {
    fn emit(&self, delta: &StateDelta) {
        self.deltas.lock().push(delta.clone());
    }
}
