pub mod db;
pub mod error;
pub mod index;
pub mod memory;
pub mod model;
pub mod storage;

pub use crate::db::{Config, Counters, GraphDb, GraphDbAccessor, IdMapper, SingleNodeCounters};
pub use crate::error::{GraphError, Result};
pub use crate::model::{EdgeTypeId, Gid, LabelId, PropertyId, PropertyValue, WorkerId, NULL_GID};
pub use crate::storage::{
    Address, DeltaSink, EdgeAccessor, StateDelta, Transaction, TransactionEngine, TxId,
    VertexAccessor,
};
