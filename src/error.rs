use thiserror::Error;

use crate::model::WorkerId;

pub type Result<T> = std::result::Result<T, GraphError>;

#[derive(Debug, Error)]
pub enum GraphError {
    /// A concurrent transaction already wrote or expired the record this
    /// transaction tried to touch. The caller must abort and may retry.
    #[error("serialization conflict: {0}")]
    Serialization(&'static str),
    /// Write against a record deleted in the current transaction+command.
    #[error("can't update a record deleted in the current transaction")]
    RecordDeleted,
    /// A local-only operation was invoked on a record owned by another worker.
    #[error("record is owned by worker {worker}, local access refused")]
    RemoteAccess { worker: WorkerId },
    /// Allocator failure: out of memory, or a size/alignment contract violation.
    #[error("allocation failure: {0}")]
    BadAlloc(&'static str),
    /// A symbol name was reused with an incompatible kind.
    #[error("symbol `{name}` already registered as {existing}, requested {requested}")]
    TypeMismatch {
        name: String,
        existing: &'static str,
        requested: &'static str,
    },
    /// The transaction was terminated while blocked or between statements.
    #[error("transaction cancelled")]
    Cancelled,
    /// Internal contract violation.
    #[error("invalid operation: {0}")]
    Invalid(&'static str),
}
