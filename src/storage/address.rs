use std::fmt;
use std::sync::Arc;

use crate::error::{GraphError, Result};
use crate::model::{Gid, WorkerId};
use crate::storage::mvcc::{Record, VersionList};

/// Tagged reference to a record: either an in-process version list or a
/// (worker, gid) pair when the record lives on another node. Core
/// algorithms branch only on the tag.
pub enum Address<R: Record> {
    Local(Arc<VersionList<R>>),
    Remote { worker: WorkerId, gid: Gid },
}

impl<R: Record> Address<R> {
    pub fn local(list: Arc<VersionList<R>>) -> Self {
        Address::Local(list)
    }

    pub fn remote(worker: WorkerId, gid: Gid) -> Self {
        Address::Remote { worker, gid }
    }

    pub fn is_local(&self) -> bool {
        matches!(self, Address::Local(_))
    }

    pub fn gid(&self) -> Gid {
        match self {
            Address::Local(list) => list.gid(),
            Address::Remote { gid, .. } => *gid,
        }
    }

    /// The owning version list, or [`GraphError::RemoteAccess`] when the
    /// record belongs to another worker; the distributed layer above
    /// retries such operations over RPC.
    pub fn require_local(&self) -> Result<&Arc<VersionList<R>>> {
        match self {
            Address::Local(list) => Ok(list),
            Address::Remote { worker, .. } => Err(GraphError::RemoteAccess { worker: *worker }),
        }
    }
}

impl<R: Record> Clone for Address<R> {
    fn clone(&self) -> Self {
        match self {
            Address::Local(list) => Address::Local(Arc::clone(list)),
            Address::Remote { worker, gid } => Address::Remote {
                worker: *worker,
                gid: *gid,
            },
        }
    }
}

impl<R: Record> PartialEq for Address<R> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Address::Local(a), Address::Local(b)) => Arc::ptr_eq(a, b),
            (
                Address::Remote { worker, gid },
                Address::Remote {
                    worker: other_worker,
                    gid: other_gid,
                },
            ) => worker == other_worker && gid == other_gid,
            _ => false,
        }
    }
}

impl<R: Record> Eq for Address<R> {}

impl<R: Record> fmt::Debug for Address<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Address::Local(list) => f.debug_tuple("Local").field(&list.gid()).finish(),
            Address::Remote { worker, gid } => f
                .debug_struct("Remote")
                .field("worker", worker)
                .field("gid", gid)
                .finish(),
        }
    }
}
