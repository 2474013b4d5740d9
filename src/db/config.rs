use std::time::Duration;

use crate::model::WorkerId;

#[derive(Debug, Clone)]
pub struct Config {
    /// Identity of this worker in a distributed deployment; worker 0 is the
    /// single-node default and the master in distributed mode.
    pub worker_id: WorkerId,
    /// Interval of the background garbage-collection worker; `None`
    /// disables the thread (sweeps can still be triggered manually).
    pub gc_interval: Option<Duration>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            worker_id: 0,
            gc_interval: Some(Duration::from_millis(500)),
        }
    }
}

impl Config {
    /// No background work; garbage collection only runs when triggered.
    /// Deterministic setup used by tests and embedders with their own
    /// maintenance scheduling.
    pub fn without_gc() -> Self {
        Self {
            gc_interval: None,
            ..Self::default()
        }
    }

    /// Short GC interval for update-heavy workloads where version chains
    /// grow quickly.
    pub fn aggressive_gc() -> Self {
        Self {
            gc_interval: Some(Duration::from_millis(50)),
            ..Self::default()
        }
    }

    pub fn with_worker_id(mut self, worker_id: WorkerId) -> Self {
        self.worker_id = worker_id;
        self
    }
}
