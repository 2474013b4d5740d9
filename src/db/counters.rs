use std::sync::atomic::{AtomicI64, Ordering};

use dashmap::DashMap;

/// Named counter service consumed by the query layer. In distributed mode a
/// single master owns all counters and workers proxy these calls over RPC;
/// this is the single-node implementation both build on.
pub trait Counters: Send + Sync {
    /// Atomic fetch-add on the named counter, created at 0 on first touch:
    /// the first observed value is 0 and the stored value becomes 1.
    fn get(&self, name: &str) -> i64;

    fn set(&self, name: &str, value: i64);
}

#[derive(Debug, Default)]
pub struct SingleNodeCounters {
    counters: DashMap<String, AtomicI64>,
}

impl SingleNodeCounters {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Counters for SingleNodeCounters {
    fn get(&self, name: &str) -> i64 {
        self.counters
            .entry(name.to_owned())
            .or_insert_with(|| AtomicI64::new(0))
            .fetch_add(1, Ordering::SeqCst)
    }

    fn set(&self, name: &str, value: i64) {
        self.counters
            .entry(name.to_owned())
            .and_modify(|counter| counter.store(value, Ordering::SeqCst))
            .or_insert_with(|| AtomicI64::new(value));
    }
}
