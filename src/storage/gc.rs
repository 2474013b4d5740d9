use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, info};

use crate::index::PrimaryIndex;
use crate::storage::mvcc::Record;
use crate::storage::transaction::{CommitLog, TxId};

/// Outcome of one garbage-collection pass over the whole store.
#[derive(Debug, Default, Clone, Copy)]
pub struct GcStats {
    /// Transaction-id horizon the pass reclaimed up to.
    pub horizon: TxId,
    /// Version lists visited.
    pub lists_scanned: u64,
    /// Versions unlinked from their chains.
    pub versions_pruned: u64,
    /// Whole records erased from the primary index.
    pub lists_removed: u64,
    pub run_millis: u64,
}

impl GcStats {
    pub fn made_progress(&self) -> bool {
        self.versions_pruned > 0 || self.lists_removed > 0
    }
}

/// Something the background worker can run passes against.
pub trait GcTarget: Send + Sync + 'static {
    fn collect(&self) -> GcStats;
}

/// Sweeps every version list in `index` and erases entries whose record
/// died. Sweeping synchronizes with writers on the per-list lock, never on
/// the index itself.
pub fn sweep_index<R: Record>(
    index: &PrimaryIndex<R>,
    horizon: TxId,
    clog: &CommitLog,
    stats: &mut GcStats,
) {
    for (gid, list) in index.iter() {
        let outcome = list.sweep(horizon, clog);
        stats.lists_scanned += 1;
        stats.versions_pruned += outcome.pruned as u64;
        if outcome.dead && index.erase(gid) {
            stats.lists_removed += 1;
        }
    }
}

/// Runs one pass against `target` and logs it the way the background worker
/// does; shared by the manual trigger.
pub(crate) fn run_pass(target: &dyn GcTarget) -> GcStats {
    let started = Instant::now();
    let mut stats = target.collect();
    stats.run_millis = started.elapsed().as_millis() as u64;
    if stats.made_progress() {
        info!(
            horizon = stats.horizon,
            lists_scanned = stats.lists_scanned,
            versions_pruned = stats.versions_pruned,
            lists_removed = stats.lists_removed,
            run_millis = stats.run_millis,
            "storage.gc.completed"
        );
    } else {
        debug!(
            horizon = stats.horizon,
            lists_scanned = stats.lists_scanned,
            "storage.gc.noop"
        );
    }
    stats
}

struct Shutdown {
    stop: Mutex<bool>,
    wake: Condvar,
}

/// Background sweep worker; one per database. The thread wakes on the
/// configured interval, runs a pass and goes back to sleep; `stop` (or
/// drop) wakes it up for a final exit.
pub struct GarbageCollector {
    shutdown: Arc<Shutdown>,
    handle: Option<JoinHandle<()>>,
}

impl GarbageCollector {
    pub fn spawn(interval: Duration, target: Arc<dyn GcTarget>) -> Self {
        let shutdown = Arc::new(Shutdown {
            stop: Mutex::new(false),
            wake: Condvar::new(),
        });
        let thread_shutdown = Arc::clone(&shutdown);
        let handle = thread::Builder::new()
            .name("vesper-gc".to_owned())
            .spawn(move || {
                let mut stop = thread_shutdown.stop.lock();
                loop {
                    thread_shutdown.wake.wait_for(&mut stop, interval);
                    if *stop {
                        break;
                    }
                    drop(stop);
                    run_pass(target.as_ref());
                    stop = thread_shutdown.stop.lock();
                }
            })
            .expect("spawning the gc worker thread");
        Self {
            shutdown,
            handle: Some(handle),
        }
    }

    pub fn stop(&mut self) {
        *self.shutdown.stop.lock() = true;
        self.shutdown.wake.notify_all();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for GarbageCollector {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    struct CountingTarget {
        passes: AtomicU64,
    }

    impl GcTarget for CountingTarget {
        fn collect(&self) -> GcStats {
            self.passes.fetch_add(1, Ordering::SeqCst);
            GcStats::default()
        }
    }

    #[test]
    fn worker_runs_passes_until_stopped() {
        let target = Arc::new(CountingTarget {
            passes: AtomicU64::new(0),
        });
        let target_dyn: Arc<dyn GcTarget> = Arc::clone(&target) as Arc<dyn GcTarget>;
        let mut worker = GarbageCollector::spawn(Duration::from_millis(5), target_dyn);
        let deadline = Instant::now() + Duration::from_secs(2);
        while target.passes.load(Ordering::SeqCst) < 3 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        worker.stop();
        let passes = target.passes.load(Ordering::SeqCst);
        assert!(passes >= 3, "worker only ran {passes} passes");
        thread::sleep(Duration::from_millis(20));
        assert_eq!(target.passes.load(Ordering::SeqCst), passes);
    }
}
