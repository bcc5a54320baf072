//! Worker slots: the data-plane side of the generation barrier.
//!
//! Each worker thread owns one slot and is the only writer of its
//! `observed_gen`; the control plane reads all slots to compute the
//! safe-to-free barrier. A worker whose heartbeat goes stale is
//! excluded from the barrier, so a crashed worker cannot pin retired
//! generations forever.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use crate::error::{ShmError, ShmResult};
use crate::sync::SpinLock;

/// Maximum worker threads per NUMA instance.
pub const MAX_WORKERS: usize = 64;

/// Per-worker packet counters, relaxed everywhere.
///
/// Workers flush their process-local tallies here at batch boundaries;
/// the control plane sums slots on demand. No atomicity is promised
/// across workers or across fields.
#[repr(C)]
#[derive(Default)]
pub struct WorkerCounters {
    pub rx: AtomicU64,
    pub tx: AtomicU64,
    pub drop: AtomicU64,
    pub bypass: AtomicU64,
    pub parse_err: AtomicU64,
}

impl WorkerCounters {
    /// Add a batch's tallies.
    pub fn add(&self, rx: u64, tx: u64, drop: u64, bypass: u64, parse_err: u64) {
        self.rx.fetch_add(rx, Ordering::Relaxed);
        self.tx.fetch_add(tx, Ordering::Relaxed);
        self.drop.fetch_add(drop, Ordering::Relaxed);
        self.bypass.fetch_add(bypass, Ordering::Relaxed);
        self.parse_err.fetch_add(parse_err, Ordering::Relaxed);
    }
}

/// One worker slot.
#[repr(C)]
pub struct WorkerSlot {
    active: AtomicU32,
    numa_idx: AtomicU32,
    observed_gen: AtomicU64,
    heartbeat_ns: AtomicU64,
    counters: WorkerCounters,
}

impl WorkerSlot {
    /// Whether a worker currently owns this slot.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire) != 0
    }

    /// The latest generation number this worker has acknowledged.
    #[must_use]
    pub fn observed_gen(&self) -> u64 {
        self.observed_gen.load(Ordering::Acquire)
    }

    /// Record that the worker reached a quiescent point at `generation`.
    ///
    /// `observed_gen` never decreases (debug-asserted); the release
    /// store pairs with the control plane's acquire load.
    pub fn observe(&self, generation: u64, now_ns: u64) {
        debug_assert!(generation >= self.observed_gen.load(Ordering::Relaxed));
        self.observed_gen.store(generation, Ordering::Release);
        self.heartbeat_ns.store(now_ns, Ordering::Release);
    }

    /// Heartbeat without a generation change.
    pub fn heartbeat(&self, now_ns: u64) {
        self.heartbeat_ns.store(now_ns, Ordering::Release);
    }

    /// Whether the worker's heartbeat is older than `timeout_ns`.
    #[must_use]
    pub fn is_stale(&self, now_ns: u64, timeout_ns: u64) -> bool {
        let last = self.heartbeat_ns.load(Ordering::Acquire);
        now_ns.saturating_sub(last) > timeout_ns
    }

    /// This worker's packet counters.
    #[must_use]
    pub fn counters(&self) -> &WorkerCounters {
        &self.counters
    }
}

/// Registry embedded in the arena header.
#[repr(C)]
pub struct WorkerRegistry {
    lock: SpinLock,
    slots: [WorkerSlot; MAX_WORKERS],
}

impl WorkerRegistry {
    pub(crate) fn init(&mut self) {
        self.lock = SpinLock::new();
        for slot in &mut self.slots {
            slot.active = AtomicU32::new(0);
            slot.numa_idx = AtomicU32::new(0);
            slot.observed_gen = AtomicU64::new(0);
            slot.heartbeat_ns = AtomicU64::new(0);
            slot.counters = WorkerCounters::default();
        }
    }

    /// Claim a slot for a new worker.
    pub fn register(&self, numa_idx: u32, current_gen: u64, now_ns: u64) -> ShmResult<usize> {
        let _guard = self.lock.lock();
        for (idx, slot) in self.slots.iter().enumerate() {
            if !slot.is_active() {
                slot.numa_idx.store(numa_idx, Ordering::Relaxed);
                // A fresh worker starts at the currently published
                // generation so it never holds the barrier below it.
                slot.observed_gen.store(current_gen, Ordering::Relaxed);
                slot.heartbeat_ns.store(now_ns, Ordering::Relaxed);
                slot.active.store(1, Ordering::Release);
                return Ok(idx);
            }
        }
        Err(ShmError::WorkerRegistryFull {
            capacity: MAX_WORKERS,
        })
    }

    /// Release a slot on worker shutdown.
    pub fn deregister(&self, idx: usize) {
        self.slots[idx].active.store(0, Ordering::Release);
    }

    /// Access a slot by index.
    #[must_use]
    pub fn slot(&self, idx: usize) -> &WorkerSlot {
        &self.slots[idx]
    }

    /// Number of active workers.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_active()).count()
    }

    /// The barrier: minimum `observed_gen` over live workers.
    ///
    /// Workers with stale heartbeats are treated as if they had
    /// advanced past everything. Returns `None` when no live worker
    /// exists, in which case every retired generation is reclaimable.
    #[must_use]
    pub fn min_observed(&self, now_ns: u64, stale_ns: u64) -> Option<u64> {
        self.slots
            .iter()
            .filter(|s| s.is_active() && !s.is_stale(now_ns, stale_ns))
            .map(WorkerSlot::observed_gen)
            .min()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh() -> Box<WorkerRegistry> {
        // SAFETY: zeroed slots are valid inactive slots; init formats.
        let mut reg: Box<WorkerRegistry> = unsafe { Box::new_zeroed().assume_init() };
        reg.init();
        reg
    }

    #[test]
    fn register_starts_at_current_gen() {
        let reg = fresh();
        let idx = reg.register(0, 5, 100).unwrap();
        assert_eq!(reg.slot(idx).observed_gen(), 5);
        assert!(reg.slot(idx).is_active());
    }

    #[test]
    fn barrier_is_minimum_over_live_workers() {
        let reg = fresh();
        let a = reg.register(0, 5, 0).unwrap();
        let b = reg.register(0, 5, 0).unwrap();
        reg.slot(a).observe(6, 10);
        reg.slot(b).observe(7, 10);
        assert_eq!(reg.min_observed(11, 1_000), Some(6));
    }

    #[test]
    fn stale_worker_is_excluded() {
        let reg = fresh();
        let a = reg.register(0, 5, 0).unwrap();
        let b = reg.register(0, 5, 0).unwrap();
        reg.slot(a).observe(6, 1_000);
        reg.slot(b).observe(9, 100_000);
        // Worker a heartbeated long ago; only b counts.
        assert_eq!(reg.min_observed(200_000, 50_000), Some(9));
    }

    #[test]
    fn no_workers_means_no_barrier() {
        let reg = fresh();
        assert_eq!(reg.min_observed(0, 1_000), None);
        let idx = reg.register(0, 1, 0).unwrap();
        reg.deregister(idx);
        assert_eq!(reg.min_observed(0, 1_000), None);
    }

    #[test]
    fn registry_capacity() {
        let reg = fresh();
        for _ in 0..MAX_WORKERS {
            reg.register(0, 0, 0).unwrap();
        }
        assert!(matches!(
            reg.register(0, 0, 0),
            Err(ShmError::WorkerRegistryFull { .. })
        ));
    }
}
