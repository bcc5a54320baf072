//! Worker-local counters, flushed to the shared slot per batch.
//!
//! The hot path bumps plain integers on a padded line the worker owns;
//! the arena slot only sees one `fetch_add` per field per batch, so
//! control-plane reads never bounce the worker's cache line.

use crossbeam_utils::CachePadded;
use riptide_shm::WorkerSlot;

/// Packet tallies for the current batch window.
#[derive(Default)]
pub struct LocalCounters {
    inner: CachePadded<Tallies>,
}

#[derive(Default)]
struct Tallies {
    rx: u64,
    tx: u64,
    drop: u64,
    bypass: u64,
    parse_err: u64,
}

impl LocalCounters {
    pub fn rx(&mut self, n: u64) {
        self.inner.rx += n;
    }

    pub fn tx(&mut self, n: u64) {
        self.inner.tx += n;
    }

    pub fn dropped(&mut self, n: u64) {
        self.inner.drop += n;
    }

    pub fn bypassed(&mut self, n: u64) {
        self.inner.bypass += n;
    }

    pub fn parse_err(&mut self, n: u64) {
        self.inner.parse_err += n;
    }

    /// Push the window into the shared slot and reset.
    pub fn flush(&mut self, slot: &WorkerSlot) {
        let t = &mut *self.inner;
        if (t.rx | t.tx | t.drop | t.bypass | t.parse_err) == 0 {
            return;
        }
        slot.counters().add(t.rx, t.tx, t.drop, t.bypass, t.parse_err);
        *t = Tallies::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flush_accumulates_into_slot() {
        // SAFETY: a zeroed registry is a valid registry of inactive
        // slots with zero counters.
        let reg: Box<riptide_shm::WorkerRegistry> = unsafe { Box::new_zeroed().assume_init() };
        let slot = reg.slot(0);

        let mut local = LocalCounters::default();
        local.rx(10);
        local.tx(7);
        local.dropped(2);
        local.flush(slot);
        local.flush(slot); // empty flush is a no-op

        use std::sync::atomic::Ordering::Relaxed;
        assert_eq!(slot.counters().rx.load(Relaxed), 10);
        assert_eq!(slot.counters().tx.load(Relaxed), 7);
        assert_eq!(slot.counters().drop.load(Relaxed), 2);
    }
}
