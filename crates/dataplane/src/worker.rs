//! The per-thread worker engine.
//!
//! One worker owns one slot, one I/O endpoint and every packet list it
//! touches; the loop never blocks and never takes a lock. The only
//! cross-thread traffic is the acquire load of the configuration head
//! at the top of each batch (the quiescent point) and the relaxed
//! counter flush at the bottom.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use riptide_config::{GenView, InstanceOptions};
use riptide_log::{debug, info, warn};
use riptide_shm::{Arena, WorkerHandle, monotonic_ns};

use crate::counters::LocalCounters;
use crate::error::DataplaneResult;
use crate::front::PacketFront;
use crate::io::PacketIo;
use crate::list::PacketList;
use crate::module::{ModuleCtx, ModuleRegistry};

/// What one batch did; returned by [`Worker::run_batch`] for tests and
/// instrumentation.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchStats {
    /// Generation the batch executed against.
    pub generation: u64,
    pub rx: usize,
    pub emitted: usize,
    pub dropped: usize,
    pub bypassed: usize,
    pub pending: usize,
    pub parse_errors: usize,
}

/// A data-plane worker bound to one arena slot.
pub struct Worker<'a, IO: PacketIo> {
    arena: &'a Arena,
    handle: WorkerHandle<'a>,
    registry: &'a ModuleRegistry,
    io: IO,
    batch_size: usize,
    stop: &'a AtomicBool,
    counters: LocalCounters,
    /// Packets deferred by modules, re-queued before the next drain.
    deferred: PacketList,
    seen_gen: u64,
    /// Generation directory index -> registry handler index.
    bindings: Vec<Option<usize>>,
}

impl<'a, IO: PacketIo> Worker<'a, IO> {
    /// Register a worker slot and build the engine around it.
    pub fn new(
        arena: &'a Arena,
        registry: &'a ModuleRegistry,
        io: IO,
        options: &InstanceOptions,
        stop: &'a AtomicBool,
    ) -> DataplaneResult<Self> {
        let handle = arena.register_worker(options.numa_idx)?;
        info!(
            slot = handle.slot_index(),
            numa = options.numa_idx,
            batch = options.batch_size,
            "worker starting"
        );
        Ok(Self {
            arena,
            handle,
            registry,
            io,
            batch_size: options.batch_size,
            stop,
            counters: LocalCounters::default(),
            deferred: PacketList::new(),
            seen_gen: 0,
            bindings: Vec::new(),
        })
    }

    /// Slot index in the arena's worker registry.
    #[must_use]
    pub fn slot_index(&self) -> usize {
        self.handle.slot_index()
    }

    /// The I/O endpoint (tests inspect emitted packets through this).
    pub fn io_mut(&mut self) -> &mut IO {
        &mut self.io
    }

    /// Run until the stop flag is raised, then drain in-flight packets
    /// into drop and exit.
    pub fn run(&mut self) {
        while !self.stop.load(Ordering::Acquire) {
            self.run_batch();
        }
        let leftover = self.deferred.len();
        if leftover > 0 {
            self.counters.dropped(leftover as u64);
            self.deferred = PacketList::new();
        }
        self.counters.flush(self.handle.slot());
        info!(slot = self.handle.slot_index(), leftover, "worker stopped");
    }

    /// Execute one batch iteration.
    pub fn run_batch(&mut self) -> BatchStats {
        let mut stats = BatchStats::default();
        let now = monotonic_ns();

        // Quiescent point: observe the configuration head.
        let Some(head) = self.arena.header().config_head() else {
            self.handle.heartbeat();
            return stats;
        };
        // SAFETY: the generation barrier keeps every generation at or
        // above our observed_gen alive until the next observe call.
        let view = unsafe { GenView::from_head(head) };
        if view.gen_number() != self.seen_gen {
            self.rebind(&view);
            self.seen_gen = view.gen_number();
            self.handle.observe(self.seen_gen);
        } else {
            self.handle.heartbeat();
        }
        stats.generation = self.seen_gen;

        let mut front = PacketFront::new();
        front.input.append(&mut self.deferred);
        let before = front.input.len();
        self.io.rx_drain(self.batch_size, &mut front.input);
        stats.rx = front.input.len() - before;
        self.counters.rx(stats.rx as u64);

        // Partition by (rx device -> input pipeline), parsing on the
        // way; unparseable or unroutable packets drop here.
        let mut by_pipeline: BTreeMap<u32, PacketList> = BTreeMap::new();
        while let Some(mut packet) = front.input.pop_front() {
            if packet.network_header == 0 {
                if let Err(e) = packet.parse() {
                    debug!(error = %e, rx_device = packet.rx_device_id, "packet dropped");
                    stats.parse_errors += 1;
                    front.drop.push_back(packet);
                    continue;
                }
            }
            let pipeline = view
                .device_by_id(packet.rx_device_id)
                .and_then(|dev| dev.select_input(packet.hash));
            match pipeline {
                Some(p) => by_pipeline.entry(p).or_default().push_back(packet),
                None => front.drop.push_back(packet),
            }
        }
        self.counters.parse_err(stats.parse_errors as u64);

        // Drive each pipeline; completed packets gather in `finished`.
        let mut finished = PacketList::new();
        for (pipeline, list) in by_pipeline {
            front.input = list;
            self.run_pipeline(&view, pipeline, now, &mut front);
            finished.append(&mut front.input);
        }

        // Bypass packets re-enter device selection alongside the
        // pipeline output.
        stats.bypassed = front.bypass.len();
        self.counters.bypassed(stats.bypassed as u64);
        finished.append(&mut front.bypass);

        // Transmit: group by (tx device, output pipeline).
        let mut by_tx: BTreeMap<(u32, u32), PacketList> = BTreeMap::new();
        while let Some(packet) = finished.pop_front() {
            let target = view
                .device_by_id(packet.tx_device_id)
                .and_then(|dev| dev.select_output(packet.hash).map(|p| (dev.device_id, p)));
            match target {
                Some(key) => by_tx.entry(key).or_default().push_back(packet),
                None => front.drop.push_back(packet),
            }
        }
        for ((device, pipeline), list) in by_tx {
            stats.emitted += list.len();
            self.io.tx_emit(device, pipeline, list);
        }
        self.counters.tx(stats.emitted as u64);

        // Deferred packets re-enter the next batch's input.
        stats.pending = front.pending.len();
        self.deferred.append(&mut front.pending);

        // Everything in drop is released here.
        stats.dropped = front.drop.len();
        self.counters.dropped(stats.dropped as u64);
        front.drop = PacketList::new();

        debug_assert_eq!(front.total(), 0, "packets left behind in the front");
        self.counters.flush(self.handle.slot());
        stats
    }

    /// Run one pipeline over `front.input`; completed packets end up
    /// back in `front.input`, everything else in drop/bypass/pending.
    fn run_pipeline(&mut self, view: &GenView<'a>, pipeline: u32, now: u64, front: &mut PacketFront) {
        for &fn_idx in view.pipeline_functions(pipeline) {
            let function = &view.functions()[fn_idx as usize];
            let chains = view.chains_of(function);
            if chains.is_empty() {
                continue;
            }

            // Weighted fan-out: bucket the input per selected chain.
            let mut buckets: Vec<PacketList> =
                (0..chains.len()).map(|_| PacketList::new()).collect();
            while let Some(packet) = front.input.pop_front() {
                match view.select_chain_index(fn_idx, packet.hash) {
                    Some(chain_idx) => buckets[chain_idx as usize].push_back(packet),
                    None => front.drop.push_back(packet),
                }
            }

            let mut next_input = PacketList::new();
            for (chain_idx, bucket) in buckets.into_iter().enumerate() {
                if bucket.is_empty() {
                    continue;
                }
                front.input = bucket;
                self.run_chain(view, view.chain_modules(&chains[chain_idx]), now, front);
                next_input.append(&mut front.input);
            }
            front.input = next_input;
        }
    }

    /// Run one chain's module sequence over `front.input`.
    fn run_chain(&mut self, view: &GenView<'a>, modules: &[u32], now: u64, front: &mut PacketFront) {
        for &module_idx in modules {
            if front.input.is_empty() {
                break;
            }
            let entry = &view.cp_modules()[module_idx as usize];
            let Some(handler_idx) = self
                .bindings
                .get(entry.module_type as usize)
                .copied()
                .flatten()
            else {
                // Configured module type with no local handler: the
                // packets cannot be processed correctly, drop them.
                front.drop.append(&mut front.input);
                break;
            };
            let ctx = ModuleCtx {
                worker_idx: self.handle.slot_index(),
                now_ns: now,
                config: entry.payload(),
                module_name: entry.name.as_str(),
            };
            self.registry.get(handler_idx).handle(&ctx, front);
            front.switch();
        }
    }

    /// Rebuild the generation directory -> handler binding cache.
    fn rebind(&mut self, view: &GenView<'a>) {
        self.bindings = view
            .dp_modules()
            .iter()
            .map(|entry| {
                let bound = self.registry.find(entry.name.as_str());
                if bound.is_none() {
                    warn!(
                        module = entry.name.as_str(),
                        "generation names a module type with no registered handler"
                    );
                }
                bound
            })
            .collect();
        debug!(
            generation = view.gen_number(),
            bound = self.bindings.iter().filter(|b| b.is_some()).count(),
            "generation observed"
        );
    }
}
