//! Generation reclamation and registry policing.
//!
//! A retired generation is freed once every live worker's
//! `observed_gen` has moved strictly past it. Workers and agents with
//! stale heartbeats are excluded (and demoted) so a crashed process
//! cannot pin memory forever. The retired chain is edited under the
//! configuration lock, which also serializes us against publishers.

use std::ptr::NonNull;

use riptide_config::layout::ModuleData;
use riptide_config::{ArenaVec, BOOTSTRAP_AGENT, ConfigGen, GenView};
use riptide_log::{debug, info};
use riptide_shm::{Arena, MemoryContext, monotonic_ns};

/// What one reclamation pass did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReclaimStats {
    /// Retired generations whose memory was returned.
    pub generations_freed: usize,
    /// Attached agents demoted to draining for missing heartbeats.
    pub agents_demoted: usize,
    /// Draining agent slots fully released.
    pub agent_slots_released: usize,
}

/// Run one reclamation pass.
///
/// `stale_timeout_ns` is the heartbeat cutoff for both workers and
/// agents (three heartbeat intervals by convention).
pub fn reclaim(arena: &Arena, stale_timeout_ns: u64) -> ReclaimStats {
    let mut stats = ReclaimStats::default();
    let now = monotonic_ns();

    stats.agents_demoted = arena.header().agents().demote_stale(now, stale_timeout_ns);

    // Collect the freeable suffix of the retired chain under the
    // config lock, then free outside it: freeing only touches memory
    // no worker can reach any more.
    let mut freeable: Vec<NonNull<ConfigGen>> = Vec::new();
    {
        let _guard = arena.header().config_lock().lock();
        let Some(head) = arena.header().config_head() else {
            return stats;
        };
        let barrier = arena.header().workers().min_observed(now, stale_timeout_ns);

        // Generation numbers strictly decrease along the chain, so the
        // freeable set is a suffix. Find the cut point: the last
        // generation that must be retained.
        let head = head.cast::<ConfigGen>();
        let mut retained = head;
        loop {
            // SAFETY: chain nodes are live until this pass frees them,
            // and we hold the config lock.
            let prev = unsafe { retained.as_ref() }.prev.load();
            let Some(prev) = prev else { break };
            // SAFETY: same as above.
            let prev_gen = unsafe { prev.as_ref() }.gen_number;
            let prev_free = barrier.is_none_or(|b| b > prev_gen);
            if prev_free {
                // Everything from prev down is freeable; detach it.
                let mut collect = Some(prev);
                while let Some(node) = collect {
                    freeable.push(node);
                    // SAFETY: node is live until freed below.
                    collect = unsafe { node.as_ref() }.prev.load();
                }
                // SAFETY: retained is live; the prev slot is only
                // written under the config lock.
                unsafe {
                    let slot = std::ptr::addr_of_mut!((*retained.as_ptr()).prev);
                    (*slot).set(std::ptr::null());
                }
                break;
            }
            retained = prev;
        }
    }

    for node in &freeable {
        // SAFETY: detached from the chain, past the worker barrier,
        // unreachable by anyone but us.
        unsafe {
            free_generation(arena, *node);
        }
        stats.generations_freed += 1;
    }

    stats.agent_slots_released = arena.header().agents().sweep_draining();

    if stats != ReclaimStats::default() {
        info!(
            generations = stats.generations_freed,
            demoted = stats.agents_demoted,
            released = stats.agent_slots_released,
            "reclamation pass"
        );
    }
    stats
}

/// Sum packet counters over all worker slots.
#[must_use]
pub fn sum_counters(arena: &Arena) -> CounterTotals {
    let workers = arena.header().workers();
    let mut totals = CounterTotals::default();
    for idx in 0..riptide_shm::MAX_WORKERS {
        let slot = workers.slot(idx);
        if !slot.is_active() {
            continue;
        }
        let c = slot.counters();
        use std::sync::atomic::Ordering::Relaxed;
        totals.rx += c.rx.load(Relaxed);
        totals.tx += c.tx.load(Relaxed);
        totals.drop += c.drop.load(Relaxed);
        totals.bypass += c.bypass.load(Relaxed);
        totals.parse_err += c.parse_err.load(Relaxed);
    }
    totals
}

/// Summed worker counters; approximate (no cross-worker
/// atomicity).
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CounterTotals {
    pub rx: u64,
    pub tx: u64,
    pub drop: u64,
    pub bypass: u64,
    pub parse_err: u64,
}

/// Free one detached generation: arrays to the builder's context,
/// module payloads (on last reference) to their owners'.
///
/// # Safety
///
/// `generation` must be detached from the retired chain, past the worker
/// barrier, and not freed before.
unsafe fn free_generation(arena: &Arena, generation: NonNull<ConfigGen>) {
    // SAFETY: per contract the generation is unreachable and live.
    let view = GenView::new(unsafe { generation.as_ref() });
    let gen_number = view.gen_number();
    let builder_ctx = builder_context(arena, view.raw().builder_agent_slot);

    let free = |ptr: *const u8, size: usize| {
        let Some(ptr) = NonNull::new(ptr.cast_mut()) else {
            return;
        };
        match builder_ctx {
            Some(ctx) => arena.free_in(ctx, ptr, size),
            None => arena.free(ptr, size),
        }
    };
    let free_vec = |vec: &ArenaVec<u32>| {
        if let Some(first) = vec.first_ptr() {
            free(
                first.as_ptr().cast(),
                ArenaVec::<u32>::byte_size(vec.len()),
            );
        }
    };

    for function in view.functions() {
        for chain in view.chains_of(function) {
            free_vec(&chain.modules);
        }
        if let Some(first) = function.chains.first_ptr() {
            free(
                first.as_ptr().cast(),
                ArenaVec::<riptide_config::ChainEntry>::byte_size(function.chains.len()),
            );
        }
        free_vec(&function.ring);
    }
    for pipeline in view.pipelines() {
        free_vec(&pipeline.functions);
    }
    for device in view.devices() {
        for pairs in [&device.input, &device.output] {
            if let Some(first) = pairs.first_ptr() {
                free(
                    first.as_ptr().cast(),
                    ArenaVec::<riptide_config::PipelineWeight>::byte_size(pairs.len()),
                );
            }
        }
        free_vec(&device.input_ring);
        free_vec(&device.output_ring);
    }

    // Module payloads are shared across generations; only the last
    // reference returns the block, credited to the owning agent.
    for entry in view.cp_modules() {
        let Some(data) = entry.data.load() else {
            continue;
        };
        // SAFETY: payload blocks outlive every generation referencing
        // them by construction of the refcount.
        let data_ref = unsafe { data.as_ref() };
        if data_ref.release() {
            let size = ModuleData::alloc_size(data_ref.len());
            let ptr = data.cast::<u8>();
            match builder_context(arena, entry.agent_slot) {
                Some(ctx) => arena.free_in(ctx, ptr, size),
                None => arena.free(ptr, size),
            }
        }
    }

    for (vec_ptr, size) in [
        (
            view.raw().dp_modules.first_ptr().map(NonNull::cast::<u8>),
            ArenaVec::<riptide_config::DpModuleEntry>::byte_size(view.dp_modules().len()),
        ),
        (
            view.raw().cp_modules.first_ptr().map(NonNull::cast::<u8>),
            ArenaVec::<riptide_config::CpModuleEntry>::byte_size(view.cp_modules().len()),
        ),
        (
            view.raw().functions.first_ptr().map(NonNull::cast::<u8>),
            ArenaVec::<riptide_config::FunctionEntry>::byte_size(view.functions().len()),
        ),
        (
            view.raw().pipelines.first_ptr().map(NonNull::cast::<u8>),
            ArenaVec::<riptide_config::PipelineEntry>::byte_size(view.pipelines().len()),
        ),
        (
            view.raw().devices.first_ptr().map(NonNull::cast::<u8>),
            ArenaVec::<riptide_config::DeviceEntry>::byte_size(view.devices().len()),
        ),
    ] {
        if let Some(ptr) = vec_ptr {
            free(ptr.as_ptr(), size);
        }
    }

    free(generation.as_ptr().cast(), size_of::<ConfigGen>());
    debug!(gen_number, "generation freed");
}

fn builder_context(arena: &Arena, agent_slot: u32) -> Option<&MemoryContext> {
    if agent_slot == BOOTSTRAP_AGENT {
        return None;
    }
    Some(arena.header().agents().slot(agent_slot as usize).context())
}
