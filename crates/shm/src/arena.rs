//! The arena: one shared mapping per NUMA instance.

use std::path::{Path, PathBuf};
use std::ptr::NonNull;

use riptide_log::{debug, info};

use crate::agent::AgentSlot;
use crate::context::MemoryContext;
use crate::error::{ShmError, ShmResult};
use crate::header::ArenaHeader;
use crate::platform::{self, Mapping};
use crate::worker::WorkerSlot;

/// Smallest useful arena: header plus some heap.
const MIN_ARENA: usize = 1 << 20;

/// Options for creating a fresh arena.
#[derive(Debug, Clone)]
pub struct ArenaOptions {
    /// Arena size in bytes; rounded up to the page size.
    pub size: usize,
    /// Instance index within the host.
    pub instance_idx: u32,
    /// NUMA node this arena serves.
    pub numa_idx: u32,
    /// Bind the mapping's pages to `numa_idx` (best effort).
    pub numa_bind: bool,
}

impl Default for ArenaOptions {
    fn default() -> Self {
        Self {
            size: 256 << 20,
            instance_idx: 0,
            numa_idx: 0,
            numa_bind: false,
        }
    }
}

/// Process-local handle to a shared arena.
///
/// The handle owns the mapping; all state that matters lives inside
/// the mapping itself, so any number of processes can hold handles to
/// the same file and see one consistent arena.
#[derive(Debug)]
pub struct Arena {
    map: Mapping,
    path: Option<PathBuf>,
}

impl Arena {
    /// Create and format a new arena file.
    pub fn create(path: &Path, opts: &ArenaOptions) -> ShmResult<Self> {
        let size = platform::round_up_to_page(opts.size, platform::page_size());
        if size < MIN_ARENA {
            return Err(ShmError::ArenaTooSmall {
                size,
                min: MIN_ARENA,
            });
        }
        let map = Mapping::file(path, size, true)?;
        if opts.numa_bind {
            map.bind_to_numa_node(opts.numa_idx);
        }
        // SAFETY: fresh file pages are zeroed; nothing else maps the
        // file until create returns.
        unsafe {
            ArenaHeader::init_at(map.base(), size as u64, opts.instance_idx, opts.numa_idx);
        }
        info!(
            path = %path.display(),
            size,
            numa = opts.numa_idx,
            hugepages = platform::is_hugepage_path(path),
            "arena created"
        );
        Ok(Self {
            map,
            path: Some(path.to_path_buf()),
        })
    }

    /// Map and validate an existing arena file (the attach protocol).
    pub fn open(path: &Path) -> ShmResult<Self> {
        let len = std::fs::metadata(path)?.len() as usize;
        let map = Mapping::file(path, len, false)?;
        let arena = Self {
            map,
            path: Some(path.to_path_buf()),
        };
        arena.validate()?;
        debug!(path = %path.display(), len, "arena opened");
        Ok(arena)
    }

    /// Create an anonymous arena (tests, single-process deployments).
    pub fn anonymous(opts: &ArenaOptions) -> ShmResult<Self> {
        let size = platform::round_up_to_page(opts.size, platform::page_size());
        if size < MIN_ARENA {
            return Err(ShmError::ArenaTooSmall {
                size,
                min: MIN_ARENA,
            });
        }
        let map = Mapping::anonymous(size)?;
        // SAFETY: anonymous pages are zeroed and exclusively ours.
        unsafe {
            ArenaHeader::init_at(map.base(), size as u64, opts.instance_idx, opts.numa_idx);
        }
        Ok(Self { map, path: None })
    }

    /// Walk the header invariants; called automatically by `open`.
    pub fn validate(&self) -> ShmResult<()> {
        if self.map.len() < size_of::<ArenaHeader>() {
            return Err(ShmError::ArenaTooSmall {
                size: self.map.len(),
                min: MIN_ARENA,
            });
        }
        self.header().validate(self.map.len() as u64)
    }

    /// The header at offset 0.
    #[must_use]
    pub fn header(&self) -> &ArenaHeader {
        // SAFETY: create/open guarantee a formatted header at the base
        // of a mapping at least as large as the header.
        unsafe { self.map.base().cast::<ArenaHeader>().as_ref() }
    }

    /// Base address of this process's mapping.
    #[must_use]
    pub fn base(&self) -> NonNull<u8> {
        self.map.base()
    }

    /// Mapping length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Whether the arena is empty (never; clippy symmetry).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.len() == 0
    }

    /// Path of the backing file, if file-backed.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Allocate `size` bytes from the arena heap without quota
    /// accounting. Prefer [`alloc_in`](Self::alloc_in).
    pub fn alloc(&self, size: usize) -> ShmResult<NonNull<u8>> {
        self.header().allocator().alloc(self.base(), size)
    }

    /// Free a block previously obtained with the same `size`.
    pub fn free(&self, ptr: NonNull<u8>, size: usize) {
        self.header().allocator().free(self.base(), ptr, size);
    }

    /// Allocate through a memory context, enforcing its quota.
    ///
    /// The quota is charged with the rounded block size, so what the
    /// context records is exactly what the heap lost.
    pub fn alloc_in(&self, ctx: &MemoryContext, size: usize) -> ShmResult<NonNull<u8>> {
        let charged = size.max(crate::block::MIN_BLOCK).next_power_of_two() as u64;
        ctx.charge(charged)?;
        match self.alloc(size) {
            Ok(ptr) => Ok(ptr),
            Err(e) => {
                ctx.credit(charged);
                Err(e)
            }
        }
    }

    /// Free through a memory context.
    pub fn free_in(&self, ctx: &MemoryContext, ptr: NonNull<u8>, size: usize) {
        self.free(ptr, size);
        ctx.credit(size.max(crate::block::MIN_BLOCK).next_power_of_two() as u64);
    }

    /// Arena-relative offset of a pointer inside this mapping.
    #[must_use]
    pub fn offset_of(&self, ptr: NonNull<u8>) -> u64 {
        debug_assert!(self.contains(ptr.as_ptr()));
        ptr.as_ptr() as u64 - self.base().as_ptr() as u64
    }

    /// Pointer at an arena-relative offset.
    ///
    /// # Safety
    ///
    /// `off` must be within the mapping and point at whatever the
    /// caller casts it to.
    #[must_use]
    pub unsafe fn ptr_at(&self, off: u64) -> *mut u8 {
        debug_assert!((off as usize) < self.len());
        // SAFETY: per contract off is in bounds.
        unsafe { self.base().as_ptr().add(off as usize) }
    }

    /// Whether `ptr` falls inside this mapping.
    #[must_use]
    pub fn contains(&self, ptr: *const u8) -> bool {
        let base = self.base().as_ptr() as usize;
        let p = ptr as usize;
        p >= base && p < base + self.len()
    }

    /// Attach a control-plane agent (the §attach protocol).
    pub fn attach_agent(&self, name: &str, pid: u32, limit: u64) -> ShmResult<AgentHandle<'_>> {
        let now = platform::monotonic_ns();
        let slot = self.header().agents().attach(name, pid, limit, now)?;
        info!(name, pid, slot, "agent attached");
        Ok(AgentHandle { arena: self, slot })
    }

    /// Register a data-plane worker thread.
    pub fn register_worker(&self, numa_idx: u32) -> ShmResult<WorkerHandle<'_>> {
        let now = platform::monotonic_ns();
        let generation = self.header().published_gen();
        let slot = self.header().workers().register(numa_idx, generation, now)?;
        debug!(slot, numa = numa_idx, start_gen = generation, "worker registered");
        Ok(WorkerHandle { arena: self, slot })
    }
}

// SAFETY: the handle owns the mapping and every shared structure
// inside it is atomics-or-lock protected; moving the handle between
// threads moves nothing the mapping cares about.
unsafe impl Send for Arena {}
// SAFETY: same argument; &Arena only exposes synchronized state.
unsafe impl Sync for Arena {}

/// A control-plane agent attached to an arena.
///
/// Dropping the handle does *not* detach: agents survive process
/// restarts by re-attaching under the same name and a new pid, and a
/// crashed agent is reaped by the staleness policy instead.
pub struct AgentHandle<'a> {
    arena: &'a Arena,
    slot: usize,
}

impl<'a> AgentHandle<'a> {
    /// The owning arena.
    #[must_use]
    pub fn arena(&self) -> &'a Arena {
        self.arena
    }

    /// Registry slot index.
    #[must_use]
    pub fn slot_index(&self) -> usize {
        self.slot
    }

    /// The underlying registry slot.
    #[must_use]
    pub fn slot(&self) -> &'a AgentSlot {
        self.arena.header().agents().slot(self.slot)
    }

    /// The agent's memory context.
    #[must_use]
    pub fn context(&self) -> &'a MemoryContext {
        self.slot().context()
    }

    /// Allocate from the arena against this agent's quota.
    pub fn alloc(&self, size: usize) -> ShmResult<NonNull<u8>> {
        self.arena.alloc_in(self.context(), size)
    }

    /// Free a block allocated through this agent.
    pub fn free(&self, ptr: NonNull<u8>, size: usize) {
        self.arena.free_in(self.context(), ptr, size);
    }

    /// Record a heartbeat.
    pub fn heartbeat(&self, generation: u64) {
        self.slot().heartbeat(platform::monotonic_ns(), generation);
    }

    /// Begin detaching; memory is reclaimed once the agent's
    /// generations retire.
    pub fn detach(self) {
        self.arena.header().agents().detach(self.slot);
        info!(slot = self.slot, "agent detaching");
    }
}

/// A data-plane worker registered in an arena.
pub struct WorkerHandle<'a> {
    arena: &'a Arena,
    slot: usize,
}

impl<'a> WorkerHandle<'a> {
    /// Registry slot index.
    #[must_use]
    pub fn slot_index(&self) -> usize {
        self.slot
    }

    /// The underlying registry slot.
    #[must_use]
    pub fn slot(&self) -> &'a WorkerSlot {
        self.arena.header().workers().slot(self.slot)
    }

    /// Latest generation this worker acknowledged.
    #[must_use]
    pub fn observed_gen(&self) -> u64 {
        self.slot().observed_gen()
    }

    /// Acknowledge `generation` at a quiescent point.
    pub fn observe(&self, generation: u64) {
        self.slot().observe(generation, platform::monotonic_ns());
    }

    /// Heartbeat without a generation change.
    pub fn heartbeat(&self) {
        self.slot().heartbeat(platform::monotonic_ns());
    }
}

impl Drop for WorkerHandle<'_> {
    fn drop(&mut self) {
        self.arena.header().workers().deregister(self.slot);
    }
}
