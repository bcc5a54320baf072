//! The arena header: everything a process needs to find at offset 0.

use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::agent::AgentRegistry;
use crate::block::BlockAlloc;
use crate::error::{ShmError, ShmResult};
use crate::offset::AtomicRelPtr;
use crate::sync::SpinLock;
use crate::worker::WorkerRegistry;

/// ASCII `YANET2\0\0`; fixed by the on-disk format.
pub const ARENA_MAGIC: u64 = u64::from_le_bytes(*b"YANET2\0\0");

/// Current layout version. Layout is bit-stable within one version;
/// forward-incompatible changes bump this.
pub const ARENA_VERSION: u32 = 1;

/// Header at offset 0 of every arena.
///
/// All sub-structures are embedded (registries, allocator state) or
/// reached through relative pointers (the configuration head), so the
/// header is valid in every mapping of the file.
#[repr(C)]
pub struct ArenaHeader {
    magic: u64,
    version: u32,
    instance_idx: u32,
    numa_idx: u32,
    _pad: u32,
    size: u64,
    /// Latest published configuration generation number.
    published_gen: AtomicU64,
    /// Type-erased head of the configuration generation chain; the
    /// config layer casts it to its generation type.
    config_head: AtomicRelPtr<u8>,
    /// Serializes configuration writers. Readers never take it: the
    /// acquire load of `config_head` is their entire protocol.
    config_lock: SpinLock,
    allocator: BlockAlloc,
    agents: AgentRegistry,
    workers: WorkerRegistry,
}

impl ArenaHeader {
    /// Format a header in place over zeroed memory.
    ///
    /// # Safety
    ///
    /// `base` points at a zero-initialized mapping of `size` bytes of
    /// which this header occupies the start; nothing else reads the
    /// mapping concurrently.
    pub(crate) unsafe fn init_at(
        base: NonNull<u8>,
        size: u64,
        instance_idx: u32,
        numa_idx: u32,
    ) {
        let header = base.as_ptr().cast::<Self>();
        // SAFETY: per contract the memory is ours, zeroed, large
        // enough, and page-aligned (mmap), exceeding our alignment.
        unsafe {
            (*header).version = ARENA_VERSION;
            (*header).instance_idx = instance_idx;
            (*header).numa_idx = numa_idx;
            (*header).size = size;
            (*header).published_gen = AtomicU64::new(0);
            (*header).config_head = AtomicRelPtr::null();
            (*header).config_lock = SpinLock::new();

            let heap_off = Self::heap_offset() as u64;
            (*header)
                .allocator
                .init(base, heap_off, size - heap_off);
            (*header).agents.init();
            (*header).workers.init();

            // Magic last: a half-formatted arena never validates.
            (*header).magic = ARENA_MAGIC;
        }
    }

    /// Offset of the allocator heap: the header rounded up to the
    /// minimum block size.
    #[must_use]
    pub(crate) fn heap_offset() -> usize {
        let align = crate::block::MIN_BLOCK;
        (size_of::<Self>() + align - 1) & !(align - 1)
    }

    /// Verify magic, version and size against the live mapping.
    pub fn validate(&self, mapped_len: u64) -> ShmResult<()> {
        if self.magic != ARENA_MAGIC {
            return Err(ShmError::BadMagic { found: self.magic });
        }
        if self.version != ARENA_VERSION {
            return Err(ShmError::VersionMismatch {
                found: self.version,
                expected: ARENA_VERSION,
            });
        }
        if self.size != mapped_len {
            return Err(ShmError::SizeMismatch {
                header: self.size,
                mapped: mapped_len,
            });
        }
        if !self.allocator.looks_sane(mapped_len) {
            return Err(ShmError::SizeMismatch {
                header: self.size,
                mapped: mapped_len,
            });
        }
        Ok(())
    }

    /// Instance index within the host.
    #[must_use]
    pub fn instance_idx(&self) -> u32 {
        self.instance_idx
    }

    /// NUMA node this arena serves.
    #[must_use]
    pub fn numa_idx(&self) -> u32 {
        self.numa_idx
    }

    /// Arena size in bytes as recorded at format time.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.size
    }

    /// The block allocator state.
    #[must_use]
    pub fn allocator(&self) -> &BlockAlloc {
        &self.allocator
    }

    /// The agent registry.
    #[must_use]
    pub fn agents(&self) -> &AgentRegistry {
        &self.agents
    }

    /// The worker registry.
    #[must_use]
    pub fn workers(&self) -> &WorkerRegistry {
        &self.workers
    }

    /// Latest published generation number (0 before the first publish).
    #[must_use]
    pub fn published_gen(&self) -> u64 {
        self.published_gen.load(Ordering::Acquire)
    }

    /// Acquire-load the configuration head.
    #[must_use]
    pub fn config_head(&self) -> Option<NonNull<u8>> {
        self.config_head.load()
    }

    /// The configuration writer lock. Besides publication it also
    /// serializes generation reclamation, which edits the retired
    /// chain's links.
    #[must_use]
    pub fn config_lock(&self) -> &SpinLock {
        &self.config_lock
    }

    /// Publish a new configuration generation.
    ///
    /// Serialized by the configuration lock; `gen` must be exactly one
    /// past the currently published number, which catches two builders
    /// racing from the same snapshot.
    pub fn publish_config(&self, head: *const u8, generation: u64) -> ShmResult<()> {
        let _guard = self.config_lock.lock();
        let current = self.published_gen.load(Ordering::Relaxed);
        if generation != current + 1 {
            return Err(ShmError::StaleGeneration {
                publishing: generation,
                head: current,
            });
        }
        self.config_head.store(head);
        self.published_gen.store(generation, Ordering::Release);
        Ok(())
    }

    /// Publish while the caller already holds the configuration lock.
    ///
    /// Builders hold the lock across snapshot, build and publish so
    /// the snapshotted head cannot be retired and freed under them.
    ///
    /// # Safety
    ///
    /// The caller must hold [`config_lock`](Self::config_lock) and
    /// `generation` must be exactly one past the published number;
    /// violating either corrupts the generation chain.
    pub unsafe fn publish_config_locked(&self, head: *const u8, generation: u64) {
        debug_assert_eq!(generation, self.published_gen.load(Ordering::Relaxed) + 1);
        self.config_head.store(head);
        self.published_gen.store(generation, Ordering::Release);
    }
}
