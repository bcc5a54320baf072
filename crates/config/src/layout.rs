//! In-arena layout of a configuration generation.
//!
//! Everything in this module is `repr(C)`, reached through
//! self-relative pointers and immutable once the generation has been
//! published. Cross-entity references are indices into the sibling
//! arrays, never pointers, so a generation stays valid across
//! mappings and machine reboots.
//!
//! Sorting conventions (maintained by the builder, relied on by
//! lookups): `cp_modules` by (type, name), `functions` and `pipelines`
//! by name, `devices` by `device_id`.

use std::ptr::NonNull;
use std::sync::atomic::{AtomicU32, Ordering};

use riptide_shm::RelPtr;

use crate::name::Name;

/// A counted array behind a self-relative pointer.
#[repr(C)]
pub struct ArenaVec<T> {
    items: RelPtr<T>,
    count: u32,
    _pad: u32,
}

impl<T> ArenaVec<T> {
    /// An empty array.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            items: RelPtr::null(),
            count: 0,
            _pad: 0,
        }
    }

    /// Number of elements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.count as usize
    }

    /// Whether the array is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Point this slot at `count` elements starting at `items`.
    pub fn set(&mut self, items: *const T, count: u32) {
        self.items.set(items);
        self.count = count;
    }

    /// Allocation size for `count` elements.
    #[must_use]
    pub fn byte_size(count: usize) -> usize {
        count * size_of::<T>()
    }

    /// View the array.
    ///
    /// # Safety
    ///
    /// The slot must point at `count` initialized elements that are no
    /// longer mutated (the published-generation invariant).
    #[must_use]
    pub unsafe fn as_slice(&self) -> &[T] {
        match self.items.load() {
            // SAFETY: per contract the elements are initialized and
            // frozen; lifetime is tied to &self which lives in the
            // same mapping.
            Some(ptr) => unsafe { std::slice::from_raw_parts(ptr.as_ptr(), self.len()) },
            None => &[],
        }
    }

    /// Pointer to the first element, if any.
    #[must_use]
    pub fn first_ptr(&self) -> Option<NonNull<T>> {
        self.items.load()
    }
}

/// A data-plane module type registered at instance bootstrap.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct DpModuleEntry {
    pub name: Name,
}

/// Reference-counted module configuration payload.
///
/// The payload block is shared between consecutive generations when a
/// module config is carried over unchanged; the count tracks how many
/// generations still reference it.
#[repr(C)]
pub struct ModuleData {
    refcount: AtomicU32,
    len: u32,
    // payload bytes follow the header in the same block
}

impl ModuleData {
    /// Allocation size for a payload of `len` bytes.
    #[must_use]
    pub fn alloc_size(len: usize) -> usize {
        size_of::<Self>() + len
    }

    /// Initialize a freshly allocated block with `payload`.
    ///
    /// # Safety
    ///
    /// `block` must point at [`alloc_size`](Self::alloc_size) writable
    /// bytes that nothing else references.
    pub unsafe fn init_at(block: NonNull<u8>, payload: &[u8]) -> NonNull<Self> {
        let header = block.cast::<Self>();
        // SAFETY: per contract the block is ours and large enough.
        unsafe {
            header.as_ptr().write(Self {
                refcount: AtomicU32::new(1),
                len: payload.len() as u32,
            });
            let dst = block.as_ptr().add(size_of::<Self>());
            std::ptr::copy_nonoverlapping(payload.as_ptr(), dst, payload.len());
        }
        header
    }

    /// Payload length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len as usize
    }

    /// Whether the payload is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The payload bytes.
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        let base = std::ptr::from_ref(self).cast::<u8>();
        // SAFETY: init_at wrote exactly len bytes after the header and
        // the block is immutable afterwards.
        unsafe { std::slice::from_raw_parts(base.add(size_of::<Self>()), self.len()) }
    }

    /// Add a generation's reference.
    pub fn acquire(&self) {
        self.refcount.fetch_add(1, Ordering::Relaxed);
    }

    /// Drop a generation's reference; returns true when this was the
    /// last one and the block should be freed.
    #[must_use]
    pub fn release(&self) -> bool {
        self.refcount.fetch_sub(1, Ordering::AcqRel) == 1
    }

    /// Current reference count (tests and diagnostics).
    #[must_use]
    pub fn refcount(&self) -> u32 {
        self.refcount.load(Ordering::Relaxed)
    }
}

/// One configured module instance, produced by an agent.
#[repr(C)]
pub struct CpModuleEntry {
    pub name: Name,
    /// Index into [`ConfigGen::dp_modules`].
    pub module_type: u32,
    /// Agent registry slot of the owning agent.
    pub agent_slot: u32,
    pub data: RelPtr<ModuleData>,
}

impl CpModuleEntry {
    /// The module's configuration payload.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        match self.data.load() {
            // SAFETY: entries always point at an initialized, frozen
            // ModuleData block.
            Some(data) => unsafe { data.as_ref() }.bytes(),
            None => &[],
        }
    }
}

/// One chain inside a function: an ordered module sequence plus its
/// selection weight.
#[repr(C)]
pub struct ChainEntry {
    /// Indices into [`ConfigGen::cp_modules`].
    pub modules: ArenaVec<u32>,
    pub weight: u32,
    pub _pad: u32,
}

/// A weighted fan-out over chains.
#[repr(C)]
pub struct FunctionEntry {
    pub name: Name,
    pub chains: ArenaVec<ChainEntry>,
    /// Expanded selection ring of chain indices.
    pub ring: ArenaVec<u32>,
}

/// An ordered sequence of functions.
#[repr(C)]
pub struct PipelineEntry {
    pub name: Name,
    /// Indices into [`ConfigGen::functions`].
    pub functions: ArenaVec<u32>,
}

/// A (pipeline index, weight) pair on a device.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct PipelineWeight {
    pub pipeline: u32,
    pub weight: u32,
}

/// An I/O endpoint with weighted input and output pipeline rings.
#[repr(C)]
pub struct DeviceEntry {
    pub device_id: u32,
    pub _pad: u32,
    pub input: ArenaVec<PipelineWeight>,
    /// Expanded ring of pipeline indices consulted per packet hash.
    pub input_ring: ArenaVec<u32>,
    pub output: ArenaVec<PipelineWeight>,
    pub output_ring: ArenaVec<u32>,
}

impl DeviceEntry {
    /// Pick the input pipeline for a packet hash.
    #[must_use]
    pub fn select_input(&self, hash: u64) -> Option<u32> {
        select_from_ring(&self.input_ring, hash)
    }

    /// Pick the output pipeline for a packet hash.
    #[must_use]
    pub fn select_output(&self, hash: u64) -> Option<u32> {
        select_from_ring(&self.output_ring, hash)
    }
}

fn select_from_ring(ring: &ArenaVec<u32>, hash: u64) -> Option<u32> {
    if ring.is_empty() {
        return None;
    }
    // SAFETY: rings are built before publication and never mutated.
    let slots = unsafe { ring.as_slice() };
    Some(slots[(hash % slots.len() as u64) as usize])
}

/// One immutable configuration snapshot.
#[repr(C)]
pub struct ConfigGen {
    pub gen_number: u64,
    /// Agent registry slot of the publishing agent (or `u32::MAX` for
    /// the bootstrap generation written by the data plane itself).
    pub builder_agent_slot: u32,
    pub _pad: u32,
    /// The generation this one replaced; retired chain for
    /// reclamation.
    pub prev: RelPtr<ConfigGen>,
    pub dp_modules: ArenaVec<DpModuleEntry>,
    pub cp_modules: ArenaVec<CpModuleEntry>,
    pub functions: ArenaVec<FunctionEntry>,
    pub pipelines: ArenaVec<PipelineEntry>,
    pub devices: ArenaVec<DeviceEntry>,
}

/// Marker for the bootstrap generation's builder slot.
pub const BOOTSTRAP_AGENT: u32 = u32::MAX;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arena_vec_empty() {
        let v: ArenaVec<u32> = ArenaVec::empty();
        assert!(v.is_empty());
        // SAFETY: empty vec has no elements to be uninitialized.
        assert_eq!(unsafe { v.as_slice() }.len(), 0);
    }

    #[test]
    fn arena_vec_points_at_elements() {
        #[repr(C)]
        struct Holder {
            vec: ArenaVec<u64>,
            data: [u64; 3],
        }
        let mut h = Box::new(Holder {
            vec: ArenaVec::empty(),
            data: [7, 8, 9],
        });
        let data_ptr = h.data.as_ptr();
        h.vec.set(data_ptr, 3);
        // SAFETY: data is initialized and not mutated below.
        assert_eq!(unsafe { h.vec.as_slice() }, &[7, 8, 9]);
        assert_eq!(ArenaVec::<u64>::byte_size(3), 24);
    }

    #[test]
    fn module_data_refcounting() {
        let mut block = vec![0u8; ModuleData::alloc_size(5)];
        let ptr = NonNull::new(block.as_mut_ptr()).unwrap();
        // SAFETY: block is exclusively ours and large enough.
        let data = unsafe { ModuleData::init_at(ptr, b"hello") };
        // SAFETY: just initialized.
        let data = unsafe { data.as_ref() };
        assert_eq!(data.bytes(), b"hello");
        assert_eq!(data.refcount(), 1);
        data.acquire();
        assert!(!data.release());
        assert!(data.release());
    }

    #[test]
    fn ring_selection_wraps() {
        #[repr(C)]
        struct Holder {
            ring: ArenaVec<u32>,
            slots: [u32; 4],
        }
        let mut h = Box::new(Holder {
            ring: ArenaVec::empty(),
            slots: [0, 1, 1, 2],
        });
        let slots_ptr = h.slots.as_ptr();
        h.ring.set(slots_ptr, 4);
        assert_eq!(select_from_ring(&h.ring, 0), Some(0));
        assert_eq!(select_from_ring(&h.ring, 5), Some(1));
        assert_eq!(select_from_ring(&h.ring, 7), Some(2));
        assert_eq!(select_from_ring(&ArenaVec::empty(), 1), None);
    }
}
