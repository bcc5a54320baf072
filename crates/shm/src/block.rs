//! Buddy-style block allocator over the arena heap.
//!
//! The heap (everything past the arena header) is carved into
//! power-of-two blocks from [`MIN_BLOCK`] bytes up to the arena size.
//! One free list per size class is threaded through the free blocks
//! themselves as self-relative pointers, so the whole allocator state
//! is position independent. A single in-arena spin lock serializes all
//! mutations: allocation happens at configuration time only, never on
//! the packet path, so contention is negligible.
//!
//! `free` requires the caller to pass the size it allocated with, which
//! keeps blocks headerless: a 64-byte allocation costs exactly 64
//! bytes.

use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{ShmError, ShmResult};
use crate::offset::RelPtr;
use crate::sync::SpinLock;

/// Smallest block handed out, in bytes.
pub const MIN_BLOCK: usize = 64;

/// Number of size classes. Class `k` holds blocks of
/// `MIN_BLOCK << k` bytes; 40 classes cover far more than any
/// plausible arena.
pub const MAX_CLASSES: usize = 40;

/// Link stored in the first bytes of every free block.
#[repr(C)]
struct FreeBlock {
    next: RelPtr<FreeBlock>,
}

/// Allocator state, embedded in the arena header.
#[repr(C)]
pub struct BlockAlloc {
    lock: SpinLock,
    heap_off: u64,
    heap_len: u64,
    free_bytes: AtomicU64,
    alloc_calls: AtomicU64,
    free_calls: AtomicU64,
    free_heads: [RelPtr<FreeBlock>; MAX_CLASSES],
}

/// Size class for a request: smallest power-of-two block that fits.
#[inline]
fn class_for(size: usize) -> usize {
    let block = size.max(MIN_BLOCK).next_power_of_two();
    (block.trailing_zeros() - MIN_BLOCK.trailing_zeros()) as usize
}

/// Block size of a class in bytes.
#[inline]
fn class_size(class: usize) -> usize {
    MIN_BLOCK << class
}

impl BlockAlloc {
    /// Format the allocator in place over `[heap_off, heap_off + heap_len)`
    /// of the mapping starting at `base`.
    ///
    /// The heap is carved greedily into the largest naturally-aligned
    /// power-of-two blocks, which is exactly the shape buddy
    /// coalescing later reconstructs.
    ///
    /// # Safety
    ///
    /// `self` must sit inside the mapping at `base`, the heap range
    /// must be inside the mapping, disjoint from `self`, and unused.
    pub unsafe fn init(&mut self, base: NonNull<u8>, heap_off: u64, heap_len: u64) {
        debug_assert_eq!(heap_off % MIN_BLOCK as u64, 0);

        self.lock = SpinLock::new();
        self.heap_off = heap_off;
        self.heap_len = heap_len;
        self.free_bytes = AtomicU64::new(0);
        self.alloc_calls = AtomicU64::new(0);
        self.free_calls = AtomicU64::new(0);
        for head in &mut self.free_heads {
            *head = RelPtr::null();
        }

        let mut off: u64 = 0;
        while heap_len - off >= MIN_BLOCK as u64 {
            let remaining = heap_len - off;
            // Largest class that fits and keeps the block naturally
            // aligned relative to the heap base.
            let align_limit = if off == 0 {
                usize::MAX
            } else {
                1 << off.trailing_zeros()
            };
            let mut class = class_for(remaining.min(align_limit as u64) as usize).min(MAX_CLASSES - 1);
            if class_size(class) as u64 > remaining.min(align_limit as u64) {
                class -= 1;
            }
            // SAFETY: off + class_size(class) <= heap_len by the size
            // selection above, so the block is inside the heap.
            unsafe {
                self.push_free(base, class, off);
            }
            self.free_bytes
                .fetch_add(class_size(class) as u64, Ordering::Relaxed);
            off += class_size(class) as u64;
        }
    }

    /// Allocate a block of at least `size` bytes.
    pub fn alloc(&self, base: NonNull<u8>, size: usize) -> ShmResult<NonNull<u8>> {
        if size == 0 || size > MIN_BLOCK << (MAX_CLASSES - 1) {
            return Err(ShmError::out_of_memory(size));
        }
        let want = class_for(size);
        let _guard = self.lock.lock();

        // Smallest non-empty class that can serve the request.
        let mut class = want;
        while class < MAX_CLASSES && self.free_heads[class].is_null() {
            class += 1;
        }
        if class >= MAX_CLASSES {
            return Err(ShmError::out_of_memory(size));
        }

        // SAFETY: the head of a non-empty class list points at a free
        // block inside the heap; holding the lock gives us exclusive
        // ownership of the lists.
        let off = unsafe { self.pop_free(base, class) };

        // Split down to the wanted class, returning the upper halves.
        while class > want {
            class -= 1;
            let buddy_off = off + class_size(class) as u64;
            // SAFETY: the buddy half is inside the block we just
            // removed from the free list, therefore unused.
            unsafe {
                self.push_free(base, class, buddy_off);
            }
        }

        self.free_bytes
            .fetch_sub(class_size(want) as u64, Ordering::Relaxed);
        self.alloc_calls.fetch_add(1, Ordering::Relaxed);

        // SAFETY: heap_off + off + block size is inside the mapping.
        let ptr = unsafe { base.as_ptr().add((self.heap_off + off) as usize) };
        debug_assert!(!ptr.is_null());
        // SAFETY: base is non-null and the add stays in the mapping.
        Ok(unsafe { NonNull::new_unchecked(ptr) })
    }

    /// Return a block of `size` bytes previously obtained from
    /// [`alloc`](Self::alloc) with the same size.
    ///
    /// The block is coalesced with its buddy while the buddy is free,
    /// rebuilding larger classes eagerly.
    pub fn free(&self, base: NonNull<u8>, ptr: NonNull<u8>, size: usize) {
        let mut class = class_for(size);
        let heap_base = base.as_ptr() as u64 + self.heap_off;
        let mut off = ptr.as_ptr() as u64 - heap_base;
        debug_assert_eq!(off % class_size(class) as u64, 0);

        let _guard = self.lock.lock();
        self.free_bytes
            .fetch_add(class_size(class) as u64, Ordering::Relaxed);
        self.free_calls.fetch_add(1, Ordering::Relaxed);

        while class + 1 < MAX_CLASSES {
            let buddy_off = off ^ class_size(class) as u64;
            if buddy_off + class_size(class) as u64 > self.heap_len {
                break;
            }
            // SAFETY: lock held; unlink only touches free blocks.
            if !unsafe { self.unlink_free(base, class, buddy_off) } {
                break;
            }
            off = off.min(buddy_off);
            class += 1;
        }
        // SAFETY: the merged block is unused and inside the heap.
        unsafe {
            self.push_free(base, class, off);
        }
    }

    /// Bytes currently sitting on free lists.
    #[must_use]
    pub fn free_bytes(&self) -> u64 {
        self.free_bytes.load(Ordering::Relaxed)
    }

    /// Total heap length managed by this allocator.
    #[must_use]
    pub fn heap_len(&self) -> u64 {
        self.heap_len
    }

    /// Number of successful allocations so far.
    #[must_use]
    pub fn alloc_calls(&self) -> u64 {
        self.alloc_calls.load(Ordering::Relaxed)
    }

    /// Cheap structural sanity check used by `Arena::validate`.
    pub(crate) fn looks_sane(&self, mapping_len: u64) -> bool {
        self.heap_off < mapping_len
            && self.heap_off + self.heap_len <= mapping_len
            && self.free_bytes.load(Ordering::Relaxed) <= self.heap_len
    }

    /// # Safety
    ///
    /// Caller holds the lock (or is initializing), `off` names an
    /// unused, naturally-aligned block of `class` inside the heap.
    unsafe fn push_free(&self, base: NonNull<u8>, class: usize, off: u64) {
        // SAFETY: per contract, the block is in-bounds and ours.
        let block = unsafe {
            base.as_ptr()
                .add((self.heap_off + off) as usize)
                .cast::<FreeBlock>()
        };
        let old_head = self.free_heads[class].load();
        // SAFETY: writing the link into the unused block; re-encoding
        // the old head relative to the block's own slot.
        unsafe {
            (*block).next = RelPtr::null();
            match old_head {
                Some(head) => (*block).next.set(head.as_ptr()),
                None => {}
            }
        }
        // The head slot itself is mutated under the lock; the shared
        // reference is how every in-arena structure is reached, so the
        // write goes through a raw pointer.
        let head_slot = std::ptr::addr_of!(self.free_heads[class]).cast_mut();
        // SAFETY: lock held, single writer to the slot.
        unsafe {
            (*head_slot).set(block);
        }
    }

    /// # Safety
    ///
    /// Caller holds the lock and the class list is non-empty.
    unsafe fn pop_free(&self, base: NonNull<u8>, class: usize) -> u64 {
        let head = self.free_heads[class]
            .load()
            .expect("pop_free on empty class");
        // SAFETY: head points at a FreeBlock inside the heap.
        let next = unsafe { head.as_ref().next.load() };
        let head_slot = std::ptr::addr_of!(self.free_heads[class]).cast_mut();
        // SAFETY: lock held, single writer to the slot.
        unsafe {
            match next {
                Some(next) => (*head_slot).set(next.as_ptr()),
                None => (*head_slot).set(std::ptr::null()),
            }
        }
        head.as_ptr() as u64 - (base.as_ptr() as u64 + self.heap_off)
    }

    /// Remove the block at heap offset `off` from the `class` free
    /// list if present. Returns whether it was found.
    ///
    /// Linear scan: free lists only ever hold configuration-time
    /// blocks, so they stay short.
    ///
    /// # Safety
    ///
    /// Caller holds the lock.
    unsafe fn unlink_free(&self, base: NonNull<u8>, class: usize, off: u64) -> bool {
        let target = unsafe { base.as_ptr().add((self.heap_off + off) as usize) }.cast::<FreeBlock>();

        let mut prev: Option<NonNull<FreeBlock>> = None;
        let mut cursor = self.free_heads[class].load();
        while let Some(node) = cursor {
            if node.as_ptr() == target {
                // SAFETY: node is a live FreeBlock; prev (or the head
                // slot) is re-pointed past it under the lock.
                let next = unsafe { node.as_ref().next.load() };
                let next_ptr = next.map_or(std::ptr::null_mut::<FreeBlock>(), NonNull::as_ptr);
                match prev {
                    Some(mut p) => unsafe { p.as_mut().next.set(next_ptr) },
                    None => {
                        let head_slot = std::ptr::addr_of!(self.free_heads[class]).cast_mut();
                        unsafe { (*head_slot).set(next_ptr) }
                    }
                }
                return true;
            }
            prev = Some(node);
            // SAFETY: node is a live FreeBlock.
            cursor = unsafe { node.as_ref().next.load() };
        }
        false
    }
}
