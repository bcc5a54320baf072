//! Frozen tries: the flat, position-independent form workers read.
//!
//! Freezing compacts the builder's node pool to the reachable set and
//! lays it out as one arena block: a small header followed by a dense
//! node array addressed by `u32` indices. No pointers, so the block
//! reads identically from every mapping, and lookups are wait-free by
//! construction (the block is immutable once its generation is
//! published).

use std::ptr::NonNull;

use riptide_shm::{Arena, MemoryContext};

use crate::error::LpmResult;
use crate::trie::{KeyWidth, LPM_VALUE_INVALID, Lpm, STRIDE_SLOTS};

const NO_CHILD: u32 = u32::MAX;

/// Flat block header.
#[repr(C)]
struct FrozenHeader {
    key_bytes: u32,
    node_count: u32,
}

/// One flat node: values then child indices.
#[repr(C)]
struct FrozenNode {
    value: [u32; STRIDE_SLOTS],
    next: [u32; STRIDE_SLOTS],
}

impl Lpm {
    /// Size in bytes of the frozen form (reachable nodes only).
    #[must_use]
    pub fn frozen_size(&self) -> usize {
        let reachable = self.reachable().len();
        size_of::<FrozenHeader>() + reachable * size_of::<FrozenNode>()
    }

    /// Freeze into an arena block allocated from `ctx`.
    pub fn freeze(&self, arena: &Arena, ctx: &MemoryContext) -> LpmResult<NonNull<u8>> {
        let order = self.reachable();
        let size = size_of::<FrozenHeader>() + order.len() * size_of::<FrozenNode>();
        let block = arena.alloc_in(ctx, size)?;

        // Old index -> compact index.
        let mut remap = vec![NO_CHILD; self.nodes.len()];
        for (new_idx, &old_idx) in order.iter().enumerate() {
            remap[old_idx] = new_idx as u32;
        }

        // SAFETY: block is fresh and exactly `size` bytes; the layout
        // below writes every byte of header and nodes.
        unsafe {
            let header = block.cast::<FrozenHeader>();
            header.as_ptr().write(FrozenHeader {
                key_bytes: self.width().bytes() as u32,
                node_count: order.len() as u32,
            });
            let nodes = block
                .as_ptr()
                .add(size_of::<FrozenHeader>())
                .cast::<FrozenNode>();
            for (new_idx, &old_idx) in order.iter().enumerate() {
                let src = &self.nodes[old_idx];
                let dst = nodes.add(new_idx);
                (*dst).value = src.value;
                for slot in 0..STRIDE_SLOTS {
                    let child = src.next[slot];
                    (*dst).next[slot] = if child == NO_CHILD {
                        NO_CHILD
                    } else {
                        remap[child as usize]
                    };
                }
            }
        }
        Ok(block)
    }

    /// Breadth-first reachable node order, root first.
    fn reachable(&self) -> Vec<usize> {
        let mut order = vec![0usize];
        let mut cursor = 0;
        while cursor < order.len() {
            let node = &self.nodes[order[cursor]];
            cursor += 1;
            for slot in 0..STRIDE_SLOTS {
                let child = node.next[slot];
                if child != NO_CHILD {
                    order.push(child as usize);
                }
            }
        }
        order
    }
}

/// Read-only view over a frozen trie block.
#[derive(Clone, Copy)]
pub struct LpmView<'a> {
    header: &'a FrozenHeader,
}

impl<'a> LpmView<'a> {
    /// Wrap a frozen block.
    ///
    /// # Safety
    ///
    /// `block` must point at a block produced by [`Lpm::freeze`] that
    /// outlives the view (the generation barrier provides this for
    /// blocks referenced from module configs).
    #[must_use]
    pub unsafe fn from_ptr(block: NonNull<u8>) -> Self {
        // SAFETY: per contract the header is initialized and frozen.
        Self {
            header: unsafe { block.cast::<FrozenHeader>().as_ref() },
        }
    }

    /// Key length in bytes.
    #[must_use]
    pub fn key_bytes(&self) -> usize {
        self.header.key_bytes as usize
    }

    /// Longest-prefix lookup; [`LPM_VALUE_INVALID`] on miss.
    #[must_use]
    pub fn lookup(&self, key: &[u8]) -> u32 {
        if key.len() != self.key_bytes() {
            return LPM_VALUE_INVALID;
        }
        let mut best = LPM_VALUE_INVALID;
        let mut node = 0u32;
        for &byte in key {
            let n = self.node(node);
            let slot = byte as usize;
            if n.value[slot] != LPM_VALUE_INVALID {
                best = n.value[slot];
            }
            if n.next[slot] == NO_CHILD {
                break;
            }
            node = n.next[slot];
        }
        best
    }

    fn node(&self, idx: u32) -> &'a FrozenNode {
        debug_assert!(idx < self.header.node_count);
        let base = std::ptr::from_ref(self.header).cast::<u8>();
        // SAFETY: freeze wrote node_count nodes right after the
        // header; idx is bounded by the walk structure.
        unsafe {
            &*base
                .add(size_of::<FrozenHeader>())
                .cast::<FrozenNode>()
                .add(idx as usize)
        }
    }
}
