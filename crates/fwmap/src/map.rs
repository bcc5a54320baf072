//! The sharded, layered session table.
//!
//! Layout (all inside the arena, all position independent):
//!
//! ```text
//! FwmapRoot { head: AtomicRelPtr<LayerHeader> }
//! LayerHeader { spec fields, seed, next: AtomicRelPtr<LayerHeader> }
//!   shard 0: ShardHeader { lock, used } + capacity * entry
//!   shard 1: ...
//! entry: EntryHeader { state, expires_at, last_seen } + key + value
//! ```
//!
//! A key's shard is `hash % shard_count`, giving each worker's flows a
//! stable home and keeping cross-worker contention to the per-shard
//! reader-writer locks. Writes go to the head layer only; older layers
//! are read-only and drain by TTL until the control plane trims them.
//! Entries are never actively deleted: an expired entry is invisible
//! to lookups and its slot is reused by the next insert that probes
//! over it.

use std::ptr::NonNull;
use std::sync::atomic::{AtomicU32, Ordering};

use riptide_shm::{Arena, AtomicRelPtr, MemoryContext, SeqRwLock};

use crate::error::{FwmapError, FwmapResult};
use crate::state::{FwmapFuncs, FwmapRand};

const ENTRY_EMPTY: u32 = 0;
const ENTRY_OCCUPIED: u32 = 1;

/// Construction parameters of one table.
#[derive(Debug, Clone, Copy)]
pub struct FwmapSpec {
    pub key_size: u32,
    pub value_size: u32,
    /// One shard per worker.
    pub shard_count: u32,
    /// Slots per shard.
    pub shard_capacity: u32,
    /// Load ceiling per shard; inserts beyond it overflow.
    pub max_load: u32,
    pub funcs: FwmapFuncs,
}

impl FwmapSpec {
    /// Validate sizes, capacities and the function combination.
    pub fn validate(&self) -> FwmapResult<()> {
        if self.shard_count == 0 {
            return Err(FwmapError::bad_spec("shard_count must be positive"));
        }
        if self.shard_capacity == 0 || self.max_load == 0 {
            return Err(FwmapError::bad_spec("shard capacity and load must be positive"));
        }
        if self.max_load > self.shard_capacity {
            return Err(FwmapError::bad_spec(format!(
                "load ceiling {} exceeds shard capacity {}",
                self.max_load, self.shard_capacity
            )));
        }
        if self.key_size == 0 || self.value_size == 0 {
            return Err(FwmapError::bad_spec("key and value sizes must be positive"));
        }
        self.funcs.validate(self.key_size, self.value_size)
    }
}

/// Root slot; module config payloads reference this.
#[repr(C)]
pub struct FwmapRoot {
    head: AtomicRelPtr<LayerHeader>,
}

/// One layer's header.
#[repr(C)]
struct LayerHeader {
    key_size: u32,
    value_size: u32,
    shard_count: u32,
    shard_capacity: u32,
    max_load: u32,
    _pad: u32,
    seed: u64,
    next: AtomicRelPtr<LayerHeader>,
}

#[repr(C)]
struct ShardHeader {
    lock: SeqRwLock,
    /// Occupied slots (live or expired); guarded by the write lock,
    /// atomic so metrics reads need no lock.
    used: AtomicU32,
    _pad: [u32; 14],
}

#[repr(C)]
struct EntryHeader {
    state: u32,
    _pad: u32,
    expires_at: u64,
    last_seen: u64,
}

fn align8(n: usize) -> usize {
    (n + 7) & !7
}

fn entry_size(key_size: u32, value_size: u32) -> usize {
    size_of::<EntryHeader>() + align8(key_size as usize) + align8(value_size as usize)
}

fn shard_size(spec_key: u32, spec_value: u32, capacity: u32) -> usize {
    size_of::<ShardHeader>() + capacity as usize * entry_size(spec_key, spec_value)
}

fn layer_size(key: u32, value: u32, shards: u32, capacity: u32) -> usize {
    align8(size_of::<LayerHeader>()) + shards as usize * shard_size(key, value, capacity)
}

/// Outcome of a successful put.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    /// A new session slot was taken.
    Inserted,
    /// An existing live session absorbed the write via merge.
    Merged,
}

/// What a trim pass detached; the caller frees the blocks once every
/// worker has passed the generation barrier.
pub struct TrimReport {
    pub layers: usize,
    pub blocks: Vec<(NonNull<u8>, usize)>,
}

/// Handle to a session table in an arena.
///
/// Cheap to copy; one per module config per worker in practice.
#[derive(Clone, Copy)]
pub struct Fwmap<'a> {
    arena: &'a Arena,
    root: NonNull<FwmapRoot>,
    funcs: FwmapFuncs,
}

impl<'a> Fwmap<'a> {
    /// Create a table: root plus its first layer, allocated from `ctx`.
    pub fn create(arena: &'a Arena, ctx: &MemoryContext, spec: &FwmapSpec) -> FwmapResult<Self> {
        spec.validate()?;
        let root_block = arena.alloc_in(ctx, size_of::<FwmapRoot>())?;
        let root = root_block.cast::<FwmapRoot>();
        // SAFETY: fresh block, exclusively ours.
        unsafe {
            root.as_ptr().write(FwmapRoot {
                head: AtomicRelPtr::null(),
            });
        }
        let map = Self {
            arena,
            root,
            funcs: spec.funcs,
        };
        if let Err(e) = map.insert_new_layer(ctx, spec) {
            arena.free_in(ctx, root_block, size_of::<FwmapRoot>());
            return Err(e);
        }
        Ok(map)
    }

    /// Re-attach to an existing table (e.g. from a module config).
    ///
    /// # Safety
    ///
    /// `root` must point at a root created by [`create`](Self::create)
    /// in this arena, `funcs` must be the combination it was created
    /// with, and the table must outlive the handle.
    #[must_use]
    pub unsafe fn from_root(arena: &'a Arena, root: NonNull<FwmapRoot>, funcs: FwmapFuncs) -> Self {
        Self { arena, root, funcs }
    }

    /// The root pointer, for embedding into config payloads.
    #[must_use]
    pub fn root(&self) -> NonNull<FwmapRoot> {
        self.root
    }

    /// Arena-relative offset of the root, for wire-stable payloads.
    #[must_use]
    pub fn root_offset(&self) -> u64 {
        self.arena.offset_of(self.root.cast())
    }

    fn head(&self) -> NonNull<LayerHeader> {
        // SAFETY: create installs a head before the handle exists and
        // the head pointer is only ever swapped to newer layers.
        unsafe { self.root.as_ref() }
            .head
            .load()
            .expect("fwmap root without a head layer")
    }

    /// Prepend a fresh head layer with `spec`'s shape.
    ///
    /// This is the wait-free enlargement path: readers keep walking
    /// the old chain until the release store below makes the new head
    /// visible.
    pub fn insert_new_layer(&self, ctx: &MemoryContext, spec: &FwmapSpec) -> FwmapResult<()> {
        spec.validate()?;
        if spec.key_size != self.key_size_or(spec.key_size)
            || spec.value_size != self.value_size_or(spec.value_size)
        {
            return Err(FwmapError::bad_spec(
                "layer key/value sizes must match the existing chain",
            ));
        }
        let size = layer_size(
            spec.key_size,
            spec.value_size,
            spec.shard_count,
            spec.shard_capacity,
        );
        let block = arena_zeroed_alloc(self.arena, ctx, size)?;
        let layer = block.cast::<LayerHeader>();
        // SAFETY: fresh zeroed block; shard headers and entries are
        // valid all-zero (unlocked, unused, empty).
        unsafe {
            layer.as_ptr().write(LayerHeader {
                key_size: spec.key_size,
                value_size: spec.value_size,
                shard_count: spec.shard_count,
                shard_capacity: spec.shard_capacity,
                max_load: spec.max_load,
                _pad: 0,
                seed: match spec.funcs.rand {
                    FwmapRand::Default => rand::random::<u64>(),
                },
                next: AtomicRelPtr::null(),
            });
            let old_head = self.root.as_ref().head.load();
            if let Some(old) = old_head {
                (*layer.as_ptr()).next.store(old.as_ptr());
            }
            self.root.as_ref().head.store(layer.as_ptr());
        }
        Ok(())
    }

    fn key_size_or(&self, fallback: u32) -> u32 {
        // SAFETY: head layers are fully initialized before publication.
        if unsafe { self.root.as_ref() }.head.is_null() {
            fallback
        } else {
            unsafe { self.head().as_ref() }.key_size
        }
    }

    fn value_size_or(&self, fallback: u32) -> u32 {
        if unsafe { self.root.as_ref() }.head.is_null() {
            fallback
        } else {
            unsafe { self.head().as_ref() }.value_size
        }
    }

    /// Look a key up across all layers, newest first. On hit the value
    /// is copied into `out` and `true` is returned.
    pub fn get(&self, key: &[u8], now_ns: u64, out: &mut [u8]) -> FwmapResult<bool> {
        let mut layer = Some(self.head());
        self.check_key(key)?;
        if out.len() != self.head_value_size() {
            return Err(FwmapError::ValueSize {
                got: out.len(),
                expected: self.head_value_size(),
            });
        }
        while let Some(l) = layer {
            if self.get_in_layer(l, key, now_ns, out) {
                return Ok(true);
            }
            // SAFETY: layers stay mapped until trimmed behind the
            // worker barrier.
            layer = unsafe { l.as_ref() }.next.load();
        }
        Ok(false)
    }

    /// Write a session to the head layer.
    ///
    /// A live entry under the same key absorbs the write through the
    /// registered merge function and gets its TTL refreshed; an
    /// expired or empty slot takes the value verbatim. A shard at its
    /// load ceiling overflows.
    pub fn put(
        &self,
        key: &[u8],
        value: &[u8],
        ttl_ns: u64,
        now_ns: u64,
    ) -> FwmapResult<PutOutcome> {
        self.check_key(key)?;
        if value.len() != self.head_value_size() {
            return Err(FwmapError::ValueSize {
                got: value.len(),
                expected: self.head_value_size(),
            });
        }

        let head = self.head();
        // SAFETY: the head layer is initialized and mapped.
        let header = unsafe { head.as_ref() };
        let hash = self.funcs.hash_key(header.seed, key);
        let shard_idx = (hash % u64::from(header.shard_count)) as u32;
        let shard = self.shard(head, shard_idx);
        // SAFETY: shard headers live inside the layer block.
        let shard_ref = unsafe { shard.as_ref() };

        let _write = shard_ref.lock.write();

        let capacity = header.shard_capacity;
        let start = (hash / u64::from(header.shard_count)) % u64::from(capacity);
        let mut reusable: Option<u32> = None;

        for probe in 0..capacity {
            let slot = ((start + u64::from(probe)) % u64::from(capacity)) as u32;
            let (entry, ekey, evalue) = self.entry(head, shard_idx, slot);
            // SAFETY: entry pointers are in-bounds slots of the shard;
            // the shard write lock gives us exclusive access.
            let entry_ref = unsafe { &mut *entry.as_ptr() };
            if entry_ref.state == ENTRY_EMPTY {
                // End of probe chain; insert here or in a reusable
                // expired slot seen on the way.
                let (slot_used, fresh) = match reusable {
                    Some(r) => (r, false),
                    None => (slot, true),
                };
                if fresh {
                    let used = shard_ref.used.load(Ordering::Relaxed);
                    if used >= header.max_load {
                        return Err(FwmapError::TableOverflow { shard: shard_idx });
                    }
                    shard_ref.used.store(used + 1, Ordering::Relaxed);
                }
                let (entry, ekey, evalue) = self.entry(head, shard_idx, slot_used);
                // SAFETY: exclusive via write lock; slot is ours.
                unsafe {
                    std::ptr::copy_nonoverlapping(key.as_ptr(), ekey.as_ptr(), key.len());
                    std::ptr::copy_nonoverlapping(value.as_ptr(), evalue.as_ptr(), value.len());
                    (*entry.as_ptr()).expires_at = now_ns.saturating_add(ttl_ns);
                    (*entry.as_ptr()).last_seen = now_ns;
                    (*entry.as_ptr()).state = ENTRY_OCCUPIED;
                }
                return Ok(PutOutcome::Inserted);
            }

            // Occupied: live match merges, expired slots become
            // candidates for reuse (lazy eviction).
            // SAFETY: occupied entries carry initialized key bytes.
            let stored_key =
                unsafe { std::slice::from_raw_parts(ekey.as_ptr(), key.len()) };
            if entry_ref.expires_at < now_ns {
                if reusable.is_none() {
                    reusable = Some(slot);
                }
                continue;
            }
            if stored_key == key {
                // SAFETY: live entry value bytes are initialized.
                let stored_value = unsafe {
                    std::slice::from_raw_parts_mut(evalue.as_ptr(), value.len())
                };
                self.funcs.merge(stored_value, value);
                entry_ref.expires_at = now_ns.saturating_add(ttl_ns);
                entry_ref.last_seen = now_ns;
                return Ok(PutOutcome::Merged);
            }
        }

        match reusable {
            Some(slot) => {
                let (entry, ekey, evalue) = self.entry(head, shard_idx, slot);
                // SAFETY: exclusive via write lock.
                unsafe {
                    std::ptr::copy_nonoverlapping(key.as_ptr(), ekey.as_ptr(), key.len());
                    std::ptr::copy_nonoverlapping(value.as_ptr(), evalue.as_ptr(), value.len());
                    (*entry.as_ptr()).expires_at = now_ns.saturating_add(ttl_ns);
                    (*entry.as_ptr()).last_seen = now_ns;
                    (*entry.as_ptr()).state = ENTRY_OCCUPIED;
                }
                Ok(PutOutcome::Inserted)
            }
            None => Err(FwmapError::TableOverflow { shard: shard_idx }),
        }
    }

    /// Detach tail layers whose every entry has expired.
    ///
    /// The detached blocks are returned, not freed: the caller holds
    /// them until every worker has observed a newer generation, the
    /// same barrier that guards `ConfigGen` reclamation. Trimming is a
    /// control-plane maintenance operation; callers serialize it with
    /// the configuration write lock like any other reclamation.
    pub fn trim_stale_layers(&self, now_ns: u64) -> TrimReport {
        let mut report = TrimReport {
            layers: 0,
            blocks: Vec::new(),
        };
        // Find the first fully-stale layer below the head, keeping the
        // head itself even when idle.
        let head = self.head();
        let mut keeper = head;
        loop {
            // SAFETY: chain layers stay mapped until a trim returns
            // them and the caller frees them past the barrier.
            let Some(candidate) = unsafe { keeper.as_ref() }.next.load() else {
                return report;
            };
            if self.layer_fully_stale(candidate, now_ns) {
                // Everything below a fully-stale layer is older and
                // equally stale; detach the whole tail.
                unsafe { keeper.as_ref() }.next.store(std::ptr::null());
                let mut cursor = Some(candidate);
                while let Some(layer) = cursor {
                    // SAFETY: detached, unreachable for new readers.
                    let l = unsafe { layer.as_ref() };
                    let size =
                        layer_size(l.key_size, l.value_size, l.shard_count, l.shard_capacity);
                    report.layers += 1;
                    report.blocks.push((layer.cast(), size));
                    cursor = l.next.load();
                }
                riptide_log::debug!(layers = report.layers, "stale session layers detached");
                return report;
            }
            keeper = candidate;
        }
    }

    /// Which head-layer shard a key lands in.
    ///
    /// The balancer uses this to attribute overflow drops to the
    /// right per-shard counter.
    pub fn shard_of(&self, key: &[u8]) -> FwmapResult<u32> {
        self.check_key(key)?;
        // SAFETY: head layer is initialized.
        let header = unsafe { self.head().as_ref() };
        let hash = self.funcs.hash_key(header.seed, key);
        Ok((hash % u64::from(header.shard_count)) as u32)
    }

    /// Live entries in one shard of the head layer (tests/metrics).
    #[must_use]
    pub fn shard_live(&self, shard_idx: u32, now_ns: u64) -> usize {
        let head = self.head();
        // SAFETY: head layer is mapped and initialized.
        let header = unsafe { head.as_ref() };
        let shard = self.shard(head, shard_idx);
        let shard_ref = unsafe { shard.as_ref() };
        let _read = shard_ref.lock.read();
        let mut live = 0;
        for slot in 0..header.shard_capacity {
            let (entry, _, _) = self.entry(head, shard_idx, slot);
            // SAFETY: in-bounds slot under the read lock.
            let e = unsafe { &*entry.as_ptr() };
            if e.state == ENTRY_OCCUPIED && e.expires_at >= now_ns {
                live += 1;
            }
        }
        live
    }

    /// Number of layers currently chained.
    #[must_use]
    pub fn layer_count(&self) -> usize {
        let mut n = 0;
        let mut layer = Some(self.head());
        while let Some(l) = layer {
            n += 1;
            // SAFETY: chain layers stay mapped.
            layer = unsafe { l.as_ref() }.next.load();
        }
        n
    }

    // --- internals ---------------------------------------------------------

    fn head_value_size(&self) -> usize {
        // SAFETY: head layer initialized.
        unsafe { self.head().as_ref() }.value_size as usize
    }

    fn check_key(&self, key: &[u8]) -> FwmapResult<()> {
        // SAFETY: head layer initialized.
        let expected = unsafe { self.head().as_ref() }.key_size as usize;
        if key.len() != expected {
            return Err(FwmapError::KeySize {
                got: key.len(),
                expected,
            });
        }
        Ok(())
    }

    fn get_in_layer(
        &self,
        layer: NonNull<LayerHeader>,
        key: &[u8],
        now_ns: u64,
        out: &mut [u8],
    ) -> bool {
        // SAFETY: layer headers are initialized before they become
        // reachable.
        let header = unsafe { layer.as_ref() };
        if header.key_size as usize != key.len() {
            return false;
        }
        let hash = self.funcs.hash_key(header.seed, key);
        let shard_idx = (hash % u64::from(header.shard_count)) as u32;
        let shard = self.shard(layer, shard_idx);
        let shard_ref = unsafe { shard.as_ref() };
        let _read = shard_ref.lock.read();

        let capacity = header.shard_capacity;
        let start = (hash / u64::from(header.shard_count)) % u64::from(capacity);
        for probe in 0..capacity {
            let slot = ((start + u64::from(probe)) % u64::from(capacity)) as u32;
            let (entry, ekey, evalue) = self.entry(layer, shard_idx, slot);
            // SAFETY: in-bounds slot under the read lock.
            let e = unsafe { &*entry.as_ptr() };
            if e.state == ENTRY_EMPTY {
                return false;
            }
            // SAFETY: occupied entries carry initialized bytes.
            let stored_key = unsafe { std::slice::from_raw_parts(ekey.as_ptr(), key.len()) };
            if stored_key == key {
                if e.expires_at < now_ns {
                    return false;
                }
                // SAFETY: live value bytes initialized; out length was
                // validated by the caller.
                unsafe {
                    std::ptr::copy_nonoverlapping(evalue.as_ptr(), out.as_mut_ptr(), out.len());
                }
                return true;
            }
        }
        false
    }

    fn layer_fully_stale(&self, layer: NonNull<LayerHeader>, now_ns: u64) -> bool {
        // SAFETY: chain layers stay mapped.
        let header = unsafe { layer.as_ref() };
        for shard_idx in 0..header.shard_count {
            let shard = self.shard(layer, shard_idx);
            let shard_ref = unsafe { shard.as_ref() };
            let _read = shard_ref.lock.read();
            for slot in 0..header.shard_capacity {
                let (entry, _, _) = self.entry(layer, shard_idx, slot);
                // SAFETY: in-bounds slot under the read lock.
                let e = unsafe { &*entry.as_ptr() };
                if e.state == ENTRY_OCCUPIED && e.expires_at >= now_ns {
                    return false;
                }
            }
        }
        true
    }

    fn shard(&self, layer: NonNull<LayerHeader>, shard_idx: u32) -> NonNull<ShardHeader> {
        // SAFETY: shard blocks were allocated as part of the layer.
        let header = unsafe { layer.as_ref() };
        let base = layer.as_ptr().cast::<u8>();
        let offset = align8(size_of::<LayerHeader>())
            + shard_idx as usize * shard_size(header.key_size, header.value_size, header.shard_capacity);
        // SAFETY: offset is inside the layer block by construction.
        unsafe { NonNull::new_unchecked(base.add(offset).cast::<ShardHeader>()) }
    }

    /// Raw parts of one entry: header, key bytes, value bytes.
    fn entry(
        &self,
        layer: NonNull<LayerHeader>,
        shard_idx: u32,
        slot: u32,
    ) -> (NonNull<EntryHeader>, NonNull<u8>, NonNull<u8>) {
        // SAFETY: slot is bounded by shard_capacity at every call site.
        let header = unsafe { layer.as_ref() };
        let shard = self.shard(layer, shard_idx).as_ptr().cast::<u8>();
        let esz = entry_size(header.key_size, header.value_size);
        // SAFETY: entries start right after the shard header.
        unsafe {
            let entry = shard
                .add(size_of::<ShardHeader>())
                .add(slot as usize * esz);
            let key = entry.add(size_of::<EntryHeader>());
            let value = key.add(align8(header.key_size as usize));
            (
                NonNull::new_unchecked(entry.cast::<EntryHeader>()),
                NonNull::new_unchecked(key),
                NonNull::new_unchecked(value),
            )
        }
    }
}

// SAFETY: the handle is a pointer pair into a mapping whose shared
// state is guarded by the per-shard locks and atomic layer links.
unsafe impl Send for Fwmap<'_> {}
// SAFETY: same argument; &Fwmap operations synchronize internally.
unsafe impl Sync for Fwmap<'_> {}

fn arena_zeroed_alloc(
    arena: &Arena,
    ctx: &MemoryContext,
    size: usize,
) -> FwmapResult<NonNull<u8>> {
    let block = arena.alloc_in(ctx, size)?;
    // Freshly created arenas hand out zero pages, but recycled blocks
    // carry old bytes; shard state must start all-zero.
    // SAFETY: block is `size` bytes, exclusively ours.
    unsafe {
        std::ptr::write_bytes(block.as_ptr(), 0, size);
    }
    Ok(block)
}

#[cfg(test)]
mod tests {
    use riptide_shm::{Arena, ArenaOptions, NO_LIMIT};

    use super::*;
    use crate::state::{
        Fw4Key, FwmapCopyValue, FwmapHash, FwmapKeyEqual, FwmapMergeValue, FwmapRand, FwstateValue,
    };

    fn arena() -> Arena {
        Arena::anonymous(&ArenaOptions {
            size: 16 << 20,
            ..ArenaOptions::default()
        })
        .unwrap()
    }

    fn fw4_spec(shards: u32, capacity: u32, load: u32) -> FwmapSpec {
        FwmapSpec {
            key_size: size_of::<Fw4Key>() as u32,
            value_size: size_of::<FwstateValue>() as u32,
            shard_count: shards,
            shard_capacity: capacity,
            max_load: load,
            funcs: FwmapFuncs {
                key_equal: FwmapKeyEqual::Fw4,
                copy_value: FwmapCopyValue::Fwstate,
                merge_value: FwmapMergeValue::Fwstate,
                hash: FwmapHash::Fnv1a,
                rand: FwmapRand::Default,
            },
        }
    }

    fn key(n: u32) -> Fw4Key {
        Fw4Key {
            src: n,
            dst: n ^ 0xFFFF,
            src_port: 1000,
            dst_port: 443,
            proto: 6,
            _pad: [0; 3],
        }
    }

    fn value(fwd: u64) -> FwstateValue {
        FwstateValue {
            packets_fwd: fwd,
            last_update_ns: 1,
            proto: 6,
            ..FwstateValue::default()
        }
    }

    #[test]
    fn put_get_roundtrip() {
        let arena = arena();
        let agent = arena.attach_agent("fw", 1, NO_LIMIT).unwrap();
        let map = Fwmap::create(&arena, agent.context(), &fw4_spec(4, 64, 48)).unwrap();

        let k = key(1);
        map.put(k.as_bytes(), value(3).as_bytes(), 1_000, 100).unwrap();

        let mut out = [0u8; size_of::<FwstateValue>()];
        assert!(map.get(k.as_bytes(), 500, &mut out).unwrap());
        assert_eq!(FwstateValue::from_bytes(&out).packets_fwd, 3);

        assert!(!map.get(key(2).as_bytes(), 500, &mut out).unwrap());
    }

    #[test]
    fn ttl_expiry_hides_entries() {
        let arena = arena();
        let agent = arena.attach_agent("fw", 1, NO_LIMIT).unwrap();
        let map = Fwmap::create(&arena, agent.context(), &fw4_spec(2, 16, 12)).unwrap();

        let k = key(7);
        map.put(k.as_bytes(), value(1).as_bytes(), 1_000, 0).unwrap();

        let mut out = [0u8; size_of::<FwstateValue>()];
        assert!(map.get(k.as_bytes(), 1_000, &mut out).unwrap());
        assert!(!map.get(k.as_bytes(), 1_001, &mut out).unwrap());
    }

    #[test]
    fn put_refreshes_ttl_and_merges() {
        let arena = arena();
        let agent = arena.attach_agent("fw", 1, NO_LIMIT).unwrap();
        let map = Fwmap::create(&arena, agent.context(), &fw4_spec(2, 16, 12)).unwrap();

        let k = key(9);
        let first = map.put(k.as_bytes(), value(2).as_bytes(), 1_000, 0).unwrap();
        assert_eq!(first, PutOutcome::Inserted);
        let second = map.put(k.as_bytes(), value(5).as_bytes(), 1_000, 900).unwrap();
        assert_eq!(second, PutOutcome::Merged);

        let mut out = [0u8; size_of::<FwstateValue>()];
        // Refreshed: alive past the original deadline.
        assert!(map.get(k.as_bytes(), 1_500, &mut out).unwrap());
        assert_eq!(FwstateValue::from_bytes(&out).packets_fwd, 7);
    }

    #[test]
    fn expired_slots_are_reused() {
        let arena = arena();
        let agent = arena.attach_agent("fw", 1, NO_LIMIT).unwrap();
        let map = Fwmap::create(&arena, agent.context(), &fw4_spec(1, 8, 8)).unwrap();

        // Fill to the ceiling with sessions that expire at t=100.
        for n in 0..8 {
            map.put(key(n).as_bytes(), value(1).as_bytes(), 100, 0).unwrap();
        }
        let err = map
            .put(key(100).as_bytes(), value(1).as_bytes(), 100, 0)
            .unwrap_err();
        assert!(matches!(err, FwmapError::TableOverflow { .. }));

        // Past expiry the same shard accepts new sessions again.
        map.put(key(100).as_bytes(), value(1).as_bytes(), 100, 200).unwrap();
        let mut out = [0u8; size_of::<FwstateValue>()];
        assert!(map.get(key(100).as_bytes(), 250, &mut out).unwrap());
    }

    #[test]
    fn new_layer_takes_writes_old_layer_serves_reads() {
        let arena = arena();
        let agent = arena.attach_agent("fw", 1, NO_LIMIT).unwrap();
        let spec = fw4_spec(2, 16, 12);
        let map = Fwmap::create(&arena, agent.context(), &spec).unwrap();

        let old_key = key(1);
        map.put(old_key.as_bytes(), value(4).as_bytes(), 10_000, 0).unwrap();

        map.insert_new_layer(agent.context(), &spec).unwrap();
        assert_eq!(map.layer_count(), 2);

        // Old session still readable through the layer walk.
        let mut out = [0u8; size_of::<FwstateValue>()];
        assert!(map.get(old_key.as_bytes(), 100, &mut out).unwrap());

        // New writes land in the head layer.
        let new_key = key(2);
        map.put(new_key.as_bytes(), value(9).as_bytes(), 10_000, 0).unwrap();
        assert!(map.get(new_key.as_bytes(), 100, &mut out).unwrap());
        assert_eq!(map.shard_live(0, 100) + map.shard_live(1, 100), 1);
    }

    #[test]
    fn trim_detaches_fully_stale_tails() {
        let arena = arena();
        let agent = arena.attach_agent("fw", 1, NO_LIMIT).unwrap();
        let spec = fw4_spec(2, 16, 12);
        let map = Fwmap::create(&arena, agent.context(), &spec).unwrap();

        map.put(key(1).as_bytes(), value(1).as_bytes(), 100, 0).unwrap();
        map.insert_new_layer(agent.context(), &spec).unwrap();
        map.put(key(2).as_bytes(), value(1).as_bytes(), 10_000, 0).unwrap();

        // Old layer still has a live entry at t=50.
        let report = map.trim_stale_layers(50);
        assert_eq!(report.layers, 0);
        assert_eq!(map.layer_count(), 2);

        // At t=200 the old layer has fully drained.
        let report = map.trim_stale_layers(200);
        assert_eq!(report.layers, 1);
        assert_eq!(map.layer_count(), 1);
        // The caller frees the blocks after the worker barrier.
        for (ptr, size) in report.blocks {
            arena.free_in(agent.context(), ptr, size);
        }

        // Head entry survived the trim.
        let mut out = [0u8; size_of::<FwstateValue>()];
        assert!(map.get(key(2).as_bytes(), 200, &mut out).unwrap());
    }

    #[test]
    fn bad_specs_are_refused() {
        let arena = arena();
        let agent = arena.attach_agent("fw", 1, NO_LIMIT).unwrap();

        let mut spec = fw4_spec(0, 16, 12);
        assert!(Fwmap::create(&arena, agent.context(), &spec).is_err());

        spec = fw4_spec(2, 16, 32); // load above capacity
        assert!(Fwmap::create(&arena, agent.context(), &spec).is_err());

        spec = fw4_spec(2, 16, 12);
        spec.key_size = 40; // fw4 equal with fw6 key size
        assert!(Fwmap::create(&arena, agent.context(), &spec).is_err());
    }

    #[test]
    fn wrong_key_length_is_an_error() {
        let arena = arena();
        let agent = arena.attach_agent("fw", 1, NO_LIMIT).unwrap();
        let map = Fwmap::create(&arena, agent.context(), &fw4_spec(2, 16, 12)).unwrap();
        let mut out = [0u8; size_of::<FwstateValue>()];
        assert!(matches!(
            map.get(&[0u8; 3], 0, &mut out),
            Err(FwmapError::KeySize { .. })
        ));
    }
}
