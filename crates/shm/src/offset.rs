//! Self-relative pointers for position-independent arena structures.
//!
//! The arena is mapped at a different virtual address in every process
//! that attaches to it, so absolute pointers stored inside it would be
//! meaningless everywhere but the writing process. Instead every
//! cross-referencing slot stores `target_addr - slot_addr`; adding the
//! slot's own address back yields the target in whatever mapping the
//! reader happens to use. A stored zero encodes null, which also means
//! a slot can never point at itself.
//!
//! Both pointer types are address-pinned: once a value has been stored,
//! moving the containing struct invalidates it. They are only ever
//! meaningful embedded in arena-resident `repr(C)` structures.

use std::marker::PhantomData;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicI64, Ordering};

/// A plain self-relative pointer.
///
/// Written single-threadedly during generation builds; readers must
/// synchronize through an [`AtomicRelPtr`] or a lock that published the
/// containing structure.
#[repr(transparent)]
pub struct RelPtr<T> {
    off: i64,
    _marker: PhantomData<*const T>,
}

impl<T> RelPtr<T> {
    /// A null relative pointer.
    #[must_use]
    pub const fn null() -> Self {
        Self {
            off: 0,
            _marker: PhantomData,
        }
    }

    /// Whether the slot currently encodes null.
    #[inline]
    #[must_use]
    pub fn is_null(&self) -> bool {
        self.off == 0
    }

    /// Point this slot at `target`.
    ///
    /// Passing a null `target` resets the slot to the null encoding.
    #[inline]
    pub fn set(&mut self, target: *const T) {
        if target.is_null() {
            self.off = 0;
        } else {
            let slot = std::ptr::from_ref(self) as i64;
            self.off = target as i64 - slot;
        }
    }

    /// Resolve the slot to a pointer in the current mapping.
    #[inline]
    #[must_use]
    pub fn load(&self) -> Option<NonNull<T>> {
        if self.off == 0 {
            return None;
        }
        let slot = std::ptr::from_ref(self) as i64;
        // Wrap-around cannot happen for slots and targets inside one
        // mapping; the delta always fits an i64.
        NonNull::new((slot + self.off) as *mut T)
    }

    /// Raw stored offset, for layout validation.
    #[inline]
    #[must_use]
    pub fn raw_offset(&self) -> i64 {
        self.off
    }
}

impl<T> Default for RelPtr<T> {
    fn default() -> Self {
        Self::null()
    }
}

impl<T> std::fmt::Debug for RelPtr<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelPtr").field("off", &self.off).finish()
    }
}

/// An atomic self-relative pointer with acquire/release publication.
///
/// This is the slot type behind the configuration head: a writer fully
/// initializes the target structure, then `store`s it with release
/// ordering; readers `load` with acquire ordering and are guaranteed to
/// see the target's contents.
#[repr(transparent)]
pub struct AtomicRelPtr<T> {
    off: AtomicI64,
    _marker: PhantomData<*const T>,
}

impl<T> AtomicRelPtr<T> {
    /// A null atomic relative pointer.
    #[must_use]
    pub const fn null() -> Self {
        Self {
            off: AtomicI64::new(0),
            _marker: PhantomData,
        }
    }

    /// Publish `target` through this slot (release store).
    #[inline]
    pub fn store(&self, target: *const T) {
        let value = if target.is_null() {
            0
        } else {
            let slot = std::ptr::from_ref(self) as i64;
            target as i64 - slot
        };
        self.off.store(value, Ordering::Release);
    }

    /// Resolve the slot (acquire load).
    #[inline]
    #[must_use]
    pub fn load(&self) -> Option<NonNull<T>> {
        let off = self.off.load(Ordering::Acquire);
        if off == 0 {
            return None;
        }
        let slot = std::ptr::from_ref(self) as i64;
        NonNull::new((slot + off) as *mut T)
    }

    /// Whether the slot currently encodes null (acquire load).
    #[inline]
    #[must_use]
    pub fn is_null(&self) -> bool {
        self.off.load(Ordering::Acquire) == 0
    }
}

impl<T> std::fmt::Debug for AtomicRelPtr<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AtomicRelPtr")
            .field("off", &self.off.load(Ordering::Relaxed))
            .finish()
    }
}
