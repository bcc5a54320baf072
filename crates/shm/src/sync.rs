//! Process-shared locks that live inside the arena.
//!
//! `parking_lot` locks park threads on process-local state, so they
//! cannot be placed in memory shared between processes. The locks here
//! are plain `repr(C)` atomics with busy-wait acquisition. They guard
//! rare, short critical sections (configuration-time allocation and
//! publication), never the packet path.

use std::sync::atomic::{AtomicU32, Ordering};

const UNLOCKED: u32 = 0;
const LOCKED: u32 = 1;

/// A minimal test-and-test-and-set spin lock.
#[repr(C)]
pub struct SpinLock {
    state: AtomicU32,
}

impl SpinLock {
    /// A new, unlocked lock.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: AtomicU32::new(UNLOCKED),
        }
    }

    /// Acquire the lock, spinning until it is free.
    pub fn lock(&self) -> SpinGuard<'_> {
        loop {
            if self
                .state
                .compare_exchange_weak(UNLOCKED, LOCKED, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
            {
                return SpinGuard { lock: self };
            }
            while self.state.load(Ordering::Relaxed) == LOCKED {
                std::hint::spin_loop();
            }
        }
    }

    /// Try to acquire the lock without spinning.
    #[must_use]
    pub fn try_lock(&self) -> Option<SpinGuard<'_>> {
        self.state
            .compare_exchange(UNLOCKED, LOCKED, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| SpinGuard { lock: self })
    }
}

impl Default for SpinLock {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard for [`SpinLock`].
pub struct SpinGuard<'a> {
    lock: &'a SpinLock,
}

impl Drop for SpinGuard<'_> {
    fn drop(&mut self) {
        self.lock.state.store(UNLOCKED, Ordering::Release);
    }
}

/// A writer-preference reader-writer spin lock.
///
/// State layout: bit 31 is the writer bit, bit 30 is the
/// writer-waiting bit, bits 0..30 count active readers. Readers stay
/// out while a writer holds or waits for the lock, so a stream of
/// readers cannot starve the single configuration writer.
#[repr(C)]
pub struct SeqRwLock {
    state: AtomicU32,
}

const WRITER: u32 = 1 << 31;
const WRITER_WAITING: u32 = 1 << 30;
const READER_MASK: u32 = WRITER_WAITING - 1;

impl SeqRwLock {
    /// A new, unlocked lock.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: AtomicU32::new(0),
        }
    }

    /// Acquire a shared read guard.
    pub fn read(&self) -> ReadGuard<'_> {
        loop {
            let state = self.state.load(Ordering::Relaxed);
            if state & (WRITER | WRITER_WAITING) == 0 {
                debug_assert!(state & READER_MASK < READER_MASK);
                if self
                    .state
                    .compare_exchange_weak(state, state + 1, Ordering::Acquire, Ordering::Relaxed)
                    .is_ok()
                {
                    return ReadGuard { lock: self };
                }
            }
            std::hint::spin_loop();
        }
    }

    /// Acquire the exclusive write guard.
    pub fn write(&self) -> WriteGuard<'_> {
        // Announce intent so new readers back off.
        self.state.fetch_or(WRITER_WAITING, Ordering::Relaxed);
        loop {
            let state = self.state.load(Ordering::Relaxed);
            if state & (WRITER | READER_MASK) == 0 {
                if self
                    .state
                    .compare_exchange_weak(state, WRITER, Ordering::Acquire, Ordering::Relaxed)
                    .is_ok()
                {
                    return WriteGuard { lock: self };
                }
            }
            std::hint::spin_loop();
        }
    }
}

impl Default for SeqRwLock {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared guard for [`SeqRwLock`].
pub struct ReadGuard<'a> {
    lock: &'a SeqRwLock,
}

impl Drop for ReadGuard<'_> {
    fn drop(&mut self) {
        self.lock.state.fetch_sub(1, Ordering::Release);
    }
}

/// Exclusive guard for [`SeqRwLock`].
pub struct WriteGuard<'a> {
    lock: &'a SeqRwLock,
}

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        self.lock.state.store(0, Ordering::Release);
    }
}
