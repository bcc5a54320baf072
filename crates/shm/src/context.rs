//! Named memory contexts: quota bookkeeping over the block allocator.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{ShmError, ShmResult};

/// Maximum context/agent name length in bytes.
pub const NAME_LEN: usize = 64;

/// Limit value meaning "no quota".
pub const NO_LIMIT: u64 = u64::MAX;

/// Bookkeeping wrapper bound to one agent or module.
///
/// Lives inside the arena; every allocation routed through a context
/// bumps `allocated`, every free bumps `freed`. The quota invariant is
/// `allocated - freed <= limit` at all times.
#[repr(C)]
pub struct MemoryContext {
    name: [u8; NAME_LEN],
    limit: u64,
    allocated: AtomicU64,
    freed: AtomicU64,
}

impl MemoryContext {
    /// Format the context in place.
    pub(crate) fn init(&mut self, name: &str, limit: u64) {
        self.name = [0; NAME_LEN];
        let bytes = name.as_bytes();
        let n = bytes.len().min(NAME_LEN - 1);
        self.name[..n].copy_from_slice(&bytes[..n]);
        self.limit = limit;
        self.allocated = AtomicU64::new(0);
        self.freed = AtomicU64::new(0);
    }

    /// Context name.
    #[must_use]
    pub fn name(&self) -> &str {
        let end = self.name.iter().position(|&b| b == 0).unwrap_or(NAME_LEN);
        std::str::from_utf8(&self.name[..end]).unwrap_or("<non-utf8>")
    }

    /// Total bytes ever allocated through this context.
    #[must_use]
    pub fn allocated(&self) -> u64 {
        self.allocated.load(Ordering::Relaxed)
    }

    /// Total bytes ever freed through this context.
    #[must_use]
    pub fn freed(&self) -> u64 {
        self.freed.load(Ordering::Relaxed)
    }

    /// Bytes currently held.
    #[must_use]
    pub fn in_use(&self) -> u64 {
        self.allocated().saturating_sub(self.freed())
    }

    /// Quota ceiling ([`NO_LIMIT`] when unlimited).
    #[must_use]
    pub fn limit(&self) -> u64 {
        self.limit
    }

    /// Reserve `size` bytes against the quota.
    ///
    /// The CAS loop keeps concurrent reservations from jointly
    /// overshooting the limit.
    pub fn charge(&self, size: u64) -> ShmResult<()> {
        let mut current = self.allocated.load(Ordering::Relaxed);
        loop {
            let in_use = current.saturating_sub(self.freed.load(Ordering::Relaxed));
            if self.limit != NO_LIMIT && in_use + size > self.limit {
                return Err(ShmError::quota_exceeded(self.name(), in_use, size, self.limit));
            }
            match self.allocated.compare_exchange_weak(
                current,
                current + size,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return Ok(()),
                Err(actual) => current = actual,
            }
        }
    }

    /// Return `size` bytes to the quota.
    pub fn credit(&self, size: u64) {
        self.freed.fetch_add(size, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh(name: &str, limit: u64) -> Box<MemoryContext> {
        // SAFETY: all-zero bytes are a valid MemoryContext; init
        // formats it before use.
        let mut ctx: Box<MemoryContext> = unsafe { Box::new_zeroed().assume_init() };
        ctx.init(name, limit);
        ctx
    }

    #[test]
    fn name_roundtrip() {
        let ctx = fresh("balancer", NO_LIMIT);
        assert_eq!(ctx.name(), "balancer");
    }

    #[test]
    fn long_names_are_truncated() {
        let long = "x".repeat(200);
        let ctx = fresh(&long, NO_LIMIT);
        assert_eq!(ctx.name().len(), NAME_LEN - 1);
    }

    #[test]
    fn quota_enforced() {
        let ctx = fresh("small", 1024);
        ctx.charge(512).unwrap();
        ctx.charge(512).unwrap();
        let err = ctx.charge(1).unwrap_err();
        assert!(matches!(err, ShmError::QuotaExceeded { .. }));
        assert_eq!(ctx.in_use(), 1024);
    }

    #[test]
    fn credit_releases_quota() {
        let ctx = fresh("cycle", 1024);
        ctx.charge(1024).unwrap();
        ctx.credit(512);
        ctx.charge(512).unwrap();
        assert_eq!(ctx.in_use(), 1024);
        assert_eq!(ctx.allocated(), 1536);
        assert_eq!(ctx.freed(), 512);
    }

    #[test]
    fn unlimited_context_never_fails() {
        let ctx = fresh("cp", NO_LIMIT);
        ctx.charge(u64::MAX / 2).unwrap();
        ctx.charge(u64::MAX / 4).unwrap();
    }
}
