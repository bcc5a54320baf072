//! Control-plane agent registry.
//!
//! A fixed-capacity slot array in the arena header tracking every
//! controlplane process attached to the instance. Slots move through
//! `Empty -> Attached -> Draining -> Empty`: draining starts on
//! explicit detach or heartbeat timeout, and the slot is only released
//! once every generation the agent contributed to has been retired and
//! its memory context holds nothing.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use crate::context::MemoryContext;
use crate::error::{ShmError, ShmResult};
use crate::sync::SpinLock;

/// Maximum number of simultaneously attached agents.
pub const MAX_AGENTS: usize = 32;

/// Agent slot lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum AgentState {
    /// Slot is free.
    Empty = 0,
    /// An agent owns the slot.
    Attached = 1,
    /// Agent left (or went stale); memory is being reclaimed.
    Draining = 2,
}

impl AgentState {
    fn from_raw(raw: u32) -> Self {
        match raw {
            1 => Self::Attached,
            2 => Self::Draining,
            _ => Self::Empty,
        }
    }
}

/// One agent slot.
#[repr(C)]
pub struct AgentSlot {
    state: AtomicU32,
    pid: AtomicU32,
    /// Heartbeat generation counter, bumped by the agent.
    generation: AtomicU64,
    /// Monotonic nanoseconds of the last heartbeat.
    heartbeat_ns: AtomicU64,
    context: MemoryContext,
}

impl AgentSlot {
    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> AgentState {
        AgentState::from_raw(self.state.load(Ordering::Acquire))
    }

    /// Owning process id (meaningless for `Empty` slots).
    #[must_use]
    pub fn pid(&self) -> u32 {
        self.pid.load(Ordering::Relaxed)
    }

    /// Agent name, which doubles as the memory context name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.context.name()
    }

    /// The agent's memory context.
    #[must_use]
    pub fn context(&self) -> &MemoryContext {
        &self.context
    }

    /// Heartbeat counter value.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Relaxed)
    }

    /// Record a heartbeat.
    pub fn heartbeat(&self, now_ns: u64, generation: u64) {
        self.generation.store(generation, Ordering::Relaxed);
        self.heartbeat_ns.store(now_ns, Ordering::Release);
    }

    /// Whether the last heartbeat is older than `timeout_ns`.
    #[must_use]
    pub fn is_stale(&self, now_ns: u64, timeout_ns: u64) -> bool {
        let last = self.heartbeat_ns.load(Ordering::Acquire);
        now_ns.saturating_sub(last) > timeout_ns
    }
}

/// Registry embedded in the arena header.
#[repr(C)]
pub struct AgentRegistry {
    lock: SpinLock,
    slots: [AgentSlot; MAX_AGENTS],
}

impl AgentRegistry {
    pub(crate) fn init(&mut self) {
        self.lock = SpinLock::new();
        for slot in &mut self.slots {
            slot.state = AtomicU32::new(AgentState::Empty as u32);
            slot.pid = AtomicU32::new(0);
            slot.generation = AtomicU64::new(0);
            slot.heartbeat_ns = AtomicU64::new(0);
            slot.context.init("", 0);
        }
    }

    /// Attach an agent, returning its slot index.
    pub fn attach(&self, name: &str, pid: u32, limit: u64, now_ns: u64) -> ShmResult<usize> {
        if name.is_empty() {
            return Err(ShmError::invalid_name("agent name must not be empty"));
        }
        let _guard = self.lock.lock();

        let mut free = None;
        for (idx, slot) in self.slots.iter().enumerate() {
            match slot.state() {
                AgentState::Empty => {
                    if free.is_none() {
                        free = Some(idx);
                    }
                }
                AgentState::Attached => {
                    if slot.name() == name && slot.pid() == pid {
                        return Err(ShmError::AlreadyAttached {
                            name: name.to_string(),
                            pid,
                        });
                    }
                }
                AgentState::Draining => {
                    // The previous incarnation is still being torn
                    // down; the caller retries once reclamation has
                    // released the slot.
                    if slot.name() == name && slot.pid() == pid {
                        return Err(ShmError::AgentStale {
                            name: name.to_string(),
                        });
                    }
                }
            }
        }

        let idx = free.ok_or(ShmError::RegistryFull {
            capacity: MAX_AGENTS,
        })?;
        let slot = &self.slots[idx];
        slot.pid.store(pid, Ordering::Relaxed);
        slot.generation.store(0, Ordering::Relaxed);
        slot.heartbeat_ns.store(now_ns, Ordering::Relaxed);
        // The slot is ours under the lock; context init goes through a
        // raw pointer because the array is reached via &self.
        let ctx = std::ptr::addr_of!(slot.context).cast_mut();
        // SAFETY: lock held, slot state is Empty so nobody reads it.
        unsafe {
            (*ctx).init(name, limit);
        }
        slot.state
            .store(AgentState::Attached as u32, Ordering::Release);
        Ok(idx)
    }

    /// Begin detaching the agent in `idx`.
    pub fn detach(&self, idx: usize) {
        let slot = &self.slots[idx];
        let _ = slot.state.compare_exchange(
            AgentState::Attached as u32,
            AgentState::Draining as u32,
            Ordering::AcqRel,
            Ordering::Relaxed,
        );
    }

    /// Release draining slots whose memory has been fully reclaimed.
    ///
    /// Returns the number of slots freed. Called by the control-plane
    /// reclaimer after generation teardown.
    pub fn sweep_draining(&self) -> usize {
        let _guard = self.lock.lock();
        let mut freed = 0;
        for slot in &self.slots {
            if slot.state() == AgentState::Draining && slot.context.in_use() == 0 {
                slot.state
                    .store(AgentState::Empty as u32, Ordering::Release);
                freed += 1;
            }
        }
        freed
    }

    /// Mark stale attached agents as draining.
    ///
    /// Returns how many agents were demoted.
    pub fn demote_stale(&self, now_ns: u64, timeout_ns: u64) -> usize {
        let mut demoted = 0;
        for slot in &self.slots {
            if slot.state() == AgentState::Attached && slot.is_stale(now_ns, timeout_ns) {
                let swapped = slot.state.compare_exchange(
                    AgentState::Attached as u32,
                    AgentState::Draining as u32,
                    Ordering::AcqRel,
                    Ordering::Relaxed,
                );
                if swapped.is_ok() {
                    demoted += 1;
                }
            }
        }
        demoted
    }

    /// Access a slot by index.
    #[must_use]
    pub fn slot(&self, idx: usize) -> &AgentSlot {
        &self.slots[idx]
    }

    /// Number of slots currently attached.
    #[must_use]
    pub fn attached_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| s.state() == AgentState::Attached)
            .count()
    }

    /// Find an attached or draining agent by name.
    #[must_use]
    pub fn find(&self, name: &str) -> Option<usize> {
        self.slots
            .iter()
            .position(|s| s.state() != AgentState::Empty && s.name() == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh() -> Box<AgentRegistry> {
        // SAFETY: zeroed slots are valid Empty slots; init formats.
        let mut reg: Box<AgentRegistry> = unsafe { Box::new_zeroed().assume_init() };
        reg.init();
        reg
    }

    #[test]
    fn attach_detach_cycle() {
        let reg = fresh();
        let idx = reg.attach("route", 100, 1 << 20, 0).unwrap();
        assert_eq!(reg.slot(idx).state(), AgentState::Attached);
        assert_eq!(reg.slot(idx).name(), "route");
        assert_eq!(reg.attached_count(), 1);

        reg.detach(idx);
        assert_eq!(reg.slot(idx).state(), AgentState::Draining);
        assert_eq!(reg.sweep_draining(), 1);
        assert_eq!(reg.slot(idx).state(), AgentState::Empty);
    }

    #[test]
    fn duplicate_attach_rejected() {
        let reg = fresh();
        reg.attach("route", 100, 0, 0).unwrap();
        let err = reg.attach("route", 100, 0, 0).unwrap_err();
        assert!(matches!(err, ShmError::AlreadyAttached { .. }));
        // Same name, different pid is a different agent.
        reg.attach("route", 101, 0, 0).unwrap();
    }

    #[test]
    fn reattach_while_draining_reports_stale() {
        let reg = fresh();
        let idx = reg.attach("route", 100, 1 << 20, 0).unwrap();
        reg.slot(idx).context().charge(64).unwrap();
        reg.detach(idx);
        // Memory still held: the identity is stale, not free.
        let err = reg.attach("route", 100, 0, 0).unwrap_err();
        assert!(matches!(err, ShmError::AgentStale { .. }));
        reg.slot(idx).context().credit(64);
        reg.sweep_draining();
        reg.attach("route", 100, 0, 0).unwrap();
    }

    #[test]
    fn registry_fills_up() {
        let reg = fresh();
        for i in 0..MAX_AGENTS {
            reg.attach(&format!("agent-{i}"), i as u32, 0, 0).unwrap();
        }
        let err = reg.attach("overflow", 999, 0, 0).unwrap_err();
        assert!(matches!(err, ShmError::RegistryFull { .. }));
    }

    #[test]
    fn draining_slot_with_memory_stays() {
        let reg = fresh();
        let idx = reg.attach("leaky", 7, 1 << 20, 0).unwrap();
        reg.slot(idx).context().charge(4096).unwrap();
        reg.detach(idx);
        assert_eq!(reg.sweep_draining(), 0);
        reg.slot(idx).context().credit(4096);
        assert_eq!(reg.sweep_draining(), 1);
    }

    #[test]
    fn stale_agents_are_demoted() {
        let reg = fresh();
        let idx = reg.attach("sleepy", 1, 0, 1_000).unwrap();
        reg.slot(idx).heartbeat(10_000, 1);
        assert_eq!(reg.demote_stale(10_500, 3_000), 0);
        assert_eq!(reg.demote_stale(14_000, 3_000), 1);
        assert_eq!(reg.slot(idx).state(), AgentState::Draining);
    }

    #[test]
    fn find_by_name() {
        let reg = fresh();
        let idx = reg.attach("fw", 5, 0, 0).unwrap();
        assert_eq!(reg.find("fw"), Some(idx));
        assert_eq!(reg.find("nat64"), None);
    }
}
