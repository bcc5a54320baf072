//! # riptide-shm
//!
//! The shared-memory substrate of the riptide data plane: one
//! hugepage-backed arena per NUMA instance, shared between the
//! data-plane process and any number of control-plane agents.
//!
//! What lives here:
//! - [`arena`]: the mapping, attach protocol and process-local handles
//! - [`block`]: the buddy block allocator carving the arena heap
//! - [`offset`]: self-relative pointers, the only pointer kind that is
//!   legal inside the arena
//! - [`context`]: per-agent quota bookkeeping
//! - [`agent`] / [`worker`]: the registries behind attachment and the
//!   generation barrier
//! - [`sync`]: process-shared spin and reader-writer locks
//! - [`platform`]: mmap, hugepages, NUMA binding and the monotonic
//!   clock
//!
//! The memory model in one paragraph: every pointer stored inside the
//! arena is self-relative ([`offset::RelPtr`]); configuration is
//! published by release-storing a new generation head that workers
//! acquire-load at quiescent points; retired generations are freed
//! once every live worker's `observed_gen` has moved past them. No
//! structure in the arena is ever mutated after publication.

pub mod agent;
pub mod arena;
pub mod block;
pub mod context;
pub mod error;
pub mod header;
pub mod offset;
pub mod platform;
pub mod sync;
pub mod worker;

pub use crate::agent::{AgentRegistry, AgentSlot, AgentState, MAX_AGENTS};
pub use crate::arena::{AgentHandle, Arena, ArenaOptions, WorkerHandle};
pub use crate::block::{BlockAlloc, MIN_BLOCK};
pub use crate::context::{MemoryContext, NO_LIMIT};
pub use crate::error::{ShmError, ShmResult};
pub use crate::header::{ARENA_MAGIC, ARENA_VERSION, ArenaHeader};
pub use crate::offset::{AtomicRelPtr, RelPtr};
pub use crate::platform::monotonic_ns;
pub use crate::sync::{SeqRwLock, SpinLock};
pub use crate::worker::{MAX_WORKERS, WorkerCounters, WorkerRegistry, WorkerSlot};
