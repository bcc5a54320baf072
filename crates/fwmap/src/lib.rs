//! # riptide-fwmap
//!
//! The connection-tracking substrate shared by the balancer and
//! firewall-state modules: a sharded, TTL-bearing concurrent hash map
//! living in the arena, with layered wait-free enlargement and an
//! at-least-once cross-node sync protocol.
//!
//! Behavior (key comparison, hashing, value copy and merge) is
//! selected from a closed registry at construction; the merge function
//! is commutative, which is what makes redelivered sync frames and
//! concurrent same-key writers converge.

pub mod error;
pub mod map;
pub mod state;
pub mod sync;
pub mod timeouts;

pub use crate::error::{FwmapError, FwmapResult};
pub use crate::map::{Fwmap, FwmapRoot, FwmapSpec, PutOutcome, TrimReport};
pub use crate::state::{
    Fw4Key, Fw6Key, FwStateFlags, FwmapCopyValue, FwmapFuncs, FwmapHash, FwmapKeyEqual,
    FwmapMergeValue, FwmapRand, FwstateValue, fnv1a, merge_fwstate,
};
pub use crate::sync::{
    ADDR_TYPE_V4, ADDR_TYPE_V6, SYNC_FRAME_SIZE, SessionKey, SyncFrame, apply_sync_frame,
};
pub use crate::timeouts::FwTimeouts;
