//! # riptide-controlplane
//!
//! The control-plane side of the generation protocol: agents build
//! new configuration generations in the shared arena, publish them
//! atomically, and reclaim retired ones once every live worker has
//! moved past them.
//!
//! The data plane never calls into this crate; it only reads what the
//! builder publishes, through `riptide-config`.

mod lower;
mod stage;

pub mod client;
pub mod reclaim;

pub use crate::client::CpClient;
pub use crate::reclaim::{CounterTotals, ReclaimStats, reclaim, sum_counters};
