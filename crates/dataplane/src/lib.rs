//! # riptide-dataplane
//!
//! The packet side of riptide: per-thread workers pull batches from
//! their devices, resolve each packet's pipeline from the generation
//! they observed at the top of the batch, and drive the packet front
//! through the configured module chains.
//!
//! The concurrency contract is lopsided: a worker owns
//! its packet lists, its I/O endpoint and its arena slot outright, and
//! synchronizes with the rest of the system only through the
//! generation head (acquire load per batch) and the session table.
//! Nothing here blocks, ever.

pub mod counters;
pub mod error;
pub mod front;
pub mod io;
pub mod list;
pub mod module;
pub mod packet;
pub mod worker;

pub use crate::counters::LocalCounters;
pub use crate::error::{DataplaneError, DataplaneResult};
pub use crate::front::PacketFront;
pub use crate::io::PacketIo;
pub use crate::list::PacketList;
pub use crate::module::{ModuleCtx, ModuleRegistry, PacketHandler};
pub use crate::packet::Packet;
pub use crate::worker::{BatchStats, Worker};
