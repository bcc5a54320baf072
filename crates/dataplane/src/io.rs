//! The device I/O seam.
//!
//! The engine is written against this trait instead of DPDK queues
//! directly: production wires poll-mode drivers behind it, tests wire
//! plain queues. One implementor instance belongs to one worker; the
//! engine never shares it.

use crate::list::PacketList;

/// Per-worker packet input/output.
pub trait PacketIo {
    /// Pull up to `max` packets from this worker's RX queues into
    /// `out`. Packets arrive with `rx_device_id` set.
    fn rx_drain(&mut self, max: usize, out: &mut PacketList);

    /// Enqueue packets for transmission on `device_id`, to be run
    /// through output pipeline index `pipeline` of the current
    /// generation before hitting the wire.
    fn tx_emit(&mut self, device_id: u32, pipeline: u32, packets: PacketList);
}
