//! The packet front: the five-list container handed to module chains.
//!
//! Every packet a worker touches is in exactly one of the five lists
//! at any moment. Module handlers consume `input` and route each
//! packet to `output`, `drop`, `bypass` or `pending`; between two
//! modules the framework switches `output` back to `input`.

use crate::list::PacketList;
use crate::packet::Packet;

/// The four-way (plus pending) packet router.
#[derive(Default, Debug)]
pub struct PacketFront {
    /// Packets for the current module to consume.
    pub input: PacketList,
    /// Packets the current module forwards to the next stage.
    pub output: PacketList,
    /// Packets to be released with a drop count.
    pub drop: PacketList,
    /// Packets that skip the rest of the chain and go straight back
    /// to device selection.
    pub bypass: PacketList,
    /// Packets deferred to the next batch.
    pub pending: PacketList,
}

impl PacketFront {
    /// An empty front.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Forward a packet to the next stage.
    pub fn output(&mut self, packet: Box<Packet>) {
        self.output.push_back(packet);
    }

    /// Drop a packet.
    pub fn drop(&mut self, packet: Box<Packet>) {
        self.drop.push_back(packet);
    }

    /// Send a packet back to device selection, skipping the rest of
    /// the chain.
    pub fn bypass(&mut self, packet: Box<Packet>) {
        self.bypass.push_back(packet);
    }

    /// Defer a packet to the next batch.
    pub fn pending(&mut self, packet: Box<Packet>) {
        self.pending.push_back(packet);
    }

    /// Make the previous module's output the next module's input.
    ///
    /// `input` must already be drained: a module consumes all of its
    /// input before the framework switches.
    pub fn switch(&mut self) {
        debug_assert!(self.input.is_empty(), "switch with unconsumed input");
        std::mem::swap(&mut self.input, &mut self.output);
    }

    /// Total packets across all five lists.
    #[must_use]
    pub fn total(&self) -> usize {
        self.input.len() + self.output.len() + self.drop.len() + self.bypass.len() + self.pending.len()
    }
}
