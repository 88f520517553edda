use crate::packet::PacketType;
use crate::store::PacketState;
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueuedPacket {
    pub direction: PacketState,
    pub packet_id: u16,
    pub packet_type: PacketType,
}

/// Every in-flight packet of a client, sent or received, in creation order.
#[derive(Debug, Default)]
pub struct MessageQueue {
    queue: VecDeque<QueuedPacket>,
}

impl MessageQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a packet unless the same `(direction, packet_id)` is already queued.
    pub fn enqueue(&mut self, packet: QueuedPacket) -> bool {
        if self.contains(packet.direction, packet.packet_id) {
            return false;
        }
        self.queue.push_back(packet);
        true
    }

    pub fn remove(&mut self, direction: PacketState, packet_id: u16) -> Option<QueuedPacket> {
        let index = self
            .queue
            .iter()
            .position(|p| p.direction == direction && p.packet_id == packet_id)?;
        self.queue.remove(index)
    }

    #[must_use]
    pub fn contains(&self, direction: PacketState, packet_id: u16) -> bool {
        self.queue
            .iter()
            .any(|p| p.direction == direction && p.packet_id == packet_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &QueuedPacket> {
        self.queue.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn clear(&mut self) {
        self.queue.clear();
    }
}
