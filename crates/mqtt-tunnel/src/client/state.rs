use super::callbacks::DeliveryToken;
use super::queue::{MessageQueue, QueuedPacket};
use crate::error::Result;
use crate::options::{SubscribeCallbacks, UnsubscribeOptions};
use crate::packet::{ControlPacket, PacketType, PublishPacket};
use crate::packet_id::PacketIdGenerator;
use crate::qos2::OutgoingPhase;
use crate::store::PacketState;
use crate::transport::SendId;
use crate::types::{ConnectionState, QoS};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    /// Dedicated transport recovering on its own; the store is replayed once it is back.
    Reconnecting,
}

impl ClientState {
    #[must_use]
    pub fn public(self) -> ConnectionState {
        match self {
            Self::Disconnected => ConnectionState::Disconnected,
            Self::Connecting | Self::Reconnecting => ConnectionState::Connecting,
            Self::Connected => ConnectionState::Connected,
        }
    }
}

pub(crate) enum SentOperation {
    Subscribe {
        topic_filter: String,
        qos: QoS,
        callbacks: SubscribeCallbacks,
    },
    Unsubscribe {
        topic_filter: String,
        options: UnsubscribeOptions,
    },
    Publish {
        token: DeliveryToken,
        pubrec_received: bool,
    },
}

/// Outbound packet awaiting its acknowledgement, with the caller's callbacks.
pub(crate) struct PendingSent {
    pub packet: ControlPacket,
    /// Latest transport send carrying this packet; outcomes of older sends are stale.
    pub last_send: Option<SendId>,
    pub operation: SentOperation,
}

impl PendingSent {
    pub fn phase(&self) -> OutgoingPhase {
        match (&self.packet, &self.operation) {
            (ControlPacket::Publish(p), SentOperation::Publish { pubrec_received, .. })
                if p.qos() == QoS::ExactlyOnce =>
            {
                if *pubrec_received {
                    OutgoingPhase::AwaitingPubComp
                } else {
                    OutgoingPhase::AwaitingPubRec
                }
            }
            _ => OutgoingPhase::Unknown,
        }
    }

    pub fn publish_qos(&self) -> Option<QoS> {
        match &self.packet {
            ControlPacket::Publish(p) => Some(p.qos()),
            _ => None,
        }
    }
}

/// Inbound `QoS` 2 PUBLISH awaiting PUBREL.
#[derive(Debug, Clone)]
pub(crate) struct PendingReceived {
    pub packet: PublishPacket,
}

#[derive(Default)]
pub(crate) struct ClientSession {
    state: ClientState,
    packet_id_gen: PacketIdGenerator,
    sent: HashMap<u16, PendingSent>,
    received: HashMap<u16, PendingReceived>,
    queue: MessageQueue,
}

impl ClientSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    pub fn set_state(&mut self, state: ClientState) {
        self.state = state;
    }

    pub fn next_packet_id(&mut self) -> Result<u16> {
        let (sent, received) = (&self.sent, &self.received);
        self.packet_id_gen
            .next_free(|id| sent.contains_key(&id) || received.contains_key(&id))
    }

    pub fn reserve_packet_id(&mut self, packet_id: u16) {
        self.packet_id_gen.advance_past(packet_id);
    }

    pub fn track_sent(&mut self, packet_id: u16, pending: PendingSent) {
        let packet_type = pending.packet.packet_type();
        self.queue.enqueue(QueuedPacket {
            direction: PacketState::Sent,
            packet_id,
            packet_type,
        });
        self.sent.insert(packet_id, pending);
    }

    pub fn remove_sent(&mut self, packet_id: u16) -> Option<PendingSent> {
        self.queue.remove(PacketState::Sent, packet_id);
        self.sent.remove(&packet_id)
    }

    /// Removes the entry only if it is waiting for an acknowledgement of `ack`.
    pub fn take_sent_for(&mut self, packet_id: u16, ack: PacketType) -> Option<PendingSent> {
        let expected = match ack {
            PacketType::SubAck => PacketType::Subscribe,
            PacketType::UnsubAck => PacketType::Unsubscribe,
            _ => PacketType::Publish,
        };
        if self.sent.get(&packet_id)?.packet.packet_type() != expected {
            return None;
        }
        self.remove_sent(packet_id)
    }

    pub fn sent(&self, packet_id: u16) -> Option<&PendingSent> {
        self.sent.get(&packet_id)
    }

    pub fn sent_mut(&mut self, packet_id: u16) -> Option<&mut PendingSent> {
        self.sent.get_mut(&packet_id)
    }

    pub fn track_received(&mut self, packet_id: u16, pending: PendingReceived) {
        self.queue.enqueue(QueuedPacket {
            direction: PacketState::Received,
            packet_id,
            packet_type: PacketType::Publish,
        });
        self.received.insert(packet_id, pending);
    }

    pub fn remove_received(&mut self, packet_id: u16) -> Option<PendingReceived> {
        self.queue.remove(PacketState::Received, packet_id);
        self.received.remove(&packet_id)
    }

    pub fn has_received(&self, packet_id: u16) -> bool {
        self.received.contains_key(&packet_id)
    }

    pub fn queue(&self) -> &MessageQueue {
        &self.queue
    }

    pub fn sent_len(&self) -> usize {
        self.sent.len()
    }

    pub fn received_len(&self) -> usize {
        self.received.len()
    }

    /// Drops every in-flight record. Pending callbacks are dropped without being called.
    pub fn clear_in_flight(&mut self) -> usize {
        let dropped = self.sent.len() + self.received.len();
        self.sent.clear();
        self.received.clear();
        self.queue.clear();
        dropped
    }
}
