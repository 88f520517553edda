//! Control packets exchanged with the streaming transport.
//!
//! Dedicated connections carry packets as JSON inside a transport envelope:
//! `{"type":"CONTROL_PACKET","message":{...}}`, or
//! `{"type":"DELIVERY_COMPLETE","message":<packetId>}` when the server side has
//! completed a publish handshake on behalf of the client. Shared connections
//! use the positional encoding in [`shared`].

pub mod ack;
pub mod connack;
pub mod publish;
pub mod shared;
pub mod subscribe;

pub use ack::{PubAckPacket, PubCompPacket, PubRecPacket, PubRelPacket};
pub use connack::{ConnAckPacket, ConnectReturnCode};
pub use publish::{PublishBody, PublishPacket};
pub use shared::SharedItemUpdate;
pub use subscribe::{SubAckOutcome, SubAckPacket, SubscribePacket, UnsubAckPacket, UnsubscribePacket};

use crate::error::{MqttError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PacketType {
    Connack,
    Subscribe,
    SubAck,
    Unsubscribe,
    UnsubAck,
    Publish,
    PubAck,
    PubRec,
    PubRel,
    PubComp,
}

impl fmt::Display for PacketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Connack => "CONNACK",
            Self::Subscribe => "SUBSCRIBE",
            Self::SubAck => "SUBACK",
            Self::Unsubscribe => "UNSUBSCRIBE",
            Self::UnsubAck => "UNSUBACK",
            Self::Publish => "PUBLISH",
            Self::PubAck => "PUBACK",
            Self::PubRec => "PUBREC",
            Self::PubRel => "PUBREL",
            Self::PubComp => "PUBCOMP",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "UPPERCASE")]
pub enum ControlPacket {
    Connack(ConnAckPacket),
    Subscribe(SubscribePacket),
    SubAck(SubAckPacket),
    Unsubscribe(UnsubscribePacket),
    UnsubAck(UnsubAckPacket),
    Publish(PublishPacket),
    PubAck(PubAckPacket),
    PubRec(PubRecPacket),
    PubRel(PubRelPacket),
    PubComp(PubCompPacket),
}

impl ControlPacket {
    #[must_use]
    pub fn packet_type(&self) -> PacketType {
        match self {
            Self::Connack(_) => PacketType::Connack,
            Self::Subscribe(_) => PacketType::Subscribe,
            Self::SubAck(_) => PacketType::SubAck,
            Self::Unsubscribe(_) => PacketType::Unsubscribe,
            Self::UnsubAck(_) => PacketType::UnsubAck,
            Self::Publish(_) => PacketType::Publish,
            Self::PubAck(_) => PacketType::PubAck,
            Self::PubRec(_) => PacketType::PubRec,
            Self::PubRel(_) => PacketType::PubRel,
            Self::PubComp(_) => PacketType::PubComp,
        }
    }

    #[must_use]
    pub fn packet_id(&self) -> Option<u16> {
        match self {
            Self::Connack(_) => None,
            Self::Subscribe(p) => Some(p.packet_id),
            Self::SubAck(p) => Some(p.packet_id),
            Self::Unsubscribe(p) => Some(p.packet_id),
            Self::UnsubAck(p) => Some(p.packet_id),
            Self::Publish(p) => p.packet_id,
            Self::PubAck(p) => Some(p.packet_id),
            Self::PubRec(p) => Some(p.packet_id),
            Self::PubRel(p) => Some(p.packet_id),
            Self::PubComp(p) => Some(p.packet_id),
        }
    }

    /// # Errors
    /// Returns `Serialization` if the packet cannot be rendered as JSON.
    pub fn encode(&self) -> Result<String> {
        Envelope::ControlPacket(self.clone()).encode()
    }
}

/// Outer message of a transport item update or message send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "message", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Envelope {
    ControlPacket(ControlPacket),
    DeliveryComplete(u16),
}

impl Envelope {
    /// # Errors
    /// Returns `Serialization` if the envelope cannot be rendered as JSON.
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// # Errors
    /// Returns `MalformedPacket` when the text is not a recognised envelope.
    pub fn decode(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| MqttError::MalformedPacket(e.to_string()))
    }
}
