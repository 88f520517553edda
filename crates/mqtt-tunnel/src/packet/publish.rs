use crate::error::{MqttError, Result};
use crate::types::{Message, QoS};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishPacket {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub packet_id: Option<u16>,
    pub message: PublishBody,
}

impl PublishPacket {
    #[must_use]
    pub fn new(packet_id: Option<u16>, message: &Message) -> Self {
        Self {
            packet_id,
            message: PublishBody::from(message),
        }
    }

    #[must_use]
    pub fn qos(&self) -> QoS {
        self.message.qos
    }

    /// Copy of this packet flagged for redelivery.
    #[must_use]
    pub fn as_duplicate(&self) -> Self {
        let mut packet = self.clone();
        packet.message.duplicate = true;
        packet
    }
}

/// Wire form of an application message; the payload travels base64-encoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishBody {
    pub qos: QoS,
    pub destination_name: String,
    #[serde(default)]
    pub retained: bool,
    #[serde(default)]
    pub duplicate: bool,
    pub payload: String,
}

impl From<&Message> for PublishBody {
    fn from(message: &Message) -> Self {
        Self {
            qos: message.qos,
            destination_name: message.destination_name.clone(),
            retained: message.retained,
            duplicate: message.duplicate,
            payload: STANDARD.encode(&message.payload),
        }
    }
}

impl TryFrom<&PublishBody> for Message {
    type Error = MqttError;

    fn try_from(body: &PublishBody) -> Result<Self> {
        let payload = STANDARD
            .decode(&body.payload)
            .map_err(|e| MqttError::MalformedPacket(format!("Invalid payload encoding: {e}")))?;
        Ok(Message::new(body.destination_name.clone(), payload)?
            .with_qos(body.qos)
            .with_retained(body.retained)
            .with_duplicate(body.duplicate))
    }
}
