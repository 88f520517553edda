use crate::error::{MqttError, Result};
use crate::validation::validate_topic_name;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum QoS {
    #[default]
    AtMostOnce = 0,
    AtLeastOnce = 1,
    ExactlyOnce = 2,
}

impl QoS {
    #[must_use]
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Delivery QoS of a message published at `self` to a subscription granted `granted`.
    #[must_use]
    pub fn clamp_to(self, granted: QoS) -> QoS {
        self.min(granted)
    }
}

impl TryFrom<u8> for QoS {
    type Error = MqttError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(QoS::AtMostOnce),
            1 => Ok(QoS::AtLeastOnce),
            2 => Ok(QoS::ExactlyOnce),
            other => Err(MqttError::InvalidQoS(other)),
        }
    }
}

impl From<QoS> for u8 {
    fn from(qos: QoS) -> Self {
        qos as u8
    }
}

impl fmt::Display for QoS {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u8())
    }
}

/// Public connection state of an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "DISCONNECTED",
            Self::Connecting => "CONNECTING",
            Self::Connected => "CONNECTED",
        };
        f.write_str(name)
    }
}

/// Whether an engine owns its transport channel or multiplexes over a shared one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionMode {
    Shared,
    Dedicated,
}

impl ConnectionMode {
    /// Absent and empty client identifiers both select shared mode.
    #[must_use]
    pub fn for_client_id(client_id: Option<&str>) -> Self {
        match client_id {
            Some(id) if !id.is_empty() => Self::Dedicated,
            _ => Self::Shared,
        }
    }
}

/// Application message carried by PUBLISH packets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub destination_name: String,
    pub payload: Bytes,
    pub qos: QoS,
    pub retained: bool,
    pub duplicate: bool,
}

impl Message {
    /// # Errors
    /// Returns `InvalidTopicName` if the destination is empty or contains wildcards.
    pub fn new(destination_name: impl Into<String>, payload: impl Into<Bytes>) -> Result<Self> {
        let destination_name = destination_name.into();
        validate_topic_name(&destination_name)?;
        Ok(Self {
            destination_name,
            payload: payload.into(),
            qos: QoS::AtMostOnce,
            retained: false,
            duplicate: false,
        })
    }

    #[must_use]
    pub fn with_qos(mut self, qos: QoS) -> Self {
        self.qos = qos;
        self
    }

    #[must_use]
    pub fn with_retained(mut self, retained: bool) -> Self {
        self.retained = retained;
        self
    }

    #[must_use]
    pub fn with_duplicate(mut self, duplicate: bool) -> Self {
        self.duplicate = duplicate;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qos_values() {
        assert_eq!(QoS::AtMostOnce.as_u8(), 0);
        assert_eq!(QoS::AtLeastOnce.as_u8(), 1);
        assert_eq!(QoS::ExactlyOnce.as_u8(), 2);
        assert_eq!(QoS::try_from(2), Ok(QoS::ExactlyOnce));
        assert_eq!(QoS::try_from(3), Err(MqttError::InvalidQoS(3)));
    }

    #[test]
    fn test_qos_clamp() {
        assert_eq!(QoS::ExactlyOnce.clamp_to(QoS::AtLeastOnce), QoS::AtLeastOnce);
        assert_eq!(QoS::AtMostOnce.clamp_to(QoS::ExactlyOnce), QoS::AtMostOnce);
        assert_eq!(QoS::AtLeastOnce.clamp_to(QoS::AtLeastOnce), QoS::AtLeastOnce);
    }

    #[test]
    fn test_qos_serde_as_integer() {
        assert_eq!(serde_json::to_string(&QoS::ExactlyOnce).unwrap(), "2");
        let qos: QoS = serde_json::from_str("1").unwrap();
        assert_eq!(qos, QoS::AtLeastOnce);
        assert!(serde_json::from_str::<QoS>("7").is_err());
    }

    #[test]
    fn test_connection_mode() {
        assert_eq!(ConnectionMode::for_client_id(None), ConnectionMode::Shared);
        assert_eq!(ConnectionMode::for_client_id(Some("")), ConnectionMode::Shared);
        assert_eq!(
            ConnectionMode::for_client_id(Some("client-1")),
            ConnectionMode::Dedicated
        );
    }

    #[test]
    fn test_message_validation() {
        assert!(Message::new("sensors/temp", "21.5").is_ok());
        assert!(Message::new("", "x").is_err());
        assert!(Message::new("sensors/+", "x").is_err());

        let msg = Message::new("a/b", "x")
            .unwrap()
            .with_qos(QoS::ExactlyOnce)
            .with_retained(true);
        assert_eq!(msg.qos, QoS::ExactlyOnce);
        assert!(msg.retained);
        assert!(!msg.duplicate);
    }
}
