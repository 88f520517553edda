use crate::packet::connack::ConnectReturnCode;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, MqttError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MqttError {
    #[error("Invalid [{name}] argument: {value}")]
    InvalidArgument { name: &'static str, value: String },

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Invalid topic name: {0}")]
    InvalidTopicName(String),

    #[error("Invalid topic filter: {0}")]
    InvalidTopicFilter(String),

    #[error("Invalid client ID: {0}")]
    InvalidClientId(String),

    #[error("Invalid broker reference: {0}")]
    InvalidBrokerReference(String),

    #[error("Invalid QoS: {0}")]
    InvalidQoS(u8),

    #[error("Connection refused: {0}")]
    ConnectionRefused(ConnectReturnCode),

    #[error("Malformed packet: {0}")]
    MalformedPacket(String),

    #[error("Packet identifier not found: {0}")]
    PacketIdNotFound(u16),

    #[error("Packet ID exhausted")]
    PacketIdExhausted,

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl MqttError {
    pub(crate) fn invalid_argument(name: &'static str, value: impl std::fmt::Display) -> Self {
        Self::InvalidArgument {
            name,
            value: value.to_string(),
        }
    }

    /// Errors raised by the caller, as opposed to the transport or the storage medium.
    #[must_use]
    pub fn is_usage_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidArgument { .. }
                | Self::InvalidState(_)
                | Self::InvalidTopicName(_)
                | Self::InvalidTopicFilter(_)
                | Self::InvalidClientId(_)
                | Self::InvalidBrokerReference(_)
                | Self::InvalidQoS(_)
        )
    }
}

impl From<std::io::Error> for MqttError {
    fn from(err: std::io::Error) -> Self {
        MqttError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for MqttError {
    fn from(err: serde_json::Error) -> Self {
        MqttError::Serialization(err.to_string())
    }
}
