use crate::types::QoS;
use serde::{Deserialize, Serialize};

/// SUBACK return code meaning the broker refused the subscription.
pub const SUBACK_FAILURE: i32 = 0x80;
/// SUBACK return code used by the server side when an authorization hook denies the filter.
pub const SUBACK_NOT_AUTHORIZED: i32 = 0x87;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribePacket {
    pub packet_id: u16,
    pub topic_filter: String,
    pub qos: QoS,
}

impl SubscribePacket {
    #[must_use]
    pub fn new(packet_id: u16, topic_filter: impl Into<String>, qos: QoS) -> Self {
        Self {
            packet_id,
            topic_filter: topic_filter.into(),
            qos,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubAckPacket {
    pub packet_id: u16,
    pub return_code: Vec<i32>,
}

/// Interpretation of a single SUBACK return code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubAckOutcome {
    Granted(QoS),
    Failure(i32),
    NotAuthorized(i32),
}

impl SubAckOutcome {
    #[must_use]
    pub fn from_return_code(code: i32) -> Self {
        match code {
            0 => Self::Granted(QoS::AtMostOnce),
            1 => Self::Granted(QoS::AtLeastOnce),
            2 => Self::Granted(QoS::ExactlyOnce),
            SUBACK_NOT_AUTHORIZED => Self::NotAuthorized(code),
            c if c < 0 => Self::NotAuthorized(c),
            c => Self::Failure(c),
        }
    }
}

impl SubAckPacket {
    #[must_use]
    pub fn new(packet_id: u16, return_code: Vec<i32>) -> Self {
        Self {
            packet_id,
            return_code,
        }
    }

    #[must_use]
    pub fn granted(packet_id: u16, qos: QoS) -> Self {
        Self::new(packet_id, vec![i32::from(qos.as_u8())])
    }

    /// Outcome of the first (and, for single-filter SUBSCRIBE packets, only) return code.
    #[must_use]
    pub fn outcome(&self) -> SubAckOutcome {
        self.return_code
            .first()
            .map_or(SubAckOutcome::Failure(SUBACK_FAILURE), |code| {
                SubAckOutcome::from_return_code(*code)
            })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnsubscribePacket {
    pub packet_id: u16,
    pub topic_filter: String,
}

impl UnsubscribePacket {
    #[must_use]
    pub fn new(packet_id: u16, topic_filter: impl Into<String>) -> Self {
        Self {
            packet_id,
            topic_filter: topic_filter.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnsubAckPacket {
    pub packet_id: u16,
}

impl UnsubAckPacket {
    #[must_use]
    pub fn new(packet_id: u16) -> Self {
        Self { packet_id }
    }
}
