//! Exactly-once handshake decisions, kept free of engine state so both
//! directions of the flow can be checked in isolation.

use crate::packet::{ControlPacket, PubCompPacket, PubRecPacket, PubRelPacket};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QoS2Action {
    SendPubRec { packet_id: u16 },
    SendPubRel { packet_id: u16 },
    SendPubComp { packet_id: u16 },
    MarkPubRecReceived { packet_id: u16 },
    RemoveOutgoing { packet_id: u16 },
    TrackIncoming { packet_id: u16 },
    RemoveIncoming { packet_id: u16 },
    DeliverMessage { packet_id: u16 },
    CompleteFlow { packet_id: u16 },
}

impl QoS2Action {
    #[must_use]
    pub fn to_packet(&self) -> Option<ControlPacket> {
        match *self {
            Self::SendPubRec { packet_id } => Some(ControlPacket::PubRec(PubRecPacket::new(packet_id))),
            Self::SendPubRel { packet_id } => Some(ControlPacket::PubRel(PubRelPacket::new(packet_id))),
            Self::SendPubComp { packet_id } => {
                Some(ControlPacket::PubComp(PubCompPacket::new(packet_id)))
            }
            _ => None,
        }
    }
}

/// State of an outgoing `QoS` 2 publish when its PUBREC arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutgoingPhase {
    Unknown,
    AwaitingPubRec,
    AwaitingPubComp,
}

#[must_use]
pub fn handle_incoming_pubrec(packet_id: u16, phase: OutgoingPhase) -> Vec<QoS2Action> {
    match phase {
        OutgoingPhase::Unknown => vec![],
        OutgoingPhase::AwaitingPubRec => vec![
            QoS2Action::MarkPubRecReceived { packet_id },
            QoS2Action::SendPubRel { packet_id },
        ],
        // PUBREC redelivered after our PUBREL: release again, nothing else changes.
        OutgoingPhase::AwaitingPubComp => vec![QoS2Action::SendPubRel { packet_id }],
    }
}

#[must_use]
pub fn handle_incoming_pubcomp(packet_id: u16, phase: OutgoingPhase) -> Vec<QoS2Action> {
    match phase {
        OutgoingPhase::AwaitingPubComp => vec![
            QoS2Action::RemoveOutgoing { packet_id },
            QoS2Action::CompleteFlow { packet_id },
        ],
        OutgoingPhase::Unknown | OutgoingPhase::AwaitingPubRec => vec![],
    }
}

#[must_use]
pub fn handle_incoming_publish_qos2(packet_id: u16, already_tracked: bool) -> Vec<QoS2Action> {
    if already_tracked {
        vec![QoS2Action::SendPubRec { packet_id }]
    } else {
        vec![
            QoS2Action::TrackIncoming { packet_id },
            QoS2Action::DeliverMessage { packet_id },
            QoS2Action::SendPubRec { packet_id },
        ]
    }
}

#[must_use]
pub fn handle_incoming_pubrel(packet_id: u16, has_pending: bool) -> Vec<QoS2Action> {
    if has_pending {
        vec![
            QoS2Action::RemoveIncoming { packet_id },
            QoS2Action::SendPubComp { packet_id },
        ]
    } else {
        vec![QoS2Action::SendPubComp { packet_id }]
    }
}
