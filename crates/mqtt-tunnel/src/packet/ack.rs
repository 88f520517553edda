use serde::{Deserialize, Serialize};

macro_rules! define_ack_packet {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "camelCase")]
        pub struct $name {
            pub packet_id: u16,
        }

        impl $name {
            #[must_use]
            pub fn new(packet_id: u16) -> Self {
                Self { packet_id }
            }
        }
    };
}

define_ack_packet! {
    /// PUBACK: terminal acknowledgement of a `QoS` 1 publish.
    PubAckPacket
}

define_ack_packet! {
    /// PUBREC: first acknowledgement of a `QoS` 2 publish.
    PubRecPacket
}

define_ack_packet! {
    /// PUBREL: release of a `QoS` 2 publish after PUBREC.
    PubRelPacket
}

define_ack_packet! {
    /// PUBCOMP: terminal acknowledgement of a `QoS` 2 publish.
    PubCompPacket
}
