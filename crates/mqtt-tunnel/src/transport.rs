//! Boundary to the streaming transport the engine rides on.
//!
//! The engine never reaches the network itself: it asks a [`TransportAdapter`]
//! to open channels and send packets, and the embedding application feeds the
//! transport's asynchronous reports back through the `handle_*` methods of
//! [`MqttClient`](crate::client::MqttClient).

use crate::error::Result;
use crate::packet::ControlPacket;
use crate::types::QoS;
use crate::validation::BrokerReference;
use std::fmt;

/// Identifies one message send so its outcome can be matched later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SendId(pub u64);

impl fmt::Display for SendId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "send#{}", self.0)
    }
}

/// Asynchronous result of a message send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// The transport handed the message to the server.
    Sent,
    /// The transport gave up on the message.
    Aborted,
}

/// Parameters of a CONNECT issued through the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    pub broker: BrokerReference,
    /// `None` for shared connections.
    pub client_id: Option<String>,
    pub clean_session: bool,
    pub username: Option<String>,
    pub password: Option<String>,
}

pub trait TransportAdapter {
    /// Opens the dedicated channel for `request.client_id`, or attaches to the
    /// shared channel when there is none.
    ///
    /// # Errors
    /// Returns `Transport` if the channel cannot be requested.
    fn open(&mut self, request: &ConnectRequest) -> Result<()>;

    /// Sends `packet` on the channel; the outcome is reported later under `id`.
    ///
    /// # Errors
    /// Returns `Transport` if the send could not even be queued.
    fn send(&mut self, id: SendId, packet: &ControlPacket) -> Result<()>;

    /// Opens the shared subscription item for `topic_filter`.
    ///
    /// # Errors
    /// Returns `Transport` if the item cannot be requested.
    fn subscribe_shared(&mut self, topic_filter: &str, qos: QoS) -> Result<()>;

    /// Closes the shared subscription item for `topic_filter`.
    ///
    /// # Errors
    /// Returns `Transport` if the item cannot be released.
    fn unsubscribe_shared(&mut self, topic_filter: &str) -> Result<()>;

    fn close(&mut self);
}
