use crate::packet::ConnectReturnCode;
use crate::types::{Message, QoS};
use std::fmt;

/// Type alias for completion callbacks without a value
pub type SuccessCallback = Box<dyn FnOnce() + Send>;

/// Type alias for SUBSCRIBE completion callbacks, called with the granted `QoS`
pub type SubscribeCallback = Box<dyn FnOnce(QoS) + Send>;

/// Type alias for failure callbacks
pub type FailureCallback<E> = Box<dyn FnOnce(E) + Send>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectFailure {
    Refused(ConnectReturnCode),
    ConnectionLost(String),
}

impl fmt::Display for ConnectFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Refused(code) => write!(f, "connection refused: {code}"),
            Self::ConnectionLost(reason) => write!(f, "connection lost: {reason}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscribeFailure {
    /// The broker answered with a failure return code.
    Refused { return_code: i32 },
    /// The broker's authorization hook denied the filter.
    NotAuthorized { return_code: i32 },
    /// The transport gave up on the SUBSCRIBE.
    Aborted,
}

impl fmt::Display for SubscribeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Refused { return_code } => write!(f, "subscription refused ({return_code:#x})"),
            Self::NotAuthorized { return_code } => {
                write!(f, "subscription not authorized ({return_code:#x})")
            }
            Self::Aborted => f.write_str("subscribe aborted by transport"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnsubscribeFailure {
    Aborted,
}

impl fmt::Display for UnsubscribeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("unsubscribe aborted by transport")
    }
}

/// Handle of a published message, reported back on delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryToken {
    pub message: Message,
    /// `None` for `QoS` 0.
    pub packet_id: Option<u16>,
}

/// Client-wide notifications. Every method has a no-op default.
pub trait ClientListener: Send {
    fn on_message_arrived(&mut self, _message: &Message) {}

    fn on_delivery_complete(&mut self, _token: &DeliveryToken) {}

    fn on_connection_lost(&mut self, _reason: &str) {}

    /// The last subscriber of a shared filter went away and its item was released.
    fn on_shared_unsubscribed(&mut self, _topic_filter: &str) {}
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopListener;

impl ClientListener for NoopListener {}
