use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnAckPacket {
    pub return_code: i32,
}

impl ConnAckPacket {
    #[must_use]
    pub fn accepted() -> Self {
        Self { return_code: 0 }
    }

    #[must_use]
    pub fn return_code(&self) -> ConnectReturnCode {
        ConnectReturnCode::from(self.return_code)
    }
}

/// MQTT 3.1.1 CONNACK return codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectReturnCode {
    Accepted,
    UnacceptableProtocolVersion,
    IdentifierRejected,
    ServerUnavailable,
    BadUsernameOrPassword,
    NotAuthorized,
    Other(i32),
}

impl ConnectReturnCode {
    #[must_use]
    pub fn is_success(self) -> bool {
        self == Self::Accepted
    }
}

impl From<i32> for ConnectReturnCode {
    fn from(code: i32) -> Self {
        match code {
            0 => Self::Accepted,
            1 => Self::UnacceptableProtocolVersion,
            2 => Self::IdentifierRejected,
            3 => Self::ServerUnavailable,
            4 => Self::BadUsernameOrPassword,
            5 => Self::NotAuthorized,
            other => Self::Other(other),
        }
    }
}

impl From<ConnectReturnCode> for i32 {
    fn from(code: ConnectReturnCode) -> Self {
        match code {
            ConnectReturnCode::Accepted => 0,
            ConnectReturnCode::UnacceptableProtocolVersion => 1,
            ConnectReturnCode::IdentifierRejected => 2,
            ConnectReturnCode::ServerUnavailable => 3,
            ConnectReturnCode::BadUsernameOrPassword => 4,
            ConnectReturnCode::NotAuthorized => 5,
            ConnectReturnCode::Other(other) => other,
        }
    }
}

impl fmt::Display for ConnectReturnCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Accepted => f.write_str("accepted"),
            Self::UnacceptableProtocolVersion => f.write_str("unacceptable protocol version"),
            Self::IdentifierRejected => f.write_str("identifier rejected"),
            Self::ServerUnavailable => f.write_str("server unavailable"),
            Self::BadUsernameOrPassword => f.write_str("bad user name or password"),
            Self::NotAuthorized => f.write_str("not authorized"),
            Self::Other(code) => write!(f, "return code {code}"),
        }
    }
}
