use crate::error::{MqttError, Result};
use std::fmt;

const MAX_STRING_LEN: usize = 65_535;
const URI_SCHEMES: [&str; 4] = ["tcp", "mqtt", "mqtts", "ssl"];

#[must_use]
pub fn is_valid_topic_name(topic: &str) -> bool {
    !topic.is_empty()
        && topic.len() <= MAX_STRING_LEN
        && !topic.contains(['+', '#', '\0'])
}

#[must_use]
pub fn is_valid_topic_filter(filter: &str) -> bool {
    if filter.is_empty() || filter.len() > MAX_STRING_LEN || filter.contains('\0') {
        return false;
    }

    let levels: Vec<&str> = filter.split('/').collect();
    for (i, level) in levels.iter().enumerate() {
        if level.contains('#') && (*level != "#" || i != levels.len() - 1) {
            return false;
        }
        if level.contains('+') && *level != "+" {
            return false;
        }
    }
    true
}

/// # Errors
/// Returns `InvalidTopicName` for empty names, wildcards or NUL characters.
pub fn validate_topic_name(topic: &str) -> Result<()> {
    if is_valid_topic_name(topic) {
        Ok(())
    } else {
        Err(MqttError::InvalidTopicName(topic.to_string()))
    }
}

/// # Errors
/// Returns `InvalidArgument` naming `topicFilter` when the filter is malformed.
pub fn validate_topic_filter(filter: &str) -> Result<()> {
    if is_valid_topic_filter(filter) {
        Ok(())
    } else {
        Err(MqttError::invalid_argument("topicFilter", filter))
    }
}

/// # Errors
/// Returns `InvalidClientId` when the identifier cannot be carried in a CONNECT packet.
pub fn validate_client_id(client_id: &str) -> Result<()> {
    if client_id.len() > MAX_STRING_LEN || client_id.contains('\0') {
        return Err(MqttError::InvalidClientId(client_id.to_string()));
    }
    Ok(())
}

#[must_use]
pub fn topic_matches_filter(topic: &str, filter: &str) -> bool {
    if topic.starts_with('$') && (filter.starts_with('+') || filter.starts_with('#')) {
        return false;
    }

    let mut topic_levels = topic.split('/');
    let mut filter_levels = filter.split('/');

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => {}
            (Some(f), Some(t)) if f == t => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

/// Either a pre-configured broker alias or a dynamic broker URI.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BrokerReference {
    Alias(String),
    Uri {
        scheme: String,
        host: String,
        port: u16,
    },
}

impl BrokerReference {
    /// # Errors
    /// Returns `InvalidBrokerReference` when the input is neither an alias nor a supported URI.
    pub fn parse(reference: &str) -> Result<Self> {
        if let Some((scheme, rest)) = reference.split_once("://") {
            return Self::parse_uri(reference, scheme, rest);
        }

        let is_alias = !reference.is_empty()
            && reference
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if is_alias {
            Ok(Self::Alias(reference.to_string()))
        } else {
            Err(MqttError::InvalidBrokerReference(reference.to_string()))
        }
    }

    fn parse_uri(reference: &str, scheme: &str, rest: &str) -> Result<Self> {
        let invalid = || MqttError::InvalidBrokerReference(reference.to_string());

        let scheme = scheme.to_ascii_lowercase();
        if !URI_SCHEMES.contains(&scheme.as_str()) {
            return Err(invalid());
        }

        let (host, port) = rest.rsplit_once(':').ok_or_else(invalid)?;
        if host.is_empty() || host.contains('/') {
            return Err(invalid());
        }
        let port: u16 = port.parse().map_err(|_| invalid())?;
        if port == 0 {
            return Err(invalid());
        }

        Ok(Self::Uri {
            scheme,
            host: host.to_string(),
            port,
        })
    }

    /// Name used to scope durable state for this broker.
    #[must_use]
    pub fn store_alias(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for BrokerReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Alias(alias) => f.write_str(alias),
            Self::Uri { scheme, host, port } => write!(f, "{scheme}://{host}:{port}"),
        }
    }
}
