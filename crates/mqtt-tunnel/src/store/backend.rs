use crate::error::Result;

/// Key/value medium underneath a [`PacketStore`](super::PacketStore).
///
/// Several stores may share one medium; each only touches keys under its own
/// `<alias>_<clientId>_` prefix.
pub trait Storage: Send + Sync {
    /// Writes `value` under `key`, replacing any previous value.
    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Reads the value under `key`.
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Deletes `key`. Deleting a missing key is not an error.
    fn remove(&self, key: &str) -> Result<()>;

    /// Lists every key currently held by the medium.
    fn keys(&self) -> Result<Vec<String>>;
}
