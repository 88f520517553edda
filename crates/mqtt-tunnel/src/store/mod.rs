//! Durable ledger of QoS-bearing packets still waiting for their final acknowledgement.
//!
//! Entries are keyed `<brokerAlias>_<clientId>_<state>_<packetId>` and carry a
//! sequence number that is strictly increasing for the lifetime of the store,
//! so pending work can be replayed in the order it was originally sent.

pub mod backend;
pub mod file;
pub mod memory;

pub use backend::Storage;
pub use file::FileStorage;
pub use memory::MemoryStorage;

use crate::error::{MqttError, Result};
use crate::packet::ControlPacket;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

const PROBE_SUFFIX: &str = "probe";
const PROBE_VALUE: &str = "mqtt-tunnel-probe";

/// Direction of a stored packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PacketState {
    /// Outbound, sent by this client.
    #[serde(rename = "S")]
    Sent,
    /// Inbound, received by this client.
    #[serde(rename = "R")]
    Received,
}

impl PacketState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sent => "S",
            Self::Received => "R",
        }
    }

    /// # Errors
    /// Returns `InvalidArgument` for anything other than `"S"` or `"R"`.
    pub fn parse(state: &str) -> Result<Self> {
        match state {
            "S" => Ok(Self::Sent),
            "R" => Ok(Self::Received),
            other => Err(MqttError::invalid_argument("state", other)),
        }
    }
}

impl fmt::Display for PacketState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreEntry {
    #[serde(skip)]
    pub key: String,
    pub body: ControlPacket,
    pub state: PacketState,
    #[serde(default)]
    pub pubrec_received: bool,
    pub seq: u64,
}

impl StoreEntry {
    #[must_use]
    pub fn packet_id(&self) -> Option<u16> {
        self.body.packet_id()
    }
}

pub struct PacketStore {
    client_id: String,
    broker_alias: String,
    prefix: String,
    storage: Option<Arc<dyn Storage>>,
    next_seq: u64,
}

impl fmt::Debug for PacketStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PacketStore")
            .field("client_id", &self.client_id)
            .field("broker_alias", &self.broker_alias)
            .field("enabled", &self.is_enabled())
            .field("next_seq", &self.next_seq)
            .finish_non_exhaustive()
    }
}

impl PacketStore {
    /// Binds a store to `(client_id, broker_alias)` on `storage`, or on the
    /// process-wide [`MemoryStorage`] when none is given.
    ///
    /// A medium that fails the write/read/list/remove probe leaves the store
    /// disabled rather than failing the call.
    ///
    /// # Errors
    /// Returns `InvalidArgument` if `client_id` or `broker_alias` is empty.
    pub fn open(
        client_id: &str,
        broker_alias: &str,
        storage: Option<Arc<dyn Storage>>,
    ) -> Result<Self> {
        if client_id.is_empty() {
            return Err(MqttError::invalid_argument("clientId", client_id));
        }
        if broker_alias.is_empty() {
            return Err(MqttError::invalid_argument("brokerAlias", broker_alias));
        }

        let storage = storage.unwrap_or_else(|| Arc::new(MemoryStorage::global()));
        let prefix = format!("{broker_alias}_{client_id}_");

        let mut store = Self {
            client_id: client_id.to_string(),
            broker_alias: broker_alias.to_string(),
            prefix,
            storage: None,
            next_seq: 1,
        };

        if let Err(e) = store.probe(storage.as_ref()) {
            warn!(
                client_id,
                broker_alias, "packet store disabled, storage failed probe: {e}"
            );
            return Ok(store);
        }
        store.storage = Some(storage);

        match store.entries_in_order() {
            Ok(entries) => {
                if let Some(last) = entries.last() {
                    store.next_seq = last.seq + 1;
                }
                debug!(
                    client_id,
                    broker_alias,
                    pending = entries.len(),
                    "packet store opened"
                );
            }
            Err(e) => {
                warn!(client_id, broker_alias, "packet store disabled, unreadable entries: {e}");
                store.storage = None;
            }
        }

        Ok(store)
    }

    fn probe(&self, storage: &dyn Storage) -> Result<()> {
        let key = format!("{}{PROBE_SUFFIX}", self.prefix);
        let mismatch = |step: &str| MqttError::Storage(format!("probe {step} mismatch"));

        storage.set(&key, PROBE_VALUE)?;
        if storage.get(&key)?.as_deref() != Some(PROBE_VALUE) {
            return Err(mismatch("read"));
        }
        if !storage.keys()?.iter().any(|k| *k == key) {
            return Err(mismatch("keys"));
        }
        storage.remove(&key)?;
        if storage.get(&key)?.is_some() {
            return Err(mismatch("remove"));
        }
        Ok(())
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.storage.is_some()
    }

    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    #[must_use]
    pub fn broker_alias(&self) -> &str {
        &self.broker_alias
    }

    #[must_use]
    pub fn key_for(&self, packet_id: u16, state: PacketState) -> String {
        format!("{}{}_{}", self.prefix, state, packet_id)
    }

    /// Persists `body` under the next sequence number and returns its key.
    ///
    /// # Errors
    /// Returns `InvalidArgument` if the packet carries no packet identifier, or
    /// the medium's error if the write fails.
    pub fn store(
        &mut self,
        body: &ControlPacket,
        state: PacketState,
        pubrec_received: bool,
    ) -> Result<String> {
        let packet_id = body
            .packet_id()
            .ok_or_else(|| MqttError::invalid_argument("packetBody", body.packet_type()))?;
        let key = self.key_for(packet_id, state);
        let seq = self.next_seq;
        self.next_seq += 1;

        let Some(storage) = &self.storage else {
            return Ok(key);
        };

        let entry = StoreEntry {
            key: key.clone(),
            body: body.clone(),
            state,
            pubrec_received,
            seq,
        };
        storage.set(&key, &serde_json::to_string(&entry)?)?;
        debug!(key = %key, seq, "stored packet");
        Ok(key)
    }

    /// # Errors
    /// Returns the medium's error, or `Serialization` for a corrupt entry.
    pub fn retrieve(&self, key: &str) -> Result<Option<StoreEntry>> {
        let Some(storage) = &self.storage else {
            return Ok(None);
        };
        let Some(raw) = storage.get(key)? else {
            return Ok(None);
        };
        let mut entry: StoreEntry = serde_json::from_str(&raw)?;
        entry.key = key.to_string();
        Ok(Some(entry))
    }

    /// # Errors
    /// Returns the medium's error, or `Serialization` for a corrupt entry.
    pub fn get_by_packet_id_and_state(
        &self,
        packet_id: u16,
        state: PacketState,
    ) -> Result<Option<StoreEntry>> {
        self.retrieve(&self.key_for(packet_id, state))
    }

    /// Flags the outbound entry for `packet_id` as acknowledged by PUBREC,
    /// keeping its sequence number. Returns whether an entry was updated.
    ///
    /// # Errors
    /// Returns the medium's error if the entry cannot be read or rewritten.
    pub fn mark_pubrec_received(&mut self, packet_id: u16) -> Result<bool> {
        let Some(mut entry) = self.get_by_packet_id_and_state(packet_id, PacketState::Sent)? else {
            return Ok(false);
        };
        let Some(storage) = &self.storage else {
            return Ok(false);
        };
        entry.pubrec_received = true;
        storage.set(&entry.key, &serde_json::to_string(&entry)?)?;
        debug!(key = %entry.key, "marked PUBREC received");
        Ok(true)
    }

    /// # Errors
    /// Returns the medium's error if the delete fails.
    pub fn remove(&mut self, packet_id: u16, state: PacketState) -> Result<()> {
        if let Some(storage) = &self.storage {
            let key = self.key_for(packet_id, state);
            storage.remove(&key)?;
            debug!(key = %key, "removed packet");
        }
        Ok(())
    }

    /// # Errors
    /// Returns the medium's error if its keys cannot be listed.
    pub fn size(&self) -> Result<usize> {
        Ok(self.own_keys()?.len())
    }

    /// Removes every entry of this binding; other bindings on the same medium are untouched.
    ///
    /// # Errors
    /// Returns the medium's error if listing or deleting fails.
    pub fn clear(&mut self) -> Result<()> {
        if let Some(storage) = &self.storage {
            let keys = self.own_keys()?;
            for key in &keys {
                storage.remove(key)?;
            }
            debug!(
                client_id = %self.client_id,
                broker_alias = %self.broker_alias,
                removed = keys.len(),
                "cleared packet store"
            );
        }
        Ok(())
    }

    /// Every entry of this binding, ascending by sequence number. Entries that
    /// no longer decode are dropped from the medium.
    ///
    /// # Errors
    /// Returns the medium's error.
    pub fn entries_in_order(&self) -> Result<Vec<StoreEntry>> {
        let mut entries = Vec::new();
        for key in self.own_keys()? {
            match self.retrieve(&key) {
                Ok(Some(entry)) => entries.push(entry),
                Ok(None) => {}
                Err(MqttError::Serialization(e)) => {
                    warn!(key = %key, "discarding corrupt store entry: {e}");
                    if let Some(storage) = &self.storage {
                        if let Err(e) = storage.remove(&key) {
                            warn!(key = %key, "Failed to discard corrupt store entry: {e}");
                        }
                    }
                }
                Err(e) => return Err(e),
            }
        }
        entries.sort_by_key(|entry| entry.seq);
        Ok(entries)
    }

    /// Calls `visit` for each entry in ascending sequence order, then `post` once.
    /// `post` also runs when the store is empty or disabled.
    ///
    /// # Errors
    /// Returns the medium's error before anything is visited.
    pub fn process_in_order<F, P>(&self, mut visit: F, post: P) -> Result<()>
    where
        F: FnMut(&StoreEntry),
        P: FnOnce(),
    {
        for entry in &self.entries_in_order()? {
            visit(entry);
        }
        post();
        Ok(())
    }

    fn own_keys(&self) -> Result<Vec<String>> {
        let Some(storage) = &self.storage else {
            return Ok(Vec::new());
        };
        Ok(storage
            .keys()?
            .into_iter()
            .filter(|key| self.is_own_entry_key(key))
            .collect())
    }

    fn is_own_entry_key(&self, key: &str) -> bool {
        let Some(rest) = key.strip_prefix(&self.prefix) else {
            return false;
        };
        let Some((state, packet_id)) = rest.split_once('_') else {
            return false;
        };
        PacketState::parse(state).is_ok() && packet_id.parse::<u16>().is_ok()
    }
}
