//! MQTT 3.1.1 client engine for pub/sub streaming transports.
//!
//! The transport only moves opaque item updates and message sends. This crate
//! layers the MQTT handshakes on top: packet identifier bookkeeping, `QoS` 1 and
//! 2 flows, reference-counted subscriptions on shared connections, and a
//! durable [`PacketStore`] that replays unacknowledged work after a reconnect.
//!
//! ```no_run
//! use mqtt_tunnel::{ConnectOptions, MqttClient, QoS, SubscribeOptions, TransportAdapter};
//!
//! fn run<T: TransportAdapter>(transport: T) -> mqtt_tunnel::Result<()> {
//!     let mut client = MqttClient::new("local_broker", Some("sensor-7"), transport)?;
//!     client.connect(ConnectOptions::new().with_clean_session(false))?;
//!     // ...feed transport events until the CONNACK has been handled...
//!     client.subscribe("sensors/+/temp", SubscribeOptions::new(QoS::AtLeastOnce))?;
//!     client.send("sensors/7/temp", "21.5", QoS::ExactlyOnce, false)?;
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod options;
pub mod packet;
pub mod packet_id;
pub mod qos2;
pub mod store;
pub mod transport;
pub mod types;
pub mod validation;

pub use client::{
    ClientListener, ClientState, ConnectFailure, DeliveryToken, MqttClient, NoopListener,
    SubscribeFailure, UnsubscribeFailure,
};
pub use config::{EngineConfig, PersistenceConfig, StorageKind};
pub use error::{MqttError, Result};
pub use options::{ConnectOptions, SubscribeOptions, UnsubscribeOptions};
pub use packet::{ConnectReturnCode, ControlPacket, Envelope, PacketType};
pub use store::{FileStorage, MemoryStorage, PacketState, PacketStore, Storage, StoreEntry};
pub use transport::{ConnectRequest, SendId, SendOutcome, TransportAdapter};
pub use types::{ConnectionMode, ConnectionState, Message, QoS};
pub use validation::{
    is_valid_topic_filter, is_valid_topic_name, topic_matches_filter, validate_topic_filter,
    validate_topic_name, BrokerReference,
};
