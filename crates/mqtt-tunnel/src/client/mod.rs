pub mod callbacks;
pub mod protocol;
pub mod queue;
pub(crate) mod shared;
pub(crate) mod state;

pub use callbacks::{
    ClientListener, ConnectFailure, DeliveryToken, NoopListener, SubscribeFailure,
    UnsubscribeFailure,
};
pub use protocol::MqttClient;
pub use queue::{MessageQueue, QueuedPacket};
pub use state::ClientState;
