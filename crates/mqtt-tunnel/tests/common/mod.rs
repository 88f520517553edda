//! Shared fixtures: a recording [`MockTransport`] injected through
//! [`TransportAdapter`], a [`RecordingListener`], and helpers that render
//! server-side item updates.

#![allow(dead_code, clippy::missing_panics_doc)]

use mqtt_tunnel::packet::{
    ConnAckPacket, PubAckPacket, PubCompPacket, PubRecPacket, PubRelPacket, PublishPacket,
    SubAckPacket, UnsubAckPacket,
};
use mqtt_tunnel::{
    ClientListener, ConnectOptions, ConnectRequest, ControlPacket, DeliveryToken, EngineConfig,
    Envelope, MemoryStorage, Message, MqttClient, MqttError, PacketType, QoS, Result, SendId,
    SendOutcome, TransportAdapter,
};
use std::sync::{Arc, Mutex};

pub const BROKER: &str = "local_broker";

/// Routes engine logs to the test output; `RUST_LOG` picks the level.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[derive(Debug, Default)]
pub struct MockTransport {
    pub opened: Vec<ConnectRequest>,
    pub sent: Vec<(SendId, ControlPacket)>,
    pub shared_subscribes: Vec<(String, QoS)>,
    pub shared_unsubscribes: Vec<String>,
    pub closed: usize,
    pub reject_sends: bool,
}

impl MockTransport {
    pub fn packets(&self) -> Vec<ControlPacket> {
        self.sent.iter().map(|(_, packet)| packet.clone()).collect()
    }

    pub fn count(&self, packet_type: PacketType) -> usize {
        self.sent
            .iter()
            .filter(|(_, packet)| packet.packet_type() == packet_type)
            .count()
    }

    pub fn last(&self, packet_type: PacketType) -> Option<(SendId, ControlPacket)> {
        self.sent
            .iter()
            .rev()
            .find(|(_, packet)| packet.packet_type() == packet_type)
            .cloned()
    }

    /// Packet id of the most recent packet of `packet_type`.
    pub fn last_id(&self, packet_type: PacketType) -> u16 {
        self.last(packet_type)
            .and_then(|(_, packet)| packet.packet_id())
            .expect("no packet of that type was sent")
    }

    pub fn last_send_id(&self) -> SendId {
        self.sent.last().map(|(id, _)| *id).expect("nothing was sent")
    }
}

impl TransportAdapter for MockTransport {
    fn open(&mut self, request: &ConnectRequest) -> Result<()> {
        self.opened.push(request.clone());
        Ok(())
    }

    fn send(&mut self, id: SendId, packet: &ControlPacket) -> Result<()> {
        if self.reject_sends {
            return Err(MqttError::Transport("send rejected".to_string()));
        }
        self.sent.push((id, packet.clone()));
        Ok(())
    }

    fn subscribe_shared(&mut self, topic_filter: &str, qos: QoS) -> Result<()> {
        self.shared_subscribes.push((topic_filter.to_string(), qos));
        Ok(())
    }

    fn unsubscribe_shared(&mut self, topic_filter: &str) -> Result<()> {
        self.shared_unsubscribes.push(topic_filter.to_string());
        Ok(())
    }

    fn close(&mut self) {
        self.closed += 1;
    }
}

#[derive(Debug, Default)]
pub struct ListenerEvents {
    pub messages: Vec<Message>,
    pub deliveries: Vec<DeliveryToken>,
    pub connection_lost: Vec<String>,
    pub shared_unsubscribed: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct RecordingListener {
    events: Arc<Mutex<ListenerEvents>>,
}

impl RecordingListener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<Message> {
        self.events.lock().unwrap().messages.clone()
    }

    pub fn deliveries(&self) -> Vec<DeliveryToken> {
        self.events.lock().unwrap().deliveries.clone()
    }

    pub fn connection_lost(&self) -> Vec<String> {
        self.events.lock().unwrap().connection_lost.clone()
    }

    pub fn shared_unsubscribed(&self) -> Vec<String> {
        self.events.lock().unwrap().shared_unsubscribed.clone()
    }
}

impl ClientListener for RecordingListener {
    fn on_message_arrived(&mut self, message: &Message) {
        self.events.lock().unwrap().messages.push(message.clone());
    }

    fn on_delivery_complete(&mut self, token: &DeliveryToken) {
        self.events.lock().unwrap().deliveries.push(token.clone());
    }

    fn on_connection_lost(&mut self, reason: &str) {
        self.events
            .lock()
            .unwrap()
            .connection_lost
            .push(reason.to_string());
    }

    fn on_shared_unsubscribed(&mut self, topic_filter: &str) {
        self.events
            .lock()
            .unwrap()
            .shared_unsubscribed
            .push(topic_filter.to_string());
    }
}

/// Values handed to operation callbacks.
#[derive(Debug)]
pub struct Recorder<T> {
    values: Arc<Mutex<Vec<T>>>,
}

impl<T> Clone for Recorder<T> {
    fn clone(&self) -> Self {
        Self {
            values: Arc::clone(&self.values),
        }
    }
}

impl<T: Clone + Send + 'static> Recorder<T> {
    pub fn new() -> Self {
        Self {
            values: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn callback(&self) -> impl FnOnce(T) + Send + 'static {
        let values = Arc::clone(&self.values);
        move |value| values.lock().unwrap().push(value)
    }

    pub fn values(&self) -> Vec<T> {
        self.values.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.values.lock().unwrap().len()
    }
}

impl Recorder<()> {
    pub fn trigger(&self) -> impl FnOnce() + Send + 'static {
        let values = Arc::clone(&self.values);
        move || values.lock().unwrap().push(())
    }
}

pub fn control(packet: ControlPacket) -> String {
    packet.encode().unwrap()
}

pub fn connack(return_code: i32) -> String {
    control(ControlPacket::Connack(ConnAckPacket { return_code }))
}

pub fn suback(packet_id: u16, return_code: i32) -> String {
    control(ControlPacket::SubAck(SubAckPacket::new(packet_id, vec![return_code])))
}

pub fn unsuback(packet_id: u16) -> String {
    control(ControlPacket::UnsubAck(UnsubAckPacket::new(packet_id)))
}

pub fn puback(packet_id: u16) -> String {
    control(ControlPacket::PubAck(PubAckPacket::new(packet_id)))
}

pub fn pubrec(packet_id: u16) -> String {
    control(ControlPacket::PubRec(PubRecPacket::new(packet_id)))
}

pub fn pubrel(packet_id: u16) -> String {
    control(ControlPacket::PubRel(PubRelPacket::new(packet_id)))
}

pub fn pubcomp(packet_id: u16) -> String {
    control(ControlPacket::PubComp(PubCompPacket::new(packet_id)))
}

pub fn delivery_complete(packet_id: u16) -> String {
    Envelope::DeliveryComplete(packet_id).encode().unwrap()
}

pub fn inbound_publish(packet_id: Option<u16>, topic: &str, payload: &str, qos: QoS) -> String {
    let message = Message::new(topic, payload.to_string()).unwrap().with_qos(qos);
    control(ControlPacket::Publish(PublishPacket::new(packet_id, &message)))
}

/// Dedicated client on `storage`, with the CONNACK already handled.
pub fn connected_dedicated(
    client_id: &str,
    storage: &MemoryStorage,
) -> (MqttClient<MockTransport>, RecordingListener) {
    connected_dedicated_with(client_id, storage, ConnectOptions::new())
}

pub fn connected_dedicated_with(
    client_id: &str,
    storage: &MemoryStorage,
    options: ConnectOptions,
) -> (MqttClient<MockTransport>, RecordingListener) {
    init_tracing();
    let listener = RecordingListener::new();
    let mut client = MqttClient::with_storage(
        BROKER,
        Some(client_id),
        MockTransport::default(),
        &EngineConfig::default(),
        Arc::new(storage.clone()),
    )
    .unwrap()
    .with_listener(listener.clone());
    client.connect(options).unwrap();
    client.handle_item_update(&connack(0)).unwrap();
    (client, listener)
}

/// Shared-mode client with the shared channel already up.
pub fn connected_shared() -> (MqttClient<MockTransport>, RecordingListener) {
    init_tracing();
    let listener = RecordingListener::new();
    let mut client = MqttClient::new(BROKER, None, MockTransport::default())
        .unwrap()
        .with_listener(listener.clone());
    client.connect(ConnectOptions::new()).unwrap();
    client.handle_transport_connected();
    (client, listener)
}

/// Positional fields of a shared item update carrying a PUBLISH.
pub fn shared_publish_fields(seq: u64, topic: &str, payload: &str, qos: QoS) -> Vec<Option<String>> {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    vec![
        None,
        Some(seq.to_string()),
        Some(topic.to_string()),
        Some(STANDARD.encode(payload)),
        Some(qos.as_u8().to_string()),
        Some("0".to_string()),
        Some("0".to_string()),
    ]
}

pub fn borrowed(fields: &[Option<String>]) -> Vec<Option<&str>> {
    fields.iter().map(Option::as_deref).collect()
}

/// Reports every recorded send as delivered by the transport.
pub fn confirm_all_sends(client: &mut MqttClient<MockTransport>) {
    let ids: Vec<SendId> = client.transport().sent.iter().map(|(id, _)| *id).collect();
    for id in ids {
        client.handle_send_outcome(id, SendOutcome::Sent);
    }
}
