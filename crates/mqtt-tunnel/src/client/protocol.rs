use super::callbacks::{
    ClientListener, ConnectFailure, DeliveryToken, FailureCallback, NoopListener,
    SubscribeFailure, SuccessCallback, UnsubscribeFailure,
};
use super::queue::QueuedPacket;
use super::shared::{SharedSubscription, SharedSubscriptionRegistry};
use super::state::{ClientSession, ClientState, PendingReceived, PendingSent, SentOperation};
use crate::config::EngineConfig;
use crate::error::{MqttError, Result};
use crate::options::{ConnectOptions, SubscribeOptions, UnsubscribeOptions};
use crate::packet::{
    ConnAckPacket, ControlPacket, Envelope, PacketType, PubAckPacket, PubRecPacket, PubRelPacket,
    PublishPacket, SharedItemUpdate, SubAckOutcome, SubAckPacket, SubscribePacket,
    UnsubscribePacket,
};
use crate::qos2::{self, OutgoingPhase, QoS2Action};
use crate::store::{PacketState, PacketStore, StoreEntry, Storage};
use crate::transport::{ConnectRequest, SendId, SendOutcome, TransportAdapter};
use crate::types::{ConnectionMode, ConnectionState, Message, QoS};
use crate::validation::{validate_client_id, validate_topic_filter, BrokerReference};
use bytes::Bytes;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

const DISCONNECT_REASON: &str = "disconnected by client";

/// What a transport send was for, so its outcome can be routed.
enum PendingSend {
    /// `QoS` 0 publish, complete once sent.
    Publish(DeliveryToken),
    /// Packet whose record in the sent table waits for an acknowledgement.
    Tracked { packet_id: u16, packet_type: PacketType },
    /// Acknowledgement or release; nothing waits on it.
    Ack,
}

struct PendingConnect {
    clean_session: bool,
    on_success: Option<SuccessCallback>,
    on_failure: Option<FailureCallback<ConnectFailure>>,
}

/// MQTT client engine for one `(broker, client id)` pair.
///
/// All calls are synchronous. Wire activity goes through the [`TransportAdapter`];
/// the transport's asynchronous reports come back through the `handle_*` methods.
pub struct MqttClient<T: TransportAdapter> {
    broker: BrokerReference,
    client_id: Option<String>,
    mode: ConnectionMode,
    transport: T,
    listener: Box<dyn ClientListener>,
    session: ClientSession,
    shared: SharedSubscriptionRegistry,
    store: Option<PacketStore>,
    pending_sends: HashMap<SendId, PendingSend>,
    next_send_id: u64,
    pending_connect: Option<PendingConnect>,
}

impl<T: TransportAdapter> MqttClient<T> {
    /// Creates an engine with the default configuration.
    ///
    /// # Errors
    /// Returns `InvalidBrokerReference` or `InvalidClientId` for malformed
    /// identities, or `InvalidArgument` if the packet store cannot be bound.
    pub fn new(broker: &str, client_id: Option<&str>, transport: T) -> Result<Self> {
        Self::with_config(broker, client_id, transport, &EngineConfig::default())
    }

    /// Creates an engine on the configured storage medium. A medium that cannot
    /// be opened leaves the engine without durable storage.
    ///
    /// # Errors
    /// As [`MqttClient::new`].
    pub fn with_config(
        broker: &str,
        client_id: Option<&str>,
        transport: T,
        config: &EngineConfig,
    ) -> Result<Self> {
        let storage = config.persistence.open_storage().unwrap_or_else(|e| {
            warn!("Packet storage unavailable, continuing without persistence: {e}");
            None
        });
        Self::build(broker, client_id, transport, config, storage)
    }

    /// Creates an engine whose packet store lives on `storage`.
    ///
    /// # Errors
    /// As [`MqttClient::new`].
    pub fn with_storage(
        broker: &str,
        client_id: Option<&str>,
        transport: T,
        config: &EngineConfig,
        storage: Arc<dyn Storage>,
    ) -> Result<Self> {
        Self::build(broker, client_id, transport, config, Some(storage))
    }

    fn build(
        broker: &str,
        client_id: Option<&str>,
        transport: T,
        config: &EngineConfig,
        storage: Option<Arc<dyn Storage>>,
    ) -> Result<Self> {
        let broker = BrokerReference::parse(broker)?;
        let mode = ConnectionMode::for_client_id(client_id);
        let client_id = match mode {
            ConnectionMode::Dedicated => client_id.map(str::to_string),
            ConnectionMode::Shared => None,
        };

        if let Some(id) = &client_id {
            validate_client_id(id)?;
        }
        let store = match (&client_id, storage) {
            (Some(id), Some(storage)) => {
                Some(PacketStore::open(id, &broker.store_alias(), Some(storage))?)
            }
            _ => None,
        };

        debug!(
            broker = %broker,
            client_id = client_id.as_deref().unwrap_or(""),
            ?mode,
            persistent = store.as_ref().is_some_and(PacketStore::is_enabled),
            "created MQTT client"
        );

        Ok(Self {
            broker,
            client_id,
            mode,
            transport,
            listener: Box::new(NoopListener),
            session: ClientSession::new(),
            shared: SharedSubscriptionRegistry::new(config.shared_dedup_window),
            store,
            pending_sends: HashMap::new(),
            next_send_id: 1,
            pending_connect: None,
        })
    }

    #[must_use]
    pub fn with_listener(mut self, listener: impl ClientListener + 'static) -> Self {
        self.listener = Box::new(listener);
        self
    }

    pub fn set_listener(&mut self, listener: impl ClientListener + 'static) {
        self.listener = Box::new(listener);
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.session.state().public()
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.session.state() == ClientState::Connected
    }

    #[must_use]
    pub fn mode(&self) -> ConnectionMode {
        self.mode
    }

    #[must_use]
    pub fn client_id(&self) -> Option<&str> {
        self.client_id.as_deref()
    }

    #[must_use]
    pub fn broker(&self) -> &BrokerReference {
        &self.broker
    }

    #[must_use]
    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    #[must_use]
    pub fn sent_len(&self) -> usize {
        self.session.sent_len()
    }

    #[must_use]
    pub fn received_len(&self) -> usize {
        self.session.received_len()
    }

    #[must_use]
    pub fn queue_len(&self) -> usize {
        self.session.queue().len()
    }

    #[must_use]
    pub fn shared_subscription_count(&self) -> usize {
        self.shared.len()
    }

    /// Reference count of a shared filter, zero when it is not registered.
    #[must_use]
    pub fn shared_subscribers(&self, topic_filter: &str) -> usize {
        self.shared
            .get(topic_filter)
            .map_or(0, SharedSubscription::refcount)
    }

    /// Last `QoS` granted to a shared filter, `None` until its first SUBACK.
    #[must_use]
    pub fn shared_granted_qos(&self, topic_filter: &str) -> Option<QoS> {
        self.shared
            .get(topic_filter)
            .and_then(SharedSubscription::granted_qos)
    }

    #[must_use]
    pub fn is_store_enabled(&self) -> bool {
        self.store.as_ref().is_some_and(PacketStore::is_enabled)
    }

    /// Number of packets in this client's durable store.
    ///
    /// # Errors
    /// Returns the storage medium's error if its keys cannot be listed.
    pub fn store_size(&self) -> Result<usize> {
        self.store.as_ref().map_or(Ok(0), PacketStore::size)
    }

    #[must_use]
    pub fn store(&self) -> Option<&PacketStore> {
        self.store.as_ref()
    }

    fn require_connected(&self) -> Result<()> {
        if self.session.state() == ClientState::Connected {
            Ok(())
        } else {
            Err(MqttError::InvalidState(self.state().to_string()))
        }
    }

    /// Starts connecting. Completion is reported through the options' callbacks
    /// once the CONNACK (dedicated) or the shared channel (shared) arrives.
    ///
    /// # Errors
    /// Returns `InvalidState` unless disconnected, `InvalidArgument` for bad
    /// options, or the transport's error if the channel cannot be requested.
    pub fn connect(&mut self, options: ConnectOptions) -> Result<()> {
        if self.session.state() != ClientState::Disconnected {
            return Err(MqttError::InvalidState(self.state().to_string()));
        }
        options.validate()?;

        let request = ConnectRequest {
            broker: self.broker.clone(),
            client_id: self.client_id.clone(),
            clean_session: options.clean_session,
            username: options.username.clone(),
            password: options.password.clone(),
        };

        self.session.set_state(ClientState::Connecting);
        if let Err(e) = self.transport.open(&request) {
            self.session.set_state(ClientState::Disconnected);
            return Err(e);
        }

        self.pending_connect = Some(PendingConnect {
            clean_session: options.clean_session,
            on_success: options.on_success,
            on_failure: options.on_failure,
        });
        info!(
            broker = %self.broker,
            client_id = self.client_id.as_deref().unwrap_or(""),
            clean_session = request.clean_session,
            "connecting"
        );
        Ok(())
    }

    /// # Errors
    /// Returns `InvalidArgument` for a malformed filter, `InvalidState` unless
    /// connected, `PacketIdExhausted`, or the transport's error for shared items.
    pub fn subscribe(&mut self, topic_filter: &str, options: SubscribeOptions) -> Result<()> {
        validate_topic_filter(topic_filter)?;
        self.require_connected()?;
        let qos = options.qos;

        if self.mode == ConnectionMode::Shared {
            if self.shared.needs_request(topic_filter, qos) {
                self.transport.subscribe_shared(topic_filter, qos)?;
                debug!(topic_filter, %qos, "requested shared subscription");
            }
            let callbacks = options.into_callbacks();
            if let Some((granted, callbacks)) = self.shared.register(topic_filter, qos, callbacks) {
                trace!(topic_filter, %granted, "joined granted shared subscription");
                callbacks.succeed(granted);
            }
            return Ok(());
        }

        let packet_id = self.session.next_packet_id()?;
        let packet = ControlPacket::Subscribe(SubscribePacket::new(packet_id, topic_filter, qos));
        self.session.track_sent(
            packet_id,
            PendingSent {
                packet: packet.clone(),
                last_send: None,
                operation: SentOperation::Subscribe {
                    topic_filter: topic_filter.to_string(),
                    qos,
                    callbacks: options.into_callbacks(),
                },
            },
        );
        debug!(packet_id, topic_filter, %qos, "sending SUBSCRIBE");
        self.send_packet(&packet, PendingSend::Tracked { packet_id, packet_type: PacketType::Subscribe });
        Ok(())
    }

    /// # Errors
    /// Returns `InvalidArgument` for a malformed filter, `InvalidState` unless
    /// connected, `PacketIdExhausted`, or the transport's error for shared items.
    pub fn unsubscribe(&mut self, topic_filter: &str, options: UnsubscribeOptions) -> Result<()> {
        validate_topic_filter(topic_filter)?;
        self.require_connected()?;

        if self.mode == ConnectionMode::Shared {
            match self.shared.get(topic_filter).map(SharedSubscription::refcount) {
                None => debug!(topic_filter, "unsubscribe from unregistered shared filter"),
                Some(1) => {
                    self.transport.unsubscribe_shared(topic_filter)?;
                    self.shared.release(topic_filter);
                    debug!(topic_filter, "released shared subscription");
                    self.listener.on_shared_unsubscribed(topic_filter);
                }
                Some(_) => {
                    let remaining = self.shared.release(topic_filter).unwrap_or_default();
                    trace!(topic_filter, remaining, "dropped shared subscriber");
                }
            }
            options.succeed();
            return Ok(());
        }

        let packet_id = self.session.next_packet_id()?;
        let packet = ControlPacket::Unsubscribe(UnsubscribePacket::new(packet_id, topic_filter));
        self.session.track_sent(
            packet_id,
            PendingSent {
                packet: packet.clone(),
                last_send: None,
                operation: SentOperation::Unsubscribe {
                    topic_filter: topic_filter.to_string(),
                    options,
                },
            },
        );
        debug!(packet_id, topic_filter, "sending UNSUBSCRIBE");
        self.send_packet(
            &packet,
            PendingSend::Tracked { packet_id, packet_type: PacketType::Unsubscribe },
        );
        Ok(())
    }

    /// Publishes `message`; delivery is reported to the listener with the returned token.
    ///
    /// # Errors
    /// Returns `InvalidState` unless connected, or `PacketIdExhausted`.
    pub fn publish(&mut self, message: Message) -> Result<DeliveryToken> {
        self.require_connected()?;

        if message.qos == QoS::AtMostOnce {
            let token = DeliveryToken {
                message,
                packet_id: None,
            };
            let packet = ControlPacket::Publish(PublishPacket::new(None, &token.message));
            trace!(topic = %token.message.destination_name, "sending QoS 0 PUBLISH");
            self.send_packet(&packet, PendingSend::Publish(token.clone()));
            return Ok(token);
        }

        let packet_id = self.session.next_packet_id()?;
        let token = DeliveryToken {
            packet_id: Some(packet_id),
            message,
        };
        let packet = ControlPacket::Publish(PublishPacket::new(Some(packet_id), &token.message));

        if let Some(store) = &mut self.store {
            if let Err(e) = store.store(&packet, PacketState::Sent, false) {
                warn!(packet_id, "Failed to persist outgoing PUBLISH: {e}");
            }
        }
        self.session.track_sent(
            packet_id,
            PendingSent {
                packet: packet.clone(),
                last_send: None,
                operation: SentOperation::Publish {
                    token: token.clone(),
                    pubrec_received: false,
                },
            },
        );
        debug!(
            packet_id,
            topic = %token.message.destination_name,
            qos = %token.message.qos,
            "sending PUBLISH"
        );
        self.send_packet(&packet, PendingSend::Tracked { packet_id, packet_type: PacketType::Publish });
        Ok(token)
    }

    /// Convenience wrapper around [`MqttClient::publish`].
    ///
    /// # Errors
    /// Returns `InvalidTopicName` for a bad destination, otherwise as `publish`.
    pub fn send(
        &mut self,
        destination_name: &str,
        payload: impl Into<Bytes>,
        qos: QoS,
        retained: bool,
    ) -> Result<DeliveryToken> {
        let message = Message::new(destination_name, payload)?
            .with_qos(qos)
            .with_retained(retained);
        self.publish(message)
    }

    /// Closes the connection and drops every in-flight operation without calling
    /// its callbacks. The packet store is kept for a later session.
    ///
    /// # Errors
    /// Returns `InvalidState` when already disconnected.
    pub fn disconnect(&mut self) -> Result<()> {
        if self.session.state() == ClientState::Disconnected {
            return Err(MqttError::InvalidState(self.state().to_string()));
        }
        self.transport.close();
        self.pending_connect = None;
        self.teardown();
        info!(broker = %self.broker, "disconnected");
        self.listener.on_connection_lost(DISCONNECT_REASON);
        Ok(())
    }

    fn teardown(&mut self) {
        self.session.set_state(ClientState::Disconnected);
        let dropped = self.session.clear_in_flight();
        let waiting = self.shared.abandon_waiting();
        self.shared.reset_dedup();
        self.pending_sends.clear();
        if dropped + waiting > 0 {
            debug!(dropped, waiting, "abandoned in-flight operations");
        }
    }

    fn send_packet(&mut self, packet: &ControlPacket, pending: PendingSend) {
        let id = SendId(self.next_send_id);
        self.next_send_id += 1;
        if let PendingSend::Tracked { packet_id, .. } = &pending {
            if let Some(record) = self.session.sent_mut(*packet_id) {
                record.last_send = Some(id);
            }
        }
        self.pending_sends.insert(id, pending);
        trace!(%id, packet_type = %packet.packet_type(), "sending packet");
        if let Err(e) = self.transport.send(id, packet) {
            warn!(%id, "Transport rejected {}: {e}", packet.packet_type());
            self.handle_send_outcome(id, SendOutcome::Aborted);
        }
    }

    /// Routes the transport's report on a message send.
    pub fn handle_send_outcome(&mut self, id: SendId, outcome: SendOutcome) {
        let Some(pending) = self.pending_sends.remove(&id) else {
            trace!(%id, "outcome for unknown send");
            return;
        };

        match (pending, outcome) {
            (PendingSend::Publish(token), SendOutcome::Sent) => {
                trace!(%id, "QoS 0 PUBLISH sent");
                self.listener.on_delivery_complete(&token);
            }
            (PendingSend::Publish(token), SendOutcome::Aborted) => {
                warn!(%id, topic = %token.message.destination_name, "QoS 0 PUBLISH aborted");
            }
            (PendingSend::Tracked { packet_id, .. }, SendOutcome::Sent) => {
                trace!(%id, packet_id, "packet sent, awaiting acknowledgement");
            }
            (PendingSend::Tracked { packet_id, packet_type }, SendOutcome::Aborted) => {
                self.abort_tracked(id, packet_id, packet_type);
            }
            (PendingSend::Ack, SendOutcome::Sent) => {}
            (PendingSend::Ack, SendOutcome::Aborted) => {
                debug!(%id, "acknowledgement aborted, peer will retry");
            }
        }
    }

    fn abort_tracked(&mut self, id: SendId, packet_id: u16, packet_type: PacketType) {
        let Some(pending) = self.session.sent(packet_id) else {
            return;
        };
        if pending.packet.packet_type() != packet_type {
            return;
        }
        if pending.last_send != Some(id) {
            debug!(%id, packet_id, "abort of a superseded send ignored");
            return;
        }

        if packet_type == PacketType::Publish && self.mode == ConnectionMode::Dedicated {
            warn!(packet_id, "PUBLISH aborted, kept for replay");
            return;
        }

        let Some(pending) = self.session.remove_sent(packet_id) else {
            return;
        };
        warn!(packet_id, %packet_type, "send aborted by transport");
        match pending.operation {
            SentOperation::Subscribe { callbacks, .. } => callbacks.fail(SubscribeFailure::Aborted),
            SentOperation::Unsubscribe { options, .. } => options.fail(UnsubscribeFailure::Aborted),
            SentOperation::Publish { .. } => {}
        }
    }

    /// The shared channel is (again) available.
    pub fn handle_transport_connected(&mut self) {
        match (self.mode, self.session.state()) {
            (ConnectionMode::Shared, ClientState::Connecting | ClientState::Reconnecting) => {
                self.on_connected();
            }
            (ConnectionMode::Dedicated, _) => trace!("transport up, waiting for CONNACK"),
            (_, state) => trace!(?state, "transport up in unexpected state"),
        }
    }

    /// The transport lost its connection and is recovering on its own.
    pub fn handle_transport_reconnecting(&mut self) {
        if self.session.state() == ClientState::Connected {
            info!(broker = %self.broker, "transport reconnecting");
            self.session.set_state(ClientState::Reconnecting);
        }
    }

    /// The transport gave up; every dependent is told the connection is gone.
    pub fn handle_connection_lost(&mut self, reason: &str) {
        match self.session.state() {
            ClientState::Disconnected => trace!(reason, "connection lost while disconnected"),
            ClientState::Connecting => {
                warn!(reason, "connection failed");
                self.teardown();
                if let Some(on_failure) = self.pending_connect.take().and_then(|p| p.on_failure) {
                    on_failure(ConnectFailure::ConnectionLost(reason.to_string()));
                }
            }
            ClientState::Connected | ClientState::Reconnecting => {
                warn!(reason, "connection lost");
                self.teardown();
                self.listener.on_connection_lost(reason);
            }
        }
    }

    fn on_connected(&mut self) {
        self.session.set_state(ClientState::Connected);
        let pending = self.pending_connect.take();
        if pending.as_ref().is_some_and(|p| p.clean_session) {
            if let Some(store) = &mut self.store {
                if let Err(e) = store.clear() {
                    warn!("Failed to clear packet store for clean session: {e}");
                }
            }
        }
        info!(broker = %self.broker, "connected");
        if let Some(on_success) = pending.and_then(|p| p.on_success) {
            on_success();
        }
        match self.mode {
            ConnectionMode::Dedicated => self.replay(),
            ConnectionMode::Shared => self.reannounce_shared(),
        }
    }

    fn reannounce_shared(&mut self) {
        for (topic_filter, qos) in self.shared.requests() {
            debug!(topic_filter = %topic_filter, %qos, "re-announcing shared subscription");
            if let Err(e) = self.transport.subscribe_shared(&topic_filter, qos) {
                warn!(topic_filter = %topic_filter, "Failed to re-announce shared subscription: {e}");
            }
        }
    }

    /// Resends unacknowledged work: the store in sequence order first, then
    /// in-memory records the store does not hold, in creation order.
    fn replay(&mut self) {
        let mut entries = Vec::new();
        if let Some(store) = &self.store {
            let result = store.process_in_order(
                |entry| entries.push(entry.clone()),
                || trace!("packet store scanned for replay"),
            );
            if let Err(e) = result {
                warn!("Failed to read packet store for replay: {e}");
            }
        }

        let mut replayed = HashSet::new();
        for entry in entries {
            if let Some(key) = self.replay_entry(entry) {
                replayed.insert(key);
            }
        }

        let queued: Vec<QueuedPacket> = self
            .session
            .queue()
            .iter()
            .filter(|q| !replayed.contains(&(q.direction, q.packet_id)))
            .copied()
            .collect();
        for packet in &queued {
            self.resend_queued(packet);
        }

        let total = replayed.len() + queued.len();
        if total > 0 {
            info!(from_store = replayed.len(), from_memory = queued.len(), "replayed in-flight packets");
        }
    }

    fn replay_entry(&mut self, entry: StoreEntry) -> Option<(PacketState, u16)> {
        let StoreEntry {
            key,
            body,
            state,
            pubrec_received,
            ..
        } = entry;
        let replayable = match &body {
            ControlPacket::Publish(p) => p
                .packet_id
                .zip(Message::try_from(&p.message).ok())
                .map(|(id, message)| (p.clone(), id, message)),
            _ => None,
        };
        let Some((publish, packet_id, message)) = replayable else {
            warn!(key = %key, "discarding unreplayable store entry");
            if let (Some(store), Some(id)) = (&mut self.store, body.packet_id()) {
                if let Err(e) = store.remove(id, state) {
                    warn!(key = %key, "Failed to discard store entry: {e}");
                }
            }
            return None;
        };

        self.session.reserve_packet_id(packet_id);
        match state {
            PacketState::Sent => {
                let released = match self.session.sent_mut(packet_id) {
                    Some(PendingSent {
                        operation: SentOperation::Publish { pubrec_received: known, .. },
                        ..
                    }) => {
                        *known |= pubrec_received;
                        *known
                    }
                    Some(_) => {
                        warn!(packet_id, "store entry collides with in-flight packet");
                        return None;
                    }
                    None => {
                        self.session.track_sent(
                            packet_id,
                            PendingSent {
                                packet: body.clone(),
                                last_send: None,
                                operation: SentOperation::Publish {
                                    token: DeliveryToken {
                                        message,
                                        packet_id: Some(packet_id),
                                    },
                                    pubrec_received,
                                },
                            },
                        );
                        pubrec_received
                    }
                };
                if released {
                    debug!(packet_id, "replaying PUBREL");
                    let packet = ControlPacket::PubRel(PubRelPacket::new(packet_id));
                    self.send_packet(&packet, PendingSend::Ack);
                } else {
                    debug!(packet_id, "replaying PUBLISH");
                    let packet = ControlPacket::Publish(publish.as_duplicate());
                    self.send_packet(
                        &packet,
                        PendingSend::Tracked { packet_id, packet_type: PacketType::Publish },
                    );
                }
            }
            PacketState::Received => {
                if !self.session.has_received(packet_id) {
                    self.session
                        .track_received(packet_id, PendingReceived { packet: publish });
                }
                debug!(packet_id, "replaying PUBREC");
                let packet = ControlPacket::PubRec(PubRecPacket::new(packet_id));
                self.send_packet(&packet, PendingSend::Ack);
            }
        }
        Some((state, packet_id))
    }

    fn resend_queued(&mut self, queued: &QueuedPacket) {
        let packet_id = queued.packet_id;
        if queued.direction == PacketState::Received {
            let packet = ControlPacket::PubRec(PubRecPacket::new(packet_id));
            self.send_packet(&packet, PendingSend::Ack);
            return;
        }

        let Some(pending) = self.session.sent(packet_id) else {
            return;
        };
        let (packet, send) = match (&pending.packet, &pending.operation) {
            (ControlPacket::Publish(_), SentOperation::Publish { pubrec_received: true, .. }) => (
                ControlPacket::PubRel(PubRelPacket::new(packet_id)),
                PendingSend::Ack,
            ),
            (ControlPacket::Publish(p), _) => (
                ControlPacket::Publish(p.as_duplicate()),
                PendingSend::Tracked { packet_id, packet_type: PacketType::Publish },
            ),
            (other, _) => (
                other.clone(),
                PendingSend::Tracked { packet_id, packet_type: other.packet_type() },
            ),
        };
        debug!(packet_id, packet_type = %packet.packet_type(), "resending in-flight packet");
        self.send_packet(&packet, send);
    }

    /// Applies one JSON item update of a dedicated channel.
    ///
    /// # Errors
    /// Returns `MalformedPacket` if the update is not a valid envelope or carries
    /// an undecodable PUBLISH.
    pub fn handle_item_update(&mut self, text: &str) -> Result<()> {
        match Envelope::decode(text)? {
            Envelope::DeliveryComplete(packet_id) => {
                self.handle_delivery_complete(packet_id);
                Ok(())
            }
            Envelope::ControlPacket(packet) => self.handle_packet(packet),
        }
    }

    /// # Errors
    /// Returns `MalformedPacket` for an undecodable inbound PUBLISH.
    pub fn handle_packet(&mut self, packet: ControlPacket) -> Result<()> {
        trace!(packet_type = %packet.packet_type(), packet_id = ?packet.packet_id(), "received packet");
        match packet {
            ControlPacket::Connack(connack) => self.handle_connack(connack),
            ControlPacket::SubAck(suback) => self.handle_suback(&suback),
            ControlPacket::UnsubAck(unsuback) => self.handle_unsuback(unsuback.packet_id),
            ControlPacket::PubAck(PubAckPacket { packet_id }) => self.handle_puback(packet_id),
            ControlPacket::PubRec(pubrec) => {
                let phase = self.outgoing_phase(pubrec.packet_id);
                let actions = qos2::handle_incoming_pubrec(pubrec.packet_id, phase);
                if actions.is_empty() {
                    warn!(packet_id = pubrec.packet_id, "PUBREC for unknown packet id");
                }
                self.apply_qos2_actions(actions, None);
            }
            ControlPacket::PubComp(pubcomp) => {
                let phase = self.outgoing_phase(pubcomp.packet_id);
                let actions = qos2::handle_incoming_pubcomp(pubcomp.packet_id, phase);
                if actions.is_empty() {
                    warn!(packet_id = pubcomp.packet_id, "PUBCOMP for unknown packet id");
                }
                self.apply_qos2_actions(actions, None);
            }
            ControlPacket::Publish(publish) => return self.handle_publish(&publish),
            ControlPacket::PubRel(pubrel) => {
                let has_pending = self.session.has_received(pubrel.packet_id);
                if !has_pending {
                    debug!(packet_id = pubrel.packet_id, "PUBREL for unknown packet id");
                }
                let actions = qos2::handle_incoming_pubrel(pubrel.packet_id, has_pending);
                self.apply_qos2_actions(actions, None);
            }
            ControlPacket::Subscribe(_) | ControlPacket::Unsubscribe(_) => {
                warn!("ignoring client-only packet received from server");
            }
        }
        Ok(())
    }

    fn handle_connack(&mut self, connack: ConnAckPacket) {
        let state = self.session.state();
        if !matches!(state, ClientState::Connecting | ClientState::Reconnecting) {
            warn!(?state, "Received CONNACK in unexpected state");
            return;
        }

        let code = connack.return_code();
        if code.is_success() {
            self.on_connected();
            return;
        }

        warn!(%code, "connection refused");
        self.transport.close();
        self.teardown();
        match self.pending_connect.take() {
            Some(PendingConnect {
                on_failure: Some(on_failure),
                ..
            }) => on_failure(ConnectFailure::Refused(code)),
            Some(_) => {}
            None => self.listener.on_connection_lost(&code.to_string()),
        }
    }

    fn handle_suback(&mut self, suback: &SubAckPacket) {
        let Some(pending) = self
            .session
            .take_sent_for(suback.packet_id, PacketType::SubAck)
        else {
            warn!(packet_id = suback.packet_id, "SUBACK for unknown packet id");
            return;
        };
        if let SentOperation::Subscribe {
            topic_filter,
            qos,
            callbacks,
        } = pending.operation
        {
            let outcome = suback.outcome();
            debug!(
                packet_id = suback.packet_id,
                topic_filter = %topic_filter,
                requested = %qos,
                ?outcome,
                "SUBACK"
            );
            callbacks.complete(outcome);
        }
    }

    fn handle_unsuback(&mut self, packet_id: u16) {
        let Some(pending) = self.session.take_sent_for(packet_id, PacketType::UnsubAck) else {
            warn!(packet_id, "UNSUBACK for unknown packet id");
            return;
        };
        if let SentOperation::Unsubscribe {
            topic_filter,
            options,
        } = pending.operation
        {
            debug!(packet_id, topic_filter = %topic_filter, "UNSUBACK");
            options.succeed();
        }
    }

    fn handle_puback(&mut self, packet_id: u16) {
        let qos = self.session.sent(packet_id).and_then(PendingSent::publish_qos);
        if qos != Some(QoS::AtLeastOnce) {
            warn!(packet_id, "PUBACK for unknown packet id");
            return;
        }
        if let Some(token) = self.remove_outgoing(packet_id) {
            debug!(packet_id, "PUBACK");
            self.listener.on_delivery_complete(&token);
        }
    }

    /// The server finished a publish handshake on the client's behalf.
    fn handle_delivery_complete(&mut self, packet_id: u16) {
        if self
            .session
            .sent(packet_id)
            .and_then(PendingSent::publish_qos)
            .is_none()
        {
            warn!(packet_id, "DELIVERY_COMPLETE for unknown packet id");
            return;
        }
        if let Some(token) = self.remove_outgoing(packet_id) {
            debug!(packet_id, "delivery complete");
            self.listener.on_delivery_complete(&token);
        }
    }

    fn outgoing_phase(&self, packet_id: u16) -> OutgoingPhase {
        self.session
            .sent(packet_id)
            .map_or(OutgoingPhase::Unknown, PendingSent::phase)
    }

    fn remove_outgoing(&mut self, packet_id: u16) -> Option<DeliveryToken> {
        if let Some(store) = &mut self.store {
            if let Err(e) = store.remove(packet_id, PacketState::Sent) {
                warn!(packet_id, "Failed to release stored PUBLISH: {e}");
            }
        }
        match self.session.remove_sent(packet_id)?.operation {
            SentOperation::Publish { token, .. } => Some(token),
            _ => None,
        }
    }

    fn handle_publish(&mut self, publish: &PublishPacket) -> Result<()> {
        if self.session.state() == ClientState::Disconnected {
            debug!("ignoring PUBLISH while disconnected");
            return Ok(());
        }
        let message = Message::try_from(&publish.message)?;

        match (publish.qos(), publish.packet_id) {
            (QoS::AtMostOnce, _) => self.listener.on_message_arrived(&message),
            (_, None) => {
                return Err(MqttError::MalformedPacket(
                    "PUBLISH with QoS > 0 must carry a packet identifier".to_string(),
                ));
            }
            (QoS::AtLeastOnce, Some(packet_id)) => {
                self.listener.on_message_arrived(&message);
                let packet = ControlPacket::PubAck(PubAckPacket::new(packet_id));
                self.send_packet(&packet, PendingSend::Ack);
            }
            (QoS::ExactlyOnce, Some(packet_id)) => {
                let tracked = self.session.has_received(packet_id);
                if tracked {
                    debug!(packet_id, "duplicate QoS 2 PUBLISH, not delivered again");
                }
                let actions = qos2::handle_incoming_publish_qos2(packet_id, tracked);
                self.apply_qos2_actions(actions, Some((publish, &message)));
            }
        }
        Ok(())
    }

    fn apply_qos2_actions(
        &mut self,
        actions: Vec<QoS2Action>,
        inbound: Option<(&PublishPacket, &Message)>,
    ) {
        let mut completed = None;
        for action in actions {
            match action {
                QoS2Action::MarkPubRecReceived { packet_id } => {
                    if let Some(PendingSent {
                        operation: SentOperation::Publish { pubrec_received, .. },
                        ..
                    }) = self.session.sent_mut(packet_id)
                    {
                        *pubrec_received = true;
                    }
                    if let Some(store) = &mut self.store {
                        if let Err(e) = store.mark_pubrec_received(packet_id) {
                            warn!(packet_id, "Failed to persist PUBREC: {e}");
                        }
                    }
                    debug!(packet_id, "PUBREC");
                }
                QoS2Action::RemoveOutgoing { packet_id } => {
                    completed = self.remove_outgoing(packet_id);
                }
                QoS2Action::CompleteFlow { packet_id } => {
                    if let Some(token) = completed.take() {
                        debug!(packet_id, "PUBCOMP");
                        self.listener.on_delivery_complete(&token);
                    }
                }
                QoS2Action::TrackIncoming { packet_id } => {
                    if let Some((publish, _)) = inbound {
                        self.session.track_received(
                            packet_id,
                            PendingReceived {
                                packet: publish.clone(),
                            },
                        );
                        if let Some(store) = &mut self.store {
                            let body = ControlPacket::Publish(publish.clone());
                            if let Err(e) = store.store(&body, PacketState::Received, false) {
                                warn!(packet_id, "Failed to persist incoming PUBLISH: {e}");
                            }
                        }
                    }
                }
                QoS2Action::DeliverMessage { .. } => {
                    if let Some((_, message)) = inbound {
                        self.listener.on_message_arrived(message);
                    }
                }
                QoS2Action::RemoveIncoming { packet_id } => {
                    if let Some(released) = self.session.remove_received(packet_id) {
                        trace!(packet_id, topic = %released.packet.message.destination_name, "released inbound PUBLISH");
                    }
                    if let Some(store) = &mut self.store {
                        if let Err(e) = store.remove(packet_id, PacketState::Received) {
                            warn!(packet_id, "Failed to release stored PUBLISH: {e}");
                        }
                    }
                }
                QoS2Action::SendPubRec { .. }
                | QoS2Action::SendPubRel { .. }
                | QoS2Action::SendPubComp { .. } => {
                    if let Some(packet) = action.to_packet() {
                        self.send_packet(&packet, PendingSend::Ack);
                    }
                }
            }
        }
    }

    /// Applies one positional item update of the shared item for `topic_filter`.
    ///
    /// # Errors
    /// Returns `MalformedPacket` if the fields cannot be decoded.
    pub fn handle_shared_item_update(
        &mut self,
        topic_filter: &str,
        fields: &[Option<&str>],
    ) -> Result<()> {
        let update = SharedItemUpdate::from_fields(fields)?;

        if let Some(code) = update.suback_return_code {
            let outcome = SubAckOutcome::from_return_code(code);
            let resolution = self.shared.handle_suback(topic_filter, outcome);
            debug!(topic_filter, ?outcome, waiting = resolution.waiting.len(), "shared SUBACK");
            for callbacks in resolution.waiting {
                callbacks.complete(outcome);
            }
            if let Some(was_granted) = resolution.dropped {
                if let Err(e) = self.transport.unsubscribe_shared(topic_filter) {
                    warn!(topic_filter, "Failed to release denied shared item: {e}");
                }
                if was_granted {
                    self.listener.on_shared_unsubscribed(topic_filter);
                }
            }
        }

        if let Some(publish) = update.publish {
            if self.session.state() == ClientState::Disconnected {
                trace!(topic_filter, "ignoring shared PUBLISH while disconnected");
            } else if !self.shared.first_sighting(publish.seq) {
                trace!(seq = publish.seq, topic_filter, "overlapping delivery dropped");
            } else if let Some(granted) = self.shared.max_granted_for(&publish.message.destination_name) {
                let qos = publish.message.qos.clamp_to(granted);
                let message = publish.message.with_qos(qos);
                self.listener.on_message_arrived(&message);
            } else {
                debug!(seq = publish.seq, topic_filter, "shared PUBLISH without matching subscription");
            }
        }
        Ok(())
    }
}
