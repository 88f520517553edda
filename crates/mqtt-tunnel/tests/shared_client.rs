mod common;

use common::{
    borrowed, confirm_all_sends, connected_shared, delivery_complete, puback,
    shared_publish_fields, MockTransport, Recorder, BROKER,
};
use mqtt_tunnel::{
    ConnectOptions, ConnectionMode, ConnectionState, MqttClient, PacketType, QoS, SendOutcome,
    SubscribeFailure, SubscribeOptions, UnsubscribeOptions,
};

fn suback_fields(return_code: i32) -> Vec<Option<String>> {
    vec![Some(return_code.to_string())]
}

fn grant(client: &mut MqttClient<MockTransport>, topic_filter: &str, return_code: i32) {
    client
        .handle_shared_item_update(topic_filter, &borrowed(&suback_fields(return_code)))
        .unwrap();
}

fn deliver(
    client: &mut MqttClient<MockTransport>,
    topic_filter: &str,
    seq: u64,
    topic: &str,
    qos: QoS,
) {
    let fields = shared_publish_fields(seq, topic, "payload", qos);
    client
        .handle_shared_item_update(topic_filter, &borrowed(&fields))
        .unwrap();
}

#[test]
fn test_connect_without_client_id_uses_shared_channel() {
    let connected = Recorder::<()>::new();
    let mut client = MqttClient::new(BROKER, None, MockTransport::default()).unwrap();
    assert_eq!(client.mode(), ConnectionMode::Shared);
    assert!(client.store().is_none());

    client
        .connect(ConnectOptions::new().on_success(connected.trigger()))
        .unwrap();
    assert_eq!(client.transport().opened[0].client_id, None);
    assert_eq!(client.state(), ConnectionState::Connecting);

    client.handle_transport_connected();
    assert_eq!(client.state(), ConnectionState::Connected);
    assert_eq!(connected.len(), 1);

    let empty_id = MqttClient::new(BROKER, Some(""), MockTransport::default()).unwrap();
    assert_eq!(empty_id.mode(), ConnectionMode::Shared);
}

#[test]
fn test_subscribers_share_one_item() {
    let (mut client, listener) = connected_shared();
    let granted = Recorder::new();

    for _ in 0..3 {
        client
            .subscribe("A/B", SubscribeOptions::new(QoS::AtLeastOnce).on_success(granted.callback()))
            .unwrap();
    }
    assert_eq!(
        client.transport().shared_subscribes,
        vec![("A/B".to_string(), QoS::AtLeastOnce)]
    );
    assert!(client.transport().sent.is_empty());
    assert_eq!(client.shared_subscribers("A/B"), 3);
    assert!(granted.values().is_empty());

    grant(&mut client, "A/B", 1);
    assert_eq!(granted.values(), vec![QoS::AtLeastOnce; 3]);
    assert_eq!(client.shared_granted_qos("A/B"), Some(QoS::AtLeastOnce));

    // Joining a granted item completes at once.
    client
        .subscribe("A/B", SubscribeOptions::new(QoS::AtLeastOnce).on_success(granted.callback()))
        .unwrap();
    assert_eq!(granted.len(), 4);
    assert_eq!(client.transport().shared_subscribes.len(), 1);

    let unsubscribed = Recorder::<()>::new();
    for remaining in (1..4).rev() {
        client
            .unsubscribe("A/B", UnsubscribeOptions::new().on_success(unsubscribed.trigger()))
            .unwrap();
        assert_eq!(client.shared_subscribers("A/B"), remaining);
        assert!(client.transport().shared_unsubscribes.is_empty());
    }
    assert!(listener.shared_unsubscribed().is_empty());

    client
        .unsubscribe("A/B", UnsubscribeOptions::new().on_success(unsubscribed.trigger()))
        .unwrap();
    assert_eq!(client.transport().shared_unsubscribes, vec!["A/B".to_string()]);
    assert_eq!(listener.shared_unsubscribed(), vec!["A/B".to_string()]);
    assert_eq!(unsubscribed.len(), 4);
    assert_eq!(client.shared_subscription_count(), 0);
}

#[test]
fn test_unsubscribe_unknown_filter_succeeds_quietly() {
    let (mut client, listener) = connected_shared();
    let unsubscribed = Recorder::<()>::new();
    client
        .unsubscribe("nothing/here", UnsubscribeOptions::new().on_success(unsubscribed.trigger()))
        .unwrap();
    assert_eq!(unsubscribed.len(), 1);
    assert!(client.transport().shared_unsubscribes.is_empty());
    assert!(listener.shared_unsubscribed().is_empty());
}

#[test]
fn test_resubscribe_takes_new_grant() {
    let (mut client, _listener) = connected_shared();
    let granted = Recorder::new();

    client
        .subscribe("A/B", SubscribeOptions::new(QoS::AtMostOnce).on_success(granted.callback()))
        .unwrap();
    grant(&mut client, "A/B", 0);
    assert_eq!(granted.values(), vec![QoS::AtMostOnce]);

    client
        .subscribe("A/B", SubscribeOptions::new(QoS::ExactlyOnce).on_success(granted.callback()))
        .unwrap();
    assert_eq!(
        client.transport().shared_subscribes,
        vec![
            ("A/B".to_string(), QoS::AtMostOnce),
            ("A/B".to_string(), QoS::ExactlyOnce)
        ]
    );
    assert_eq!(granted.len(), 1);

    grant(&mut client, "A/B", 2);
    assert_eq!(granted.values(), vec![QoS::AtMostOnce, QoS::ExactlyOnce]);
    assert_eq!(client.shared_granted_qos("A/B"), Some(QoS::ExactlyOnce));
    assert_eq!(client.shared_subscribers("A/B"), 2);
}

#[test]
fn test_overlapping_filters_deliver_once() {
    let (mut client, listener) = connected_shared();
    client
        .subscribe("A/B", SubscribeOptions::new(QoS::AtMostOnce))
        .unwrap();
    client
        .subscribe("A/#", SubscribeOptions::new(QoS::ExactlyOnce))
        .unwrap();
    grant(&mut client, "A/B", 0);
    grant(&mut client, "A/#", 2);

    deliver(&mut client, "A/B", 10, "A/B", QoS::ExactlyOnce);
    deliver(&mut client, "A/#", 10, "A/B", QoS::ExactlyOnce);
    deliver(&mut client, "A/#", 11, "A/C", QoS::AtLeastOnce);

    let messages = listener.messages();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].destination_name, "A/B");
    assert_eq!(messages[0].qos, QoS::ExactlyOnce);
    assert_eq!(&messages[0].payload[..], b"payload");
    assert_eq!(messages[1].destination_name, "A/C");
    assert_eq!(messages[1].qos, QoS::AtLeastOnce);
}

#[test]
fn test_delivered_qos_is_capped_by_grant() {
    let (mut client, listener) = connected_shared();
    client
        .subscribe("C", SubscribeOptions::new(QoS::ExactlyOnce))
        .unwrap();
    grant(&mut client, "C", 1);

    deliver(&mut client, "C", 1, "C", QoS::ExactlyOnce);
    deliver(&mut client, "C", 2, "C", QoS::AtMostOnce);
    let qos: Vec<QoS> = listener.messages().iter().map(|m| m.qos).collect();
    assert_eq!(qos, vec![QoS::AtLeastOnce, QoS::AtMostOnce]);
}

#[test]
fn test_publish_without_matching_subscription_is_dropped() {
    let (mut client, listener) = connected_shared();
    deliver(&mut client, "X", 1, "X", QoS::AtMostOnce);
    assert!(listener.messages().is_empty());
}

#[test]
fn test_denied_subscription_is_released() {
    let (mut client, _listener) = connected_shared();
    let failures = Recorder::new();
    let auth_failures = Recorder::new();

    client
        .subscribe(
            "secret/#",
            SubscribeOptions::new(QoS::AtMostOnce)
                .on_failure(failures.callback())
                .on_authorization_failure(auth_failures.callback()),
        )
        .unwrap();
    grant(&mut client, "secret/#", 0x87);

    assert!(failures.values().is_empty());
    assert_eq!(
        auth_failures.values(),
        vec![SubscribeFailure::NotAuthorized { return_code: 0x87 }]
    );
    assert_eq!(client.shared_subscription_count(), 0);
    assert_eq!(client.transport().shared_unsubscribes, vec!["secret/#".to_string()]);

    client
        .subscribe("other", SubscribeOptions::new(QoS::AtMostOnce).on_failure(failures.callback()))
        .unwrap();
    grant(&mut client, "other", 0x80);
    assert_eq!(failures.values(), vec![SubscribeFailure::Refused { return_code: 0x80 }]);
}

#[test]
fn test_malformed_shared_update() {
    let (mut client, listener) = connected_shared();
    let fields = [None, Some("not-a-number"), Some("A"), Some(""), Some("0")];
    assert!(client.handle_shared_item_update("A", &fields).is_err());
    assert!(listener.messages().is_empty());
}

#[test]
fn test_shared_publish_completes_on_delivery_report() {
    let (mut client, listener) = connected_shared();
    let token = client.send("A/B", "x", QoS::ExactlyOnce, false).unwrap();
    let packet_id = token.packet_id.unwrap();
    assert_eq!(client.transport().last_id(PacketType::Publish), packet_id);
    assert_eq!(client.sent_len(), 1);
    assert_eq!(client.store_size().unwrap(), 0);

    client.handle_item_update(&delivery_complete(packet_id)).unwrap();
    assert_eq!(client.sent_len(), 0);
    assert_eq!(listener.deliveries(), vec![token]);

    let token = client.send("A/B", "y", QoS::AtLeastOnce, false).unwrap();
    client.handle_item_update(&puback(token.packet_id.unwrap())).unwrap();
    assert_eq!(listener.deliveries().len(), 2);

    client.send("A/B", "z", QoS::AtMostOnce, false).unwrap();
    confirm_all_sends(&mut client);
    assert_eq!(listener.deliveries().len(), 3);
}

#[test]
fn test_aborted_shared_publish_is_dropped() {
    let (mut client, listener) = connected_shared();
    client.send("A/B", "x", QoS::AtLeastOnce, false).unwrap();
    let send_id = client.transport().last_send_id();
    client.handle_send_outcome(send_id, SendOutcome::Aborted);
    assert_eq!(client.sent_len(), 0);
    assert!(listener.deliveries().is_empty());
}

#[test]
fn test_registrations_survive_reconnect() {
    let (mut client, listener) = connected_shared();
    let granted = Recorder::new();
    client
        .subscribe("A/B", SubscribeOptions::new(QoS::AtLeastOnce))
        .unwrap();
    grant(&mut client, "A/B", 1);
    client
        .subscribe("C", SubscribeOptions::new(QoS::AtMostOnce).on_success(granted.callback()))
        .unwrap();

    client.handle_connection_lost("network down");
    assert_eq!(client.state(), ConnectionState::Disconnected);
    assert_eq!(listener.connection_lost(), vec!["network down".to_string()]);

    // The dropped waiter is not called when the item comes back.
    client.connect(ConnectOptions::new()).unwrap();
    client.handle_transport_connected();
    let mut reannounced = client.transport().shared_subscribes[2..].to_vec();
    reannounced.sort();
    assert_eq!(
        reannounced,
        vec![("A/B".to_string(), QoS::AtLeastOnce), ("C".to_string(), QoS::AtMostOnce)]
    );
    grant(&mut client, "C", 0);
    assert!(granted.values().is_empty());
    assert_eq!(client.shared_subscribers("A/B"), 1);
}

#[test]
fn test_transport_reconnect_reannounces() {
    let (mut client, _listener) = connected_shared();
    client
        .subscribe("A/B", SubscribeOptions::new(QoS::AtLeastOnce))
        .unwrap();

    client.handle_transport_reconnecting();
    assert_eq!(client.state(), ConnectionState::Connecting);
    assert!(client
        .subscribe("C", SubscribeOptions::new(QoS::AtMostOnce))
        .is_err());

    client.handle_transport_connected();
    assert_eq!(client.state(), ConnectionState::Connected);
    assert_eq!(client.transport().shared_subscribes.len(), 2);
}

#[test]
fn test_denied_upgrade_keeps_granted_subscribers() {
    let (mut client, listener) = connected_shared();
    let granted = Recorder::new();
    let failures = Recorder::new();

    for _ in 0..2 {
        client
            .subscribe("A/B", SubscribeOptions::new(QoS::AtLeastOnce).on_success(granted.callback()))
            .unwrap();
    }
    grant(&mut client, "A/B", 1);
    assert_eq!(granted.len(), 2);

    client
        .subscribe("A/B", SubscribeOptions::new(QoS::ExactlyOnce).on_failure(failures.callback()))
        .unwrap();
    grant(&mut client, "A/B", 0x80);

    assert_eq!(failures.values(), vec![SubscribeFailure::Refused { return_code: 0x80 }]);
    assert_eq!(client.shared_subscribers("A/B"), 2);
    assert_eq!(client.shared_granted_qos("A/B"), Some(QoS::AtLeastOnce));
    assert!(client.transport().shared_unsubscribes.is_empty());
    assert!(listener.shared_unsubscribed().is_empty());

    deliver(&mut client, "A/B", 1, "A/B", QoS::ExactlyOnce);
    assert_eq!(listener.messages()[0].qos, QoS::AtLeastOnce);

    // Rejoining at the granted QoS needs no new request.
    client
        .subscribe("A/B", SubscribeOptions::new(QoS::AtLeastOnce).on_success(granted.callback()))
        .unwrap();
    assert_eq!(granted.len(), 3);
    assert_eq!(client.transport().shared_subscribes.len(), 2);
}

#[test]
fn test_denial_after_last_grant_left_releases_item() {
    let (mut client, listener) = connected_shared();
    client
        .subscribe("A/B", SubscribeOptions::new(QoS::AtMostOnce))
        .unwrap();
    grant(&mut client, "A/B", 0);
    client
        .subscribe("A/B", SubscribeOptions::new(QoS::ExactlyOnce))
        .unwrap();
    assert_eq!(client.shared_subscribers("A/B"), 2);

    client
        .unsubscribe("A/B", UnsubscribeOptions::new())
        .unwrap();
    grant(&mut client, "A/B", 0x80);

    assert_eq!(client.shared_subscription_count(), 0);
    assert_eq!(client.transport().shared_unsubscribes, vec!["A/B".to_string()]);
    assert_eq!(listener.shared_unsubscribed(), vec!["A/B".to_string()]);
}

#[test]
fn test_sequence_numbers_restart_with_new_session() {
    let (mut client, listener) = connected_shared();
    client
        .subscribe("A/B", SubscribeOptions::new(QoS::AtMostOnce))
        .unwrap();
    grant(&mut client, "A/B", 0);
    deliver(&mut client, "A/B", 1, "A/B", QoS::AtMostOnce);

    client.disconnect().unwrap();
    client.connect(ConnectOptions::new()).unwrap();
    client.handle_transport_connected();
    deliver(&mut client, "A/B", 1, "A/B", QoS::AtMostOnce);
    assert_eq!(listener.messages().len(), 2);

    client.handle_connection_lost("network down");
    client.connect(ConnectOptions::new()).unwrap();
    client.handle_transport_connected();
    deliver(&mut client, "A/B", 1, "A/B", QoS::AtMostOnce);
    assert_eq!(listener.messages().len(), 3);
}
