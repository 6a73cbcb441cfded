use super::Broker;
use super::channel::{Channel, validate_channel_name};
use super::message::Message;
use super::registry::ChannelRegistry;
use crate::client::{ConnectionState, DeliveryError, MessageSink, outbound_queue};
use crate::config::BrokerSettings;
use crate::utils::RelayError;
use std::sync::Arc;
use std::time::Duration;

struct ClosedSink;

impl MessageSink for ClosedSink {
    fn try_deliver(&self, _message: Arc<Message>) -> Result<(), DeliveryError> {
        Err(DeliveryError::Closed)
    }
}

fn small_broker() -> Broker {
    Broker::new(BrokerSettings {
        max_payload_bytes: 16,
        max_channel_name_len: 8,
        outbound_queue_capacity: 8,
        ..BrokerSettings::default()
    })
}

#[test]
fn test_channel_new() {
    let channel = Channel::new("room1");
    assert_eq!(channel.name, "room1");
    assert!(channel.is_empty());
    assert_eq!(channel.peek_next_id(), 1);
    assert_eq!(channel.stats().last_message_id, 0);
}

#[test]
fn test_channel_subscribe_is_idempotent() {
    let registry = ChannelRegistry::default();
    let (tx, _rx) = outbound_queue(1);
    let conn = registry.connect(tx).unwrap();

    let mut channel = Channel::new("room1");
    assert!(channel.subscribe(&conn));
    assert!(!channel.subscribe(&conn));
    assert_eq!(channel.subscribers().len(), 1);

    assert!(channel.unsubscribe(&conn.id));
    assert!(!channel.unsubscribe(&conn.id));
    assert!(channel.is_empty());
}

#[test]
fn test_channel_ids_are_monotonic() {
    let mut channel = Channel::new("room1");
    assert_eq!(channel.next_id(), 1);
    assert_eq!(channel.next_id(), 2);
    assert_eq!(channel.next_id(), 3);

    let stats = channel.stats();
    assert_eq!(stats.published_messages, 3);
    assert_eq!(stats.last_message_id, 3);
}

#[test]
fn test_validate_channel_name() {
    assert!(validate_channel_name("my-channel", 16).is_ok());
    assert!(validate_channel_name("room:1.a_b", 16).is_ok());

    for bad in ["", "has space", "a/b", "a|b", "tab\there", "waytoolongname"] {
        assert!(
            matches!(
                validate_channel_name(bad, 10),
                Err(RelayError::InvalidChannelName { .. })
            ),
            "{bad:?} should be rejected"
        );
    }
}

#[test]
fn test_registry_get_or_create_returns_same_channel() {
    let registry = ChannelRegistry::default();
    let a = registry.get_or_create("room1").unwrap();
    let b = registry.get_or_create("room1").unwrap();
    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(registry.channel_count(), 1);
}

#[test]
fn test_registry_channel_limit() {
    let registry = ChannelRegistry::new(1, 10, Duration::ZERO);
    registry.get_or_create("room1").unwrap();
    assert!(matches!(
        registry.get_or_create("room2"),
        Err(RelayError::ChannelLimitExceeded(1))
    ));
    // existing channels are still reachable
    assert!(registry.get_or_create("room1").is_ok());
}

#[test]
fn test_registry_connection_limit() {
    let registry = ChannelRegistry::new(10, 1, Duration::ZERO);
    let (tx1, _rx1) = outbound_queue(1);
    let (tx2, _rx2) = outbound_queue(1);
    let first = registry.connect(tx1).unwrap();
    assert!(matches!(
        registry.connect(tx2),
        Err(RelayError::ConnectionLimitExceeded(1))
    ));

    registry.remove_connection(&first);
    let (tx3, _rx3) = outbound_queue(1);
    assert!(registry.connect(tx3).is_ok());
}

#[test]
fn test_registry_subscribe_and_list() {
    let registry = ChannelRegistry::default();
    let (tx1, _rx1) = outbound_queue(1);
    let (tx2, _rx2) = outbound_queue(1);
    let first = registry.connect(tx1).unwrap();
    let second = registry.connect(tx2).unwrap();

    assert!(registry.subscribe("room1", &first).unwrap());
    assert!(registry.subscribe("room1", &second).unwrap());
    assert!(!registry.subscribe("room1", &first).unwrap());

    let ids: Vec<_> = registry
        .list_subscribers("room1")
        .iter()
        .map(|c| c.id.clone())
        .collect();
    assert_eq!(ids, vec![first.id.clone(), second.id.clone()]);
    assert_eq!(first.state(), ConnectionState::Active);
    assert!(registry.list_subscribers("nowhere").is_empty());
}

#[test]
fn test_registry_unsubscribe_non_member_is_noop() {
    let registry = ChannelRegistry::default();
    let (tx1, _rx1) = outbound_queue(1);
    let (tx2, _rx2) = outbound_queue(1);
    let member = registry.connect(tx1).unwrap();
    let stranger = registry.connect(tx2).unwrap();
    registry.subscribe("room1", &member).unwrap();

    registry.unsubscribe("room1", &stranger);
    registry.unsubscribe("nowhere", &stranger);

    assert_eq!(registry.list_subscribers("room1").len(), 1);
    assert_eq!(stranger.state(), ConnectionState::Connecting);
}

#[test]
fn test_registry_unsubscribe_last_channel_closes_connection() {
    let registry = ChannelRegistry::default();
    let (tx, _rx) = outbound_queue(1);
    let conn = registry.connect(tx).unwrap();
    registry.subscribe("room1", &conn).unwrap();
    registry.subscribe("room2", &conn).unwrap();

    registry.unsubscribe("room1", &conn);
    assert_eq!(conn.state(), ConnectionState::Active);
    assert_eq!(conn.channels(), vec!["room2".to_string()]);

    registry.unsubscribe("room2", &conn);
    assert_eq!(conn.state(), ConnectionState::Closed);
    assert_eq!(registry.connection_count(), 0);
}

#[test]
fn test_registry_evicts_empty_channel_without_retention() {
    let registry = ChannelRegistry::new(10, 10, Duration::ZERO);
    let (tx, _rx) = outbound_queue(1);
    let conn = registry.connect(tx).unwrap();
    registry.subscribe("room1", &conn).unwrap();
    assert!(registry.contains_channel("room1"));

    registry.unsubscribe("room1", &conn);
    assert!(!registry.contains_channel("room1"));
}

#[test]
fn test_registry_keeps_empty_channel_with_retention() {
    let registry = ChannelRegistry::new(10, 10, Duration::from_secs(60));
    let (tx, _rx) = outbound_queue(1);
    let conn = registry.connect(tx).unwrap();
    registry.subscribe("room1", &conn).unwrap();
    registry.unsubscribe("room1", &conn);
    assert!(registry.contains_channel("room1"));

    // not idle long enough yet
    assert_eq!(registry.evict_idle(Duration::from_secs(60)), 0);
    assert!(registry.contains_channel("room1"));

    assert_eq!(registry.evict_idle(Duration::ZERO), 1);
    assert!(!registry.contains_channel("room1"));
}

#[test]
fn test_evict_idle_spares_channels_with_subscribers() {
    let registry = ChannelRegistry::new(10, 10, Duration::from_secs(60));
    let (tx, _rx) = outbound_queue(1);
    let conn = registry.connect(tx).unwrap();
    registry.subscribe("busy", &conn).unwrap();
    registry.get_or_create("empty").unwrap();

    assert_eq!(registry.evict_idle(Duration::ZERO), 1);
    assert!(registry.contains_channel("busy"));
    assert!(!registry.contains_channel("empty"));
}

#[test]
fn test_registry_remove_connection_leaves_every_channel() {
    let registry = ChannelRegistry::new(10, 10, Duration::from_secs(60));
    let (tx, _rx) = outbound_queue(1);
    let conn = registry.connect(tx).unwrap();
    registry.subscribe("room1", &conn).unwrap();
    registry.subscribe("room2", &conn).unwrap();

    assert!(registry.remove_connection(&conn));
    assert!(!registry.remove_connection(&conn));

    assert!(registry.list_subscribers("room1").is_empty());
    assert!(registry.list_subscribers("room2").is_empty());
    assert_eq!(conn.state(), ConnectionState::Closed);
    assert_eq!(registry.connection_count(), 0);

    // a closed connection cannot come back
    assert!(!registry.subscribe("room1", &conn).unwrap());
    assert!(registry.list_subscribers("room1").is_empty());
}

#[test]
fn test_channel_recreated_after_eviction_restarts_ids() {
    let broker = Broker::default();
    let (conn, _rx) = broker.connect().unwrap();
    broker.subscribe("room1", &conn).unwrap();
    assert_eq!(broker.publish("room1", "a").unwrap().id, 1);

    broker.unsubscribe("room1", &conn);
    assert!(!broker.registry().contains_channel("room1"));
    assert_eq!(broker.publish("room1", "b").unwrap().id, 1);
}

#[test]
fn test_broker_publish_without_subscribers_assigns_id() {
    let broker = Broker::default();
    let msg = broker.publish("room1", "hello").unwrap();
    assert_eq!(msg.id, 1);
    assert_eq!(msg.channel, "room1");
    assert_eq!(&msg.payload[..], b"hello");
    assert_eq!(broker.publish("room1", "again").unwrap().id, 2);
    assert_eq!(broker.stats().published_messages, 2);
}

#[test]
fn test_broker_publish_delivers_in_order() {
    let broker = Broker::default();
    let (conn, mut rx) = broker.connect().unwrap();
    broker.subscribe("room1", &conn).unwrap();

    for i in 0..5 {
        broker.publish("room1", format!("msg-{i}")).unwrap();
    }

    let mut ids = Vec::new();
    while let Ok(msg) = rx.try_recv() {
        ids.push(msg.id);
    }
    assert_eq!(ids, vec![1, 2, 3, 4, 5]);
}

#[test]
fn test_broker_no_replay_for_late_subscriber() {
    let broker = Broker::default();
    broker.publish("room1", "username=alice&text=hi").unwrap();

    let (conn, mut rx) = broker.connect().unwrap();
    broker.subscribe("room1", &conn).unwrap();
    assert!(rx.try_recv().is_err());

    let msg = broker.publish("room1", "username=bob&text=yo").unwrap();
    assert_eq!(msg.id, 2);

    let received = rx.try_recv().unwrap();
    assert_eq!(received.id, 2);
    assert_eq!(&received.payload[..], b"username=bob&text=yo");
    assert!(rx.try_recv().is_err());
}

#[test]
fn test_broker_only_delivers_to_channel_members() {
    let broker = Broker::default();
    let (first, mut rx1) = broker.connect().unwrap();
    let (second, mut rx2) = broker.connect().unwrap();
    broker.subscribe("room1", &first).unwrap();
    broker.subscribe("room2", &second).unwrap();

    broker.publish("room1", "hello").unwrap();

    assert!(rx1.try_recv().is_ok());
    assert!(rx2.try_recv().is_err());
}

#[test]
fn test_broker_rejects_invalid_channel() {
    let broker = small_broker();
    assert!(matches!(
        broker.publish("", "x"),
        Err(RelayError::InvalidChannelName { .. })
    ));
    assert!(matches!(
        broker.publish("much-too-long", "x"),
        Err(RelayError::InvalidChannelName { .. })
    ));
    assert_eq!(broker.registry().channel_count(), 0);
}

#[test]
fn test_broker_payload_too_large_keeps_counter() {
    let broker = small_broker();
    assert_eq!(broker.publish("room1", "ok").unwrap().id, 1);

    let err = broker.publish("room1", vec![0u8; 17]).unwrap_err();
    assert!(matches!(err, RelayError::PayloadTooLarge { size: 17, max: 16 }));

    let handle = broker.registry().get("room1").unwrap();
    assert_eq!(handle.lock().peek_next_id(), 2);
    assert_eq!(broker.publish("room1", "ok").unwrap().id, 2);
}

#[test]
fn test_broker_payload_at_limit_is_accepted() {
    let broker = small_broker();
    assert!(broker.publish("room1", vec![1u8; 16]).is_ok());
}

#[test]
fn test_broker_drops_closed_subscriber_and_keeps_others() {
    let broker = Broker::default();
    let registry = broker.registry();
    let dead = registry.connect(ClosedSink).unwrap();
    let (live, mut rx) = broker.connect().unwrap();
    broker.subscribe("room1", &dead).unwrap();
    broker.subscribe("room1", &live).unwrap();

    let msg = broker.publish("room1", "hello").unwrap();
    assert_eq!(msg.id, 1);
    assert_eq!(rx.try_recv().unwrap().id, 1);

    assert_eq!(dead.state(), ConnectionState::Closed);
    let remaining = registry.list_subscribers("room1");
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].id, live.id);
    assert_eq!(broker.stats().dropped_subscribers, 1);
}

#[test]
fn test_broker_drops_subscriber_with_dropped_receiver() {
    let broker = Broker::default();
    let (conn, rx) = broker.connect().unwrap();
    broker.subscribe("room1", &conn).unwrap();
    drop(rx);

    assert!(broker.publish("room1", "hello").is_ok());
    assert!(conn.is_closed());
    assert!(broker.registry().list_subscribers("room1").is_empty());
}

#[test]
fn test_broker_drops_slow_subscriber() {
    let broker = Broker::new(BrokerSettings {
        outbound_queue_capacity: 2,
        channel_retention_secs: 60,
        ..BrokerSettings::default()
    });
    let (slow, _slow_rx) = broker.connect().unwrap();
    let (fast, mut fast_rx) = broker.connect().unwrap();
    broker.subscribe("room1", &slow).unwrap();
    broker.subscribe("room1", &fast).unwrap();

    for _ in 0..3 {
        broker.publish("room1", "tick").unwrap();
        // the fast subscriber keeps draining
        assert!(fast_rx.try_recv().is_ok());
    }

    assert!(slow.is_closed());
    assert_eq!(broker.registry().list_subscribers("room1").len(), 1);
}

#[test]
fn test_broker_disconnect_stops_delivery() {
    let broker = Broker::default();
    let (conn, mut rx) = broker.connect().unwrap();
    broker.subscribe("room1", &conn).unwrap();
    broker.subscribe("room2", &conn).unwrap();

    broker.disconnect(&conn);
    broker.disconnect(&conn);

    broker.publish("room1", "a").unwrap();
    broker.publish("room2", "b").unwrap();
    assert!(rx.try_recv().is_err());
    assert_eq!(broker.stats().connections, 0);
}

#[test]
fn test_broker_subscribe_rejects_invalid_channel() {
    let broker = Broker::default();
    let (conn, _rx) = broker.connect().unwrap();
    assert!(matches!(
        broker.subscribe("a/b", &conn),
        Err(RelayError::InvalidChannelName { .. })
    ));
    assert_eq!(conn.state(), ConnectionState::Connecting);
}

#[test]
fn test_concurrent_publishes_to_distinct_channels() {
    let broker = Arc::new(Broker::default());
    let per_channel = 200u64;

    let handles: Vec<_> = (0..8)
        .map(|n| {
            let broker = Arc::clone(&broker);
            std::thread::spawn(move || {
                let channel = format!("room{n}");
                let (conn, mut rx) = broker.connect().unwrap();
                broker.subscribe(&channel, &conn).unwrap();

                let mut received = Vec::new();
                for _ in 0..per_channel {
                    broker.publish(&channel, "x").unwrap();
                    received.push(rx.try_recv().unwrap().id);
                }
                received
            })
        })
        .collect();

    for handle in handles {
        let ids = handle.join().unwrap();
        assert_eq!(ids, (1..=per_channel).collect::<Vec<_>>());
    }
    assert_eq!(broker.stats().published_messages, 8 * per_channel);
}

#[test]
fn test_concurrent_publishers_on_one_channel_keep_order() {
    let broker = Arc::new(Broker::new(BrokerSettings {
        outbound_queue_capacity: 1024,
        ..BrokerSettings::default()
    }));
    let (conn, mut rx) = broker.connect().unwrap();
    broker.subscribe("room1", &conn).unwrap();

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let broker = Arc::clone(&broker);
            std::thread::spawn(move || {
                for _ in 0..100 {
                    broker.publish("room1", "x").unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let mut ids = Vec::new();
    while let Ok(msg) = rx.try_recv() {
        ids.push(msg.id);
    }
    assert_eq!(ids, (1..=400).collect::<Vec<u64>>());
}

#[test]
fn test_idle_window_falls_back_to_idle_channel_timeout() {
    let registry = ChannelRegistry::new(10, 10, Duration::ZERO)
        .with_idle_channel_timeout(Duration::from_secs(7));
    assert_eq!(registry.idle_window(), Duration::from_secs(7));

    let registry = ChannelRegistry::new(10, 10, Duration::from_secs(30))
        .with_idle_channel_timeout(Duration::from_secs(7));
    assert_eq!(registry.idle_window(), Duration::from_secs(30));
}

#[test]
fn test_channel_cap_reclaims_publish_only_channels() {
    let registry =
        ChannelRegistry::new(3, 10, Duration::ZERO).with_idle_channel_timeout(Duration::ZERO);
    for name in ["burst0", "burst1", "burst2"] {
        registry.get_or_create(name).unwrap();
    }
    assert_eq!(registry.channel_count(), 3);

    assert!(registry.get_or_create("fresh").is_ok());
    assert!(registry.contains_channel("fresh"));
    assert!(!registry.contains_channel("burst0"));
}

#[test]
fn test_channel_cap_spares_channels_with_subscribers() {
    let registry =
        ChannelRegistry::new(2, 10, Duration::ZERO).with_idle_channel_timeout(Duration::ZERO);
    let (tx, _rx) = outbound_queue(1);
    let conn = registry.connect(tx).unwrap();
    registry.subscribe("room1", &conn).unwrap();
    registry.subscribe("room2", &conn).unwrap();

    assert!(matches!(
        registry.get_or_create("room3"),
        Err(RelayError::ChannelLimitExceeded(2))
    ));
}

#[test]
fn test_channel_cap_keeps_recent_channels() {
    let registry = ChannelRegistry::new(1, 10, Duration::ZERO)
        .with_idle_channel_timeout(Duration::from_secs(60));
    registry.get_or_create("room1").unwrap();

    assert!(matches!(
        registry.get_or_create("room2"),
        Err(RelayError::ChannelLimitExceeded(1))
    ));
    assert!(registry.contains_channel("room1"));
}

#[tokio::test(start_paused = true)]
async fn test_retention_loop_evicts_idle_channels() {
    let broker = Arc::new(Broker::new(BrokerSettings {
        channel_retention_secs: 1,
        ..BrokerSettings::default()
    }));
    let (conn, _rx) = broker.connect().unwrap();
    broker.subscribe("busy", &conn).unwrap();
    broker.publish("quiet", "hello").unwrap();

    let sweeper = tokio::spawn(Broker::start_retention_loop(broker.clone()));

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(broker.registry().contains_channel("quiet"));

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(!broker.registry().contains_channel("quiet"));
    assert!(broker.registry().contains_channel("busy"));

    sweeper.abort();
}

#[tokio::test(start_paused = true)]
async fn test_publish_only_channels_do_not_exhaust_the_cap() {
    let broker = Arc::new(Broker::new(BrokerSettings {
        max_channels: 3,
        ..BrokerSettings::default()
    }));
    for name in ["burst0", "burst1", "burst2"] {
        broker.publish(name, "hello").unwrap();
    }
    assert!(matches!(
        broker.publish("fresh", "hello"),
        Err(RelayError::ChannelLimitExceeded(3))
    ));

    let sweeper = tokio::spawn(Broker::start_retention_loop(broker.clone()));

    // still inside the idle timeout, so a quick follow-up keeps its ids
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(broker.publish("burst0", "again").unwrap().id, 2);

    tokio::time::sleep(Duration::from_secs(8)).await;
    assert_eq!(broker.registry().channel_count(), 0);
    assert_eq!(broker.publish("fresh", "hello").unwrap().id, 1);

    let (conn, _rx) = broker.connect().unwrap();
    assert!(broker.subscribe("another", &conn).unwrap());

    sweeper.abort();
}
