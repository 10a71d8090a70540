//! Callback subscriptions feeding the intake.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use bus_listener::bus::{
    BrokerMessage, Connection, Destination, InMemoryBroker, MessageListener,
};
use bus_listener::{IntakeState, StopReason};
use serde_json::json;

use crate::support::{build_listener, build_message, eventually, BuildStatus, URL};

#[test]
fn subscribe_collects_matching_virtual_topic_messages() {
    let broker = InMemoryBroker::new(URL);
    let listener = build_listener(&broker);
    let conn = listener.subscribe("team = 'qe'").expect("subscribed");
    assert_eq!(listener.state(), IntakeState::Listening);

    let topic = Destination::Topic(listener.topic().to_string());
    broker.publish(
        &topic,
        build_message("unit", "passed").with_property("team", "qe"),
    );
    broker.publish(
        &topic,
        build_message("lint", "failed").with_property("team", "dev"),
    );
    broker.publish(
        &topic,
        build_message("e2e", "failed").with_property("team", "qe"),
    );

    let summary = listener.listen_until(Duration::from_secs(5), 2);
    assert_eq!(summary.reason, StopReason::CountReached);
    assert_eq!(summary.received, 2);

    let statuses: Vec<_> = listener
        .results()
        .into_iter()
        .filter_map(|r| r.value().cloned())
        .collect();
    assert_eq!(
        statuses,
        vec![
            BuildStatus {
                job: "unit".into(),
                status: "passed".into(),
            },
            BuildStatus {
                job: "e2e".into(),
                status: "failed".into(),
            },
        ]
    );
    conn.close().unwrap();
}

#[test]
fn map_messages_are_normalized_through_properties() {
    let broker = InMemoryBroker::new(URL);
    let listener = build_listener(&broker);
    let conn = listener.subscribe("").expect("subscribed");

    broker.publish(
        &Destination::Topic(listener.topic().to_string()),
        BrokerMessage::map()
            .with_entry("release", "1.4.0")
            .with_property("release", "release"),
    );

    listener.listen_until(Duration::from_secs(5), 1);
    let result = listener.take_oldest().unwrap();
    assert_eq!(result.document().unwrap()["release"], json!("1.4.0"));
    assert!(result.value().is_none());
    conn.close().unwrap();
}

#[test]
fn malformed_messages_count_as_faults_not_messages() {
    let broker = InMemoryBroker::new(URL);
    let listener = build_listener(&broker);
    let conn = listener.subscribe("").expect("subscribed");

    let topic = Destination::Topic(listener.topic().to_string());
    broker.publish(&topic, BrokerMessage::map().with_entry("orphan", 1));
    broker.publish(&topic, build_message("unit", "passed"));

    let summary = listener.listen_until(Duration::from_secs(5), 1);
    assert_eq!(summary.reason, StopReason::CountReached);
    assert_eq!(listener.fault_count(), 1);
    assert_eq!(listener.message_count(), 1);
    conn.close().unwrap();
}

#[test]
fn custom_callback_on_plain_queue() {
    let broker = InMemoryBroker::new(URL);
    let listener = build_listener(&broker);
    let seen = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&seen);
    let callback: MessageListener = Arc::new(move |_msg: BrokerMessage| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let conn = listener.tap_into_bus("", callback, "builds").expect("tapped");
    let queue = Destination::Queue("builds".into());
    broker.publish(&queue, BrokerMessage::text("{}"));
    broker.publish(&queue, BrokerMessage::text("{}"));

    assert!(eventually(|| seen.load(Ordering::SeqCst) == 2));
    // The callback bypassed the intake.
    assert_eq!(listener.message_count(), 0);
    conn.close().unwrap();
}

#[test]
fn queue_backlog_drains_into_new_subscription() {
    let broker = InMemoryBroker::new(URL);
    let listener = build_listener(&broker);
    let queue = Destination::Queue("builds".into());
    broker.publish(&queue, build_message("nightly", "passed"));
    assert_eq!(broker.backlog(&queue), 1);

    let callback = listener.create_listener(listener.message_parser());
    let conn = listener.tap_into_bus("", callback, "builds").expect("tapped");

    let summary = listener.listen_until(Duration::from_secs(5), 1);
    assert_eq!(summary.reason, StopReason::CountReached);
    assert_eq!(broker.backlog(&queue), 0);
    conn.close().unwrap();
}

#[test]
fn closing_the_connection_stops_delivery() {
    let broker = InMemoryBroker::new(URL);
    let listener = build_listener(&broker);
    let conn = listener.subscribe("").expect("subscribed");
    let queue = Destination::Queue(listener.consumer_queue());
    assert_eq!(broker.consumer_count(&queue), 1);

    conn.close().unwrap();
    assert!(conn.is_closed());
    assert_eq!(broker.consumer_count(&queue), 0);

    let topic = Destination::Topic(listener.topic().to_string());
    assert_eq!(broker.publish(&topic, build_message("late", "passed")), 0);
    thread::sleep(Duration::from_millis(100));
    assert_eq!(listener.message_count(), 0);
    // The closed listener's consumer queue no longer collects messages.
    assert_eq!(broker.backlog(&queue), 0);
}

#[test]
fn messages_after_completion_are_dropped() {
    let broker = InMemoryBroker::new(URL);
    let listener = build_listener(&broker);
    let conn = listener.subscribe("").expect("subscribed");
    let topic = Destination::Topic(listener.topic().to_string());

    broker.publish(&topic, build_message("first", "passed"));
    listener.listen_until(Duration::from_secs(5), 1);
    assert_eq!(listener.state(), IntakeState::Completed);

    broker.publish(&topic, build_message("second", "passed"));
    thread::sleep(Duration::from_millis(150));
    assert_eq!(listener.message_count(), 1);
    assert_eq!(listener.results().len(), 1);
    conn.close().unwrap();
}

#[test]
fn unreachable_broker_yields_none() {
    let broker = InMemoryBroker::new(URL);
    broker.set_offline(true);
    let listener = build_listener(&broker);

    assert!(listener.subscribe("team = 'qe'").is_none());
    assert_eq!(listener.state(), IntakeState::Idle);
}
