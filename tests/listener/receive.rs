//! One-shot blocking receive.

use std::time::{Duration, Instant};

use bus_listener::bus::{BrokerMessage, Connection, Credentials, Destination, InMemoryBroker};
use bus_listener::{ConnectionFault, ListenerError};

use crate::support::{build_listener, build_message, publish_when_subscribed, URL};

#[test]
fn returns_matching_message_with_open_connection() {
    let broker = InMemoryBroker::new(URL);
    let listener = build_listener(&broker);
    let publisher = publish_when_subscribed(
        &broker,
        Destination::Topic(listener.topic().to_string()),
        build_message("deploy", "passed").with_property("team", "qe"),
    );

    let (conn, message) = listener
        .receive_once("team = 'qe'")
        .unwrap()
        .expect("message before timeout");
    assert_eq!(publisher.join().unwrap(), 1);

    assert_eq!(message.property("team"), Some("qe"));
    assert!(message.text_body().unwrap().contains("deploy"));
    assert!(conn.is_started());
    assert!(!conn.is_closed());
    assert_eq!(conn.client_id(), Some(listener.client_id()));
    conn.close().unwrap();
}

#[test]
fn non_matching_message_times_out_and_closes() {
    let broker = InMemoryBroker::new(URL);
    let listener = build_listener(&broker);
    let topic = Destination::Topic(listener.topic().to_string());
    let publisher = publish_when_subscribed(
        &broker,
        topic.clone(),
        build_message("deploy", "passed").with_property("team", "dev"),
    );

    let started = Instant::now();
    let received = listener.receive_once("team = 'qe'").unwrap();
    publisher.join().unwrap();

    assert!(received.is_none());
    assert!(started.elapsed() >= Duration::from_millis(300));
    // Timing out closes the connection and with it the consumer.
    assert_eq!(broker.consumer_count(&topic), 0);
}

#[test]
fn custom_topic_is_honored() {
    let broker = InMemoryBroker::new(URL);
    let listener = build_listener(&broker).with_topic("VirtualTopic.eng.brew");
    let publisher = publish_when_subscribed(
        &broker,
        Destination::Topic("VirtualTopic.eng.brew".into()),
        BrokerMessage::text("{}").with_property("kind", "build"),
    );

    let received = listener.receive_once("kind = 'build'").unwrap();
    publisher.join().unwrap();
    assert!(received.is_some());
}

#[test]
fn empty_selector_fails_before_connecting() {
    let broker = InMemoryBroker::new(URL);
    broker.set_offline(true);
    let listener = build_listener(&broker);

    assert!(matches!(
        listener.receive_once(""),
        Err(ListenerError::Precondition(_))
    ));
}

#[test]
fn connection_faults_are_absorbed() {
    let broker = InMemoryBroker::with_credentials(URL, Credentials::new("ci", "pw"));
    let listener = build_listener(&broker);

    assert!(listener.receive_once("team = 'qe'").unwrap().is_none());
    assert!(matches!(
        listener.try_receive_once("team = 'qe'"),
        Err(ListenerError::Connection(ConnectionFault::Authentication { .. }))
    ));
}

#[test]
fn malformed_selector_is_a_connection_fault() {
    let broker = InMemoryBroker::new(URL);
    let listener = build_listener(&broker);

    assert!(listener.receive_once("team = ").unwrap().is_none());
    assert!(matches!(
        listener.try_receive_once("team = "),
        Err(ListenerError::Connection(ConnectionFault::InvalidSelector { .. }))
    ));
}
