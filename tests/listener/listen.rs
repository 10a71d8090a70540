//! Waiting on time and count budgets.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use bus_listener::bus::{Connection, Destination, InMemoryBroker};
use bus_listener::{IntakeState, ListenerError, StopReason};
use serde_json::json;

use crate::support::{build_listener, build_message, doc, URL};

#[test]
fn result_history_keeps_newest_window() {
    let broker = InMemoryBroker::new(URL);
    let listener = build_listener(&broker);
    listener.set_capacity(2).unwrap();
    let conn = listener.subscribe("").expect("subscribed");

    let topic = Destination::Topic(listener.topic().to_string());
    for job in ["one", "two", "three"] {
        broker.publish(&topic, build_message(job, "passed"));
    }

    let summary = listener.listen_until(Duration::from_secs(5), 3);
    assert_eq!(summary.received, 3);

    let jobs: Vec<_> = listener
        .results()
        .into_iter()
        .map(|r| r.value().unwrap().job.clone())
        .collect();
    assert_eq!(jobs, vec!["two", "three"]);
    conn.close().unwrap();
}

#[test]
fn take_oldest_drains_then_errors() {
    let broker = InMemoryBroker::new(URL);
    let listener = build_listener(&broker);
    listener
        .subject()
        .next(doc(json!({ "root": { "job": "a", "status": "passed" } })));
    listener.subject().next(doc(json!({ "root": "not a build" })));

    let first = listener.take_oldest().unwrap();
    assert_eq!(first.value().unwrap().job, "a");
    let second = listener.take_oldest().unwrap();
    assert!(second.value().is_none());
    assert!(second.document().is_some());
    assert!(matches!(
        listener.take_oldest(),
        Err(ListenerError::EmptyBuffer)
    ));
}

#[test]
fn times_out_without_traffic() {
    let broker = InMemoryBroker::new(URL);
    let listener = build_listener(&broker);
    let conn = listener.subscribe("team = 'qe'").expect("subscribed");

    let summary = listener.listen_for(Duration::from_millis(120));
    assert_eq!(summary.reason, StopReason::TimedOut);
    assert_eq!(summary.received, 0);
    assert!(summary.elapsed >= Duration::from_millis(120));
    assert_eq!(listener.state(), IntakeState::Completed);
    conn.close().unwrap();
}

#[test]
fn default_budget_comes_from_broker_config() {
    let broker = InMemoryBroker::new(URL);
    let listener = Arc::new(build_listener(&broker));
    let conn = listener.subscribe("").expect("subscribed");

    let topic = Destination::Topic(listener.topic().to_string());
    let publisher = {
        let broker = broker.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            broker.publish(&topic, build_message("unit", "passed"));
        })
    };

    // messageMax is 1 in the fixture config.
    let summary = listener.listen();
    publisher.join().unwrap();
    assert_eq!(summary.reason, StopReason::CountReached);
    assert_eq!(summary.received, 1);
    conn.close().unwrap();
}

#[test]
fn cancel_from_another_thread() {
    let broker = InMemoryBroker::new(URL);
    let listener = build_listener(&broker);
    let cancel = listener.cancel_handle();

    let canceller = thread::spawn(move || {
        thread::sleep(Duration::from_millis(40));
        cancel.cancel();
    });

    let summary = listener.listen_until(Duration::from_secs(30), 10);
    canceller.join().unwrap();
    assert_eq!(summary.reason, StopReason::Cancelled);
    assert!(summary.elapsed < Duration::from_secs(5));
}

#[test]
fn receive_once_and_subscription_run_side_by_side() {
    let broker = InMemoryBroker::new(URL);
    let listener = Arc::new(build_listener(&broker));
    let conn = listener.subscribe("").expect("subscribed");
    let topic = Destination::Topic(listener.topic().to_string());

    let receiver = {
        let listener = Arc::clone(&listener);
        thread::spawn(move || {
            listener
                .receive_once("team = 'qe'")
                .unwrap()
                .map(|(conn, msg)| {
                    conn.close().unwrap();
                    msg.property("team").map(str::to_string)
                })
        })
    };

    // Wait for the one-shot consumer to attach before publishing.
    let give_up = std::time::Instant::now() + Duration::from_secs(5);
    while broker.consumer_count(&topic) == 0 && std::time::Instant::now() < give_up {
        thread::sleep(Duration::from_millis(5));
    }
    broker.publish(
        &topic,
        build_message("unit", "passed").with_property("team", "qe"),
    );

    let summary = listener.listen_until(Duration::from_secs(5), 1);
    assert_eq!(summary.reason, StopReason::CountReached);
    assert_eq!(receiver.join().unwrap(), Some(Some("qe".to_string())));
    conn.close().unwrap();
}
