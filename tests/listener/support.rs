//! Shared fixtures: a CI build-status domain and broker helpers.

use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use bus_listener::bus::{BrokerMessage, Destination, InMemoryBroker};
use bus_listener::listener::{BusListener, Document, MessageResult, ResultHandler};
use bus_listener::{Broker, BrokerConfig};
use serde::Deserialize;
use serde_json::Value;

pub const URL: &str = "vm://qe";

/// Result value produced for build notifications.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct BuildStatus {
    pub job: String,
    pub status: String,
}

/// Reads `root` as a [`BuildStatus`]; anything else keeps the document only.
pub struct BuildStatusHandler;

impl ResultHandler<BuildStatus> for BuildStatusHandler {
    fn handle(&self, document: Document) -> MessageResult<BuildStatus> {
        let status = document
            .get("root")
            .cloned()
            .and_then(|root| serde_json::from_value(root).ok());
        MessageResult::new(Some(document), status)
    }
}

pub fn init() {
    bus_listener::init_tracing("bus_listener=debug");
}

pub fn config() -> BrokerConfig {
    BrokerConfig::new(
        "qe",
        Broker::new(URL)
            .with_message_timeout(Duration::from_millis(300))
            .with_message_max(1),
    )
}

pub fn build_listener(broker: &InMemoryBroker) -> BusListener<BuildStatus, InMemoryBroker> {
    init();
    BusListener::with_config(broker.clone(), BuildStatusHandler, config())
        .unwrap()
        .with_poll_interval(Duration::from_millis(10))
}

pub fn build_message(job: &str, status: &str) -> BrokerMessage {
    BrokerMessage::text(format!(r#"{{"job":"{}","status":"{}"}}"#, job, status))
}

/// Publish once `destination` has a consumer, from a background thread.
pub fn publish_when_subscribed(
    broker: &InMemoryBroker,
    destination: Destination,
    message: BrokerMessage,
) -> JoinHandle<usize> {
    let broker = broker.clone();
    thread::spawn(move || {
        let give_up = Instant::now() + Duration::from_secs(5);
        while broker.consumer_count(&destination) == 0 && Instant::now() < give_up {
            thread::sleep(Duration::from_millis(5));
        }
        broker.publish(&destination, message)
    })
}

/// Poll `cond` until it holds or a second passes.
pub fn eventually(mut cond: impl FnMut() -> bool) -> bool {
    let give_up = Instant::now() + Duration::from_secs(1);
    while Instant::now() < give_up {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    cond()
}

pub fn doc(value: Value) -> Document {
    match value {
        Value::Object(map) => map,
        other => panic!("expected object, got {}", other),
    }
}
