//! Building listeners from configuration files.

use std::io::Write;
use std::time::Duration;

use bus_listener::bus::InMemoryBroker;
use bus_listener::config::CONFIG_PATH_ENV;
use bus_listener::listener::{BusListener, DefaultHandler};
use bus_listener::ListenerError;
use tempfile::NamedTempFile;

use crate::support::{init, URL};

fn config_file(json: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(json.as_bytes()).unwrap();
    file
}

#[test]
fn listener_uses_default_broker_from_file() {
    init();
    let file = config_file(
        r#"{
            "defaultBroker": "qe",
            "brokers": {
                "qe": { "url": "vm://qe", "user": "ci", "password": "pw", "messageTimeout": 1500, "messageMax": 4 },
                "dev": { "url": "vm://dev" }
            }
        }"#,
    );

    let listener =
        BusListener::<(), _>::from_path(InMemoryBroker::new(URL), DefaultHandler, file.path())
            .unwrap();

    assert_eq!(listener.broker().url, URL);
    assert_eq!(listener.broker().user, "ci");
    assert_eq!(listener.broker().message_timeout(), Duration::from_millis(1500));
    assert_eq!(listener.broker().message_max(), 4);
    assert_eq!(listener.config().brokers.len(), 2);
}

#[test]
fn missing_file_is_config_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let result = BusListener::<(), _>::from_path(
        InMemoryBroker::new(URL),
        DefaultHandler,
        dir.path().join("absent.json"),
    );
    assert!(matches!(result, Err(ListenerError::ConfigNotFound(_))));
}

#[test]
fn undefined_default_broker_is_config_not_found() {
    let file = config_file(
        r#"{ "defaultBroker": "prod", "brokers": { "qe": { "url": "vm://qe" } } }"#,
    );
    let result =
        BusListener::<(), _>::from_path(InMemoryBroker::new(URL), DefaultHandler, file.path());
    assert!(matches!(result, Err(ListenerError::ConfigNotFound(_))));
}

#[test]
fn new_reads_path_from_environment() {
    let file = config_file(
        r#"{ "defaultBroker": "qe", "brokers": { "qe": { "url": "vm://qe" } } }"#,
    );
    std::env::set_var(CONFIG_PATH_ENV, file.path());

    let listener = BusListener::<(), _>::new(InMemoryBroker::new(URL), DefaultHandler).unwrap();
    std::env::remove_var(CONFIG_PATH_ENV);

    assert_eq!(listener.broker().url, URL);
    assert_eq!(listener.broker().message_timeout(), Duration::from_secs(300));
    assert_eq!(listener.broker().message_max(), 1);
}
