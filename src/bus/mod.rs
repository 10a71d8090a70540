//! Broker connector abstractions.
//!
//! This module defines the connection → session → consumer interface the
//! listener consumes, the broker-native message shapes it normalizes, and an
//! in-process implementation for tests and single-process use.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  Connector (per broker client)               │
//! │  open_connection(url, credentials)                          │
//! └─────────────────────────────────────────────────────────────┘
//!                            │
//!                            ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │            Connection → Session → Consumer                   │
//! │  set_client_id / start / close                              │
//! │  create_topic / create_queue / create_consumer(selector)    │
//! │  receive(timeout) / set_callback(listener)                  │
//! └─────────────────────────────────────────────────────────────┘
//!          │                                   │
//!          ▼                                   ▼
//! ┌─────────────────┐              ┌───────────────────────────┐
//! │ InMemoryBroker  │              │ ActiveMQ / AMQP / ...     │
//! │   (included)    │              │       (external)          │
//! └─────────────────┘              └───────────────────────────┘
//! ```

mod connector;
#[cfg(feature = "in-memory")]
mod in_memory;
mod message;
mod selector;

pub use connector::{
    Connection, Connector, Consumer, Credentials, Destination, MessageListener, Session,
};
#[cfg(feature = "in-memory")]
pub use in_memory::{InMemoryBroker, InMemoryConnection, InMemoryConsumer, InMemorySession};
pub use message::{BrokerMessage, MapValue, MessageBody};
pub use selector::Selector;
