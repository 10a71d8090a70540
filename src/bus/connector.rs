//! Broker connector traits.
//!
//! These mirror the connection → session → consumer lifecycle of a
//! JMS-style broker client. Sessions and consumers belong to the connection
//! that created them: closing the connection stops every consumer and any
//! callback delivery it was running.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use super::BrokerMessage;
use crate::error::ConnectionFault;

/// Callback invoked by the connector for every delivered message.
///
/// Connectors deliver to a given callback one message at a time.
pub type MessageListener = Arc<dyn Fn(BrokerMessage) + Send + Sync>;

/// A named topic (fan-out) or queue (point-to-point).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Destination {
    Topic(String),
    Queue(String),
}

impl Destination {
    pub fn name(&self) -> &str {
        match self {
            Destination::Topic(name) | Destination::Queue(name) => name,
        }
    }

    pub fn is_topic(&self) -> bool {
        matches!(self, Destination::Topic(_))
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Destination::Topic(name) => write!(f, "topic://{}", name),
            Destination::Queue(name) => write!(f, "queue://{}", name),
        }
    }
}

/// User name and password for the broker.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub user: String,
    pub password: String,
}

impl Credentials {
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Entry point of a broker client: opens connections.
pub trait Connector: Send + Sync {
    type Connection: Connection;

    /// Open a new, not yet started, connection.
    fn open_connection(
        &self,
        url: &str,
        credentials: &Credentials,
    ) -> Result<Self::Connection, ConnectionFault>;
}

/// An open broker connection.
pub trait Connection: Send + 'static {
    type Session: Session;

    /// Set the client identity. Must happen before the connection is started.
    fn set_client_id(&mut self, client_id: &str) -> Result<(), ConnectionFault>;

    fn client_id(&self) -> Option<&str>;

    /// Start delivery. Nothing is delivered to consumers before this.
    fn start(&self) -> Result<(), ConnectionFault>;

    fn create_session(&self) -> Result<Self::Session, ConnectionFault>;

    /// Close the connection and everything created from it. Idempotent.
    fn close(&self) -> Result<(), ConnectionFault>;
}

/// A session creates destinations and consumers.
pub trait Session {
    type Consumer: Consumer;

    fn create_topic(&self, name: &str) -> Destination {
        Destination::Topic(name.to_string())
    }

    fn create_queue(&self, name: &str) -> Destination {
        Destination::Queue(name.to_string())
    }

    /// Create a consumer, optionally filtered by a broker-native selector.
    fn create_consumer(
        &self,
        destination: &Destination,
        selector: Option<&str>,
    ) -> Result<Self::Consumer, ConnectionFault>;
}

/// Receives messages either by blocking pull or by callback.
pub trait Consumer {
    /// Block until a message arrives or the timeout elapses.
    fn receive(&self, timeout: Duration) -> Result<Option<BrokerMessage>, ConnectionFault>;

    /// Register a callback; the connector invokes it for every message.
    fn set_callback(&self, listener: MessageListener) -> Result<(), ConnectionFault>;
}
