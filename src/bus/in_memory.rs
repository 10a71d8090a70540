//! In-process broker for testing and single-process scenarios.
//!
//! `InMemoryBroker` implements the [`Connector`] family of traits without
//! any network I/O:
//! - Topics fan out to every live consumer; messages published while no
//!   consumer listens are dropped (non-durable)
//! - Queues deliver each message to exactly one consumer and keep a backlog
//!   until a matching consumer appears
//! - Publishing to `VirtualTopic.X` also feeds every `Consumer.<id>.VirtualTopic.X`
//!   queue that has been created. A `Consumer.*` queue is removed, backlog
//!   included, when its last consumer closes
//! - Callback consumers get one delivery thread each, so a callback is never
//!   invoked concurrently with itself
//! - Nothing is delivered before the owning connection is started
//!
//! ## Example
//!
//! ```
//! use std::time::Duration;
//! use bus_listener::bus::{
//!     BrokerMessage, Connection, Connector, Consumer, Credentials, InMemoryBroker, Session,
//! };
//!
//! let broker = InMemoryBroker::new("vm://localhost");
//! let conn = broker.open_connection("vm://localhost", &Credentials::default()).unwrap();
//! let session = conn.create_session().unwrap();
//! let topic = session.create_topic("news");
//! let consumer = session.create_consumer(&topic, Some("team = 'qe'")).unwrap();
//! conn.start().unwrap();
//!
//! broker.publish(&topic, BrokerMessage::text("{}").with_property("team", "qe"));
//! let msg = consumer.receive(Duration::from_millis(100)).unwrap();
//! assert!(msg.is_some());
//! conn.close().unwrap();
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace, warn};

use super::{
    BrokerMessage, Connection, Connector, Consumer, Credentials, Destination, MessageListener,
    Selector, Session,
};
use crate::error::ConnectionFault;

/// How long a delivery thread waits before re-checking for shutdown.
const DELIVERY_POLL: Duration = Duration::from_millis(50);

const VIRTUAL_TOPIC_PREFIX: &str = "VirtualTopic.";
const CONSUMER_QUEUE_PREFIX: &str = "Consumer.";

/// In-process broker. Cloning yields another handle to the same broker.
#[derive(Clone)]
pub struct InMemoryBroker {
    inner: Arc<BrokerInner>,
}

struct BrokerInner {
    url: String,
    credentials: Option<Credentials>,
    offline: AtomicBool,
    destinations: Mutex<HashMap<Destination, DestinationState>>,
}

#[derive(Default)]
struct DestinationState {
    subscriptions: Vec<Arc<Subscription>>,
    /// Queue messages waiting for a matching consumer
    backlog: VecDeque<BrokerMessage>,
    /// Round-robin position for queue delivery
    cursor: usize,
}

struct Subscription {
    destination: Destination,
    selector: Option<Selector>,
    queue: Mutex<VecDeque<BrokerMessage>>,
    available: Condvar,
    has_callback: AtomicBool,
    connection: Arc<ConnectionShared>,
}

struct ConnectionShared {
    started: AtomicBool,
    closed: AtomicBool,
    subscriptions: Mutex<Vec<Arc<Subscription>>>,
    deliveries: Mutex<Vec<JoinHandle<()>>>,
}

impl InMemoryBroker {
    /// Create a broker reachable at `url` that accepts any credentials.
    pub fn new(url: impl Into<String>) -> Self {
        Self::build(url.into(), None)
    }

    /// Create a broker that only accepts the given credentials.
    pub fn with_credentials(url: impl Into<String>, credentials: Credentials) -> Self {
        Self::build(url.into(), Some(credentials))
    }

    fn build(url: String, credentials: Option<Credentials>) -> Self {
        Self {
            inner: Arc::new(BrokerInner {
                url,
                credentials,
                offline: AtomicBool::new(false),
                destinations: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn url(&self) -> &str {
        &self.inner.url
    }

    /// Simulate an outage: while offline, new connections are refused.
    pub fn set_offline(&self, offline: bool) {
        self.inner.offline.store(offline, Ordering::SeqCst);
    }

    /// Publish a message. Returns how many consumers it was handed to.
    pub fn publish(&self, destination: &Destination, message: BrokerMessage) -> usize {
        let mut destinations = self.inner.destinations.lock();

        match destination {
            Destination::Topic(name) => {
                let mut delivered = destinations
                    .get(destination)
                    .map(|state| fan_out(state, &message))
                    .unwrap_or(0);

                if name.starts_with(VIRTUAL_TOPIC_PREFIX) {
                    let suffix = format!(".{}", name);
                    for (dest, state) in destinations.iter_mut() {
                        if let Destination::Queue(queue) = dest {
                            if queue.starts_with(CONSUMER_QUEUE_PREFIX) && queue.ends_with(&suffix)
                            {
                                delivered += deliver_to_queue(state, message.clone());
                            }
                        }
                    }
                }

                trace!(%destination, delivered, "published to topic");
                delivered
            }
            Destination::Queue(_) => {
                let state = destinations.entry(destination.clone()).or_default();
                let delivered = deliver_to_queue(state, message);
                trace!(%destination, delivered, "published to queue");
                delivered
            }
        }
    }

    /// Number of queue messages still waiting for a consumer.
    pub fn backlog(&self, destination: &Destination) -> usize {
        self.inner
            .destinations
            .lock()
            .get(destination)
            .map(|state| state.backlog.len())
            .unwrap_or(0)
    }

    /// Number of open consumers on a destination.
    pub fn consumer_count(&self, destination: &Destination) -> usize {
        self.inner
            .destinations
            .lock()
            .get(destination)
            .map(|state| state.subscriptions.len())
            .unwrap_or(0)
    }

    fn attach(&self, subscription: &Arc<Subscription>) {
        let mut destinations = self.inner.destinations.lock();
        let state = destinations
            .entry(subscription.destination.clone())
            .or_default();

        if !subscription.destination.is_topic() {
            let (matching, rest): (VecDeque<_>, VecDeque<_>) = state
                .backlog
                .drain(..)
                .partition(|msg| subscription.accepts(msg));
            state.backlog = rest;
            for msg in matching {
                subscription.offer(msg);
            }
        }

        state.subscriptions.push(Arc::clone(subscription));
    }

    fn detach(&self, subscription: &Arc<Subscription>) {
        let mut destinations = self.inner.destinations.lock();
        let Some(state) = destinations.get_mut(&subscription.destination) else {
            return;
        };
        state
            .subscriptions
            .retain(|s| !Arc::ptr_eq(s, subscription));

        // A consumer queue belongs to one client identity; once its last
        // consumer is gone it stops being fed by its virtual topic.
        if state.subscriptions.is_empty() && is_consumer_queue(&subscription.destination) {
            let dropped = state.backlog.len();
            destinations.remove(&subscription.destination);
            debug!(destination = %subscription.destination, dropped, "removed consumer queue");
        }
    }
}

fn is_consumer_queue(destination: &Destination) -> bool {
    match destination {
        Destination::Queue(name) => name.starts_with(CONSUMER_QUEUE_PREFIX),
        Destination::Topic(_) => false,
    }
}

fn fan_out(state: &DestinationState, message: &BrokerMessage) -> usize {
    let mut delivered = 0;
    for sub in state.subscriptions.iter().filter(|s| s.accepts(message)) {
        sub.offer(message.clone());
        delivered += 1;
    }
    delivered
}

fn deliver_to_queue(state: &mut DestinationState, message: BrokerMessage) -> usize {
    let candidates: Vec<_> = state
        .subscriptions
        .iter()
        .filter(|s| s.accepts(&message))
        .cloned()
        .collect();

    if candidates.is_empty() {
        state.backlog.push_back(message);
        return 0;
    }

    let chosen = &candidates[state.cursor % candidates.len()];
    state.cursor = state.cursor.wrapping_add(1);
    chosen.offer(message);
    1
}

impl Subscription {
    fn accepts(&self, message: &BrokerMessage) -> bool {
        self.selector
            .as_ref()
            .map(|sel| sel.matches(message))
            .unwrap_or(true)
    }

    fn offer(&self, message: BrokerMessage) {
        self.queue.lock().push_back(message);
        self.available.notify_all();
    }

    /// Wake any waiter so it re-checks the connection flags.
    fn wake(&self) {
        let _guard = self.queue.lock();
        self.available.notify_all();
    }

    /// Wait for a message until `deadline`; `None` waits without a time limit.
    fn take(&self, deadline: Option<Instant>) -> Result<Option<BrokerMessage>, ConnectionFault> {
        let mut queue = self.queue.lock();
        loop {
            if self.connection.closed.load(Ordering::SeqCst) {
                return Err(ConnectionFault::Closed);
            }
            if self.connection.started.load(Ordering::SeqCst) {
                if let Some(msg) = queue.pop_front() {
                    return Ok(Some(msg));
                }
            }
            let Some(deadline) = deadline else {
                self.available.wait(&mut queue);
                continue;
            };
            if self.available.wait_until(&mut queue, deadline).timed_out() {
                if self.connection.closed.load(Ordering::SeqCst) {
                    return Err(ConnectionFault::Closed);
                }
                if self.connection.started.load(Ordering::SeqCst) {
                    return Ok(queue.pop_front());
                }
                return Ok(None);
            }
        }
    }
}

impl Connector for InMemoryBroker {
    type Connection = InMemoryConnection;

    fn open_connection(
        &self,
        url: &str,
        credentials: &Credentials,
    ) -> Result<Self::Connection, ConnectionFault> {
        if url != self.inner.url || self.inner.offline.load(Ordering::SeqCst) {
            return Err(ConnectionFault::Unreachable {
                url: url.to_string(),
            });
        }
        if let Some(expected) = &self.inner.credentials {
            if expected != credentials {
                return Err(ConnectionFault::Authentication {
                    user: credentials.user.clone(),
                });
            }
        }

        debug!(url, user = %credentials.user, "opened in-memory connection");
        Ok(InMemoryConnection {
            broker: self.clone(),
            client_id: None,
            shared: Arc::new(ConnectionShared {
                started: AtomicBool::new(false),
                closed: AtomicBool::new(false),
                subscriptions: Mutex::new(Vec::new()),
                deliveries: Mutex::new(Vec::new()),
            }),
        })
    }
}

/// Connection to an [`InMemoryBroker`]. Dropping it closes it.
pub struct InMemoryConnection {
    broker: InMemoryBroker,
    client_id: Option<String>,
    shared: Arc<ConnectionShared>,
}

impl InMemoryConnection {
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    pub fn is_started(&self) -> bool {
        self.shared.started.load(Ordering::SeqCst)
    }
}

impl Connection for InMemoryConnection {
    type Session = InMemorySession;

    fn set_client_id(&mut self, client_id: &str) -> Result<(), ConnectionFault> {
        if self.is_closed() {
            return Err(ConnectionFault::Closed);
        }
        if self.is_started() {
            return Err(ConnectionFault::Transport(
                "client id must be set before the connection is started".into(),
            ));
        }
        self.client_id = Some(client_id.to_string());
        Ok(())
    }

    fn client_id(&self) -> Option<&str> {
        self.client_id.as_deref()
    }

    fn start(&self) -> Result<(), ConnectionFault> {
        if self.is_closed() {
            return Err(ConnectionFault::Closed);
        }
        self.shared.started.store(true, Ordering::SeqCst);
        for sub in self.shared.subscriptions.lock().iter() {
            sub.wake();
        }
        Ok(())
    }

    fn create_session(&self) -> Result<Self::Session, ConnectionFault> {
        if self.is_closed() {
            return Err(ConnectionFault::Closed);
        }
        Ok(InMemorySession {
            broker: self.broker.clone(),
            connection: Arc::clone(&self.shared),
        })
    }

    fn close(&self) -> Result<(), ConnectionFault> {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let subscriptions: Vec<_> = self.shared.subscriptions.lock().drain(..).collect();
        for sub in &subscriptions {
            self.broker.detach(sub);
            sub.wake();
        }

        let current = thread::current().id();
        let deliveries: Vec<_> = self.shared.deliveries.lock().drain(..).collect();
        for handle in deliveries {
            // A callback closing its own connection must not join itself.
            if handle.thread().id() != current && handle.join().is_err() {
                warn!("in-memory delivery thread panicked");
            }
        }

        debug!(client_id = ?self.client_id, "closed in-memory connection");
        Ok(())
    }
}

impl Drop for InMemoryConnection {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

/// Session on an [`InMemoryConnection`].
pub struct InMemorySession {
    broker: InMemoryBroker,
    connection: Arc<ConnectionShared>,
}

impl Session for InMemorySession {
    type Consumer = InMemoryConsumer;

    fn create_consumer(
        &self,
        destination: &Destination,
        selector: Option<&str>,
    ) -> Result<Self::Consumer, ConnectionFault> {
        if self.connection.closed.load(Ordering::SeqCst) {
            return Err(ConnectionFault::Closed);
        }
        let selector = selector.map(Selector::parse).transpose()?;

        let subscription = Arc::new(Subscription {
            destination: destination.clone(),
            selector,
            queue: Mutex::new(VecDeque::new()),
            available: Condvar::new(),
            has_callback: AtomicBool::new(false),
            connection: Arc::clone(&self.connection),
        });
        self.connection
            .subscriptions
            .lock()
            .push(Arc::clone(&subscription));
        self.broker.attach(&subscription);

        debug!(%destination, "created in-memory consumer");
        Ok(InMemoryConsumer { subscription })
    }
}

/// Consumer on an [`InMemorySession`].
pub struct InMemoryConsumer {
    subscription: Arc<Subscription>,
}

impl Consumer for InMemoryConsumer {
    fn receive(&self, timeout: Duration) -> Result<Option<BrokerMessage>, ConnectionFault> {
        if self.subscription.has_callback.load(Ordering::SeqCst) {
            return Err(ConnectionFault::Transport(
                "receive is not allowed on a consumer with a callback".into(),
            ));
        }
        self.subscription.take(Instant::now().checked_add(timeout))
    }

    fn set_callback(&self, listener: MessageListener) -> Result<(), ConnectionFault> {
        let sub = Arc::clone(&self.subscription);
        if sub.connection.closed.load(Ordering::SeqCst) {
            return Err(ConnectionFault::Closed);
        }
        if sub.has_callback.swap(true, Ordering::SeqCst) {
            return Err(ConnectionFault::Transport(
                "consumer already has a callback".into(),
            ));
        }

        let name = format!("in-memory-delivery-{}", sub.destination.name());
        let connection = Arc::clone(&sub.connection);
        let handle = thread::Builder::new()
            .name(name)
            .spawn(move || loop {
                match sub.take(Some(Instant::now() + DELIVERY_POLL)) {
                    Ok(Some(message)) => listener(message),
                    Ok(None) => {}
                    Err(_) => break,
                }
            })
            .map_err(|e| ConnectionFault::Transport(e.to_string()))?;

        connection.deliveries.lock().push(handle);
        Ok(())
    }
}
