//! The listener coordinator.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error, info};
use uuid::Uuid;

use super::subject::{CancelHandle, IntakeState, IntakeSubject, ProgressState};
use super::{
    parse_message, DefaultHandler, MessageParser, MessageResult, ResultBuffer, ResultHandler,
};
use crate::bus::{BrokerMessage, Connection, Connector, Consumer, MessageListener, Session};
use crate::config::{Broker, BrokerConfig};
use crate::error::{ConnectionFault, ListenerError, Result};

/// Prefix of every listener's client identity.
pub const CLIENT_ID_PREFIX: &str = "bus-listener";

/// Topic listened on unless overridden with [`BusListener::with_topic`].
pub const DEFAULT_TOPIC: &str = "VirtualTopic.qe.ci";

/// Granularity of the wait loop unless overridden.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Ticks between progress log lines in the wait loop.
const PROGRESS_LOG_TICKS: u64 = 10;

/// Why [`BusListener::listen_until`] returned.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopReason {
    /// The message count reached the requested maximum
    CountReached,
    /// The timeout elapsed first
    TimedOut,
    /// A [`CancelHandle`] asked to stop
    Cancelled,
    /// The intake had already completed before or during the wait
    AlreadyCompleted,
}

/// Outcome of a [`BusListener::listen_until`] call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ListenSummary {
    /// Messages handled when the loop stopped
    pub received: u64,
    /// Time spent in the loop
    pub elapsed: Duration,
    pub reason: StopReason,
}

/// Listens on a broker and feeds every message through an [`IntakeSubject`].
///
/// One listener owns one subject and one result history. Messages arrive via
/// [`tap_into_bus`](Self::tap_into_bus) (callback delivery on the connector's
/// thread) and [`listen_until`](Self::listen_until) blocks the caller until
/// enough messages arrived or time ran out.
///
/// ## Example
///
/// ```
/// use std::time::Duration;
/// use bus_listener::bus::{BrokerMessage, Connection, Destination, InMemoryBroker};
/// use bus_listener::config::{Broker, BrokerConfig};
/// use bus_listener::listener::{BusListener, DefaultHandler, StopReason};
///
/// let broker = InMemoryBroker::new("vm://ci");
/// let config = BrokerConfig::new("ci", Broker::new("vm://ci"));
/// let listener = BusListener::<(), _>::with_config(broker.clone(), DefaultHandler, config)
///     .unwrap()
///     .with_poll_interval(Duration::from_millis(10));
///
/// let conn = listener.subscribe("team = 'qe'").unwrap();
/// broker.publish(
///     &Destination::Topic(listener.topic().to_string()),
///     BrokerMessage::text(r#"{"status":"passed"}"#).with_property("team", "qe"),
/// );
///
/// let summary = listener.listen_until(Duration::from_secs(5), 1);
/// assert_eq!(summary.reason, StopReason::CountReached);
/// assert_eq!(listener.message_count(), 1);
/// conn.close().unwrap();
/// ```
pub struct BusListener<T, C: Connector> {
    connector: C,
    config: BrokerConfig,
    broker: Broker,
    topic: String,
    client_id: String,
    poll_interval: Duration,
    subject: Arc<IntakeSubject<T>>,
}

impl<T, C> BusListener<T, C>
where
    T: Send + 'static,
    C: Connector,
{
    /// Build a listener from the configuration at [`BrokerConfig::default_path`].
    pub fn new(connector: C, handler: impl ResultHandler<T> + 'static) -> Result<Self> {
        Self::with_config(connector, handler, BrokerConfig::load_default()?)
    }

    /// Build a listener from a configuration file.
    pub fn from_path(
        connector: C,
        handler: impl ResultHandler<T> + 'static,
        path: impl AsRef<std::path::Path>,
    ) -> Result<Self> {
        Self::with_config(connector, handler, BrokerConfig::from_path(path)?)
    }

    /// Build a listener from an already loaded configuration.
    pub fn with_config(
        connector: C,
        handler: impl ResultHandler<T> + 'static,
        config: BrokerConfig,
    ) -> Result<Self> {
        let broker = config.default_broker()?.clone();
        let client_id = format!("{}.{}", CLIENT_ID_PREFIX, Uuid::new_v4());
        let subject = IntakeSubject::new(
            client_id.clone(),
            Arc::new(handler),
            ResultBuffer::new(),
        );

        debug!(%client_id, url = %broker.url, "created bus listener");
        Ok(Self {
            connector,
            config,
            broker,
            topic: DEFAULT_TOPIC.to_string(),
            client_id,
            poll_interval: DEFAULT_POLL_INTERVAL,
            subject: Arc::new(subject),
        })
    }

    /// Listen on a different topic.
    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = topic.into();
        self
    }

    /// Change the wait-loop granularity.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval.max(Duration::from_millis(1));
        self
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn broker(&self) -> &Broker {
        &self.broker
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    /// The queue a virtual topic feeds for this listener's identity.
    pub fn consumer_queue(&self) -> String {
        format!("Consumer.{}.{}", self.client_id, self.topic)
    }

    pub fn subject(&self) -> &IntakeSubject<T> {
        &self.subject
    }

    pub fn state(&self) -> IntakeState {
        self.subject.state()
    }

    /// Messages handled so far; frozen once the intake completes.
    pub fn message_count(&self) -> u64 {
        self.subject.count()
    }

    pub fn fault_count(&self) -> u64 {
        self.subject.fault_count()
    }

    /// Reconfigure the result history capacity.
    pub fn set_capacity(&self, capacity: usize) -> Result<()> {
        if capacity == 0 {
            return Err(ListenerError::Precondition(
                "result buffer capacity must be at least 1".into(),
            ));
        }
        self.subject.resize(capacity);
        Ok(())
    }

    pub fn capacity(&self) -> usize {
        self.subject.capacity()
    }

    /// Pop the oldest buffered result.
    pub fn take_oldest(&self) -> Result<MessageResult<T>> {
        self.subject.take_oldest()
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.subject.cancel_handle()
    }

    /// Fire the complete signal now. Returns `false` if it had already fired.
    pub fn complete(&self) -> bool {
        self.subject.complete()
    }

    /// The default message parser.
    pub fn message_parser(&self) -> MessageParser {
        parse_message
    }

    /// A connector callback that parses each message with `parser` and feeds
    /// the result into this listener's intake.
    pub fn create_listener(&self, parser: MessageParser) -> MessageListener {
        let subject = Arc::clone(&self.subject);
        Arc::new(move |message: BrokerMessage| match parser(&message) {
            Ok(document) => {
                subject.next(document);
            }
            Err(e) => subject.error(&e),
        })
    }

    /// Block for one message on the listener's topic.
    ///
    /// Returns the open connection together with the message; closing it is
    /// up to the caller. Returns `None` on timeout and also when the broker
    /// could not be reached; the fault is only logged. Use
    /// [`try_receive_once`](Self::try_receive_once) to tell the two apart.
    ///
    /// An empty selector is a [`ListenerError::Precondition`].
    pub fn receive_once(&self, selector: &str) -> Result<Option<(C::Connection, BrokerMessage)>> {
        match self.try_receive_once(selector) {
            Err(ListenerError::Connection(fault)) => {
                error!(client_id = %self.client_id, error = %fault, "receive failed");
                Ok(None)
            }
            other => other,
        }
    }

    /// Like [`receive_once`](Self::receive_once) but connection faults are returned.
    pub fn try_receive_once(
        &self,
        selector: &str,
    ) -> Result<Option<(C::Connection, BrokerMessage)>> {
        if selector.trim().is_empty() {
            return Err(ListenerError::Precondition(
                "must supply a value for the selector".into(),
            ));
        }

        let connection = self.connect()?;
        match self.receive_on(&connection, selector) {
            Ok(Some(message)) => Ok(Some((connection, message))),
            Ok(None) => {
                debug!(client_id = %self.client_id, selector, "no message before timeout");
                close_quietly(&connection);
                Ok(None)
            }
            Err(fault) => {
                close_quietly(&connection);
                Err(fault.into())
            }
        }
    }

    fn receive_on(
        &self,
        connection: &C::Connection,
        selector: &str,
    ) -> std::result::Result<Option<BrokerMessage>, ConnectionFault> {
        let session = connection.create_session()?;
        let topic = session.create_topic(&self.topic);
        debug!(client_id = %self.client_id, selector, %topic, "waiting for message");
        connection.start()?;
        let consumer = session.create_consumer(&topic, Some(selector))?;
        consumer.receive(self.broker.message_timeout())
    }

    /// Register `listener` as the callback of a new consumer on the queue
    /// `destination` and start delivery.
    ///
    /// An empty selector subscribes unfiltered. The returned connection keeps
    /// the subscription alive; close it to stop. `None` means the subscription
    /// could not be set up; the fault is only logged.
    pub fn tap_into_bus(
        &self,
        selector: &str,
        listener: MessageListener,
        destination: &str,
    ) -> Option<C::Connection> {
        match self.try_tap_into_bus(selector, listener, destination) {
            Ok(connection) => Some(connection),
            Err(e) => {
                error!(
                    client_id = %self.client_id,
                    destination,
                    error = %e,
                    "could not tap into bus"
                );
                None
            }
        }
    }

    /// Like [`tap_into_bus`](Self::tap_into_bus) but faults are returned.
    pub fn try_tap_into_bus(
        &self,
        selector: &str,
        listener: MessageListener,
        destination: &str,
    ) -> Result<C::Connection> {
        let connection = self.connect()?;
        let subscribed = (|| {
            let session = connection.create_session()?;
            let queue = session.create_queue(destination);
            let selector = Some(selector).filter(|s| !s.trim().is_empty());
            let consumer = session.create_consumer(&queue, selector)?;
            consumer.set_callback(listener)?;
            connection.start()?;
            info!(client_id = %self.client_id, %queue, ?selector, "tapped into bus");
            Ok::<_, ConnectionFault>(())
        })();

        match subscribed {
            Ok(()) => {
                self.subject.mark_listening();
                Ok(connection)
            }
            Err(fault) => {
                close_quietly(&connection);
                Err(fault.into())
            }
        }
    }

    /// Tap into this listener's consumer queue with the default parser.
    pub fn subscribe(&self, selector: &str) -> Option<C::Connection> {
        let listener = self.create_listener(self.message_parser());
        self.tap_into_bus(selector, listener, &self.consumer_queue())
    }

    fn connect(&self) -> std::result::Result<C::Connection, ConnectionFault> {
        let mut connection = self
            .connector
            .open_connection(&self.broker.url, &self.broker.credentials())?;
        if let Err(fault) = connection.set_client_id(&self.client_id) {
            close_quietly(&connection);
            return Err(fault);
        }
        Ok(connection)
    }

    /// Wait with the broker's default timeout and message cap.
    pub fn listen(&self) -> ListenSummary {
        self.listen_until(self.broker.message_timeout(), self.broker.message_max())
    }

    /// Wait with the given timeout and the broker's default message cap.
    pub fn listen_for(&self, timeout: Duration) -> ListenSummary {
        self.listen_until(timeout, self.broker.message_max())
    }

    /// Wait for `max_count` messages with the broker's default timeout.
    pub fn listen_until_count(&self, max_count: u64) -> ListenSummary {
        self.listen_until(self.broker.message_timeout(), max_count)
    }

    /// Block until `max_count` messages were handled, `timeout` elapsed, or a
    /// cancel was requested, then fire the complete signal.
    ///
    /// The loop ticks every poll interval and logs progress every ten ticks;
    /// new messages and cancel requests wake it immediately. A timeout too
    /// large to represent as an instant (e.g. [`Duration::MAX`]) means no
    /// time limit.
    pub fn listen_until(&self, timeout: Duration, max_count: u64) -> ListenSummary {
        let start = Instant::now();
        let deadline = start.checked_add(timeout);
        self.subject.mark_listening();
        info!(
            client_id = %self.client_id,
            timeout_ms = timeout.as_millis() as u64,
            max_count,
            "begin listening for messages"
        );

        let progress = self.subject.progress();
        let mut ticks: u64 = 0;
        let mut next_tick = start.checked_add(self.poll_interval);
        let mut state = progress.lock();

        let (reason, received) = loop {
            if let Some(reason) = stop_reason(&state, max_count) {
                break (reason, state.count);
            }
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                break (StopReason::TimedOut, state.count);
            }

            match earliest(next_tick, deadline) {
                Some(until) => progress.wait_until(&mut state, until),
                None => progress.wait(&mut state),
            }

            if let Some(tick) = next_tick.filter(|tick| Instant::now() >= *tick) {
                ticks += 1;
                next_tick = tick.checked_add(self.poll_interval);
                if ticks % PROGRESS_LOG_TICKS == 0 {
                    info!(
                        client_id = %self.client_id,
                        count = state.count,
                        waited_secs = start.elapsed().as_secs(),
                        "waiting on messages"
                    );
                }
            }
        };
        // Complete under the deciding guard: the frozen count equals `received`.
        let fired = self.subject.complete_locked(&mut state);
        drop(state);
        if fired {
            progress.notify();
        }

        let summary = ListenSummary {
            received,
            elapsed: start.elapsed(),
            reason,
        };
        info!(
            client_id = %self.client_id,
            reason = ?summary.reason,
            received,
            "finished listening"
        );
        summary
    }
}

impl<T, C> BusListener<T, C>
where
    T: Clone + Send + 'static,
    C: Connector,
{
    /// Snapshot of the buffered results, oldest first.
    pub fn results(&self) -> Vec<MessageResult<T>> {
        self.subject.results()
    }
}

impl<C: Connector> BusListener<(), C> {
    /// A listener that keeps non-empty documents and no domain value.
    pub fn with_default_handler(connector: C, config: BrokerConfig) -> Result<Self> {
        Self::with_config(connector, DefaultHandler, config)
    }
}

fn stop_reason(state: &ProgressState, max_count: u64) -> Option<StopReason> {
    if state.lifecycle == IntakeState::Completed {
        Some(StopReason::AlreadyCompleted)
    } else if state.count >= max_count {
        Some(StopReason::CountReached)
    } else if state.cancelled {
        Some(StopReason::Cancelled)
    } else {
        None
    }
}

fn earliest(a: Option<Instant>, b: Option<Instant>) -> Option<Instant> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

fn close_quietly<Conn: Connection>(connection: &Conn) {
    if let Err(fault) = connection.close() {
        debug!(error = %fault, "error closing connection");
    }
}
