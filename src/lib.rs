pub mod bus;
pub mod config;
mod error;
pub mod listener;
pub mod logging;

pub use config::{Broker, BrokerConfig};
pub use error::{ConnectionFault, FormatError, ListenerError, Result};
pub use listener::{
    BusListener, CancelHandle, DefaultHandler, Document, IntakeState, ListenSummary,
    MessageResult, ResultHandler, StopReason,
};
pub use logging::init_tracing;
