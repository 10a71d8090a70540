//! Listening for broker messages and collecting typed results.
//!
//! ```text
//! broker ──► MessageListener ──► parse_message ──► IntakeSubject ──► ResultHandler
//!                                     │                  │                 │
//!                                 FormatError         count            ResultBuffer
//!                                  (error)              │
//!                                                 listen_until waits here
//! ```

mod buffer;
mod coordinator;
mod normalizer;
mod result;
mod subject;

// Normalization
pub use normalizer::{parse_message, Document, MessageParser, TEXT_ROOT_FIELD};

// Results
pub use buffer::{ResultBuffer, DEFAULT_CAPACITY};
pub use result::{DefaultHandler, MessageResult, ResultHandler};

// Intake
pub use subject::{CancelHandle, IntakeState, IntakeSubject};

// Coordinator
pub use coordinator::{
    BusListener, ListenSummary, StopReason, CLIENT_ID_PREFIX, DEFAULT_POLL_INTERVAL,
    DEFAULT_TOPIC,
};
