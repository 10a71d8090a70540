//! The intake subject: one fixed subscriber with `next`, `error` and
//! `complete` signals.
//!
//! `next` runs the result handler, counts the message and appends the result
//! to the history buffer. `complete` moves the subject to
//! [`IntakeState::Completed`], after which every further signal is ignored,
//! so the message count is frozen from then on.
//!
//! Signals may arrive from a connector's delivery thread while another thread
//! waits in [`BusListener::listen_until`](super::BusListener::listen_until);
//! all state sits behind a mutex and every change wakes waiters.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::{debug, error, info};

use super::{Document, MessageResult, ResultBuffer, ResultHandler};
use crate::error::Result;

/// Lifecycle of a listener's intake.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IntakeState {
    /// Constructed, no subscription yet
    Idle,
    /// Subscribed or waiting for messages
    Listening,
    /// Complete signal fired; terminal
    Completed,
}

impl fmt::Display for IntakeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IntakeState::Idle => write!(f, "idle"),
            IntakeState::Listening => write!(f, "listening"),
            IntakeState::Completed => write!(f, "completed"),
        }
    }
}

/// Counters and lifecycle shared with waiters and cancel handles.
pub(crate) struct Progress {
    state: Mutex<ProgressState>,
    changed: Condvar,
}

pub(crate) struct ProgressState {
    pub(crate) lifecycle: IntakeState,
    pub(crate) count: u64,
    pub(crate) faults: u64,
    pub(crate) cancelled: bool,
}

impl Progress {
    fn new() -> Self {
        Self {
            state: Mutex::new(ProgressState {
                lifecycle: IntakeState::Idle,
                count: 0,
                faults: 0,
                cancelled: false,
            }),
            changed: Condvar::new(),
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, ProgressState> {
        self.state.lock()
    }

    /// Wait for a change or until `deadline`.
    pub(crate) fn wait_until(
        &self,
        guard: &mut MutexGuard<'_, ProgressState>,
        deadline: Instant,
    ) {
        let _ = self.changed.wait_until(guard, deadline);
    }

    pub(crate) fn wait(&self, guard: &mut MutexGuard<'_, ProgressState>) {
        self.changed.wait(guard);
    }

    pub(crate) fn notify(&self) {
        self.changed.notify_all();
    }
}

/// Requests an early stop of [`BusListener::listen_until`](super::BusListener::listen_until).
///
/// Cloneable and usable from any thread. Cancelling does not complete the
/// intake by itself; the wait loop does that when it observes the request.
#[derive(Clone)]
pub struct CancelHandle {
    progress: Arc<Progress>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.progress.lock().cancelled = true;
        self.progress.notify();
    }

    pub fn is_cancelled(&self) -> bool {
        self.progress.lock().cancelled
    }
}

/// Single-subscriber event stream feeding the result buffer.
pub struct IntakeSubject<T> {
    label: String,
    handler: Arc<dyn ResultHandler<T>>,
    buffer: Mutex<ResultBuffer<MessageResult<T>>>,
    progress: Arc<Progress>,
}

impl<T> IntakeSubject<T> {
    /// Wire the subject to `handler`. `label` tags log events.
    pub fn new(
        label: impl Into<String>,
        handler: Arc<dyn ResultHandler<T>>,
        buffer: ResultBuffer<MessageResult<T>>,
    ) -> Self {
        Self {
            label: label.into(),
            handler,
            buffer: Mutex::new(buffer),
            progress: Arc::new(Progress::new()),
        }
    }

    /// Handle one document. Returns `false` if the subject is already completed.
    pub fn next(&self, document: Document) -> bool {
        if self.state() == IntakeState::Completed {
            debug!(listener = %self.label, "intake completed; dropping message");
            return false;
        }

        let result = self.handler.handle(document);

        let mut progress = self.progress.lock();
        if progress.lifecycle == IntakeState::Completed {
            debug!(listener = %self.label, "intake completed while handling; dropping result");
            return false;
        }
        progress.count += 1;
        self.buffer.lock().append(result);
        debug!(listener = %self.label, count = progress.count, "message handled");
        drop(progress);

        self.progress.notify();
        true
    }

    /// Record a fault. The stream stays open.
    pub fn error(&self, fault: &dyn std::error::Error) {
        let mut progress = self.progress.lock();
        if progress.lifecycle == IntakeState::Completed {
            debug!(listener = %self.label, error = %fault, "intake completed; ignoring fault");
            return;
        }
        progress.faults += 1;
        error!(
            listener = %self.label,
            error = %fault,
            faults = progress.faults,
            "failed to process message"
        );
    }

    /// Fire the complete signal. Returns `false` if it had already fired.
    pub fn complete(&self) -> bool {
        let mut progress = self.progress.lock();
        let fired = self.complete_locked(&mut progress);
        drop(progress);

        if fired {
            self.progress.notify();
        }
        fired
    }

    /// Fire the complete signal while the caller already holds the progress
    /// lock. The caller notifies waiters after releasing it.
    pub(crate) fn complete_locked(&self, progress: &mut ProgressState) -> bool {
        if progress.lifecycle == IntakeState::Completed {
            return false;
        }
        progress.lifecycle = IntakeState::Completed;
        info!(listener = %self.label, count = progress.count, "stop listening");
        true
    }

    /// Idle → Listening. No effect in any other state.
    pub fn mark_listening(&self) {
        let mut progress = self.progress.lock();
        if progress.lifecycle == IntakeState::Idle {
            progress.lifecycle = IntakeState::Listening;
        }
    }

    pub fn state(&self) -> IntakeState {
        self.progress.lock().lifecycle
    }

    /// Messages handled so far.
    pub fn count(&self) -> u64 {
        self.progress.lock().count
    }

    /// Faults recorded through [`error`](Self::error).
    pub fn fault_count(&self) -> u64 {
        self.progress.lock().faults
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            progress: Arc::clone(&self.progress),
        }
    }

    pub(crate) fn progress(&self) -> &Progress {
        &self.progress
    }

    pub fn resize(&self, capacity: usize) {
        self.buffer.lock().resize(capacity);
    }

    pub fn capacity(&self) -> usize {
        self.buffer.lock().capacity()
    }

    pub fn buffered(&self) -> usize {
        self.buffer.lock().len()
    }

    /// Pop the oldest buffered result.
    pub fn take_oldest(&self) -> Result<MessageResult<T>> {
        self.buffer.lock().remove_oldest()
    }
}

impl<T: Clone> IntakeSubject<T> {
    /// Snapshot of the buffered results, oldest first.
    pub fn results(&self) -> Vec<MessageResult<T>> {
        self.buffer.lock().iter().cloned().collect()
    }
}
