//! The abortable asynchronous start signal.
//!
//! `start` returns immediately; its outcome arrives later through a
//! single-assignment, tri-state signal. Exactly one of success, failure,
//! or abort is delivered — abort meaning no error occurred but the start
//! will not complete (the artifact was concurrently stopped, or the
//! initiator abandoned the wait). Driving the signal twice is a caller
//! contract violation; the first outcome wins and later attempts are
//! logged and ignored.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::warn;

/// Terminal outcome of an asynchronous start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    /// The start completed.
    Completed,
    /// The start failed with a cause.
    Failed(String),
    /// No error occurred, but the start will not complete.
    Aborted,
}

/// Result of a timeout-bounded wait on a signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalWait {
    /// The signal was driven.
    Complete(StartOutcome),
    /// The timeout elapsed first; the underlying start is not canceled.
    NotYetComplete,
}

/// Single-assignment completion signal for an asynchronous start.
///
/// Clones share the same slot; the completion side may live on a different
/// thread than the waiter.
#[derive(Debug, Clone)]
pub struct StartSignal {
    tx: Arc<watch::Sender<Option<StartOutcome>>>,
}

impl StartSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    /// Drive the signal with an outcome. Returns whether this call won the
    /// assignment; a signal that was already driven is left untouched.
    pub fn drive(&self, outcome: StartOutcome) -> bool {
        let mut accepted = false;
        self.tx.send_if_modified(|slot| {
            if slot.is_none() {
                *slot = Some(outcome.clone());
                accepted = true;
                true
            } else {
                false
            }
        });
        if !accepted {
            warn!(ignored = ?outcome, "start signal already driven; ignoring");
        }
        accepted
    }

    /// Signal successful completion.
    pub fn complete(&self) -> bool {
        self.drive(StartOutcome::Completed)
    }

    /// Signal failure with a cause.
    pub fn fail(&self, cause: impl Into<String>) -> bool {
        self.drive(StartOutcome::Failed(cause.into()))
    }

    /// Signal that the start will not complete, without an error.
    pub fn abort(&self) -> bool {
        self.drive(StartOutcome::Aborted)
    }

    /// The outcome, if the signal has been driven.
    pub fn outcome(&self) -> Option<StartOutcome> {
        self.tx.borrow().clone()
    }

    /// Wait up to `timeout` for the signal to be driven. On timeout the
    /// wait returns [`SignalWait::NotYetComplete`] without canceling the
    /// underlying start.
    pub async fn wait(&self, timeout: Duration) -> SignalWait {
        let mut rx = self.tx.subscribe();
        if let Some(outcome) = rx.borrow_and_update().clone() {
            return SignalWait::Complete(outcome);
        }
        // The watch ref borrows `rx`; copy the outcome out before the
        // borrow ends so the waiter owns what it returns.
        let outcome = match tokio::time::timeout(timeout, rx.wait_for(|slot| slot.is_some())).await
        {
            Ok(Ok(slot)) => slot.as_ref().cloned(),
            // Sender dropped or timeout: either way, not complete.
            Ok(Err(_)) | Err(_) => None,
        };
        match outcome {
            Some(outcome) => SignalWait::Complete(outcome),
            None => SignalWait::NotYetComplete,
        }
    }
}

impl Default for StartSignal {
    fn default() -> Self {
        Self::new()
    }
}
