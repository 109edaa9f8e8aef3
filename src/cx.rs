//! Capability context for cooperative cancellation.
//!
//! Every suspending queue operation takes a `&Cx` and polls
//! [`Cx::checkpoint`] before touching shared state. Cancellation is
//! therefore observed at well-defined points: a parked offer resolves to
//! "not admitted", a parked take to
//! [`TakeError::Cancelled`](crate::error::TakeError::Cancelled), and in both
//! cases the queue's waiter bookkeeping is released without disturbing FIFO
//! order.
//!
//! The context is deliberately small: a shared cancel flag plus the most
//! severe [`CancelReason`] recorded so far. The owning scheduler requests
//! cancellation; the fiber observes it at its next checkpoint.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use crate::types::{CancelKind, CancelReason};

/// Shared cancellation state for one fiber.
#[derive(Debug)]
struct CxInner {
    /// Set once cancellation has been requested; read at every checkpoint.
    cancel_requested: AtomicBool,
    /// The strongest reason recorded so far.
    reason: StdMutex<Option<CancelReason>>,
}

/// Capability context handed to every suspending queue operation.
///
/// Cloning is cheap and shares the underlying cancellation state, so a
/// fiber and the scheduler that may cancel it hold the same view.
#[derive(Debug, Clone)]
pub struct Cx {
    inner: Arc<CxInner>,
}

impl Cx {
    /// Creates a fresh, un-cancelled context.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(CxInner {
                cancel_requested: AtomicBool::new(false),
                reason: StdMutex::new(None),
            }),
        }
    }

    /// Creates a context for tests.
    #[must_use]
    pub fn for_testing() -> Self {
        Self::new()
    }

    /// True if cancellation has been requested.
    #[must_use]
    pub fn is_cancel_requested(&self) -> bool {
        self.inner.cancel_requested.load(Ordering::Acquire)
    }

    /// Requests cancellation with the given reason.
    ///
    /// Racing requests keep the most severe reason (severity lattice, ties
    /// broken deterministically). Idempotent.
    pub fn cancel(&self, reason: CancelReason) {
        {
            let mut slot = self.inner.reason.lock().expect("cx reason lock poisoned");
            match slot.as_mut() {
                Some(existing) => {
                    existing.strengthen(&reason);
                }
                None => *slot = Some(reason),
            }
        }
        self.inner.cancel_requested.store(true, Ordering::Release);
    }

    /// Sets or clears the raw cancel flag.
    ///
    /// Test hook: clearing the flag does not erase a recorded reason.
    pub fn set_cancel_requested(&self, requested: bool) {
        if requested {
            self.cancel(CancelReason::new(CancelKind::User));
        } else {
            self.inner.cancel_requested.store(false, Ordering::Release);
        }
    }

    /// Observes cancellation.
    ///
    /// Returns the recorded [`CancelReason`] as an error once cancellation
    /// has been requested; otherwise `Ok(())`. Suspending operations call
    /// this at every poll.
    pub fn checkpoint(&self) -> Result<(), CancelReason> {
        if !self.is_cancel_requested() {
            return Ok(());
        }
        let reason = self
            .inner
            .reason
            .lock()
            .expect("cx reason lock poisoned")
            .clone()
            .unwrap_or_default();
        Err(reason)
    }

    /// Emits a trace event attributed to this fiber.
    ///
    /// Compiled to a no-op unless the `tracing-integration` feature is
    /// enabled.
    #[allow(unused_variables)]
    pub fn trace(&self, message: &str) {
        #[cfg(feature = "tracing-integration")]
        tracing::trace!(target: "aqueduct::cx", message);
    }
}

impl Default for Cx {
    fn default() -> Self {
        Self::new()
    }
}
