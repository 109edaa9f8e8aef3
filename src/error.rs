//! Error taxonomy for the take side of a queue.
//!
//! Structural completion signals are ordinary values, never panics: a
//! consumer recovers from [`TakeError::Done`] locally (the stream of items
//! simply ended), while [`TakeError::Failed`] carries the domain failure
//! supplied to [`Queue::fail`](crate::queue::Queue::fail) onward through the
//! caller's own failure channel.

use core::fmt;

/// Error returned by the take family of operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TakeError<E> {
    /// The queue is closed (for any reason) and fully drained; no item will
    /// ever arrive again.
    Done,
    /// The domain failure supplied to `fail`, delivered exactly once to
    /// exactly one consumer before the queue settles into `Done`.
    Failed(E),
    /// Cancelled while waiting for an item.
    Cancelled,
}

impl<E> TakeError<E> {
    /// Classifies this error as a completion signal rather than a domain
    /// failure.
    ///
    /// `Done` is the structural "no more items" signal; a caller that sees
    /// it should stop consuming, not propagate an error.
    #[must_use]
    pub const fn is_done(&self) -> bool {
        matches!(self, Self::Done)
    }

    /// The domain failure, if this error carries one.
    pub fn into_failure(self) -> Option<E> {
        match self {
            Self::Failed(e) => Some(e),
            Self::Done | Self::Cancelled => None,
        }
    }

    /// Maps the domain failure type.
    pub fn map_failure<F>(self, f: impl FnOnce(E) -> F) -> TakeError<F> {
        match self {
            Self::Done => TakeError::Done,
            Self::Failed(e) => TakeError::Failed(f(e)),
            Self::Cancelled => TakeError::Cancelled,
        }
    }
}

impl<E: fmt::Display> fmt::Display for TakeError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Done => write!(f, "queue closed and drained"),
            Self::Failed(e) => write!(f, "queue failed: {e}"),
            Self::Cancelled => write!(f, "take cancelled while waiting"),
        }
    }
}

impl<E: fmt::Debug + fmt::Display> std::error::Error for TakeError<E> {}
