//! The monotonic completion state machine.
//!
//! A queue moves `Open → Closing(reason) → Closed(reason)` and never back.
//! Representing the phase and the terminal reason as one sum type makes
//! illegal combinations ("open but has a failure reason") unrepresentable.

use core::fmt;

/// Why a queue stopped accepting new items.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason<E> {
    /// Graceful end: buffered items and queued offers still drain.
    End,
    /// Domain failure: buffered items still drain, then the failure is
    /// delivered exactly once to one consumer.
    Failed(E),
    /// Hard stop: the buffer is discarded and every waiter resolved at once.
    Shutdown,
}

impl<E> CloseReason<E> {
    /// True if this reason carries a domain failure.
    #[must_use]
    pub const fn is_failure(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    /// True if this reason is a hard shutdown.
    #[must_use]
    pub const fn is_shutdown(&self) -> bool {
        matches!(self, Self::Shutdown)
    }
}

impl<E: fmt::Display> fmt::Display for CloseReason<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::End => write!(f, "end"),
            Self::Failed(e) => write!(f, "failed: {e}"),
            Self::Shutdown => write!(f, "shutdown"),
        }
    }
}

/// The lifecycle phase of a queue.
///
/// `Closing` means a terminal reason has been recorded but deliverable items
/// remain (buffered, or pending inside parked offers); `Closed` means the
/// queue has fully settled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lifecycle<E> {
    /// Accepting offers and serving takes.
    Open,
    /// A terminal reason is recorded; remaining items are still draining.
    Closing(CloseReason<E>),
    /// Fully settled; no item will ever be delivered again.
    Closed(CloseReason<E>),
}

// Manual impl: the derive would put a spurious `E: Default` bound on the
// type parameter.
impl<E> Default for Lifecycle<E> {
    fn default() -> Self {
        Self::Open
    }
}

impl<E> Lifecycle<E> {
    /// True while offers are still admitted.
    #[must_use]
    pub const fn is_open(&self) -> bool {
        matches!(self, Self::Open)
    }

    /// True once the queue has fully settled.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        matches!(self, Self::Closed(_))
    }

    /// The recorded terminal reason, if any.
    #[must_use]
    pub const fn reason(&self) -> Option<&CloseReason<E>> {
        match self {
            Self::Open => None,
            Self::Closing(reason) | Self::Closed(reason) => Some(reason),
        }
    }

    /// Records a terminal reason, moving `Open → Closing`.
    ///
    /// Returns `false` (and changes nothing) if a reason was already
    /// recorded — completion is first-writer-wins.
    pub fn begin_close(&mut self, reason: CloseReason<E>) -> bool {
        if self.is_open() {
            *self = Self::Closing(reason);
            true
        } else {
            false
        }
    }

    /// Moves `Closing → Closed`, keeping the recorded reason.
    ///
    /// Returns `true` if the transition happened. Calling this on an `Open`
    /// queue is a logic error and does nothing.
    pub fn finalize(&mut self) -> bool {
        match core::mem::take(self) {
            Self::Closing(reason) => {
                *self = Self::Closed(reason);
                true
            }
            other => {
                *self = other;
                false
            }
        }
    }
}
