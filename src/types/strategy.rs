//! Admission strategy applied when a bounded buffer is full at offer time.

use core::fmt;

/// Policy describing what happens to items that do not fit a full buffer.
///
/// The strategy is consulted only for bounded queues; unbounded capacity
/// admits everything and never parks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum AdmissionStrategy {
    /// Backpressure: park the producer until a consumer frees space.
    /// Parked producers are admitted in arrival order.
    #[default]
    Suspend,
    /// Reject items beyond capacity, keeping the earliest; the offer call
    /// reports which items were turned away and never parks.
    Dropping,
    /// Evict the oldest buffered items to admit the newest; never parks.
    Sliding,
}

impl AdmissionStrategy {
    /// True if an offer under this strategy can suspend the caller.
    #[must_use]
    pub const fn may_park(self) -> bool {
        matches!(self, Self::Suspend)
    }
}

impl fmt::Display for AdmissionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Suspend => write!(f, "suspend"),
            Self::Dropping => write!(f, "dropping"),
            Self::Sliding => write!(f, "sliding"),
        }
    }
}
