//! Queue capacity: bounded or unbounded.

use core::fmt;

/// The capacity of a queue buffer.
///
/// `Bounded(0)` is a rendezvous queue: an offer only succeeds while a
/// matching take is parked, so every item is handed straight from producer
/// to consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capacity {
    /// The buffer may grow without limit; offers never park and never drop.
    Unbounded,
    /// At most this many items may be buffered at once.
    Bounded(usize),
}

impl Capacity {
    /// True if this capacity is unbounded.
    #[must_use]
    pub const fn is_unbounded(self) -> bool {
        matches!(self, Self::Unbounded)
    }

    /// The configured bound, if any.
    #[must_use]
    pub const fn bound(self) -> Option<usize> {
        match self {
            Self::Unbounded => None,
            Self::Bounded(n) => Some(n),
        }
    }

    /// Free slots given the current buffered count.
    ///
    /// Unbounded capacity reports `usize::MAX`; a bounded buffer already at
    /// or transiently above its bound reports zero.
    #[must_use]
    pub const fn room(self, buffered: usize) -> usize {
        match self {
            Self::Unbounded => usize::MAX,
            Self::Bounded(n) => n.saturating_sub(buffered),
        }
    }
}

impl fmt::Display for Capacity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unbounded => write!(f, "unbounded"),
            Self::Bounded(n) => write!(f, "bounded({n})"),
        }
    }
}
