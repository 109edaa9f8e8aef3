//! The queue facade and its collaborators.
//!
//! [`Queue`] coordinates three leaves under one exclusion domain: the
//! admission strategy (what happens when a bounded buffer is full), the
//! waiter bookkeeping (parked producers and consumers in FIFO order), and
//! the monotonic completion state machine. Every public operation executes
//! as one atomic transition; no caller ever observes a partially updated
//! queue.
//!
//! # Suspension
//!
//! `offer`/`offer_all` suspend under the `Suspend` strategy when the buffer
//! is full; `take`/`take_n`/`take_all` suspend while the buffer is
//! insufficient and the queue is open; `await_done` suspends until the
//! queue is closed and drained. `try_take`, `end`, `fail`, `complete`,
//! `shutdown`, `len`, and the other accessors never suspend.

mod futures;
mod state;
mod waiters;

pub use futures::{
    AwaitDoneFuture, OfferAllFuture, OfferFuture, TakeAllFuture, TakeFuture, TakeNFuture,
};

use std::fmt;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};

use crate::cx::Cx;
use crate::types::{AdmissionStrategy, Capacity};

use self::state::State;
use self::waiters::WakeList;

/// Construction options for a queue: capacity plus admission strategy.
///
/// ```ignore
/// let options = QueueOptions::bounded(64).with_strategy(AdmissionStrategy::Sliding);
/// let queue: Queue<u32, String> = Queue::with_options(options);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueOptions {
    /// Buffer capacity. `Bounded(0)` is a rendezvous queue.
    pub capacity: Capacity,
    /// Admission policy for a full bounded buffer. Ignored when unbounded.
    pub strategy: AdmissionStrategy,
}

impl QueueOptions {
    /// Bounded capacity with the default backpressure strategy.
    #[must_use]
    pub const fn bounded(capacity: usize) -> Self {
        Self {
            capacity: Capacity::Bounded(capacity),
            strategy: AdmissionStrategy::Suspend,
        }
    }

    /// Unbounded capacity; the strategy is irrelevant.
    #[must_use]
    pub const fn unbounded() -> Self {
        Self {
            capacity: Capacity::Unbounded,
            strategy: AdmissionStrategy::Suspend,
        }
    }

    /// Replaces the admission strategy.
    #[must_use]
    pub const fn with_strategy(mut self, strategy: AdmissionStrategy) -> Self {
        self.strategy = strategy;
        self
    }
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self::unbounded()
    }
}

struct Shared<T, E> {
    state: StdMutex<State<T, E>>,
}

/// A concurrent FIFO queue coordinating producer and consumer fibers.
///
/// The handle is cheap to clone and safely shared by any number of
/// producers and consumers; no external locking is required. `E` is the
/// domain failure type delivered through [`Queue::fail`] — it must be
/// `Clone` because a stored failure may fan out to several completion
/// awaiters.
pub struct Queue<T, E> {
    shared: Arc<Shared<T, E>>,
}

impl<T, E> Clone for Queue<T, E> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T, E> fmt::Debug for Queue<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Queue").finish_non_exhaustive()
    }
}

impl<T, E: Clone> Queue<T, E> {
    /// Creates a queue from explicit options.
    #[must_use]
    pub fn with_options(options: QueueOptions) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: StdMutex::new(State::new(options.capacity, options.strategy)),
            }),
        }
    }

    /// A bounded queue with backpressure: offers park when full.
    ///
    /// Capacity 0 creates a rendezvous queue: an offer succeeds only once a
    /// matching take is parked.
    #[must_use]
    pub fn bounded(capacity: usize) -> Self {
        Self::with_options(QueueOptions::bounded(capacity))
    }

    /// An unbounded queue: offers never park and never drop.
    #[must_use]
    pub fn unbounded() -> Self {
        Self::with_options(QueueOptions::unbounded())
    }

    /// A bounded queue that rejects items beyond capacity, keeping the
    /// earliest.
    #[must_use]
    pub fn dropping(capacity: usize) -> Self {
        Self::with_options(
            QueueOptions::bounded(capacity).with_strategy(AdmissionStrategy::Dropping),
        )
    }

    /// A bounded queue that evicts the oldest items to admit the newest.
    #[must_use]
    pub fn sliding(capacity: usize) -> Self {
        Self::with_options(
            QueueOptions::bounded(capacity).with_strategy(AdmissionStrategy::Sliding),
        )
    }

    pub(crate) fn state(&self) -> MutexGuard<'_, State<T, E>> {
        self.shared.state.lock().expect("queue lock poisoned")
    }

    // ── Offer path ──────────────────────────────────────────────────────

    /// Offers one item.
    ///
    /// Resolves to `true` once the item is admitted. Under the `Suspend`
    /// strategy a full buffer parks the caller until a consumer frees
    /// space or the queue completes; `Dropping`/`Sliding`/unbounded offers
    /// resolve immediately. Never fails: a completed queue or a rejected
    /// item yields `false`.
    pub fn offer<'a, 'b>(&'a self, cx: &'b Cx, item: T) -> OfferFuture<'a, 'b, T, E> {
        OfferFuture::new(self, cx, item)
    }

    /// Offers a batch as one coordinated call.
    ///
    /// Resolves to the sub-sequence of `items` that could **not** be
    /// admitted (empty on full success). Relative order between the
    /// admitted prefix and the returned remainder is preserved. Under
    /// `Suspend` the batch may be admitted incrementally across several
    /// wake cycles as consumers free space.
    pub fn offer_all<'a, 'b>(
        &'a self,
        cx: &'b Cx,
        items: Vec<T>,
    ) -> OfferAllFuture<'a, 'b, T, E> {
        OfferAllFuture::new(self, cx, items)
    }

    // ── Take path ───────────────────────────────────────────────────────

    /// Takes the oldest item, parking while the queue is open and empty.
    ///
    /// On a completed queue this fails with
    /// [`TakeError::Done`](crate::error::TakeError::Done) once drained —
    /// except that a queue closed by [`Queue::fail`] delivers the stored
    /// failure to exactly one consumer first.
    pub fn take<'a, 'b>(&'a self, cx: &'b Cx) -> TakeFuture<'a, 'b, T, E> {
        TakeFuture::new(self, cx)
    }

    /// Takes exactly `n` items, in order, parking until enough arrive.
    ///
    /// Completion short-circuits the wait: partial progress is restored to
    /// the buffer and the caller receives the completion signal.
    pub fn take_n<'a, 'b>(&'a self, cx: &'b Cx, n: usize) -> TakeNFuture<'a, 'b, T, E> {
        TakeNFuture::new(self, cx, n)
    }

    /// Drains everything currently buffered, regardless of completion
    /// state. Parks only when the queue is open and empty, then resolves
    /// with whatever becomes available next.
    pub fn take_all<'a, 'b>(&'a self, cx: &'b Cx) -> TakeAllFuture<'a, 'b, T, E> {
        TakeAllFuture::new(self, cx)
    }

    /// Takes the oldest item if one is immediately available. Never parks.
    #[must_use]
    pub fn try_take(&self) -> Option<T> {
        let mut wake = WakeList::new();
        let item = {
            let mut state = self.state();
            let item = state.pull_one(&mut wake);
            state.maybe_finalize(&mut wake);
            item
        };
        wake.wake_all();
        item
    }

    // ── Completion protocol ─────────────────────────────────────────────

    /// Requests a graceful close. Idempotent.
    ///
    /// Buffered items and already-queued offers are still delivered; once
    /// drained the queue settles and further takes see `Done`. Offers made
    /// after this call resolve to `false` without mutating the buffer.
    pub fn end(&self) {
        let mut wake = WakeList::new();
        self.state().end(&mut wake);
        wake.wake_all();
    }

    /// Requests a close carrying a terminal domain failure. Idempotent.
    ///
    /// Buffered items are still delivered in order; once the buffer is
    /// exhausted the failure is handed to exactly one consumer, after
    /// which the queue behaves as `Done`.
    pub fn fail(&self, error: E) {
        let mut wake = WakeList::new();
        self.state().fail(error, &mut wake);
        wake.wake_all();
    }

    /// Dispatches to [`Queue::end`] on `Ok` and [`Queue::fail`] on `Err`.
    pub fn complete(&self, result: Result<(), E>) {
        match result {
            Ok(()) => self.end(),
            Err(error) => self.fail(error),
        }
    }

    /// Immediate hard stop. Idempotent.
    ///
    /// The buffer is discarded and every parked producer and consumer is
    /// resolved at once; no item offered after this call is ever
    /// delivered.
    pub fn shutdown(&self) {
        let mut wake = WakeList::new();
        self.state().shutdown(&mut wake);
        wake.wake_all();
    }

    /// Suspends until the queue is closed **and** fully drained.
    ///
    /// Resolves `Ok(())` after a graceful end or a shutdown, and
    /// `Err(TakeError::Failed(e))` when the queue was closed by
    /// [`Queue::fail`].
    pub fn await_done<'a, 'b>(&'a self, cx: &'b Cx) -> AwaitDoneFuture<'a, 'b, T, E> {
        AwaitDoneFuture::new(self, cx)
    }

    // ── Accessors (never suspend) ───────────────────────────────────────

    /// Number of currently buffered items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state().buffer.len()
    }

    /// True if nothing is buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state().buffer.is_empty()
    }

    /// True once `end`, `fail`, or `shutdown` has been requested.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        !self.state().lifecycle.is_open()
    }

    /// True if the queue was hard-stopped via [`Queue::shutdown`].
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.state()
            .lifecycle
            .reason()
            .is_some_and(crate::types::CloseReason::is_shutdown)
    }

    /// The configured capacity.
    #[must_use]
    pub fn capacity(&self) -> Capacity {
        self.state().capacity
    }

    /// The configured admission strategy.
    #[must_use]
    pub fn strategy(&self) -> AdmissionStrategy {
        self.state().strategy
    }
}
