//! The authoritative queue state machine.
//!
//! Everything mutable — buffer, lifecycle, parked takers, parked offerers,
//! completion awaiters — lives in one [`State`] value behind a single mutex
//! owned by the facade. Every public operation is one atomic transition on
//! this value; wakers are collected into a [`WakeList`] during the
//! transition and invoked only after the lock is released.
//!
//! # Invariants
//!
//! - Takers are parked only while the buffer is empty; after every
//!   transition either `takers` or `buffer` is empty.
//! - Offerers are parked only while the buffer is full (or capacity is
//!   zero); the head offerer is topped up first whenever space frees.
//! - A bounded buffer never exceeds its capacity outside the critical
//!   section; overshoot happens only transiently while items stream through
//!   to parked consumers or a sliding eviction runs.

use std::collections::VecDeque;
use std::task::Waker;

use crate::error::TakeError;
use crate::types::{AdmissionStrategy, Capacity, CloseReason, Lifecycle};

use super::waiters::{WaiterQueue, WakeList};

/// A parked consumer's request shape.
#[derive(Debug)]
pub(crate) enum TakerKind<T> {
    /// `take`: exactly one item.
    One,
    /// `take_n`: exactly `demand` items, accumulated across wake cycles.
    Exactly {
        /// Total number of items requested.
        demand: usize,
        /// Items already absorbed while parked.
        partial: Vec<T>,
    },
    /// `take_all` parked on an empty queue: whatever becomes available.
    Available,
}

impl<T> TakerKind<T> {
    /// How many more items this request can absorb right now.
    fn unfulfilled(&self) -> usize {
        match self {
            Self::One => 1,
            Self::Exactly { demand, partial } => demand.saturating_sub(partial.len()),
            Self::Available => usize::MAX,
        }
    }
}

/// A parked consumer continuation.
#[derive(Debug)]
pub(crate) struct Taker<T, E> {
    pub(crate) kind: TakerKind<T>,
    pub(crate) waker: Option<Waker>,
    pub(crate) outcome: Option<Result<Vec<T>, TakeError<E>>>,
}

/// A parked producer continuation holding its unadmitted items.
#[derive(Debug)]
pub(crate) struct Offerer<T> {
    pub(crate) pending: VecDeque<T>,
    pub(crate) waker: Option<Waker>,
    pub(crate) outcome: Option<OfferOutcome<T>>,
}

/// Resolution of a parked offer.
#[derive(Debug)]
pub(crate) enum OfferOutcome<T> {
    /// Every pending item was admitted.
    Admitted,
    /// The queue completed first; these items were never admitted.
    Rejected(VecDeque<T>),
}

/// A fiber waiting in `await_done` for the queue to settle.
#[derive(Debug)]
pub(crate) struct Awaiter<E> {
    pub(crate) waker: Option<Waker>,
    pub(crate) outcome: Option<Result<(), E>>,
}

/// What the state machine decided about an offered batch.
pub(crate) enum OfferDisposition<T> {
    /// Every item was admitted (buffered or handed to parked consumers).
    Admitted,
    /// These items were not admitted and never will be by this call.
    Rejected(VecDeque<T>),
    /// Backpressure: the caller must park with this remainder.
    MustPark(VecDeque<T>),
}

pub(crate) struct State<T, E> {
    pub(crate) buffer: VecDeque<T>,
    pub(crate) capacity: Capacity,
    pub(crate) strategy: AdmissionStrategy,
    pub(crate) lifecycle: Lifecycle<E>,
    /// One-shot flag: the stored failure has been handed to a consumer.
    failure_delivered: bool,
    pub(crate) takers: WaiterQueue<Taker<T, E>>,
    pub(crate) offerers: WaiterQueue<Offerer<T>>,
    pub(crate) awaiters: WaiterQueue<Awaiter<E>>,
}

impl<T, E: Clone> State<T, E> {
    pub(crate) fn new(capacity: Capacity, strategy: AdmissionStrategy) -> Self {
        Self {
            buffer: VecDeque::new(),
            capacity,
            strategy,
            lifecycle: Lifecycle::Open,
            failure_delivered: false,
            takers: WaiterQueue::new(),
            offerers: WaiterQueue::new(),
            awaiters: WaiterQueue::new(),
        }
    }

    /// Free buffer slots right now.
    fn room(&self) -> usize {
        self.capacity.room(self.buffer.len())
    }

    /// Summed unfulfilled demand of every parked consumer. Items admitted
    /// against this demand stream straight through the buffer inside the
    /// critical section.
    fn takers_demand(&self) -> usize {
        self.takers
            .queued()
            .fold(0_usize, |total, taker| total.saturating_add(taker.kind.unfulfilled()))
    }

    // ── Item movement ───────────────────────────────────────────────────

    /// Serves parked consumers from the buffer, oldest consumer first.
    /// Returns true if any item moved.
    fn flush_takers(&mut self, wake: &mut WakeList) -> bool {
        let mut progressed = false;
        while !self.buffer.is_empty() {
            let Some((_, taker)) = self.takers.front() else {
                break;
            };
            match &mut taker.kind {
                TakerKind::One => {
                    let item = self.buffer.pop_front().expect("buffer checked non-empty");
                    taker.outcome = Some(Ok(vec![item]));
                    wake.push(taker.waker.take());
                    self.takers.detach_front();
                    progressed = true;
                }
                TakerKind::Exactly { demand, partial } => {
                    while partial.len() < *demand {
                        let Some(item) = self.buffer.pop_front() else {
                            break;
                        };
                        partial.push(item);
                        progressed = true;
                    }
                    if partial.len() == *demand {
                        let items = core::mem::take(partial);
                        taker.outcome = Some(Ok(items));
                        wake.push(taker.waker.take());
                        self.takers.detach_front();
                    } else {
                        // Absorbed the whole buffer and still hungry; stays
                        // parked at the head so later consumers cannot
                        // overtake it.
                        break;
                    }
                }
                TakerKind::Available => {
                    let items: Vec<T> = self.buffer.drain(..).collect();
                    taker.outcome = Some(Ok(items));
                    wake.push(taker.waker.take());
                    self.takers.detach_front();
                    progressed = true;
                }
            }
        }
        progressed
    }

    /// Moves items from the head parked offerer into the buffer, bounded by
    /// free room plus parked-consumer demand. Returns true if any item
    /// moved or an offerer resolved.
    fn top_up_step(&mut self, wake: &mut WakeList) -> bool {
        let mut space = self.room().saturating_add(self.takers_demand());
        let mut progressed = false;
        loop {
            let Some((_, offerer)) = self.offerers.front() else {
                break;
            };
            while space > 0 {
                let Some(item) = offerer.pending.pop_front() else {
                    break;
                };
                self.buffer.push_back(item);
                space -= 1;
                progressed = true;
            }
            if offerer.pending.is_empty() {
                offerer.outcome = Some(OfferOutcome::Admitted);
                wake.push(offerer.waker.take());
                self.offerers.detach_front();
                progressed = true;
            } else {
                break;
            }
        }
        progressed
    }

    /// Runs flush/top-up to a fixpoint, then finalizes a drained `Closing`
    /// queue. Call after every mutation that moves items or waiters.
    pub(crate) fn rebalance(&mut self, wake: &mut WakeList) {
        loop {
            let flushed = self.flush_takers(wake);
            let topped = self.top_up_step(wake);
            if !flushed && !topped {
                break;
            }
        }
        self.maybe_finalize(wake);
    }

    /// Admits as much of `items` as the queue can absorb right now:
    /// buffer room first, then parked-consumer demand (items flow through
    /// the buffer to the consumers inside this same critical section).
    fn admit_now(&mut self, items: &mut VecDeque<T>, wake: &mut WakeList) {
        if items.is_empty() {
            return;
        }
        let space = self.room().saturating_add(self.takers_demand());
        if space == 0 {
            return;
        }
        let n = space.min(items.len());
        self.buffer.extend(items.drain(..n));
        self.flush_takers(wake);
    }

    /// One coordinated offer of a batch.
    pub(crate) fn offer_batch(
        &mut self,
        mut items: VecDeque<T>,
        wake: &mut WakeList,
    ) -> OfferDisposition<T> {
        if !self.lifecycle.is_open() {
            return OfferDisposition::Rejected(items);
        }
        self.admit_now(&mut items, wake);
        if items.is_empty() {
            return OfferDisposition::Admitted;
        }
        match self.strategy {
            AdmissionStrategy::Suspend => OfferDisposition::MustPark(items),
            AdmissionStrategy::Dropping => OfferDisposition::Rejected(items),
            AdmissionStrategy::Sliding => {
                // Admit everything, then evict from the front until the
                // bound holds again. Never parks.
                self.buffer.extend(items.drain(..));
                if let Capacity::Bounded(cap) = self.capacity {
                    while self.buffer.len() > cap {
                        self.buffer.pop_front();
                    }
                }
                self.rebalance(wake);
                OfferDisposition::Admitted
            }
        }
    }

    /// Pops one item, pulling straight from the head parked offerer when
    /// the buffer is empty (capacity-zero hand-off).
    pub(crate) fn pull_one(&mut self, wake: &mut WakeList) -> Option<T> {
        if let Some(item) = self.buffer.pop_front() {
            self.rebalance(wake);
            return Some(item);
        }
        let (_, offerer) = self.offerers.front()?;
        let item = offerer.pending.pop_front();
        if offerer.pending.is_empty() {
            offerer.outcome = Some(OfferOutcome::Admitted);
            wake.push(offerer.waker.take());
            self.offerers.detach_front();
        }
        if item.is_some() {
            self.rebalance(wake);
        }
        item
    }

    /// Drains everything available right now: the buffer, or — when the
    /// buffer is empty — every parked offerer's pending items (rendezvous
    /// hand-off). Parked offerers whose items remain unbuffered are *not*
    /// drained while the buffer has content; they top up for the next call.
    pub(crate) fn drain_available(&mut self, wake: &mut WakeList) -> Vec<T> {
        let mut items: Vec<T> = self.buffer.drain(..).collect();
        if items.is_empty() {
            while let Some((_, offerer)) = self.offerers.front() {
                items.extend(offerer.pending.drain(..));
                offerer.outcome = Some(OfferOutcome::Admitted);
                wake.push(offerer.waker.take());
                self.offerers.detach_front();
            }
        }
        self.rebalance(wake);
        items
    }

    /// Pushes items back onto the front of the buffer in their original
    /// order. Used when a consumer is cancelled or short-circuited after
    /// partial progress: buffered data is never lost.
    pub(crate) fn restore_front(&mut self, items: Vec<T>) {
        for item in items.into_iter().rev() {
            self.buffer.push_front(item);
        }
    }

    // ── Completion protocol ─────────────────────────────────────────────

    /// The signal a consumer receives from an empty, completing queue.
    /// Delivers the stored failure exactly once, then `Done`.
    pub(crate) fn close_signal(&mut self) -> TakeError<E> {
        let undelivered_failure = !self.failure_delivered
            && matches!(self.lifecycle.reason(), Some(CloseReason::Failed(_)));
        if undelivered_failure {
            self.failure_delivered = true;
            if let Some(CloseReason::Failed(e)) = self.lifecycle.reason() {
                return TakeError::Failed(e.clone());
            }
        }
        TakeError::Done
    }

    /// Returns a delivered-but-unconsumed failure to the queue so the next
    /// consumer receives it (cancel-correctness of the error channel).
    pub(crate) fn undeliver_failure(&mut self) {
        self.failure_delivered = false;
    }

    /// The signal for a consumer short-circuited while deliverable items
    /// remain: the one-shot failure is reserved for whoever exhausts the
    /// buffer.
    fn short_circuit_signal(&mut self) -> TakeError<E> {
        if self.buffer.is_empty() && !self.offerers.has_queued() {
            self.close_signal()
        } else {
            TakeError::Done
        }
    }

    /// Resolves every parked consumer at completion time: buffered items
    /// are still delivered where a request can complete, everything else
    /// receives the close signal in FIFO order.
    fn resolve_parked_takers(&mut self, wake: &mut WakeList) {
        for key in self.takers.detach_all() {
            // Split the borrow: decide with the buffer first, then write
            // the outcome into the slot.
            let Some(taker) = self.takers.get_mut(key) else {
                continue;
            };
            let mut restore: Option<Vec<T>> = None;
            let outcome = match &mut taker.kind {
                TakerKind::One => self.buffer.pop_front().map(|item| vec![item]),
                TakerKind::Exactly { demand, partial } => {
                    while partial.len() < *demand {
                        let Some(item) = self.buffer.pop_front() else {
                            break;
                        };
                        partial.push(item);
                    }
                    if partial.len() == *demand {
                        Some(core::mem::take(partial))
                    } else {
                        restore = Some(core::mem::take(partial));
                        None
                    }
                }
                TakerKind::Available => {
                    if self.buffer.is_empty() {
                        None
                    } else {
                        Some(self.buffer.drain(..).collect())
                    }
                }
            };
            let waker = taker.waker.take();
            match outcome {
                Some(items) => {
                    let Some(taker) = self.takers.get_mut(key) else {
                        continue;
                    };
                    taker.outcome = Some(Ok(items));
                }
                None => {
                    if let Some(items) = restore {
                        self.restore_front(items);
                    }
                    let signal = self.short_circuit_signal();
                    let Some(taker) = self.takers.get_mut(key) else {
                        continue;
                    };
                    taker.outcome = Some(Err(signal));
                }
            }
            wake.push(waker);
        }
    }

    /// Rejects every parked producer, handing its unadmitted items back.
    fn reject_parked_offerers(&mut self, wake: &mut WakeList) {
        for key in self.offerers.detach_all() {
            let Some(offerer) = self.offerers.get_mut(key) else {
                continue;
            };
            let pending = core::mem::take(&mut offerer.pending);
            offerer.outcome = Some(OfferOutcome::Rejected(pending));
            wake.push(offerer.waker.take());
        }
    }

    /// Moves `Closing → Closed` once nothing deliverable remains, and
    /// resolves every awaiter.
    pub(crate) fn maybe_finalize(&mut self, wake: &mut WakeList) {
        if !matches!(self.lifecycle, Lifecycle::Closing(_)) {
            return;
        }
        if !self.buffer.is_empty() || self.offerers.has_queued() {
            return;
        }
        self.lifecycle.finalize();
        let result = match self.lifecycle.reason() {
            Some(CloseReason::Failed(e)) => Err(e.clone()),
            _ => Ok(()),
        };
        for key in self.awaiters.detach_all() {
            let Some(awaiter) = self.awaiters.get_mut(key) else {
                continue;
            };
            awaiter.outcome = Some(result.clone());
            wake.push(awaiter.waker.take());
        }
    }

    /// Requests a graceful close. Buffered items and queued offers still
    /// drain; parked consumers that cannot complete get the close signal.
    pub(crate) fn end(&mut self, wake: &mut WakeList) -> bool {
        if !self.lifecycle.begin_close(CloseReason::End) {
            return false;
        }
        #[cfg(feature = "tracing-integration")]
        tracing::debug!(target: "aqueduct::queue", "end requested");
        self.rebalance(wake);
        self.resolve_parked_takers(wake);
        self.maybe_finalize(wake);
        true
    }

    /// Requests a close with a terminal domain failure. Buffered items
    /// still drain; parked offers are rejected and their items discarded.
    pub(crate) fn fail(&mut self, error: E, wake: &mut WakeList) -> bool {
        if !self.lifecycle.begin_close(CloseReason::Failed(error)) {
            return false;
        }
        #[cfg(feature = "tracing-integration")]
        tracing::debug!(target: "aqueduct::queue", "fail requested");
        self.reject_parked_offerers(wake);
        self.resolve_parked_takers(wake);
        self.maybe_finalize(wake);
        true
    }

    /// Immediate hard stop: the buffer is discarded and every waiter
    /// resolved at once.
    pub(crate) fn shutdown(&mut self, wake: &mut WakeList) -> bool {
        if !self.lifecycle.begin_close(CloseReason::Shutdown) {
            return false;
        }
        #[cfg(feature = "tracing-integration")]
        tracing::debug!(target: "aqueduct::queue", "shutdown requested");
        self.buffer.clear();
        self.reject_parked_offerers(wake);
        self.resolve_parked_takers(wake);
        self.maybe_finalize(wake);
        true
    }

    // ── Take-side fast paths (first poll, before parking) ───────────────

    /// Immediate result for `take`, or `None` when the caller must park.
    pub(crate) fn take_ready(
        &mut self,
        wake: &mut WakeList,
    ) -> Option<Result<T, TakeError<E>>> {
        if let Some(item) = self.pull_one(wake) {
            return Some(Ok(item));
        }
        if self.lifecycle.is_open() {
            return None;
        }
        self.maybe_finalize(wake);
        Some(Err(self.close_signal()))
    }

    /// Immediate result for `take_all`, or `None` when the caller must
    /// park.
    pub(crate) fn take_all_ready(
        &mut self,
        wake: &mut WakeList,
    ) -> Option<Result<Vec<T>, TakeError<E>>> {
        let items = self.drain_available(wake);
        if !items.is_empty() {
            return Some(Ok(items));
        }
        if self.lifecycle.is_open() {
            return None;
        }
        self.maybe_finalize(wake);
        Some(Err(self.close_signal()))
    }

    /// Immediate result for `await_done`: `None` until the queue is closed
    /// and drained.
    pub(crate) fn await_ready(&self) -> Option<Result<(), E>> {
        if let Lifecycle::Closed(reason) = &self.lifecycle {
            Some(match reason {
                CloseReason::Failed(e) => Err(e.clone()),
                CloseReason::End | CloseReason::Shutdown => Ok(()),
            })
        } else {
            None
        }
    }

    /// Pulls toward a `take_n` demand. Returns the finished result, or
    /// `None` when the caller must park with its partial progress.
    pub(crate) fn take_n_ready(
        &mut self,
        demand: usize,
        partial: &mut Vec<T>,
        wake: &mut WakeList,
    ) -> Option<Result<Vec<T>, TakeError<E>>> {
        while partial.len() < demand {
            let Some(item) = self.pull_one(wake) else {
                break;
            };
            partial.push(item);
        }
        if partial.len() >= demand {
            return Some(Ok(core::mem::take(partial)));
        }
        if self.lifecycle.is_open() {
            return None;
        }
        // Completion short-circuit: hand partial progress back to the
        // buffer before signalling.
        self.restore_front(core::mem::take(partial));
        let signal = self.short_circuit_signal();
        self.maybe_finalize(wake);
        Some(Err(signal))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn init_test(name: &str) {
        crate::test_logging::init_test_logging();
        crate::test_phase!(name);
    }

    fn batch(items: &[i32]) -> VecDeque<i32> {
        items.iter().copied().collect()
    }

    #[test]
    fn offer_batch_respects_room() {
        init_test("offer_batch_respects_room");
        let mut state: State<i32, ()> =
            State::new(Capacity::Bounded(2), AdmissionStrategy::Suspend);
        let mut wake = WakeList::new();
        let disposition = state.offer_batch(batch(&[1, 2, 3, 4]), &mut wake);
        let remainder = match disposition {
            OfferDisposition::MustPark(rest) => rest,
            _ => panic!("suspend strategy must park the remainder"),
        };
        crate::assert_with_log!(
            remainder == batch(&[3, 4]),
            "remainder order",
            batch(&[3, 4]),
            remainder.clone()
        );
        let buffered: Vec<i32> = state.buffer.iter().copied().collect();
        crate::assert_with_log!(buffered == vec![1, 2], "buffer prefix", vec![1, 2], buffered);
        crate::test_complete!("offer_batch_respects_room");
    }

    #[test]
    fn dropping_rejects_remainder() {
        init_test("dropping_rejects_remainder");
        let mut state: State<i32, ()> =
            State::new(Capacity::Bounded(2), AdmissionStrategy::Dropping);
        let mut wake = WakeList::new();
        let disposition = state.offer_batch(batch(&[1, 2, 3, 4]), &mut wake);
        let rejected = match disposition {
            OfferDisposition::Rejected(rest) => rest,
            _ => panic!("dropping strategy must reject the remainder"),
        };
        crate::assert_with_log!(
            rejected == batch(&[3, 4]),
            "rejected items",
            batch(&[3, 4]),
            rejected.clone()
        );
        crate::test_complete!("dropping_rejects_remainder");
    }

    #[test]
    fn sliding_evicts_oldest() {
        init_test("sliding_evicts_oldest");
        let mut state: State<i32, ()> =
            State::new(Capacity::Bounded(2), AdmissionStrategy::Sliding);
        let mut wake = WakeList::new();
        let disposition = state.offer_batch(batch(&[1, 2, 3, 4]), &mut wake);
        crate::assert_with_log!(
            matches!(disposition, OfferDisposition::Admitted),
            "sliding admits all",
            true,
            matches!(disposition, OfferDisposition::Admitted)
        );
        let buffered: Vec<i32> = state.buffer.iter().copied().collect();
        crate::assert_with_log!(buffered == vec![3, 4], "newest kept", vec![3, 4], buffered);
        crate::test_complete!("sliding_evicts_oldest");
    }

    #[test]
    fn closed_queue_rejects_batches() {
        init_test("closed_queue_rejects_batches");
        let mut state: State<i32, ()> =
            State::new(Capacity::Bounded(2), AdmissionStrategy::Suspend);
        let mut wake = WakeList::new();
        state.end(&mut wake);
        let disposition = state.offer_batch(batch(&[1]), &mut wake);
        crate::assert_with_log!(
            matches!(disposition, OfferDisposition::Rejected(_)),
            "closed rejects",
            true,
            matches!(disposition, OfferDisposition::Rejected(_))
        );
        crate::assert_with_log!(
            state.buffer.is_empty(),
            "buffer untouched",
            true,
            state.buffer.is_empty()
        );
        crate::test_complete!("closed_queue_rejects_batches");
    }

    #[test]
    fn failure_signal_is_one_shot() {
        init_test("failure_signal_is_one_shot");
        let mut state: State<i32, &str> =
            State::new(Capacity::Bounded(2), AdmissionStrategy::Suspend);
        let mut wake = WakeList::new();
        state.fail("boom", &mut wake);
        let first = state.close_signal();
        crate::assert_with_log!(
            first == TakeError::Failed("boom"),
            "first signal carries failure",
            TakeError::Failed("boom"),
            first
        );
        let second = state.close_signal();
        crate::assert_with_log!(second.is_done(), "second signal is Done", true, second.is_done());

        // A cancelled consumer that never saw the failure puts it back.
        state.undeliver_failure();
        let replayed = state.close_signal();
        crate::assert_with_log!(
            replayed == TakeError::Failed("boom"),
            "undelivered failure replays",
            TakeError::Failed("boom"),
            replayed
        );
        crate::test_complete!("failure_signal_is_one_shot");
    }

    #[test]
    fn restore_front_preserves_order() {
        init_test("restore_front_preserves_order");
        let mut state: State<i32, ()> =
            State::new(Capacity::Unbounded, AdmissionStrategy::Suspend);
        state.buffer.extend([3, 4]);
        state.restore_front(vec![1, 2]);
        let buffered: Vec<i32> = state.buffer.iter().copied().collect();
        crate::assert_with_log!(
            buffered == vec![1, 2, 3, 4],
            "restored order",
            vec![1, 2, 3, 4],
            buffered
        );
        crate::test_complete!("restore_front_preserves_order");
    }
}
