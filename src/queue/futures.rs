//! Hand-rolled futures for the suspending queue operations.
//!
//! Every future follows the same shape: observe the capability context
//! first (cancellation is checked at every poll), then take the state lock,
//! try the fast path, and otherwise park a continuation in the appropriate
//! waiter queue. Wakers collected during the transition fire after the lock
//! is released.
//!
//! # Cancel Safety
//!
//! Dropping a parked future releases its waiter slot in O(1) without
//! disturbing the FIFO order of the remaining waiters. Nothing is lost in
//! the process: an offer's already-admitted prefix stays admitted, a take
//! that was resolved with items it never consumed pushes them back onto the
//! front of the buffer, and a consumed-but-undelivered failure is returned
//! to the queue for the next consumer.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll, Waker};

use crate::cx::Cx;
use crate::error::TakeError;

use super::Queue;
use super::state::{Awaiter, OfferDisposition, OfferOutcome, Offerer, Taker, TakerKind};
use super::waiters::{WaiterKey, WakeList};

/// Consumes a parked offerer's resolution, refreshing the waker while the
/// slot is still pending. `None` means "keep waiting"; a vanished slot
/// counts as rejected-empty.
fn poll_offerer_slot<T, E: Clone>(
    state: &mut super::state::State<T, E>,
    key: WaiterKey,
    waker: &Waker,
) -> Option<OfferOutcome<T>> {
    let resolved = match state.offerers.get_mut(key) {
        Some(offerer) => {
            let outcome = offerer.outcome.take();
            if outcome.is_none() {
                offerer.waker = Some(waker.clone());
            }
            outcome
        }
        None => Some(OfferOutcome::Rejected(VecDeque::new())),
    };
    if resolved.is_some() {
        state.offerers.remove(key);
    }
    resolved
}

/// Consumes a parked taker's resolution, refreshing the waker while the
/// slot is still pending. A vanished slot counts as `Done`.
fn poll_taker_slot<T, E: Clone>(
    state: &mut super::state::State<T, E>,
    key: WaiterKey,
    waker: &Waker,
) -> Option<Result<Vec<T>, TakeError<E>>> {
    let resolved = match state.takers.get_mut(key) {
        Some(taker) => {
            let outcome = taker.outcome.take();
            if outcome.is_none() {
                taker.waker = Some(waker.clone());
            }
            outcome
        }
        None => Some(Err(TakeError::Done)),
    };
    if resolved.is_some() {
        state.takers.remove(key);
    }
    resolved
}

/// Removes a parked offerer, returning its unadmitted items. The admitted
/// prefix is never rolled back.
fn cancel_offerer<T, E: Clone>(queue: &Queue<T, E>, key: Option<WaiterKey>) -> Vec<T> {
    let Some(key) = key else {
        return Vec::new();
    };
    let mut wake = WakeList::new();
    let remainder = {
        let mut state = queue.state();
        let remainder = match state.offerers.remove(key) {
            Some(offerer) => match offerer.outcome {
                Some(OfferOutcome::Rejected(rest)) => rest.into_iter().collect(),
                Some(OfferOutcome::Admitted) => Vec::new(),
                None => offerer.pending.into_iter().collect(),
            },
            None => Vec::new(),
        };
        state.rebalance(&mut wake);
        remainder
    };
    wake.wake_all();
    remainder
}

/// Removes a parked taker without side effects on the buffer, restoring
/// anything it was holding: unconsumed resolved items go back to the front
/// of the buffer, partial `take_n` progress likewise, and a consumed but
/// undelivered failure is replayed to the next consumer.
fn cancel_taker<T, E: Clone>(queue: &Queue<T, E>, key: Option<WaiterKey>) {
    let Some(key) = key else {
        return;
    };
    let mut wake = WakeList::new();
    {
        let mut state = queue.state();
        if let Some(taker) = state.takers.remove(key) {
            match taker.outcome {
                Some(Ok(items)) => state.restore_front(items),
                Some(Err(TakeError::Failed(_))) => state.undeliver_failure(),
                Some(Err(_)) | None => {}
            }
            if let TakerKind::Exactly { partial, .. } = taker.kind {
                state.restore_front(partial);
            }
            state.rebalance(&mut wake);
        }
    }
    wake.wake_all();
}

// ── Offer side ──────────────────────────────────────────────────────────

/// Future returned by [`Queue::offer`]. Resolves to `true` once the item is
/// admitted, `false` if the queue completed, rejected it, or the caller was
/// cancelled first.
#[must_use = "futures do nothing unless polled"]
pub struct OfferFuture<'a, 'b, T, E: Clone> {
    queue: &'a Queue<T, E>,
    cx: &'b Cx,
    item: Option<T>,
    key: Option<WaiterKey>,
    finished: bool,
}

// The futures never self-reference; pinning is not structural.
impl<T, E: Clone> Unpin for OfferFuture<'_, '_, T, E> {}

impl<'a, 'b, T, E: Clone> OfferFuture<'a, 'b, T, E> {
    pub(crate) fn new(queue: &'a Queue<T, E>, cx: &'b Cx, item: T) -> Self {
        Self {
            queue,
            cx,
            item: Some(item),
            key: None,
            finished: false,
        }
    }
}

impl<T, E: Clone> Future for OfferFuture<'_, '_, T, E> {
    type Output = bool;

    fn poll(mut self: Pin<&mut Self>, task_cx: &mut Context<'_>) -> Poll<bool> {
        let this = &mut *self;
        if this.finished {
            return Poll::Pending;
        }

        if this.cx.checkpoint().is_err() {
            let remainder = cancel_offerer(this.queue, this.key.take());
            // Admitted only if the item had already been handed over and the
            // parked slot resolved before the cancellation landed.
            let admitted = this.item.is_none() && remainder.is_empty();
            this.finished = true;
            this.cx.trace("queue::offer cancelled");
            return Poll::Ready(admitted);
        }

        let mut wake = WakeList::new();
        let ready = {
            let mut state = this.queue.state();
            if let Some(key) = this.key {
                poll_offerer_slot(&mut state, key, task_cx.waker())
                    .map(|outcome| matches!(outcome, OfferOutcome::Admitted))
            } else {
                let item = this.item.take().expect("offer polled with item present");
                match state.offer_batch(VecDeque::from([item]), &mut wake) {
                    OfferDisposition::Admitted => Some(true),
                    OfferDisposition::Rejected(_) => Some(false),
                    OfferDisposition::MustPark(pending) => {
                        this.key = Some(state.offerers.push(Offerer {
                            pending,
                            waker: Some(task_cx.waker().clone()),
                            outcome: None,
                        }));
                        None
                    }
                }
            }
        };
        wake.wake_all();

        match ready {
            Some(admitted) => {
                this.finished = true;
                this.key = None;
                Poll::Ready(admitted)
            }
            None => Poll::Pending,
        }
    }
}

impl<T, E: Clone> Drop for OfferFuture<'_, '_, T, E> {
    fn drop(&mut self) {
        if !self.finished {
            cancel_offerer(self.queue, self.key.take());
        }
    }
}

/// Future returned by [`Queue::offer_all`]. Resolves to the sub-sequence of
/// items that could **not** be admitted (empty on full success), preserving
/// the relative order of the admitted prefix and the returned remainder.
#[must_use = "futures do nothing unless polled"]
pub struct OfferAllFuture<'a, 'b, T, E: Clone> {
    queue: &'a Queue<T, E>,
    cx: &'b Cx,
    items: Option<VecDeque<T>>,
    key: Option<WaiterKey>,
    finished: bool,
}

impl<T, E: Clone> Unpin for OfferAllFuture<'_, '_, T, E> {}

impl<'a, 'b, T, E: Clone> OfferAllFuture<'a, 'b, T, E> {
    pub(crate) fn new(queue: &'a Queue<T, E>, cx: &'b Cx, items: Vec<T>) -> Self {
        Self {
            queue,
            cx,
            items: Some(items.into()),
            key: None,
            finished: false,
        }
    }
}

impl<T, E: Clone> Future for OfferAllFuture<'_, '_, T, E> {
    type Output = Vec<T>;

    fn poll(mut self: Pin<&mut Self>, task_cx: &mut Context<'_>) -> Poll<Vec<T>> {
        let this = &mut *self;
        if this.finished {
            return Poll::Pending;
        }

        if this.cx.checkpoint().is_err() {
            // Unadmitted items come back to the caller; the admitted prefix
            // stays in the queue.
            let mut remainder = cancel_offerer(this.queue, this.key.take());
            if let Some(never_offered) = this.items.take() {
                remainder.extend(never_offered);
            }
            this.finished = true;
            this.cx.trace("queue::offer_all cancelled");
            return Poll::Ready(remainder);
        }

        let mut wake = WakeList::new();
        let ready = {
            let mut state = this.queue.state();
            if let Some(key) = this.key {
                poll_offerer_slot(&mut state, key, task_cx.waker()).map(|outcome| match outcome {
                    OfferOutcome::Admitted => Vec::new(),
                    OfferOutcome::Rejected(rest) => rest.into_iter().collect(),
                })
            } else {
                let items = this.items.take().expect("offer_all polled with items present");
                match state.offer_batch(items, &mut wake) {
                    OfferDisposition::Admitted => Some(Vec::new()),
                    OfferDisposition::Rejected(rest) => Some(rest.into_iter().collect()),
                    OfferDisposition::MustPark(pending) => {
                        this.key = Some(state.offerers.push(Offerer {
                            pending,
                            waker: Some(task_cx.waker().clone()),
                            outcome: None,
                        }));
                        None
                    }
                }
            }
        };
        wake.wake_all();

        match ready {
            Some(remainder) => {
                this.finished = true;
                this.key = None;
                Poll::Ready(remainder)
            }
            None => Poll::Pending,
        }
    }
}

impl<T, E: Clone> Drop for OfferAllFuture<'_, '_, T, E> {
    fn drop(&mut self) {
        if !self.finished {
            cancel_offerer(self.queue, self.key.take());
        }
    }
}

// ── Take side ───────────────────────────────────────────────────────────

/// Future returned by [`Queue::take`].
#[must_use = "futures do nothing unless polled"]
pub struct TakeFuture<'a, 'b, T, E: Clone> {
    queue: &'a Queue<T, E>,
    cx: &'b Cx,
    key: Option<WaiterKey>,
    finished: bool,
}

impl<T, E: Clone> Unpin for TakeFuture<'_, '_, T, E> {}

impl<'a, 'b, T, E: Clone> TakeFuture<'a, 'b, T, E> {
    pub(crate) fn new(queue: &'a Queue<T, E>, cx: &'b Cx) -> Self {
        Self {
            queue,
            cx,
            key: None,
            finished: false,
        }
    }
}

impl<T, E: Clone> Future for TakeFuture<'_, '_, T, E> {
    type Output = Result<T, TakeError<E>>;

    fn poll(mut self: Pin<&mut Self>, task_cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;
        if this.finished {
            return Poll::Pending;
        }

        if this.cx.checkpoint().is_err() {
            cancel_taker(this.queue, this.key.take());
            this.finished = true;
            this.cx.trace("queue::take cancelled");
            return Poll::Ready(Err(TakeError::Cancelled));
        }

        let mut wake = WakeList::new();
        let ready = {
            let mut state = this.queue.state();
            if let Some(key) = this.key {
                poll_taker_slot(&mut state, key, task_cx.waker()).map(|result| {
                    result.map(|items| {
                        items.into_iter().next().expect("take resolved with one item")
                    })
                })
            } else {
                match state.take_ready(&mut wake) {
                    Some(result) => Some(result),
                    None => {
                        this.key = Some(state.takers.push(Taker {
                            kind: TakerKind::One,
                            waker: Some(task_cx.waker().clone()),
                            outcome: None,
                        }));
                        None
                    }
                }
            }
        };
        wake.wake_all();

        match ready {
            Some(result) => {
                this.finished = true;
                this.key = None;
                Poll::Ready(result)
            }
            None => Poll::Pending,
        }
    }
}

impl<T, E: Clone> Drop for TakeFuture<'_, '_, T, E> {
    fn drop(&mut self) {
        if !self.finished {
            cancel_taker(self.queue, self.key.take());
        }
    }
}

/// Future returned by [`Queue::take_n`].
#[must_use = "futures do nothing unless polled"]
pub struct TakeNFuture<'a, 'b, T, E: Clone> {
    queue: &'a Queue<T, E>,
    cx: &'b Cx,
    demand: usize,
    key: Option<WaiterKey>,
    finished: bool,
}

impl<T, E: Clone> Unpin for TakeNFuture<'_, '_, T, E> {}

impl<'a, 'b, T, E: Clone> TakeNFuture<'a, 'b, T, E> {
    pub(crate) fn new(queue: &'a Queue<T, E>, cx: &'b Cx, demand: usize) -> Self {
        Self {
            queue,
            cx,
            demand,
            key: None,
            finished: false,
        }
    }
}

impl<T, E: Clone> Future for TakeNFuture<'_, '_, T, E> {
    type Output = Result<Vec<T>, TakeError<E>>;

    fn poll(mut self: Pin<&mut Self>, task_cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;
        if this.finished {
            return Poll::Pending;
        }

        if this.cx.checkpoint().is_err() {
            cancel_taker(this.queue, this.key.take());
            this.finished = true;
            this.cx.trace("queue::take_n cancelled");
            return Poll::Ready(Err(TakeError::Cancelled));
        }

        let mut wake = WakeList::new();
        let ready = {
            let mut state = this.queue.state();
            if let Some(key) = this.key {
                poll_taker_slot(&mut state, key, task_cx.waker())
            } else {
                let mut partial = Vec::new();
                match state.take_n_ready(this.demand, &mut partial, &mut wake) {
                    Some(result) => Some(result),
                    None => {
                        this.key = Some(state.takers.push(Taker {
                            kind: TakerKind::Exactly {
                                demand: this.demand,
                                partial,
                            },
                            waker: Some(task_cx.waker().clone()),
                            outcome: None,
                        }));
                        None
                    }
                }
            }
        };
        wake.wake_all();

        match ready {
            Some(result) => {
                this.finished = true;
                this.key = None;
                Poll::Ready(result)
            }
            None => Poll::Pending,
        }
    }
}

impl<T, E: Clone> Drop for TakeNFuture<'_, '_, T, E> {
    fn drop(&mut self) {
        if !self.finished {
            cancel_taker(self.queue, self.key.take());
        }
    }
}

/// Future returned by [`Queue::take_all`].
#[must_use = "futures do nothing unless polled"]
pub struct TakeAllFuture<'a, 'b, T, E: Clone> {
    queue: &'a Queue<T, E>,
    cx: &'b Cx,
    key: Option<WaiterKey>,
    finished: bool,
}

impl<T, E: Clone> Unpin for TakeAllFuture<'_, '_, T, E> {}

impl<'a, 'b, T, E: Clone> TakeAllFuture<'a, 'b, T, E> {
    pub(crate) fn new(queue: &'a Queue<T, E>, cx: &'b Cx) -> Self {
        Self {
            queue,
            cx,
            key: None,
            finished: false,
        }
    }
}

impl<T, E: Clone> Future for TakeAllFuture<'_, '_, T, E> {
    type Output = Result<Vec<T>, TakeError<E>>;

    fn poll(mut self: Pin<&mut Self>, task_cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;
        if this.finished {
            return Poll::Pending;
        }

        if this.cx.checkpoint().is_err() {
            cancel_taker(this.queue, this.key.take());
            this.finished = true;
            this.cx.trace("queue::take_all cancelled");
            return Poll::Ready(Err(TakeError::Cancelled));
        }

        let mut wake = WakeList::new();
        let ready = {
            let mut state = this.queue.state();
            if let Some(key) = this.key {
                poll_taker_slot(&mut state, key, task_cx.waker())
            } else {
                match state.take_all_ready(&mut wake) {
                    Some(result) => Some(result),
                    None => {
                        this.key = Some(state.takers.push(Taker {
                            kind: TakerKind::Available,
                            waker: Some(task_cx.waker().clone()),
                            outcome: None,
                        }));
                        None
                    }
                }
            }
        };
        wake.wake_all();

        match ready {
            Some(result) => {
                this.finished = true;
                this.key = None;
                Poll::Ready(result)
            }
            None => Poll::Pending,
        }
    }
}

impl<T, E: Clone> Drop for TakeAllFuture<'_, '_, T, E> {
    fn drop(&mut self) {
        if !self.finished {
            cancel_taker(self.queue, self.key.take());
        }
    }
}

// ── Completion side ─────────────────────────────────────────────────────

/// Future returned by [`Queue::await_done`]. Resolves once the queue is
/// closed *and* drained: `Ok(())` after a graceful end or a shutdown,
/// `Err(TakeError::Failed(e))` when the queue failed.
#[must_use = "futures do nothing unless polled"]
pub struct AwaitDoneFuture<'a, 'b, T, E: Clone> {
    queue: &'a Queue<T, E>,
    cx: &'b Cx,
    key: Option<WaiterKey>,
    finished: bool,
}

impl<T, E: Clone> Unpin for AwaitDoneFuture<'_, '_, T, E> {}

impl<'a, 'b, T, E: Clone> AwaitDoneFuture<'a, 'b, T, E> {
    pub(crate) fn new(queue: &'a Queue<T, E>, cx: &'b Cx) -> Self {
        Self {
            queue,
            cx,
            key: None,
            finished: false,
        }
    }
}

impl<T, E: Clone> Future for AwaitDoneFuture<'_, '_, T, E> {
    type Output = Result<(), TakeError<E>>;

    fn poll(mut self: Pin<&mut Self>, task_cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;
        if this.finished {
            return Poll::Pending;
        }

        if this.cx.checkpoint().is_err() {
            if let Some(key) = this.key.take() {
                this.queue.state().awaiters.remove(key);
            }
            this.finished = true;
            this.cx.trace("queue::await_done cancelled");
            return Poll::Ready(Err(TakeError::Cancelled));
        }

        let ready = {
            let mut state = this.queue.state();
            if let Some(key) = this.key {
                let resolved = match state.awaiters.get_mut(key) {
                    Some(awaiter) => {
                        let outcome = awaiter.outcome.take();
                        if outcome.is_none() {
                            awaiter.waker = Some(task_cx.waker().clone());
                        }
                        outcome
                    }
                    None => Some(Ok(())),
                };
                if resolved.is_some() {
                    state.awaiters.remove(key);
                }
                resolved.map(|result| result.map_err(TakeError::Failed))
            } else {
                match state.await_ready() {
                    Some(result) => Some(result.map_err(TakeError::Failed)),
                    None => {
                        this.key = Some(state.awaiters.push(Awaiter {
                            waker: Some(task_cx.waker().clone()),
                            outcome: None,
                        }));
                        None
                    }
                }
            }
        };

        match ready {
            Some(result) => {
                this.finished = true;
                this.key = None;
                Poll::Ready(result)
            }
            None => Poll::Pending,
        }
    }
}

impl<T, E: Clone> Drop for AwaitDoneFuture<'_, '_, T, E> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if let Some(key) = self.key.take() {
            self.queue.state().awaiters.remove(key);
        }
    }
}
