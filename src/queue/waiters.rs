//! FIFO waiter bookkeeping.
//!
//! Parked producers and consumers are explicit continuation records stored
//! in an arena ([`slab`]) and ordered by a deque of arrival keys. The split
//! gives the two properties the queue needs at once:
//!
//! - **FIFO wake order**: the order deque is scanned from the front, so the
//!   oldest live waiter is always served first.
//! - **O(1) cancellation**: a parked future holds a stable [`WaiterKey`]
//!   and removes its own slot on drop; the stale key left in the order
//!   deque is pruned lazily the next time the front is inspected.
//!
//! Keys carry a generation counter so a slab index reused by a later waiter
//! can never be confused with the cancelled waiter that used to own it.

use slab::Slab;
use smallvec::SmallVec;
use std::collections::VecDeque;
use std::task::Waker;

/// Stable handle to a parked waiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct WaiterKey {
    index: usize,
    generation: u64,
}

#[derive(Debug)]
struct Slot<W> {
    generation: u64,
    value: W,
}

/// Ordered set of parked waiters with FIFO wake order.
#[derive(Debug)]
pub(crate) struct WaiterQueue<W> {
    slots: Slab<Slot<W>>,
    /// Arrival order. May contain stale keys for cancelled or resolved
    /// waiters; pruned lazily.
    order: VecDeque<WaiterKey>,
    next_generation: u64,
}

impl<W> WaiterQueue<W> {
    pub(crate) fn new() -> Self {
        Self {
            slots: Slab::new(),
            order: VecDeque::new(),
            next_generation: 0,
        }
    }

    /// Parks a waiter at the back of the queue, returning its stable key.
    pub(crate) fn push(&mut self, value: W) -> WaiterKey {
        let generation = self.next_generation;
        self.next_generation += 1;
        let index = self.slots.insert(Slot { generation, value });
        let key = WaiterKey { index, generation };
        self.order.push_back(key);
        key
    }

    fn is_live(&self, key: WaiterKey) -> bool {
        self.slots
            .get(key.index)
            .is_some_and(|slot| slot.generation == key.generation)
    }

    /// Drops stale keys from the front of the order deque.
    fn prune_front(&mut self) {
        while let Some(key) = self.order.front() {
            if self.is_live(*key) {
                break;
            }
            self.order.pop_front();
        }
    }

    /// The oldest still-queued waiter, if any. Prunes stale keys.
    pub(crate) fn front(&mut self) -> Option<(WaiterKey, &mut W)> {
        self.prune_front();
        let key = *self.order.front()?;
        let slot = self.slots.get_mut(key.index).expect("pruned front key is live");
        Some((key, &mut slot.value))
    }

    /// Removes the front key from the order deque, leaving the slot in the
    /// arena for the owning future to consume.
    pub(crate) fn detach_front(&mut self) {
        self.order.pop_front();
    }

    /// Detaches every queued key in FIFO order (used at completion time).
    pub(crate) fn detach_all(&mut self) -> Vec<WaiterKey> {
        let mut keys = Vec::new();
        while let Some(key) = self.order.pop_front() {
            if self.is_live(key) {
                keys.push(key);
            }
        }
        keys
    }

    /// Mutable access to a specific waiter, live or detached.
    pub(crate) fn get_mut(&mut self, key: WaiterKey) -> Option<&mut W> {
        let slot = self.slots.get_mut(key.index)?;
        (slot.generation == key.generation).then_some(&mut slot.value)
    }

    /// Removes a waiter by key. O(1); the stale order entry is pruned
    /// lazily.
    pub(crate) fn remove(&mut self, key: WaiterKey) -> Option<W> {
        if !self.is_live(key) {
            return None;
        }
        Some(self.slots.remove(key.index).value)
    }

    /// True if a waiter is still queued (detached-but-unconsumed slots do
    /// not count). Prunes stale keys.
    pub(crate) fn has_queued(&mut self) -> bool {
        self.prune_front();
        !self.order.is_empty()
    }

    /// Iterates the still-queued waiters in FIFO order without pruning.
    pub(crate) fn queued(&self) -> impl Iterator<Item = &W> {
        self.order.iter().filter_map(|key| {
            self.slots
                .get(key.index)
                .filter(|slot| slot.generation == key.generation)
                .map(|slot| &slot.value)
        })
    }
}

/// Wakers collected during a critical section and invoked after the lock is
/// released, so a resumed task never re-enters the mutex synchronously.
#[derive(Debug, Default)]
pub(crate) struct WakeList {
    wakers: SmallVec<[Waker; 8]>,
}

impl WakeList {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&mut self, waker: Option<Waker>) {
        if let Some(waker) = waker {
            self.wakers.push(waker);
        }
    }

    /// Invokes every collected waker. Call only after the state lock has
    /// been dropped.
    pub(crate) fn wake_all(self) {
        for waker in self.wakers {
            waker.wake();
        }
    }
}
