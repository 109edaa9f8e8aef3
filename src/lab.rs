//! Deterministic single-threaded executor for driving fibers in tests.
//!
//! The queue itself embeds no scheduler; it only registers wakers. [`Lab`]
//! is the minimal collaborator that closes the loop deterministically: it
//! polls spawned fibers in FIFO wake order on one thread, so interleavings
//! are reproducible and suspension points can be asserted exactly
//! ("run until stalled, observe the parked producer, take one item, run
//! again").
//!
//! Cancellation can be exercised both ways the runtime would deliver it:
//! [`Lab::abort`] drops a fiber in place (the structural `Drop` path), and
//! a [`Cx`](crate::cx::Cx) cancel followed by [`Lab::schedule`] lets the
//! fiber observe the cooperative checkpoint on its next poll.

use slab::Slab;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex as StdMutex};
use std::task::{Context, Poll, Wake, Waker};

type FiberFuture = Pin<Box<dyn Future<Output = ()>>>;

/// Wake state shared with every fiber's waker.
#[derive(Debug, Default)]
struct ReadyQueue {
    ready: StdMutex<VecDeque<usize>>,
}

impl ReadyQueue {
    fn push(&self, id: usize) {
        self.ready.lock().expect("lab ready lock poisoned").push_back(id);
    }

    fn pop(&self) -> Option<usize> {
        self.ready.lock().expect("lab ready lock poisoned").pop_front()
    }
}

struct FiberWaker {
    id: usize,
    ready: Arc<ReadyQueue>,
}

impl Wake for FiberWaker {
    fn wake(self: Arc<Self>) {
        self.ready.push(self.id);
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.ready.push(self.id);
    }
}

/// Handle to a spawned fiber's eventual output.
#[derive(Debug)]
pub struct JoinHandle<R> {
    id: usize,
    cell: Arc<StdMutex<Option<R>>>,
}

impl<R> JoinHandle<R> {
    /// The fiber's output, if it has finished.
    #[must_use]
    pub fn try_join(&self) -> Option<R> {
        self.cell.lock().expect("lab join cell poisoned").take()
    }

    /// True once the fiber has run to completion.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.cell.lock().expect("lab join cell poisoned").is_some()
    }
}

/// Deterministic single-threaded fiber executor.
pub struct Lab {
    fibers: Slab<Option<FiberFuture>>,
    ready: Arc<ReadyQueue>,
}

impl Default for Lab {
    fn default() -> Self {
        Self::new()
    }
}

impl Lab {
    /// Creates an empty executor.
    #[must_use]
    pub fn new() -> Self {
        Self {
            fibers: Slab::new(),
            ready: Arc::new(ReadyQueue::default()),
        }
    }

    /// Spawns a fiber and schedules it for its first poll.
    pub fn spawn<F>(&mut self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + 'static,
        F::Output: 'static,
    {
        let cell = Arc::new(StdMutex::new(None));
        let output = Arc::clone(&cell);
        let wrapped: FiberFuture = Box::pin(async move {
            let value = future.await;
            *output.lock().expect("lab join cell poisoned") = Some(value);
        });
        let id = self.fibers.insert(Some(wrapped));
        self.ready.push(id);
        JoinHandle { id, cell }
    }

    /// Re-queues a fiber for polling, e.g. to deliver a cooperative cancel
    /// that no queue waker will announce.
    pub fn schedule<R>(&mut self, handle: &JoinHandle<R>) {
        if self.fibers.contains(handle.id) {
            self.ready.push(handle.id);
        }
    }

    /// Drops a fiber in place without polling it again: the structural
    /// cancellation path. Parked queue operations release their waiter
    /// slots through their `Drop` impls.
    pub fn abort<R>(&mut self, handle: &JoinHandle<R>) {
        if self.fibers.contains(handle.id) {
            self.fibers.remove(handle.id);
        }
    }

    /// Polls woken fibers in FIFO order until no fiber is runnable.
    ///
    /// Fibers left parked on a queue stay parked; they run again once a
    /// queue operation wakes them and `run_until_stalled` is called again.
    pub fn run_until_stalled(&mut self) {
        while let Some(id) = self.ready.pop() {
            let Some(slot) = self.fibers.get_mut(id) else {
                continue;
            };
            // Leave a tombstone while polling so a reentrant wake targets
            // the right fiber.
            let Some(mut future) = slot.take() else {
                continue;
            };
            let waker = Waker::from(Arc::new(FiberWaker {
                id,
                ready: Arc::clone(&self.ready),
            }));
            let mut task_cx = Context::from_waker(&waker);
            match future.as_mut().poll(&mut task_cx) {
                Poll::Ready(()) => {
                    self.fibers.remove(id);
                }
                Poll::Pending => {
                    if let Some(slot) = self.fibers.get_mut(id) {
                        *slot = Some(future);
                    }
                }
            }
        }
    }

    /// Number of fibers that have neither finished nor been aborted.
    #[must_use]
    pub fn live_fibers(&self) -> usize {
        self.fibers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn init_test(name: &str) {
        crate::test_logging::init_test_logging();
        crate::test_phase!(name);
    }

    /// Future that yields execution back to the executor once.
    struct YieldNow {
        yielded: bool,
    }

    impl Future for YieldNow {
        type Output = ();

        fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
            if self.yielded {
                Poll::Ready(())
            } else {
                self.yielded = true;
                cx.waker().wake_by_ref();
                Poll::Pending
            }
        }
    }

    fn yield_now() -> YieldNow {
        YieldNow { yielded: false }
    }

    #[test]
    fn spawn_runs_to_completion() {
        init_test("spawn_runs_to_completion");
        let mut lab = Lab::new();
        let handle = lab.spawn(async { 40 + 2 });
        lab.run_until_stalled();
        let joined = handle.try_join();
        crate::assert_with_log!(joined == Some(42), "fiber output", Some(42), joined);
        crate::assert_with_log!(lab.live_fibers() == 0, "no live fibers", 0, lab.live_fibers());
        crate::test_complete!("spawn_runs_to_completion");
    }

    #[test]
    fn fibers_run_in_spawn_order() {
        init_test("fibers_run_in_spawn_order");
        let mut lab = Lab::new();
        let order = Arc::new(StdMutex::new(Vec::new()));
        for tag in ["a", "b", "c"] {
            let order = Arc::clone(&order);
            lab.spawn(async move {
                order.lock().expect("order lock").push(tag);
            });
        }
        lab.run_until_stalled();
        let seen = order.lock().expect("order lock").clone();
        crate::assert_with_log!(
            seen == vec!["a", "b", "c"],
            "FIFO spawn order",
            vec!["a", "b", "c"],
            seen
        );
        crate::test_complete!("fibers_run_in_spawn_order");
    }

    #[test]
    fn yield_interleaves_fibers() {
        init_test("yield_interleaves_fibers");
        let mut lab = Lab::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let c1 = Arc::clone(&counter);
        let h1 = lab.spawn(async move {
            yield_now().await;
            c1.fetch_add(1, Ordering::SeqCst);
        });
        let c2 = Arc::clone(&counter);
        let h2 = lab.spawn(async move {
            c2.fetch_add(10, Ordering::SeqCst);
        });
        lab.run_until_stalled();
        let total = counter.load(Ordering::SeqCst);
        crate::assert_with_log!(total == 11, "both fibers ran", 11, total);
        crate::assert_with_log!(h1.is_finished(), "yielding fiber finished", true, h1.is_finished());
        crate::assert_with_log!(h2.is_finished(), "plain fiber finished", true, h2.is_finished());
        crate::test_complete!("yield_interleaves_fibers");
    }

    #[test]
    fn abort_drops_fiber_without_completion() {
        init_test("abort_drops_fiber_without_completion");
        let mut lab = Lab::new();
        let handle = lab.spawn(async {
            // Parks forever: no waker will ever fire.
            std::future::pending::<()>().await;
        });
        lab.run_until_stalled();
        crate::assert_with_log!(lab.live_fibers() == 1, "fiber parked", 1, lab.live_fibers());
        lab.abort(&handle);
        crate::assert_with_log!(lab.live_fibers() == 0, "fiber aborted", 0, lab.live_fibers());
        crate::assert_with_log!(!handle.is_finished(), "no output", false, handle.is_finished());
        crate::test_complete!("abort_drops_fiber_without_completion");
    }
}
