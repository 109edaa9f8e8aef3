//! Pull-based consumer adapter over a queue.
//!
//! [`QueueStream`] turns the take side of a [`Queue`] into a terminating
//! pull sequence: items arrive as `Some(Ok(item))`, a queue closed by
//! `fail` yields its failure once as `Some(Err(e))`, and the `Done` signal
//! becomes a terminal `None`. Once `None` or the failure has been yielded
//! the stream stays terminated, even if polled again.
//!
//! # Cancel Safety
//!
//! The in-flight take is held across polls, so a `Pending` result keeps the
//! stream's waiter slot registered. Dropping the stream mid-wait releases
//! the slot like any other cancelled take; a cooperative cancel through the
//! carried [`Cx`] terminates the stream.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use crate::cx::Cx;
use crate::error::TakeError;
use crate::queue::Queue;

type PendingTake<T, E> = Pin<Box<dyn Future<Output = Result<T, TakeError<E>>>>>;

/// A terminating pull sequence over a queue's take side.
pub struct QueueStream<T, E> {
    queue: Queue<T, E>,
    cx: Cx,
    /// The take in flight, kept across polls so its waiter registration
    /// survives `Pending`.
    pending: Option<PendingTake<T, E>>,
    terminated: bool,
}

impl<T, E> fmt::Debug for QueueStream<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueStream")
            .field("terminated", &self.terminated)
            .field("waiting", &self.pending.is_some())
            .finish_non_exhaustive()
    }
}

impl<T: 'static, E: Clone + 'static> QueueStream<T, E> {
    /// Creates a stream with an explicit capability context.
    #[must_use]
    pub fn new(cx: Cx, queue: Queue<T, E>) -> Self {
        cx.trace("stream::QueueStream created");
        Self {
            queue,
            cx,
            pending: None,
            terminated: false,
        }
    }

    /// Returns a reference to the underlying queue.
    #[must_use]
    pub fn get_ref(&self) -> &Queue<T, E> {
        &self.queue
    }

    /// Returns a reference to the capability context.
    #[must_use]
    pub fn cx(&self) -> &Cx {
        &self.cx
    }

    /// Unwraps the stream into the underlying queue.
    ///
    /// Any take in flight is cancelled, releasing its waiter slot.
    #[must_use]
    pub fn into_inner(self) -> Queue<T, E> {
        self.queue
    }

    /// Attempts to pull the next element.
    ///
    /// - `Poll::Pending`: the queue is open and empty; the task is parked.
    /// - `Poll::Ready(Some(Ok(item)))`: the oldest buffered item.
    /// - `Poll::Ready(Some(Err(e)))`: the queue failed; yielded once.
    /// - `Poll::Ready(None)`: the queue is done; terminal.
    pub fn poll_next(&mut self, poll_cx: &mut Context<'_>) -> Poll<Option<Result<T, E>>> {
        if self.terminated {
            return Poll::Ready(None);
        }

        let pending = self.pending.get_or_insert_with(|| {
            let queue = self.queue.clone();
            let cx = self.cx.clone();
            Box::pin(async move { queue.take(&cx).await })
        });
        match pending.as_mut().poll(poll_cx) {
            Poll::Ready(result) => {
                self.pending = None;
                match result {
                    Ok(item) => Poll::Ready(Some(Ok(item))),
                    Err(TakeError::Failed(error)) => {
                        self.terminated = true;
                        Poll::Ready(Some(Err(error)))
                    }
                    Err(TakeError::Done | TakeError::Cancelled) => {
                        self.terminated = true;
                        Poll::Ready(None)
                    }
                }
            }
            Poll::Pending => Poll::Pending,
        }
    }

    /// The next element, as a future.
    pub fn next(&mut self) -> NextFuture<'_, T, E> {
        NextFuture { stream: self }
    }
}

/// Future returned by [`QueueStream::next`].
#[must_use = "futures do nothing unless polled"]
pub struct NextFuture<'a, T, E> {
    stream: &'a mut QueueStream<T, E>,
}

impl<T, E> Unpin for NextFuture<'_, T, E> {}

impl<T: 'static, E: Clone + 'static> Future for NextFuture<'_, T, E> {
    type Output = Option<Result<T, E>>;

    fn poll(mut self: Pin<&mut Self>, poll_cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.stream.poll_next(poll_cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::task::{Wake, Waker};

    struct NoopWaker;

    impl Wake for NoopWaker {
        fn wake(self: Arc<Self>) {}
    }

    fn noop_waker() -> Waker {
        Waker::from(Arc::new(NoopWaker))
    }

    fn init_test(name: &str) {
        crate::test_logging::init_test_logging();
        crate::test_phase!(name);
    }

    #[test]
    fn stream_yields_items_then_none_after_end() {
        init_test("stream_yields_items_then_none_after_end");
        let cx = Cx::for_testing();
        let queue: Queue<i32, String> = Queue::unbounded();
        let producer_cx = Cx::for_testing();
        for item in [1, 2, 3] {
            let admitted = futures_lite::future::block_on(queue.offer(&producer_cx, item));
            assert!(admitted, "unbounded offer admits");
        }
        queue.end();

        let mut stream = QueueStream::new(cx, queue);
        let waker = noop_waker();
        let mut poll_cx = Context::from_waker(&waker);

        for expected in [1, 2, 3] {
            let poll = stream.poll_next(&mut poll_cx);
            let ok = matches!(poll, Poll::Ready(Some(Ok(item))) if item == expected);
            crate::assert_with_log!(ok, "item yielded", expected, format!("{poll:?}"));
        }
        let poll = stream.poll_next(&mut poll_cx);
        let done = matches!(poll, Poll::Ready(None));
        crate::assert_with_log!(done, "terminal None", true, done);

        // Terminal: polling again stays None.
        let poll = stream.poll_next(&mut poll_cx);
        let still_done = matches!(poll, Poll::Ready(None));
        crate::assert_with_log!(still_done, "stream stays terminated", true, still_done);
        crate::test_complete!("stream_yields_items_then_none_after_end");
    }

    #[test]
    fn stream_yields_failure_once() {
        init_test("stream_yields_failure_once");
        let cx = Cx::for_testing();
        let queue: Queue<i32, String> = Queue::unbounded();
        queue.fail("boom".to_owned());

        let mut stream = QueueStream::new(cx, queue);
        let waker = noop_waker();
        let mut poll_cx = Context::from_waker(&waker);

        let poll = stream.poll_next(&mut poll_cx);
        let failed = matches!(poll, Poll::Ready(Some(Err(ref e))) if e == "boom");
        crate::assert_with_log!(failed, "failure yielded", "boom", format!("{poll:?}"));

        let poll = stream.poll_next(&mut poll_cx);
        let done = matches!(poll, Poll::Ready(None));
        crate::assert_with_log!(done, "terminal after failure", true, done);
        crate::test_complete!("stream_yields_failure_once");
    }

    #[test]
    fn stream_drains_buffer_before_failure() {
        init_test("stream_drains_buffer_before_failure");
        let cx = Cx::for_testing();
        let queue: Queue<i32, String> = Queue::unbounded();
        let producer_cx = Cx::for_testing();
        let admitted = futures_lite::future::block_on(queue.offer(&producer_cx, 7));
        assert!(admitted, "offer admitted");
        queue.fail("late".to_owned());

        let mut stream = QueueStream::new(cx, queue);
        let waker = noop_waker();
        let mut poll_cx = Context::from_waker(&waker);

        let poll = stream.poll_next(&mut poll_cx);
        let ok = matches!(poll, Poll::Ready(Some(Ok(7))));
        crate::assert_with_log!(ok, "buffered item first", true, ok);
        let poll = stream.poll_next(&mut poll_cx);
        let failed = matches!(poll, Poll::Ready(Some(Err(ref e))) if e == "late");
        crate::assert_with_log!(failed, "failure after drain", true, failed);
        crate::test_complete!("stream_drains_buffer_before_failure");
    }

    #[test]
    fn stream_pending_keeps_waiter_registered() {
        init_test("stream_pending_keeps_waiter_registered");
        let cx = Cx::for_testing();
        let queue: Queue<i32, String> = Queue::unbounded();
        let mut stream = QueueStream::new(cx, queue.clone());
        let waker = noop_waker();
        let mut poll_cx = Context::from_waker(&waker);

        let poll = stream.poll_next(&mut poll_cx);
        let pending = poll.is_pending();
        crate::assert_with_log!(pending, "open empty queue is Pending", true, pending);

        // The parked waiter must receive an item offered afterwards.
        let producer_cx = Cx::for_testing();
        let admitted = futures_lite::future::block_on(queue.offer(&producer_cx, 9));
        assert!(admitted, "offer admitted");
        let poll = stream.poll_next(&mut poll_cx);
        let ok = matches!(poll, Poll::Ready(Some(Ok(9))));
        crate::assert_with_log!(ok, "parked stream receives item", true, ok);
        crate::test_complete!("stream_pending_keeps_waiter_registered");
    }

    #[test]
    fn cancelled_cx_terminates_stream() {
        init_test("cancelled_cx_terminates_stream");
        let cx = Cx::for_testing();
        cx.set_cancel_requested(true);
        let queue: Queue<i32, String> = Queue::unbounded();
        let mut stream = QueueStream::new(cx.clone(), queue);
        let waker = noop_waker();
        let mut poll_cx = Context::from_waker(&waker);

        let poll = stream.poll_next(&mut poll_cx);
        let done = matches!(poll, Poll::Ready(None));
        crate::assert_with_log!(done, "cancel terminates stream", true, done);

        // Clearing the cancel does not revive a terminated stream.
        cx.set_cancel_requested(false);
        let poll = stream.poll_next(&mut poll_cx);
        let still_done = matches!(poll, Poll::Ready(None));
        crate::assert_with_log!(still_done, "stream remains terminated", true, still_done);
        crate::test_complete!("cancelled_cx_terminates_stream");
    }
}
