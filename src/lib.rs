//! Aqueduct: cancel-correct queue primitive for cooperative fiber runtimes.
//!
//! # Overview
//!
//! Aqueduct provides the coordination substrate that moves values between
//! independently scheduled lightweight tasks ("fibers"): a bounded or
//! unbounded FIFO queue with backpressure, pluggable admission strategies,
//! graceful draining, typed failure propagation, and cooperative
//! cancellation. It embeds no executor: every suspending operation is an
//! ordinary [`Future`](core::future::Future) that registers a waker, so the
//! queue can be driven by any scheduler.
//!
//! # Core Guarantees
//!
//! - **FIFO, twice over**: items are delivered in admission order, and
//!   parked producers are admitted in arrival order — no overtaking, no
//!   starvation under backpressure
//! - **No silent drops**: completion is request → drain → finalize; buffered
//!   items survive `end` and `fail`, and cancellation of a parked operation
//!   never rolls back an already-admitted prefix
//! - **Monotonic completion**: `Open → Closing(reason) → Closed(reason)` is
//!   a one-way street; `end`/`fail`/`shutdown` are idempotent
//! - **Cancel-correctness**: cancellation is a first-class protocol, both
//!   cooperative (via [`Cx`] checkpoints) and structural (dropping a parked
//!   future releases its slot without corrupting waiter order)
//! - **One exclusion domain**: a single mutex guards the buffer, lifecycle,
//!   and waiter lists, so no caller ever observes a partially updated queue
//!
//! # Module Structure
//!
//! - [`types`]: capacity, admission strategy, lifecycle, and cancellation
//!   types
//! - [`error`](mod@error): the take-side error taxonomy
//! - [`cx`]: capability context for cooperative cancellation
//! - [`queue`]: the queue itself — state machine, waiter arena, futures,
//!   and the public facade
//! - [`stream`]: pull-based consumer adapter over a queue
//! - [`lab`]: deterministic single-threaded executor for driving fibers in
//!   tests
//!
//! # Example
//!
//! ```ignore
//! use aqueduct::{Cx, Queue};
//!
//! let cx = Cx::new();
//! let queue: Queue<u32, String> = Queue::bounded(16);
//!
//! // Producer fiber: suspends when the buffer is full.
//! queue.offer(&cx, 1).await;
//!
//! // Consumer fiber: suspends when the buffer is empty.
//! let item = queue.take(&cx).await?;
//!
//! // Graceful completion: buffered items still drain, then takes see Done.
//! queue.end();
//! queue.await_done(&cx).await?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::module_inception)]
#![allow(clippy::doc_markdown)]

pub mod cx;
pub mod error;
pub mod lab;
pub mod queue;
pub mod stream;
pub mod types;

// ── Test-only modules ───────────────────────────────────────────────────
#[cfg(any(test, feature = "test-internals"))]
pub mod test_logging;

// Re-exports for convenient access to core types
pub use cx::Cx;
pub use error::TakeError;
pub use queue::{
    AwaitDoneFuture, OfferAllFuture, OfferFuture, Queue, QueueOptions, TakeAllFuture, TakeFuture,
    TakeNFuture,
};
pub use stream::QueueStream;
pub use types::{AdmissionStrategy, CancelKind, CancelReason, Capacity, CloseReason, Lifecycle};
