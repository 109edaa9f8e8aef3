//! Core types for the queue substrate.
//!
//! This module contains the fundamental types used throughout the crate:
//!
//! - [`capacity`]: bounded/unbounded capacity and room arithmetic
//! - [`strategy`]: admission policy applied when a bounded buffer is full
//! - [`lifecycle`]: the monotonic completion state machine tags
//! - [`cancel`]: cancellation reason and kind types

pub mod cancel;
pub mod capacity;
pub mod lifecycle;
pub mod strategy;

pub use cancel::{CancelKind, CancelReason};
pub use capacity::Capacity;
pub use lifecycle::{CloseReason, Lifecycle};
pub use strategy::AdmissionStrategy;
