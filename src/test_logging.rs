//! Structured test logging helpers.
//!
//! Every test in this crate starts with [`init_test_logging`] and marks its
//! phases with [`test_phase!`](crate::test_phase) /
//! [`test_complete!`](crate::test_complete). Assertions go through
//! [`assert_with_log!`](crate::assert_with_log) so a failing run records
//! the expected and actual values as structured events before panicking.

use std::sync::Once;

static INIT: Once = Once::new();

/// Installs the test tracing subscriber once per process.
///
/// Later calls are no-ops, so every test can call this unconditionally.
pub fn init_test_logging() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::TRACE)
            .with_test_writer()
            .try_init();
    });
}

/// Marks the start of a named test phase.
#[macro_export]
macro_rules! test_phase {
    ($name:expr) => {
        ::tracing::info!(phase = $name, "test phase start");
    };
}

/// Marks the successful completion of a named test phase.
#[macro_export]
macro_rules! test_complete {
    ($name:expr) => {
        ::tracing::info!(phase = $name, "test phase complete");
    };
}

/// Asserts a condition, logging the expected and actual values either way.
#[macro_export]
macro_rules! assert_with_log {
    ($cond:expr, $what:expr, $expected:expr, $actual:expr) => {{
        let ok = $cond;
        if ok {
            ::tracing::debug!(check = $what, "assertion held");
        } else {
            ::tracing::error!(
                check = $what,
                expected = ?$expected,
                actual = ?$actual,
                "assertion failed"
            );
        }
        assert!(ok, "{}: expected {:?}, got {:?}", $what, $expected, $actual);
    }};
}
