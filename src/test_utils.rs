//! Test helpers shared by unit and integration tests.
//!
//! Logging goes through `tracing` at trace level, so the loop's own events
//! (with `tracing-integration` on) interleave with test phases.

use std::sync::Once;

#[doc(hidden)]
pub use tracing as __tracing;

static INIT: Once = Once::new();

/// Installs a test-writer `tracing` subscriber once per process.
///
/// Safe to call from every test; later calls are no-ops.
pub fn init_test_logging() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_max_level(tracing::Level::TRACE)
            .with_target(true)
            .try_init();
    });
}

/// Logs the start of a test phase.
#[macro_export]
macro_rules! test_phase {
    ($name:expr) => {
        $crate::test_utils::__tracing::info!(phase = %$name, "==== test phase ====");
    };
}

/// Logs a named section inside a test.
#[macro_export]
macro_rules! test_section {
    ($name:expr) => {
        $crate::test_utils::__tracing::debug!(section = %$name, "---- section ----");
    };
}

/// Logs successful completion of a test.
#[macro_export]
macro_rules! test_complete {
    ($name:expr) => {
        $crate::test_utils::__tracing::info!(test = %$name, "test complete");
    };
}

/// Asserts a condition, logging the expected and actual values first.
#[macro_export]
macro_rules! assert_with_log {
    ($cond:expr, $msg:expr, $expected:expr, $actual:expr) => {{
        let passed: bool = $cond;
        let expected = &$expected;
        let actual = &$actual;
        $crate::test_utils::__tracing::debug!(
            passed,
            expected = ?expected,
            actual = ?actual,
            "{}",
            $msg
        );
        assert!(passed, "{}: expected {:?}, actual {:?}", $msg, expected, actual);
    }};
}
