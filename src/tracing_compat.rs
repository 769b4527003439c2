//! Optional tracing integration.
//!
//! With the `tracing-integration` feature the logging macros re-export the
//! `tracing` crate's macros. Without it they expand to nothing, so call sites
//! compile the same way either way:
//!
//! ```ignore
//! use crate::tracing_compat::{debug, warn};
//!
//! debug!(timer = %id, "timer fired");
//! warn!(cap = limit, "microtask drain hit its iteration cap");
//! ```
//!
//! Locals read only by these macros go unused when the feature is off; the
//! crate root allows `unused_variables` in that configuration.

#[cfg(feature = "tracing-integration")]
pub use tracing::{debug, error, info, trace, warn};

#[cfg(not(feature = "tracing-integration"))]
#[doc(hidden)]
#[macro_export]
macro_rules! __phaseloop_log_noop {
    ($($arg:tt)*) => {{}};
}

#[cfg(not(feature = "tracing-integration"))]
pub use crate::__phaseloop_log_noop as debug;
#[cfg(not(feature = "tracing-integration"))]
pub use crate::__phaseloop_log_noop as error;
#[cfg(not(feature = "tracing-integration"))]
pub use crate::__phaseloop_log_noop as info;
#[cfg(not(feature = "tracing-integration"))]
pub use crate::__phaseloop_log_noop as trace;
#[cfg(not(feature = "tracing-integration"))]
pub use crate::__phaseloop_log_noop as warn;
