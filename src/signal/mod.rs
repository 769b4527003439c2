//! OS signal handling.
//!
//! [`SignalSource`] is a [`WorkSource`](crate::runtime::WorkSource) that
//! records signals asynchronously and runs their listeners on the loop
//! thread. Signals are only available on Unix; elsewhere adding a listener
//! fails with [`Error::Unsupported`](crate::Error::Unsupported).

mod kind;
mod source;

pub use kind::SignalKind;
pub use source::SignalSource;
