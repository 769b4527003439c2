//! Descriptor readiness for the I/O phase.
//!
//! [`StreamSource`] watches sockets, pipes and other pollable descriptors and
//! runs callbacks when they become readable or writable. Register it with
//! [`SourcePhase::Io`](crate::runtime::SourcePhase::Io).

mod stream;

pub use stream::StreamSource;
