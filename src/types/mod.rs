//! Core types shared across the loop.
//!
//! - [`id`]: Identifier types (`TimerId`, `TaskId`, `SourceId`, ...) and the
//!   loop's monotonic [`Time`]

pub mod id;

pub(crate) use id::IdAllocator;
pub use id::{ListenerId, OperationId, SourceId, TaskId, Time, TimerId, TransferId, WatcherId};
