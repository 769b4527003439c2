//! Identifier types for loop entities.
//!
//! Timers, listeners, watchers, file operations, HTTP transfers and work
//! sources are named by monotonically allocated `u64` handles. Tasks live in
//! a slab and carry a generation so a stale handle never addresses a task
//! that reused the same slot.

use core::fmt;
use serde::{Deserialize, Serialize};
use std::ops::{Add, Sub};
use std::time::Duration;

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(u64);

        impl $name {
            /// Creates an identifier from its raw value.
            #[inline]
            #[must_use]
            pub const fn from_raw(raw: u64) -> Self {
                Self(raw)
            }

            /// Returns the raw value.
            #[inline]
            #[must_use]
            pub const fn as_u64(self) -> u64 {
                self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }
    };
}

define_id!(
    /// Handle returned when a timer is added; used to cancel or inspect it.
    TimerId,
    "timer#"
);
define_id!(
    /// Handle of a signal listener.
    ListenerId,
    "listener#"
);
define_id!(
    /// Handle of a stream readiness watcher or a path watcher.
    WatcherId,
    "watcher#"
);
define_id!(
    /// Handle of a queued file operation.
    OperationId,
    "op#"
);
define_id!(
    /// Handle of an HTTP transfer.
    TransferId,
    "transfer#"
);
define_id!(
    /// Handle of a work source registered with the loop.
    SourceId,
    "source#"
);

/// Monotonic `u64` allocator shared by the registries.
#[derive(Debug, Clone, Default)]
pub(crate) struct IdAllocator {
    next: u64,
}

impl IdAllocator {
    pub(crate) const fn new() -> Self {
        Self { next: 1 }
    }

    pub(crate) fn next(&mut self) -> u64 {
        let raw = self.next.max(1);
        self.next = raw.wrapping_add(1);
        raw
    }
}

/// A unique identifier for a cooperative task.
///
/// The index addresses the scheduler slab; the generation distinguishes
/// successive tasks stored in the same slot.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TaskId {
    index: u32,
    generation: u32,
}

impl TaskId {
    /// Creates a task ID from a slab index and generation.
    #[inline]
    #[must_use]
    pub(crate) const fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    /// Creates a task ID for testing purposes.
    #[doc(hidden)]
    #[must_use]
    pub const fn new_for_test(index: u32, generation: u32) -> Self {
        Self::new(index, generation)
    }

    /// Returns the slab index.
    #[inline]
    #[must_use]
    pub const fn index(self) -> u32 {
        self.index
    }

    /// Returns the generation.
    #[inline]
    #[must_use]
    pub const fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Debug for TaskId {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TaskId({}:{})", self.index, self.generation)
    }
}

impl fmt::Display for TaskId {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task#{}.{}", self.index, self.generation)
    }
}

/// A monotonic timestamp read from the loop's time source.
///
/// With the wall clock this is the time elapsed since the clock was created.
/// With a virtual clock it is whatever the test set it to.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Time(u64);

impl Time {
    /// Clock start.
    pub const ZERO: Self = Self(0);

    /// Never reached; used as "no deadline".
    pub const MAX: Self = Self(u64::MAX);

    /// `nanos` after clock start.
    #[inline]
    #[must_use]
    pub const fn from_nanos(nanos: u64) -> Self {
        Self(nanos)
    }

    /// `millis` after clock start, saturating.
    #[inline]
    #[must_use]
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis.saturating_mul(1_000_000))
    }

    /// `secs` after clock start, saturating.
    #[inline]
    #[must_use]
    pub const fn from_secs(secs: u64) -> Self {
        Self(secs.saturating_mul(1_000_000_000))
    }

    /// Nanoseconds since clock start.
    #[inline]
    #[must_use]
    pub const fn as_nanos(self) -> u64 {
        self.0
    }

    /// Whole milliseconds since clock start.
    #[inline]
    #[must_use]
    pub const fn as_millis(self) -> u64 {
        self.0 / 1_000_000
    }

    /// `self + nanos`, pinned at [`Time::MAX`].
    #[inline]
    #[must_use]
    pub const fn saturating_add_nanos(self, nanos: u64) -> Self {
        Self(self.0.saturating_add(nanos))
    }

    /// Returns the elapsed duration since `earlier`, or zero if `earlier` is
    /// in the future.
    #[inline]
    #[must_use]
    pub const fn duration_since(self, earlier: Self) -> Duration {
        Duration::from_nanos(self.0.saturating_sub(earlier.0))
    }
}

#[inline]
fn duration_nanos(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}

impl Add<Duration> for Time {
    type Output = Self;

    #[inline]
    fn add(self, rhs: Duration) -> Self::Output {
        self.saturating_add_nanos(duration_nanos(rhs))
    }
}

impl Sub<Duration> for Time {
    type Output = Self;

    #[inline]
    fn sub(self, rhs: Duration) -> Self::Output {
        Self(self.0.saturating_sub(duration_nanos(rhs)))
    }
}

impl fmt::Debug for Time {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Time({}ns)", self.0)
    }
}

impl fmt::Display for Time {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 >= 1_000_000_000 {
            write!(
                f,
                "{}.{:03}s",
                self.0 / 1_000_000_000,
                (self.0 / 1_000_000) % 1000
            )
        } else if self.0 >= 1_000_000 {
            write!(f, "{}ms", self.0 / 1_000_000)
        } else if self.0 >= 1_000 {
            write!(f, "{}us", self.0 / 1_000)
        } else {
            write!(f, "{}ns", self.0)
        }
    }
}
