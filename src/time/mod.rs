//! Time sources and timer-backed futures.
//!
//! - [`clock`]: the [`TimeSource`] trait, [`WallClock`] and [`VirtualClock`]
//! - [`sleep`]: the [`Sleep`] future returned by `LoopHandle::sleep`

pub mod clock;
pub mod sleep;

pub use clock::{TimeSource, VirtualClock, WallClock};
pub use sleep::Sleep;
