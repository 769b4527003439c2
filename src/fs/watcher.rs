//! Polling path watchers.

use crate::types::Time;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

/// Default interval between two metadata checks.
pub const DEFAULT_WATCH_INTERVAL: Duration = Duration::from_millis(100);

/// Change observed by a path watcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum WatchEvent {
    /// The path appeared.
    Created,
    /// The modification time (or the size, when watched) changed.
    Modified,
    /// The path disappeared.
    Deleted,
}

/// How a path is watched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchOptions {
    /// Time between metadata checks.
    pub interval: Duration,
    /// Report size changes even if the modification time did not move.
    pub watch_size: bool,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            interval: DEFAULT_WATCH_INTERVAL,
            watch_size: true,
        }
    }
}

impl WatchOptions {
    /// Options with a custom interval.
    #[must_use]
    pub fn every(interval: Duration) -> Self {
        Self {
            interval,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Snapshot {
    modified: Option<SystemTime>,
    size: u64,
}

impl Snapshot {
    fn of(path: &Path) -> Option<Self> {
        let meta = fs::metadata(path).ok()?;
        Some(Self {
            modified: meta.modified().ok(),
            size: meta.len(),
        })
    }
}

/// Metadata state of one watched path.
#[derive(Debug)]
pub(crate) struct PathState {
    path: PathBuf,
    options: WatchOptions,
    last: Option<Snapshot>,
    next_check: Time,
}

impl PathState {
    pub(crate) fn new(path: PathBuf, options: WatchOptions, now: Time) -> Self {
        let last = Snapshot::of(&path);
        Self {
            path,
            options,
            last,
            next_check: now + options.interval,
        }
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    /// Compares the path's metadata with the last check, if the interval
    /// has elapsed.
    pub(crate) fn check(&mut self, now: Time) -> Option<WatchEvent> {
        if now < self.next_check {
            return None;
        }
        self.next_check = now + self.options.interval;
        let current = Snapshot::of(&self.path);
        let event = match (self.last, current) {
            (None, Some(_)) => Some(WatchEvent::Created),
            (Some(_), None) => Some(WatchEvent::Deleted),
            (Some(before), Some(after)) => {
                let moved = before.modified != after.modified;
                let resized = self.options.watch_size && before.size != after.size;
                (moved || resized).then_some(WatchEvent::Modified)
            }
            (None, None) => None,
        };
        self.last = current;
        event
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn init_test(name: &str) {
        crate::test_utils::init_test_logging();
        crate::test_phase!(name);
    }

    #[test]
    fn reports_create_modify_delete_on_interval() {
        init_test("reports_create_modify_delete_on_interval");
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("watched");
        let interval = Duration::from_millis(100);
        let mut state = PathState::new(path.clone(), WatchOptions::every(interval), Time::ZERO);
        let mut now = Time::ZERO;

        fs::write(&path, "a").unwrap();
        assert_eq!(state.check(now), None, "interval not elapsed");
        now = now + interval;
        let event = state.check(now);
        crate::assert_with_log!(
            event == Some(WatchEvent::Created),
            "created",
            Some(WatchEvent::Created),
            event
        );

        fs::write(&path, "abc").unwrap();
        now = now + interval;
        assert_eq!(state.check(now), Some(WatchEvent::Modified));
        now = now + interval;
        assert_eq!(state.check(now), None, "no change since last check");

        fs::remove_file(&path).unwrap();
        now = now + interval;
        assert_eq!(state.check(now), Some(WatchEvent::Deleted));
        crate::test_complete!("reports_create_modify_delete_on_interval");
    }
}
