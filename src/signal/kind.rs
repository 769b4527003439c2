//! Signals the loop can listen for.

use serde::{Deserialize, Serialize};

/// Unix signals a [`SignalSource`](super::SignalSource) can dispatch.
///
/// Signals whose default action cannot be overridden (`SIGKILL`, `SIGSTOP`)
/// or that indicate a fault (`SIGSEGV`, `SIGILL`, ...) are not listed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[non_exhaustive]
pub enum SignalKind {
    /// `SIGINT`, sent by Ctrl+C.
    Interrupt,
    /// `SIGTERM`, a polite request to exit.
    Terminate,
    /// `SIGHUP`, conventionally "reload configuration" for daemons.
    Hangup,
    /// `SIGQUIT`, sent by Ctrl+Backslash.
    Quit,
    /// `SIGUSR1`, application defined.
    User1,
    /// `SIGUSR2`, application defined.
    User2,
    /// `SIGCHLD`, a child process changed state.
    Child,
    /// `SIGWINCH`, the terminal was resized.
    WindowChange,
    /// `SIGPIPE`, a write hit a closed pipe or socket.
    Pipe,
    /// `SIGALRM`, an `alarm(2)` expired.
    Alarm,
}

impl SignalKind {
    /// Every listenable signal.
    pub const ALL: [Self; 10] = [
        Self::Interrupt,
        Self::Terminate,
        Self::Hangup,
        Self::Quit,
        Self::User1,
        Self::User2,
        Self::Child,
        Self::WindowChange,
        Self::Pipe,
        Self::Alarm,
    ];

    /// The platform signal number, or `None` where signals are unsupported.
    #[cfg(unix)]
    #[must_use]
    pub const fn as_raw_value(&self) -> Option<i32> {
        Some(match self {
            Self::Interrupt => libc::SIGINT,
            Self::Terminate => libc::SIGTERM,
            Self::Hangup => libc::SIGHUP,
            Self::Quit => libc::SIGQUIT,
            Self::User1 => libc::SIGUSR1,
            Self::User2 => libc::SIGUSR2,
            Self::Child => libc::SIGCHLD,
            Self::WindowChange => libc::SIGWINCH,
            Self::Pipe => libc::SIGPIPE,
            Self::Alarm => libc::SIGALRM,
        })
    }

    /// The platform signal number, or `None` where signals are unsupported.
    #[cfg(not(unix))]
    #[must_use]
    pub const fn as_raw_value(&self) -> Option<i32> {
        None
    }

    /// Looks up the kind for a platform signal number.
    #[must_use]
    pub fn from_raw(raw: i32) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_raw_value() == Some(raw))
    }

    /// Conventional `SIG*` name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Interrupt => "SIGINT",
            Self::Terminate => "SIGTERM",
            Self::Hangup => "SIGHUP",
            Self::Quit => "SIGQUIT",
            Self::User1 => "SIGUSR1",
            Self::User2 => "SIGUSR2",
            Self::Child => "SIGCHLD",
            Self::WindowChange => "SIGWINCH",
            Self::Pipe => "SIGPIPE",
            Self::Alarm => "SIGALRM",
        }
    }
}

impl std::fmt::Display for SignalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
