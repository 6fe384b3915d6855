/*!
 * Timer Keys
 * Structured names for cancellable delayed tasks
 */

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle operation guarded by a timeout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutKind {
    Load,
    Inactive,
    Connect,
    Command,
    Foreground,
    Background,
    Terminate,
    Disconnect,
}

impl TimeoutKind {
    #[inline]
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            TimeoutKind::Load => "LoadTimeout",
            TimeoutKind::Inactive => "InactiveTimeout",
            TimeoutKind::Connect => "ConnectTimeout",
            TimeoutKind::Command => "CommandTimeout",
            TimeoutKind::Foreground => "ForegroundTimeout",
            TimeoutKind::Background => "BackgroundTimeout",
            TimeoutKind::Terminate => "TerminateTimeout",
            TimeoutKind::Disconnect => "DisconnectTimeout",
        }
    }
}

impl fmt::Display for TimeoutKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cancellation key of a delayed task.
///
/// Lifecycle timeouts are keyed by the subject id (a record id, or a
/// connection id for connect and disconnect) plus an optional sub id such as
/// the start id of a command.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TimerKey {
    Lifecycle {
        kind: TimeoutKind,
        subject: u64,
        sub: Option<u64>,
    },
    /// Expiry of the deferred start list for one URI
    StartServiceQueue(String),
    /// Delayed restart of a resident component, by URI
    RestartResident(String),
    /// Delayed return to the launcher
    LauncherRestart,
    /// Delayed drain of the waiting queue
    StartWaiting,
    /// Delayed restart of a system UI component, by `bundle:ability` flag
    SystemUiRestart(String),
}

impl TimerKey {
    #[inline]
    #[must_use]
    pub const fn lifecycle(kind: TimeoutKind, subject: u64) -> Self {
        TimerKey::Lifecycle {
            kind,
            subject,
            sub: None,
        }
    }

    #[inline]
    #[must_use]
    pub const fn command(record: u64, start_id: u64) -> Self {
        TimerKey::Lifecycle {
            kind: TimeoutKind::Command,
            subject: record,
            sub: Some(start_id),
        }
    }

    /// Timeout kind for lifecycle keys
    #[inline]
    #[must_use]
    pub const fn timeout_kind(&self) -> Option<TimeoutKind> {
        match self {
            TimerKey::Lifecycle { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}

impl fmt::Display for TimerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimerKey::Lifecycle {
                kind,
                subject,
                sub: None,
            } => write!(f, "{}_{}", kind, subject),
            TimerKey::Lifecycle {
                kind,
                subject,
                sub: Some(sub),
            } => write!(f, "{}_{}_{}", kind, subject, sub),
            TimerKey::StartServiceQueue(uri) => write!(f, "start_service_timeout:{}", uri),
            TimerKey::RestartResident(uri) => write!(f, "RestartResident_{}", uri),
            TimerKey::LauncherRestart => f.write_str("LauncherRestart"),
            TimerKey::StartWaiting => f.write_str("StartWaiting"),
            TimerKey::SystemUiRestart(name) => write!(f, "SystemUi_Restart_{}", name),
        }
    }
}
