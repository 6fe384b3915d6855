/*!
 * Record States
 * Lifecycle states of components and connections
 */

use serde::{Deserialize, Serialize};
use std::fmt;

/// Manager-side state of a component record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AbilityState {
    #[default]
    Initial,
    Inactive,
    Active,
    Inactivating,
    Activating,
    Terminating,
    Foreground,
    Background,
    Foregrounding,
    Backgrounding,
}

impl AbilityState {
    #[inline]
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            AbilityState::Initial => "INITIAL",
            AbilityState::Inactive => "INACTIVE",
            AbilityState::Active => "ACTIVE",
            AbilityState::Inactivating => "INACTIVATING",
            AbilityState::Activating => "ACTIVATING",
            AbilityState::Terminating => "TERMINATING",
            AbilityState::Foreground => "FOREGROUND",
            AbilityState::Background => "BACKGROUND",
            AbilityState::Foregrounding => "FOREGROUNDING",
            AbilityState::Backgrounding => "BACKGROUNDING",
        }
    }

    /// Pending state waiting for an acknowledgement
    #[inline(always)]
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            AbilityState::Inactivating
                | AbilityState::Activating
                | AbilityState::Foregrounding
                | AbilityState::Backgrounding
                | AbilityState::Terminating
        )
    }

    #[inline(always)]
    #[must_use]
    pub const fn is_foreground_like(&self) -> bool {
        matches!(self, AbilityState::Foreground | AbilityState::Foregrounding)
    }
}

impl fmt::Display for AbilityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Target state reported by the hosted process in a transition-done call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LifecycleState {
    Initial,
    Inactive,
    Active,
    Foreground,
    Background,
}

impl LifecycleState {
    /// Manager state entered when the hosted process confirms this target
    #[inline]
    #[must_use]
    pub const fn settled(&self) -> AbilityState {
        match self {
            LifecycleState::Initial => AbilityState::Initial,
            LifecycleState::Inactive => AbilityState::Inactive,
            LifecycleState::Active => AbilityState::Active,
            LifecycleState::Foreground => AbilityState::Foreground,
            LifecycleState::Background => AbilityState::Background,
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.settled().as_str())
    }
}

/// Binding state of a connection record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnecting,
    Disconnected,
}

impl ConnectionState {
    /// Disconnect already requested or done
    #[inline(always)]
    #[must_use]
    pub const fn is_winding_down(&self) -> bool {
        matches!(self, ConnectionState::Disconnecting | ConnectionState::Disconnected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Connecting => "CONNECTING",
            ConnectionState::Connected => "CONNECTED",
            ConnectionState::Disconnecting => "DISCONNECTING",
            ConnectionState::Disconnected => "DISCONNECTED",
        };
        f.write_str(s)
    }
}
