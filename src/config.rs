/*!
 * Kernel Configuration
 *
 * Timeout policy and restart budgets handed to every manager at
 * construction. Start-path timeouts are a base unit times a per-operation
 * multiple; the remaining lifecycle timeouts are absolute.
 */

use crate::core::limits::*;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};
use std::time::Duration;

/// Base timeout override in milliseconds
pub const ENV_BASE_TIMEOUT_MS: &str = "ABILITY_KERNEL_BASE_TIMEOUT_MS";

/// Switch to diagnostic multiples when set to `1` or `true`
pub const ENV_DIAGNOSTIC: &str = "ABILITY_KERNEL_DIAGNOSTIC";

/// Lifecycle timeout configuration
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// Unit the start-path multiples apply to (default: 1s)
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub base: Duration,

    /// Load timeout multiple (default: 10)
    pub load_multiple: u32,

    /// Connect timeout multiple (default: 3)
    pub connect_multiple: u32,

    /// Command timeout multiple (default: 5)
    pub command_multiple: u32,

    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub inactive: Duration,

    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub foreground: Duration,

    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub background: Duration,

    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub terminate: Duration,

    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub disconnect: Duration,

    /// Delay before the waiting queue is drained after a foreground
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub start_waiting_delay: Duration,

    /// Delay before returning home after a foreground page died
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub launcher_restart_delay: Duration,

    /// Interval between resident restarts once quick restarts are spent
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub resident_restart_interval: Duration,

    /// Delay before a lost system UI component is started again
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub system_ui_restart_delay: Duration,
}

impl TimeoutConfig {
    /// Create default timeout configuration
    pub fn new() -> Self {
        Self {
            base: DEFAULT_BASE_TIMEOUT,
            load_multiple: LOAD_TIMEOUT_MULTIPLE,
            connect_multiple: CONNECT_TIMEOUT_MULTIPLE,
            command_multiple: COMMAND_TIMEOUT_MULTIPLE,
            inactive: INACTIVE_TIMEOUT,
            foreground: FOREGROUND_TIMEOUT,
            background: BACKGROUND_TIMEOUT,
            terminate: TERMINATE_TIMEOUT,
            disconnect: DISCONNECT_TIMEOUT,
            start_waiting_delay: START_WAITING_DELAY,
            launcher_restart_delay: LAUNCHER_RESTART_DELAY,
            resident_restart_interval: RESIDENT_RESTART_INTERVAL,
            system_ui_restart_delay: SYSTEM_UI_RESTART_DELAY,
        }
    }

    /// Multiples for slow instrumented builds
    pub fn diagnostic() -> Self {
        Self {
            load_multiple: DIAGNOSTIC_LOAD_TIMEOUT_MULTIPLE,
            connect_multiple: DIAGNOSTIC_CONNECT_TIMEOUT_MULTIPLE,
            command_multiple: DIAGNOSTIC_COMMAND_TIMEOUT_MULTIPLE,
            ..Self::new()
        }
    }

    /// Short timeouts for development and tests
    pub fn aggressive() -> Self {
        Self {
            base: Duration::from_millis(10),
            inactive: Duration::from_millis(20),
            foreground: Duration::from_millis(50),
            background: Duration::from_millis(30),
            terminate: Duration::from_millis(100),
            disconnect: Duration::from_millis(20),
            start_waiting_delay: Duration::from_millis(10),
            launcher_restart_delay: Duration::from_millis(0),
            resident_restart_interval: Duration::from_millis(50),
            system_ui_restart_delay: Duration::from_millis(20),
            ..Self::new()
        }
    }

    /// Generous timeouts for slow environments
    pub fn relaxed() -> Self {
        Self {
            base: Duration::from_secs(3),
            foreground: Duration::from_secs(15),
            background: Duration::from_secs(10),
            terminate: Duration::from_secs(30),
            ..Self::new()
        }
    }

    #[inline]
    #[must_use]
    pub fn with_base(mut self, base: Duration) -> Self {
        self.base = base;
        self
    }

    #[inline]
    pub fn load(&self) -> Duration {
        self.base * self.load_multiple
    }

    #[inline]
    pub fn connect(&self) -> Duration {
        self.base * self.connect_multiple
    }

    #[inline]
    pub fn command(&self) -> Duration {
        self.base * self.command_multiple
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        if cfg!(feature = "diagnostic-timeouts") {
            Self::diagnostic()
        } else {
            Self::new()
        }
    }
}

/// Configuration shared by every session of a service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelConfig {
    pub timeouts: TimeoutConfig,

    /// Restarts granted to the root launcher
    pub launcher_restart_max: i32,

    /// Quick restarts granted to other residents
    pub resident_restart_max: i32,

    /// Buffered events per bus subscriber
    pub event_queue_capacity: usize,

    pub launcher_bundle: String,
    pub launcher_ability: String,
}

impl KernelConfig {
    pub fn new() -> Self {
        Self {
            timeouts: TimeoutConfig::default(),
            launcher_restart_max: LAUNCHER_RESTART_MAX,
            resident_restart_max: RESIDENT_RESTART_MAX,
            event_queue_capacity: EVENT_SUBSCRIBER_CAPACITY,
            launcher_bundle: LAUNCHER_BUNDLE_NAME.to_string(),
            launcher_ability: LAUNCHER_ABILITY_NAME.to_string(),
        }
    }

    /// Defaults overridden by `ABILITY_KERNEL_*` environment variables
    pub fn from_env() -> Self {
        let mut config = Self::new();
        let diagnostic = std::env::var(ENV_DIAGNOSTIC)
            .map(|v| v == "1" || v == "true")
            .unwrap_or(false);
        if diagnostic {
            config.timeouts = TimeoutConfig::diagnostic();
        }
        if let Some(ms) = std::env::var(ENV_BASE_TIMEOUT_MS)
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
        {
            config.timeouts.base = Duration::from_millis(ms);
        }
        config
    }

    #[inline]
    #[must_use]
    pub fn with_timeouts(mut self, timeouts: TimeoutConfig) -> Self {
        self.timeouts = timeouts;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_launcher(mut self, bundle: impl Into<String>, ability: impl Into<String>) -> Self {
        self.launcher_bundle = bundle.into();
        self.launcher_ability = ability.into();
        self
    }

    #[inline]
    #[must_use]
    pub fn with_launcher_restart_max(mut self, max: i32) -> Self {
        self.launcher_restart_max = max;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_event_queue_capacity(mut self, capacity: usize) -> Self {
        self.event_queue_capacity = capacity;
        self
    }

    /// True for the root launcher component name
    pub fn is_launcher(&self, bundle: &str, ability: &str) -> bool {
        bundle == self.launcher_bundle && ability == self.launcher_ability
    }
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self::new()
    }
}
