/*!
 * System Limits and Constants
 *
 * Centralized location for lifecycle timeouts, restart budgets and queue
 * bounds. Organized by domain.
 */

use std::time::Duration;

// =============================================================================
// START TIMEOUTS
// =============================================================================

/// Base unit every start-path timeout is multiplied from (app start timeout)
pub const DEFAULT_BASE_TIMEOUT: Duration = Duration::from_millis(1000);

/// Load timeout multiple. Loading spawns a process and is the slowest step.
pub const LOAD_TIMEOUT_MULTIPLE: u32 = 10;

/// Connect timeout multiple
pub const CONNECT_TIMEOUT_MULTIPLE: u32 = 3;

/// Command timeout multiple
pub const COMMAND_TIMEOUT_MULTIPLE: u32 = 5;

/// Load multiple for diagnostic (sanitizer) builds
pub const DIAGNOSTIC_LOAD_TIMEOUT_MULTIPLE: u32 = 150;

/// Connect multiple for diagnostic builds
pub const DIAGNOSTIC_CONNECT_TIMEOUT_MULTIPLE: u32 = 45;

/// Command multiple for diagnostic builds
pub const DIAGNOSTIC_COMMAND_TIMEOUT_MULTIPLE: u32 = 75;

// =============================================================================
// LIFECYCLE TIMEOUTS
// =============================================================================

/// Inactivate acknowledgement budget
pub const INACTIVE_TIMEOUT: Duration = Duration::from_millis(500);

/// Foreground acknowledgement budget
pub const FOREGROUND_TIMEOUT: Duration = Duration::from_secs(5);

/// Background acknowledgement budget
pub const BACKGROUND_TIMEOUT: Duration = Duration::from_secs(3);

/// Terminate acknowledgement budget. Expiry forces cleanup.
pub const TERMINATE_TIMEOUT: Duration = Duration::from_secs(10);

/// Graceful disconnect acknowledgement budget
pub const DISCONNECT_TIMEOUT: Duration = Duration::from_millis(500);

/// Delay before the waiting queue is re-examined after a foreground completes
pub const START_WAITING_DELAY: Duration = Duration::from_millis(1000);

/// Delay before returning to the launcher after a foreground component died
pub const LAUNCHER_RESTART_DELAY: Duration = Duration::from_millis(0);

/// Delay before a dead or timed-out system UI component is started again
pub const SYSTEM_UI_RESTART_DELAY: Duration = Duration::from_secs(5);

/// Interval between resident restarts once the quick-restart budget is spent
pub const RESIDENT_RESTART_INTERVAL: Duration = Duration::from_secs(5);

// =============================================================================
// RESTART BUDGETS
// =============================================================================

/// Restarts granted to the root launcher before loading fails permanently
pub const LAUNCHER_RESTART_MAX: i32 = 3;

/// Quick restarts granted to other resident components
pub const RESIDENT_RESTART_MAX: i32 = 3;

// =============================================================================
// COMPONENT NAMES
// =============================================================================

/// Bundle of the home launcher
pub const LAUNCHER_BUNDLE_NAME: &str = "com.ohos.launcher";

/// Root ability of the home launcher
pub const LAUNCHER_ABILITY_NAME: &str = "com.ohos.launcher.MainAbility";

/// Bundle of the system UI
pub const SYSTEM_UI_BUNDLE_NAME: &str = "com.ohos.systemui";

/// Service extension of the system UI
pub const SYSTEM_UI_ABILITY_NAME: &str = "com.ohos.systemui.ServiceExtAbility";

// =============================================================================
// QUEUE BOUNDS
// =============================================================================

/// Callbacks remembered after their last connection went away
pub const DISCONNECTED_CALLBACK_HISTORY: usize = 256;

/// Buffered lifecycle events per bus subscriber
pub const EVENT_SUBSCRIBER_CAPACITY: usize = 1024;

/// Default result code used when a request carries none
pub const DEFAULT_INVALID_VALUE: i32 = -1;
