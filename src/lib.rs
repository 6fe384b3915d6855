/*!
 * Ability Kernel Library
 * Component lifecycle management for an application platform
 */

pub mod config;
pub mod connect;
pub mod core;
pub mod events;
pub mod handler;
pub mod host;
pub mod kernel;
pub mod mission;
pub mod monitoring;
pub mod record;
pub mod service;

// Re-exports
pub use crate::core::{
    codes, to_result_code, AbilityError, AbilityResult, ApplicationInfo, CallbackId, ComponentInfo, ComponentKind,
    ComponentRequest, ConnectionId, ElementName, LaunchMode, MissionId, RecordId, RemoteObject, StartOutcome, Token,
    UserId, Want,
};
pub use config::{KernelConfig, TimeoutConfig};
pub use connect::ConnectManager;
pub use events::{EventBus, EventKind, LifecycleEvent, ManagerKind};
pub use handler::{Clock, EventLoop, ManualClock, SystemClock, TaskDriver, TaskHandler, TimeoutKind, TimerKey};
pub use host::{
    AbilityScheduler, AppCall, AppScheduler, BundleResolver, ConnectionCallback, ConnectionHandle,
    InMemoryMissionStore, InnerMissionInfo, MissionInfoStore, MissionListener, NoopWindowManager, ResolvedComponent,
    Transaction, WindowManager,
};
pub use kernel::KernelAbilityManager;
pub use mission::MissionListManager;
pub use monitoring::init_tracing;
pub use record::{AbilityState, ConnectionState, LifecycleState, RecordSnapshot};
pub use service::{AbilityManagerService, ServiceBuilder, UserSession};
