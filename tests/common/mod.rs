/*!
 * Shared Test Fixtures
 * Recording fakes for the hosted-process interfaces and a manual-clock harness
 */

#![allow(dead_code)]

use ability_kernel::core::IdAllocator;
use ability_kernel::host::Dispatcher;
use ability_kernel::{
    AbilityError, AbilityResult, AbilityScheduler, AppCall, AppScheduler, ApplicationInfo, BundleResolver,
    ComponentInfo, ComponentKind, ComponentRequest, ConnectManager, ConnectionCallback, ElementName, EventBus,
    EventKind, InMemoryMissionStore, KernelAbilityManager, KernelConfig, LaunchMode, LifecycleEvent, ManualClock, MissionListManager,
    NoopWindowManager, RemoteObject, ResolvedComponent, TimeoutConfig, Token, Transaction, UserId, Want,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

pub const USER: UserId = 100;
pub const LAUNCHER_BUNDLE: &str = "com.ohos.launcher";
pub const LAUNCHER_ABILITY: &str = "com.ohos.launcher.MainAbility";
pub const SYSTEM_UI_BUNDLE: &str = "com.ohos.systemui";

// ============================================================================
// Recording Host
// ============================================================================

/// Process manager and component scheduler that only records what it is told
#[derive(Default)]
pub struct RecordingHost {
    calls: Mutex<Vec<AppCall>>,
    transactions: Mutex<Vec<(Token, Transaction)>>,
}

impl RecordingHost {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn app_calls(&self) -> Vec<AppCall> {
        self.calls.lock().clone()
    }

    pub fn transactions(&self) -> Vec<(Token, Transaction)> {
        self.transactions.lock().clone()
    }

    pub fn clear(&self) {
        self.calls.lock().clear();
        self.transactions.lock().clear();
    }

    /// Tokens of every LoadAbility call for `uri`, oldest first
    pub fn loads_of(&self, uri: &str) -> Vec<Token> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                AppCall::LoadAbility { token, info, .. } if info.element().uri() == uri => Some(*token),
                _ => None,
            })
            .collect()
    }

    pub fn last_load_of(&self, uri: &str) -> Option<Token> {
        self.loads_of(uri).last().copied()
    }

    pub fn count_app(&self, pred: impl Fn(&AppCall) -> bool) -> usize {
        self.calls.lock().iter().filter(|c| pred(c)).count()
    }

    /// `(caller, request_code, result_code)` of every delivered result
    pub fn results(&self) -> Vec<(Token, i32, i32)> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                AppCall::SendResult {
                    caller,
                    request_code,
                    result_code,
                    ..
                } => Some((*caller, *request_code, *result_code)),
                _ => None,
            })
            .collect()
    }

    /// Command start ids delivered to `token`, in order
    pub fn commands_to(&self, token: Token) -> Vec<u64> {
        self.transactions
            .lock()
            .iter()
            .filter_map(|(t, tx)| match tx {
                Transaction::Command { start_id, .. } if *t == token => Some(*start_id),
                _ => None,
            })
            .collect()
    }

    pub fn count_transactions(&self, token: Token, pred: impl Fn(&Transaction) -> bool) -> usize {
        self.transactions
            .lock()
            .iter()
            .filter(|(t, tx)| *t == token && pred(tx))
            .count()
    }
}

impl AppScheduler for RecordingHost {
    fn submit(&self, call: AppCall) {
        self.calls.lock().push(call);
    }
}

impl AbilityScheduler for RecordingHost {
    fn schedule(&self, token: Token, transaction: Transaction) {
        self.transactions.lock().push((token, transaction));
    }
}

// ============================================================================
// Connection Callback
// ============================================================================

#[derive(Default)]
pub struct RecordingConnection {
    connects: Mutex<Vec<(ElementName, Option<RemoteObject>, i32)>>,
    disconnects: Mutex<Vec<(ElementName, i32)>>,
}

impl RecordingConnection {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn connect_results(&self) -> Vec<i32> {
        self.connects.lock().iter().map(|(_, _, r)| *r).collect()
    }

    pub fn remotes(&self) -> Vec<Option<RemoteObject>> {
        self.connects.lock().iter().map(|(_, remote, _)| *remote).collect()
    }

    pub fn disconnect_results(&self) -> Vec<i32> {
        self.disconnects.lock().iter().map(|(_, r)| *r).collect()
    }
}

impl ConnectionCallback for RecordingConnection {
    fn on_connect_done(&self, element: &ElementName, remote: Option<RemoteObject>, result: i32) {
        self.connects.lock().push((element.clone(), remote, result));
    }

    fn on_disconnect_done(&self, element: &ElementName, result: i32) {
        self.disconnects.lock().push((element.clone(), result));
    }
}

// ============================================================================
// Bundle Resolver
// ============================================================================

/// Resolver backed by a fixed table keyed by URI
#[derive(Default)]
pub struct StaticBundleResolver {
    table: Mutex<HashMap<String, ResolvedComponent>>,
}

impl StaticBundleResolver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn register(&self, request: &ComponentRequest) {
        self.table.lock().insert(
            request.uri(),
            ResolvedComponent {
                info: request.info.clone(),
                app: request.app.clone(),
            },
        );
    }
}

impl BundleResolver for StaticBundleResolver {
    fn resolve(&self, want: &Want, _user: UserId) -> AbilityResult<ResolvedComponent> {
        let uri = want.element.uri();
        self.table
            .lock()
            .get(&uri)
            .cloned()
            .ok_or(AbilityError::ResolveFailed(uri))
    }
}

// ============================================================================
// Requests
// ============================================================================

pub fn service_request(bundle: &str, ability: &str) -> ComponentRequest {
    let info = ComponentInfo::new(bundle, ability, ComponentKind::Service);
    let app = ApplicationInfo::new(bundle, 20_000);
    ComponentRequest::new(Want::new(info.element()), info, app)
}

pub fn keep_alive_service_request(bundle: &str, ability: &str) -> ComponentRequest {
    let mut request = service_request(bundle, ability);
    request.app = request.app.keep_alive();
    request
}

pub fn page_request(bundle: &str, ability: &str, launch_mode: LaunchMode) -> ComponentRequest {
    let info = ComponentInfo::new(bundle, ability, ComponentKind::Page).with_launch_mode(launch_mode);
    let app = ApplicationInfo::new(bundle, 30_000);
    ComponentRequest::new(Want::new(info.element()), info, app)
}

pub fn launcher_request() -> ComponentRequest {
    let info = ComponentInfo::new(LAUNCHER_BUNDLE, LAUNCHER_ABILITY, ComponentKind::Page)
        .with_launch_mode(LaunchMode::Singleton);
    let app = ApplicationInfo::new(LAUNCHER_BUNDLE, 10_000).launcher();
    ComponentRequest::new(Want::new(info.element()), info, app)
}

pub fn system_ui_request(ability: &str) -> ComponentRequest {
    let info = ComponentInfo::new(SYSTEM_UI_BUNDLE, ability, ComponentKind::Page);
    let app = ApplicationInfo::new(SYSTEM_UI_BUNDLE, 7);
    ComponentRequest::new(Want::new(info.element()), info, app)
}

// ============================================================================
// Harness
// ============================================================================

pub struct Harness {
    pub clock: Arc<ManualClock>,
    pub host: Arc<RecordingHost>,
    pub bus: EventBus,
    pub events: flume::Receiver<LifecycleEvent>,
    pub config: Arc<KernelConfig>,
    pub ids: IdAllocator,
    pub dispatcher: Dispatcher,
    pub store: Arc<InMemoryMissionStore>,
    pub resolver: Arc<StaticBundleResolver>,
}

impl Harness {
    pub fn new() -> Self {
        let config = KernelConfig::new()
            .with_timeouts(TimeoutConfig::new())
            .with_launcher(LAUNCHER_BUNDLE, LAUNCHER_ABILITY);
        Self::with_config(config)
    }

    pub fn with_config(config: KernelConfig) -> Self {
        let host = RecordingHost::new();
        let bus = EventBus::new(config.event_queue_capacity);
        let events = bus.subscribe_unbounded();
        let dispatcher = Dispatcher::new(
            Arc::clone(&host) as Arc<dyn AppScheduler>,
            Arc::new(NoopWindowManager),
            bus.clone(),
        );
        Self {
            clock: Arc::new(ManualClock::new()),
            host,
            bus,
            events,
            config: Arc::new(config),
            ids: IdAllocator::new(),
            dispatcher,
            store: Arc::new(InMemoryMissionStore::new()),
            resolver: StaticBundleResolver::new(),
        }
    }

    pub fn connect_manager(&self) -> ConnectManager {
        ConnectManager::new(
            USER,
            Arc::clone(&self.config),
            self.ids.clone(),
            self.dispatcher.clone(),
            self.clock.clone(),
        )
    }

    pub fn mission_manager(&self) -> MissionListManager {
        MissionListManager::new(
            USER,
            Arc::clone(&self.config),
            self.ids.clone(),
            self.dispatcher.clone(),
            self.clock.clone(),
            self.store.clone(),
            self.resolver.clone(),
        )
    }

    pub fn kernel_manager(&self) -> KernelAbilityManager {
        KernelAbilityManager::new(
            USER,
            Arc::clone(&self.config),
            self.ids.clone(),
            self.dispatcher.clone(),
            self.clock.clone(),
        )
    }

    pub fn scheduler(&self) -> Arc<dyn AbilityScheduler> {
        Arc::clone(&self.host) as Arc<dyn AbilityScheduler>
    }

    pub fn advance(&self, by: Duration) {
        self.clock.advance(by);
    }

    /// Every event published so far, drained
    pub fn drain_events(&self) -> Vec<EventKind> {
        self.events.try_iter().map(|e| e.kind).collect()
    }
}
