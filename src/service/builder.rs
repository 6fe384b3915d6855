/*!
 * Service Builder
 * Wires the collaborators into an AbilityManagerService
 */

use super::service::AbilityManagerService;
use super::session::SessionDeps;
use crate::config::KernelConfig;
use crate::core::errors::{AbilityError, AbilityResult};
use crate::core::id::{IdAllocator, UserId};
use crate::events::EventBus;
use crate::handler::{Clock, SystemClock};
use crate::host::{AppScheduler, BundleResolver, Dispatcher, InMemoryMissionStore, MissionInfoStore, NoopWindowManager, WindowManager};
use log::info;
use std::sync::Arc;

/// Builder for AbilityManagerService
pub struct ServiceBuilder {
    config: KernelConfig,
    app: Option<Arc<dyn AppScheduler>>,
    resolver: Option<Arc<dyn BundleResolver>>,
    window: Option<Arc<dyn WindowManager>>,
    store: Option<Arc<dyn MissionInfoStore>>,
    clock: Option<Arc<dyn Clock>>,
    bus: Option<EventBus>,
    event_loops: bool,
    users: Vec<UserId>,
}

impl ServiceBuilder {
    pub fn new() -> Self {
        Self {
            config: KernelConfig::default(),
            app: None,
            resolver: None,
            window: None,
            store: None,
            clock: None,
            bus: None,
            event_loops: true,
            users: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: KernelConfig) -> Self {
        self.config = config;
        self
    }

    /// Process manager that receives load/foreground/terminate calls
    #[must_use]
    pub fn with_app_scheduler(mut self, app: Arc<dyn AppScheduler>) -> Self {
        self.app = Some(app);
        self
    }

    #[must_use]
    pub fn with_resolver(mut self, resolver: Arc<dyn BundleResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    #[must_use]
    pub fn with_window_manager(mut self, window: Arc<dyn WindowManager>) -> Self {
        self.window = Some(window);
        self
    }

    #[must_use]
    pub fn with_mission_store(mut self, store: Arc<dyn MissionInfoStore>) -> Self {
        self.store = Some(store);
        self
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    #[must_use]
    pub fn with_bus(mut self, bus: EventBus) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Without workers, queued tasks only run through `run_pending`
    #[must_use]
    pub fn without_event_loops(mut self) -> Self {
        self.event_loops = false;
        self
    }

    /// Sessions created during `build`; the first becomes current
    #[must_use]
    pub fn with_user(mut self, user: UserId) -> Self {
        self.users.push(user);
        self
    }

    pub fn build(self) -> AbilityResult<AbilityManagerService> {
        let app = self
            .app
            .ok_or_else(|| AbilityError::InvalidValue("no app scheduler configured".to_string()))?;
        let resolver = self
            .resolver
            .ok_or_else(|| AbilityError::InvalidValue("no bundle resolver configured".to_string()))?;
        if self.event_loops && tokio::runtime::Handle::try_current().is_err() {
            return Err(AbilityError::Internal(
                "event loops need a running tokio runtime".to_string(),
            ));
        }

        let window = self.window.unwrap_or_else(|| Arc::new(NoopWindowManager));
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(InMemoryMissionStore::new()));
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock::new()));
        let bus = self
            .bus
            .unwrap_or_else(|| EventBus::new(self.config.event_queue_capacity));

        let deps = SessionDeps {
            ids: IdAllocator::new(),
            dispatcher: Dispatcher::new(app, window, bus),
            clock,
            store,
            resolver,
        };

        let mut features = Vec::new();
        if self.event_loops {
            features.push("event-loops");
        }
        if cfg!(feature = "diagnostic-timeouts") {
            features.push("diagnostic-timeouts");
        }

        let service = AbilityManagerService::new(self.config, deps, self.event_loops);
        for user in self.users {
            service.init_user(user)?;
        }
        info!("Ability manager service built (features: {:?})", features);
        Ok(service)
    }
}

impl Default for ServiceBuilder {
    fn default() -> Self {
        Self::new()
    }
}
