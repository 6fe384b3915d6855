/*!
 * User Session
 * The managers serving one user, and the workers draining them
 */

use crate::config::KernelConfig;
use crate::connect::ConnectManager;
use crate::core::id::{IdAllocator, UserId};
use crate::handler::{Clock, EventLoop, TaskDriver};
use crate::host::{BundleResolver, Dispatcher, MissionInfoStore};
use crate::kernel::KernelAbilityManager;
use crate::mission::MissionListManager;
use log::info;
use parking_lot::Mutex;
use std::sync::Arc;

/// Shared collaborators handed to every new session
#[derive(Clone)]
pub(crate) struct SessionDeps {
    pub ids: IdAllocator,
    pub dispatcher: Dispatcher,
    pub clock: Arc<dyn Clock>,
    pub store: Arc<dyn MissionInfoStore>,
    pub resolver: Arc<dyn BundleResolver>,
}

pub struct UserSession {
    user: UserId,
    connect: Arc<ConnectManager>,
    missions: Arc<MissionListManager>,
    kernel: Arc<KernelAbilityManager>,
    loops: Mutex<Vec<EventLoop>>,
}

impl UserSession {
    pub(crate) fn new(user: UserId, config: Arc<KernelConfig>, deps: &SessionDeps) -> Self {
        let connect = Arc::new(ConnectManager::new(
            user,
            Arc::clone(&config),
            deps.ids.clone(),
            deps.dispatcher.clone(),
            Arc::clone(&deps.clock),
        ));
        let kernel = Arc::new(KernelAbilityManager::new(
            user,
            Arc::clone(&config),
            deps.ids.clone(),
            deps.dispatcher.clone(),
            Arc::clone(&deps.clock),
        ));
        let missions = Arc::new(MissionListManager::new(
            user,
            config,
            deps.ids.clone(),
            deps.dispatcher.clone(),
            Arc::clone(&deps.clock),
            Arc::clone(&deps.store),
            Arc::clone(&deps.resolver),
        ));
        Self {
            user,
            connect,
            missions,
            kernel,
            loops: Mutex::new(Vec::new()),
        }
    }

    /// Spawn one worker per manager on the current runtime
    pub(crate) fn spawn_loops(&self) {
        let mut loops = self.loops.lock();
        if !loops.is_empty() {
            return;
        }
        loops.push(EventLoop::spawn(Arc::clone(&self.connect), "connect", self.user));
        loops.push(EventLoop::spawn(Arc::clone(&self.missions), "missions", self.user));
        loops.push(EventLoop::spawn(Arc::clone(&self.kernel), "kernel", self.user));
        info!("Session workers running for user {}", self.user);
    }

    #[inline]
    pub fn user(&self) -> UserId {
        self.user
    }

    #[inline]
    pub fn connect(&self) -> &Arc<ConnectManager> {
        &self.connect
    }

    #[inline]
    pub fn missions(&self) -> &Arc<MissionListManager> {
        &self.missions
    }

    #[inline]
    pub fn kernel(&self) -> &Arc<KernelAbilityManager> {
        &self.kernel
    }

    /// Run every due task of the session's managers on the calling thread
    pub fn run_pending(&self) -> usize {
        let mut total = 0;
        loop {
            let ran = self.connect.run_pending() + self.missions.run_pending() + self.kernel.run_pending();
            if ran == 0 {
                return total;
            }
            total += ran;
        }
    }

    pub fn has_workers(&self) -> bool {
        !self.loops.lock().is_empty()
    }

    /// Stop the workers. Pending tasks stay queued.
    pub async fn shutdown(&self) {
        let loops: Vec<_> = self.loops.lock().drain(..).collect();
        futures::future::join_all(loops.into_iter().map(EventLoop::shutdown)).await;
        info!("Session of user {} stopped", self.user);
    }
}

impl std::fmt::Debug for UserSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserSession")
            .field("user", &self.user)
            .field("services", &self.connect.record_count())
            .field("pages", &self.missions.record_count())
            .field("system_ui", &self.kernel.record_count())
            .field("workers", &self.loops.lock().len())
            .finish()
    }
}
