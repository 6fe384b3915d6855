/*!
 * Ability Manager Service
 *
 * Entry point for every inbound call. Requests naming a component are
 * resolved and routed by kind: system UI pages to the user's kernel ability
 * manager, other pages to its mission list manager, services and extensions
 * to its connect manager. Callbacks carrying only a
 * token are routed through a token registry fed by the event bus.
 */

use super::session::{SessionDeps, UserSession};
use crate::config::KernelConfig;
use crate::core::errors::{codes, AbilityError, AbilityResult, StartOutcome};
use crate::core::id::{CallbackId, MissionId, RecordId, Token, UserId};
use crate::core::types::{ComponentKind, ComponentRequest, ElementName, RemoteObject, Want};
use crate::events::{EventBus, EventKind, LifecycleEvent, ManagerKind};
use crate::host::{AbilityScheduler, ConnectionHandle, InnerMissionInfo, MissionListener};
use crate::kernel::is_system_ui;
use crate::monitoring::span_request;
use crate::record::{LifecycleState, RecordSnapshot};
use arc_swap::ArcSwap;
use dashmap::DashMap;
use log::{debug, info, warn};
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

/// Where a token lives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenRoute {
    pub user: UserId,
    pub owner: ManagerKind,
    pub record: RecordId,
}

pub struct AbilityManagerService {
    config: ArcSwap<KernelConfig>,
    deps: SessionDeps,
    sessions: DashMap<UserId, Arc<UserSession>>,
    current_user: AtomicI32,
    tokens: DashMap<Token, TokenRoute>,
    registry_rx: flume::Receiver<LifecycleEvent>,
    event_loops: bool,
}

impl AbilityManagerService {
    pub(crate) fn new(config: KernelConfig, deps: SessionDeps, event_loops: bool) -> Self {
        let registry_rx = deps.dispatcher.bus().subscribe_filtered(EventKind::is_registration);
        Self {
            config: ArcSwap::from_pointee(config),
            deps,
            sessions: DashMap::new(),
            current_user: AtomicI32::new(crate::core::limits::DEFAULT_INVALID_VALUE),
            tokens: DashMap::new(),
            registry_rx,
            event_loops,
        }
    }

    pub fn builder() -> super::builder::ServiceBuilder {
        super::builder::ServiceBuilder::new()
    }

    // ========================================================================
    // Configuration
    // ========================================================================

    pub fn config(&self) -> Arc<KernelConfig> {
        self.config.load_full()
    }

    /// Replace the configuration. Sessions created afterwards pick it up.
    pub fn update_config(&self, config: KernelConfig) {
        info!("Kernel configuration replaced");
        self.config.store(Arc::new(config));
    }

    #[inline]
    pub fn bus(&self) -> &EventBus {
        self.deps.dispatcher.bus()
    }

    // ========================================================================
    // Users
    // ========================================================================

    /// Create the session of `user` if it does not exist yet
    pub fn init_user(&self, user: UserId) -> AbilityResult<Arc<UserSession>> {
        if user < 0 {
            return Err(AbilityError::InvalidValue(format!("invalid user id {}", user)));
        }
        let session = self
            .sessions
            .entry(user)
            .or_insert_with(|| {
                info!("Initializing session for user {}", user);
                Arc::new(UserSession::new(user, self.config(), &self.deps))
            })
            .clone();
        if self.event_loops {
            session.spawn_loops();
        }
        if self.current_user() < 0 {
            self.current_user.store(user, Ordering::SeqCst);
        }
        Ok(session)
    }

    /// Make `user` the foreground user, creating its session if needed
    pub fn switch_user(&self, user: UserId) -> AbilityResult<()> {
        self.init_user(user)?;
        let previous = self.current_user.swap(user, Ordering::SeqCst);
        info!("Switched user {} -> {}", previous, user);
        Ok(())
    }

    /// Stop and drop the session of `user`
    pub async fn remove_user(&self, user: UserId) -> AbilityResult<()> {
        let (_, session) = self.sessions.remove(&user).ok_or(AbilityError::UserNotFound(user))?;
        session.shutdown().await;
        self.tokens.retain(|_, route| route.user != user);
        if self.current_user() == user {
            self.current_user
                .store(crate::core::limits::DEFAULT_INVALID_VALUE, Ordering::SeqCst);
        }
        info!("Removed session of user {}", user);
        Ok(())
    }

    #[inline]
    pub fn current_user(&self) -> UserId {
        self.current_user.load(Ordering::SeqCst)
    }

    pub fn session(&self, user: UserId) -> AbilityResult<Arc<UserSession>> {
        self.sessions
            .get(&user)
            .map(|s| Arc::clone(s.value()))
            .ok_or(AbilityError::UserNotFound(user))
    }

    fn current_session(&self) -> AbilityResult<Arc<UserSession>> {
        self.session(self.current_user())
    }

    pub fn users(&self) -> Vec<UserId> {
        let mut users: Vec<_> = self.sessions.iter().map(|e| *e.key()).collect();
        users.sort_unstable();
        users
    }

    // ========================================================================
    // Token Registry
    // ========================================================================

    /// Apply registrations published since the last call
    fn sync_tokens(&self) {
        for event in self.registry_rx.try_iter() {
            match event.kind {
                EventKind::Created { owner } => {
                    self.tokens.insert(
                        event.token,
                        TokenRoute {
                            user: event.user,
                            owner,
                            record: event.record,
                        },
                    );
                }
                EventKind::Terminated => {
                    self.tokens.remove(&event.token);
                }
                _ => {}
            }
        }
    }

    /// Registrations published but not yet applied
    pub fn pending_registrations(&self) -> usize {
        self.registry_rx.len()
    }

    /// Find the session and manager owning `token`
    pub fn route(&self, token: Token) -> AbilityResult<(Arc<UserSession>, ManagerKind)> {
        self.sync_tokens();
        let cached = self.tokens.get(&token).map(|r| *r.value());
        if let Some(route) = cached {
            if let Ok(session) = self.session(route.user) {
                let live = match route.owner {
                    ManagerKind::Connect => session.connect().contains_token(token),
                    ManagerKind::Mission => session.missions().contains_token(token),
                    ManagerKind::Kernel => session.kernel().contains_token(token),
                };
                if live {
                    return Ok((session, route.owner));
                }
            }
            debug!("Stale route for token {}, scanning sessions", token);
            self.tokens.remove(&token);
        }

        for entry in self.sessions.iter() {
            let session = entry.value();
            let owner = if session.connect().contains_token(token) {
                ManagerKind::Connect
            } else if session.missions().contains_token(token) {
                ManagerKind::Mission
            } else if session.kernel().contains_token(token) {
                ManagerKind::Kernel
            } else {
                continue;
            };
            return Ok((Arc::clone(session), owner));
        }
        Err(AbilityError::UnknownToken(token))
    }

    pub fn token_route(&self, token: Token) -> Option<TokenRoute> {
        self.sync_tokens();
        self.tokens.get(&token).map(|r| *r.value())
    }

    // ========================================================================
    // Requests
    // ========================================================================

    /// Resolve `want` into a full component request for `user`
    pub fn build_request(
        &self,
        want: &Want,
        user: UserId,
        caller: Option<Token>,
        request_code: i32,
    ) -> AbilityResult<ComponentRequest> {
        if want.element.is_empty() {
            return Err(AbilityError::InvalidValue("want names no element".to_string()));
        }
        let resolved = self.deps.resolver.resolve(want, user)?;
        let mut request =
            ComponentRequest::new(want.clone(), resolved.info, resolved.app).with_request_code(request_code);
        request.caller = caller;
        Ok(request)
    }

    /// Start the component named by `want` for the current user
    pub fn start_ability(&self, want: &Want, caller: Option<Token>, request_code: i32) -> AbilityResult<StartOutcome> {
        self.start_ability_as_user(want, caller, request_code, self.current_user())
    }

    pub fn start_ability_as_user(
        &self,
        want: &Want,
        caller: Option<Token>,
        request_code: i32,
        user: UserId,
    ) -> AbilityResult<StartOutcome> {
        let span = span_request("start_ability", user);
        let _entered = span.enter();
        let session = self.session(user)?;
        let request = self.build_request(want, user, caller, request_code)?;
        info!("Start {} ({:?}) for user {}", request.uri(), request.info.kind, user);
        if is_system_ui(&request.info) {
            return session.kernel().start_ability(request);
        }
        match request.info.kind {
            ComponentKind::Page => session.missions().start_ability(request),
            ComponentKind::Service | ComponentKind::Extension => {
                session.connect().start_ability(request)?;
                Ok(StartOutcome::Started)
            }
            ComponentKind::Data => Err(AbilityError::NotService(request.uri())),
        }
    }

    /// Start the configured launcher for `user`
    pub fn start_launcher(&self, user: UserId) -> AbilityResult<StartOutcome> {
        let config = self.config();
        let want = Want::new(ElementName::new(
            config.launcher_bundle.clone(),
            config.launcher_ability.clone(),
        ));
        self.start_ability_as_user(&want, None, crate::core::limits::DEFAULT_INVALID_VALUE, user)
    }

    /// Bind `handle` to the service named by `want`
    pub fn connect_ability(&self, want: &Want, handle: ConnectionHandle, caller: Option<Token>) -> AbilityResult<()> {
        let user = self.current_user();
        let span = span_request("connect_ability", user);
        let _entered = span.enter();
        let session = self.session(user)?;
        let request = self.build_request(want, user, caller, crate::core::limits::DEFAULT_INVALID_VALUE)?;
        if !request.info.kind.is_connectable() {
            return Err(AbilityError::NotService(request.uri()));
        }
        session.connect().connect_ability(request, handle, caller)
    }

    /// Unbind every connection opened through `callback`
    pub fn disconnect_ability(&self, callback: CallbackId) -> AbilityResult<()> {
        let live = self
            .sessions
            .iter()
            .find(|e| e.value().connect().connection_count(callback) > 0)
            .map(|e| Arc::clone(e.value()));
        let owner = live.or_else(|| {
            self.sessions
                .iter()
                .find(|e| e.value().connect().knows_callback(callback))
                .map(|e| Arc::clone(e.value()))
        });
        let session = match owner {
            Some(session) => session,
            None => self.current_session()?,
        };
        session.connect().disconnect_ability(callback)
    }

    /// Stop a started service
    pub fn stop_service_ability(&self, want: &Want) -> AbilityResult<()> {
        let user = self.current_user();
        let session = self.session(user)?;
        let request = self.build_request(want, user, None, crate::core::limits::DEFAULT_INVALID_VALUE)?;
        if request.info.kind != ComponentKind::Service {
            return Err(AbilityError::NotService(request.uri()));
        }
        session.connect().stop_service_ability(&request)
    }

    /// Finish the component `token`, returning `result` to its caller
    pub fn terminate_ability(&self, token: Token, result_code: i32, result: Option<Want>) -> AbilityResult<()> {
        let (session, owner) = self.route(token)?;
        let span = span_request("terminate_ability", session.user());
        let _entered = span.enter();
        match owner {
            ManagerKind::Mission => session.missions().terminate_ability(token, result_code, result),
            ManagerKind::Connect => session.connect().terminate_ability(token),
            ManagerKind::Kernel => Err(system_ui_refused(token)),
        }
    }

    /// Finish the page `caller` started with `request_code`
    pub fn terminate_ability_by_caller(&self, caller: Token, request_code: i32) -> AbilityResult<()> {
        match self.route(caller)? {
            (_, ManagerKind::Kernel) => Err(system_ui_refused(caller)),
            (session, _) => session.missions().terminate_ability_by_caller(caller, request_code),
        }
    }

    /// Stop a service only if `start_id` is its latest start
    pub fn terminate_ability_result(&self, token: Token, start_id: u64) -> AbilityResult<()> {
        let (session, owner) = self.route(token)?;
        match owner {
            ManagerKind::Connect => session.connect().terminate_ability_result(token, start_id),
            ManagerKind::Mission | ManagerKind::Kernel => Err(AbilityError::NotService(token.to_string())),
        }
    }

    pub fn minimize_ability(&self, token: Token) -> AbilityResult<()> {
        let (session, owner) = self.route(token)?;
        match owner {
            ManagerKind::Mission => session.missions().minimize_ability(token),
            ManagerKind::Connect => Err(AbilityError::InvalidValue(format!("{} is not a page", token))),
            ManagerKind::Kernel => Err(system_ui_refused(token)),
        }
    }

    // ========================================================================
    // Hosted Process Callbacks
    // ========================================================================

    pub fn attach_ability_thread(&self, scheduler: Arc<dyn AbilityScheduler>, token: Token) -> AbilityResult<()> {
        let (session, owner) = self.route(token)?;
        match owner {
            ManagerKind::Mission => session.missions().attach_ability_thread(scheduler, token),
            ManagerKind::Connect => session.connect().attach_ability_thread(scheduler, token),
            ManagerKind::Kernel => session.kernel().attach_ability_thread(scheduler, token),
        }
    }

    pub fn transition_done(&self, token: Token, state: LifecycleState) -> AbilityResult<()> {
        let (session, owner) = self.route(token)?;
        match owner {
            ManagerKind::Mission => session.missions().transition_done(token, state),
            ManagerKind::Connect => session.connect().transition_done(token, state),
            ManagerKind::Kernel => session.kernel().transition_done(token, state),
        }
    }

    /// The app manager finished moving a process to `state`
    pub fn on_ability_request_done(&self, token: Token, state: LifecycleState) -> AbilityResult<()> {
        let (session, owner) = self.route(token)?;
        match owner {
            ManagerKind::Mission => session.missions().on_ability_request_done(token, state),
            ManagerKind::Kernel => session.kernel().on_ability_request_done(token, state),
            ManagerKind::Connect => Ok(()),
        }
    }

    fn connect_route(&self, token: Token) -> AbilityResult<Arc<UserSession>> {
        match self.route(token)? {
            (session, ManagerKind::Connect) => Ok(session),
            (_, ManagerKind::Mission | ManagerKind::Kernel) => Err(AbilityError::NotService(token.to_string())),
        }
    }

    pub fn schedule_connect_done(&self, token: Token, remote: Option<RemoteObject>) -> AbilityResult<()> {
        self.connect_route(token)?.connect().schedule_connect_done(token, remote)
    }

    pub fn schedule_disconnect_done(&self, token: Token) -> AbilityResult<()> {
        self.connect_route(token)?.connect().schedule_disconnect_done(token)
    }

    pub fn schedule_command_done(&self, token: Token) -> AbilityResult<()> {
        self.connect_route(token)?.connect().schedule_command_done(token)
    }

    /// The process hosting `token` died
    pub fn on_ability_died(&self, token: Token) -> AbilityResult<()> {
        let (session, owner) = self.route(token)?;
        warn!("Component {} died", token);
        match owner {
            ManagerKind::Mission => session.missions().on_ability_died(token),
            ManagerKind::Connect => session.connect().on_ability_died(token),
            ManagerKind::Kernel => session.kernel().on_ability_died(token),
        }
    }

    /// The owner of a connection callback died
    pub fn on_callback_died(&self, callback: CallbackId) {
        for entry in self.sessions.iter() {
            if entry.value().connect().connection_count(callback) > 0 {
                entry.value().connect().on_callback_died(callback);
            }
        }
    }

    // ========================================================================
    // Missions
    // ========================================================================

    pub fn move_mission_to_front(&self, mission: MissionId) -> AbilityResult<()> {
        self.current_session()?.missions().move_mission_to_front(mission)
    }

    pub fn clear_mission(&self, mission: MissionId) -> AbilityResult<()> {
        self.current_session()?.missions().clear_mission(mission)
    }

    pub fn clear_all_missions(&self) -> AbilityResult<()> {
        self.current_session()?.missions().clear_all_missions()
    }

    pub fn set_mission_locked_state(&self, mission: MissionId, locked: bool) -> AbilityResult<()> {
        self.current_session()?
            .missions()
            .set_mission_locked_state(mission, locked)
    }

    pub fn get_mission_infos(&self, max: i32) -> AbilityResult<Vec<InnerMissionInfo>> {
        self.current_session()?.missions().get_mission_infos(max)
    }

    pub fn get_mission_info(&self, mission: MissionId) -> AbilityResult<InnerMissionInfo> {
        self.current_session()?.missions().get_mission_info(mission)
    }

    pub fn get_mission_id_by_token(&self, token: Token) -> AbilityResult<MissionId> {
        let (session, _) = self.route(token)?;
        session
            .missions()
            .mission_id_by_token(token)
            .ok_or_else(|| AbilityError::InvalidValue(format!("{} has no mission", token)))
    }

    pub fn set_mission_label(&self, token: Token, label: &str) -> AbilityResult<()> {
        let (session, _) = self.route(token)?;
        session.missions().set_mission_label(token, label)
    }

    pub fn register_mission_listener(&self, listener: Arc<dyn MissionListener>) -> AbilityResult<u64> {
        Ok(self.current_session()?.missions().register_mission_listener(listener))
    }

    pub fn unregister_mission_listener(&self, handle: u64) -> AbilityResult<bool> {
        Ok(self.current_session()?.missions().unregister_mission_listener(handle))
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn record_by_token(&self, token: Token) -> Option<RecordSnapshot> {
        let (session, owner) = self.route(token).ok()?;
        match owner {
            ManagerKind::Mission => session.missions().record_by_token(token),
            ManagerKind::Connect => session.connect().record_by_token(token),
            ManagerKind::Kernel => session.kernel().record_by_token(token),
        }
    }

    pub fn get_service_record_by_element(&self, element: &ElementName) -> Option<RecordSnapshot> {
        self.current_session()
            .ok()?
            .connect()
            .get_service_record_by_element(element)
    }

    /// Every running component of the current user
    pub fn running_infos(&self) -> AbilityResult<Vec<RecordSnapshot>> {
        let session = self.current_session()?;
        let mut infos = session.connect().running_infos();
        infos.extend(session.missions().running_infos());
        infos.extend(session.kernel().running_infos());
        Ok(infos)
    }

    pub fn dump(&self) -> Vec<String> {
        let mut lines = Vec::new();
        for user in self.users() {
            if let Ok(session) = self.session(user) {
                lines.extend(session.connect().dump());
                lines.extend(session.missions().dump());
                lines.extend(session.kernel().dump());
            }
        }
        lines
    }

    /// Run due tasks of every session on the calling thread
    pub fn run_pending(&self) -> usize {
        let sessions: Vec<_> = self.sessions.iter().map(|e| Arc::clone(e.value())).collect();
        let mut total = 0;
        loop {
            let ran: usize = sessions.iter().map(|s| s.run_pending()).sum();
            if ran == 0 {
                self.sync_tokens();
                return total;
            }
            total += ran;
        }
    }

    /// Stop every session worker
    pub async fn shutdown(&self) {
        let sessions: Vec<_> = self.sessions.iter().map(|e| Arc::clone(e.value())).collect();
        futures::future::join_all(sessions.iter().map(|s| s.shutdown())).await;
        info!("Ability manager service stopped");
    }

    // ========================================================================
    // Transport Result Codes
    // ========================================================================

    /// Run `op` inside a request span and report its transport code
    fn coded<T>(&self, operation: &'static str, op: impl FnOnce() -> AbilityResult<T>) -> i32 {
        let span = span_request(operation, self.current_user());
        let code = {
            let _entered = span.enter();
            match op() {
                Ok(_) => codes::ERR_OK,
                Err(e) => {
                    debug!("{} failed: {}", operation, e);
                    e.result_code()
                }
            }
        };
        span.record_result(code);
        code
    }

    pub fn start_ability_code(&self, want: &Want, caller: Option<Token>, request_code: i32) -> i32 {
        let span = span_request("start_ability_code", self.current_user());
        let code = match self.start_ability(want, caller, request_code) {
            Ok(outcome) => outcome.result_code(),
            Err(e) => {
                warn!("Start of {} failed: {}", want.element, e);
                e.result_code()
            }
        };
        span.record_result(code);
        code
    }

    pub fn connect_ability_code(&self, want: &Want, handle: ConnectionHandle, caller: Option<Token>) -> i32 {
        self.coded("connect_ability_code", || self.connect_ability(want, handle, caller))
    }

    pub fn disconnect_ability_code(&self, callback: CallbackId) -> i32 {
        self.coded("disconnect_ability_code", || self.disconnect_ability(callback))
    }

    pub fn stop_service_ability_code(&self, want: &Want) -> i32 {
        self.coded("stop_service_ability_code", || self.stop_service_ability(want))
    }

    pub fn terminate_ability_code(&self, token: Token, result_code: i32, result: Option<Want>) -> i32 {
        self.coded("terminate_ability_code", || self.terminate_ability(token, result_code, result))
    }

    pub fn attach_ability_thread_code(&self, scheduler: Arc<dyn AbilityScheduler>, token: Token) -> i32 {
        self.coded("attach_ability_thread_code", || self.attach_ability_thread(scheduler, token))
    }

    pub fn transition_done_code(&self, token: Token, state: LifecycleState) -> i32 {
        self.coded("transition_done_code", || self.transition_done(token, state))
    }

    pub fn schedule_connect_done_code(&self, token: Token, remote: Option<RemoteObject>) -> i32 {
        self.coded("schedule_connect_done_code", || self.schedule_connect_done(token, remote))
    }

    pub fn schedule_disconnect_done_code(&self, token: Token) -> i32 {
        self.coded("schedule_disconnect_done_code", || self.schedule_disconnect_done(token))
    }

    pub fn schedule_command_done_code(&self, token: Token) -> i32 {
        self.coded("schedule_command_done_code", || self.schedule_command_done(token))
    }

    pub fn clear_mission_code(&self, mission: MissionId) -> i32 {
        let span = span_request("clear_mission_code", self.current_user());
        let code = match self.clear_mission(mission) {
            Ok(()) => codes::ERR_OK,
            Err(AbilityError::InvalidValue(_)) => codes::ERR_INVALID_VALUE,
            Err(e) => {
                warn!("Clearing mission {} failed: {}", mission, e);
                codes::REMOVE_MISSION_FAILED
            }
        };
        span.record_result(code);
        code
    }
}

fn system_ui_refused(token: Token) -> AbilityError {
    warn!("System UI {} cannot be terminated or minimized", token);
    AbilityError::InvalidValue(format!("system UI {} cannot be terminated", token))
}

impl std::fmt::Debug for AbilityManagerService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AbilityManagerService")
            .field("current_user", &self.current_user())
            .field("users", &self.users())
            .field("tokens", &self.tokens.len())
            .finish()
    }
}
