/*!
 * Connect Manager
 * Lifecycle of service and extension components for one user
 *
 * Registries:
 * - service map: URI -> live record
 * - terminating map: URI -> record draining towards removal
 * - connect map: callback -> connections opened through it
 *
 * Every public operation runs under the registry lock and collects its
 * effects in an [`Outbox`] that is flushed after the lock is released.
 * Timeouts, death notifications and restarts go through the task handler.
 */

use super::task::ConnectTask;
use crate::config::KernelConfig;
use crate::core::errors::{codes, AbilityError, AbilityResult};
use crate::core::id::{CallbackId, ConnectionId, IdAllocator, RecordId, Token, UserId};
use crate::core::limits::{DISCONNECTED_CALLBACK_HISTORY, SYSTEM_UI_ABILITY_NAME, SYSTEM_UI_BUNDLE_NAME};
use crate::core::types::{ComponentRequest, ElementName, RemoteObject};
use crate::events::{EventKind, ManagerKind};
use crate::handler::{Clock, TaskDriver, TaskHandler, TimeoutKind, TimerKey};
use crate::host::{AbilityScheduler, AppCall, ConnectionHandle, Dispatcher, Outbox};
use crate::record::{
    AbilityState, ComponentRecord, ConnectionRecord, ConnectionState, LifecycleState, RecordArena, RecordSnapshot,
};
use ahash::{HashMap, HashSet};
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

// ============================================================================
// Registry State
// ============================================================================

/// Callbacks whose last connection went away recently
#[derive(Debug, Default)]
struct DisconnectedCallbacks {
    order: VecDeque<CallbackId>,
    set: HashSet<CallbackId>,
}

impl DisconnectedCallbacks {
    fn insert(&mut self, id: CallbackId) {
        if !self.set.insert(id) {
            return;
        }
        self.order.push_back(id);
        if self.order.len() > DISCONNECTED_CALLBACK_HISTORY {
            if let Some(oldest) = self.order.pop_front() {
                self.set.remove(&oldest);
            }
        }
    }

    fn remove(&mut self, id: CallbackId) {
        if self.set.remove(&id) {
            self.order.retain(|c| *c != id);
        }
    }

    #[inline]
    fn contains(&self, id: CallbackId) -> bool {
        self.set.contains(&id)
    }
}

/// Connect request parked until a draining record of the same URI is gone
#[derive(Debug)]
struct PendingConnect {
    request: ComponentRequest,
    handle: ConnectionHandle,
    caller: Option<Token>,
}

/// Restart decided while the dying record was still reachable
struct RestartPlan {
    request: ComponentRequest,
    launcher: bool,
    immediate: bool,
}

#[derive(Debug, Default)]
struct ConnectState {
    arena: RecordArena,
    service_map: BTreeMap<String, RecordId>,
    terminating: BTreeMap<String, RecordId>,
    connect_map: HashMap<CallbackId, Vec<ConnectionId>>,
    start_requests: HashMap<String, VecDeque<ComponentRequest>>,
    pending_connects: HashMap<String, Vec<PendingConnect>>,
    restart_resident: Vec<String>,
    disconnected: DisconnectedCallbacks,
}

impl ConnectState {
    /// Record is mapped under its URI in the service map
    fn is_live(&self, id: RecordId) -> bool {
        self.arena
            .get(id)
            .is_some_and(|r| self.service_map.get(&r.uri()) == Some(&id))
    }

    fn is_draining(&self, id: RecordId) -> bool {
        self.arena
            .get(id)
            .is_some_and(|r| self.terminating.get(&r.uri()) == Some(&id))
    }

    fn live_by_token(&self, token: Token) -> Option<RecordId> {
        self.arena.by_token(token).filter(|id| self.is_live(*id))
    }

    fn draining_by_token(&self, token: Token) -> Option<RecordId> {
        self.arena.by_token(token).filter(|id| self.is_draining(*id))
    }

    fn move_to_terminating(&mut self, id: RecordId) {
        let Some(record) = self.arena.get(id) else {
            return;
        };
        let uri = record.uri();
        if self.service_map.get(&uri) == Some(&id) {
            self.service_map.remove(&uri);
        }
        debug!("Moving {} ({}) to the terminating map", uri, id);
        self.terminating.insert(uri, id);
    }

    /// Drop a connection from its callback list, its target and the arena
    fn detach_connection(&mut self, connection: ConnectionId) -> Option<ConnectionRecord> {
        let removed = self.arena.remove_connection(connection)?;
        if let Some(record) = self.arena.get_mut(removed.target()) {
            record.remove_connection(connection);
        }
        let callback = removed.callback_id();
        if let Some(list) = self.connect_map.get_mut(&callback) {
            list.retain(|c| *c != connection);
            if list.is_empty() {
                self.connect_map.remove(&callback);
                self.disconnected.insert(callback);
            }
        }
        Some(removed)
    }

    /// Target element and remote of a connection
    fn target_of(&self, connection: ConnectionId) -> Option<(RecordId, ElementName, Option<RemoteObject>)> {
        let target = self.arena.connection(connection)?.target();
        let record = self.arena.get(target)?;
        Some((target, record.element(), record.remote()))
    }
}

// ============================================================================
// Connect Manager
// ============================================================================

pub struct ConnectManager {
    user: UserId,
    config: Arc<KernelConfig>,
    ids: IdAllocator,
    dispatcher: Dispatcher,
    handler: TaskHandler<ConnectTask>,
    state: Mutex<ConnectState>,
}

impl ConnectManager {
    pub fn new(
        user: UserId,
        config: Arc<KernelConfig>,
        ids: IdAllocator,
        dispatcher: Dispatcher,
        clock: Arc<dyn Clock>,
    ) -> Self {
        info!("Creating connect manager for user {}", user);
        Self {
            user,
            config,
            ids,
            dispatcher,
            handler: TaskHandler::new(clock),
            state: Mutex::new(ConnectState::default()),
        }
    }

    #[inline]
    pub fn user(&self) -> UserId {
        self.user
    }

    /// Run `f` under the registry lock and flush its effects afterwards
    fn locked<R>(&self, f: impl FnOnce(&mut ConnectState, &mut Outbox) -> R) -> R {
        let mut outbox = Outbox::new();
        let result = {
            let mut state = self.state.lock();
            f(&mut state, &mut outbox)
        };
        self.dispatcher.flush(outbox);
        result
    }

    fn now_ms(&self) -> i64 {
        self.handler.now().as_millis() as i64
    }

    fn needs_keep_alive(&self, request: &ComponentRequest) -> bool {
        let info = &request.info;
        request.app.keep_alive
            || self.config.is_launcher(&info.bundle_name, &info.name)
            || (info.bundle_name == SYSTEM_UI_BUNDLE_NAME && info.name == SYSTEM_UI_ABILITY_NAME)
    }

    // ========================================================================
    // Start / Stop
    // ========================================================================

    /// Start a service, or deliver a new command to a running one
    pub fn start_ability(&self, request: ComponentRequest) -> AbilityResult<()> {
        self.locked(|st, outbox| self.start_locked(st, request, outbox, false))
    }

    fn start_locked(
        &self,
        st: &mut ConnectState,
        request: ComponentRequest,
        outbox: &mut Outbox,
        from_queue: bool,
    ) -> AbilityResult<()> {
        let uri = request.uri();
        if !from_queue {
            let queued = st.start_requests.get(&uri).is_some_and(|q| !q.is_empty());
            if queued || st.terminating.contains_key(&uri) {
                debug!("Deferring start of {}", uri);
                self.enqueue_start(st, request, false);
                return Ok(());
            }
        }

        let (id, loaded) = self.get_or_create(st, &request, false, outbox);
        let Some(record) = st.arena.get_mut(id) else {
            return Err(AbilityError::RecordNotFound(id));
        };
        record.add_caller(request.caller, request.request_code);
        let token = record.token();

        if !loaded {
            self.load(st, id, outbox)?;
        } else if record.state() == AbilityState::Active && !record.is_command_pending() {
            record.set_want(request.want.clone());
            self.command(st, id, outbox);
        } else {
            self.enqueue_start(st, request, from_queue);
            return Ok(());
        }

        outbox.app(AppCall::AbilityBehaviorAnalysis {
            token,
            pre_token: request.caller,
        });
        Ok(())
    }

    /// Live record for the request's URI, created when absent.
    /// Returns the record id and whether it already existed.
    fn get_or_create(
        &self,
        st: &mut ConnectState,
        request: &ComponentRequest,
        by_connect: bool,
        outbox: &mut Outbox,
    ) -> (RecordId, bool) {
        let uri = request.uri();
        if let Some(&id) = st.service_map.get(&uri) {
            if st.arena.contains(id) {
                return (id, true);
            }
            st.service_map.remove(&uri);
        }

        let id = self.ids.next_record();
        let mut record = ComponentRecord::from_request(id, self.user, request);
        record.set_create_by_connect(by_connect);
        let launcher = self.config.is_launcher(&request.info.bundle_name, &request.info.name);
        if launcher {
            record.set_launcher_root();
        }
        if launcher || self.needs_keep_alive(request) {
            record.set_keep_alive();
            let max = if launcher {
                self.config.launcher_restart_max
            } else {
                self.config.resident_restart_max
            };
            let count = if request.restart { request.restart_count } else { max };
            record.set_restart_budget(count, max, request.restart_time);
        }
        if request.restart {
            record.resume_restart(request.restart_count);
            outbox.event(record.event(EventKind::Restarted));
        }
        outbox.event(record.event(EventKind::Created {
            owner: ManagerKind::Connect,
        }));
        info!("Created service record {} for {}", id, uri);
        st.arena.insert(record);
        st.service_map.insert(uri, id);
        (id, false)
    }

    fn load(&self, st: &mut ConnectState, id: RecordId, outbox: &mut Outbox) -> AbilityResult<()> {
        let Some(record) = st.arena.get(id) else {
            return Err(AbilityError::RecordNotFound(id));
        };
        let pre_token = if record.is_create_by_connect() {
            st.arena
                .first_connecting(id)
                .and_then(|c| st.arena.connection(c))
                .and_then(|c| c.caller())
        } else {
            record.last_caller()
        };

        let Some(record) = st.arena.get_mut(id) else {
            return Err(AbilityError::RecordNotFound(id));
        };
        match record.load(&self.ids, pre_token, outbox) {
            Ok(key) => {
                let event = record.event_id();
                self.handler.post_delayed(
                    key,
                    ConnectTask::LoadTimeout { record: id, event },
                    self.config.timeouts.load(),
                );
                Ok(())
            }
            Err(e) => {
                self.remove_service_ability(st, id, outbox);
                Err(e)
            }
        }
    }

    fn command(&self, st: &mut ConnectState, id: RecordId, outbox: &mut Outbox) {
        let Some(record) = st.arena.get_mut(id) else {
            return;
        };
        let key = record.command(outbox);
        let start_id = record.start_id();
        self.handler.post_delayed(
            key,
            ConnectTask::CommandTimeout { record: id, start_id },
            self.config.timeouts.command(),
        );
    }

    fn enqueue_start(&self, st: &mut ConnectState, request: ComponentRequest, front: bool) {
        let uri = request.uri();
        let queue = st.start_requests.entry(uri.clone()).or_default();
        let first = queue.is_empty();
        if front {
            queue.push_front(request);
        } else {
            queue.push_back(request);
        }
        if first {
            self.handler.post_delayed(
                TimerKey::StartServiceQueue(uri.clone()),
                ConnectTask::StartQueueExpired(uri),
                self.config.timeouts.connect(),
            );
        }
    }

    /// Replay the oldest deferred start of `uri`
    fn complete_start_request(&self, st: &mut ConnectState, uri: &str, outbox: &mut Outbox) {
        let Some(queue) = st.start_requests.get_mut(uri) else {
            return;
        };
        let next = queue.pop_front();
        let key = TimerKey::StartServiceQueue(uri.to_string());
        if queue.is_empty() {
            st.start_requests.remove(uri);
            self.handler.cancel(&key);
        } else {
            self.handler.post_delayed(
                key,
                ConnectTask::StartQueueExpired(uri.to_string()),
                self.config.timeouts.connect(),
            );
        }
        if let Some(request) = next {
            debug!("Replaying deferred start of {}", uri);
            if let Err(e) = self.start_locked(st, request, outbox, true) {
                warn!("Deferred start of {} failed: {}", uri, e);
            }
        }
    }

    /// Self-termination requested by the service
    pub fn terminate_ability(&self, token: Token) -> AbilityResult<()> {
        self.locked(|st, outbox| {
            let id = st.arena.by_token(token).ok_or(AbilityError::UnknownToken(token))?;
            if st.arena.get(id).is_some_and(|r| r.is_launcher_root()) {
                return Err(AbilityError::TerminateLauncherDenied);
            }
            if st.is_live(id) {
                st.move_to_terminating(id);
            }
            self.terminate_locked(st, id, outbox)
        })
    }

    /// Terminate only if `start_id` is the latest command the service saw
    pub fn terminate_ability_result(&self, token: Token, start_id: u64) -> AbilityResult<()> {
        {
            let st = self.state.lock();
            let id = st.arena.by_token(token).ok_or(AbilityError::UnknownToken(token))?;
            let current = st.arena.get(id).map(|r| r.start_id()).unwrap_or_default();
            if current != start_id {
                return Err(AbilityError::InvalidValue(format!(
                    "start id {} is stale, latest is {}",
                    start_id, current
                )));
            }
        }
        self.terminate_ability(token)
    }

    fn terminate_locked(&self, st: &mut ConnectState, id: RecordId, outbox: &mut Outbox) -> AbilityResult<()> {
        if !st.is_draining(id) {
            return Err(AbilityError::InvalidValue(format!("record {} is not draining", id)));
        }
        let Some(record) = st.arena.get(id) else {
            return Err(AbilityError::RecordNotFound(id));
        };
        if record.is_terminating() {
            info!("Record {} is already terminating", id);
            return Ok(());
        }
        if !record.is_connect_list_empty() {
            self.terminate_disconnect(st, id, outbox);
        }
        self.terminate_record(st, id, outbox);
        Ok(())
    }

    /// Stop the service started with `request`
    pub fn stop_service_ability(&self, request: &ComponentRequest) -> AbilityResult<()> {
        let uri = request.uri();
        self.locked(|st, outbox| {
            let id = *st
                .service_map
                .get(&uri)
                .ok_or_else(|| AbilityError::InvalidValue(format!("service {} is not running", uri)))?;
            let Some(record) = st.arena.get(id) else {
                return Err(AbilityError::RecordNotFound(id));
            };
            if record.is_terminating() {
                info!("Service {} is already terminating", uri);
                return Ok(());
            }
            if !record.is_connect_list_empty() {
                self.terminate_disconnect(st, id, outbox);
            }
            self.terminate_record(st, id, outbox);
            Ok(())
        })
    }

    /// Force every connection of `id` closed as if the service died
    fn terminate_disconnect(&self, st: &mut ConnectState, id: RecordId, outbox: &mut Outbox) {
        let Some(record) = st.arena.get(id) else {
            return;
        };
        let element = record.element();
        for connection in record.connections().to_vec() {
            if let Some(conn) = st.arena.connection_mut(connection) {
                conn.complete_disconnect(element.clone(), codes::ERR_OK, true, outbox);
            }
            st.detach_connection(connection);
        }
    }

    fn terminate_record(&self, st: &mut ConnectState, id: RecordId, outbox: &mut Outbox) {
        st.move_to_terminating(id);
        let Some(record) = st.arena.get_mut(id) else {
            return;
        };
        record.set_terminating();
        let key = record.terminate(&self.ids, outbox);
        let event = record.event_id();
        self.handler.post_delayed(
            key,
            ConnectTask::TerminateTimeout { record: id, event },
            self.config.timeouts.terminate,
        );
    }

    fn terminate_done(&self, st: &mut ConnectState, id: RecordId, outbox: &mut Outbox) -> AbilityResult<()> {
        let Some(record) = st.arena.get(id) else {
            return Err(AbilityError::RecordNotFound(id));
        };
        if record.state() != AbilityState::Terminating {
            return Err(AbilityError::invalid_state(
                id,
                AbilityState::Terminating.as_str(),
                record.state().as_str(),
            ));
        }
        outbox.app(AppCall::TerminateAbility { token: record.token() });
        self.remove_service_ability(st, id, outbox);
        Ok(())
    }

    /// Drop a record from every registry and replay work parked on its URI
    fn remove_service_ability(&self, st: &mut ConnectState, id: RecordId, outbox: &mut Outbox) {
        let Some(record) = st.arena.get(id) else {
            return;
        };
        let uri = record.uri();
        if st.terminating.get(&uri) == Some(&id) {
            st.terminating.remove(&uri);
        }
        if st.service_map.get(&uri) == Some(&id) {
            st.service_map.remove(&uri);
        }
        for connection in record.connections().to_vec() {
            st.detach_connection(connection);
        }
        if let Some(record) = st.arena.remove(id) {
            info!("Removed service record {} ({})", id, uri);
            outbox.event(record.event(EventKind::Terminated));
        }
        self.drain_deferred(st, &uri, outbox);
    }

    fn drain_deferred(&self, st: &mut ConnectState, uri: &str, outbox: &mut Outbox) {
        if st.service_map.contains_key(uri) || st.terminating.contains_key(uri) {
            return;
        }
        self.complete_start_request(st, uri, outbox);
        for pending in st.pending_connects.remove(uri).unwrap_or_default() {
            if let Err(e) = self.connect_locked(st, pending.request, pending.handle, pending.caller, outbox) {
                warn!("Deferred connect to {} failed: {}", uri, e);
            }
        }
    }

    // ========================================================================
    // Connect / Disconnect
    // ========================================================================

    /// Bind `handle` to the service described by `request`
    pub fn connect_ability(
        &self,
        request: ComponentRequest,
        handle: ConnectionHandle,
        caller: Option<Token>,
    ) -> AbilityResult<()> {
        self.locked(|st, outbox| self.connect_locked(st, request, handle, caller, outbox))
    }

    fn connect_locked(
        &self,
        st: &mut ConnectState,
        request: ComponentRequest,
        handle: ConnectionHandle,
        caller: Option<Token>,
        outbox: &mut Outbox,
    ) -> AbilityResult<()> {
        let uri = request.uri();
        if st.terminating.contains_key(&uri) {
            debug!("Deferring connect to draining {}", uri);
            st.pending_connects.entry(uri).or_default().push(PendingConnect {
                request,
                handle,
                caller,
            });
            return Ok(());
        }

        let (id, loaded) = self.get_or_create(st, &request, true, outbox);
        if loaded {
            let bound = st.connect_map.get(&handle.id).is_some_and(|list| {
                list.iter()
                    .any(|c| st.arena.connection(*c).is_some_and(|c| c.target() == id))
            });
            if bound {
                debug!("Callback {} is already bound to {}", handle.id, uri);
                return Ok(());
            }
        }

        let connection = self.ids.next_connection();
        let callback = handle.id;
        st.arena
            .insert_connection(ConnectionRecord::new(connection, caller, id, handle));
        st.connect_map.entry(callback).or_default().push(connection);
        st.disconnected.remove(callback);
        let Some(record) = st.arena.get_mut(id) else {
            return Err(AbilityError::RecordNotFound(id));
        };
        record.add_connection(connection);
        let token = record.token();

        if !loaded {
            self.load(st, id, outbox)?;
        } else if record.state() == AbilityState::Active {
            record.set_want(request.want);
            self.handle_active(st, id, connection, outbox);
        } else {
            debug!("Connection {} waits for {} to become active", connection, uri);
        }

        outbox.app(AppCall::AbilityBehaviorAnalysis {
            token,
            pre_token: caller,
        });
        Ok(())
    }

    /// A new connection to an already active service
    fn handle_active(&self, st: &mut ConnectState, id: RecordId, connection: ConnectionId, outbox: &mut Outbox) {
        let Some(record) = st.arena.get(id) else {
            return;
        };
        if record.connections().len() > 1 {
            if record.remote().is_some() {
                self.handler.post(ConnectTask::CompleteConnect(connection));
            } else {
                debug!("Connection {} waits for the first connect of {}", connection, id);
            }
        } else {
            self.connect_record(st, id, outbox);
        }
    }

    /// Send connect to the service and arm the connect timeout
    fn connect_record(&self, st: &mut ConnectState, id: RecordId, outbox: &mut Outbox) {
        match st.arena.first_connecting(id) {
            Some(connection) => self.handler.post_delayed(
                TimerKey::lifecycle(TimeoutKind::Connect, connection.0),
                ConnectTask::ConnectTimeout { record: id, connection },
                self.config.timeouts.connect(),
            ),
            None => warn!("Record {} has no connecting connection", id),
        }
        if let Some(record) = st.arena.get(id) {
            record.connect(outbox);
        }
    }

    /// Release every connection opened through `callback`
    pub fn disconnect_ability(&self, callback: CallbackId) -> AbilityResult<()> {
        self.locked(|st, outbox| self.disconnect_locked(st, callback, false, outbox))
    }

    fn disconnect_locked(
        &self,
        st: &mut ConnectState,
        callback: CallbackId,
        force: bool,
        outbox: &mut Outbox,
    ) -> AbilityResult<()> {
        let Some(list) = st.connect_map.get(&callback).cloned() else {
            if st.disconnected.contains(callback) {
                debug!("Callback {} is already disconnected", callback);
                return Ok(());
            }
            return Err(AbilityError::ConnectionNotExist(callback));
        };

        for connection in list {
            if force {
                self.disconnect_force(st, connection, outbox);
            } else {
                self.disconnect_normal(st, connection, outbox)?;
            }
        }
        Ok(())
    }

    fn disconnect_normal(&self, st: &mut ConnectState, connection: ConnectionId, outbox: &mut Outbox) -> AbilityResult<()> {
        let Some(conn) = st.arena.connection_mut(connection) else {
            return Ok(());
        };
        if conn.state().is_winding_down() {
            debug!("Connection {} is already {}", connection, conn.state());
            return Ok(());
        }
        conn.begin_disconnect()?;
        let target = conn.target();

        let Some(record) = st.arena.get(target) else {
            return Err(AbilityError::RecordNotFound(target));
        };
        if record.connections().len() == 1 {
            self.handler.post_delayed(
                TimerKey::lifecycle(TimeoutKind::Disconnect, connection.0),
                ConnectTask::DisconnectTimeout {
                    record: target,
                    connection,
                },
                self.config.timeouts.disconnect,
            );
            record.disconnect(outbox);
            return Ok(());
        }

        let element = record.element();
        if let Some(conn) = st.arena.connection_mut(connection) {
            conn.set_state(ConnectionState::Disconnected);
            conn.complete_disconnect(element, codes::ERR_OK, false, outbox);
        }
        st.detach_connection(connection);
        Ok(())
    }

    fn disconnect_force(&self, st: &mut ConnectState, connection: ConnectionId, outbox: &mut Outbox) {
        let Some((target, element, _)) = st.target_of(connection) else {
            st.detach_connection(connection);
            return;
        };
        if let Some(conn) = st.arena.connection_mut(connection) {
            conn.complete_disconnect(element, codes::ERR_OK, true, outbox);
        }
        st.detach_connection(connection);
        let orphaned = st
            .arena
            .get(target)
            .is_some_and(|r| r.is_connect_list_empty() && r.start_id() == 0 && !r.is_terminating());
        if orphaned && st.is_live(target) {
            info!("Terminating orphaned service {}", target);
            self.terminate_record(st, target, outbox);
        }
    }

    // ========================================================================
    // Callbacks From The Hosted Process
    // ========================================================================

    /// The process of a loading service attached
    pub fn attach_ability_thread(&self, scheduler: Arc<dyn AbilityScheduler>, token: Token) -> AbilityResult<()> {
        self.locked(|st, outbox| {
            let id = st.live_by_token(token).ok_or(AbilityError::UnknownToken(token))?;
            self.handler
                .cancel(&TimerKey::lifecycle(TimeoutKind::Load, id.0));
            let Some(record) = st.arena.get_mut(id) else {
                return Err(AbilityError::RecordNotFound(id));
            };
            record.attach(scheduler);
            outbox.event(record.event(EventKind::Loaded));
            let key = record.inactivate(&self.ids, outbox);
            let event = record.event_id();
            self.handler.post_delayed(
                key,
                ConnectTask::InactiveTimeout { record: id, event },
                self.config.timeouts.inactive,
            );
            Ok(())
        })
    }

    /// A lifecycle transition finished inside the hosted process
    pub fn transition_done(&self, token: Token, state: LifecycleState) -> AbilityResult<()> {
        self.locked(|st, outbox| match state {
            LifecycleState::Inactive => {
                let id = st.live_by_token(token).ok_or(AbilityError::UnknownToken(token))?;
                self.dispatch_inactive(st, id, outbox)
            }
            LifecycleState::Initial => {
                let id = st.draining_by_token(token).ok_or(AbilityError::UnknownToken(token))?;
                outbox.app(AppCall::UpdateState {
                    token,
                    state: AbilityState::Initial,
                });
                self.handler
                    .cancel(&TimerKey::lifecycle(TimeoutKind::Terminate, id.0));
                self.terminate_done(st, id, outbox)
            }
            other => Err(AbilityError::InvalidValue(format!(
                "services do not report {:?} transitions",
                other
            ))),
        })
    }

    fn dispatch_inactive(&self, st: &mut ConnectState, id: RecordId, outbox: &mut Outbox) -> AbilityResult<()> {
        let Some(record) = st.arena.get_mut(id) else {
            return Err(AbilityError::RecordNotFound(id));
        };
        if record.state() != AbilityState::Inactivating {
            warn!("Record {} reported inactive while {}", id, record.state());
            return Err(AbilityError::invalid_state(
                id,
                AbilityState::Inactivating.as_str(),
                record.state().as_str(),
            ));
        }
        self.handler
            .cancel(&TimerKey::lifecycle(TimeoutKind::Inactive, id.0));
        record.set_state(AbilityState::Inactive);
        outbox.app(AppCall::UpdateState {
            token: record.token(),
            state: AbilityState::Inactive,
        });

        if record.is_create_by_connect() {
            self.connect_record(st, id, outbox);
        } else {
            let connected = !record.is_connect_list_empty();
            self.command(st, id, outbox);
            if connected {
                self.connect_record(st, id, outbox);
            }
        }
        Ok(())
    }

    /// The service published its remote object
    pub fn schedule_connect_done(&self, token: Token, remote: Option<RemoteObject>) -> AbilityResult<()> {
        self.locked(|st, outbox| {
            let id = st.arena.by_token(token).ok_or(AbilityError::UnknownToken(token))?;
            let Some(record) = st.arena.get_mut(id) else {
                return Err(AbilityError::RecordNotFound(id));
            };
            if !matches!(record.state(), AbilityState::Inactive | AbilityState::Active) {
                return Err(AbilityError::InvalidConnectionState(format!(
                    "connect done while record {} is {}",
                    id,
                    record.state()
                )));
            }
            record.set_remote(remote);
            outbox.app(AppCall::UpdateState {
                token,
                state: AbilityState::Active,
            });
            for connection in record.connections().to_vec() {
                self.complete_connect(st, connection, outbox);
            }
            Ok(())
        })
    }

    /// Finish a connection still in CONNECTING. Anything else is a no-op.
    fn complete_connect(&self, st: &mut ConnectState, connection: ConnectionId, outbox: &mut Outbox) {
        let Some((target, element, remote)) = st.target_of(connection) else {
            return;
        };
        let Some(conn) = st.arena.connection_mut(connection) else {
            return;
        };
        if conn.check_connecting().is_err() {
            debug!("Connection {} is {}, skipping connect done", connection, conn.state());
            return;
        }
        self.handler
            .cancel(&TimerKey::lifecycle(TimeoutKind::Connect, connection.0));
        conn.complete_connect(element, remote, codes::ERR_OK, outbox);
        if let Some(record) = st.arena.get_mut(target) {
            if record.state() != AbilityState::Active {
                record.set_state(AbilityState::Active);
                outbox.event(record.event(EventKind::Active));
            }
        }
    }

    /// The service acknowledged a disconnect
    pub fn schedule_disconnect_done(&self, token: Token) -> AbilityResult<()> {
        self.locked(|st, outbox| self.disconnect_done(st, token, outbox))
    }

    fn disconnect_done(&self, st: &mut ConnectState, token: Token, outbox: &mut Outbox) -> AbilityResult<()> {
        let id = st.live_by_token(token).ok_or(AbilityError::UnknownToken(token))?;
        let connection = st.arena.first_disconnecting(id).ok_or_else(|| {
            AbilityError::InvalidConnectionState(format!("record {} has no disconnecting connection", id))
        })?;
        let Some(record) = st.arena.get(id) else {
            return Err(AbilityError::RecordNotFound(id));
        };
        if record.state() != AbilityState::Active {
            return Err(AbilityError::InvalidConnectionState(format!(
                "disconnect done while record {} is {}",
                id,
                record.state()
            )));
        }
        let element = record.element();
        outbox.app(AppCall::UpdateState {
            token,
            state: AbilityState::Active,
        });

        self.handler
            .cancel(&TimerKey::lifecycle(TimeoutKind::Disconnect, connection.0));
        if let Some(conn) = st.arena.connection_mut(connection) {
            conn.finish_disconnect()?;
            conn.complete_disconnect(element, codes::ERR_OK, false, outbox);
        }
        st.detach_connection(connection);

        let orphaned = st
            .arena
            .get(id)
            .is_some_and(|r| r.is_connect_list_empty() && r.start_id() == 0);
        if orphaned {
            info!("Last connection of {} closed, terminating", id);
            self.terminate_record(st, id, outbox);
        }
        Ok(())
    }

    /// The service finished handling a command
    pub fn schedule_command_done(&self, token: Token) -> AbilityResult<()> {
        self.locked(|st, outbox| {
            let id = st.arena.by_token(token).ok_or(AbilityError::UnknownToken(token))?;
            let Some(record) = st.arena.get(id) else {
                return Err(AbilityError::RecordNotFound(id));
            };
            if !matches!(record.state(), AbilityState::Inactive | AbilityState::Active) {
                return Err(AbilityError::InvalidConnectionState(format!(
                    "command done while record {} is {}",
                    id,
                    record.state()
                )));
            }
            self.complete_command(st, id, outbox);
            Ok(())
        })
    }

    fn complete_command(&self, st: &mut ConnectState, id: RecordId, outbox: &mut Outbox) {
        let Some(record) = st.arena.get_mut(id) else {
            return;
        };
        self.handler
            .cancel(&TimerKey::command(id.0, record.start_id()));
        record.finish_command();
        if record.state() != AbilityState::Active {
            record.set_state(AbilityState::Active);
            outbox.event(record.event(EventKind::Active));
        }
        let uri = record.uri();
        self.complete_start_request(st, &uri, outbox);
    }

    // ========================================================================
    // Death
    // ========================================================================

    /// The process hosting `token` died
    pub fn on_ability_died(&self, token: Token) -> AbilityResult<()> {
        self.locked(|st, outbox| {
            let id = st.arena.by_token(token).ok_or(AbilityError::UnknownToken(token))?;
            let Some(record) = st.arena.get_mut(id) else {
                return Err(AbilityError::RecordNotFound(id));
            };
            if !record.info().kind.is_connectable() {
                return Err(AbilityError::NotService(record.uri()));
            }
            record.on_scheduler_died();
            let want = record.want().clone();
            record.save_result_to_callers(codes::CANCELED, &want);
            record.send_result_to_callers(outbox);
            self.handler.post(ConnectTask::AbilityDied(id));
            Ok(())
        })
    }

    /// The process behind `callback` died
    pub fn on_callback_died(&self, callback: CallbackId) {
        self.handler.post(ConnectTask::CallbackDied(callback));
    }

    fn handle_ability_died(&self, st: &mut ConnectState, id: RecordId, outbox: &mut Outbox) {
        let Some(record) = st.arena.get_mut(id) else {
            debug!("Died record {} is already gone", id);
            return;
        };
        record.set_remote(None);
        outbox.event(record.event(EventKind::Died));
        self.terminate_disconnect(st, id, outbox);

        let draining = st.arena.get(id).is_some_and(|r| r.is_terminating()) || st.is_draining(id);
        if !draining && !st.is_live(id) {
            return;
        }
        if !draining {
            st.move_to_terminating(id);
        }
        let plan = self.restart_plan(st, id);
        self.remove_service_ability(st, id, outbox);
        if let Some(plan) = plan {
            self.restart_ability(st, plan, outbox);
        }
    }

    /// Decide how a keep-alive record comes back. Spends one restart.
    fn restart_plan(&self, st: &mut ConnectState, id: RecordId) -> Option<RestartPlan> {
        let now = self.now_ms();
        let interval = self.config.timeouts.resident_restart_interval.as_millis() as i64;
        let record = st.arena.get_mut(id)?;
        let request = ComponentRequest::new(record.want().clone(), record.info().clone(), record.app().clone());
        if !(record.is_keep_alive() || self.needs_keep_alive(&request)) {
            return None;
        }
        record.set_restarting(true);
        let launcher = record.is_launcher_root();
        let immediate = launcher || record.can_restart_resident(now, interval);
        let restart_time = if immediate && !launcher { now } else { record.restart_time() };
        Some(RestartPlan {
            request: request.as_restart(record.restart_count(), restart_time),
            launcher,
            immediate,
        })
    }

    fn restart_ability(&self, st: &mut ConnectState, plan: RestartPlan, outbox: &mut Outbox) {
        let uri = plan.request.uri();
        if plan.launcher || plan.immediate {
            info!("Restarting {} (count {})", uri, plan.request.restart_count);
            if let Err(e) = self.start_locked(st, plan.request, outbox, false) {
                error!("Restart of {} failed: {}", uri, e);
            }
            return;
        }
        if st.restart_resident.contains(&uri) {
            info!("Resident {} already waits for a restart", uri);
            return;
        }
        info!("Resident {} restarts again in {:?}", uri, self.config.timeouts.resident_restart_interval);
        st.restart_resident.push(uri.clone());
        self.handler.post_delayed(
            TimerKey::RestartResident(uri),
            ConnectTask::RestartResident(Box::new(plan.request)),
            self.config.timeouts.resident_restart_interval,
        );
    }

    // ========================================================================
    // Timeouts
    // ========================================================================

    /// Load or connect did not finish in time
    fn handle_start_timeout(&self, st: &mut ConnectState, id: RecordId, kind: TimeoutKind, outbox: &mut Outbox) {
        let Some(record) = st.arena.get(id) else {
            return;
        };
        warn!("{} of {} ({}) timed out", kind, record.uri(), id);
        let element = record.element();
        for connection in st.arena.connecting_connections(id) {
            if let Some(conn) = st.arena.connection_mut(connection) {
                conn.complete_disconnect(element.clone(), codes::ERR_OK, true, outbox);
            }
            st.detach_connection(connection);
        }
        if !st.is_live(id) {
            return;
        }

        st.move_to_terminating(id);
        let Some(record) = st.arena.get(id) else {
            return;
        };
        let token = record.token();
        outbox.event(record.event(EventKind::TimedOut { timeout: kind }));
        outbox.app(AppCall::AttachTimeOut { token });

        if kind == TimeoutKind::Load {
            let plan = self.restart_plan(st, id);
            self.remove_service_ability(st, id, outbox);
            if let Some(plan) = plan {
                self.restart_ability(st, plan, outbox);
            }
        } else {
            self.terminate_disconnect(st, id, outbox);
            self.terminate_record(st, id, outbox);
        }
    }

    fn handle_timeout(&self, st: &mut ConnectState, task: ConnectTask, outbox: &mut Outbox) {
        match task {
            ConnectTask::LoadTimeout { record, event } => {
                let pending = st
                    .arena
                    .get(record)
                    .is_some_and(|r| r.event_id() == event && !r.is_ready());
                if pending {
                    self.handle_start_timeout(st, record, TimeoutKind::Load, outbox);
                } else {
                    debug!("Stale load timeout for {}", record);
                }
            }
            ConnectTask::ConnectTimeout { record, connection } => {
                let pending = st
                    .arena
                    .connection(connection)
                    .is_some_and(|c| c.state() == ConnectionState::Connecting);
                if pending {
                    self.handle_start_timeout(st, record, TimeoutKind::Connect, outbox);
                } else {
                    debug!("Stale connect timeout for connection {}", connection);
                }
            }
            ConnectTask::InactiveTimeout { record, event } => {
                let Some(r) = st.arena.get(record) else {
                    return;
                };
                if r.event_id() != event || r.state() != AbilityState::Inactivating {
                    debug!("Stale inactive timeout for {}", record);
                    return;
                }
                warn!("Inactive of {} timed out", record);
                outbox.event(r.event(EventKind::TimedOut {
                    timeout: TimeoutKind::Inactive,
                }));
                if r.is_launcher_root() {
                    outbox.app(AppCall::AttachTimeOut { token: r.token() });
                }
            }
            ConnectTask::CommandTimeout { record, start_id } => {
                let Some(r) = st.arena.get_mut(record) else {
                    return;
                };
                if r.start_id() != start_id || !r.is_command_pending() {
                    debug!("Stale command timeout for {}", record);
                    return;
                }
                warn!("Command {} of {} timed out", start_id, record);
                r.finish_command();
                outbox.event(r.event(EventKind::TimedOut {
                    timeout: TimeoutKind::Command,
                }));
                if r.is_launcher_root() {
                    outbox.app(AppCall::AttachTimeOut { token: r.token() });
                }
                let uri = r.uri();
                self.complete_start_request(st, &uri, outbox);
            }
            ConnectTask::TerminateTimeout { record, event } => {
                let pending = st
                    .arena
                    .get(record)
                    .is_some_and(|r| r.event_id() == event && r.state() == AbilityState::Terminating);
                if !pending {
                    debug!("Stale terminate timeout for {}", record);
                    return;
                }
                warn!("Terminate of {} timed out, removing it", record);
                if let Err(e) = self.terminate_done(st, record, outbox) {
                    warn!("Terminate timeout of {} failed: {}", record, e);
                }
            }
            ConnectTask::DisconnectTimeout { record, connection } => {
                let pending = st
                    .arena
                    .connection(connection)
                    .is_some_and(|c| c.state() == ConnectionState::Disconnecting);
                let token = st.arena.get(record).map(|r| r.token());
                if let (true, Some(token)) = (pending, token) {
                    warn!("Disconnect of connection {} timed out, forcing it", connection);
                    if let Err(e) = self.disconnect_done(st, token, outbox) {
                        warn!("Forced disconnect of {} failed: {}", connection, e);
                    }
                }
            }
            other => debug!("Not a timeout task: {}", other.name()),
        }
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Snapshot of the live record started for `element`
    pub fn get_service_record_by_element(&self, element: &ElementName) -> Option<RecordSnapshot> {
        let st = self.state.lock();
        let id = st.service_map.get(&element.uri())?;
        st.arena.get(*id).map(|r| r.snapshot())
    }

    /// Snapshot of the record behind `token`, live or draining
    pub fn record_by_token(&self, token: Token) -> Option<RecordSnapshot> {
        let st = self.state.lock();
        st.arena
            .by_token(token)
            .and_then(|id| st.arena.get(id))
            .map(|r| r.snapshot())
    }

    #[inline]
    pub fn contains_token(&self, token: Token) -> bool {
        self.state.lock().arena.by_token(token).is_some()
    }

    pub fn is_live(&self, uri: &str) -> bool {
        self.state.lock().service_map.contains_key(uri)
    }

    pub fn is_terminating(&self, uri: &str) -> bool {
        self.state.lock().terminating.contains_key(uri)
    }

    /// Connections currently opened through `callback`
    pub fn connection_count(&self, callback: CallbackId) -> usize {
        self.state
            .lock()
            .connect_map
            .get(&callback)
            .map_or(0, |list| list.len())
    }

    /// `callback` has live connections here or was disconnected here
    pub fn knows_callback(&self, callback: CallbackId) -> bool {
        let st = self.state.lock();
        st.connect_map.contains_key(&callback) || st.disconnected.contains(callback)
    }

    /// Deferred start requests waiting for `uri`
    pub fn pending_start_count(&self, uri: &str) -> usize {
        self.state
            .lock()
            .start_requests
            .get(uri)
            .map_or(0, |q| q.len())
    }

    /// Records in the arena, live and draining
    pub fn record_count(&self) -> usize {
        self.state.lock().arena.len()
    }

    /// Every live service, ordered by URI
    pub fn running_infos(&self) -> Vec<RecordSnapshot> {
        let st = self.state.lock();
        st.service_map
            .values()
            .filter_map(|id| st.arena.get(*id))
            .map(|r| r.snapshot())
            .collect()
    }

    pub fn dump(&self) -> Vec<String> {
        let st = self.state.lock();
        let mut lines = vec![format!("User ID #{}", self.user), "  ServiceRecords:".to_string()];
        for id in st.service_map.values() {
            if let Some(record) = st.arena.get(*id) {
                lines.extend(record.dump());
            }
        }
        if !st.terminating.is_empty() {
            lines.push("  TerminatingRecords:".to_string());
            for id in st.terminating.values() {
                if let Some(record) = st.arena.get(*id) {
                    lines.extend(record.dump());
                }
            }
        }
        lines
    }
}

impl TaskDriver for ConnectManager {
    type Task = ConnectTask;

    fn handler(&self) -> &TaskHandler<ConnectTask> {
        &self.handler
    }

    fn run_task(&self, task: ConnectTask) {
        debug!("User {} connect task {}", self.user, task.name());
        self.locked(|st, outbox| match task {
            ConnectTask::StartQueueExpired(uri) => {
                if st.start_requests.remove(&uri).is_some() {
                    error!("Deferred starts of {} expired", uri);
                }
            }
            ConnectTask::CompleteConnect(connection) => self.complete_connect(st, connection, outbox),
            ConnectTask::RestartResident(request) => {
                let uri = request.uri();
                st.restart_resident.retain(|u| *u != uri);
                if let Err(e) = self.start_locked(st, *request, outbox, false) {
                    error!("Resident restart of {} failed: {}", uri, e);
                }
            }
            ConnectTask::AbilityDied(record) => self.handle_ability_died(st, record, outbox),
            ConnectTask::CallbackDied(callback) => {
                if st.connect_map.contains_key(&callback) {
                    info!("Callback {} died, closing its connections", callback);
                    if let Err(e) = self.disconnect_locked(st, callback, true, outbox) {
                        warn!("Closing connections of {} failed: {}", callback, e);
                    }
                }
            }
            timeout => self.handle_timeout(st, timeout, outbox),
        })
    }
}

impl std::fmt::Debug for ConnectManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectManager")
            .field("user", &self.user)
            .field("pending_tasks", &self.handler.len())
            .finish()
    }
}
