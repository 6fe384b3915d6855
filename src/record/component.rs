/*!
 * Component Record
 * Manager-side state machine of one component instance
 *
 * A record never calls a collaborator directly. Every lifecycle request
 * enters its pending state, pushes the outbound request into an [`Outbox`]
 * and returns the [`TimerKey`] the owning manager arms a timeout under.
 */

use super::caller::CallerRecord;
use super::state::{AbilityState, LifecycleState};
use crate::core::errors::{codes, AbilityError, AbilityResult};
use crate::core::id::{ConnectionId, IdAllocator, MissionId, RecordId, Token, UserId};
use crate::core::types::{
    ApplicationInfo, ComponentInfo, ComponentKind, ComponentRequest, ElementName, RemoteObject, Want,
};
use crate::events::{EventKind, LifecycleEvent};
use crate::handler::{TimeoutKind, TimerKey};
use crate::host::{AbilityScheduler, AppCall, Outbox, Transaction};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use time::OffsetDateTime;

pub struct ComponentRecord {
    id: RecordId,
    token: Token,
    user: UserId,
    want: Want,
    info: ComponentInfo,
    app: ApplicationInfo,
    request_code: i32,
    state: AbilityState,
    event_id: u64,
    start_time: Option<OffsetDateTime>,
    scheduler: Option<Arc<dyn AbilityScheduler>>,
    remote: Option<RemoteObject>,
    connections: Vec<ConnectionId>,
    callers: Vec<CallerRecord>,
    next: Option<RecordId>,
    mission: Option<MissionId>,
    start_id: u64,
    restart_count: i32,
    restart_max: i32,
    restart_time: i64,
    ready: bool,
    window_attached: bool,
    keep_alive: bool,
    launcher_root: bool,
    create_by_connect: bool,
    restarting: bool,
    new_want: bool,
    terminating: bool,
    command_pending: bool,
    locked: bool,
}

impl ComponentRecord {
    pub fn from_request(id: RecordId, user: UserId, request: &ComponentRequest) -> Self {
        Self {
            id,
            token: Token::new(),
            user,
            want: request.want.clone(),
            info: request.info.clone(),
            app: request.app.clone(),
            request_code: request.request_code,
            state: AbilityState::Initial,
            event_id: 0,
            start_time: None,
            scheduler: None,
            remote: None,
            connections: Vec::new(),
            callers: Vec::new(),
            next: None,
            mission: None,
            start_id: 0,
            restart_count: request.restart_count,
            restart_max: request.restart_count,
            restart_time: request.restart_time,
            ready: false,
            window_attached: false,
            keep_alive: request.app.keep_alive,
            launcher_root: false,
            create_by_connect: false,
            restarting: false,
            new_want: false,
            terminating: false,
            command_pending: false,
            locked: false,
        }
    }

    // ========================================================================
    // Identity
    // ========================================================================

    #[inline]
    pub fn id(&self) -> RecordId {
        self.id
    }

    #[inline]
    pub fn token(&self) -> Token {
        self.token
    }

    #[inline]
    pub fn user(&self) -> UserId {
        self.user
    }

    #[inline]
    pub fn element(&self) -> ElementName {
        self.info.element()
    }

    #[inline]
    pub fn uri(&self) -> String {
        self.info.element().uri()
    }

    #[inline]
    pub fn info(&self) -> &ComponentInfo {
        &self.info
    }

    #[inline]
    pub fn app(&self) -> &ApplicationInfo {
        &self.app
    }

    #[inline]
    pub fn want(&self) -> &Want {
        &self.want
    }

    /// Replace the start intent of a reused record
    pub fn set_want(&mut self, want: Want) {
        self.want = want;
        self.new_want = true;
    }

    #[inline]
    pub fn request_code(&self) -> i32 {
        self.request_code
    }

    /// Snapshot of this record for the event bus
    pub fn event(&self, kind: EventKind) -> LifecycleEvent {
        LifecycleEvent {
            user: self.user,
            record: self.id,
            token: self.token,
            uri: self.uri(),
            kind,
        }
    }

    // ========================================================================
    // State
    // ========================================================================

    #[inline]
    pub fn state(&self) -> AbilityState {
        self.state
    }

    pub fn set_state(&mut self, state: AbilityState) {
        debug!("Record {} {} -> {}", self.id, self.state, state);
        self.state = state;
        if matches!(state, AbilityState::Foreground | AbilityState::Active) {
            self.set_restarting(false);
        }
    }

    #[inline]
    pub fn event_id(&self) -> u64 {
        self.event_id
    }

    #[inline]
    pub fn start_time(&self) -> Option<OffsetDateTime> {
        self.start_time
    }

    #[inline]
    pub fn is_ready(&self) -> bool {
        self.ready
    }

    #[inline]
    pub fn scheduler(&self) -> Option<&Arc<dyn AbilityScheduler>> {
        self.scheduler.as_ref()
    }

    /// The hosted process attached and handed over its scheduler
    pub fn attach(&mut self, scheduler: Arc<dyn AbilityScheduler>) {
        self.scheduler = Some(scheduler);
        self.ready = true;
    }

    #[inline]
    pub fn remote(&self) -> Option<RemoteObject> {
        self.remote
    }

    #[inline]
    pub fn set_remote(&mut self, remote: Option<RemoteObject>) {
        self.remote = remote;
    }

    #[inline]
    pub fn is_window_attached(&self) -> bool {
        self.window_attached
    }

    #[inline]
    pub fn set_window_attached(&mut self, attached: bool) {
        self.window_attached = attached;
    }

    /// Once set, stays set for the lifetime of the record
    #[inline]
    pub fn is_terminating(&self) -> bool {
        self.terminating
    }

    #[inline]
    pub fn set_terminating(&mut self) {
        self.terminating = true;
    }

    #[inline]
    pub fn is_keep_alive(&self) -> bool {
        self.keep_alive
    }

    #[inline]
    pub fn set_keep_alive(&mut self) {
        self.keep_alive = true;
    }

    #[inline]
    pub fn is_launcher_root(&self) -> bool {
        self.launcher_root
    }

    #[inline]
    pub fn set_launcher_root(&mut self) {
        self.launcher_root = true;
    }

    #[inline]
    pub fn is_create_by_connect(&self) -> bool {
        self.create_by_connect
    }

    #[inline]
    pub fn set_create_by_connect(&mut self, value: bool) {
        self.create_by_connect = value;
    }

    #[inline]
    pub fn is_new_want(&self) -> bool {
        self.new_want
    }

    #[inline]
    pub fn is_locked(&self) -> bool {
        self.locked
    }

    #[inline]
    pub fn set_locked(&mut self, locked: bool) {
        self.locked = locked;
    }

    #[inline]
    pub fn next(&self) -> Option<RecordId> {
        self.next
    }

    #[inline]
    pub fn set_next(&mut self, next: Option<RecordId>) {
        self.next = next;
    }

    #[inline]
    pub fn mission(&self) -> Option<MissionId> {
        self.mission
    }

    #[inline]
    pub fn set_mission(&mut self, mission: Option<MissionId>) {
        self.mission = mission;
    }

    /// Reset per-run flags before a reused record is driven again
    pub fn clear_flag(&mut self) {
        self.restarting = false;
        self.window_attached = false;
        self.new_want = false;
        self.command_pending = false;
    }

    // ========================================================================
    // Restart Budget
    // ========================================================================

    #[inline]
    pub fn is_restarting(&self) -> bool {
        self.restarting
    }

    #[inline]
    pub fn restart_count(&self) -> i32 {
        self.restart_count
    }

    #[inline]
    pub fn restart_time(&self) -> i64 {
        self.restart_time
    }

    /// Seed the restart budget of a root or resident component
    pub fn set_restart_budget(&mut self, count: i32, max: i32, time: i64) {
        self.restart_count = count;
        self.restart_max = max;
        self.restart_time = time;
    }

    /// Entering a restart spends one from the budget; leaving it refills
    pub fn set_restarting(&mut self, restarting: bool) {
        self.restarting = restarting;
        if self.launcher_root || self.keep_alive {
            self.restart_count = if restarting {
                self.restart_count - 1
            } else {
                self.restart_max
            };
            debug!("Record {} restart count {}", self.id, self.restart_count);
        }
    }

    /// Restart flag and remaining budget carried over from a replaced record
    pub fn resume_restart(&mut self, count: i32) {
        self.restarting = true;
        self.restart_count = count;
    }

    /// False once a restarting launcher root has spent its budget
    #[inline]
    pub fn can_restart_root_launcher(&self) -> bool {
        !(self.launcher_root && self.restarting && self.restart_count < 0)
    }

    /// Residents with a spent budget wait `interval_ms` between restarts
    pub fn can_restart_resident(&self, now_ms: i64, interval_ms: i64) -> bool {
        if self.keep_alive && self.restart_count < 0 {
            return now_ms - self.restart_time >= interval_ms;
        }
        true
    }

    // ========================================================================
    // Lifecycle Requests
    // ========================================================================

    fn schedule(&self, outbox: &mut Outbox, transaction: Transaction) {
        match &self.scheduler {
            Some(scheduler) => outbox.ability(Arc::clone(scheduler), self.token, transaction),
            None => warn!("Record {} has no scheduler, dropping {:?}", self.id, transaction),
        }
    }

    /// Ask the process manager to load this component
    pub fn load(
        &mut self,
        ids: &IdAllocator,
        pre_token: Option<Token>,
        outbox: &mut Outbox,
    ) -> AbilityResult<TimerKey> {
        if !self.can_restart_root_launcher() {
            warn!("Root launcher {} exhausted its restart budget", self.id);
            return Err(AbilityError::LoadFailed(self.uri()));
        }
        info!("Loading {} ({})", self.uri(), self.id);
        self.start_time = Some(OffsetDateTime::now_utc());
        self.event_id = ids.next_event();
        outbox.app(AppCall::LoadAbility {
            token: self.token,
            pre_token,
            info: self.info.clone(),
            app: self.app.clone(),
            want: self.want.clone(),
        });
        Ok(TimerKey::lifecycle(TimeoutKind::Load, self.id.0))
    }

    fn lifecycle(
        &mut self,
        ids: &IdAllocator,
        pending: AbilityState,
        target: LifecycleState,
        kind: TimeoutKind,
        outbox: &mut Outbox,
    ) -> TimerKey {
        self.set_state(pending);
        self.event_id = ids.next_event();
        let want = self.want.clone();
        self.schedule(outbox, Transaction::Lifecycle { want, target });
        TimerKey::lifecycle(kind, self.id.0)
    }

    pub fn inactivate(&mut self, ids: &IdAllocator, outbox: &mut Outbox) -> TimerKey {
        self.lifecycle(
            ids,
            AbilityState::Inactivating,
            LifecycleState::Inactive,
            TimeoutKind::Inactive,
            outbox,
        )
    }

    pub fn foreground(&mut self, ids: &IdAllocator, outbox: &mut Outbox) -> TimerKey {
        self.lifecycle(
            ids,
            AbilityState::Foregrounding,
            LifecycleState::Foreground,
            TimeoutKind::Foreground,
            outbox,
        )
    }

    pub fn background(&mut self, ids: &IdAllocator, outbox: &mut Outbox) -> TimerKey {
        self.lifecycle(
            ids,
            AbilityState::Backgrounding,
            LifecycleState::Background,
            TimeoutKind::Background,
            outbox,
        )
    }

    pub fn terminate(&mut self, ids: &IdAllocator, outbox: &mut Outbox) -> TimerKey {
        self.lifecycle(
            ids,
            AbilityState::Terminating,
            LifecycleState::Initial,
            TimeoutKind::Terminate,
            outbox,
        )
    }

    pub fn connect(&self, outbox: &mut Outbox) {
        self.schedule(
            outbox,
            Transaction::Connect {
                want: self.want.clone(),
            },
        );
    }

    pub fn disconnect(&self, outbox: &mut Outbox) {
        self.schedule(
            outbox,
            Transaction::Disconnect {
                want: self.want.clone(),
            },
        );
    }

    /// Deliver the start intent to a running service. Returns the command key.
    pub fn command(&mut self, outbox: &mut Outbox) -> TimerKey {
        self.start_id += 1;
        self.command_pending = true;
        self.schedule(
            outbox,
            Transaction::Command {
                want: self.want.clone(),
                restart: self.restarting,
                start_id: self.start_id,
            },
        );
        TimerKey::command(self.id.0, self.start_id)
    }

    #[inline]
    pub fn start_id(&self) -> u64 {
        self.start_id
    }

    /// A command was sent and not yet acknowledged
    #[inline]
    pub fn is_command_pending(&self) -> bool {
        self.command_pending
    }

    #[inline]
    pub fn finish_command(&mut self) {
        self.command_pending = false;
    }

    /// The hosted process died; drop everything tied to it
    pub fn on_scheduler_died(&mut self) {
        warn!("Scheduler of record {} ({}) died", self.id, self.uri());
        self.scheduler = None;
        self.ready = false;
        self.window_attached = false;
        self.remote = None;
    }

    // ========================================================================
    // Connections
    // ========================================================================

    #[inline]
    pub fn connections(&self) -> &[ConnectionId] {
        &self.connections
    }

    pub fn add_connection(&mut self, connection: ConnectionId) {
        if !self.connections.contains(&connection) {
            self.connections.push(connection);
        }
    }

    pub fn remove_connection(&mut self, connection: ConnectionId) {
        self.connections.retain(|c| *c != connection);
    }

    #[inline]
    pub fn is_connect_list_empty(&self) -> bool {
        self.connections.is_empty()
    }

    // ========================================================================
    // Callers
    // ========================================================================

    #[inline]
    pub fn callers(&self) -> &[CallerRecord] {
        &self.callers
    }

    /// Record a caller. A repeated caller moves to the back of the list.
    pub fn add_caller(&mut self, caller: Option<Token>, request_code: i32) {
        if caller.is_some() {
            self.callers.retain(|c| c.caller != caller);
        }
        self.callers.push(CallerRecord::new(request_code, caller));
    }

    /// Latest caller of this record
    pub fn last_caller(&self) -> Option<Token> {
        self.callers.last().and_then(|c| c.caller)
    }

    pub fn remove_caller_request_code(&mut self, caller: Token, request_code: i32) {
        self.callers
            .retain(|c| !(c.caller == Some(caller) && c.request_code == request_code));
    }

    /// The latest caller gets the real result, every earlier caller is cancelled
    pub fn save_result_to_callers(&mut self, result_code: i32, want: &Want) {
        let Some((latest, earlier)) = self.callers.split_last_mut() else {
            warn!("Record {} has no callers to save a result for", self.id);
            return;
        };
        latest.save_result(result_code, want.clone());
        for caller in earlier {
            caller.save_result(codes::CANCELED, want.clone());
        }
    }

    /// Send every saved result to its caller
    pub fn send_result_to_callers(&mut self, outbox: &mut Outbox) {
        for caller in &mut self.callers {
            let (Some(token), Some(result)) = (caller.caller, caller.result.take()) else {
                continue;
            };
            outbox.app(AppCall::SendResult {
                caller: token,
                request_code: result.request_code,
                result_code: result.result_code,
                want: result.want,
            });
        }
    }

    // ========================================================================
    // Diagnostics
    // ========================================================================

    pub fn dump(&self) -> Vec<String> {
        let mut lines = vec![
            format!("  AbilityRecord ID #{}", self.id),
            format!("    app name [{}]", self.app.name),
            format!("    main name [{}]", self.info.name),
            format!("    bundle name [{}]", self.info.bundle_name),
            format!("    state #{}  start id #{}", self.state, self.start_id),
            format!(
                "    ready #{}  window attached #{}  launcher #{}  keep alive #{}",
                self.ready, self.window_attached, self.launcher_root, self.keep_alive
            ),
            format!("    connections #{}  callers #{}", self.connections.len(), self.callers.len()),
        ];
        if let Some(start) = self.start_time {
            lines.push(format!("    start time [{}]", start.unix_timestamp()));
        }
        lines
    }
}

/// Point-in-time view of a record, safe to hand out of the manager lock
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordSnapshot {
    pub id: RecordId,
    pub token: Token,
    pub uri: String,
    pub kind: ComponentKind,
    pub state: AbilityState,
    pub start_id: u64,
    pub connections: usize,
    pub callers: usize,
    pub mission: Option<MissionId>,
    pub ready: bool,
    pub terminating: bool,
    pub restarting: bool,
    pub restart_count: i32,
    pub keep_alive: bool,
    pub launcher_root: bool,
    pub uid: i32,
    #[serde(with = "time::serde::timestamp::option")]
    pub start_time: Option<OffsetDateTime>,
}

impl ComponentRecord {
    pub fn snapshot(&self) -> RecordSnapshot {
        RecordSnapshot {
            id: self.id,
            token: self.token,
            uri: self.uri(),
            kind: self.info.kind,
            state: self.state,
            start_id: self.start_id,
            connections: self.connections.len(),
            callers: self.callers.len(),
            mission: self.mission,
            ready: self.ready,
            terminating: self.terminating,
            restarting: self.restarting,
            restart_count: self.restart_count,
            keep_alive: self.keep_alive,
            launcher_root: self.launcher_root,
            uid: self.app.uid,
            start_time: self.start_time,
        }
    }
}

impl fmt::Debug for ComponentRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentRecord")
            .field("id", &self.id)
            .field("token", &self.token)
            .field("uri", &self.uri())
            .field("state", &self.state)
            .field("connections", &self.connections)
            .field("terminating", &self.terminating)
            .finish()
    }
}
