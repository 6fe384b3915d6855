/*!
 * Kernel Ability Manager
 * System UI pages of one user
 *
 * System UI pages never join a mission list. Records are kept newest first
 * and the front record is the top. Only one record moves to the foreground
 * at a time; starts arriving meanwhile queue up and are drained one per
 * completed foreground. A component that dies or stalls is started again
 * after a fixed delay.
 */

use super::task::KernelTask;
use crate::config::KernelConfig;
use crate::core::errors::{AbilityError, AbilityResult, StartOutcome};
use crate::core::id::{IdAllocator, RecordId, Token, UserId};
use crate::core::limits::SYSTEM_UI_BUNDLE_NAME;
use crate::core::types::{ComponentInfo, ComponentKind, ComponentRequest};
use crate::events::{EventKind, ManagerKind};
use crate::handler::{Clock, TaskDriver, TaskHandler, TimeoutKind, TimerKey};
use crate::host::{AbilityScheduler, AppCall, Dispatcher, Outbox};
use crate::record::{AbilityState, ComponentRecord, LifecycleState, RecordArena, RecordSnapshot};
use ahash::HashMap;
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

/// Pages of the system UI bundle belong to the kernel manager
#[inline]
pub fn is_system_ui(info: &ComponentInfo) -> bool {
    info.kind == ComponentKind::Page && info.bundle_name == SYSTEM_UI_BUNDLE_NAME
}

fn flag_of(info: &ComponentInfo) -> String {
    format!("{}:{}", info.bundle_name, info.name)
}

struct KernelState {
    arena: RecordArena,
    /// Newest first; the front is the top
    abilities: VecDeque<RecordId>,
    waiting: VecDeque<ComponentRequest>,
    /// Latest request per flag, replayed by restarts
    requests: HashMap<String, ComponentRequest>,
}

impl KernelState {
    fn new() -> Self {
        Self {
            arena: RecordArena::new(),
            abilities: VecDeque::new(),
            waiting: VecDeque::new(),
            requests: HashMap::default(),
        }
    }

    fn top(&self) -> Option<RecordId> {
        self.abilities.front().copied()
    }

    fn state_of(&self, id: RecordId) -> Option<AbilityState> {
        self.arena.get(id).map(|r| r.state())
    }

    fn by_flag(&self, flag: &str) -> Option<RecordId> {
        self.abilities
            .iter()
            .copied()
            .find(|id| self.arena.get(*id).is_some_and(|r| flag_of(r.info()) == flag))
    }

    fn remove(&mut self, id: RecordId) -> Option<ComponentRecord> {
        self.abilities.retain(|r| *r != id);
        self.arena.remove(id)
    }
}

pub struct KernelAbilityManager {
    user: UserId,
    config: Arc<KernelConfig>,
    ids: IdAllocator,
    dispatcher: Dispatcher,
    handler: TaskHandler<KernelTask>,
    state: Mutex<KernelState>,
}

impl KernelAbilityManager {
    pub fn new(
        user: UserId,
        config: Arc<KernelConfig>,
        ids: IdAllocator,
        dispatcher: Dispatcher,
        clock: Arc<dyn Clock>,
    ) -> Self {
        info!("Creating kernel ability manager for user {}", user);
        Self {
            user,
            config,
            ids,
            dispatcher,
            handler: TaskHandler::new(clock),
            state: Mutex::new(KernelState::new()),
        }
    }

    #[inline]
    pub fn user(&self) -> UserId {
        self.user
    }

    fn locked<R>(&self, f: impl FnOnce(&mut KernelState, &mut Outbox) -> R) -> R {
        let mut outbox = Outbox::new();
        let result = {
            let mut state = self.state.lock();
            f(&mut state, &mut outbox)
        };
        self.dispatcher.flush(outbox);
        result
    }

    // ========================================================================
    // Start
    // ========================================================================

    /// Start a system UI page. Waits behind queued starts and behind a top
    /// that is still moving to the foreground.
    pub fn start_ability(&self, request: ComponentRequest) -> AbilityResult<StartOutcome> {
        self.locked(|st, outbox| self.start_or_wait(st, request, outbox))
    }

    fn start_or_wait(
        &self,
        st: &mut KernelState,
        request: ComponentRequest,
        outbox: &mut Outbox,
    ) -> AbilityResult<StartOutcome> {
        if !st.waiting.is_empty() {
            info!("{} starts are queued, {} waits", st.waiting.len(), request.uri());
            st.waiting.push_back(request);
            return Ok(StartOutcome::Waiting);
        }
        if let Some(top) = st.top().and_then(|id| st.arena.get(id)) {
            if top.state() == AbilityState::Foregrounding {
                info!("Top {} is still foregrounding, {} waits", top.uri(), request.uri());
                st.waiting.push_back(request);
                return Ok(StartOutcome::Waiting);
            }
        }
        self.start_locked(st, request, outbox)?;
        Ok(StartOutcome::Started)
    }

    fn start_locked(&self, st: &mut KernelState, request: ComponentRequest, outbox: &mut Outbox) -> AbilityResult<()> {
        let flag = flag_of(&request.info);
        let id = match st.by_flag(&flag) {
            Some(id) => {
                if let Some(record) = st.arena.get_mut(id) {
                    debug!("Reusing system UI record {} for {}", id, flag);
                    record.set_want(request.want.clone());
                }
                id
            }
            None => {
                let id = self.ids.next_record();
                let record = ComponentRecord::from_request(id, self.user, &request);
                outbox.event(record.event(EventKind::Created {
                    owner: ManagerKind::Kernel,
                }));
                st.arena.insert(record);
                st.abilities.push_front(id);
                info!("Created system UI record {} for {}", id, request.uri());
                id
            }
        };
        st.requests.insert(flag, request);

        if st.state_of(id).is_some_and(|s| s.is_foreground_like()) {
            debug!("System UI record {} is already foreground, foregrounding again", id);
            self.foreground(st, id, outbox);
            return Ok(());
        }
        self.load(st, id, outbox)
    }

    fn load(&self, st: &mut KernelState, id: RecordId, outbox: &mut Outbox) -> AbilityResult<()> {
        let Some(record) = st.arena.get_mut(id) else {
            return Err(AbilityError::RecordNotFound(id));
        };
        let key = record.load(&self.ids, None, outbox)?;
        let event = record.event_id();
        self.handler
            .post_delayed(key, KernelTask::LoadTimeout { record: id, event }, self.config.timeouts.load());
        Ok(())
    }

    fn foreground(&self, st: &mut KernelState, id: RecordId, outbox: &mut Outbox) {
        let Some(record) = st.arena.get_mut(id) else {
            return;
        };
        let key = record.foreground(&self.ids, outbox);
        let event = record.event_id();
        self.handler.post_delayed(
            key,
            KernelTask::ForegroundTimeout { record: id, event },
            self.config.timeouts.foreground,
        );
    }

    fn complete_foreground(&self, st: &mut KernelState, id: RecordId, outbox: &mut Outbox) {
        let Some(record) = st.arena.get_mut(id) else {
            return;
        };
        if record.state() != AbilityState::Foregrounding {
            warn!("System UI record {} is {}, cannot complete foreground", id, record.state());
            return;
        }
        record.set_state(AbilityState::Foreground);
        outbox.event(record.event(EventKind::Foregrounded));
        info!("{} is foreground", record.uri());
        self.handler.post(KernelTask::DequeueWaiting);
    }

    fn dequeue_waiting(&self, st: &mut KernelState, outbox: &mut Outbox) {
        if let Some(top) = st.top() {
            if st.state_of(top) != Some(AbilityState::Foreground) {
                debug!("Top {} is not foreground yet, waiting queue stays", top);
                return;
            }
        }
        let Some(request) = st.waiting.pop_front() else {
            return;
        };
        let uri = request.uri();
        if let Err(e) = self.start_locked(st, request, outbox) {
            warn!("Waiting start of {} failed: {}", uri, e);
        }
    }

    // ========================================================================
    // Callbacks From The Hosted Process
    // ========================================================================

    pub fn attach_ability_thread(&self, scheduler: Arc<dyn AbilityScheduler>, token: Token) -> AbilityResult<()> {
        self.locked(|st, outbox| {
            let id = st.arena.by_token(token).ok_or(AbilityError::UnknownToken(token))?;
            self.handler.cancel(&TimerKey::lifecycle(TimeoutKind::Load, id.0));
            let Some(record) = st.arena.get_mut(id) else {
                return Err(AbilityError::RecordNotFound(id));
            };
            record.attach(scheduler);
            record.set_state(AbilityState::Inactive);
            outbox.event(record.event(EventKind::Loaded));
            outbox.app(AppCall::MoveToForeground { token });
            Ok(())
        })
    }

    pub fn on_ability_request_done(&self, token: Token, state: LifecycleState) -> AbilityResult<()> {
        if state != LifecycleState::Foreground {
            return Ok(());
        }
        self.locked(|st, outbox| {
            let id = st.arena.by_token(token).ok_or(AbilityError::UnknownToken(token))?;
            if st.state_of(id) == Some(AbilityState::Foregrounding) {
                debug!("System UI record {} is already foregrounding", id);
                return Ok(());
            }
            self.foreground(st, id, outbox);
            Ok(())
        })
    }

    /// Only foreground transitions are reported by system UI pages
    pub fn transition_done(&self, token: Token, state: LifecycleState) -> AbilityResult<()> {
        let st = self.state.lock();
        let id = st.arena.by_token(token).ok_or(AbilityError::UnknownToken(token))?;
        if state != LifecycleState::Foreground {
            warn!("System UI does not support {:?} transitions", state);
            return Err(AbilityError::InvalidValue(format!(
                "system UI does not report {:?} transitions",
                state
            )));
        }
        let current = st.state_of(id).ok_or(AbilityError::RecordNotFound(id))?;
        if current != AbilityState::Foregrounding {
            error!("System UI record {} reported foreground while {}", id, current);
            return Err(AbilityError::invalid_state(
                id,
                AbilityState::Foregrounding.as_str(),
                current.as_str(),
            ));
        }
        drop(st);
        self.handler.cancel(&TimerKey::lifecycle(TimeoutKind::Foreground, id.0));
        self.handler.post(KernelTask::CompleteForeground(id));
        Ok(())
    }

    // ========================================================================
    // Death And Timeouts
    // ========================================================================

    /// The process hosting `token` died. The record stays and is reloaded
    /// after the restart delay.
    pub fn on_ability_died(&self, token: Token) -> AbilityResult<()> {
        self.locked(|st, outbox| {
            let id = st.arena.by_token(token).ok_or(AbilityError::UnknownToken(token))?;
            let Some(record) = st.arena.get_mut(id) else {
                return Err(AbilityError::RecordNotFound(id));
            };
            record.on_scheduler_died();
            record.set_state(AbilityState::Initial);
            outbox.event(record.event(EventKind::Died));
            let flag = flag_of(record.info());
            info!("System UI {} died, restarting it later", flag);
            for kind in [TimeoutKind::Load, TimeoutKind::Foreground] {
                self.handler.cancel(&TimerKey::lifecycle(kind, id.0));
            }
            self.schedule_restart(flag);
            Ok(())
        })
    }

    fn schedule_restart(&self, flag: String) {
        self.handler.post_delayed(
            TimerKey::SystemUiRestart(flag.clone()),
            KernelTask::Restart(flag),
            self.config.timeouts.system_ui_restart_delay,
        );
    }

    fn restart(&self, st: &mut KernelState, flag: &str, outbox: &mut Outbox) {
        if let Some(id) = st.by_flag(flag) {
            if st.state_of(id) != Some(AbilityState::Initial) {
                debug!("System UI {} is running again, skipping restart", flag);
                return;
            }
        }
        let Some(request) = st.requests.get(flag).cloned() else {
            warn!("No start request known for system UI {}", flag);
            return;
        };
        info!("Restarting system UI {}", flag);
        match self.start_or_wait(st, request, outbox) {
            Ok(outcome) => debug!("Restart of {} {:?}", flag, outcome),
            Err(e) => error!("Restart of system UI {} failed: {}", flag, e),
        }
    }

    /// A stalled load or foreground drops the record, kills its bundle and
    /// starts it again after the restart delay
    fn handle_timeout(&self, st: &mut KernelState, task: KernelTask, outbox: &mut Outbox) {
        let (id, event, timeout) = match task {
            KernelTask::LoadTimeout { record, event } => (record, event, TimeoutKind::Load),
            KernelTask::ForegroundTimeout { record, event } => (record, event, TimeoutKind::Foreground),
            _ => return,
        };
        let Some(record) = st.arena.get(id) else {
            return;
        };
        let stale = match timeout {
            TimeoutKind::Load => record.is_ready(),
            _ => record.state() != AbilityState::Foregrounding,
        };
        if record.event_id() != event || stale {
            debug!("Stale {} for system UI record {}", timeout, id);
            return;
        }
        warn!("{} of system UI {} ({}) timed out", timeout, record.uri(), id);
        outbox.event(record.event(EventKind::TimedOut { timeout }));
        let bundle = record.info().bundle_name.clone();
        let flag = flag_of(record.info());
        if let Some(removed) = st.remove(id) {
            outbox.event(removed.event(EventKind::Terminated));
        }
        outbox.app(AppCall::KillProcess { bundle });
        self.schedule_restart(flag);
    }

    // ========================================================================
    // Queries
    // ========================================================================

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

    pub fn top_ability(&self) -> Option<RecordSnapshot> {
        let st = self.state.lock();
        st.top().and_then(|id| st.arena.get(id)).map(|r| r.snapshot())
    }

    pub fn waiting_count(&self) -> usize {
        self.state.lock().waiting.len()
    }

    pub fn record_count(&self) -> usize {
        self.state.lock().arena.len()
    }

    /// Newest first
    pub fn running_infos(&self) -> Vec<RecordSnapshot> {
        let st = self.state.lock();
        st.abilities
            .iter()
            .filter_map(|id| st.arena.get(*id))
            .map(|r| r.snapshot())
            .collect()
    }

    pub fn dump(&self) -> Vec<String> {
        let st = self.state.lock();
        let mut lines = vec!["SystemUIRecords:".to_string()];
        for record in st.abilities.iter().filter_map(|id| st.arena.get(*id)) {
            lines.extend(record.dump());
        }
        lines
    }
}

impl TaskDriver for KernelAbilityManager {
    type Task = KernelTask;

    fn handler(&self) -> &TaskHandler<KernelTask> {
        &self.handler
    }

    fn run_task(&self, task: KernelTask) {
        debug!("User {} kernel task {}", self.user, task.name());
        self.locked(|st, outbox| match task {
            KernelTask::CompleteForeground(id) => self.complete_foreground(st, id, outbox),
            KernelTask::DequeueWaiting => self.dequeue_waiting(st, outbox),
            KernelTask::Restart(flag) => self.restart(st, &flag, outbox),
            timeout => self.handle_timeout(st, timeout, outbox),
        })
    }
}

impl std::fmt::Debug for KernelAbilityManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KernelAbilityManager")
            .field("user", &self.user)
            .field("pending_tasks", &self.handler.len())
            .finish()
    }
}
