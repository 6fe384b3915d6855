/*!
 * Mission List Manager
 * Foreground ordering of page components for one user
 *
 * Lists are ordered most-recent first and the front list's top mission is
 * the top ability. Only one page may be moving to the foreground at a time;
 * start requests arriving meanwhile wait in a FIFO queue that is drained one
 * request per completed foreground.
 */

use super::mission::{mission_name, ListId, ListKind, Mission, MissionList};
use super::task::MissionTask;
use crate::config::KernelConfig;
use crate::core::errors::{codes, AbilityError, AbilityResult, StartOutcome};
use crate::core::id::{IdAllocator, MissionId, RecordId, Token, UserId};
use crate::core::types::{ComponentKind, ComponentRequest, LaunchMode, Want};
use crate::events::{EventKind, ManagerKind};
use crate::handler::{Clock, TaskDriver, TaskHandler, TimeoutKind, TimerKey};
use crate::host::{
    AbilityScheduler, AppCall, BundleResolver, Dispatcher, InnerMissionInfo, MissionInfoStore, MissionListener,
    MissionNotice, Outbox, WindowCall, MISSION_NOT_RUNNING,
};
use crate::record::{AbilityState, ComponentRecord, LifecycleState, RecordArena, RecordSnapshot};
use ahash::HashMap;
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use time::OffsetDateTime;

// ============================================================================
// List State
// ============================================================================

struct MissionState {
    arena: RecordArena,
    missions: HashMap<MissionId, Mission>,
    lists: HashMap<ListId, MissionList>,
    /// Lists in use, most recent first
    current: VecDeque<ListId>,
    launcher: ListId,
    default_standard: ListId,
    default_single: ListId,
    terminating: Vec<RecordId>,
    waiting: VecDeque<ComponentRequest>,
    listeners: Vec<(u64, Arc<dyn MissionListener>)>,
    next_list: u64,
    next_listener: u64,
}

impl MissionState {
    fn new() -> Self {
        let launcher = ListId(1);
        let default_standard = ListId(2);
        let default_single = ListId(3);
        let mut lists = HashMap::default();
        lists.insert(launcher, MissionList::new(launcher, ListKind::Launcher));
        lists.insert(default_standard, MissionList::new(default_standard, ListKind::DefaultStandard));
        lists.insert(default_single, MissionList::new(default_single, ListKind::DefaultSingle));
        Self {
            arena: RecordArena::new(),
            missions: HashMap::default(),
            lists,
            current: VecDeque::from([launcher]),
            launcher,
            default_standard,
            default_single,
            terminating: Vec::new(),
            waiting: VecDeque::new(),
            listeners: Vec::new(),
            next_list: 4,
            next_listener: 1,
        }
    }

    fn new_list(&mut self) -> ListId {
        let id = ListId(self.next_list);
        self.next_list += 1;
        self.lists.insert(id, MissionList::new(id, ListKind::Current));
        id
    }

    #[inline]
    fn kind(&self, list: ListId) -> Option<ListKind> {
        self.lists.get(&list).map(|l| l.kind())
    }

    fn is_default(&self, list: ListId) -> bool {
        self.kind(list).is_some_and(|k| k.is_default())
    }

    fn list_is_empty(&self, list: ListId) -> bool {
        self.lists.get(&list).map_or(true, |l| l.is_empty())
    }

    fn mission_record(&self, mission: MissionId) -> Option<RecordId> {
        self.missions.get(&mission).and_then(|m| m.record)
    }

    fn mission_list(&self, mission: MissionId) -> Option<ListId> {
        self.missions.get(&mission).and_then(|m| m.list)
    }

    fn list_top_record(&self, list: ListId) -> Option<RecordId> {
        self.lists
            .get(&list)
            .and_then(|l| l.top())
            .and_then(|m| self.mission_record(m))
    }

    /// Top record of the most recent list
    fn top_ability(&self) -> Option<RecordId> {
        self.current.front().and_then(|l| self.list_top_record(*l))
    }

    fn state_of(&self, record: RecordId) -> Option<AbilityState> {
        self.arena.get(record).map(|r| r.state())
    }

    fn is_foreground_like(&self, record: RecordId) -> bool {
        self.state_of(record).is_some_and(|s| s.is_foreground_like())
    }

    fn launcher_root(&self) -> Option<RecordId> {
        let list = self.lists.get(&self.launcher)?;
        list.missions()
            .filter_map(|m| self.mission_record(m))
            .find(|r| self.arena.get(*r).is_some_and(|r| r.is_launcher_root()))
    }

    /// Put `mission` on top of `list`, leaving any previous list
    fn add_mission_to_list(&mut self, list: ListId, mission: MissionId) {
        if let Some(previous) = self.mission_list(mission).filter(|l| *l != list) {
            if let Some(l) = self.lists.get_mut(&previous) {
                l.remove(mission);
            }
        }
        if let Some(l) = self.lists.get_mut(&list) {
            l.add_to_top(mission);
        }
        if let Some(m) = self.missions.get_mut(&mission) {
            m.list = Some(list);
        }
    }

    /// Detach `mission` from its list. Returns the list it was in.
    fn remove_mission_from_list(&mut self, mission: MissionId) -> Option<ListId> {
        let list = self.mission_list(mission)?;
        if let Some(l) = self.lists.get_mut(&list) {
            l.remove(mission);
        }
        if let Some(m) = self.missions.get_mut(&mission) {
            m.list = None;
        }
        Some(list)
    }

    fn move_list_to_top(&mut self, list: ListId) {
        if self.current.front() == Some(&list) {
            return;
        }
        self.current.retain(|l| *l != list);
        self.current.push_front(list);
    }

    /// Drop a list from the current order. Task lists are discarded.
    fn remove_list(&mut self, list: ListId) {
        self.current.retain(|l| *l != list);
        if self.kind(list) == Some(ListKind::Current) {
            self.lists.remove(&list);
        }
    }

    /// Live singleton mission that a request for `request` reuses
    fn reused_mission(&self, request: &ComponentRequest) -> Option<MissionId> {
        if request.info.launch_mode != LaunchMode::Singleton {
            return None;
        }
        let name = mission_name(&request.info.bundle_name, &request.info.name, true);
        let find = |list: ListId| {
            self.lists.get(&list).and_then(|l| {
                l.missions().find(|m| {
                    self.missions
                        .get(m)
                        .is_some_and(|mission| mission.singleton && mission.name == name)
                })
            })
        };
        if request.app.is_launcher_app {
            if let Some(m) = find(self.launcher) {
                return Some(m);
            }
        }
        self.current
            .iter()
            .find_map(|l| find(*l))
            .or_else(|| find(self.default_single))
    }

    fn notify(&self, outbox: &mut Outbox, notice: MissionNotice) {
        for (_, listener) in &self.listeners {
            outbox.mission(Arc::clone(listener), notice);
        }
    }
}

// ============================================================================
// Mission List Manager
// ============================================================================

pub struct MissionListManager {
    user: UserId,
    config: Arc<KernelConfig>,
    ids: IdAllocator,
    dispatcher: Dispatcher,
    handler: TaskHandler<MissionTask>,
    store: Arc<dyn MissionInfoStore>,
    resolver: Arc<dyn BundleResolver>,
    state: Mutex<MissionState>,
}

impl MissionListManager {
    pub fn new(
        user: UserId,
        config: Arc<KernelConfig>,
        ids: IdAllocator,
        dispatcher: Dispatcher,
        clock: Arc<dyn Clock>,
        store: Arc<dyn MissionInfoStore>,
        resolver: Arc<dyn BundleResolver>,
    ) -> Self {
        info!("Creating mission list manager for user {}", user);
        Self {
            user,
            config,
            ids,
            dispatcher,
            handler: TaskHandler::new(clock),
            store,
            resolver,
            state: Mutex::new(MissionState::new()),
        }
    }

    #[inline]
    pub fn user(&self) -> UserId {
        self.user
    }

    fn locked<R>(&self, f: impl FnOnce(&mut MissionState, &mut Outbox) -> R) -> R {
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

    /// Persistence is best effort; a failing store never blocks a transition
    fn touch_info(&self, mission: MissionId, f: &mut dyn FnMut(&mut InnerMissionInfo)) {
        if let Err(e) = self.store.update(mission, f) {
            warn!("Updating mission info {} failed: {}", mission, e);
        }
    }

    // ========================================================================
    // Start
    // ========================================================================

    /// Start a page. Waits while the top or the caller is not foreground.
    pub fn start_ability(&self, request: ComponentRequest) -> AbilityResult<StartOutcome> {
        self.locked(|st, outbox| {
            if let Some(top) = st.top_ability().and_then(|id| st.arena.get(id)) {
                if top.state() != AbilityState::Foreground {
                    info!("Top {} is {}, start of {} waits", top.uri(), top.state(), request.uri());
                    st.waiting.push_back(request);
                    return Ok(StartOutcome::Waiting);
                }
            }
            let caller = request.caller.and_then(|t| st.arena.by_token(t));
            if let Some(c) = caller.and_then(|id| st.arena.get(id)) {
                if c.state() != AbilityState::Foreground {
                    info!("Caller {} is {}, start of {} waits", c.uri(), c.state(), request.uri());
                    st.waiting.push_back(request);
                    return Ok(StartOutcome::Waiting);
                }
            }
            self.start_locked(st, request, caller, outbox)?;
            Ok(StartOutcome::Started)
        })
    }

    fn start_locked(
        &self,
        st: &mut MissionState,
        request: ComponentRequest,
        caller: Option<RecordId>,
        outbox: &mut Outbox,
    ) -> AbilityResult<()> {
        let top = st.top_ability();
        let target_list = self.target_list(st, &request, caller);
        let (mission, id) = match self.target_mission_and_record(st, &request, outbox) {
            Ok(pair) => pair,
            Err(e) => {
                if st.list_is_empty(target_list) && !st.current.contains(&target_list) {
                    st.remove_list(target_list);
                }
                return Err(e);
            }
        };
        let Some(record) = st.arena.get_mut(id) else {
            return Err(AbilityError::RecordNotFound(id));
        };
        record.add_caller(request.caller, request.request_code);
        let state = record.state();

        let from_launcher = caller
            .and_then(|c| st.arena.get(c))
            .is_some_and(|c| c.app().is_launcher_app);
        self.move_mission_to_target_list(st, from_launcher, target_list, mission);
        st.move_list_to_top(target_list);

        if state.is_foreground_like() {
            debug!("{} is already {}, checking the waiting queue", id, state);
            self.handler.post(MissionTask::StartWaiting);
            return Ok(());
        }
        if top.is_none() {
            let max = self.config.launcher_restart_max;
            let now = self.now_ms();
            if let Some(record) = st.arena.get_mut(id) {
                info!("First page {} becomes the launcher root", record.uri());
                record.set_launcher_root();
                record.set_restart_budget(max, max, now);
            }
            return self.load(st, id, outbox);
        }
        self.process_foreground(st, id, outbox)
    }

    fn target_list(&self, st: &mut MissionState, request: &ComponentRequest, caller: Option<RecordId>) -> ListId {
        if request.app.is_launcher_app {
            return st.launcher;
        }
        let Some(caller) = caller.and_then(|c| st.arena.get(c)) else {
            return st.new_list();
        };

        if caller.app().is_launcher_app {
            let reused = st
                .reused_mission(request)
                .and_then(|m| st.mission_list(m))
                .filter(|l| !st.is_default(*l));
            return match reused {
                Some(list) => list,
                None => st.new_list(),
            };
        }

        let caller_mission = caller.mission();
        let Some((mission, list)) = caller_mission.and_then(|m| st.mission_list(m).map(|l| (m, l))) else {
            warn!("Caller {} has no mission list, starting a new one", caller.id());
            return st.new_list();
        };
        if !st.is_default(list) {
            return list;
        }
        // caller parked in a default list moves into a fresh list with its target
        let target = st.new_list();
        st.add_mission_to_list(target, mission);
        target
    }

    fn target_mission_and_record(
        &self,
        st: &mut MissionState,
        request: &ComponentRequest,
        outbox: &mut Outbox,
    ) -> AbilityResult<(MissionId, RecordId)> {
        if let Some(mission) = st.reused_mission(request) {
            if let Some(id) = st.mission_record(mission) {
                if let Some(record) = st.arena.get_mut(id) {
                    debug!("Reusing singleton mission {} for {}", mission, request.uri());
                    record.set_want(request.want.clone());
                    return Ok((mission, id));
                }
            }
        }

        let singleton = request.info.launch_mode == LaunchMode::Singleton;
        let name = mission_name(&request.info.bundle_name, &request.info.name, singleton);
        let launcher_app = request.app.is_launcher_app;
        let reused_info = if singleton && !launcher_app {
            self.find_reused_singleton_info(st, &name)
        } else {
            None
        };
        let reused = reused_info.is_some();
        let mission = reused_info
            .as_ref()
            .map(|info| info.mission_id)
            .unwrap_or_else(|| self.ids.next_mission());

        let id = self.ids.next_record();
        let mut record = ComponentRecord::from_request(id, self.user, request);
        record.set_mission(Some(mission));
        outbox.event(record.event(EventKind::Created {
            owner: ManagerKind::Mission,
        }));
        outbox.event(record.event(EventKind::MissionChanged { mission }));
        st.arena.insert(record);
        st.missions.insert(mission, Mission::new(mission, id, name.clone(), singleton));
        info!("Created page record {} in mission {} for {}", id, mission, request.uri());

        if launcher_app {
            return Ok((mission, id));
        }
        let mut info = reused_info.unwrap_or_else(|| {
            let mut info = InnerMissionInfo::new(mission, name, request.want.clone());
            info.label = request.info.label.clone();
            info
        });
        info.running_state = 0;
        info.time = OffsetDateTime::now_utc();
        info.want = request.want.clone();
        if let Err(e) = self.store.put(&info) {
            warn!("Storing mission info {} failed: {}", mission, e);
        }
        if !reused {
            st.notify(outbox, MissionNotice::Created(mission));
        }
        Ok((mission, id))
    }

    /// Stored singleton mission with `name` whose page is gone
    fn find_reused_singleton_info(&self, st: &MissionState, name: &str) -> Option<InnerMissionInfo> {
        match self.store.list() {
            Ok(infos) => infos.into_iter().find(|info| {
                info.name == name
                    && info.running_state == MISSION_NOT_RUNNING
                    && info.mission_id.0 > 0
                    && !st.missions.contains_key(&info.mission_id)
            }),
            Err(e) => {
                warn!("Listing mission infos failed: {}", e);
                None
            }
        }
    }

    fn move_mission_to_target_list(
        &self,
        st: &mut MissionState,
        from_launcher: bool,
        target: ListId,
        mission: MissionId,
    ) {
        let Some(current) = st.mission_list(mission) else {
            st.add_mission_to_list(target, mission);
            return;
        };
        if from_launcher && target == st.launcher {
            st.add_mission_to_list(target, mission);
            return;
        }
        if st.is_default(current) {
            st.add_mission_to_list(target, mission);
            return;
        }

        if target != current {
            self.move_none_top_to_default(st, mission);
            st.remove_mission_from_list(mission);
        } else if from_launcher {
            self.move_none_top_to_default(st, mission);
        }
        st.add_mission_to_list(target, mission);
        if target != current && st.list_is_empty(current) {
            st.remove_list(current);
        }
    }

    /// Park every mission above `mission` in the matching default list
    fn move_none_top_to_default(&self, st: &mut MissionState, mission: MissionId) {
        let Some(list) = st.mission_list(mission) else {
            return;
        };
        while let Some(top) = st.lists.get(&list).and_then(|l| l.top()) {
            if top == mission {
                break;
            }
            let singleton = st.missions.get(&top).is_some_and(|m| m.singleton);
            let parking = if singleton {
                st.default_single
            } else {
                st.default_standard
            };
            debug!("Parking mission {} in {:?}", top, st.kind(parking));
            st.add_mission_to_list(parking, top);
        }
    }

    // ========================================================================
    // Foreground
    // ========================================================================

    fn process_foreground(&self, st: &mut MissionState, id: RecordId, outbox: &mut Outbox) -> AbilityResult<()> {
        let Some(record) = st.arena.get(id) else {
            return Err(AbilityError::RecordNotFound(id));
        };
        if !record.is_ready() {
            return self.load(st, id, outbox);
        }
        if record.state() == AbilityState::Background {
            debug!("Asking the app manager to foreground {}", record.uri());
            outbox.app(AppCall::MoveToForeground { token: record.token() });
        } else {
            self.foreground(st, id, outbox);
        }
        Ok(())
    }

    fn load(&self, st: &mut MissionState, id: RecordId, outbox: &mut Outbox) -> AbilityResult<()> {
        let Some(record) = st.arena.get_mut(id) else {
            return Err(AbilityError::RecordNotFound(id));
        };
        let pre_token = record.last_caller();
        let key = record.load(&self.ids, pre_token, outbox)?;
        outbox.window(WindowCall::StartingWindow {
            token: record.token(),
            element: record.element(),
        });
        let event = record.event_id();
        self.handler
            .post_delayed(key, MissionTask::LoadTimeout { record: id, event }, self.config.timeouts.load());
        Ok(())
    }

    fn foreground(&self, st: &mut MissionState, id: RecordId, outbox: &mut Outbox) {
        let Some(record) = st.arena.get_mut(id) else {
            return;
        };
        let key = record.foreground(&self.ids, outbox);
        let event = record.event_id();
        self.handler.post_delayed(
            key,
            MissionTask::ForegroundTimeout { record: id, event },
            self.config.timeouts.foreground,
        );
        if record.is_new_want() {
            outbox.app(AppCall::AbilityBehaviorAnalysis {
                token: record.token(),
                pre_token: record.last_caller(),
            });
        }
    }

    fn move_to_background(&self, st: &mut MissionState, id: RecordId, outbox: &mut Outbox) {
        let Some(record) = st.arena.get_mut(id) else {
            return;
        };
        info!("Moving {} to the background", record.uri());
        let key = record.background(&self.ids, outbox);
        let event = record.event_id();
        self.handler.post_delayed(
            key,
            MissionTask::BackgroundTimeout { record: id, event },
            self.config.timeouts.background,
        );
    }

    /// Move a foreground page to the background
    pub fn minimize_ability(&self, token: Token) -> AbilityResult<()> {
        self.locked(|st, outbox| {
            let id = st.arena.by_token(token).ok_or(AbilityError::UnknownToken(token))?;
            if !st.is_foreground_like(id) {
                warn!("Record {} is not foreground, nothing to minimize", id);
                return Ok(());
            }
            self.move_to_background(st, id, outbox);
            if let Some(mission) = st.arena.get(id).and_then(|r| r.mission()) {
                self.touch_info(mission, &mut |info| info.time = OffsetDateTime::now_utc());
            }
            Ok(())
        })
    }

    fn complete_foreground(&self, st: &mut MissionState, id: RecordId, outbox: &mut Outbox) {
        let Some(record) = st.arena.get_mut(id) else {
            return;
        };
        if record.state() != AbilityState::Foregrounding {
            warn!("Record {} is {}, cannot complete foreground", id, record.state());
            return;
        }
        record.set_state(AbilityState::Foreground);
        outbox.event(record.event(EventKind::Foregrounded));
        outbox.window(WindowCall::Transition {
            from: record.last_caller(),
            to: record.token(),
        });
        info!("{} is foreground", record.uri());

        let moved = record
            .mission()
            .and_then(|m| st.missions.get_mut(&m))
            .filter(|m| m.moving)
            .map(|m| {
                m.moving = false;
                m.id
            });
        if let Some(mission) = moved {
            st.notify(outbox, MissionNotice::MovedToFront(mission));
        }
        self.handler.post_delayed(
            TimerKey::StartWaiting,
            MissionTask::StartWaiting,
            self.config.timeouts.start_waiting_delay,
        );
    }

    fn complete_background(&self, st: &mut MissionState, id: RecordId, outbox: &mut Outbox) {
        let Some(record) = st.arena.get_mut(id) else {
            return;
        };
        if record.state() != AbilityState::Backgrounding {
            warn!("Record {} is {}, cannot complete background", id, record.state());
            return;
        }
        record.set_state(AbilityState::Background);
        outbox.event(record.event(EventKind::Backgrounded));
        outbox.app(AppCall::MoveToBackground { token: record.token() });

        let ready: Vec<_> = st
            .terminating
            .iter()
            .copied()
            .filter(|t| st.state_of(*t) == Some(AbilityState::Background))
            .collect();
        for terminating in ready {
            self.terminate_record(st, terminating, outbox);
        }
    }

    /// One waiting request runs once the top is foreground
    fn start_waiting(&self, st: &mut MissionState, outbox: &mut Outbox) {
        let Some(top) = st.top_ability() else {
            return;
        };
        if st.state_of(top) != Some(AbilityState::Foreground) {
            debug!("Top {} is not foreground yet, waiting queue stays", top);
            return;
        }
        let Some(request) = st.waiting.pop_front() else {
            return;
        };
        let caller = request.caller.and_then(|t| st.arena.by_token(t));
        let uri = request.uri();
        if let Err(e) = self.start_locked(st, request, caller, outbox) {
            warn!("Waiting start of {} failed: {}", uri, e);
        }
    }

    // ========================================================================
    // Callbacks From The Hosted Process
    // ========================================================================

    /// The process of a loading page attached
    pub fn attach_ability_thread(&self, scheduler: Arc<dyn AbilityScheduler>, token: Token) -> AbilityResult<()> {
        self.locked(|st, outbox| {
            let id = st.arena.by_token(token).ok_or(AbilityError::UnknownToken(token))?;
            self.handler
                .cancel(&TimerKey::lifecycle(TimeoutKind::Load, id.0));
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

    /// The app manager finished moving the process of `token`
    pub fn on_ability_request_done(&self, token: Token, state: LifecycleState) -> AbilityResult<()> {
        if state != LifecycleState::Foreground {
            return Ok(());
        }
        self.locked(|st, outbox| {
            let id = st.arena.by_token(token).ok_or(AbilityError::UnknownToken(token))?;
            if st.is_foreground_like(id) {
                debug!("Record {} is already moving to the foreground", id);
                return Ok(());
            }
            self.foreground(st, id, outbox);
            Ok(())
        })
    }

    /// A lifecycle transition finished inside the hosted process
    pub fn transition_done(&self, token: Token, state: LifecycleState) -> AbilityResult<()> {
        let mut st = self.state.lock();
        let id = st
            .terminating
            .iter()
            .copied()
            .find(|id| st.arena.get(*id).is_some_and(|r| r.token() == token))
            .or_else(|| st.arena.by_token(token))
            .ok_or(AbilityError::UnknownToken(token))?;
        let Some(record) = st.arena.get_mut(id) else {
            return Err(AbilityError::RecordNotFound(id));
        };
        let (expected, kind, task) = match state {
            LifecycleState::Foreground => (
                AbilityState::Foregrounding,
                TimeoutKind::Foreground,
                MissionTask::CompleteForeground(id),
            ),
            LifecycleState::Background => (
                AbilityState::Backgrounding,
                TimeoutKind::Background,
                MissionTask::CompleteBackground(id),
            ),
            LifecycleState::Initial => (
                AbilityState::Terminating,
                TimeoutKind::Terminate,
                MissionTask::CompleteTerminate(id),
            ),
            other => {
                warn!("Pages do not report {:?} transitions", other);
                return Err(AbilityError::InvalidValue(format!(
                    "pages do not report {:?} transitions",
                    other
                )));
            }
        };
        if record.state() != expected {
            error!("Record {} reported {:?} while {}", id, state, record.state());
            return Err(AbilityError::invalid_state(id, expected.as_str(), record.state().as_str()));
        }
        drop(st);
        self.handler.cancel(&TimerKey::lifecycle(kind, id.0));
        self.handler.post(task);
        Ok(())
    }

    // ========================================================================
    // Termination
    // ========================================================================

    /// Finish a page, delivering `result` to its latest caller
    pub fn terminate_ability(&self, token: Token, result_code: i32, result: Option<Want>) -> AbilityResult<()> {
        self.locked(|st, outbox| {
            let id = st.arena.by_token(token).ok_or(AbilityError::UnknownToken(token))?;
            let Some(record) = st.arena.get_mut(id) else {
                return Err(AbilityError::RecordNotFound(id));
            };
            if record.is_launcher_root() {
                return Err(AbilityError::TerminateLauncherDenied);
            }
            if record.is_terminating() {
                info!("Record {} is already terminating", id);
                return Ok(());
            }
            record.set_terminating();
            if let Some(want) = result {
                record.save_result_to_callers(result_code, &want);
            }
            self.terminate_locked(st, id, outbox)
        })
    }

    /// Finish the page `caller` started with `request_code`
    pub fn terminate_ability_by_caller(&self, caller: Token, request_code: i32) -> AbilityResult<()> {
        let target = {
            let st = self.state.lock();
            let found = st
                .arena
                .records()
                .find(|r| {
                    r.callers()
                        .iter()
                        .any(|c| c.caller == Some(caller) && c.request_code == request_code)
                })
                .map(|r| r.token());
            found
        };
        let token = target.ok_or_else(|| {
            AbilityError::InvalidValue(format!("no page started by {} with code {}", caller, request_code))
        })?;
        self.terminate_ability(token, crate::core::limits::DEFAULT_INVALID_VALUE, None)
    }

    fn terminate_locked(&self, st: &mut MissionState, id: RecordId, outbox: &mut Outbox) -> AbilityResult<()> {
        self.remove_terminating_ability(st, id, outbox);
        let Some(record) = st.arena.get_mut(id) else {
            return Err(AbilityError::RecordNotFound(id));
        };
        record.send_result_to_callers(outbox);
        let state = record.state();
        let next = record.next();

        if state.is_foreground_like() {
            if let Some(next) = next.filter(|n| st.arena.contains(*n)) {
                debug!("Handing the foreground from {} to {}", id, next);
                self.process_foreground(st, next, outbox)?;
            }
            self.move_to_background(st, id, outbox);
            return Ok(());
        }
        match state {
            AbilityState::Background | AbilityState::Inactive => self.terminate_record(st, id, outbox),
            AbilityState::Initial => self.finish_terminate(st, id, outbox),
            // a pending background finishes the termination in complete_background
            _ => debug!("Record {} terminates after its {} transition", id, state),
        }
        Ok(())
    }

    /// Take the record out of its list and pick the page that takes over
    fn remove_terminating_ability(&self, st: &mut MissionState, id: RecordId, outbox: &mut Outbox) {
        let Some(record) = st.arena.get(id) else {
            return;
        };
        let token = record.token();
        let list = record.mission().and_then(|m| st.remove_mission_from_list(m));
        outbox.app(AppCall::PrepareTerminate { token });
        if !st.terminating.contains(&id) {
            st.terminating.push(id);
        }
        let list_empty = list.map_or(true, |l| st.list_is_empty(l));
        if let Some(l) = list.filter(|_| list_empty) {
            debug!("List {} is empty, removing it", l);
            st.remove_list(l);
        }

        if let Some(record) = st.arena.get_mut(id) {
            record.set_next(None);
        }
        if !st.is_foreground_like(id) {
            return;
        }
        if st.launcher_root().is_some_and(|root| st.is_foreground_like(root)) {
            return;
        }
        let next = match list {
            Some(l) if !list_empty => st.list_top_record(l),
            _ => st.top_ability(),
        };
        if let Some(record) = st.arena.get_mut(id) {
            record.set_next(next);
        }
    }

    fn terminate_record(&self, st: &mut MissionState, id: RecordId, outbox: &mut Outbox) {
        let Some(record) = st.arena.get_mut(id) else {
            return;
        };
        let key = record.terminate(&self.ids, outbox);
        let event = record.event_id();
        self.handler.post_delayed(
            key,
            MissionTask::TerminateTimeout { record: id, event },
            self.config.timeouts.terminate,
        );
    }

    fn complete_terminate(&self, st: &mut MissionState, id: RecordId, outbox: &mut Outbox) {
        match st.state_of(id) {
            Some(AbilityState::Terminating) => self.finish_terminate(st, id, outbox),
            Some(state) => warn!("Record {} is {}, cannot complete terminate", id, state),
            None => debug!("Terminated record {} is already gone", id),
        }
    }

    fn finish_terminate(&self, st: &mut MissionState, id: RecordId, outbox: &mut Outbox) {
        if let Some(record) = st.arena.get(id) {
            outbox.app(AppCall::TerminateAbility { token: record.token() });
        }
        self.drop_record(st, id, outbox);
    }

    /// Forget a record and its in-memory mission. The stored mission stays.
    fn drop_record(&self, st: &mut MissionState, id: RecordId, outbox: &mut Outbox) {
        st.terminating.retain(|t| *t != id);
        let Some(record) = st.arena.remove(id) else {
            return;
        };
        if let Some(mission) = record.mission() {
            if st.mission_record(mission) == Some(id) {
                st.remove_mission_from_list(mission);
                st.missions.remove(&mission);
            }
            self.touch_info(mission, &mut |info| {
                info.running_state = MISSION_NOT_RUNNING;
                info.time = OffsetDateTime::now_utc();
            });
        }
        info!("Removed page record {} ({})", id, record.uri());
        outbox.event(record.event(EventKind::Terminated));
    }

    // ========================================================================
    // Missions
    // ========================================================================

    /// Bring a mission to the front, restoring it from the store if needed
    pub fn move_mission_to_front(&self, mission: MissionId) -> AbilityResult<()> {
        self.locked(|st, outbox| {
            let list = self.target_list_for_mission(st, mission, outbox)?;
            self.move_mission_to_target_list(st, true, list, mission);
            st.move_list_to_top(list);
            self.touch_info(mission, &mut |info| info.time = OffsetDateTime::now_utc());

            let record = st.mission_record(mission).ok_or(AbilityError::MoveMissionFailed(mission))?;
            self.process_foreground(st, record, outbox)?;
            if let Some(m) = st.missions.get_mut(&mission) {
                m.moving = true;
            }
            Ok(())
        })
    }

    fn target_list_for_mission(
        &self,
        st: &mut MissionState,
        mission: MissionId,
        outbox: &mut Outbox,
    ) -> AbilityResult<ListId> {
        if st.missions.contains_key(&mission) {
            let list = st.mission_list(mission).ok_or(AbilityError::MoveMissionFailed(mission))?;
            return match st.kind(list) {
                Some(ListKind::Current) => Ok(list),
                Some(ListKind::DefaultStandard) | Some(ListKind::DefaultSingle) => Ok(st.new_list()),
                Some(ListKind::Launcher) | None => {
                    error!("Mission {} lives in the launcher list", mission);
                    Err(AbilityError::MoveMissionFailed(mission))
                }
            };
        }

        info!("Mission {} is not running, restoring it from the store", mission);
        let info = self.store.get(mission)?.ok_or(AbilityError::MissionNotFound(mission))?;
        let resolved = self.resolver.resolve(&info.want, self.user)?;
        let singleton = resolved.info.launch_mode == LaunchMode::Singleton;
        let request = ComponentRequest::new(info.want.clone(), resolved.info, resolved.app);

        let id = self.ids.next_record();
        let mut record = ComponentRecord::from_request(id, self.user, &request);
        record.set_mission(Some(mission));
        record.set_locked(info.locked);
        outbox.event(record.event(EventKind::Created {
            owner: ManagerKind::Mission,
        }));
        st.arena.insert(record);
        let mut restored = Mission::new(mission, id, info.name.clone(), singleton);
        restored.locked = info.locked;
        st.missions.insert(mission, restored);
        self.touch_info(mission, &mut |info| info.running_state = 0);
        st.notify(outbox, MissionNotice::Created(mission));
        Ok(st.new_list())
    }

    /// Remove a mission and terminate its page
    pub fn clear_mission(&self, mission: MissionId) -> AbilityResult<()> {
        if mission.0 < 0 {
            return Err(AbilityError::InvalidValue(format!("invalid mission id {}", mission)));
        }
        self.locked(|st, outbox| {
            if let Some(m) = st.missions.get(&mission) {
                if m.locked {
                    return Err(AbilityError::MissionLocked(mission));
                }
                let root = m
                    .record
                    .and_then(|r| st.arena.get(r))
                    .is_some_and(|r| r.is_launcher_root());
                if root {
                    return Err(AbilityError::TerminateLauncherDenied);
                }
            }
            self.clear_mission_locked(st, mission, true, outbox)
        })
    }

    fn clear_mission_locked(
        &self,
        st: &mut MissionState,
        mission: MissionId,
        delete_info: bool,
        outbox: &mut Outbox,
    ) -> AbilityResult<()> {
        if delete_info {
            if let Err(e) = self.store.delete(mission) {
                warn!("Deleting mission info {} failed: {}", mission, e);
            }
            st.notify(outbox, MissionNotice::Destroyed(mission));
        }
        let Some(id) = st.mission_record(mission) else {
            debug!("Mission {} has no page, nothing to terminate", mission);
            return Ok(());
        };
        let Some(record) = st.arena.get_mut(id) else {
            return Ok(());
        };
        if record.is_terminating() {
            return Ok(());
        }
        record.set_terminating();
        self.terminate_locked(st, id, outbox).map_err(|e| {
            error!("Clearing mission {} failed: {}", mission, e);
            e
        })
    }

    /// Clear every unlocked mission outside the launcher list
    pub fn clear_all_missions(&self) -> AbilityResult<()> {
        self.locked(|st, outbox| {
            for info in self.store.list()? {
                if !info.locked {
                    if let Err(e) = self.store.delete(info.mission_id) {
                        warn!("Deleting mission info {} failed: {}", info.mission_id, e);
                    }
                    st.notify(outbox, MissionNotice::Destroyed(info.mission_id));
                }
            }

            let unlocked = |st: &MissionState, list: ListId| -> Vec<MissionId> {
                st.lists
                    .get(&list)
                    .map(|l| {
                        l.missions()
                            .filter(|m| st.missions.get(m).is_some_and(|m| !m.locked && m.record.is_some()))
                            .collect()
                    })
                    .unwrap_or_default()
            };

            let mut background = unlocked(st, st.default_standard);
            background.extend(unlocked(st, st.default_single));
            let mut foreground = Vec::new();
            let lists: Vec<_> = st.current.iter().copied().filter(|l| *l != st.launcher).collect();
            for list in lists {
                for mission in unlocked(st, list) {
                    let active = st.mission_record(mission).is_some_and(|r| st.is_foreground_like(r));
                    if active {
                        foreground.push(mission);
                    } else {
                        background.push(mission);
                    }
                }
            }
            for mission in background.into_iter().chain(foreground) {
                self.clear_mission_locked(st, mission, false, outbox)?;
            }
            Ok(())
        })
    }

    pub fn set_mission_locked_state(&self, mission: MissionId, locked: bool) -> AbilityResult<()> {
        let mut st = self.state.lock();
        let Some(m) = st.missions.get_mut(&mission) else {
            return Err(AbilityError::MissionNotFound(mission));
        };
        m.locked = locked;
        let record = m.record;
        if let Some(record) = record.and_then(|r| st.arena.get_mut(r)) {
            record.set_locked(locked);
        }
        drop(st);
        self.touch_info(mission, &mut |info| {
            info.locked = locked;
            info.time = OffsetDateTime::now_utc();
        });
        Ok(())
    }

    /// Stored missions, most recently used first
    pub fn get_mission_infos(&self, max: i32) -> AbilityResult<Vec<InnerMissionInfo>> {
        if max < 0 {
            return Err(AbilityError::InvalidValue(format!("invalid mission count {}", max)));
        }
        let mut infos = self.store.list()?;
        infos.sort_by(|a, b| b.time.cmp(&a.time).then(b.mission_id.cmp(&a.mission_id)));
        infos.truncate(max as usize);
        Ok(infos)
    }

    pub fn get_mission_info(&self, mission: MissionId) -> AbilityResult<InnerMissionInfo> {
        self.store.get(mission)?.ok_or(AbilityError::MissionNotFound(mission))
    }

    pub fn set_mission_label(&self, token: Token, label: &str) -> AbilityResult<()> {
        self.locked(|st, outbox| {
            let id = st.arena.by_token(token).ok_or(AbilityError::UnknownToken(token))?;
            let mission = st
                .arena
                .get(id)
                .and_then(|r| r.mission())
                .ok_or(AbilityError::RecordNotFound(id))?;
            self.store.update(mission, &mut |info| info.label = label.to_string())?;
            st.notify(outbox, MissionNotice::LabelUpdated(mission));
            Ok(())
        })
    }

    /// Returns the handle to unregister with
    pub fn register_mission_listener(&self, listener: Arc<dyn MissionListener>) -> u64 {
        let mut st = self.state.lock();
        let handle = st.next_listener;
        st.next_listener += 1;
        st.listeners.push((handle, listener));
        handle
    }

    pub fn unregister_mission_listener(&self, handle: u64) -> bool {
        let mut st = self.state.lock();
        let before = st.listeners.len();
        st.listeners.retain(|(h, _)| *h != handle);
        before != st.listeners.len()
    }

    // ========================================================================
    // Death
    // ========================================================================

    /// The process hosting the page `token` died
    pub fn on_ability_died(&self, token: Token) -> AbilityResult<()> {
        self.locked(|st, outbox| {
            let id = st.arena.by_token(token).ok_or(AbilityError::UnknownToken(token))?;
            let Some(record) = st.arena.get_mut(id) else {
                return Err(AbilityError::RecordNotFound(id));
            };
            if record.info().kind != ComponentKind::Page {
                return Err(AbilityError::InvalidValue(format!("{} is not a page", record.uri())));
            }
            record.on_scheduler_died();
            if record.is_launcher_root() {
                record.set_restarting(true);
            }
            let want = record.want().clone();
            record.save_result_to_callers(codes::CANCELED, &want);
            record.send_result_to_callers(outbox);
            self.handler.post(MissionTask::AbilityDied(id));
            Ok(())
        })
    }

    fn handle_ability_died(&self, st: &mut MissionState, id: RecordId, outbox: &mut Outbox) {
        let Some(record) = st.arena.get(id) else {
            debug!("Died record {} is already gone", id);
            return;
        };
        outbox.event(record.event(EventKind::Died));
        let launcher_app = record.app().is_launcher_app;
        for kind in [
            TimeoutKind::Load,
            TimeoutKind::Foreground,
            TimeoutKind::Background,
            TimeoutKind::Terminate,
        ] {
            self.handler.cancel(&TimerKey::lifecycle(kind, id.0));
        }

        if st.terminating.contains(&id) {
            self.drop_record(st, id, outbox);
        } else if launcher_app {
            self.handle_launcher_died(st, id, outbox);
        } else {
            self.handle_died_by_default(st, id, outbox);
        }
    }

    fn handle_launcher_died(&self, st: &mut MissionState, id: RecordId, outbox: &mut Outbox) {
        let mission = st.arena.get(id).and_then(|r| r.mission());
        let in_launcher_list = mission.and_then(|m| st.mission_list(m)) == Some(st.launcher);
        if !in_launcher_list {
            error!("Launcher page {} is not in the launcher list", id);
            self.drop_record(st, id, outbox);
            return;
        }
        let was_foreground = st.is_foreground_like(id);
        let Some(record) = st.arena.get_mut(id) else {
            return;
        };
        if record.is_launcher_root() {
            info!("Launcher root {} died, resetting it for a restart", id);
            record.set_state(AbilityState::Initial);
        } else {
            self.drop_record(st, id, outbox);
        }
        if was_foreground {
            self.delayed_start_launcher();
        }
    }

    fn handle_died_by_default(&self, st: &mut MissionState, id: RecordId, outbox: &mut Outbox) {
        let launcher_active = st.launcher_root().is_some_and(|r| st.is_foreground_like(r));
        let was_foreground = st.is_foreground_like(id);
        let list = st
            .arena
            .get(id)
            .and_then(|r| r.mission())
            .and_then(|m| st.remove_mission_from_list(m));
        if let Some(list) = list {
            if st.kind(list) == Some(ListKind::Current) && st.list_is_empty(list) {
                st.remove_list(list);
            }
        }
        self.drop_record(st, id, outbox);
        if was_foreground && !launcher_active {
            info!("Foreground page {} died, returning to the launcher", id);
            self.delayed_start_launcher();
        }
    }

    fn delayed_start_launcher(&self) {
        self.handler.post_delayed(
            TimerKey::LauncherRestart,
            MissionTask::BackToLauncher,
            self.config.timeouts.launcher_restart_delay,
        );
    }

    fn back_to_launcher(&self, st: &mut MissionState, outbox: &mut Outbox) {
        if st.top_ability().is_some_and(|top| st.is_foreground_like(top)) {
            debug!("Top is foreground, no need to return to the launcher");
            return;
        }
        let Some(root) = st.launcher_root() else {
            warn!("No launcher root to return to");
            return;
        };
        if st.is_foreground_like(root) {
            return;
        }
        let Some(mission) = st.arena.get(root).and_then(|r| r.mission()) else {
            warn!("Launcher root {} has no mission", root);
            return;
        };
        if !st.waiting.is_empty() {
            info!("Dropping {} waiting starts on the way back to the launcher", st.waiting.len());
            st.waiting.clear();
        }
        let launcher = st.launcher;
        st.add_mission_to_list(launcher, mission);
        st.move_list_to_top(launcher);
        if let Err(e) = self.process_foreground(st, root, outbox) {
            error!("Returning to the launcher failed: {}", e);
        }
    }

    // ========================================================================
    // Timeouts
    // ========================================================================

    fn handle_timeout(&self, st: &mut MissionState, task: MissionTask, outbox: &mut Outbox) {
        match task {
            MissionTask::LoadTimeout { record, event } => {
                let Some(r) = st.arena.get_mut(record) else {
                    return;
                };
                if r.event_id() != event || r.is_ready() {
                    debug!("Stale load timeout for {}", record);
                    return;
                }
                warn!("Load of {} ({}) timed out", r.uri(), record);
                outbox.event(r.event(EventKind::TimedOut {
                    timeout: TimeoutKind::Load,
                }));
                outbox.app(AppCall::AttachTimeOut { token: r.token() });
                r.on_scheduler_died();
                if r.is_launcher_root() {
                    r.set_restarting(true);
                    self.handle_ability_died(st, record, outbox);
                    self.delayed_start_launcher();
                    return;
                }
                self.handle_ability_died(st, record, outbox);
                if !st.top_ability().is_some_and(|top| st.is_foreground_like(top)) {
                    self.delayed_start_launcher();
                }
            }
            MissionTask::ForegroundTimeout { record, event } => {
                let Some(r) = st.arena.get_mut(record) else {
                    return;
                };
                if r.event_id() != event || r.state() != AbilityState::Foregrounding {
                    debug!("Stale foreground timeout for {}", record);
                    return;
                }
                warn!("Foreground of {} ({}) timed out", r.uri(), record);
                outbox.event(r.event(EventKind::TimedOut {
                    timeout: TimeoutKind::Foreground,
                }));
                let root = r.is_launcher_root();
                let token = r.token();
                if root {
                    outbox.app(AppCall::AttachTimeOut { token });
                } else {
                    r.set_state(AbilityState::Background);
                    outbox.app(AppCall::MoveToBackground { token });
                }
                if let Some(m) = r.mission().and_then(|m| st.missions.get_mut(&m)) {
                    m.moving = false;
                }
                if !root && !st.top_ability().is_some_and(|top| st.is_foreground_like(top)) {
                    self.delayed_start_launcher();
                }
            }
            MissionTask::BackgroundTimeout { record, event } => {
                let pending = st
                    .arena
                    .get(record)
                    .is_some_and(|r| r.event_id() == event && r.state() == AbilityState::Backgrounding);
                if pending {
                    warn!("Background of {} timed out, completing it", record);
                    self.complete_background(st, record, outbox);
                } else {
                    debug!("Stale background timeout for {}", record);
                }
            }
            MissionTask::TerminateTimeout { record, event } => {
                let pending = st
                    .arena
                    .get(record)
                    .is_some_and(|r| r.event_id() == event && r.state() == AbilityState::Terminating);
                if pending {
                    warn!("Terminate of {} timed out, removing it", record);
                    self.complete_terminate(st, record, outbox);
                } else {
                    debug!("Stale terminate timeout for {}", record);
                }
            }
            other => debug!("Not a timeout task: {}", other.name()),
        }
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn mission_id_by_token(&self, token: Token) -> Option<MissionId> {
        let st = self.state.lock();
        st.arena
            .by_token(token)
            .and_then(|id| st.arena.get(id))
            .and_then(|r| r.mission())
    }

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
        st.top_ability().and_then(|id| st.arena.get(id)).map(|r| r.snapshot())
    }

    /// Start requests parked until the top is foreground
    pub fn waiting_count(&self) -> usize {
        self.state.lock().waiting.len()
    }

    pub fn record_count(&self) -> usize {
        self.state.lock().arena.len()
    }

    pub fn terminating_count(&self) -> usize {
        self.state.lock().terminating.len()
    }

    /// Mission ids of every current list, most recent list first
    pub fn current_lists(&self) -> Vec<(ListKind, Vec<MissionId>)> {
        let st = self.state.lock();
        st.current
            .iter()
            .filter_map(|l| st.lists.get(l))
            .map(|l| (l.kind(), l.missions().collect()))
            .collect()
    }

    pub fn running_infos(&self) -> Vec<RecordSnapshot> {
        let st = self.state.lock();
        let mut infos: Vec<_> = st.arena.records().map(|r| r.snapshot()).collect();
        infos.sort_by_key(|r| r.id);
        infos
    }

    fn dump_list(st: &MissionState, list: ListId, records: bool, lines: &mut Vec<String>) {
        let Some(l) = st.lists.get(&list) else {
            return;
        };
        lines.push(format!("  MissionList Type #{}  missions #{}", l.kind().as_str(), l.len()));
        for mission in l.missions() {
            let Some(m) = st.missions.get(&mission) else {
                continue;
            };
            lines.push(format!(
                "    Mission ID #{}  mission name #[{}]  lockedState #{}",
                m.id, m.name, m.locked
            ));
            if records {
                if let Some(record) = m.record.and_then(|r| st.arena.get(r)) {
                    lines.extend(record.dump());
                }
            }
        }
    }

    fn dump_with(&self, records: bool) -> Vec<String> {
        let st = self.state.lock();
        let mut lines = vec![format!("User ID #{}", self.user), " current mission lists:{".to_string()];
        for list in &st.current {
            Self::dump_list(&st, *list, records, &mut lines);
        }
        lines.push(" }".to_string());
        for (title, list) in [
            (" default stand mission list:{", st.default_standard),
            (" default single mission list:{", st.default_single),
            (" launcher mission list:{", st.launcher),
        ] {
            lines.push(title.to_string());
            Self::dump_list(&st, list, records, &mut lines);
            lines.push(" }".to_string());
        }
        lines
    }

    pub fn dump(&self) -> Vec<String> {
        self.dump_with(true)
    }

    pub fn dump_mission_list(&self) -> Vec<String> {
        self.dump_with(false)
    }
}

impl TaskDriver for MissionListManager {
    type Task = MissionTask;

    fn handler(&self) -> &TaskHandler<MissionTask> {
        &self.handler
    }

    fn run_task(&self, task: MissionTask) {
        debug!("User {} mission task {}", self.user, task.name());
        self.locked(|st, outbox| match task {
            MissionTask::CompleteForeground(id) => self.complete_foreground(st, id, outbox),
            MissionTask::CompleteBackground(id) => self.complete_background(st, id, outbox),
            MissionTask::CompleteTerminate(id) => self.complete_terminate(st, id, outbox),
            MissionTask::StartWaiting => self.start_waiting(st, outbox),
            MissionTask::BackToLauncher => self.back_to_launcher(st, outbox),
            MissionTask::AbilityDied(id) => self.handle_ability_died(st, id, outbox),
            timeout => self.handle_timeout(st, timeout, outbox),
        })
    }
}

impl std::fmt::Debug for MissionListManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MissionListManager")
            .field("user", &self.user)
            .field("pending_tasks", &self.handler.len())
            .finish()
    }
}
