/*!
 * Ability Manager Service Tests
 * Builder validation, user sessions and token routing
 */

use crate::common::{
    launcher_request, page_request, service_request, system_ui_request, RecordingHost, StaticBundleResolver,
    LAUNCHER_ABILITY, LAUNCHER_BUNDLE, USER,
};
use ability_kernel::{
    AbilityError, AbilityManagerService, AbilityState, AppCall, AppScheduler, BundleResolver, Clock,
    ComponentInfo, ComponentKind, ComponentRequest, KernelConfig, LaunchMode, LifecycleState, ManagerKind,
    ManualClock, StartOutcome, TimeoutConfig, Token, Want,
};
use mockall::mock;
use pretty_assertions::assert_eq;
use std::sync::Arc;

mock! {
    pub App {}

    impl AppScheduler for App {
        fn submit(&self, call: AppCall);
    }
}

struct Fixture {
    host: Arc<RecordingHost>,
    resolver: Arc<StaticBundleResolver>,
    service: AbilityManagerService,
}

fn config() -> KernelConfig {
    KernelConfig::new()
        .with_timeouts(TimeoutConfig::new())
        .with_launcher(LAUNCHER_BUNDLE, LAUNCHER_ABILITY)
}

fn fixture() -> Fixture {
    let host = RecordingHost::new();
    let resolver = StaticBundleResolver::new();
    resolver.register(&launcher_request());
    let service = AbilityManagerService::builder()
        .with_config(config())
        .with_app_scheduler(Arc::clone(&host) as Arc<dyn AppScheduler>)
        .with_resolver(Arc::clone(&resolver) as Arc<dyn BundleResolver>)
        .with_clock(Arc::new(ManualClock::new()) as Arc<dyn Clock>)
        .without_event_loops()
        .with_user(USER)
        .build()
        .unwrap();
    Fixture {
        host,
        resolver,
        service,
    }
}

impl Fixture {
    fn register(&self, request: &ComponentRequest) -> Want {
        self.resolver.register(request);
        request.want.clone()
    }

    /// Start the launcher and acknowledge it up to FOREGROUND
    fn launcher(&self) -> Token {
        self.service.start_launcher(USER).unwrap();
        let token = self.host.last_load_of(&launcher_request().uri()).unwrap();
        self.foreground(token);
        token
    }

    fn foreground(&self, token: Token) {
        let scheduler = Arc::clone(&self.host) as Arc<dyn ability_kernel::AbilityScheduler>;
        self.service.attach_ability_thread(scheduler, token).unwrap();
        self.service
            .on_ability_request_done(token, LifecycleState::Foreground)
            .unwrap();
        self.service.transition_done(token, LifecycleState::Foreground).unwrap();
        self.service.run_pending();
    }
}

// ============================================================================
// Builder
// ============================================================================

#[test]
fn test_build_requires_app_scheduler() {
    let result = AbilityManagerService::builder()
        .with_resolver(StaticBundleResolver::new())
        .without_event_loops()
        .build();
    assert!(matches!(result, Err(AbilityError::InvalidValue(_))));
}

#[test]
fn test_build_requires_resolver() {
    let result = AbilityManagerService::builder()
        .with_app_scheduler(RecordingHost::new())
        .without_event_loops()
        .build();
    assert!(matches!(result, Err(AbilityError::InvalidValue(_))));
}

#[test]
fn test_event_loops_need_runtime() {
    let result = AbilityManagerService::builder()
        .with_app_scheduler(RecordingHost::new())
        .with_resolver(StaticBundleResolver::new())
        .build();
    assert!(matches!(result, Err(AbilityError::Internal(_))));
}

#[tokio::test]
async fn test_event_loops_start_and_stop_with_sessions() {
    let service = AbilityManagerService::builder()
        .with_config(config())
        .with_app_scheduler(RecordingHost::new())
        .with_resolver(StaticBundleResolver::new())
        .with_user(USER)
        .build()
        .unwrap();
    let session = service.session(USER).unwrap();
    assert!(session.has_workers());

    service.shutdown().await;
    assert!(!session.has_workers());
}

// ============================================================================
// Users
// ============================================================================

#[test]
fn test_first_user_becomes_current() {
    let f = fixture();
    assert_eq!(f.service.current_user(), USER);

    f.service.init_user(101).unwrap();
    assert_eq!(f.service.current_user(), USER);
    f.service.switch_user(101).unwrap();
    assert_eq!(f.service.current_user(), 101);
    assert_eq!(f.service.users(), vec![USER, 101]);

    assert!(matches!(f.service.init_user(-1), Err(AbilityError::InvalidValue(_))));
    assert!(matches!(f.service.session(7), Err(AbilityError::UserNotFound(7))));
}

#[tokio::test]
async fn test_remove_user_drops_session_and_routes() {
    let f = fixture();
    f.service.switch_user(101).unwrap();
    let want = f.register(&service_request("com.example.sync", "SyncService"));
    f.service.start_ability(&want, None, -1).unwrap();
    let token = f.host.last_load_of(&want.element.uri()).unwrap();
    assert_eq!(f.service.token_route(token).unwrap().user, 101);

    f.service.remove_user(101).await.unwrap();

    assert_eq!(f.service.current_user(), -1);
    assert_eq!(f.service.users(), vec![USER]);
    assert_eq!(f.service.route(token).err(), Some(AbilityError::UnknownToken(token)));
    assert_eq!(
        f.service.remove_user(101).await,
        Err(AbilityError::UserNotFound(101))
    );
}

#[test]
fn test_users_keep_separate_components() {
    let f = fixture();
    let want = f.register(&service_request("com.example.sync", "SyncService"));
    f.service.start_ability(&want, None, -1).unwrap();
    f.service.switch_user(101).unwrap();
    f.service.start_ability(&want, None, -1).unwrap();

    let loads = f.host.loads_of(&want.element.uri());
    assert_eq!(loads.len(), 2);
    assert_eq!(f.service.token_route(loads[0]).unwrap().user, USER);
    assert_eq!(f.service.token_route(loads[1]).unwrap().user, 101);
    assert!(f.service.get_service_record_by_element(&want.element).is_some());
}

#[test]
fn test_config_update_applies_to_new_sessions() {
    let f = fixture();
    f.service.update_config(config().with_launcher_restart_max(7));
    assert_eq!(f.service.config().launcher_restart_max, 7);

    f.service.init_user(102).unwrap();
    f.service.start_launcher(USER).unwrap();
    f.service.start_launcher(102).unwrap();

    let loads = f.host.loads_of(&launcher_request().uri());
    let budgets: Vec<i32> = loads
        .iter()
        .map(|t| f.service.record_by_token(*t).unwrap().restart_count)
        .collect();
    assert_eq!(budgets, vec![3, 7]);
}

// ============================================================================
// Routing
// ============================================================================

#[test]
fn test_pages_and_services_route_by_kind() {
    let f = fixture();
    let launcher = f.launcher();
    let want = f.register(&service_request("com.example.sync", "SyncService"));
    f.service.start_ability(&want, None, -1).unwrap();
    let service = f.host.last_load_of(&want.element.uri()).unwrap();

    assert_eq!(f.service.token_route(launcher).unwrap().owner, ManagerKind::Mission);
    assert_eq!(f.service.token_route(service).unwrap().owner, ManagerKind::Connect);
    assert_eq!(
        f.service.record_by_token(launcher).unwrap().state,
        AbilityState::Foreground
    );
    assert!(f.service.get_mission_id_by_token(launcher).is_ok());
    assert!(matches!(
        f.service.schedule_command_done(launcher),
        Err(AbilityError::NotService(_))
    ));
    assert!(matches!(
        f.service.minimize_ability(service),
        Err(AbilityError::InvalidValue(_))
    ));
}

#[test]
fn test_service_callbacks_reach_connect_manager() {
    let f = fixture();
    let want = f.register(&service_request("com.example.sync", "SyncService"));
    f.service.start_ability(&want, None, -1).unwrap();
    let token = f.host.last_load_of(&want.element.uri()).unwrap();
    let scheduler = Arc::clone(&f.host) as Arc<dyn ability_kernel::AbilityScheduler>;

    f.service.attach_ability_thread(scheduler, token).unwrap();
    f.service.transition_done(token, LifecycleState::Inactive).unwrap();
    f.service.schedule_command_done(token).unwrap();
    assert_eq!(f.service.record_by_token(token).unwrap().state, AbilityState::Active);

    f.service.terminate_ability(token, 0, None).unwrap();
    f.service.transition_done(token, LifecycleState::Initial).unwrap();

    assert!(f.service.token_route(token).is_none());
    assert_eq!(f.service.route(token).err(), Some(AbilityError::UnknownToken(token)));
    assert!(f.service.record_by_token(token).is_none());
}

#[test]
fn test_registrations_drain_on_run_pending() {
    let f = fixture();
    let want = f.register(&service_request("com.example.sync", "SyncService"));
    let events = f.service.bus().subscribe_unbounded();

    f.service.start_ability(&want, None, -1).unwrap();
    assert_eq!(f.service.pending_registrations(), 1);

    f.service.run_pending();
    assert_eq!(f.service.pending_registrations(), 0);
    let token = f.host.last_load_of(&want.element.uri()).unwrap();
    assert_eq!(f.service.token_route(token).unwrap().owner, ManagerKind::Connect);

    let scheduler = Arc::clone(&f.host) as Arc<dyn ability_kernel::AbilityScheduler>;
    f.service.attach_ability_thread(scheduler, token).unwrap();
    f.service.transition_done(token, LifecycleState::Inactive).unwrap();
    f.service.schedule_command_done(token).unwrap();
    assert!(events.len() > 1);
    assert_eq!(f.service.pending_registrations(), 0);
}

#[test]
fn test_route_finds_owning_session() {
    let f = fixture();
    let launcher = f.launcher();
    let session = f.service.session(USER).unwrap();
    assert!(session.missions().contains_token(launcher));

    let (found, owner) = f.service.route(launcher).unwrap();
    assert_eq!(found.user(), USER);
    assert_eq!(owner, ManagerKind::Mission);
    let unknown = Token::new();
    assert_eq!(f.service.route(unknown).err(), Some(AbilityError::UnknownToken(unknown)));
}

#[test]
fn test_system_ui_pages_route_to_kernel_manager() {
    let f = fixture();
    let want = f.register(&system_ui_request("com.ohos.systemui.statusbar.MainAbility"));
    assert_eq!(f.service.start_ability(&want, None, -1).unwrap(), StartOutcome::Started);
    let token = f.host.last_load_of(&want.element.uri()).unwrap();

    let session = f.service.session(USER).unwrap();
    assert!(session.kernel().contains_token(token));
    assert_eq!(session.missions().record_count(), 0);
    assert_eq!(f.service.token_route(token).unwrap().owner, ManagerKind::Kernel);

    f.foreground(token);
    assert_eq!(f.service.record_by_token(token).unwrap().state, AbilityState::Foreground);
    assert!(f.service.running_infos().unwrap().iter().any(|r| r.token == token));
    assert!(f.service.dump().iter().any(|l| l == "SystemUIRecords:"));

    assert!(matches!(
        f.service.terminate_ability(token, 0, None),
        Err(AbilityError::InvalidValue(_))
    ));
    assert!(matches!(f.service.minimize_ability(token), Err(AbilityError::InvalidValue(_))));
    assert!(matches!(
        f.service.schedule_connect_done(token, None),
        Err(AbilityError::NotService(_))
    ));

    f.service.on_ability_died(token).unwrap();
    assert_eq!(f.service.record_by_token(token).unwrap().state, AbilityState::Initial);
}

#[test]
fn test_repeated_disconnect_succeeds_after_user_switch() {
    let f = fixture();
    f.service.switch_user(101).unwrap();
    let want = f.register(&service_request("com.example.sync", "SyncService"));
    let callback = crate::common::RecordingConnection::new();
    let handle = ability_kernel::ConnectionHandle::new(ability_kernel::CallbackId(9), callback.clone());
    f.service.connect_ability(&want, handle, None).unwrap();
    let token = f.host.last_load_of(&want.element.uri()).unwrap();
    let scheduler = Arc::clone(&f.host) as Arc<dyn ability_kernel::AbilityScheduler>;
    f.service.attach_ability_thread(scheduler, token).unwrap();
    f.service.transition_done(token, LifecycleState::Inactive).unwrap();
    f.service.schedule_connect_done(token, None).unwrap();

    f.service.disconnect_ability(ability_kernel::CallbackId(9)).unwrap();
    f.service.schedule_disconnect_done(token).unwrap();
    assert_eq!(f.service.disconnect_ability(ability_kernel::CallbackId(9)), Ok(()));

    f.service.switch_user(USER).unwrap();
    assert_eq!(f.service.disconnect_ability(ability_kernel::CallbackId(9)), Ok(()));
    assert_eq!(callback.disconnect_results().len(), 1);
    assert_eq!(
        f.service.disconnect_ability(ability_kernel::CallbackId(10)),
        Err(AbilityError::ConnectionNotExist(ability_kernel::CallbackId(10)))
    );
}

#[test]
fn test_data_components_cannot_be_started() {
    let f = fixture();
    let info = ComponentInfo::new("com.example.contacts", "ContactsData", ComponentKind::Data);
    let app = ability_kernel::ApplicationInfo::new("com.example.contacts", 40_000);
    let request = ComponentRequest::new(Want::new(info.element()), info, app);
    let want = f.register(&request);

    assert!(matches!(
        f.service.start_ability(&want, None, -1),
        Err(AbilityError::NotService(_))
    ));
}

#[test]
fn test_pages_cannot_be_connected_or_stopped() {
    let f = fixture();
    let want = f.register(&page_request("com.example.notes", "MainAbility", LaunchMode::Standard));
    let handle = ability_kernel::ConnectionHandle::new(
        ability_kernel::CallbackId(1),
        crate::common::RecordingConnection::new(),
    );

    assert!(matches!(
        f.service.connect_ability(&want, handle, None),
        Err(AbilityError::NotService(_))
    ));
    assert!(matches!(
        f.service.stop_service_ability(&want),
        Err(AbilityError::NotService(_))
    ));
}

#[test]
fn test_page_start_waits_behind_loading_launcher() {
    let f = fixture();
    f.service.start_launcher(USER).unwrap();
    let launcher = f.host.last_load_of(&launcher_request().uri()).unwrap();
    let want = f.register(&page_request("com.example.notes", "MainAbility", LaunchMode::Standard));

    let outcome = f.service.start_ability(&want, Some(launcher), -1).unwrap();

    assert_eq!(outcome, StartOutcome::Waiting);
    assert!(f.host.loads_of(&want.element.uri()).is_empty());
}

#[test]
fn test_start_submits_load_to_app_scheduler() {
    let mut app = MockApp::new();
    app.expect_submit()
        .withf(|call| matches!(call, AppCall::LoadAbility { info, .. } if info.name == "SyncService"))
        .times(1)
        .return_const(());
    app.expect_submit()
        .withf(|call| !matches!(call, AppCall::LoadAbility { .. }))
        .return_const(());
    let resolver = StaticBundleResolver::new();
    let request = service_request("com.example.sync", "SyncService");
    resolver.register(&request);
    let service = AbilityManagerService::builder()
        .with_config(config())
        .with_app_scheduler(Arc::new(app))
        .with_resolver(resolver)
        .without_event_loops()
        .with_user(USER)
        .build()
        .unwrap();

    assert_eq!(
        service.start_ability(&request.want, None, -1).unwrap(),
        StartOutcome::Started
    );
    assert_eq!(service.running_infos().unwrap().len(), 1);
}

#[test]
fn test_dump_covers_every_user() {
    let f = fixture();
    f.launcher();
    f.service.init_user(101).unwrap();

    let dump = f.service.dump();
    assert!(dump.iter().any(|l| l == "User ID #100"));
    assert!(dump.iter().any(|l| l == "User ID #101"));
}
