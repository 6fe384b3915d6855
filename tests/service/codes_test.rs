/*!
 * Transport Result Code Tests
 * Integer codes reported for every outcome of the inbound operations
 */

use crate::common::{launcher_request, page_request, RecordingHost, StaticBundleResolver, USER};
use ability_kernel::{
    codes, AbilityManagerService, AbilityScheduler, CallbackId, ElementName, LaunchMode, LifecycleState, MissionId,
    Token, Want,
};
use pretty_assertions::assert_eq;
use std::sync::Arc;

fn service() -> (Arc<RecordingHost>, AbilityManagerService) {
    let host = RecordingHost::new();
    let resolver = StaticBundleResolver::new();
    resolver.register(&launcher_request());
    resolver.register(&page_request("com.example.notes", "MainAbility", LaunchMode::Standard));
    let service = AbilityManagerService::builder()
        .with_app_scheduler(host.clone())
        .with_resolver(resolver)
        .without_event_loops()
        .with_user(USER)
        .build()
        .unwrap();
    (host, service)
}

fn notes() -> Want {
    Want::new(ElementName::new("com.example.notes", "MainAbility"))
}

#[test]
fn test_start_codes() {
    let (host, service) = service();

    let unknown = Want::new(ElementName::new("com.example.missing", "MainAbility"));
    assert_eq!(service.start_ability_code(&unknown, None, -1), codes::RESOLVE_ABILITY_ERR);
    assert_eq!(service.start_ability_code(&Want::default(), None, -1), codes::ERR_INVALID_VALUE);

    assert_eq!(service.start_launcher(USER).unwrap().result_code(), codes::ERR_OK);
    let launcher = host.last_load_of(&launcher_request().uri()).unwrap();
    assert_eq!(
        service.start_ability_code(&notes(), Some(launcher), -1),
        codes::START_ABILITY_WAITING
    );
}

#[test]
fn test_callback_codes_for_unknown_tokens() {
    let (host, service) = service();
    let token = Token::new();
    let scheduler = host as Arc<dyn AbilityScheduler>;

    assert_eq!(service.attach_ability_thread_code(scheduler, token), codes::ERR_INVALID_VALUE);
    assert_eq!(
        service.transition_done_code(token, LifecycleState::Foreground),
        codes::ERR_INVALID_VALUE
    );
    assert_eq!(service.schedule_connect_done_code(token, None), codes::ERR_INVALID_VALUE);
    assert_eq!(service.schedule_disconnect_done_code(token), codes::ERR_INVALID_VALUE);
    assert_eq!(service.schedule_command_done_code(token), codes::ERR_INVALID_VALUE);
    assert_eq!(service.terminate_ability_code(token, 0, None), codes::ERR_INVALID_VALUE);
}

#[test]
fn test_connection_codes() {
    let (_, service) = service();

    assert_eq!(service.disconnect_ability_code(CallbackId(9)), codes::CONNECTION_NOT_EXIST);
    assert_eq!(
        service.stop_service_ability_code(&notes()),
        codes::TARGET_ABILITY_NOT_SERVICE
    );
}

#[test]
fn test_mission_codes() {
    let (host, service) = service();
    service.start_launcher(USER).unwrap();
    let launcher = host.last_load_of(&launcher_request().uri()).unwrap();
    let scheduler = Arc::clone(&host) as Arc<dyn AbilityScheduler>;
    service.attach_ability_thread(scheduler, launcher).unwrap();
    let mission = service.get_mission_id_by_token(launcher).unwrap();

    assert_eq!(service.clear_mission_code(MissionId(-1)), codes::ERR_INVALID_VALUE);
    assert_eq!(service.clear_mission_code(mission), codes::REMOVE_MISSION_FAILED);
    assert_eq!(
        service.terminate_ability_code(launcher, 0, None),
        codes::TERMINATE_LAUNCHER_DENIED
    );
    assert_eq!(
        service.get_mission_info(MissionId(77)).unwrap_err().result_code(),
        codes::MISSION_NOT_FOUND
    );
}

#[test]
fn test_user_codes() {
    let (_, service) = service();
    assert_eq!(
        service
            .start_ability_as_user(&notes(), None, -1, 5)
            .unwrap_err()
            .result_code(),
        codes::USER_NOT_EXIST
    );
}
