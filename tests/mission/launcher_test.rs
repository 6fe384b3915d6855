/*!
 * Launcher Death Tests
 * The launcher root is reset and reloaded within its restart budget
 */

use crate::common::{launcher_request, page_request, Harness, LAUNCHER_ABILITY, LAUNCHER_BUNDLE};
use ability_kernel::{
    AbilityError, AbilityState, AppCall, EventKind, KernelConfig, LaunchMode, LifecycleState, MissionListManager,
    TaskDriver, TimeoutConfig, Token,
};
use pretty_assertions::assert_eq;
use std::time::Duration;

fn bring_up(h: &Harness, mm: &MissionListManager, token: Token) {
    mm.attach_ability_thread(h.scheduler(), token).unwrap();
    mm.on_ability_request_done(token, LifecycleState::Foreground).unwrap();
    mm.transition_done(token, LifecycleState::Foreground).unwrap();
    mm.run_pending();
}

fn launcher_loads(h: &Harness) -> Vec<Token> {
    h.host.loads_of(&launcher_request().uri())
}

fn start_launcher(h: &Harness, mm: &MissionListManager) -> Token {
    mm.start_ability(launcher_request()).unwrap();
    let token = h.host.last_load_of(&launcher_request().uri()).unwrap();
    bring_up(h, mm, token);
    token
}

#[test]
fn test_launcher_death_reloads_same_record() {
    let h = Harness::new();
    let mm = h.mission_manager();
    let launcher = start_launcher(&h, &mm);

    mm.on_ability_died(launcher).unwrap();
    mm.run_pending();

    assert_eq!(launcher_loads(&h), vec![launcher, launcher]);
    let record = mm.record_by_token(launcher).unwrap();
    assert!(record.launcher_root);
    assert!(record.restarting);
    assert_eq!(record.restart_count, h.config.launcher_restart_max - 1);
    assert_eq!(record.state, AbilityState::Initial);
    assert!(h.drain_events().contains(&EventKind::Died));
}

fn single_restart_config() -> KernelConfig {
    KernelConfig::new()
        .with_timeouts(TimeoutConfig::new())
        .with_launcher(LAUNCHER_BUNDLE, LAUNCHER_ABILITY)
        .with_launcher_restart_max(1)
}

#[test]
fn test_launcher_reload_stops_when_budget_spent() {
    let h = Harness::with_config(single_restart_config());
    let mm = h.mission_manager();
    let launcher = start_launcher(&h, &mm);

    mm.on_ability_died(launcher).unwrap();
    mm.run_pending();
    assert_eq!(launcher_loads(&h).len(), 2);
    assert_eq!(mm.record_by_token(launcher).unwrap().restart_count, 0);

    // the reload never attaches
    h.advance(h.config.timeouts.load() + Duration::from_millis(1));
    mm.run_pending();

    let record = mm.record_by_token(launcher).unwrap();
    assert_eq!(record.restart_count, -1);
    assert!(record.restarting);
    assert_eq!(launcher_loads(&h).len(), 2, "no budget left for another reload");
    assert!(mm.contains_token(launcher));
}

#[test]
fn test_launcher_budget_refills_on_foreground() {
    let h = Harness::with_config(single_restart_config());
    let mm = h.mission_manager();
    let launcher = start_launcher(&h, &mm);

    mm.on_ability_died(launcher).unwrap();
    mm.run_pending();
    bring_up(&h, &mm, launcher);
    let record = mm.record_by_token(launcher).unwrap();
    assert!(!record.restarting);
    assert_eq!(record.restart_count, 1);

    mm.on_ability_died(launcher).unwrap();
    mm.run_pending();
    assert_eq!(launcher_loads(&h).len(), 3);
}

#[test]
fn test_background_launcher_death_waits_for_next_return() {
    let h = Harness::new();
    let mm = h.mission_manager();
    let launcher = start_launcher(&h, &mm);
    let request = page_request("com.example.notes", "MainAbility", LaunchMode::Standard);
    mm.start_ability(request.clone().with_caller(launcher)).unwrap();
    let notes = h.host.last_load_of(&request.uri()).unwrap();
    mm.minimize_ability(launcher).unwrap();
    mm.transition_done(launcher, LifecycleState::Background).unwrap();
    mm.run_pending();

    mm.on_ability_died(launcher).unwrap();
    mm.run_pending();

    assert_eq!(launcher_loads(&h).len(), 1);
    assert_eq!(mm.record_by_token(launcher).unwrap().state, AbilityState::Initial);
    assert!(mm.contains_token(notes));
}

#[test]
fn test_foreground_page_death_returns_to_launcher() {
    let h = Harness::new();
    let mm = h.mission_manager();
    let launcher = start_launcher(&h, &mm);
    let request = page_request("com.example.notes", "MainAbility", LaunchMode::Standard);
    mm.start_ability(request.clone().with_caller(launcher)).unwrap();
    let notes = h.host.last_load_of(&request.uri()).unwrap();
    bring_up(&h, &mm, notes);
    mm.minimize_ability(launcher).unwrap();
    mm.transition_done(launcher, LifecycleState::Background).unwrap();
    mm.run_pending();
    let foreground_calls = |h: &Harness| {
        h.host
            .count_app(|c| matches!(c, AppCall::MoveToForeground { token } if *token == launcher))
    };
    let before = foreground_calls(&h);

    mm.on_ability_died(notes).unwrap();
    mm.run_pending();

    assert!(!mm.contains_token(notes));
    assert_eq!(mm.record_count(), 1);
    assert_eq!(foreground_calls(&h), before + 1);
    assert_eq!(mm.top_ability().unwrap().token, launcher);
}

#[test]
fn test_page_death_behind_active_launcher_stays_quiet() {
    let h = Harness::new();
    let mm = h.mission_manager();
    let launcher = start_launcher(&h, &mm);
    let request = page_request("com.example.notes", "MainAbility", LaunchMode::Standard);
    mm.start_ability(request.clone().with_caller(launcher)).unwrap();
    let notes = h.host.last_load_of(&request.uri()).unwrap();
    bring_up(&h, &mm, notes);
    let not_results = |h: &Harness| h.host.count_app(|c| !matches!(c, AppCall::SendResult { .. }));
    let calls = not_results(&h);

    mm.on_ability_died(notes).unwrap();
    mm.run_pending();

    assert!(!mm.contains_token(notes));
    assert_eq!(not_results(&h), calls, "the active launcher needs no return");
    assert_eq!(launcher_loads(&h).len(), 1);
}

#[test]
fn test_launcher_load_timeout_retries_launcher() {
    let h = Harness::new();
    let mm = h.mission_manager();
    mm.start_ability(launcher_request()).unwrap();
    let launcher = h.host.last_load_of(&launcher_request().uri()).unwrap();

    h.advance(h.config.timeouts.load() + Duration::from_millis(1));
    mm.run_pending();

    assert_eq!(
        h.host
            .count_app(|c| matches!(c, AppCall::AttachTimeOut { token } if *token == launcher)),
        1
    );
    assert!(mm.record_by_token(launcher).unwrap().restarting);
    assert_eq!(launcher_loads(&h), vec![launcher, launcher]);
}

#[test]
fn test_death_of_unknown_page_is_rejected() {
    let h = Harness::new();
    let mm = h.mission_manager();
    start_launcher(&h, &mm);
    let unknown = Token::new();

    assert_eq!(mm.on_ability_died(unknown), Err(AbilityError::UnknownToken(unknown)));
    assert_eq!(launcher_loads(&h).len(), 1);
}
