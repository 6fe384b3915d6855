/*!
 * Kernel Ability Manager Tests
 * System UI start, the waiting queue, death and timeout restarts
 */

use crate::common::{system_ui_request, Harness, SYSTEM_UI_BUNDLE};
use ability_kernel::{
    AbilityError, AbilityState, AppCall, EventKind, KernelAbilityManager, LifecycleState, ManagerKind, StartOutcome,
    TaskDriver, TimeoutKind, TimerKey, Token, Transaction,
};
use pretty_assertions::assert_eq;
use std::time::Duration;

const STATUS_BAR: &str = "com.ohos.systemui.statusbar.MainAbility";
const NAVIGATION_BAR: &str = "com.ohos.systemui.navigationbar.MainAbility";
const WALLPAPER: &str = "com.ohos.systemui.wallpaper.MainAbility";

fn loads(h: &Harness, ability: &str) -> Vec<Token> {
    h.host.loads_of(&system_ui_request(ability).uri())
}

fn start(h: &Harness, km: &KernelAbilityManager, ability: &str) -> Token {
    assert_eq!(km.start_ability(system_ui_request(ability)).unwrap(), StartOutcome::Started);
    h.host.last_load_of(&system_ui_request(ability).uri()).unwrap()
}

/// Attach and let the app manager report the process foreground
fn to_foregrounding(h: &Harness, km: &KernelAbilityManager, token: Token) {
    km.attach_ability_thread(h.scheduler(), token).unwrap();
    km.on_ability_request_done(token, LifecycleState::Foreground).unwrap();
}

fn bring_up(h: &Harness, km: &KernelAbilityManager, token: Token) {
    to_foregrounding(h, km, token);
    km.transition_done(token, LifecycleState::Foreground).unwrap();
    km.run_pending();
}

fn state(km: &KernelAbilityManager, token: Token) -> AbilityState {
    km.record_by_token(token).unwrap().state
}

fn kills(h: &Harness) -> usize {
    h.host
        .count_app(|c| matches!(c, AppCall::KillProcess { bundle } if bundle == SYSTEM_UI_BUNDLE))
}

// ============================================================================
// Start
// ============================================================================

#[test]
fn test_start_loads_then_foregrounds() {
    let h = Harness::new();
    let km = h.kernel_manager();
    let token = start(&h, &km, STATUS_BAR);
    assert_eq!(state(&km, token), AbilityState::Initial);

    km.attach_ability_thread(h.scheduler(), token).unwrap();
    assert_eq!(
        h.host
            .count_app(|c| matches!(c, AppCall::MoveToForeground { token: t } if *t == token)),
        1
    );
    assert_eq!(state(&km, token), AbilityState::Inactive);

    km.on_ability_request_done(token, LifecycleState::Foreground).unwrap();
    assert_eq!(state(&km, token), AbilityState::Foregrounding);
    assert_eq!(
        h.host.count_transactions(token, |t| matches!(
            t,
            Transaction::Lifecycle {
                target: LifecycleState::Foreground,
                ..
            }
        )),
        1
    );

    km.transition_done(token, LifecycleState::Foreground).unwrap();
    km.run_pending();
    assert_eq!(state(&km, token), AbilityState::Foreground);

    let events = h.drain_events();
    assert_eq!(
        events,
        vec![
            EventKind::Created {
                owner: ManagerKind::Kernel
            },
            EventKind::Loaded,
            EventKind::Foregrounded,
        ]
    );
}

#[test]
fn test_restart_of_known_flag_reuses_record() {
    let h = Harness::new();
    let km = h.kernel_manager();
    let token = start(&h, &km, STATUS_BAR);
    bring_up(&h, &km, token);

    let again = system_ui_request(STATUS_BAR);
    assert_eq!(km.start_ability(again).unwrap(), StartOutcome::Started);

    assert_eq!(km.record_count(), 1);
    assert_eq!(loads(&h, STATUS_BAR).len(), 1, "a foreground record is foregrounded, not reloaded");
    assert_eq!(state(&km, token), AbilityState::Foregrounding);
    assert!(km.record_by_token(token).is_some());
}

#[test]
fn test_attach_cancels_load_timeout() {
    let h = Harness::new();
    let km = h.kernel_manager();
    let token = start(&h, &km, STATUS_BAR);
    km.attach_ability_thread(h.scheduler(), token).unwrap();

    h.advance(h.config.timeouts.load() + Duration::from_millis(1));
    km.run_pending();

    assert!(km.contains_token(token));
    assert_eq!(kills(&h), 0);
}

// ============================================================================
// Transitions
// ============================================================================

#[test]
fn test_only_foreground_transitions_are_accepted() {
    let h = Harness::new();
    let km = h.kernel_manager();
    let token = start(&h, &km, STATUS_BAR);
    km.attach_ability_thread(h.scheduler(), token).unwrap();

    assert!(matches!(
        km.transition_done(token, LifecycleState::Background),
        Err(AbilityError::InvalidValue(_))
    ));
    assert!(matches!(
        km.transition_done(token, LifecycleState::Foreground),
        Err(AbilityError::InvalidState { .. })
    ));
    assert!(matches!(
        km.transition_done(Token::new(), LifecycleState::Foreground),
        Err(AbilityError::UnknownToken(_))
    ));
}

// ============================================================================
// Waiting Queue
// ============================================================================

#[test]
fn test_starts_wait_while_top_is_foregrounding() {
    let h = Harness::new();
    let km = h.kernel_manager();
    let status = start(&h, &km, STATUS_BAR);
    to_foregrounding(&h, &km, status);

    assert_eq!(
        km.start_ability(system_ui_request(NAVIGATION_BAR)).unwrap(),
        StartOutcome::Waiting
    );
    assert_eq!(
        km.start_ability(system_ui_request(WALLPAPER)).unwrap(),
        StartOutcome::Waiting
    );
    assert_eq!(km.waiting_count(), 2);
    assert!(loads(&h, NAVIGATION_BAR).is_empty());

    km.transition_done(status, LifecycleState::Foreground).unwrap();
    km.run_pending();

    assert_eq!(loads(&h, NAVIGATION_BAR).len(), 1);
    assert!(loads(&h, WALLPAPER).is_empty(), "one waiting start per foreground");
    assert_eq!(km.waiting_count(), 1);

    let nav = h.host.last_load_of(&system_ui_request(NAVIGATION_BAR).uri()).unwrap();
    assert_eq!(km.top_ability().unwrap().token, nav);
    bring_up(&h, &km, nav);

    assert_eq!(loads(&h, WALLPAPER).len(), 1);
    assert_eq!(km.waiting_count(), 0);
}

#[test]
fn test_start_does_not_wait_for_a_loading_top() {
    let h = Harness::new();
    let km = h.kernel_manager();
    start(&h, &km, STATUS_BAR);

    assert_eq!(
        km.start_ability(system_ui_request(NAVIGATION_BAR)).unwrap(),
        StartOutcome::Started
    );
    assert_eq!(km.record_count(), 2);
    assert_eq!(km.waiting_count(), 0);
}

// ============================================================================
// Death
// ============================================================================

#[test]
fn test_death_reloads_same_record_after_delay() {
    let h = Harness::new();
    let km = h.kernel_manager();
    let token = start(&h, &km, STATUS_BAR);
    bring_up(&h, &km, token);
    h.drain_events();

    km.on_ability_died(token).unwrap();
    let record = km.record_by_token(token).unwrap();
    assert_eq!(record.state, AbilityState::Initial);
    assert!(!record.ready);
    assert_eq!(h.drain_events(), vec![EventKind::Died]);

    km.run_pending();
    assert_eq!(loads(&h, STATUS_BAR).len(), 1, "restart waits for its delay");

    h.advance(h.config.timeouts.system_ui_restart_delay + Duration::from_millis(1));
    km.run_pending();
    assert_eq!(loads(&h, STATUS_BAR), vec![token, token]);
}

#[test]
fn test_restart_skipped_when_started_again_meanwhile() {
    let h = Harness::new();
    let km = h.kernel_manager();
    let token = start(&h, &km, STATUS_BAR);
    bring_up(&h, &km, token);
    km.on_ability_died(token).unwrap();

    start(&h, &km, STATUS_BAR);
    bring_up(&h, &km, token);
    assert_eq!(loads(&h, STATUS_BAR).len(), 2);

    h.advance(h.config.timeouts.system_ui_restart_delay + Duration::from_millis(1));
    km.run_pending();
    assert_eq!(loads(&h, STATUS_BAR).len(), 2);
    assert_eq!(state(&km, token), AbilityState::Foreground);
}

#[test]
fn test_unknown_token_death_is_rejected() {
    let h = Harness::new();
    let km = h.kernel_manager();
    assert!(matches!(
        km.on_ability_died(Token::new()),
        Err(AbilityError::UnknownToken(_))
    ));
}

// ============================================================================
// Timeouts
// ============================================================================

#[test]
fn test_load_timeout_kills_bundle_and_restarts() {
    let h = Harness::new();
    let km = h.kernel_manager();
    let token = start(&h, &km, STATUS_BAR);
    h.drain_events();

    h.advance(h.config.timeouts.load() + Duration::from_millis(1));
    km.run_pending();

    assert!(!km.contains_token(token));
    assert_eq!(kills(&h), 1);
    assert_eq!(
        h.drain_events(),
        vec![
            EventKind::TimedOut {
                timeout: TimeoutKind::Load
            },
            EventKind::Terminated,
        ]
    );
    let flag = format!("{}:{}", SYSTEM_UI_BUNDLE, STATUS_BAR);
    assert!(km.handler().contains(&TimerKey::SystemUiRestart(flag)));

    h.advance(h.config.timeouts.system_ui_restart_delay + Duration::from_millis(1));
    km.run_pending();
    let reloaded = loads(&h, STATUS_BAR);
    assert_eq!(reloaded.len(), 2);
    assert_ne!(reloaded[1], token, "the restart creates a fresh record");
    assert!(km.contains_token(reloaded[1]));
}

#[test]
fn test_foreground_timeout_kills_bundle() {
    let h = Harness::new();
    let km = h.kernel_manager();
    let token = start(&h, &km, STATUS_BAR);
    to_foregrounding(&h, &km, token);

    h.advance(h.config.timeouts.foreground + Duration::from_millis(1));
    km.run_pending();

    assert!(!km.contains_token(token));
    assert_eq!(kills(&h), 1);
    assert_eq!(km.record_count(), 0);
}

// ============================================================================
// Queries
// ============================================================================

#[test]
fn test_dump_lists_records_newest_first() {
    let h = Harness::new();
    let km = h.kernel_manager();
    let status = start(&h, &km, STATUS_BAR);
    let nav = start(&h, &km, NAVIGATION_BAR);

    let infos: Vec<_> = km.running_infos().into_iter().map(|r| r.token).collect();
    assert_eq!(infos, vec![nav, status]);

    let dump = km.dump();
    assert_eq!(dump[0], "SystemUIRecords:");
    assert!(dump.len() > 1);
}
