/*!
 * Service Death and Restart Tests
 * Resident services come back exactly once per death
 */

use crate::common::{keep_alive_service_request, service_request, Harness, RecordingConnection};
use ability_kernel::{
    codes, AbilityError, AppCall, CallbackId, ComponentRequest, ConnectManager, ConnectionCallback, ConnectionHandle,
    EventKind, LifecycleState, RemoteObject, TaskDriver, Token, Transaction,
};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;

const BUNDLE: &str = "com.example.resident";
const ABILITY: &str = "ResidentService";

fn start_until_active(h: &Harness, cm: &ConnectManager, request: &ComponentRequest) -> Token {
    cm.start_ability(request.clone()).unwrap();
    let token = h.host.last_load_of(&request.uri()).unwrap();
    cm.attach_ability_thread(h.scheduler(), token).unwrap();
    cm.transition_done(token, LifecycleState::Inactive).unwrap();
    cm.schedule_command_done(token).unwrap();
    token
}

#[test]
fn test_resident_death_resubmits_exactly_one_start() {
    let h = Harness::new();
    let cm = h.connect_manager();
    let request = keep_alive_service_request(BUNDLE, ABILITY);
    let uri = request.uri();
    let token = start_until_active(&h, &cm, &request);
    h.drain_events();

    cm.on_ability_died(token).unwrap();
    assert_eq!(h.host.loads_of(&uri).len(), 1, "restart happens on the queue, not inline");
    cm.run_pending();

    let loads = h.host.loads_of(&uri);
    assert_eq!(loads.len(), 2);
    let restarted = loads[1];
    assert_ne!(restarted, token);
    assert!(!cm.contains_token(token));
    assert!(cm.is_live(&uri));
    assert_eq!(cm.record_count(), 1);

    let record = cm.record_by_token(restarted).unwrap();
    assert!(record.restarting);
    assert_eq!(record.restart_count, h.config.resident_restart_max - 1);

    let events = h.drain_events();
    assert_eq!(events.iter().filter(|e| **e == EventKind::Died).count(), 1);
    assert_eq!(events.iter().filter(|e| **e == EventKind::Restarted).count(), 1);

    // nothing else was queued for the dead record
    h.advance(Duration::from_millis(1));
    cm.run_pending();
    assert_eq!(h.host.loads_of(&uri).len(), 2);
}

#[test]
fn test_restarted_service_is_commanded_as_restart() {
    let h = Harness::new();
    let cm = h.connect_manager();
    let request = keep_alive_service_request(BUNDLE, ABILITY);
    let token = start_until_active(&h, &cm, &request);

    cm.on_ability_died(token).unwrap();
    cm.run_pending();
    let restarted = h.host.last_load_of(&request.uri()).unwrap();
    cm.attach_ability_thread(h.scheduler(), restarted).unwrap();
    cm.transition_done(restarted, LifecycleState::Inactive).unwrap();

    let restart_flags: Vec<bool> = h
        .host
        .transactions()
        .into_iter()
        .filter_map(|(t, tx)| match tx {
            Transaction::Command { restart, .. } if t == restarted => Some(restart),
            _ => None,
        })
        .collect();
    assert_eq!(restart_flags, vec![true]);
}

#[test]
fn test_spent_resident_budget_delays_restart() {
    let h = Harness::new();
    let cm = h.connect_manager();
    let request = keep_alive_service_request(BUNDLE, ABILITY);
    let uri = request.uri();
    let mut token = start_until_active(&h, &cm, &request);

    let quick = h.config.resident_restart_max as usize;
    for _ in 0..quick {
        cm.on_ability_died(token).unwrap();
        cm.run_pending();
        token = h.host.last_load_of(&uri).unwrap();
    }
    let loads = h.host.loads_of(&uri).len();
    assert_eq!(loads, quick + 1);

    cm.on_ability_died(token).unwrap();
    cm.run_pending();
    assert_eq!(h.host.loads_of(&uri).len(), loads, "spent budget waits for the interval");
    assert!(!cm.is_live(&uri));

    h.advance(h.config.timeouts.resident_restart_interval);
    cm.run_pending();
    assert_eq!(h.host.loads_of(&uri).len(), loads + 1);
    assert!(cm.is_live(&uri));
}

#[test]
fn test_plain_service_death_is_final() {
    let h = Harness::new();
    let cm = h.connect_manager();
    let request = service_request(BUNDLE, ABILITY);
    let token = start_until_active(&h, &cm, &request);

    cm.on_ability_died(token).unwrap();
    cm.run_pending();

    assert_eq!(h.host.loads_of(&request.uri()).len(), 1);
    assert_eq!(cm.record_count(), 0);
    assert!(!cm.is_live(&request.uri()));
    assert!(!cm.is_terminating(&request.uri()));
}

#[test]
fn test_death_closes_connections_with_shifted_code() {
    let h = Harness::new();
    let cm = h.connect_manager();
    let request = service_request(BUNDLE, ABILITY);
    let callback = RecordingConnection::new();
    let handle = ConnectionHandle::new(CallbackId(5), Arc::clone(&callback) as Arc<dyn ConnectionCallback>);

    cm.connect_ability(request.clone(), handle, None).unwrap();
    let token = h.host.last_load_of(&request.uri()).unwrap();
    cm.attach_ability_thread(h.scheduler(), token).unwrap();
    cm.transition_done(token, LifecycleState::Inactive).unwrap();
    cm.schedule_connect_done(token, Some(RemoteObject(3))).unwrap();

    cm.on_ability_died(token).unwrap();
    cm.run_pending();

    assert_eq!(callback.disconnect_results(), vec![codes::ERR_OK - 1]);
    assert_eq!(cm.connection_count(CallbackId(5)), 0);
    assert_eq!(cm.record_count(), 0);
}

#[test]
fn test_death_cancels_pending_callers() {
    let h = Harness::new();
    let cm = h.connect_manager();
    let caller = Token::new();
    let request = service_request(BUNDLE, ABILITY)
        .with_caller(caller)
        .with_request_code(11);
    let token = start_until_active(&h, &cm, &request);

    cm.on_ability_died(token).unwrap();

    assert_eq!(h.host.results(), vec![(caller, 11, codes::CANCELED)]);
}

#[test]
fn test_death_of_unknown_token_fails() {
    let h = Harness::new();
    let cm = h.connect_manager();
    let token = Token::new();
    assert_eq!(cm.on_ability_died(token), Err(AbilityError::UnknownToken(token)));
    assert_eq!(h.host.count_app(|c| matches!(c, AppCall::LoadAbility { .. })), 0);
}

#[test]
fn test_resident_load_timeout_restarts_it() {
    let h = Harness::new();
    let cm = h.connect_manager();
    let request = keep_alive_service_request(BUNDLE, ABILITY);
    cm.start_ability(request.clone()).unwrap();

    h.advance(h.config.timeouts.load() + Duration::from_millis(1));
    cm.run_pending();

    assert_eq!(h.host.loads_of(&request.uri()).len(), 2);
    assert!(cm.is_live(&request.uri()));
}
