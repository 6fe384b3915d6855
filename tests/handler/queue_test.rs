/*!
 * Task Queue Ordering Tests
 * Deadline order with submission-order ties, under arbitrary schedules
 */

use ability_kernel::{Clock, ManualClock, TaskHandler, TimeoutKind, TimerKey};
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use std::sync::Arc;
use std::time::Duration;

fn queue() -> (Arc<ManualClock>, TaskHandler<usize>) {
    let clock = Arc::new(ManualClock::new());
    let handler = TaskHandler::new(Arc::clone(&clock) as Arc<dyn Clock>);
    (clock, handler)
}

fn drain(handler: &TaskHandler<usize>) -> Vec<usize> {
    std::iter::from_fn(|| handler.pop_ready()).collect()
}

proptest! {
    #[test]
    fn prop_tasks_pop_by_deadline_then_submission(delays in prop::collection::vec(0u64..50, 1..64)) {
        let (clock, q) = queue();
        for (i, delay) in delays.iter().enumerate() {
            q.post_delayed(
                TimerKey::lifecycle(TimeoutKind::Command, i as u64),
                i,
                Duration::from_millis(*delay),
            );
        }
        clock.advance(Duration::from_millis(50));

        let mut expected: Vec<usize> = (0..delays.len()).collect();
        expected.sort_by_key(|i| (delays[*i], *i));
        prop_assert_eq!(drain(&q), expected);
    }

    #[test]
    fn prop_nothing_pops_before_its_deadline(delays in prop::collection::vec(1u64..100, 1..32), at in 0u64..100) {
        let (clock, q) = queue();
        for (i, delay) in delays.iter().enumerate() {
            q.post_delayed(
                TimerKey::lifecycle(TimeoutKind::Load, i as u64),
                i,
                Duration::from_millis(*delay),
            );
        }
        clock.advance(Duration::from_millis(at));

        let ran = drain(&q);
        prop_assert!(ran.iter().all(|i| delays[*i] <= at));
        prop_assert_eq!(ran.len() + q.len(), delays.len());
    }

    #[test]
    fn prop_cancelled_keys_never_run(count in 1usize..40, cancel_every in 1usize..5) {
        let (clock, q) = queue();
        for i in 0..count {
            q.post_delayed(
                TimerKey::lifecycle(TimeoutKind::Terminate, i as u64),
                i,
                Duration::from_millis(i as u64),
            );
        }
        for i in (0..count).step_by(cancel_every) {
            prop_assert!(q.cancel(&TimerKey::lifecycle(TimeoutKind::Terminate, i as u64)));
        }
        clock.advance(Duration::from_secs(1));

        let ran = drain(&q);
        prop_assert!(ran.iter().all(|i| i % cancel_every != 0));
        prop_assert_eq!(ran.len(), count - (0..count).step_by(cancel_every).count());
    }
}

#[test]
fn test_immediate_task_runs_before_later_deadline() {
    let (clock, q) = queue();
    q.post_delayed(TimerKey::StartWaiting, 1, Duration::from_millis(5));
    clock.advance(Duration::from_millis(10));
    q.post(2);

    // the delayed task fell due first
    assert_eq!(drain(&q), vec![1, 2]);
}

#[test]
fn test_rearming_a_key_moves_its_deadline() {
    let (clock, q) = queue();
    let key = TimerKey::StartServiceQueue("com.example/Sync".to_string());
    q.post_delayed(key.clone(), 1, Duration::from_millis(5));
    clock.advance(Duration::from_millis(4));
    q.post_delayed(key.clone(), 2, Duration::from_millis(5));

    clock.advance(Duration::from_millis(1));
    assert_eq!(q.pop_ready(), None);
    clock.advance(Duration::from_millis(4));
    assert_eq!(q.pop_ready(), Some(2));
    assert!(!q.contains(&key));
}

#[test]
fn test_immediate_tasks_are_not_cancellable() {
    let (_, q) = queue();
    q.post(1);
    assert!(q.pending_keys().is_empty());
    assert_eq!(q.len(), 1);
    q.clear();
    assert!(q.is_empty());
}
