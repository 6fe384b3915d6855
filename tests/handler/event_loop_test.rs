/*!
 * Event Loop Tests
 * Workers drain posted tasks and wake for the manual clock on trigger
 */

use ability_kernel::{Clock, EventLoop, ManualClock, TaskDriver, TaskHandler, TimerKey};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;

struct Recorder {
    handler: TaskHandler<&'static str>,
    seen: Mutex<Vec<&'static str>>,
}

impl TaskDriver for Recorder {
    type Task = &'static str;

    fn handler(&self) -> &TaskHandler<&'static str> {
        &self.handler
    }

    fn run_task(&self, task: &'static str) {
        self.seen.lock().push(task);
    }
}

async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}

#[tokio::test]
async fn test_loop_runs_posts_and_waits_for_clock() {
    let clock = Arc::new(ManualClock::new());
    let driver = Arc::new(Recorder {
        handler: TaskHandler::new(Arc::clone(&clock) as Arc<dyn Clock>),
        seen: Mutex::new(Vec::new()),
    });
    let worker = EventLoop::spawn(Arc::clone(&driver), "recorder", 100);

    driver.handler.post("now");
    driver
        .handler
        .post_delayed(TimerKey::LauncherRestart, "later", Duration::from_secs(60));
    settle().await;
    assert_eq!(*driver.seen.lock(), vec!["now"]);

    clock.advance(Duration::from_secs(60));
    worker.trigger();
    settle().await;
    assert_eq!(*driver.seen.lock(), vec!["now", "later"]);

    worker.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_leaves_pending_tasks_queued() {
    let clock = Arc::new(ManualClock::new());
    let driver = Arc::new(Recorder {
        handler: TaskHandler::new(Arc::clone(&clock) as Arc<dyn Clock>),
        seen: Mutex::new(Vec::new()),
    });
    let worker = EventLoop::spawn(Arc::clone(&driver), "recorder", 100);
    worker.shutdown().await;

    driver
        .handler
        .post_delayed(TimerKey::StartWaiting, "queued", Duration::from_millis(1));
    assert_eq!(driver.handler.len(), 1);

    clock.advance(Duration::from_millis(1));
    assert_eq!(driver.run_pending(), 1);
    assert_eq!(*driver.seen.lock(), vec!["queued"]);
}
