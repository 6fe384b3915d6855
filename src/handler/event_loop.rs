/*!
 * Event Loop
 *
 * Background worker that drains a manager's task queue. Wakes on every post,
 * on the earliest pending deadline, or on an explicit trigger, and runs due
 * tasks one at a time.
 */

use super::queue::TaskDriver;
use crate::core::id::UserId;
use log::{info, warn};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::Instrument;

/// Control messages for the event loop
#[derive(Debug, Clone, Copy)]
pub enum LoopCommand {
    /// Run due tasks now
    Trigger,
    /// Stop the worker
    Shutdown,
}

/// Handle to a running event loop
pub struct EventLoop {
    name: &'static str,
    command_tx: mpsc::UnboundedSender<LoopCommand>,
    handle: Option<tokio::task::JoinHandle<()>>,
}

impl EventLoop {
    /// Spawn a worker for `driver` on the current tokio runtime
    pub fn spawn<D: TaskDriver>(driver: Arc<D>, name: &'static str, user: UserId) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let span = tracing::info_span!("event_loop", manager = name, user = user);

        let handle = tokio::spawn(run_event_loop(driver, command_rx).instrument(span));
        info!("Event loop spawned for {} (user {})", name, user);

        Self {
            name,
            command_tx,
            handle: Some(handle),
        }
    }

    pub fn trigger(&self) {
        let _ = self.command_tx.send(LoopCommand::Trigger);
    }

    /// Stop the worker and wait for it
    pub async fn shutdown(mut self) {
        let _ = self.command_tx.send(LoopCommand::Shutdown);

        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                warn!("Event loop {} shutdown error: {}", self.name, e);
            } else {
                info!("Event loop {} shutdown complete", self.name);
            }
        }
    }
}

async fn run_event_loop<D: TaskDriver>(
    driver: Arc<D>,
    mut command_rx: mpsc::UnboundedReceiver<LoopCommand>,
) {
    loop {
        let ran = driver.run_pending();
        if ran > 0 {
            log::trace!("Event loop ran {} tasks", ran);
        }

        let wait = driver.handler().time_until_next();
        let sleep = async move {
            match wait {
                Some(delay) => tokio::time::sleep(delay).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            _ = driver.handler().notified() => {}
            _ = sleep => {}
            cmd = command_rx.recv() => match cmd {
                Some(LoopCommand::Trigger) => {}
                Some(LoopCommand::Shutdown) | None => {
                    info!("Event loop shutting down");
                    break;
                }
            },
        }
    }
}

impl Drop for EventLoop {
    fn drop(&mut self) {
        if self.handle.is_some() {
            let _ = self.command_tx.send(LoopCommand::Shutdown);
        }
    }
}
