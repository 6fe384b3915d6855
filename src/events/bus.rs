/*!
 * Event Bus
 * In-process fan-out of lifecycle events
 *
 * Managers publish after releasing their registry lock. Subscribers own a
 * flume receiver; a subscriber whose receiver was dropped is removed on the
 * next publish.
 */

use crate::core::id::{MissionId, RecordId, Token, UserId};
use crate::handler::TimeoutKind;
use log::{debug, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Manager that owns the record an event describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ManagerKind {
    Connect,
    Mission,
    /// System UI pages kept outside the mission lists
    Kernel,
}

/// What happened to the record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    Created { owner: ManagerKind },
    Loaded,
    Foregrounded,
    Backgrounded,
    Active,
    Terminated,
    Died,
    Restarted,
    TimedOut { timeout: TimeoutKind },
    MissionChanged { mission: MissionId },
}

/// Lifecycle notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleEvent {
    pub user: UserId,
    pub record: RecordId,
    pub token: Token,
    pub uri: String,
    pub kind: EventKind,
}

impl EventKind {
    /// Events that add or remove a token
    #[inline]
    pub const fn is_registration(&self) -> bool {
        matches!(self, EventKind::Created { .. } | EventKind::Terminated)
    }
}

struct Subscriber {
    tx: flume::Sender<LifecycleEvent>,
    filter: Option<fn(&EventKind) -> bool>,
}

/// Cheaply cloneable publisher handle
#[derive(Clone)]
pub struct EventBus {
    subscribers: Arc<Mutex<Vec<Subscriber>>>,
    capacity: usize,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            subscribers: Arc::new(Mutex::new(Vec::new())),
            capacity,
        }
    }

    /// Bounded subscription. Events are dropped for this subscriber while full.
    pub fn subscribe(&self) -> flume::Receiver<LifecycleEvent> {
        let (tx, rx) = flume::bounded(self.capacity);
        self.subscribers.lock().push(Subscriber { tx, filter: None });
        rx
    }

    /// Subscription that never drops events
    pub fn subscribe_unbounded(&self) -> flume::Receiver<LifecycleEvent> {
        let (tx, rx) = flume::unbounded();
        self.subscribers.lock().push(Subscriber { tx, filter: None });
        rx
    }

    /// Unbounded subscription receiving only events accepted by `filter`
    pub fn subscribe_filtered(&self, filter: fn(&EventKind) -> bool) -> flume::Receiver<LifecycleEvent> {
        let (tx, rx) = flume::unbounded();
        self.subscribers.lock().push(Subscriber {
            tx,
            filter: Some(filter),
        });
        rx
    }

    pub fn publish(&self, event: LifecycleEvent) {
        debug!(
            "Lifecycle event {:?} for record {} ({})",
            event.kind, event.record, event.uri
        );
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|sub| {
            if sub.filter.is_some_and(|accept| !accept(&event.kind)) {
                return !sub.tx.is_disconnected();
            }
            match sub.tx.try_send(event.clone()) {
                Ok(()) => true,
                Err(flume::TrySendError::Full(_)) => {
                    warn!("Event subscriber is full, dropping {:?}", event.kind);
                    true
                }
                Err(flume::TrySendError::Disconnected(_)) => false,
            }
        });
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(crate::core::limits::EVENT_SUBSCRIBER_CAPACITY)
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .field("capacity", &self.capacity)
            .finish()
    }
}
