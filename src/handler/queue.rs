/*!
 * Task Handler
 * Deterministic single-consumer queue of immediate and delayed tasks
 *
 * Ordering:
 * - Tasks run in deadline order, ties broken by submission order
 * - Immediate tasks use the current time as their deadline
 * - A keyed task replaces any pending task with the same key
 */

use super::clock::{Clock, SystemClock};
use super::key::TimerKey;
use ahash::HashMap;
use parking_lot::{Mutex, MutexGuard};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

type Slot = (Duration, u64);

struct Entry<T> {
    key: Option<TimerKey>,
    task: T,
}

struct QueueInner<T> {
    seq: u64,
    entries: BTreeMap<Slot, Entry<T>>,
    keyed: HashMap<TimerKey, Slot>,
}

impl<T> QueueInner<T> {
    fn remove_key(&mut self, key: &TimerKey) -> Option<T> {
        let slot = self.keyed.remove(key)?;
        self.entries.remove(&slot).map(|e| e.task)
    }
}

/// Serialized task queue owned by one manager
pub struct TaskHandler<T> {
    clock: Arc<dyn Clock>,
    inner: Mutex<QueueInner<T>>,
    drain: Mutex<()>,
    notify: Notify,
}

impl<T> TaskHandler<T> {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            inner: Mutex::new(QueueInner {
                seq: 0,
                entries: BTreeMap::new(),
                keyed: HashMap::default(),
            }),
            drain: Mutex::new(()),
            notify: Notify::new(),
        }
    }

    /// Queue driven by the wall clock
    pub fn with_system_clock() -> Self {
        Self::new(Arc::new(SystemClock::new()))
    }

    #[inline]
    pub fn now(&self) -> Duration {
        self.clock.now()
    }

    /// Queue a task to run as soon as the consumer gets to it
    pub fn post(&self, task: T) {
        self.insert(None, task, Duration::ZERO);
    }

    /// Queue a cancellable task after `delay`, replacing any task under `key`
    pub fn post_delayed(&self, key: TimerKey, task: T, delay: Duration) {
        self.insert(Some(key), task, delay);
    }

    fn insert(&self, key: Option<TimerKey>, task: T, delay: Duration) {
        let deadline = self.clock.now() + delay;
        {
            let mut inner = self.inner.lock();
            if let Some(ref key) = key {
                if inner.remove_key(key).is_some() {
                    log::debug!("Replacing pending task {}", key);
                }
            }
            inner.seq += 1;
            let slot = (deadline, inner.seq);
            if let Some(ref key) = key {
                inner.keyed.insert(key.clone(), slot);
            }
            inner.entries.insert(slot, Entry { key, task });
        }
        self.notify.notify_one();
    }

    /// Drop the pending task under `key`. Returns whether one was pending.
    pub fn cancel(&self, key: &TimerKey) -> bool {
        let removed = self.inner.lock().remove_key(key).is_some();
        if removed {
            log::trace!("Cancelled task {}", key);
        }
        removed
    }

    #[inline]
    pub fn contains(&self, key: &TimerKey) -> bool {
        self.inner.lock().keyed.contains_key(key)
    }

    /// Pop the earliest task whose deadline has passed
    pub fn pop_ready(&self) -> Option<T> {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        let slot = *inner.entries.keys().next()?;
        if slot.0 > now {
            return None;
        }
        let entry = inner.entries.remove(&slot)?;
        if let Some(key) = entry.key {
            inner.keyed.remove(&key);
        }
        Some(entry.task)
    }

    /// Deadline of the earliest pending task
    pub fn next_deadline(&self) -> Option<Duration> {
        self.inner.lock().entries.keys().next().map(|slot| slot.0)
    }

    /// Time left until the earliest pending task is due
    pub fn time_until_next(&self) -> Option<Duration> {
        let deadline = self.next_deadline()?;
        Some(deadline.saturating_sub(self.clock.now()))
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }

    /// Keys of every pending delayed task, earliest first
    pub fn pending_keys(&self) -> Vec<TimerKey> {
        self.inner
            .lock()
            .entries
            .values()
            .filter_map(|e| e.key.clone())
            .collect()
    }

    /// Drop everything
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.keyed.clear();
    }

    /// Exclusive right to run tasks. `None` while another drainer is active.
    #[inline]
    pub fn try_drain(&self) -> Option<MutexGuard<'_, ()>> {
        self.drain.try_lock()
    }

    /// Resolves after the next post
    pub async fn notified(&self) {
        self.notify.notified().await;
    }
}

/// Owner of a [`TaskHandler`] that knows how to run its tasks
pub trait TaskDriver: Send + Sync + 'static {
    type Task: Send + 'static;

    fn handler(&self) -> &TaskHandler<Self::Task>;

    fn run_task(&self, task: Self::Task);

    /// Run every task that is due, one at a time. Returns how many ran.
    fn run_pending(&self) -> usize {
        let handler = self.handler();
        let Some(_guard) = handler.try_drain() else {
            return 0;
        };
        let mut ran = 0;
        while let Some(task) = handler.pop_ready() {
            self.run_task(task);
            ran += 1;
        }
        ran
    }
}
