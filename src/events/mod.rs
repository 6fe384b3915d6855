/*!
 * Events Module
 * Lifecycle notifications published by the managers
 */

mod bus;

pub use bus::{EventBus, EventKind, LifecycleEvent, ManagerKind};
