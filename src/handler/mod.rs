/*!
 * Handler Module
 * Serialized task execution substrate shared by every manager
 */

mod clock;
mod event_loop;
mod key;
mod queue;

pub use clock::{Clock, ManualClock, SystemClock};
pub use event_loop::{EventLoop, LoopCommand};
pub use key::{TimeoutKind, TimerKey};
pub use queue::{TaskDriver, TaskHandler};
