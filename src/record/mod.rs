/*!
 * Record Module
 * Component and connection records and the arena that owns them
 */

mod arena;
mod caller;
mod component;
mod connection;
mod state;

pub use arena::RecordArena;
pub use caller::{CallerRecord, ComponentResult};
pub use component::{ComponentRecord, RecordSnapshot};
pub use connection::ConnectionRecord;
pub use state::{AbilityState, ConnectionState, LifecycleState};
