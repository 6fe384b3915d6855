/*!
 * Connect Module
 * Services and extensions: start, stop, connect, disconnect
 */

mod manager;
mod task;

pub use manager::ConnectManager;
pub use task::ConnectTask;
