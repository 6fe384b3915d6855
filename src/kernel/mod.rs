/*!
 * Kernel Module
 * System UI pages started at boot and restarted whenever they are lost
 */

mod manager;
mod task;

pub use manager::{is_system_ui, KernelAbilityManager};
pub use task::KernelTask;
