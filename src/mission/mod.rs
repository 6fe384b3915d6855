/*!
 * Mission Module
 * Page components grouped into missions and ordered for the foreground
 */

mod manager;
mod mission;
mod task;

pub use manager::MissionListManager;
pub use mission::{mission_name, ListId, ListKind, Mission, MissionList};
pub use task::MissionTask;
