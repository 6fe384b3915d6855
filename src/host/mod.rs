/*!
 * Host Module
 * Collaborator interfaces injected into the managers
 */

mod bundle;
mod listener;
mod outbox;
mod scheduler;
mod store;
mod window;

pub use bundle::{BundleResolver, ResolvedComponent};
pub use listener::{MissionListener, MissionNotice};
pub use outbox::{ConnectionNotice, Dispatcher, Outbound, Outbox, WindowCall};
pub use scheduler::{
    AbilityScheduler, AppCall, AppScheduler, ConnectionCallback, ConnectionHandle, Transaction,
};
pub use store::{InMemoryMissionStore, InnerMissionInfo, MissionInfoStore, MISSION_NOT_RUNNING};
pub use window::{NoopWindowManager, WindowManager};
