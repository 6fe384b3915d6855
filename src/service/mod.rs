/*!
 * Service Module
 * Per-user routing of inbound calls to the component managers
 */

mod builder;
mod service;
mod session;

pub use builder::ServiceBuilder;
pub use service::{AbilityManagerService, TokenRoute};
pub use session::UserSession;
