/*!
 * Core Module
 * Fundamental types, errors, identifiers and limits
 */

pub mod errors;
pub mod id;
pub mod limits;
pub mod types;

pub use errors::{codes, to_result_code, AbilityError, AbilityResult, StartOutcome};
pub use id::{
    AtomicGenerator, CallbackId, ConnectionId, IdAllocator, IdGenerator, MissionId, RecordId,
    Token, UserId,
};
pub use types::{
    ApplicationInfo, ComponentInfo, ComponentKind, ComponentRequest, ElementName, LaunchMode,
    RemoteObject, Want,
};
