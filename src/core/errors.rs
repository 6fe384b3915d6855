/*!
 * Error Types
 * Centralized error handling with thiserror, miette, and serde support
 *
 * Every fallible kernel operation returns [`AbilityError`]. The transport
 * layer only understands integer result codes, so each variant maps onto a
 * stable code through [`AbilityError::result_code`].
 */

use super::id::{CallbackId, MissionId, RecordId, Token, UserId};
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// Result Codes
// ============================================================================

/// Integer result codes handed back to the transport layer
pub mod codes {
    /// Offset of the ability-manager error range
    pub const SERVICE_ERR_OFFSET: i32 = 2_097_152;

    pub const ERR_OK: i32 = 0;
    pub const ERR_INVALID_VALUE: i32 = 22;
    /// Synthetic result delivered to callers superseded by a newer caller
    pub const CANCELED: i32 = -1;

    pub const RESOLVE_ABILITY_ERR: i32 = SERVICE_ERR_OFFSET;
    pub const RESOLVE_APP_ERR: i32 = SERVICE_ERR_OFFSET + 3;
    pub const START_ABILITY_WAITING: i32 = SERVICE_ERR_OFFSET + 9;
    pub const TERMINATE_LAUNCHER_DENIED: i32 = SERVICE_ERR_OFFSET + 10;
    pub const CONNECTION_NOT_EXIST: i32 = SERVICE_ERR_OFFSET + 11;
    pub const INVALID_CONNECTION_STATE: i32 = SERVICE_ERR_OFFSET + 12;
    pub const LOAD_ABILITY_TIMEOUT: i32 = SERVICE_ERR_OFFSET + 13;
    pub const CONNECTION_TIMEOUT: i32 = SERVICE_ERR_OFFSET + 14;
    pub const REMOVE_MISSION_FAILED: i32 = SERVICE_ERR_OFFSET + 19;
    pub const INNER_ERR: i32 = SERVICE_ERR_OFFSET + 20;
    pub const TARGET_ABILITY_NOT_SERVICE: i32 = SERVICE_ERR_OFFSET + 26;
    pub const MOVE_MISSION_FAILED: i32 = SERVICE_ERR_OFFSET + 29;
    pub const MISSION_NOT_FOUND: i32 = SERVICE_ERR_OFFSET + 31;
    pub const LOCK_MISSION_DENIED: i32 = SERVICE_ERR_OFFSET + 32;
    pub const LOAD_ABILITY_FAILED: i32 = SERVICE_ERR_OFFSET + 33;
    pub const USER_NOT_EXIST: i32 = SERVICE_ERR_OFFSET + 34;
}

/// Marker returned by start operations that were queued rather than executed
pub const START_ABILITY_WAITING: i32 = codes::START_ABILITY_WAITING;

// ============================================================================
// Ability Errors
// ============================================================================

/// Ability-manager errors with serialization support
#[derive(Error, Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Diagnostic)]
#[serde(tag = "error_type", content = "details", rename_all = "snake_case")]
pub enum AbilityError {
    #[error("Invalid argument: {0}")]
    #[diagnostic(
        code(ability::invalid_value),
        help("The request is missing a required field or names an unknown component.")
    )]
    InvalidValue(String),

    #[error("Token {0} does not belong to a live record")]
    #[diagnostic(
        code(ability::unknown_token),
        help("The record may have terminated already. Tokens are never reused.")
    )]
    UnknownToken(Token),

    #[error("Record {0} not found")]
    #[diagnostic(
        code(ability::record_not_found),
        help("The record was removed from every registry before the request arrived.")
    )]
    RecordNotFound(RecordId),

    #[error("Record {record} is {actual}, expected {expected}")]
    #[diagnostic(
        code(ability::invalid_state),
        help("A transition callback arrived out of order. The hosted process violated the lifecycle protocol.")
    )]
    InvalidState {
        record: RecordId,
        expected: String,
        actual: String,
    },

    #[error("Connection callback {0} has no live connection")]
    #[diagnostic(
        code(ability::connect::not_exist),
        help("The callback was never connected or its connections were already removed.")
    )]
    ConnectionNotExist(CallbackId),

    #[error("Connection is in an invalid state: {0}")]
    #[diagnostic(
        code(ability::connect::invalid_state),
        help("The connection cannot move from its current state.")
    )]
    InvalidConnectionState(String),

    #[error("Component {0} is not a service")]
    #[diagnostic(
        code(ability::connect::not_service),
        help("Only service and extension components can be connected or stopped.")
    )]
    NotService(String),

    #[error("Loading {0} failed")]
    #[diagnostic(
        code(ability::load_failed),
        help("The root launcher exhausted its restart budget or the application info is incomplete.")
    )]
    LoadFailed(String),

    #[error("Terminating the launcher root is not allowed")]
    #[diagnostic(
        code(ability::mission::terminate_launcher_denied),
        help("The launcher root is restarted on death instead of being terminated.")
    )]
    TerminateLauncherDenied,

    #[error("Mission {0} not found")]
    #[diagnostic(
        code(ability::mission::not_found),
        help("The mission was cleared or never existed for this user.")
    )]
    MissionNotFound(MissionId),

    #[error("Mission {0} is locked")]
    #[diagnostic(
        code(ability::mission::locked),
        help("Unlock the mission before clearing it.")
    )]
    MissionLocked(MissionId),

    #[error("Moving mission {0} failed")]
    #[diagnostic(
        code(ability::mission::move_failed),
        help("The mission has no owning list or no record.")
    )]
    MoveMissionFailed(MissionId),

    #[error("Resolving {0} failed")]
    #[diagnostic(
        code(ability::resolve_failed),
        help("The bundle resolver does not know this component for the requested user.")
    )]
    ResolveFailed(String),

    #[error("User {0} has no session")]
    #[diagnostic(
        code(ability::service::user_not_exist),
        help("Call init_user before routing requests for this user.")
    )]
    UserNotFound(UserId),

    #[error("Internal error: {0}")]
    #[diagnostic(code(ability::internal), help("Check the logs for details."))]
    Internal(String),
}

impl AbilityError {
    /// Integer code reported to the transport layer
    #[must_use]
    pub fn result_code(&self) -> i32 {
        match self {
            AbilityError::InvalidValue(_)
            | AbilityError::UnknownToken(_)
            | AbilityError::RecordNotFound(_)
            | AbilityError::InvalidState { .. } => codes::ERR_INVALID_VALUE,
            AbilityError::ConnectionNotExist(_) => codes::CONNECTION_NOT_EXIST,
            AbilityError::InvalidConnectionState(_) => codes::INVALID_CONNECTION_STATE,
            AbilityError::NotService(_) => codes::TARGET_ABILITY_NOT_SERVICE,
            AbilityError::LoadFailed(_) => codes::LOAD_ABILITY_FAILED,
            AbilityError::TerminateLauncherDenied => codes::TERMINATE_LAUNCHER_DENIED,
            AbilityError::MissionNotFound(_) => codes::MISSION_NOT_FOUND,
            AbilityError::MissionLocked(_) => codes::LOCK_MISSION_DENIED,
            AbilityError::MoveMissionFailed(_) => codes::MOVE_MISSION_FAILED,
            AbilityError::ResolveFailed(_) => codes::RESOLVE_ABILITY_ERR,
            AbilityError::UserNotFound(_) => codes::USER_NOT_EXIST,
            AbilityError::Internal(_) => codes::INNER_ERR,
        }
    }

    pub(crate) fn invalid_state(
        record: RecordId,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        AbilityError::InvalidState {
            record,
            expected: expected.into(),
            actual: actual.into(),
        }
    }
}

/// Result type for ability-manager operations
pub type AbilityResult<T> = Result<T, AbilityError>;

/// Outcome of a start request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartOutcome {
    /// The request was applied to a record
    Started,
    /// The request was parked until the current transition settles
    Waiting,
}

impl StartOutcome {
    #[inline]
    #[must_use]
    pub const fn result_code(self) -> i32 {
        match self {
            StartOutcome::Started => codes::ERR_OK,
            StartOutcome::Waiting => codes::START_ABILITY_WAITING,
        }
    }
}

/// Collapse a typed result into the transport's integer code
#[inline]
pub fn to_result_code<T>(result: &AbilityResult<T>) -> i32 {
    match result {
        Ok(_) => codes::ERR_OK,
        Err(e) => e.result_code(),
    }
}
