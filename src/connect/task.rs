/*!
 * Connect Tasks
 * Work items serialized through the connect manager's task handler
 */

use crate::core::id::{CallbackId, ConnectionId, RecordId};
use crate::core::types::ComponentRequest;

/// Deferred work of the connect manager.
///
/// Timeout tasks carry what they were armed against (event id, start id or
/// connection id). A task whose subject moved on is dropped with a log line.
#[derive(Debug, Clone)]
pub enum ConnectTask {
    LoadTimeout { record: RecordId, event: u64 },
    InactiveTimeout { record: RecordId, event: u64 },
    ConnectTimeout { record: RecordId, connection: ConnectionId },
    CommandTimeout { record: RecordId, start_id: u64 },
    TerminateTimeout { record: RecordId, event: u64 },
    DisconnectTimeout { record: RecordId, connection: ConnectionId },
    /// Deferred start list for a URI outlived its window
    StartQueueExpired(String),
    /// Answer a connection to an already connected service
    CompleteConnect(ConnectionId),
    RestartResident(Box<ComponentRequest>),
    AbilityDied(RecordId),
    CallbackDied(CallbackId),
}

impl ConnectTask {
    /// Short name for logs and spans
    pub fn name(&self) -> &'static str {
        match self {
            ConnectTask::LoadTimeout { .. } => "load_timeout",
            ConnectTask::InactiveTimeout { .. } => "inactive_timeout",
            ConnectTask::ConnectTimeout { .. } => "connect_timeout",
            ConnectTask::CommandTimeout { .. } => "command_timeout",
            ConnectTask::TerminateTimeout { .. } => "terminate_timeout",
            ConnectTask::DisconnectTimeout { .. } => "disconnect_timeout",
            ConnectTask::StartQueueExpired(_) => "start_queue_expired",
            ConnectTask::CompleteConnect(_) => "complete_connect",
            ConnectTask::RestartResident(_) => "restart_resident",
            ConnectTask::AbilityDied(_) => "ability_died",
            ConnectTask::CallbackDied(_) => "callback_died",
        }
    }
}
