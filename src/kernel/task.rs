/*!
 * Kernel Tasks
 * Work items serialized through the kernel ability manager's task handler
 */

use crate::core::id::RecordId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KernelTask {
    LoadTimeout { record: RecordId, event: u64 },
    ForegroundTimeout { record: RecordId, event: u64 },
    CompleteForeground(RecordId),
    /// Start one waiting request once the top is foreground
    DequeueWaiting,
    /// Bring a lost system UI component back, by `bundle:ability` flag
    Restart(String),
}

impl KernelTask {
    pub fn name(&self) -> &'static str {
        match self {
            KernelTask::LoadTimeout { .. } => "load_timeout",
            KernelTask::ForegroundTimeout { .. } => "foreground_timeout",
            KernelTask::CompleteForeground(_) => "complete_foreground",
            KernelTask::DequeueWaiting => "dequeue_waiting",
            KernelTask::Restart(_) => "restart",
        }
    }
}
