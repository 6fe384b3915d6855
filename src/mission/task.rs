/*!
 * Mission Tasks
 * Work items serialized through the mission list manager's task handler
 */

use crate::core::id::RecordId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissionTask {
    LoadTimeout { record: RecordId, event: u64 },
    ForegroundTimeout { record: RecordId, event: u64 },
    BackgroundTimeout { record: RecordId, event: u64 },
    TerminateTimeout { record: RecordId, event: u64 },
    CompleteForeground(RecordId),
    CompleteBackground(RecordId),
    CompleteTerminate(RecordId),
    /// Pop one request off the waiting queue if the top is foreground
    StartWaiting,
    /// Bring the launcher root back to the front
    BackToLauncher,
    AbilityDied(RecordId),
}

impl MissionTask {
    pub fn name(&self) -> &'static str {
        match self {
            MissionTask::LoadTimeout { .. } => "load_timeout",
            MissionTask::ForegroundTimeout { .. } => "foreground_timeout",
            MissionTask::BackgroundTimeout { .. } => "background_timeout",
            MissionTask::TerminateTimeout { .. } => "terminate_timeout",
            MissionTask::CompleteForeground(_) => "complete_foreground",
            MissionTask::CompleteBackground(_) => "complete_background",
            MissionTask::CompleteTerminate(_) => "complete_terminate",
            MissionTask::StartWaiting => "start_waiting",
            MissionTask::BackToLauncher => "back_to_launcher",
            MissionTask::AbilityDied(_) => "ability_died",
        }
    }
}
