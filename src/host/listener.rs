/*!
 * Mission Listener
 * Observers of the recent-missions view
 */

use crate::core::id::MissionId;
use serde::{Deserialize, Serialize};

/// Change to a mission reported to listeners
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "notice", content = "mission", rename_all = "snake_case")]
pub enum MissionNotice {
    Created(MissionId),
    Destroyed(MissionId),
    MovedToFront(MissionId),
    LabelUpdated(MissionId),
}

impl MissionNotice {
    #[inline]
    pub const fn mission(&self) -> MissionId {
        match self {
            MissionNotice::Created(id)
            | MissionNotice::Destroyed(id)
            | MissionNotice::MovedToFront(id)
            | MissionNotice::LabelUpdated(id) => *id,
        }
    }
}

pub trait MissionListener: Send + Sync {
    fn on_mission_created(&self, mission: MissionId);

    fn on_mission_destroyed(&self, mission: MissionId);

    fn on_mission_moved_to_front(&self, mission: MissionId);

    fn on_mission_label_updated(&self, mission: MissionId);
}

/// Deliver one notice through the matching listener method
pub(crate) fn notify(listener: &dyn MissionListener, notice: MissionNotice) {
    match notice {
        MissionNotice::Created(id) => listener.on_mission_created(id),
        MissionNotice::Destroyed(id) => listener.on_mission_destroyed(id),
        MissionNotice::MovedToFront(id) => listener.on_mission_moved_to_front(id),
        MissionNotice::LabelUpdated(id) => listener.on_mission_label_updated(id),
    }
}
