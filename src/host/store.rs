/*!
 * Mission Info Store
 * Key-value persistence of mission snapshots, keyed by mission id
 */

use crate::core::errors::{AbilityError, AbilityResult};
use crate::core::id::MissionId;
use crate::core::types::Want;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, TimestampMilliSeconds};
use time::OffsetDateTime;

/// Running state recorded for a mission whose component is gone
pub const MISSION_NOT_RUNNING: i32 = -1;

/// Persisted view of one mission
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InnerMissionInfo {
    pub mission_id: MissionId,
    pub name: String,
    pub label: String,
    pub want: Want,
    pub running_state: i32,
    pub locked: bool,
    #[serde_as(as = "TimestampMilliSeconds<i64>")]
    pub time: OffsetDateTime,
}

impl InnerMissionInfo {
    pub fn new(mission_id: MissionId, name: impl Into<String>, want: Want) -> Self {
        Self {
            mission_id,
            name: name.into(),
            label: String::new(),
            want,
            running_state: 0,
            locked: false,
            time: OffsetDateTime::now_utc(),
        }
    }
}

/// External mission persistence
pub trait MissionInfoStore: Send + Sync {
    fn put(&self, info: &InnerMissionInfo) -> AbilityResult<()>;

    fn get(&self, mission: MissionId) -> AbilityResult<Option<InnerMissionInfo>>;

    fn delete(&self, mission: MissionId) -> AbilityResult<()>;

    fn list(&self) -> AbilityResult<Vec<InnerMissionInfo>>;

    /// Read-modify-write of one entry. Missing entries are skipped.
    fn update(
        &self,
        mission: MissionId,
        f: &mut dyn FnMut(&mut InnerMissionInfo),
    ) -> AbilityResult<()> {
        if let Some(mut info) = self.get(mission)? {
            f(&mut info);
            self.put(&info)?;
        }
        Ok(())
    }
}

/// Store holding bincode-encoded snapshots in memory
#[derive(Debug, Default)]
pub struct InMemoryMissionStore {
    entries: DashMap<MissionId, Vec<u8>>,
}

impl InMemoryMissionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn encode(info: &InnerMissionInfo) -> AbilityResult<Vec<u8>> {
    bincode::serialize(info).map_err(|e| AbilityError::Internal(format!("encode mission: {}", e)))
}

fn decode(bytes: &[u8]) -> AbilityResult<InnerMissionInfo> {
    bincode::deserialize(bytes).map_err(|e| AbilityError::Internal(format!("decode mission: {}", e)))
}

impl MissionInfoStore for InMemoryMissionStore {
    fn put(&self, info: &InnerMissionInfo) -> AbilityResult<()> {
        self.entries.insert(info.mission_id, encode(info)?);
        Ok(())
    }

    fn get(&self, mission: MissionId) -> AbilityResult<Option<InnerMissionInfo>> {
        match self.entries.get(&mission) {
            Some(bytes) => decode(bytes.value()).map(Some),
            None => Ok(None),
        }
    }

    fn delete(&self, mission: MissionId) -> AbilityResult<()> {
        self.entries.remove(&mission);
        Ok(())
    }

    fn list(&self) -> AbilityResult<Vec<InnerMissionInfo>> {
        let mut infos = self
            .entries
            .iter()
            .map(|entry| decode(entry.value()))
            .collect::<AbilityResult<Vec<_>>>()?;
        infos.sort_by_key(|info| info.mission_id);
        Ok(infos)
    }
}
