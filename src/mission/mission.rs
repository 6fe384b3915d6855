/*!
 * Missions
 * A mission pairs one page record with its entry in the recents view.
 * Mission lists order missions most-recent first.
 */

use crate::core::id::{MissionId, RecordId};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;

/// Identity of a mission list inside one manager
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ListId(pub u64);

impl fmt::Display for ListId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ListKind {
    /// Home screen; holds the launcher root
    Launcher,
    /// Parking list for standard missions popped off a current list
    DefaultStandard,
    /// Parking list for singleton missions popped off a current list
    DefaultSingle,
    /// A list created for a task
    Current,
}

impl ListKind {
    #[inline]
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            ListKind::Launcher => "LAUNCHER",
            ListKind::DefaultStandard => "DEFAULT_STANDARD",
            ListKind::DefaultSingle => "DEFAULT_SINGLE",
            ListKind::Current => "CURRENT",
        }
    }

    #[inline]
    pub const fn is_default(&self) -> bool {
        matches!(self, ListKind::DefaultStandard | ListKind::DefaultSingle)
    }
}

/// Singleton missions are named `bundle:ability`, standard ones by bundle
pub fn mission_name(bundle: &str, ability: &str, singleton: bool) -> String {
    if singleton {
        format!("{}:{}", bundle, ability)
    } else {
        bundle.to_string()
    }
}

#[derive(Debug, Clone)]
pub struct Mission {
    pub id: MissionId,
    pub record: Option<RecordId>,
    pub name: String,
    pub singleton: bool,
    pub locked: bool,
    /// Set while a move-to-front waits for its foreground to finish
    pub moving: bool,
    pub list: Option<ListId>,
}

impl Mission {
    pub fn new(id: MissionId, record: RecordId, name: impl Into<String>, singleton: bool) -> Self {
        Self {
            id,
            record: Some(record),
            name: name.into(),
            singleton,
            locked: false,
            moving: false,
            list: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MissionList {
    id: ListId,
    kind: ListKind,
    missions: VecDeque<MissionId>,
}

impl MissionList {
    pub fn new(id: ListId, kind: ListKind) -> Self {
        Self {
            id,
            kind,
            missions: VecDeque::new(),
        }
    }

    #[inline]
    pub fn id(&self) -> ListId {
        self.id
    }

    #[inline]
    pub fn kind(&self) -> ListKind {
        self.kind
    }

    /// Move `mission` to the front, inserting it if absent
    pub fn add_to_top(&mut self, mission: MissionId) {
        if self.missions.front() == Some(&mission) {
            return;
        }
        self.missions.retain(|m| *m != mission);
        self.missions.push_front(mission);
    }

    pub fn remove(&mut self, mission: MissionId) -> bool {
        let before = self.missions.len();
        self.missions.retain(|m| *m != mission);
        before != self.missions.len()
    }

    #[inline]
    pub fn top(&self) -> Option<MissionId> {
        self.missions.front().copied()
    }

    #[inline]
    pub fn contains(&self, mission: MissionId) -> bool {
        self.missions.contains(&mission)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.missions.is_empty()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.missions.len()
    }

    /// Missions from top to bottom
    pub fn missions(&self) -> impl Iterator<Item = MissionId> + '_ {
        self.missions.iter().copied()
    }
}
