/*!
 * Record Arena
 *
 * Owns every component and connection record of a manager. Relations
 * between records are ids; a lookup of a removed id returns `None`.
 */

use super::component::ComponentRecord;
use super::connection::ConnectionRecord;
use super::state::ConnectionState;
use crate::core::id::{ConnectionId, RecordId, Token};
use ahash::HashMap;

#[derive(Debug, Default)]
pub struct RecordArena {
    records: HashMap<RecordId, ComponentRecord>,
    tokens: HashMap<Token, RecordId>,
    connections: HashMap<ConnectionId, ConnectionRecord>,
}

impl RecordArena {
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // Component Records
    // ========================================================================

    pub fn insert(&mut self, record: ComponentRecord) -> RecordId {
        let id = record.id();
        self.tokens.insert(record.token(), id);
        self.records.insert(id, record);
        id
    }

    #[inline]
    pub fn get(&self, id: RecordId) -> Option<&ComponentRecord> {
        self.records.get(&id)
    }

    #[inline]
    pub fn get_mut(&mut self, id: RecordId) -> Option<&mut ComponentRecord> {
        self.records.get_mut(&id)
    }

    #[inline]
    pub fn contains(&self, id: RecordId) -> bool {
        self.records.contains_key(&id)
    }

    #[inline]
    pub fn by_token(&self, token: Token) -> Option<RecordId> {
        self.tokens.get(&token).copied()
    }

    pub fn remove(&mut self, id: RecordId) -> Option<ComponentRecord> {
        let record = self.records.remove(&id)?;
        self.tokens.remove(&record.token());
        Some(record)
    }

    pub fn records(&self) -> impl Iterator<Item = &ComponentRecord> {
        self.records.values()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    // ========================================================================
    // Connection Records
    // ========================================================================

    pub fn insert_connection(&mut self, connection: ConnectionRecord) -> ConnectionId {
        let id = connection.id();
        self.connections.insert(id, connection);
        id
    }

    #[inline]
    pub fn connection(&self, id: ConnectionId) -> Option<&ConnectionRecord> {
        self.connections.get(&id)
    }

    #[inline]
    pub fn connection_mut(&mut self, id: ConnectionId) -> Option<&mut ConnectionRecord> {
        self.connections.get_mut(&id)
    }

    pub fn remove_connection(&mut self, id: ConnectionId) -> Option<ConnectionRecord> {
        self.connections.remove(&id)
    }

    #[inline]
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    fn connections_in(&self, record: RecordId, state: ConnectionState) -> Vec<ConnectionId> {
        self.get(record)
            .map(|r| {
                r.connections()
                    .iter()
                    .copied()
                    .filter(|id| self.connection(*id).is_some_and(|c| c.state() == state))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Connections of `record` still waiting for connect-done
    pub fn connecting_connections(&self, record: RecordId) -> Vec<ConnectionId> {
        self.connections_in(record, ConnectionState::Connecting)
    }

    pub fn first_connecting(&self, record: RecordId) -> Option<ConnectionId> {
        self.connecting_connections(record).into_iter().next()
    }

    pub fn first_disconnecting(&self, record: RecordId) -> Option<ConnectionId> {
        self.connections_in(record, ConnectionState::Disconnecting)
            .into_iter()
            .next()
    }
}
