/*!
 * Connection Record
 * One binding between a caller and a connectable component
 */

use super::state::ConnectionState;
use crate::core::errors::{codes, AbilityError, AbilityResult};
use crate::core::id::{CallbackId, ConnectionId, RecordId, Token};
use crate::core::types::{ElementName, RemoteObject};
use crate::host::{ConnectionHandle, ConnectionNotice, Outbox};
use log::debug;

#[derive(Debug)]
pub struct ConnectionRecord {
    id: ConnectionId,
    caller: Option<Token>,
    target: RecordId,
    handle: ConnectionHandle,
    state: ConnectionState,
}

impl ConnectionRecord {
    pub fn new(id: ConnectionId, caller: Option<Token>, target: RecordId, handle: ConnectionHandle) -> Self {
        Self {
            id,
            caller,
            target,
            handle,
            state: ConnectionState::Connecting,
        }
    }

    #[inline]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    #[inline]
    pub fn caller(&self) -> Option<Token> {
        self.caller
    }

    #[inline]
    pub fn target(&self) -> RecordId {
        self.target
    }

    #[inline]
    pub fn handle(&self) -> &ConnectionHandle {
        &self.handle
    }

    #[inline]
    pub fn callback_id(&self) -> CallbackId {
        self.handle.id
    }

    #[inline]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    #[inline]
    pub fn set_state(&mut self, state: ConnectionState) {
        debug!("Connection {} {} -> {}", self.id, self.state, state);
        self.state = state;
    }

    fn expect(&self, expected: ConnectionState) -> AbilityResult<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(AbilityError::InvalidConnectionState(format!(
                "connection {} is {}, expected {}",
                self.id, self.state, expected
            )))
        }
    }

    /// Connect may only be sent while the binding is still connecting
    pub fn check_connecting(&self) -> AbilityResult<()> {
        self.expect(ConnectionState::Connecting)
    }

    /// Enter DISCONNECTING from CONNECTED
    pub fn begin_disconnect(&mut self) -> AbilityResult<()> {
        self.expect(ConnectionState::Connected)?;
        self.set_state(ConnectionState::Disconnecting);
        Ok(())
    }

    /// Acknowledge a graceful disconnect
    pub fn finish_disconnect(&mut self) -> AbilityResult<()> {
        self.expect(ConnectionState::Disconnecting)?;
        self.set_state(ConnectionState::Disconnected);
        Ok(())
    }

    /// Report the connect outcome to the caller
    pub fn complete_connect(
        &mut self,
        element: ElementName,
        remote: Option<RemoteObject>,
        result: i32,
        outbox: &mut Outbox,
    ) {
        if result == codes::ERR_OK {
            self.set_state(ConnectionState::Connected);
        }
        outbox.connection(
            self.handle.clone(),
            ConnectionNotice::ConnectDone {
                element,
                remote,
                result,
            },
        );
    }

    /// Report the disconnect outcome. A died target reports `result - 1`.
    pub fn complete_disconnect(&mut self, element: ElementName, result: i32, died: bool, outbox: &mut Outbox) {
        if result == codes::ERR_OK {
            self.set_state(ConnectionState::Disconnected);
        }
        let result = if died { result - 1 } else { result };
        outbox.connection(self.handle.clone(), ConnectionNotice::DisconnectDone { element, result });
    }
}
