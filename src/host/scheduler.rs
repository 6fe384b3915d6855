/*!
 * Hosted-Process Interfaces
 *
 * Outbound calls toward application processes. All calls are fire-and-forget;
 * completions come back later as separate inbound operations.
 */

use crate::core::id::{CallbackId, Token};
use crate::core::types::{ApplicationInfo, ComponentInfo, ElementName, RemoteObject, Want};
use crate::record::{AbilityState, LifecycleState};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Request to the application-process manager
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "call", rename_all = "snake_case")]
pub enum AppCall {
    /// Spawn or reuse a process and load the component
    LoadAbility {
        token: Token,
        pre_token: Option<Token>,
        info: ComponentInfo,
        app: ApplicationInfo,
        want: Want,
    },
    MoveToForeground {
        token: Token,
    },
    MoveToBackground {
        token: Token,
    },
    TerminateAbility {
        token: Token,
    },
    UpdateState {
        token: Token,
        state: AbilityState,
    },
    /// Start bookkeeping hint, sent after every start
    AbilityBehaviorAnalysis {
        token: Token,
        pre_token: Option<Token>,
    },
    /// The component never attached in time
    AttachTimeOut {
        token: Token,
    },
    PrepareTerminate {
        token: Token,
    },
    /// Deliver a component result to the caller that started it
    SendResult {
        caller: Token,
        request_code: i32,
        result_code: i32,
        want: Want,
    },
    /// Tear down every process of `bundle`
    KillProcess {
        bundle: String,
    },
}

impl AppCall {
    /// Record the call concerns, if any
    #[must_use]
    pub fn token(&self) -> Option<Token> {
        match self {
            AppCall::LoadAbility { token, .. }
            | AppCall::MoveToForeground { token }
            | AppCall::MoveToBackground { token }
            | AppCall::TerminateAbility { token }
            | AppCall::UpdateState { token, .. }
            | AppCall::AbilityBehaviorAnalysis { token, .. }
            | AppCall::AttachTimeOut { token }
            | AppCall::PrepareTerminate { token } => Some(*token),
            AppCall::SendResult { caller, .. } => Some(*caller),
            AppCall::KillProcess { .. } => None,
        }
    }
}

/// Request to a single attached component
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "transaction", rename_all = "snake_case")]
pub enum Transaction {
    Lifecycle { want: Want, target: LifecycleState },
    Connect { want: Want },
    Disconnect { want: Want },
    Command { want: Want, restart: bool, start_id: u64 },
}

/// Application-process manager
pub trait AppScheduler: Send + Sync {
    fn submit(&self, call: AppCall);
}

/// Scheduler handle a component hands over when it attaches
pub trait AbilityScheduler: Send + Sync {
    fn schedule(&self, token: Token, transaction: Transaction);
}

/// Caller-side connection observer
pub trait ConnectionCallback: Send + Sync {
    fn on_connect_done(&self, element: &ElementName, remote: Option<RemoteObject>, result: i32);

    fn on_disconnect_done(&self, element: &ElementName, result: i32);
}

/// Connection callback together with its transport identity
#[derive(Clone)]
pub struct ConnectionHandle {
    pub id: CallbackId,
    pub callback: Arc<dyn ConnectionCallback>,
}

impl ConnectionHandle {
    pub fn new(id: CallbackId, callback: Arc<dyn ConnectionCallback>) -> Self {
        Self { id, callback }
    }
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle").field("id", &self.id).finish()
    }
}
