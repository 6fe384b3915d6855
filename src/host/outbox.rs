/*!
 * Outbox
 *
 * Effects collected while a manager holds its registry lock and issued by
 * the [`Dispatcher`] after the lock is released. No collaborator is ever
 * called with a manager lock held.
 */

use super::listener::{notify, MissionListener, MissionNotice};
use super::scheduler::{AbilityScheduler, AppCall, AppScheduler, ConnectionHandle, Transaction};
use super::window::WindowManager;
use crate::core::id::Token;
use crate::core::types::{ElementName, RemoteObject};
use crate::events::{EventBus, LifecycleEvent};
use log::warn;
use std::fmt;
use std::sync::Arc;

/// Completion delivered to a connection callback
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionNotice {
    ConnectDone {
        element: ElementName,
        remote: Option<RemoteObject>,
        result: i32,
    },
    DisconnectDone {
        element: ElementName,
        result: i32,
    },
}

/// Best-effort window request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WindowCall {
    StartingWindow { token: Token, element: ElementName },
    Transition { from: Option<Token>, to: Token },
}

/// One deferred effect
pub enum Outbound {
    App(AppCall),
    Ability {
        scheduler: Arc<dyn AbilityScheduler>,
        token: Token,
        transaction: Transaction,
    },
    Connection {
        handle: ConnectionHandle,
        notice: ConnectionNotice,
    },
    Window(WindowCall),
    Mission {
        listener: Arc<dyn MissionListener>,
        notice: MissionNotice,
    },
    Event(LifecycleEvent),
}

impl fmt::Debug for Outbound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outbound::App(call) => f.debug_tuple("App").field(call).finish(),
            Outbound::Ability {
                token, transaction, ..
            } => f
                .debug_struct("Ability")
                .field("token", token)
                .field("transaction", transaction)
                .finish(),
            Outbound::Connection { handle, notice } => f
                .debug_struct("Connection")
                .field("handle", handle)
                .field("notice", notice)
                .finish(),
            Outbound::Window(call) => f.debug_tuple("Window").field(call).finish(),
            Outbound::Mission { notice, .. } => f.debug_tuple("Mission").field(notice).finish(),
            Outbound::Event(event) => f.debug_tuple("Event").field(event).finish(),
        }
    }
}

/// Effects accumulated during one locked operation
#[derive(Debug, Default)]
pub struct Outbox {
    items: Vec<Outbound>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn app(&mut self, call: AppCall) {
        self.items.push(Outbound::App(call));
    }

    #[inline]
    pub fn ability(&mut self, scheduler: Arc<dyn AbilityScheduler>, token: Token, transaction: Transaction) {
        self.items.push(Outbound::Ability {
            scheduler,
            token,
            transaction,
        });
    }

    #[inline]
    pub fn connection(&mut self, handle: ConnectionHandle, notice: ConnectionNotice) {
        self.items.push(Outbound::Connection { handle, notice });
    }

    #[inline]
    pub fn window(&mut self, call: WindowCall) {
        self.items.push(Outbound::Window(call));
    }

    #[inline]
    pub fn mission(&mut self, listener: Arc<dyn MissionListener>, notice: MissionNotice) {
        self.items.push(Outbound::Mission { listener, notice });
    }

    #[inline]
    pub fn event(&mut self, event: LifecycleEvent) {
        self.items.push(Outbound::Event(event));
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn items(&self) -> &[Outbound] {
        &self.items
    }
}

/// Issues collected effects to the collaborators
#[derive(Clone)]
pub struct Dispatcher {
    app: Arc<dyn AppScheduler>,
    window: Arc<dyn WindowManager>,
    bus: EventBus,
}

impl Dispatcher {
    pub fn new(app: Arc<dyn AppScheduler>, window: Arc<dyn WindowManager>, bus: EventBus) -> Self {
        Self { app, window, bus }
    }

    #[inline]
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    #[inline]
    pub fn window_manager(&self) -> &Arc<dyn WindowManager> {
        &self.window
    }

    /// Issue every effect in order
    pub fn flush(&self, outbox: Outbox) {
        for item in outbox.items {
            match item {
                Outbound::App(call) => self.app.submit(call),
                Outbound::Ability {
                    scheduler,
                    token,
                    transaction,
                } => scheduler.schedule(token, transaction),
                Outbound::Connection { handle, notice } => match notice {
                    ConnectionNotice::ConnectDone {
                        element,
                        remote,
                        result,
                    } => handle.callback.on_connect_done(&element, remote, result),
                    ConnectionNotice::DisconnectDone { element, result } => {
                        handle.callback.on_disconnect_done(&element, result)
                    }
                },
                Outbound::Window(call) => {
                    let outcome = match &call {
                        WindowCall::StartingWindow { token, element } => {
                            self.window.show_starting_window(*token, element)
                        }
                        WindowCall::Transition { from, to } => self.window.animate_transition(*from, *to),
                    };
                    if let Err(e) = outcome {
                        warn!("Window call {:?} failed: {}", call, e);
                    }
                }
                Outbound::Mission { listener, notice } => notify(listener.as_ref(), notice),
                Outbound::Event(event) => self.bus.publish(event),
            }
        }
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher").field("bus", &self.bus).finish()
    }
}
