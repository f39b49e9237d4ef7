// ── Events emitted by a connection ──
//
// Inbound protocol messages and the synthetic lifecycle events layered on
// top of them share one event type so listeners can be keyed uniformly.

use std::sync::Arc;

use serde_json::Value;
use strum::{Display, EnumString};

use crate::protocol::ServerMessage;

/// Name of an event a listener can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "camelCase")]
pub enum EventKind {
    Connected,
    Disconnected,
    Ready,
    Nosub,
    Added,
    Changed,
    Removed,
    Result,
    Updated,
    Error,
    Ping,
    Pong,
    Failed,
    Login,
    LoginResume,
    Logout,
    ClientReady,
}

/// A single emitted event.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// A message received from the server.
    Message(ServerMessage),
    /// The transport closed after the session was established.
    Disconnected,
    /// A login method call succeeded; carries the method result.
    Login(Value),
    /// A resume-token login succeeded; carries the method result.
    LoginResume(Value),
    /// The logout method call succeeded.
    Logout,
    /// Post-connect housekeeping finished; subscriptions are being restarted.
    ClientReady,
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Message(msg) => msg.kind(),
            Self::Disconnected => EventKind::Disconnected,
            Self::Login(_) => EventKind::Login,
            Self::LoginResume(_) => EventKind::LoginResume,
            Self::Logout => EventKind::Logout,
            Self::ClientReady => EventKind::ClientReady,
        }
    }

    /// The wrapped server message, if this event came off the wire.
    pub fn message(&self) -> Option<&ServerMessage> {
        match self {
            Self::Message(msg) => Some(msg),
            _ => None,
        }
    }
}

impl From<ServerMessage> for Event {
    fn from(msg: ServerMessage) -> Self {
        Self::Message(msg)
    }
}

impl ServerMessage {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Connected { .. } => EventKind::Connected,
            Self::Failed { .. } => EventKind::Failed,
            Self::Ping { .. } => EventKind::Ping,
            Self::Pong { .. } => EventKind::Pong,
            Self::Added { .. } => EventKind::Added,
            Self::Changed { .. } => EventKind::Changed,
            Self::Removed { .. } => EventKind::Removed,
            Self::Ready { .. } => EventKind::Ready,
            Self::Nosub { .. } => EventKind::Nosub,
            Self::Result { .. } => EventKind::Result,
            Self::Updated { .. } => EventKind::Updated,
            Self::Error { .. } => EventKind::Error,
        }
    }
}

/// An event queued for delivery, tagged with the caller that emitted it.
///
/// `origin` lets a caller recognise the echo of its own synthetic events,
/// e.g. the `removed` messages produced while clearing local data.
#[derive(Debug, Clone)]
pub struct Emission {
    pub event: Arc<Event>,
    pub origin: Option<String>,
}

impl Emission {
    pub fn new(event: Event, origin: Option<String>) -> Self {
        Self {
            event: Arc::new(event),
            origin,
        }
    }
}
