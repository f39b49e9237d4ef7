//! DDP wire messages.
//!
//! Every frame on the wire is a JSON object discriminated by its `msg`
//! field. [`ClientMessage`] covers what this client sends and
//! [`ServerMessage`] covers what it understands from the server. Optional
//! or malformed fields on inbound messages are treated as absent instead of
//! failing the whole frame.

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Protocol version announced in the `connect` handshake.
pub const DDP_VERSION: &str = "1";

/// Generate a fresh correlation id for a method call or subscription.
pub fn generate_id() -> String {
    Uuid::new_v4().simple().to_string()
}

// ── Client → server ──────────────────────────────────────────────────

/// A request sent from the client to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "msg", rename_all = "lowercase")]
pub enum ClientMessage {
    /// Session handshake, sent as soon as the transport opens.
    Connect {
        version: String,
        support: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session: Option<String>,
    },
    /// Remote method invocation.
    Method {
        id: String,
        method: String,
        params: Vec<Value>,
    },
    /// Publication subscription.
    Sub {
        id: String,
        name: String,
        params: Vec<Value>,
    },
    /// Subscription teardown.
    Unsub { id: String },
    /// Keepalive answer to a server `ping`.
    Pong {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },
}

impl ClientMessage {
    /// Build the handshake for `version`, resuming `session` when present.
    pub fn connect(version: &str, session: Option<String>) -> Self {
        Self::Connect {
            version: version.to_owned(),
            support: vec![version.to_owned()],
            session,
        }
    }

    /// Correlation id carried by this request, if any.
    pub fn id(&self) -> Option<&str> {
        match self {
            Self::Method { id, .. } | Self::Sub { id, .. } | Self::Unsub { id } => Some(id),
            Self::Pong { id } => id.as_deref(),
            Self::Connect { .. } => None,
        }
    }
}

// ── Server → client ──────────────────────────────────────────────────

/// A message received from the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "msg", rename_all = "lowercase")]
pub enum ServerMessage {
    /// Handshake accepted.
    Connected {
        #[serde(default, deserialize_with = "lenient")]
        session: Option<String>,
    },
    /// Handshake refused; the server proposes another version.
    Failed {
        #[serde(default, deserialize_with = "lenient")]
        version: Option<String>,
    },
    /// Server keepalive.
    Ping {
        #[serde(default, deserialize_with = "lenient")]
        id: Option<String>,
    },
    /// Answer to a client keepalive.
    Pong {
        #[serde(default, deserialize_with = "lenient")]
        id: Option<String>,
    },
    /// A document entered a collection.
    Added {
        collection: String,
        #[serde(default)]
        id: Value,
        #[serde(default, deserialize_with = "lenient")]
        fields: Option<Map<String, Value>>,
    },
    /// Fields of a document were set or cleared.
    Changed {
        collection: String,
        #[serde(default)]
        id: Value,
        #[serde(default, deserialize_with = "lenient")]
        fields: Option<Map<String, Value>>,
        #[serde(default, deserialize_with = "lenient")]
        cleared: Option<Vec<String>>,
    },
    /// A document left a collection.
    Removed {
        collection: String,
        #[serde(default)]
        id: Value,
    },
    /// One or more subscriptions delivered their initial data.
    Ready {
        #[serde(default, deserialize_with = "lenient")]
        subs: Vec<String>,
    },
    /// A subscription ended, possibly with an error.
    Nosub {
        id: String,
        #[serde(default, deserialize_with = "lenient")]
        error: Option<RemoteError>,
    },
    /// Outcome of a method call.
    Result {
        id: String,
        #[serde(default, deserialize_with = "lenient")]
        error: Option<RemoteError>,
        #[serde(default)]
        result: Option<Value>,
    },
    /// Writes performed by the listed methods are reflected in the data.
    Updated {
        #[serde(default, deserialize_with = "lenient")]
        methods: Vec<String>,
    },
    /// Protocol-level error reported by the server.
    Error {
        #[serde(default, deserialize_with = "lenient")]
        reason: Option<String>,
        #[serde(
            default,
            rename = "offendingMessage",
            skip_serializing_if = "Option::is_none"
        )]
        offending_message: Option<Value>,
    },
}

/// Deserialize a field, falling back to its default when the value has the
/// wrong shape.
fn lenient<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).unwrap_or_default())
}

// ── RemoteError ──────────────────────────────────────────────────────

/// Error payload reported by the server for a method call or subscription.
///
/// Carried through to callers unchanged; unknown fields are kept in
/// [`details`](Self::details).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteError {
    /// Error code: a number or a string, depending on the server.
    #[serde(default)]
    pub error: Value,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_client_safe: Option<bool>,

    /// All remaining fields the server sends.
    #[serde(flatten)]
    pub details: Map<String, Value>,
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(message) = &self.message {
            return f.write_str(message);
        }
        match (&self.error, &self.reason) {
            (Value::Null, Some(reason)) => f.write_str(reason),
            (code, Some(reason)) => write!(f, "{reason} [{code}]"),
            (code, None) => write!(f, "remote error [{code}]"),
        }
    }
}

impl std::error::Error for RemoteError {}

// ── Tests ────────────────────────────────────────────────────────────
