// ── Client error types ──
//
// Errors surfaced by the client facade and its subscriptions. Server error
// payloads are carried unchanged in `RemoteError`; transport failures are
// translated through `From<ddplink_api::Error>`.

use std::time::Duration;

use ddplink_api::RemoteError;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    // ── Waiting ──────────────────────────────────────────────────────
    /// No answer within the configured bound. The request, if any was sent,
    /// is abandoned rather than retracted.
    #[error("MAX_TIMEOUT_REACHED: no answer within {timeout_ms} ms")]
    Timeout { timeout_ms: u64 },

    // ── Server-reported ──────────────────────────────────────────────
    #[error("Method call failed: {0}")]
    Remote(RemoteError),

    #[error("Subscription failed: {0}")]
    Subscription(RemoteError),

    #[error("Subscription {id} was stopped by the server before it became ready")]
    NoSub { id: String },

    #[error("Login rejected by server")]
    LoginRejected { response: Value },

    // ── Local ────────────────────────────────────────────────────────
    #[error("Client has shut down")]
    Shutdown,

    #[error("Invalid data: {message}")]
    InvalidData { message: String },

    #[error(transparent)]
    Connection(#[from] ddplink_api::Error),
}

impl ClientError {
    pub(crate) fn timeout(limit: Duration) -> Self {
        Self::Timeout {
            timeout_ms: u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// The server's error payload, for method and subscription failures.
    pub fn remote(&self) -> Option<&RemoteError> {
        match self {
            Self::Remote(err) | Self::Subscription(err) => Some(err),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidData {
            message: err.to_string(),
        }
    }
}
