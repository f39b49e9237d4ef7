use thiserror::Error;

/// Top-level error type for the `ddplink-api` crate.
///
/// Covers the failure modes of the wire layer: establishing the duplex
/// channel, writing frames to it, and turning frames into messages.
/// `ddplink-core` wraps these into client-facing errors.
#[derive(Debug, Error)]
pub enum Error {
    // ── Transport ───────────────────────────────────────────────────
    /// WebSocket connection failed.
    #[error("WebSocket connection failed: {0}")]
    WebSocketConnect(String),

    /// WebSocket closed by the peer with a close frame.
    #[error("WebSocket closed (code {code}): {reason}")]
    WebSocketClosed { code: u16, reason: String },

    /// A frame was handed to a transport that has no open channel.
    #[error("Transport is not open")]
    NotOpen,

    // ── Data ────────────────────────────────────────────────────────
    /// Encoding or decoding through the codec failed.
    #[error("Codec error: {message}")]
    Codec { message: String },

    /// A decoded frame did not match any known protocol message.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },
}

impl Error {
    /// Returns `true` if this is a transient error worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::WebSocketConnect(_) | Self::WebSocketClosed { .. } | Self::NotOpen
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Codec {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(Error::NotOpen.is_transient());
        assert!(Error::WebSocketConnect("refused".into()).is_transient());
        assert!(
            !Error::Codec {
                message: "bad".into()
            }
            .is_transient()
        );
    }
}
