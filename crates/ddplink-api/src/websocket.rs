//! WebSocket transport.
//!
//! Each [`open`](Transport::open) spawns one background task that owns the
//! socket: it connects, reports `Open`, forwards outbound frames, and turns
//! inbound text frames into [`TransportEvent::Message`]. The task always
//! finishes by reporting `Close`, whether the socket was closed locally, by
//! the peer, or never came up.
//!
//! Reconnection is not handled here; the [`Connection`](crate::Connection)
//! decides when to open again.

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::Error;
use crate::transport::{Transport, TransportEvent, TransportSink};

// ── WebSocketTransport ───────────────────────────────────────────────

/// [`Transport`] over `tokio-tungstenite`.
#[derive(Debug, Default)]
pub struct WebSocketTransport {
    active: Mutex<Option<ActiveSocket>>,
}

#[derive(Debug)]
struct ActiveSocket {
    outbound: mpsc::UnboundedSender<tungstenite::Message>,
    cancel: CancellationToken,
}

impl ActiveSocket {
    fn is_live(&self) -> bool {
        !self.cancel.is_cancelled() && !self.outbound.is_closed()
    }
}

impl WebSocketTransport {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Transport for WebSocketTransport {
    fn open(&self, endpoint: &Url, sink: TransportSink) {
        let mut active = self.active.lock();
        if active.as_ref().is_some_and(ActiveSocket::is_live) {
            tracing::debug!("WebSocket already open, ignoring open request");
            return;
        }

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        *active = Some(ActiveSocket {
            outbound: outbound_tx,
            cancel: cancel.clone(),
        });

        let url = endpoint.clone();
        tokio::spawn(async move {
            if let Err(e) = connect_and_pump(&url, &sink, outbound_rx, &cancel).await {
                tracing::warn!(error = %e, url = %url, "WebSocket error");
            }
            let _ = sink.send(TransportEvent::Close);
        });
    }

    fn send(&self, frame: String) -> Result<(), Error> {
        let active = self.active.lock();
        let socket = active
            .as_ref()
            .filter(|s| s.is_live())
            .ok_or(Error::NotOpen)?;
        socket
            .outbound
            .send(tungstenite::Message::Text(frame.into()))
            .map_err(|_| Error::NotOpen)
    }

    fn close(&self) {
        if let Some(socket) = self.active.lock().take() {
            socket.cancel.cancel();
        }
    }
}

impl Drop for WebSocketTransport {
    fn drop(&mut self) {
        self.close();
    }
}

// ── Single connection lifecycle ──────────────────────────────────────

/// Establish one WebSocket connection and pump frames until it drops.
async fn connect_and_pump(
    url: &Url,
    sink: &TransportSink,
    mut outbound: mpsc::UnboundedReceiver<tungstenite::Message>,
    cancel: &CancellationToken,
) -> Result<(), Error> {
    tracing::info!(url = %url, "Connecting to WebSocket");

    let connected = tokio::select! {
        biased;
        () = cancel.cancelled() => return Ok(()),
        result = tokio_tungstenite::connect_async(url.as_str()) => result,
    };
    let (ws_stream, _response) = connected.map_err(|e| Error::WebSocketConnect(e.to_string()))?;

    tracing::info!("WebSocket connected");
    let _ = sink.send(TransportEvent::Open);

    let (mut write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                let _ = write.send(tungstenite::Message::Close(None)).await;
                return Ok(());
            }
            Some(message) = outbound.recv() => {
                write
                    .send(message)
                    .await
                    .map_err(|e| Error::WebSocketConnect(e.to_string()))?;
            }
            frame = read.next() => {
                match frame {
                    Some(Ok(tungstenite::Message::Text(text))) => {
                        let _ = sink.send(TransportEvent::Message(text.as_str().to_owned()));
                    }
                    Some(Ok(tungstenite::Message::Close(frame))) => {
                        return match frame {
                            Some(cf) => Err(Error::WebSocketClosed {
                                code: u16::from(cf.code),
                                reason: cf.reason.as_str().to_owned(),
                            }),
                            None => {
                                tracing::info!("WebSocket close frame received (no payload)");
                                Ok(())
                            }
                        };
                    }
                    Some(Err(e)) => {
                        return Err(Error::WebSocketConnect(e.to_string()));
                    }
                    None => {
                        tracing::info!("WebSocket stream ended");
                        return Ok(());
                    }
                    Some(Ok(_)) => {
                        // Binary, Ping, Pong, Frame: tungstenite answers pings itself
                    }
                }
            }
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn send_without_open_is_rejected() {
        let transport = WebSocketTransport::new();
        assert!(matches!(transport.send("{}".into()), Err(Error::NotOpen)));
    }

    #[tokio::test]
    async fn unreachable_endpoint_reports_close() {
        let transport = WebSocketTransport::new();
        let (tx, mut rx) = mpsc::unbounded_channel();

        // Port 9 on localhost refuses connections on any sane test machine.
        transport.open(&Url::parse("ws://127.0.0.1:9/websocket").unwrap(), tx);

        assert_eq!(rx.recv().await, Some(TransportEvent::Close));
    }
}
