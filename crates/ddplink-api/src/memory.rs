//! In-process transport for tests and embedding.
//!
//! [`MemoryTransport`] records every frame the connection sends and lets the
//! owner play the server side: accept the handshake, push arbitrary server
//! messages, or drop the channel.

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use url::Url;

use crate::error::Error;
use crate::transport::{Transport, TransportEvent, TransportSink};

#[derive(Debug, Default)]
struct MemoryState {
    sink: Option<TransportSink>,
    open: bool,
    sent: Vec<String>,
    opens: usize,
}

/// Cloneable handle; all clones share one channel.
#[derive(Debug, Clone, Default)]
pub struct MemoryTransport {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw frames sent so far.
    pub fn sent(&self) -> Vec<String> {
        self.state.lock().sent.clone()
    }

    /// Sent frames parsed as JSON; frames that are not JSON are skipped.
    pub fn sent_messages(&self) -> Vec<Value> {
        self.state
            .lock()
            .sent
            .iter()
            .filter_map(|frame| serde_json::from_str(frame).ok())
            .collect()
    }

    /// Take and clear the sent frames, parsed as JSON.
    pub fn take_sent(&self) -> Vec<Value> {
        let frames = std::mem::take(&mut self.state.lock().sent);
        frames
            .iter()
            .filter_map(|frame| serde_json::from_str(frame).ok())
            .collect()
    }

    /// Number of times the channel has been opened.
    pub fn open_count(&self) -> usize {
        self.state.lock().opens
    }

    pub fn is_open(&self) -> bool {
        self.state.lock().open
    }

    /// Deliver `message` as if the server had sent it.
    pub fn push_server(&self, message: Value) {
        self.push_frame(message.to_string());
    }

    /// Deliver a raw text frame.
    pub fn push_frame(&self, frame: String) {
        if let Some(sink) = &self.state.lock().sink {
            let _ = sink.send(TransportEvent::Message(frame));
        }
    }

    /// Answer the handshake with `connected`.
    pub fn accept(&self, session: &str) {
        self.push_server(serde_json::json!({ "msg": "connected", "session": session }));
    }

    /// Simulate the server dropping the channel.
    pub fn drop_connection(&self) {
        let mut state = self.state.lock();
        if state.open {
            state.open = false;
            if let Some(sink) = &state.sink {
                let _ = sink.send(TransportEvent::Close);
            }
        }
    }
}

impl Transport for MemoryTransport {
    fn open(&self, _endpoint: &Url, sink: TransportSink) {
        let mut state = self.state.lock();
        if state.open {
            return;
        }
        state.open = true;
        state.opens += 1;
        let _ = sink.send(TransportEvent::Open);
        state.sink = Some(sink);
    }

    fn send(&self, frame: String) -> Result<(), Error> {
        let mut state = self.state.lock();
        if !state.open {
            return Err(Error::NotOpen);
        }
        state.sent.push(frame);
        Ok(())
    }

    fn close(&self) {
        self.drop_connection();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[test]
    fn records_frames_only_while_open() {
        let transport = MemoryTransport::new();
        assert!(matches!(transport.send("x".into()), Err(Error::NotOpen)));

        let (tx, mut rx) = mpsc::unbounded_channel();
        transport.open(&Url::parse("ws://localhost/websocket").unwrap(), tx);
        assert_eq!(rx.try_recv().unwrap(), TransportEvent::Open);

        transport.send(r#"{"msg":"ping"}"#.into()).unwrap();
        assert_eq!(transport.take_sent().len(), 1);
        assert!(transport.sent().is_empty());

        transport.close();
        assert_eq!(rx.try_recv().unwrap(), TransportEvent::Close);
        assert!(!transport.is_open());
        assert_eq!(transport.open_count(), 1);
    }
}
