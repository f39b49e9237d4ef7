//! Connection state machine.
//!
//! A [`Connection`] owns a [`Transport`] and walks
//! `Disconnected → Connecting → Connected`, falling back to `Disconnected`
//! whenever the transport closes. Outbound requests go through a
//! [`MessageQueue`] that is drained only while connected.
//!
//! Everything the connection wants to tell the layer above is pushed onto an
//! unbounded channel of [`Emission`]s rather than delivered inline, so a
//! caller always returns before any listener sees the consequences of its
//! call, and emissions arrive in the order they were produced.

use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use strum::Display;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::codec::Codec;
use crate::event::{Emission, Event};
use crate::protocol::{ClientMessage, ServerMessage, DDP_VERSION};
use crate::queue::MessageQueue;
use crate::transport::{Transport, TransportEvent, TransportSink};

const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_secs(10);

// ── ConnectionState ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

// ── ConnectionOptions ────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    pub endpoint: Url,
    /// Reopen the transport after it closes.
    pub auto_reconnect: bool,
    /// Delay between a close and the next open attempt.
    pub reconnect_interval: Duration,
    /// Drop queued requests when the transport closes.
    pub clean_queue: bool,
    /// Protocol version offered in the handshake.
    pub version: String,
}

impl ConnectionOptions {
    pub fn new(endpoint: Url) -> Self {
        Self {
            endpoint,
            auto_reconnect: true,
            reconnect_interval: DEFAULT_RECONNECT_INTERVAL,
            clean_queue: false,
            version: DDP_VERSION.to_owned(),
        }
    }
}

// ── Connection ───────────────────────────────────────────────────────

/// Handle to a connection. Cheap to clone; all clones drive the same socket.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

struct ConnectionInner {
    options: ConnectionOptions,
    transport: Arc<dyn Transport>,
    codec: Arc<dyn Codec>,
    state: Mutex<ConnState>,
    status_tx: watch::Sender<ConnectionState>,
    events_tx: mpsc::UnboundedSender<Emission>,
    transport_tx: TransportSink,
    cancel: CancellationToken,
}

struct ConnState {
    queue: MessageQueue<ClientMessage>,
    session: Option<String>,
    auto_reconnect: bool,
    /// Value `auto_reconnect` returns to on an explicit connect.
    user_auto_reconnect: bool,
}

impl Connection {
    /// Create a connection and spawn its driver task.
    ///
    /// Nothing is opened until [`connect`](Self::connect) is called. The
    /// returned receiver yields every emitted event in order; it must be
    /// consumed by exactly one dispatcher.
    pub fn new(
        options: ConnectionOptions,
        transport: Arc<dyn Transport>,
        codec: Arc<dyn Codec>,
    ) -> (Self, mpsc::UnboundedReceiver<Emission>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (transport_tx, transport_rx) = mpsc::unbounded_channel();
        let (status_tx, _) = watch::channel(ConnectionState::Disconnected);
        let cancel = CancellationToken::new();

        let inner = Arc::new(ConnectionInner {
            state: Mutex::new(ConnState {
                queue: MessageQueue::new(),
                session: None,
                auto_reconnect: options.auto_reconnect,
                user_auto_reconnect: options.auto_reconnect,
            }),
            options,
            transport,
            codec,
            status_tx,
            events_tx,
            transport_tx,
            cancel: cancel.clone(),
        });

        tokio::spawn(drive(Arc::downgrade(&inner), transport_rx, cancel));

        (Self { inner }, events_rx)
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Open the transport, restoring the configured auto-reconnect setting.
    ///
    /// Does nothing if the connection is already connecting or connected.
    pub fn connect(&self) {
        {
            let mut state = self.inner.state.lock();
            state.auto_reconnect = state.user_auto_reconnect;
        }
        self.inner.open_transport();
    }

    /// Close the transport and stay closed until the next
    /// [`connect`](Self::connect). The session id is forgotten.
    pub fn disconnect(&self) {
        {
            let mut state = self.inner.state.lock();
            state.auto_reconnect = false;
            state.session = None;
        }
        tracing::debug!("Closing transport");
        self.inner.transport.close();
    }

    /// Stop the driver task and close the transport for good.
    pub fn shutdown(&self) {
        self.inner.state.lock().auto_reconnect = false;
        self.inner.cancel.cancel();
        self.inner.transport.close();
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.status_tx.borrow()
    }

    /// Watch receiver for connection state changes.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.status_tx.subscribe()
    }

    pub fn session_id(&self) -> Option<String> {
        self.inner.state.lock().session.clone()
    }

    pub fn options(&self) -> &ConnectionOptions {
        &self.inner.options
    }

    // ── Queue ────────────────────────────────────────────────────────

    /// Queue `message` (at the front when `priority` is set) and try to
    /// drain the queue.
    pub fn enqueue(&self, message: ClientMessage, priority: bool) {
        {
            let mut state = self.inner.state.lock();
            if priority {
                state.queue.unshift(message);
            } else {
                state.queue.push(message);
            }
        }
        self.inner.flush();
    }

    pub fn pause_queue(&self) {
        self.inner.state.lock().queue.pause();
    }

    /// Resume draining and flush whatever accumulated meanwhile.
    pub fn continue_queue(&self) {
        self.inner.state.lock().queue.resume();
        self.inner.flush();
    }

    pub fn queue_len(&self) -> usize {
        self.inner.state.lock().queue.len()
    }

    // ── Events ───────────────────────────────────────────────────────

    /// Emit a synthetic event through the same ordered channel as server
    /// messages.
    pub fn emit(&self, event: Event, origin: Option<String>) {
        self.inner.emit(event, origin);
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("endpoint", &self.inner.options.endpoint.as_str())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

// ── Internals ────────────────────────────────────────────────────────

impl ConnectionInner {
    fn status(&self) -> ConnectionState {
        *self.status_tx.borrow()
    }

    fn open_transport(&self) {
        if self.status() != ConnectionState::Disconnected {
            return;
        }
        self.status_tx.send_replace(ConnectionState::Connecting);
        tracing::info!(endpoint = %self.options.endpoint, "Opening transport");
        self.transport
            .open(&self.options.endpoint, self.transport_tx.clone());
    }

    fn emit(&self, event: Event, origin: Option<String>) {
        // Only fails once the dispatcher is gone, i.e. during teardown.
        let _ = self.events_tx.send(Emission::new(event, origin));
    }

    /// Encode and hand a message straight to the transport, bypassing the
    /// queue.
    fn send_direct(&self, message: &ClientMessage) {
        match self.encode(message) {
            Ok(frame) => {
                if let Err(e) = self.transport.send(frame) {
                    tracing::warn!(error = %e, "Failed to send frame");
                }
            }
            Err(e) => tracing::warn!(error = %e, "Failed to encode message"),
        }
    }

    fn encode(&self, message: &ClientMessage) -> Result<String, crate::Error> {
        let value = serde_json::to_value(message)?;
        self.codec.encode(&value)
    }

    /// Drain the queue into the transport if connected.
    fn flush(&self) {
        if self.status() != ConnectionState::Connected {
            return;
        }
        let mut state = self.state.lock();
        let drained = state.queue.process(|message| match self.encode(message) {
            Ok(frame) => self.transport.send(frame).is_ok(),
            Err(e) => {
                tracing::warn!(error = %e, id = ?message.id(), "Dropping unencodable message");
                true
            }
        });
        if drained > 0 {
            tracing::debug!(drained, remaining = state.queue.len(), "Flushed queue");
        }
    }

    fn handle_transport(self: &Arc<Self>, event: TransportEvent) {
        match event {
            TransportEvent::Open => {
                let session = self.state.lock().session.clone();
                tracing::debug!(session = ?session, "Transport open, sending handshake");
                self.send_direct(&ClientMessage::connect(&self.options.version, session));
            }
            TransportEvent::Message(frame) => self.handle_frame(&frame),
            TransportEvent::Close => self.handle_close(),
        }
    }

    fn handle_frame(&self, frame: &str) {
        let message = self
            .codec
            .decode(frame)
            .and_then(|value| serde_json::from_value::<ServerMessage>(value).map_err(crate::Error::from));
        match message {
            Ok(message) => self.handle_message(message),
            Err(e) => {
                tracing::debug!(error = %e, frame, "Dropping undecodable frame");
            }
        }
    }

    fn handle_message(&self, message: ServerMessage) {
        match &message {
            ServerMessage::Connected { session } => {
                tracing::info!(session = ?session, "Session established");
                self.state.lock().session.clone_from(session);
                self.status_tx.send_replace(ConnectionState::Connected);
                self.flush();
                self.emit(Event::Message(message), None);
            }
            ServerMessage::Ping { id } => {
                tracing::trace!("Answering ping");
                self.send_direct(&ClientMessage::Pong { id: id.clone() });
            }
            ServerMessage::Failed { version } => {
                tracing::warn!(
                    offered = %self.options.version,
                    suggested = ?version,
                    "Server refused protocol version"
                );
            }
            _ => self.emit(Event::Message(message), None),
        }
    }

    fn handle_close(self: &Arc<Self>) {
        let previous = self.status_tx.send_replace(ConnectionState::Disconnected);
        let reconnect = {
            let mut state = self.state.lock();
            if self.options.clean_queue {
                state.queue.clear();
            }
            state.auto_reconnect
        };
        tracing::info!(previous = %previous, reconnect, "Transport closed");

        if previous == ConnectionState::Connected {
            self.emit(Event::Disconnected, None);
        }
        if reconnect {
            self.schedule_reconnect();
        }
    }

    fn schedule_reconnect(self: &Arc<Self>) {
        let interval = self.options.reconnect_interval;
        tracing::debug!(delay = ?interval, "Scheduling reconnect");

        let weak = Arc::downgrade(self);
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                biased;
                () = cancel.cancelled() => return,
                () = tokio::time::sleep(interval) => {}
            }
            let Some(inner) = weak.upgrade() else {
                return;
            };
            // An explicit disconnect during the wait wins.
            if inner.state.lock().auto_reconnect {
                inner.open_transport();
            }
        });
    }
}

impl Drop for ConnectionInner {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.transport.close();
    }
}

/// Driver loop: feed transport events into the state machine until the
/// connection is dropped or shut down.
async fn drive(
    weak: Weak<ConnectionInner>,
    mut transport_rx: mpsc::UnboundedReceiver<TransportEvent>,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            event = transport_rx.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };
        let Some(inner) = weak.upgrade() else {
            break;
        };
        inner.handle_transport(event);
    }
    tracing::debug!("Connection driver exiting");
}

// ── Tests ────────────────────────────────────────────────────────────
