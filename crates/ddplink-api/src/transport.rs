// ── Transport abstraction ──
//
// A transport moves text frames over a duplex channel and reports its
// lifecycle through a sink. Failures to connect are reported as `Close` so
// the connection's reconnect logic sees one uniform signal.

use tokio::sync::mpsc;
use url::Url;

use crate::error::Error;

/// Lifecycle and data notifications produced by a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The channel is open and frames may be sent.
    Open,
    /// A text frame arrived.
    Message(String),
    /// The channel closed, or failed to open.
    Close,
}

pub type TransportSink = mpsc::UnboundedSender<TransportEvent>;

/// Duplex text-frame channel used by a [`Connection`](crate::Connection).
pub trait Transport: Send + Sync + 'static {
    /// Begin opening a channel to `endpoint`.
    ///
    /// Returns immediately; progress is reported through `sink`. Calling
    /// `open` while a channel is already open or opening is a no-op.
    fn open(&self, endpoint: &Url, sink: TransportSink);

    /// Hand one frame to the open channel.
    fn send(&self, frame: String) -> Result<(), Error>;

    /// Close the channel. A `Close` event follows once it is down.
    fn close(&self);
}
