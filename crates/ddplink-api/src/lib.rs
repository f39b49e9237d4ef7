// ddplink-api: wire layer for DDP clients (protocol, transports, queue, connection)

pub mod codec;
pub mod connection;
pub mod error;
pub mod event;
pub mod memory;
pub mod protocol;
pub mod queue;
pub mod transport;
pub mod websocket;

pub use codec::{Codec, JsonCodec};
pub use connection::{Connection, ConnectionOptions, ConnectionState};
pub use error::Error;
pub use event::{Emission, Event, EventKind};
pub use memory::MemoryTransport;
pub use protocol::{ClientMessage, RemoteError, ServerMessage, DDP_VERSION};
pub use queue::MessageQueue;
pub use transport::{Transport, TransportEvent, TransportSink};
pub use websocket::WebSocketTransport;
