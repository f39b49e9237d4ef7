// ── Client configuration ──
//
// Serializable options for a `Client`. Collaborators that cannot be
// serialized (transport, codec, plugins) go through `ClientBuilder`.
// Core never reads config files; see `ddplink-config` for that.

use std::time::Duration;

use ddplink_api::{ConnectionOptions, DDP_VERSION};
use serde::{Deserialize, Serialize};
use url::Url;

const DEFAULT_RECONNECT_INTERVAL_MS: u64 = 10_000;

/// Options for connecting a [`Client`](crate::Client) to one server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientOptions {
    /// Server address, e.g. `wss://example.com/websocket`.
    pub endpoint: Url,
    /// Open the connection as soon as the client is built.
    #[serde(default = "enabled")]
    pub auto_connect: bool,
    /// Reopen the connection after it drops.
    #[serde(default = "enabled")]
    pub auto_reconnect: bool,
    #[serde(default = "default_reconnect_interval_ms")]
    pub reconnect_interval_ms: u64,
    /// Empty every collection after each reconnection.
    #[serde(default = "enabled")]
    pub clear_data_on_reconnection: bool,
    /// Upper bound for connect, disconnect and method calls. Unbounded when
    /// unset or zero.
    #[serde(default)]
    pub max_timeout_ms: Option<u64>,
    /// Discard queued requests when the connection drops.
    #[serde(default)]
    pub clean_queue: bool,
    #[serde(default = "default_ddp_version")]
    pub ddp_version: String,
}

fn enabled() -> bool {
    true
}

fn default_reconnect_interval_ms() -> u64 {
    DEFAULT_RECONNECT_INTERVAL_MS
}

fn default_ddp_version() -> String {
    DDP_VERSION.to_owned()
}

impl ClientOptions {
    pub fn new(endpoint: Url) -> Self {
        Self {
            endpoint,
            auto_connect: true,
            auto_reconnect: true,
            reconnect_interval_ms: default_reconnect_interval_ms(),
            clear_data_on_reconnection: true,
            max_timeout_ms: None,
            clean_queue: false,
            ddp_version: default_ddp_version(),
        }
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }

    pub fn max_timeout(&self) -> Option<Duration> {
        self.max_timeout_ms.filter(|ms| *ms > 0).map(Duration::from_millis)
    }

    /// The subset handed to the connection layer.
    pub fn connection_options(&self) -> ConnectionOptions {
        ConnectionOptions {
            endpoint: self.endpoint.clone(),
            auto_reconnect: self.auto_reconnect,
            reconnect_interval: self.reconnect_interval(),
            clean_queue: self.clean_queue,
            version: self.ddp_version.clone(),
        }
    }
}
