// ── Plugin hooks ──
//
// Plugins are called synchronously, in registration order, at fixed points
// while the client wires up its internal listeners. A hook sees the client
// as it is at that point, so `BeforeAdded` runs before the store starts
// mirroring `added` messages and can install listeners that observe them
// first.

use std::sync::Arc;

use strum::Display;

use crate::client::Client;

/// Points at which plugins are invoked, in invocation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum HookPoint {
    Init,
    BeforeConnected,
    AfterConnected,
    BeforeSubsRestart,
    AfterSubsRestart,
    BeforeDisconnected,
    AfterDisconnected,
    BeforeAdded,
    AfterAdded,
    BeforeChanged,
    AfterChanged,
    BeforeRemoved,
    AfterRemoved,
    After,
}

pub trait Plugin: Send + Sync {
    fn hook(&self, point: HookPoint, client: &Client);
}

impl<F> Plugin for F
where
    F: Fn(HookPoint, &Client) + Send + Sync,
{
    fn hook(&self, point: HookPoint, client: &Client) {
        self(point, client);
    }
}

/// Ordered plugin list.
#[derive(Clone, Default)]
pub(crate) struct Plugins(Vec<Arc<dyn Plugin>>);

impl Plugins {
    pub(crate) fn push(&mut self, plugin: Arc<dyn Plugin>) {
        self.0.push(plugin);
    }

    pub(crate) fn len(&self) -> usize {
        self.0.len()
    }

    /// Run every plugin for each point of `points`, plugin-major.
    pub(crate) fn run(&self, points: &[HookPoint], client: &Client) {
        for plugin in &self.0 {
            for point in points {
                tracing::trace!(%point, "Running plugin hook");
                plugin.hook(*point, client);
            }
        }
    }
}

impl std::fmt::Debug for Plugins {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Plugins").field("count", &self.0.len()).finish()
    }
}
