// ── Event bus ──
//
// Fans emissions from the connection out to registered handlers, in
// registration order. Handlers receive the event and the origin tag of the
// emitter, if any.

use std::sync::Arc;
use std::time::Duration;

use ddplink_api::{Emission, Event, EventKind};
use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::error::ClientError;
use crate::listener::{Listener, ListenerGuard, Registry};

pub type EventHandler = dyn Fn(&Event, Option<&str>) + Send + Sync;

pub struct EventRegistration {
    kind: EventKind,
    handler: Box<EventHandler>,
}

impl EventRegistration {
    pub fn kind(&self) -> EventKind {
        self.kind
    }
}

/// Start/stop handle returned by [`Client::on`](crate::Client::on).
pub type EventListener = Listener<EventRegistration>;

#[derive(Debug, Clone)]
pub struct EventBus {
    registry: Arc<Registry<EventRegistration>>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self {
            registry: Registry::new(),
        }
    }
}

impl EventBus {
    /// Register and start a handler for `kind`.
    pub fn on<F>(&self, kind: EventKind, handler: F) -> EventListener
    where
        F: Fn(&Event, Option<&str>) + Send + Sync + 'static,
    {
        self.registry.listen(Arc::new(EventRegistration {
            kind,
            handler: Box::new(handler),
        }))
    }

    /// Deliver one emission to every started handler of its kind.
    pub fn dispatch(&self, emission: &Emission) {
        let kind = emission.event.kind();
        let origin = emission.origin.as_deref();
        self.registry.for_each(|registration| {
            if registration.kind == kind {
                (registration.handler)(&emission.event, origin);
            }
        });
    }

    pub fn listener_count(&self) -> usize {
        self.registry.len()
    }

    /// Start a one-shot wait; see [`Pending`].
    pub(crate) fn pending<T: Send + 'static>(&self) -> Pending<T> {
        Pending::new(self.clone())
    }
}

// ── Pending ──────────────────────────────────────────────────────────

/// A one-shot wait for the first event accepted by any of its matchers.
///
/// Matchers are registered immediately, so a `Pending` created before a
/// request is sent cannot miss the reply. All of its listeners are detached
/// when the wait completes, times out, or is dropped.
pub(crate) struct Pending<T> {
    bus: EventBus,
    tx: Arc<Mutex<Option<oneshot::Sender<T>>>>,
    rx: oneshot::Receiver<T>,
    guards: Vec<ListenerGuard<EventRegistration>>,
}

impl<T: Send + 'static> Pending<T> {
    fn new(bus: EventBus) -> Self {
        let (tx, rx) = oneshot::channel();
        Self {
            bus,
            tx: Arc::new(Mutex::new(Some(tx))),
            rx,
            guards: Vec::new(),
        }
    }

    /// Resolve with `matcher`'s value the first time it returns `Some`.
    pub(crate) fn listen<F>(mut self, kind: EventKind, matcher: F) -> Self
    where
        F: Fn(&Event, Option<&str>) -> Option<T> + Send + Sync + 'static,
    {
        let tx = Arc::clone(&self.tx);
        let listener = self.bus.on(kind, move |event, origin| {
            if let Some(value) = matcher(event, origin) {
                if let Some(tx) = tx.lock().take() {
                    let _ = tx.send(value);
                }
            }
        });
        self.guards.push(ListenerGuard::new(listener));
        self
    }

    /// Wait for the value, giving up after `timeout` when one is set.
    pub(crate) async fn wait(self, timeout: Option<Duration>) -> Result<T, ClientError> {
        let Self { rx, guards, .. } = self;
        let outcome = match timeout {
            Some(limit) => match tokio::time::timeout(limit, rx).await {
                Ok(received) => received,
                Err(_) => {
                    tracing::warn!(timeout = ?limit, "Gave up waiting for server reply");
                    return Err(ClientError::timeout(limit));
                }
            },
            None => rx.await,
        };
        drop(guards);
        outcome.map_err(|_| ClientError::Shutdown)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use ddplink_api::ServerMessage;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn ready(subs: &[&str]) -> Emission {
        Emission::new(
            Event::Message(ServerMessage::Ready {
                subs: subs.iter().map(|s| (*s).to_owned()).collect(),
            }),
            None,
        )
    }

    #[test]
    fn dispatch_filters_by_kind() {
        let bus = EventBus::default();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let listener = bus.on(EventKind::Ready, move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let _other = bus.on(EventKind::Nosub, |_, _| panic!("wrong kind"));

        bus.dispatch(&ready(&["a"]));
        listener.stop();
        bus.dispatch(&ready(&["a"]));

        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn pending_resolves_once_and_detaches() {
        let bus = EventBus::default();
        let pending = bus.pending::<String>().listen(EventKind::Ready, |event, _| {
            match event.message() {
                Some(ServerMessage::Ready { subs }) => subs.first().cloned(),
                _ => None,
            }
        });
        assert_eq!(bus.listener_count(), 1);

        bus.dispatch(&ready(&[]));
        bus.dispatch(&ready(&["first"]));
        bus.dispatch(&ready(&["second"]));

        assert_eq!(pending.wait(None).await.unwrap(), "first");
        assert_eq!(bus.listener_count(), 0);
    }

    #[test]
    fn pending_wakes_on_match() {
        let bus = EventBus::default();
        let pending = bus
            .pending::<()>()
            .listen(EventKind::Ready, |_, _| Some(()));
        let mut wait = tokio_test::task::spawn(pending.wait(None));

        tokio_test::assert_pending!(wait.poll());
        bus.dispatch(&ready(&["a"]));
        assert!(wait.is_woken());
        tokio_test::assert_ready_ok!(wait.poll());
    }

    #[tokio::test(start_paused = true)]
    async fn pending_times_out_and_detaches() {
        let bus = EventBus::default();
        let pending = bus
            .pending::<()>()
            .listen(EventKind::Connected, |_, _| Some(()));

        let err = pending.wait(Some(Duration::from_millis(100))).await.unwrap_err();
        assert!(matches!(err, ClientError::Timeout { timeout_ms: 100 }));
        assert_eq!(bus.listener_count(), 0);
    }
}
