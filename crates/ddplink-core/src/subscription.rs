//! Publication subscriptions.
//!
//! A [`Subscription`] tracks one `(publication, arguments)` pair through
//! `Starting → Ready → Stopping → Stopped`. Each start sends a `sub` request
//! under a fresh correlation id; two listeners installed at construction
//! follow the matching `ready` and `nosub` messages for the current id.
//!
//! Futures returned by [`start`](Subscription::start),
//! [`stop`](Subscription::stop) and friends register their own listeners
//! before the request they wait on is queued, so a fast reply cannot be
//! missed.

use std::sync::{Arc, Weak};

use ddplink_api::protocol::generate_id;
use ddplink_api::{ClientMessage, Connection, EventKind, RemoteError, ServerMessage};
use futures_util::future::{self, BoxFuture, FutureExt};
use parking_lot::Mutex;
use serde_json::Value;
use strum::Display;

use crate::client::ClientInner;
use crate::error::ClientError;
use crate::event::{EventBus, EventListener};

/// Where a subscription is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum SubscriptionState {
    /// `sub` sent, waiting for `ready`.
    Starting,
    Ready,
    /// `unsub` sent, waiting for `nosub`.
    Stopping,
    Stopped,
}

/// Handle to a subscription. Clones share state.
#[derive(Clone)]
pub struct Subscription {
    inner: Arc<SubscriptionInner>,
}

struct SubscriptionInner {
    name: String,
    bus: EventBus,
    connection: Connection,
    client: Weak<ClientInner>,
    state: Mutex<SubState>,
    ready_listener: EventListener,
    nosub_listener: EventListener,
}

struct SubState {
    args: Vec<Value>,
    id: String,
    ready: bool,
    nosub: bool,
    started: bool,
}

impl Subscription {
    /// Create and start a subscription.
    pub(crate) fn new(client: &Arc<ClientInner>, name: &str, args: Vec<Value>) -> Self {
        let bus = client.events().clone();

        let inner = Arc::new_cyclic(|weak: &Weak<SubscriptionInner>| {
            let on_ready = Weak::clone(weak);
            let ready_listener = bus.on(EventKind::Ready, move |event, _| {
                let Some(ServerMessage::Ready { subs }) = event.message() else {
                    return;
                };
                if let Some(inner) = on_ready.upgrade() {
                    let mut state = inner.state.lock();
                    if subs.contains(&state.id) {
                        state.ready = true;
                        state.nosub = false;
                    }
                }
            });

            let on_nosub = Weak::clone(weak);
            let nosub_listener = bus.on(EventKind::Nosub, move |event, _| {
                let Some(ServerMessage::Nosub { id, .. }) = event.message() else {
                    return;
                };
                if let Some(inner) = on_nosub.upgrade() {
                    let mut state = inner.state.lock();
                    if *id == state.id {
                        state.ready = false;
                        state.nosub = true;
                        state.started = false;
                    }
                }
            });

            SubscriptionInner {
                name: name.to_owned(),
                bus: bus.clone(),
                connection: client.connection().clone(),
                client: Arc::downgrade(client),
                state: Mutex::new(SubState {
                    args,
                    id: String::new(),
                    ready: false,
                    nosub: false,
                    started: false,
                }),
                ready_listener,
                nosub_listener,
            }
        });

        let subscription = Self { inner };
        drop(subscription.start());
        subscription
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Send the `sub` request if not already started. Resolves once ready.
    pub fn start(&self) -> BoxFuture<'static, Result<(), ClientError>> {
        self.start_inner(None)
    }

    /// Like [`start`](Self::start), replacing the arguments first.
    pub fn start_with(&self, args: Vec<Value>) -> BoxFuture<'static, Result<(), ClientError>> {
        self.start_inner(Some(args))
    }

    fn start_inner(&self, args: Option<Vec<Value>>) -> BoxFuture<'static, Result<(), ClientError>> {
        let request = {
            let mut state = self.inner.state.lock();
            if state.started {
                None
            } else {
                if let Some(args) = args {
                    state.args = args;
                }
                state.id = generate_id();
                state.started = true;
                state.nosub = false;
                Some(ClientMessage::Sub {
                    id: state.id.clone(),
                    name: self.inner.name.clone(),
                    params: state.args.clone(),
                })
            }
        };

        let Some(request) = request else {
            return self.ready();
        };

        self.inner.ready_listener.start();
        let ready = self.ready();
        tracing::debug!(publication = %self.inner.name, id = request.id().unwrap_or_default(), "Subscribing");
        self.inner.connection.enqueue(request, false);
        ready
    }

    /// Send `unsub` if started. Resolves once the server confirms with
    /// `nosub`, or at once if already stopped.
    pub fn stop(&self) -> BoxFuture<'static, Result<(), ClientError>> {
        let unsub = {
            let mut state = self.inner.state.lock();
            if state.started {
                state.started = false;
                state.ready = false;
                Some((!state.nosub).then(|| state.id.clone()))
            } else {
                None
            }
        };

        let Some(unsub) = unsub else {
            return self.nosub();
        };

        self.inner.ready_listener.stop();
        let stopped = self.nosub();
        if let Some(id) = unsub {
            tracing::debug!(publication = %self.inner.name, id, "Unsubscribing");
            self.inner.connection.enqueue(ClientMessage::Unsub { id }, false);
        }
        stopped
    }

    /// Stop, then start again, optionally with new arguments.
    pub fn restart(&self, args: Option<Vec<Value>>) -> BoxFuture<'static, Result<(), ClientError>> {
        let this = self.clone();
        async move {
            this.stop().await?;
            this.start_inner(args).await
        }
        .boxed()
    }

    /// Stop and forget the subscription: the client will neither dedupe
    /// against it nor restart it after a reconnection.
    pub fn remove(&self) {
        self.inner.ready_listener.stop();
        self.inner.nosub_listener.stop();
        drop(self.stop());
        if let Some(client) = self.inner.client.upgrade() {
            client.forget_subscription(self);
        }
    }

    // ── Waiting ──────────────────────────────────────────────────────

    /// Resolves when the current request becomes ready; fails if the server
    /// answers with `nosub` instead.
    pub fn ready(&self) -> BoxFuture<'static, Result<(), ClientError>> {
        let id = self.inner.state.lock().id.clone();
        let ready_id = id.clone();
        let pending = self
            .inner
            .bus
            .pending::<Result<(), ClientError>>()
            .listen(EventKind::Ready, move |event, _| match event.message() {
                Some(ServerMessage::Ready { subs }) if subs.contains(&ready_id) => Some(Ok(())),
                _ => None,
            })
            .listen(EventKind::Nosub, move |event, _| match event.message() {
                Some(ServerMessage::Nosub { id: nosub_id, error }) if *nosub_id == id => {
                    Some(Err(nosub_error(nosub_id, error.as_ref())))
                }
                _ => None,
            });

        if self.is_ready() {
            return future::ready(Ok(())).boxed();
        }
        async move { pending.wait(None).await? }.boxed()
    }

    /// Resolves on the `nosub` for the current id; fails if it carries an
    /// error. Resolves at once if already stopped.
    pub fn nosub(&self) -> BoxFuture<'static, Result<(), ClientError>> {
        let id = self.inner.state.lock().id.clone();
        let pending = self
            .inner
            .bus
            .pending::<Option<RemoteError>>()
            .listen(EventKind::Nosub, move |event, _| match event.message() {
                Some(ServerMessage::Nosub { id: nosub_id, error }) if *nosub_id == id => Some(error.clone()),
                _ => None,
            });

        if self.is_stopped() {
            return future::ready(Ok(())).boxed();
        }
        let inner = Arc::clone(&self.inner);
        async move {
            let error = pending.wait(None).await?;
            inner.state.lock().nosub = true;
            match error {
                Some(err) => Err(ClientError::Subscription(err)),
                None => Ok(()),
            }
        }
        .boxed()
    }

    // ── Callbacks ────────────────────────────────────────────────────

    /// Call `f` on every `ready` for this subscription, and once right away
    /// if it is ready already.
    pub fn on_ready<F>(&self, f: F) -> EventListener
    where
        F: Fn() + Send + Sync + 'static,
    {
        if self.is_ready() {
            f();
        }
        let weak = Arc::downgrade(&self.inner);
        self.inner.bus.on(EventKind::Ready, move |event, _| {
            let Some(ServerMessage::Ready { subs }) = event.message() else {
                return;
            };
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let id = inner.state.lock().id.clone();
            if subs.contains(&id) {
                f();
            }
        })
    }

    /// Call `f` on every `nosub` for this subscription, and once right away
    /// if it is stopped already. Server errors are passed through as `Err`.
    pub fn on_nosub<F>(&self, f: F) -> EventListener
    where
        F: Fn(Result<(), &RemoteError>) + Send + Sync + 'static,
    {
        if self.is_stopped() {
            f(Ok(()));
        }
        let weak = Arc::downgrade(&self.inner);
        self.inner.bus.on(EventKind::Nosub, move |event, _| {
            let Some(ServerMessage::Nosub { id, error }) = event.message() else {
                return;
            };
            let Some(inner) = weak.upgrade() else {
                return;
            };
            if *id == inner.state.lock().id {
                f(error.as_ref().map_or(Ok(()), Err));
            }
        })
    }

    // ── State ────────────────────────────────────────────────────────

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn args(&self) -> Vec<Value> {
        self.inner.state.lock().args.clone()
    }

    /// Correlation id of the current request.
    pub fn id(&self) -> String {
        self.inner.state.lock().id.clone()
    }

    pub fn is_ready(&self) -> bool {
        self.inner.state.lock().ready
    }

    /// The server has confirmed the subscription is over.
    pub fn is_stopped(&self) -> bool {
        self.inner.state.lock().nosub
    }

    /// A `sub` request is active (not yet unsubscribed).
    pub fn is_on(&self) -> bool {
        self.inner.state.lock().started
    }

    pub fn state(&self) -> SubscriptionState {
        let state = self.inner.state.lock();
        match (state.started, state.ready, state.nosub) {
            (true, true, _) => SubscriptionState::Ready,
            (true, false, _) => SubscriptionState::Starting,
            (false, _, false) => SubscriptionState::Stopping,
            (false, _, true) => SubscriptionState::Stopped,
        }
    }

    pub(crate) fn matches(&self, name: &str, args: &[Value]) -> bool {
        if self.inner.name != name {
            return false;
        }
        let state = self.inner.state.lock();
        state.args.len() == args.len() && state.args.iter().zip(args).all(|(a, b)| same_value(a, b))
    }

    pub(crate) fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("name", &self.inner.name)
            .field("id", &self.id())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Structural equality where numbers compare by value, so `1` equals `1.0`.
fn same_value(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        (Value::Array(xs), Value::Array(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| same_value(x, y))
        }
        (Value::Object(xs), Value::Object(ys)) => {
            xs.len() == ys.len()
                && xs
                    .iter()
                    .all(|(key, x)| ys.get(key).is_some_and(|y| same_value(x, y)))
        }
        _ => a == b,
    }
}

fn nosub_error(id: &str, error: Option<&RemoteError>) -> ClientError {
    match error {
        Some(err) => ClientError::Subscription(err.clone()),
        None => ClientError::NoSub { id: id.to_owned() },
    }
}
