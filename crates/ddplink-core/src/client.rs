//! Client facade.
//!
//! [`Client`] ties a [`Connection`] to the collections store and the
//! subscription list. A single dispatcher task drains the connection's
//! emissions in order and hands each one to the [`EventBus`]; internal
//! listeners on that bus keep the connection flags current and feed
//! `added`/`changed`/`removed` messages into the [`DataStore`].
//!
//! Operations that wait on the server (`connect`, `apply`, subscription
//! readiness, bulk import...) do their side effects when called and return a
//! future for the outcome, so dropping the future abandons the wait without
//! retracting the request.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use ddplink_api::protocol::generate_id;
use ddplink_api::{
    ClientMessage, Codec, Connection, ConnectionState, Emission, Event, EventKind, JsonCodec, ServerMessage, Transport,
    WebSocketTransport,
};
use futures_util::future::{self, BoxFuture, FutureExt};
use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::collection::CollectionView;
use crate::config::ClientOptions;
use crate::data::{self, ExportFormat, Exported, ImportData, ImportedDocument};
use crate::error::ClientError;
use crate::event::{EventBus, EventListener};
use crate::plugin::{HookPoint, Plugin, Plugins};
use crate::store::{DataStore, Document};
use crate::subscription::Subscription;

/// Distinguishes clients in origin tags of synthetic events.
static NEXT_INSTANCE: AtomicU64 = AtomicU64::new(0);

// ── User ─────────────────────────────────────────────────────────────

/// Result of a successful `login` method call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    #[serde(default)]
    pub token: Option<String>,
    /// Expiry as sent by the server (usually an extended-JSON date).
    #[serde(default)]
    pub token_expires: Option<Value>,
    /// `"password"`, `"resume"`, ...
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
}

impl User {
    pub fn is_resume(&self) -> bool {
        self.kind.as_deref() == Some("resume")
    }
}

// ── Client ───────────────────────────────────────────────────────────

/// Handle to a DDP client. Cheap to clone; clones share everything.
///
/// Must be created inside a tokio runtime.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

pub(crate) struct ClientInner {
    options: ClientOptions,
    connection: Connection,
    codec: Arc<dyn Codec>,
    events: EventBus,
    store: DataStore,
    subs: Mutex<Vec<Subscription>>,
    flags: Mutex<Flags>,
    auth: Mutex<Auth>,
    plugins: Plugins,
    internal: Mutex<Vec<EventListener>>,
    instance: u64,
    next_op: AtomicU64,
    cancel: CancellationToken,
}

#[derive(Debug)]
struct Flags {
    connected: bool,
    trying_to_connect: bool,
    trying_to_disconnect: bool,
    will_try_to_reconnect: bool,
}

#[derive(Debug, Default)]
struct Auth {
    user_id: Option<String>,
    token: Option<String>,
    logged_in: bool,
}

impl Client {
    /// Client over a websocket with the default JSON codec.
    pub fn new(options: ClientOptions) -> Self {
        ClientBuilder::new(options).build()
    }

    pub fn builder(options: ClientOptions) -> ClientBuilder {
        ClientBuilder::new(options)
    }

    // ── Connection ───────────────────────────────────────────────────

    /// Open the connection. Resolves on the next `connected` event, or at
    /// once if already connected; fails after `max_timeout` if one is set.
    pub fn connect(&self) -> BoxFuture<'static, Result<(), ClientError>> {
        let pending = self
            .inner
            .events
            .pending::<()>()
            .listen(EventKind::Connected, |_, _| Some(()));

        let (open, connected) = {
            let mut flags = self.inner.flags.lock();
            flags.will_try_to_reconnect = self.inner.options.auto_reconnect;
            let open = !flags.trying_to_connect;
            flags.trying_to_connect = true;
            (open, flags.connected)
        };
        if open {
            self.inner.connection.connect();
        }
        if connected {
            return future::ready(Ok(())).boxed();
        }

        let inner = Arc::clone(&self.inner);
        let timeout = self.inner.options.max_timeout();
        async move {
            let outcome = pending.wait(timeout).await;
            inner.flags.lock().trying_to_connect = false;
            outcome
        }
        .boxed()
    }

    /// Close the connection and stop reconnecting until the next
    /// [`connect`](Self::connect). Resolves on the `disconnected` event, or
    /// at once if not connected.
    pub fn disconnect(&self) -> BoxFuture<'static, Result<(), ClientError>> {
        let pending = self
            .inner
            .events
            .pending::<()>()
            .listen(EventKind::Disconnected, |_, _| Some(()));

        let (close, connected) = {
            let mut flags = self.inner.flags.lock();
            flags.will_try_to_reconnect = false;
            let close = !flags.trying_to_disconnect;
            flags.trying_to_disconnect = true;
            (close, flags.connected)
        };
        if close {
            self.inner.connection.disconnect();
        }
        if !connected {
            self.inner.flags.lock().trying_to_disconnect = false;
            return future::ready(Ok(())).boxed();
        }

        let inner = Arc::clone(&self.inner);
        let timeout = self.inner.options.max_timeout();
        async move {
            let outcome = pending.wait(timeout).await;
            inner.flags.lock().trying_to_disconnect = false;
            outcome
        }
        .boxed()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.flags.lock().connected
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.inner.connection.state()
    }

    pub fn watch_connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.connection.subscribe_state()
    }

    pub fn session_id(&self) -> Option<String> {
        self.inner.connection.session_id()
    }

    /// Hold outbound requests in the queue until
    /// [`continue_queue`](Self::continue_queue).
    pub fn pause_queue(&self) {
        self.inner.connection.pause_queue();
    }

    pub fn continue_queue(&self) {
        self.inner.connection.continue_queue();
    }

    // ── Methods ──────────────────────────────────────────────────────

    /// Call `method` with `params`. With `priority` the request jumps to the
    /// front of the outbound queue.
    pub fn apply(
        &self,
        method: &str,
        params: Vec<Value>,
        priority: bool,
    ) -> BoxFuture<'static, Result<Value, ClientError>> {
        let id = generate_id();
        let result_id = id.clone();
        let pending = self
            .inner
            .events
            .pending::<Result<Value, ClientError>>()
            .listen(EventKind::Result, move |event, _| match event.message() {
                Some(ServerMessage::Result { id, error, result }) if *id == result_id => Some(match error {
                    Some(err) => Err(ClientError::Remote(err.clone())),
                    None => Ok(result.clone().unwrap_or(Value::Null)),
                }),
                _ => None,
            });

        tracing::debug!(method, id, priority, "Calling method");
        self.inner.connection.enqueue(
            ClientMessage::Method {
                id,
                method: method.to_owned(),
                params,
            },
            priority,
        );

        let timeout = self.inner.options.max_timeout();
        async move { pending.wait(timeout).await? }.boxed()
    }

    pub fn call(&self, method: &str, params: Vec<Value>) -> BoxFuture<'static, Result<Value, ClientError>> {
        self.apply(method, params, false)
    }

    // ── Subscriptions ────────────────────────────────────────────────

    /// Subscribe to `name` with `args`.
    ///
    /// A live subscription with the same name and arguments is returned
    /// instead of a new one, and restarted if the server had stopped it.
    pub fn subscribe(&self, name: &str, args: Vec<Value>) -> Subscription {
        let existing = self
            .inner
            .subs
            .lock()
            .iter()
            .find(|sub| sub.matches(name, &args))
            .cloned();

        if let Some(sub) = existing {
            if sub.is_stopped() {
                drop(sub.start());
            }
            return sub;
        }

        let sub = Subscription::new(&self.inner, name, args);
        self.inner.subs.lock().push(sub.clone());
        sub
    }

    pub fn subscriptions(&self) -> Vec<Subscription> {
        self.inner.subs.lock().clone()
    }

    /// Emit a synthetic `ready` for `subs`, as if the server had sent it.
    /// Resolves once it has been dispatched.
    pub fn mark_as_ready(&self, subs: &[Subscription]) -> BoxFuture<'static, Result<(), ClientError>> {
        let origin = self.inner.next_origin();
        let expected = origin.clone();
        let pending = self
            .inner
            .events
            .pending::<()>()
            .listen(EventKind::Ready, move |_, from| (from == Some(expected.as_str())).then_some(()));

        let ids = subs.iter().map(Subscription::id).collect();
        self.inner
            .connection
            .emit(ServerMessage::Ready { subs: ids }.into(), Some(origin));
        async move { pending.wait(None).await }.boxed()
    }

    fn restart_subs(&self) {
        let active: Vec<Subscription> = self.subscriptions().into_iter().filter(Subscription::is_on).collect();
        if active.is_empty() {
            return;
        }
        tracing::debug!(count = active.len(), "Restarting subscriptions");
        for sub in active {
            let restart = sub.restart(None);
            tokio::spawn(async move {
                if let Err(err) = restart.await {
                    tracing::warn!(publication = sub.name(), error = %err, "Subscription restart failed");
                }
            });
        }
    }

    // ── Events & data ────────────────────────────────────────────────

    /// Call `handler` for every event of `kind`.
    pub fn on<F>(&self, kind: EventKind, handler: F) -> EventListener
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.inner.events.on(kind, move |event, _| handler(event))
    }

    /// Event handlers currently attached, the client's own included.
    pub fn event_listener_count(&self) -> usize {
        self.inner.events.listener_count()
    }

    /// Like [`on`](Self::on), also passing the emitter's origin tag.
    pub fn on_with_origin<F>(&self, kind: EventKind, handler: F) -> EventListener
    where
        F: Fn(&Event, Option<&str>) + Send + Sync + 'static,
    {
        self.inner.events.on(kind, handler)
    }

    pub fn collection(&self, name: &str) -> CollectionView {
        CollectionView::new(self.clone(), name)
    }

    /// Copy of every collection.
    pub fn collections(&self) -> IndexMap<String, Vec<Document>> {
        self.inner.store.snapshot()
    }

    /// Detach every collection change listener, reactive collections
    /// included.
    pub fn stop_change_listeners(&self) {
        self.inner.store.clear_listeners();
    }

    /// Remove every document as if the server had, through the regular
    /// dispatch path. Resolves once all removals have been dispatched.
    pub fn clear_data(&self) -> BoxFuture<'static, Result<(), ClientError>> {
        let ids = self.inner.store.document_ids();
        if ids.is_empty() {
            return future::ready(Ok(())).boxed();
        }

        let origin = self.inner.next_origin();
        let pending = self.inner.events.pending::<()>().listen(
            EventKind::Removed,
            count_echoes(origin.clone(), ids.len()),
        );
        tracing::debug!(documents = ids.len(), "Clearing local data");
        for (collection, id) in ids {
            self.inner
                .connection
                .emit(ServerMessage::Removed { collection, id }.into(), Some(origin.clone()));
        }
        async move { pending.wait(None).await }.boxed()
    }

    /// Add every document of `data` as if the server had published it.
    pub fn import_data(&self, data: impl Into<ImportData>) -> BoxFuture<'static, Result<(), ClientError>> {
        match self.decode_snapshot(data.into()) {
            Ok(documents) => self.import_documents(documents),
            Err(err) => future::ready(Err(err)).boxed(),
        }
    }

    /// Snapshot of every collection.
    pub fn export_data(&self, format: ExportFormat) -> Result<Exported, ClientError> {
        self.encode_snapshot(data::snapshot_value(self.inner.store.snapshot()), format)
    }

    pub(crate) fn import_documents(
        &self,
        documents: Vec<ImportedDocument>,
    ) -> BoxFuture<'static, Result<(), ClientError>> {
        if documents.is_empty() {
            return future::ready(Ok(())).boxed();
        }

        let origin = self.inner.next_origin();
        let pending = self.inner.events.pending::<()>().listen(
            EventKind::Added,
            count_echoes(origin.clone(), documents.len()),
        );
        tracing::debug!(documents = documents.len(), "Importing data");
        for doc in documents {
            let message = ServerMessage::Added {
                collection: doc.collection,
                id: doc.id,
                fields: Some(doc.fields),
            };
            self.inner.connection.emit(message.into(), Some(origin.clone()));
        }
        async move { pending.wait(None).await }.boxed()
    }

    pub(crate) fn decode_snapshot(&self, data: ImportData) -> Result<Vec<ImportedDocument>, ClientError> {
        let value = match data {
            ImportData::Text(text) => self.inner.codec.decode(&text)?,
            ImportData::Raw(value) => value,
        };
        data::parse_snapshot(value)
    }

    pub(crate) fn encode_snapshot(&self, value: Value, format: ExportFormat) -> Result<Exported, ClientError> {
        match format {
            ExportFormat::String => Ok(Exported::String(self.inner.codec.encode(&value)?)),
            ExportFormat::Raw => Ok(Exported::Raw(value)),
        }
    }

    pub(crate) fn store(&self) -> &DataStore {
        &self.inner.store
    }

    // ── Authentication ───────────────────────────────────────────────

    /// Call the `login` method with `params`. Emits `login`, or
    /// `loginResume` for token logins, on success.
    pub fn login(&self, params: Value) -> BoxFuture<'static, Result<User, ClientError>> {
        let call = self.apply("login", vec![params], false);
        let inner = Arc::clone(&self.inner);
        async move {
            let response = call.await?;
            if response.get("id").is_none() {
                return Err(ClientError::LoginRejected { response });
            }
            let user: User = serde_json::from_value(response.clone())?;
            {
                let mut auth = inner.auth.lock();
                auth.user_id = Some(user.id.clone());
                auth.token.clone_from(&user.token);
                auth.logged_in = true;
            }
            tracing::info!(user_id = %user.id, resume = user.is_resume(), "Logged in");
            let event = if user.is_resume() {
                Event::LoginResume(response)
            } else {
                Event::Login(response)
            };
            inner.connection.emit(event, None);
            Ok(user)
        }
        .boxed()
    }

    pub fn login_with_password(&self, username: &str, password: &str) -> BoxFuture<'static, Result<User, ClientError>> {
        self.login(json!({ "user": { "username": username }, "password": password }))
    }

    /// Resume a session with a token from an earlier login.
    pub fn login_with_token(&self, token: &str) -> BoxFuture<'static, Result<User, ClientError>> {
        self.login(json!({ "resume": token }))
    }

    /// Call the `logout` method. Does nothing when not logged in.
    pub fn logout(&self) -> BoxFuture<'static, Result<(), ClientError>> {
        if !self.is_logged_in() {
            return future::ready(Ok(())).boxed();
        }
        let call = self.apply("logout", Vec::new(), false);
        let inner = Arc::clone(&self.inner);
        async move {
            call.await?;
            *inner.auth.lock() = Auth::default();
            tracing::info!("Logged out");
            inner.connection.emit(Event::Logout, None);
            Ok(())
        }
        .boxed()
    }

    pub fn is_logged_in(&self) -> bool {
        self.inner.auth.lock().logged_in
    }

    pub fn user_id(&self) -> Option<String> {
        self.inner.auth.lock().user_id.clone()
    }

    pub fn token(&self) -> Option<String> {
        self.inner.auth.lock().token.clone()
    }

    pub fn options(&self) -> &ClientOptions {
        &self.inner.options
    }

    // ── Wiring ───────────────────────────────────────────────────────

    /// Install the internal listeners, giving plugins a turn between each.
    fn install(&self) {
        let plugins = self.inner.plugins.clone();
        let weak = Arc::downgrade(&self.inner);
        plugins.run(&[HookPoint::Init, HookPoint::BeforeConnected], self);

        self.keep(self.inner.events.on(EventKind::Connected, {
            let weak = Weak::clone(&weak);
            move |_, _| {
                if let Some(inner) = weak.upgrade() {
                    let mut flags = inner.flags.lock();
                    flags.connected = true;
                    flags.trying_to_connect = false;
                }
            }
        }));
        plugins.run(&[HookPoint::AfterConnected, HookPoint::BeforeSubsRestart], self);

        self.keep(self.inner.events.on(EventKind::Connected, {
            let weak = Weak::clone(&weak);
            move |_, _| {
                if let Some(inner) = weak.upgrade() {
                    Client { inner }.after_connected();
                }
            }
        }));
        plugins.run(&[HookPoint::AfterSubsRestart, HookPoint::BeforeDisconnected], self);

        self.keep(self.inner.events.on(EventKind::Disconnected, {
            let weak = Weak::clone(&weak);
            move |_, _| {
                if let Some(inner) = weak.upgrade() {
                    let mut flags = inner.flags.lock();
                    flags.connected = false;
                    flags.trying_to_disconnect = false;
                    flags.trying_to_connect = flags.will_try_to_reconnect;
                }
            }
        }));
        plugins.run(&[HookPoint::AfterDisconnected, HookPoint::BeforeAdded], self);

        self.keep(self.inner.events.on(EventKind::Added, {
            let weak = Weak::clone(&weak);
            move |event, _| {
                let Some(ServerMessage::Added { collection, id, fields }) = event.message() else {
                    return;
                };
                if let Some(inner) = weak.upgrade() {
                    inner.store.dispatch_added(collection, id, fields.as_ref());
                }
            }
        }));
        plugins.run(&[HookPoint::AfterAdded, HookPoint::BeforeChanged], self);

        self.keep(self.inner.events.on(EventKind::Changed, {
            let weak = Weak::clone(&weak);
            move |event, _| {
                let Some(ServerMessage::Changed {
                    collection,
                    id,
                    fields,
                    cleared,
                }) = event.message()
                else {
                    return;
                };
                if let Some(inner) = weak.upgrade() {
                    inner
                        .store
                        .dispatch_changed(collection, id, fields.as_ref(), cleared.as_deref());
                }
            }
        }));
        plugins.run(&[HookPoint::AfterChanged, HookPoint::BeforeRemoved], self);

        self.keep(self.inner.events.on(EventKind::Removed, move |event, _| {
            let Some(ServerMessage::Removed { collection, id }) = event.message() else {
                return;
            };
            if let Some(inner) = weak.upgrade() {
                inner.store.dispatch_removed(collection, id);
            }
        }));
        plugins.run(&[HookPoint::AfterRemoved, HookPoint::After], self);
    }

    fn keep(&self, listener: EventListener) {
        self.inner.internal.lock().push(listener);
    }

    /// Post-handshake housekeeping: optional data reset, `clientReady`, then
    /// subscription restarts.
    fn after_connected(self) {
        let cleared = self
            .inner
            .options
            .clear_data_on_reconnection
            .then(|| self.clear_data());

        tokio::spawn(async move {
            if let Some(cleared) = cleared {
                if let Err(err) = cleared.await {
                    tracing::warn!(error = %err, "Clearing data after reconnection failed");
                }
            }
            self.inner.connection.emit(Event::ClientReady, None);
            self.restart_subs();
        });
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("endpoint", &self.inner.options.endpoint.as_str())
            .field("flags", &*self.inner.flags.lock())
            .field("subscriptions", &self.inner.subs.lock().len())
            .field("plugins", &self.inner.plugins.len())
            .finish_non_exhaustive()
    }
}

/// Matcher resolving once `total` events tagged `origin` have gone by.
fn count_echoes(origin: String, total: usize) -> impl Fn(&Event, Option<&str>) -> Option<()> + Send + Sync + 'static {
    let seen = AtomicUsize::new(0);
    move |_, from| {
        if from != Some(origin.as_str()) {
            return None;
        }
        (seen.fetch_add(1, Ordering::Relaxed) + 1 == total).then_some(())
    }
}

// ── ClientInner ──────────────────────────────────────────────────────

impl ClientInner {
    pub(crate) fn events(&self) -> &EventBus {
        &self.events
    }

    pub(crate) fn connection(&self) -> &Connection {
        &self.connection
    }

    pub(crate) fn forget_subscription(&self, sub: &Subscription) {
        self.subs.lock().retain(|existing| !existing.ptr_eq(sub));
    }

    fn next_origin(&self) -> String {
        format!("{}-{}", self.instance, self.next_op.fetch_add(1, Ordering::Relaxed))
    }
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        for listener in self.internal.get_mut().drain(..) {
            listener.stop();
        }
        self.cancel.cancel();
        self.connection.shutdown();
    }
}

/// Deliver emissions to the bus, in order, until the client goes away.
async fn dispatch_loop(
    inner: Weak<ClientInner>,
    mut emissions: mpsc::UnboundedReceiver<Emission>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            emission = emissions.recv() => {
                let Some(emission) = emission else { break };
                let Some(inner) = inner.upgrade() else { break };
                tracing::trace!(kind = %emission.event.kind(), origin = ?emission.origin, "Dispatching");
                inner.events.dispatch(&emission);
            }
        }
    }
    tracing::debug!("Client dispatcher stopped");
}

// ── ClientBuilder ────────────────────────────────────────────────────

/// Builder for clients with a custom transport, codec or plugins.
pub struct ClientBuilder {
    options: ClientOptions,
    transport: Option<Arc<dyn Transport>>,
    codec: Option<Arc<dyn Codec>>,
    plugins: Plugins,
}

impl ClientBuilder {
    pub fn new(options: ClientOptions) -> Self {
        Self {
            options,
            transport: None,
            codec: None,
            plugins: Plugins::default(),
        }
    }

    pub fn transport(mut self, transport: impl Transport + 'static) -> Self {
        self.transport = Some(Arc::new(transport));
        self
    }

    pub fn codec(mut self, codec: impl Codec) -> Self {
        self.codec = Some(Arc::new(codec));
        self
    }

    /// Add a plugin. Plugins run in the order they were added.
    pub fn plugin(mut self, plugin: impl Plugin + 'static) -> Self {
        self.plugins.push(Arc::new(plugin));
        self
    }

    /// Build the client and spawn its tasks. Connects right away when
    /// `auto_connect` is set.
    pub fn build(self) -> Client {
        let Self {
            options,
            transport,
            codec,
            plugins,
        } = self;

        let transport = transport.unwrap_or_else(|| Arc::new(WebSocketTransport::new()));
        let codec = codec.unwrap_or_else(|| Arc::new(JsonCodec));
        let (connection, emissions) =
            ddplink_api::Connection::new(options.connection_options(), transport, Arc::clone(&codec));
        let cancel = CancellationToken::new();

        let inner = Arc::new(ClientInner {
            flags: Mutex::new(Flags {
                connected: false,
                trying_to_connect: options.auto_connect,
                trying_to_disconnect: false,
                will_try_to_reconnect: options.auto_reconnect,
            }),
            options,
            connection,
            codec,
            events: EventBus::default(),
            store: DataStore::new(),
            subs: Mutex::new(Vec::new()),
            auth: Mutex::new(Auth::default()),
            plugins,
            internal: Mutex::new(Vec::new()),
            instance: NEXT_INSTANCE.fetch_add(1, Ordering::Relaxed),
            next_op: AtomicU64::new(0),
            cancel: cancel.clone(),
        });

        tokio::spawn(dispatch_loop(Arc::downgrade(&inner), emissions, cancel));

        let client = Client { inner };
        client.install();
        if client.inner.options.auto_connect {
            tracing::debug!(endpoint = %client.inner.options.endpoint, "Auto-connecting");
            client.inner.connection.connect();
        }
        client
    }
}

impl std::fmt::Debug for ClientBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientBuilder")
            .field("options", &self.options)
            .field("custom_transport", &self.transport.is_some())
            .field("custom_codec", &self.codec.is_some())
            .field("plugins", &self.plugins.len())
            .finish()
    }
}
