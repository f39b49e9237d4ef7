//! Reactive DDP client built on `ddplink-api`.
//!
//! - **[`Client`]**: Facade over one server connection: method calls,
//!   subscriptions, login, bulk import/export. Owns the collections store and
//!   the dispatcher task that feeds server messages into it.
//!
//! - **[`DataStore`]**: In-memory mirror of every collection. Applies
//!   `added`/`changed`/`removed` messages and fans them out to change
//!   listeners, raw or filtered by a predicate with enter/exit/stay
//!   transitions.
//!
//! - **[`CollectionView`]**: Named, optionally filtered handle onto one
//!   collection: `fetch`, change listeners, per-collection import/export.
//!
//! - **[`ReactiveCollection`]**: Sorted, filtered skip/limit window kept up
//!   to date incrementally, with [`Reducer`] and [`ReactiveDocument`]
//!   dependents.
//!
//! - **[`Subscription`]**: Lifecycle of one `(publication, args)` pair.
//!
//! Every start/stop handle in the crate is a [`Listener`] over a
//! [`Registry`].

pub mod client;
pub mod collection;
pub mod config;
pub mod data;
pub mod error;
pub mod event;
pub mod listener;
pub mod plugin;
pub mod reactive;
pub mod store;
pub mod subscription;

// ── Primary re-exports ──────────────────────────────────────────────
pub use client::{Client, ClientBuilder, User};
pub use collection::{CollectionView, Comparator, FetchSettings};
pub use config::ClientOptions;
pub use data::{ExportFormat, Exported, ImportData};
pub use error::ClientError;
pub use event::{EventBus, EventListener};
pub use listener::{Listener, ListenerGuard, Registry};
pub use plugin::{HookPoint, Plugin};
pub use reactive::{
    DocumentListener, ReactiveCollection, ReactiveDocument, ReactiveSettings, Reducer, ReducerListener, Sort,
    TickerListener,
};
pub use store::{
    Change, ChangeListener, DataStore, Delta, Document, FieldChange, Filter, FilteredChange, Transition,
};
pub use subscription::{Subscription, SubscriptionState};

// Wire-level types callers need alongside the facade.
pub use ddplink_api::{ConnectionState, Event, EventKind, MemoryTransport, RemoteError, ServerMessage, Transport};
