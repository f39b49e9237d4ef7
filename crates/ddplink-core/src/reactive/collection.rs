use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

use super::document::ReactiveDocument;
use super::reducer::Reducer;
use super::window::{Window, UNLIMITED};
use super::WindowDependent;
use crate::collection::{CollectionView, Comparator, FetchSettings};
use crate::listener::{Listener, Registry};
use crate::store::{ChangeListener, Document, FilteredChange, Transition};

pub type Ticker = dyn Fn(&[Document]) + Send + Sync;

/// Start/stop handle for [`ReactiveCollection::on_change`].
pub type TickerListener = Listener<Ticker>;

// ── Settings ─────────────────────────────────────────────────────────

/// Ordering of a reactive collection.
#[derive(Clone)]
pub enum Sort {
    /// Arrival order.
    Natural,
    By(Comparator),
}

impl std::fmt::Debug for Sort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Natural => f.write_str("Natural"),
            Self::By(_) => f.write_str("By(..)"),
        }
    }
}

/// Window settings. Unset fields keep their current value when applied to
/// an existing collection.
#[derive(Debug, Clone, Default)]
pub struct ReactiveSettings {
    skip: Option<usize>,
    limit: Option<usize>,
    sort: Option<Sort>,
}

impl ReactiveSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn skip(mut self, n: usize) -> Self {
        self.skip = Some(n);
        self
    }

    pub fn limit(mut self, n: usize) -> Self {
        self.limit = Some(n);
        self
    }

    /// Remove the limit.
    pub fn unlimited(mut self) -> Self {
        self.limit = Some(UNLIMITED);
        self
    }

    pub fn sort(mut self, sort: Sort) -> Self {
        self.sort = Some(sort);
        self
    }

    pub fn sort_by<F>(self, cmp: F) -> Self
    where
        F: Fn(&Document, &Document) -> std::cmp::Ordering + Send + Sync + 'static,
    {
        self.sort(Sort::By(Arc::new(cmp)))
    }
}

// ── ReactiveCollection ───────────────────────────────────────────────

/// Incrementally maintained window over a [`CollectionView`].
///
/// Documents passing the view's filter are mirrored (sorted when a
/// comparator is set) and the window `[skip, skip + limit)` of that mirror is
/// exposed through [`data`](Self::data). Each upstream change patches the
/// mirror in place; changing the settings rebuilds it from the store.
///
/// Reducers and documents derived from this collection stop updating once
/// every handle to it has been dropped.
#[derive(Clone)]
pub struct ReactiveCollection {
    pub(super) inner: Arc<ReactiveInner>,
}

pub(crate) struct ReactiveInner {
    source: CollectionView,
    state: Mutex<ReactiveState>,
    length: watch::Sender<usize>,
    pub(super) reducers: Arc<Registry<dyn WindowDependent>>,
    pub(super) documents: Arc<Registry<dyn WindowDependent>>,
    tickers: Arc<Registry<Ticker>>,
    handler: ChangeListener,
}

struct ReactiveState {
    window: Window,
    sort: Option<Comparator>,
    /// Window head as last pushed to documents.
    first: Option<Document>,
}

impl ReactiveCollection {
    pub(crate) fn new(source: CollectionView, settings: ReactiveSettings) -> Self {
        let mut window = Window::default();
        window.reset(
            settings.skip.unwrap_or(0),
            settings.limit.unwrap_or(UNLIMITED),
            Vec::new(),
        );
        let sort = match settings.sort {
            Some(Sort::By(cmp)) => Some(cmp),
            Some(Sort::Natural) | None => None,
        };

        let inner = Arc::new_cyclic(|weak: &Weak<ReactiveInner>| {
            let weak = Weak::clone(weak);
            let handler = source.client().store().register_filtered(
                source.name(),
                source.filter_or_all(),
                move |change| {
                    if let Some(inner) = weak.upgrade() {
                        inner.apply(change);
                    }
                },
            );
            let (length, _) = watch::channel(0);
            ReactiveInner {
                source,
                state: Mutex::new(ReactiveState {
                    window,
                    sort,
                    first: None,
                }),
                length,
                reducers: Registry::new(),
                documents: Registry::new(),
                tickers: Registry::new(),
                handler,
            }
        });

        let collection = Self { inner };
        collection.start();
        collection
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Resume following the collection, rebuilding the window first.
    pub fn start(&self) {
        if !self.inner.handler.is_active() {
            self.inner.handler.start();
            self.inner.resync(None);
        }
    }

    /// Stop following the collection. Dependents keep their last values.
    pub fn stop(&self) {
        self.inner.handler.stop();
    }

    pub fn is_started(&self) -> bool {
        self.inner.handler.is_active()
    }

    // ── Settings ─────────────────────────────────────────────────────

    /// Apply new window settings and rebuild from the store.
    pub fn settings(&self, settings: &ReactiveSettings) -> &Self {
        self.inner.resync(Some(settings));
        self
    }

    pub fn skip(&self, n: usize) -> &Self {
        self.settings(&ReactiveSettings::new().skip(n))
    }

    pub fn limit(&self, n: usize) -> &Self {
        self.settings(&ReactiveSettings::new().limit(n))
    }

    pub fn sort(&self, sort: Sort) -> &Self {
        self.settings(&ReactiveSettings::new().sort(sort))
    }

    // ── Reads ────────────────────────────────────────────────────────

    /// Copy of the current window.
    pub fn data(&self) -> Vec<Document> {
        self.inner.data()
    }

    pub fn len(&self) -> usize {
        *self.inner.length.borrow()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reactive window length.
    pub fn count(&self) -> watch::Receiver<usize> {
        self.inner.length.subscribe()
    }

    pub fn count_stream(&self) -> WatchStream<usize> {
        WatchStream::new(self.count())
    }

    /// Call `f` with the window after every change.
    pub fn on_change<F>(&self, f: F) -> TickerListener
    where
        F: Fn(&[Document]) + Send + Sync + 'static,
    {
        self.inner.tickers.listen(Arc::new(f))
    }

    // ── Dependents ───────────────────────────────────────────────────

    /// Fold the window with `f`, recomputed on every change.
    pub fn reduce<R, F>(&self, f: F, initial: R) -> Reducer<R>
    where
        R: Clone + Send + Sync + 'static,
        F: Fn(R, &Document, usize, &[Document]) -> R + Send + Sync + 'static,
    {
        Reducer::new(self, Box::new(f), initial)
    }

    /// Map every window element, recomputed on every change.
    pub fn map<T, F>(&self, f: F) -> Reducer<Vec<T>>
    where
        T: Clone + Send + Sync + 'static,
        F: Fn(&Document, usize, &[Document]) -> T + Send + Sync + 'static,
    {
        self.reduce(
            move |mut acc: Vec<T>, doc, index, window| {
                acc.push(f(doc, index, window));
                acc
            },
            Vec::new(),
        )
    }

    /// Mirror of the window's first element.
    ///
    /// With `preserve`, the last seen document is kept when the window
    /// empties; otherwise the mirror clears.
    pub fn one(&self, preserve: bool) -> ReactiveDocument {
        ReactiveDocument::new(self, preserve)
    }
}

impl std::fmt::Debug for ReactiveCollection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReactiveCollection")
            .field("collection", &self.inner.source.name())
            .field("len", &self.len())
            .field("started", &self.is_started())
            .finish_non_exhaustive()
    }
}

// ── Maintenance ──────────────────────────────────────────────────────

impl ReactiveInner {
    pub(super) fn data(&self) -> Vec<Document> {
        self.state.lock().window.view().to_vec()
    }

    fn apply(&self, change: &FilteredChange) {
        let (view, head_changed) = {
            let mut guard = self.state.lock();
            let ReactiveState { window, sort, first } = &mut *guard;
            let sort = sort.as_ref();

            match (change.transition, &change.prev, &change.next) {
                // `replace` inserts when the id is unknown, which also covers
                // a change that raced a resync and is already mirrored.
                (Transition::Entered, _, Some(next)) => window.replace(next.id(), next.clone(), sort),
                (Transition::Exited, Some(prev), _) => {
                    window.remove(prev.id());
                }
                (Transition::Stayed, Some(prev), Some(next)) => {
                    window.replace(prev.id(), next.clone(), sort);
                }
                _ => {}
            }

            let view = window.view().to_vec();
            let head = view.first().cloned();
            let head_changed = head != *first;
            *first = head;
            (view, head_changed)
        };

        self.publish(&view, head_changed);
    }

    /// Rebuild mirror and window from the store, applying `update` first.
    fn resync(&self, update: Option<&ReactiveSettings>) {
        let view = {
            let mut state = self.state.lock();
            let mut skip = state.window.skip();
            let mut limit = state.window.limit();
            if let Some(update) = update {
                skip = update.skip.unwrap_or(skip);
                limit = update.limit.unwrap_or(limit);
                match &update.sort {
                    Some(Sort::By(cmp)) => state.sort = Some(Arc::clone(cmp)),
                    Some(Sort::Natural) => state.sort = None,
                    None => {}
                }
            }

            let raw = self.source.fetch(&FetchSettings {
                sort: state.sort.clone(),
                ..FetchSettings::default()
            });
            state.window.reset(skip, limit, raw);
            let view = state.window.view().to_vec();
            state.first = view.first().cloned();
            view
        };

        tracing::trace!(collection = self.source.name(), len = view.len(), "Reactive collection resynced");
        self.publish(&view, true);
    }

    fn publish(&self, view: &[Document], head_changed: bool) {
        self.length.send_replace(view.len());
        self.reducers.for_each(|reducer| reducer.refresh(view));
        if head_changed {
            self.documents.for_each(|doc| doc.refresh(view));
        }
        self.tickers.for_each(|ticker| ticker(view));
    }
}

impl Drop for ReactiveInner {
    fn drop(&mut self) {
        self.handler.stop();
    }
}
