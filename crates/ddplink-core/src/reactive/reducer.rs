use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use super::collection::{ReactiveCollection, ReactiveInner};
use super::WindowDependent;
use crate::listener::{Listener, Registry};
use crate::store::Document;

pub(super) type Fold<R> = dyn Fn(R, &Document, usize, &[Document]) -> R + Send + Sync;

pub type ReducerTicker<R> = dyn Fn(&R) + Send + Sync;

/// Start/stop handle for [`Reducer::on_change`].
pub type ReducerListener<R> = Listener<ReducerTicker<R>>;

/// A value folded from a reactive collection's window.
///
/// Recomputed from scratch on every window change while started. A stopped
/// reducer keeps its last value; starting it again recomputes from the
/// current window.
pub struct Reducer<R: Clone + Send + Sync + 'static> {
    state: Arc<ReducerState<R>>,
    registration: Listener<dyn WindowDependent>,
}

struct ReducerState<R> {
    fold: Box<Fold<R>>,
    initial: R,
    value: Mutex<R>,
    tickers: Arc<Registry<ReducerTicker<R>>>,
    source: Weak<ReactiveInner>,
}

impl<R: Clone + Send + Sync + 'static> Reducer<R> {
    pub(super) fn new(collection: &ReactiveCollection, fold: Box<Fold<R>>, initial: R) -> Self {
        let state = Arc::new(ReducerState {
            fold,
            value: Mutex::new(initial.clone()),
            initial,
            tickers: Registry::new(),
            source: Arc::downgrade(&collection.inner),
        });
        let dependent: Arc<dyn WindowDependent> = Arc::clone(&state) as Arc<dyn WindowDependent>;
        let registration = collection.inner.reducers.register(dependent);

        let reducer = Self { state, registration };
        reducer.start();
        reducer
    }

    /// Attach to the collection and recompute from its current window.
    pub fn start(&self) {
        if self.registration.is_active() {
            return;
        }
        self.registration.start();
        if let Some(source) = self.state.source.upgrade() {
            self.state.refresh(&source.data());
        }
    }

    pub fn stop(&self) {
        self.registration.stop();
    }

    pub fn is_started(&self) -> bool {
        self.registration.is_active()
    }

    /// Current value.
    pub fn data(&self) -> R {
        self.state.value.lock().clone()
    }

    /// Call `f` with the new value after every recomputation.
    pub fn on_change<F>(&self, f: F) -> ReducerListener<R>
    where
        F: Fn(&R) + Send + Sync + 'static,
    {
        self.state.tickers.listen(Arc::new(f))
    }
}

impl<R: Clone + Send + Sync + 'static> Clone for Reducer<R> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            registration: self.registration.clone(),
        }
    }
}

impl<R: Clone + Send + Sync + std::fmt::Debug + 'static> std::fmt::Debug for Reducer<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reducer")
            .field("value", &*self.state.value.lock())
            .field("started", &self.is_started())
            .finish_non_exhaustive()
    }
}

impl<R: Clone + Send + Sync + 'static> WindowDependent for ReducerState<R> {
    fn refresh(&self, window: &[Document]) {
        let value = window
            .iter()
            .enumerate()
            .fold(self.initial.clone(), |acc, (index, doc)| (self.fold)(acc, doc, index, window));
        *self.value.lock() = value.clone();
        self.tickers.for_each(|ticker| ticker(&value));
    }
}
