use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use super::collection::{ReactiveCollection, ReactiveInner};
use super::WindowDependent;
use crate::listener::{Listener, Registry};
use crate::store::Document;

pub type DocumentTicker = dyn Fn(Option<&Document>) + Send + Sync;

/// Start/stop handle for [`ReactiveDocument::on_change`].
pub type DocumentListener = Listener<DocumentTicker>;

/// Mirror of the first element of a reactive collection's window.
#[derive(Clone)]
pub struct ReactiveDocument {
    state: Arc<DocumentState>,
    registration: Listener<dyn WindowDependent>,
}

struct DocumentState {
    data: Mutex<Option<Document>>,
    preserve: AtomicBool,
    tickers: Arc<Registry<DocumentTicker>>,
    source: Weak<ReactiveInner>,
}

impl ReactiveDocument {
    pub(super) fn new(collection: &ReactiveCollection, preserve: bool) -> Self {
        let state = Arc::new(DocumentState {
            data: Mutex::new(None),
            preserve: AtomicBool::new(preserve),
            tickers: Registry::new(),
            source: Arc::downgrade(&collection.inner),
        });
        let dependent: Arc<dyn WindowDependent> = Arc::clone(&state) as Arc<dyn WindowDependent>;
        let registration = collection.inner.documents.register(dependent);

        let document = Self { state, registration };
        document.start();
        document
    }

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

    /// Current document, if any.
    pub fn data(&self) -> Option<Document> {
        self.state.data.lock().clone()
    }

    /// Keep the last document when the window empties.
    pub fn settings(&self, preserve: bool) -> &Self {
        self.state.preserve.store(preserve, Ordering::Relaxed);
        self
    }

    pub fn preserves(&self) -> bool {
        self.state.preserve.load(Ordering::Relaxed)
    }

    pub fn on_change<F>(&self, f: F) -> DocumentListener
    where
        F: Fn(Option<&Document>) + Send + Sync + 'static,
    {
        self.state.tickers.listen(Arc::new(f))
    }
}

impl std::fmt::Debug for ReactiveDocument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReactiveDocument")
            .field("data", &self.data())
            .field("preserve", &self.preserves())
            .field("started", &self.is_started())
            .finish()
    }
}

impl WindowDependent for DocumentState {
    fn refresh(&self, window: &[Document]) {
        let current = {
            let mut data = self.data.lock();
            match window.first() {
                Some(head) => *data = Some(head.clone()),
                None if self.preserve.load(Ordering::Relaxed) => {}
                None => *data = None,
            }
            data.clone()
        };
        self.tickers.for_each(|ticker| ticker(current.as_ref()));
    }
}
