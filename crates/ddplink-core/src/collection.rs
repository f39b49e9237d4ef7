// ── Collection views ──
//
// A `CollectionView` is a named, optionally pre-filtered handle onto one
// collection of the client's store. It owns no data: every read goes to the
// store and returns independent copies.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use futures_util::future::{self, BoxFuture, FutureExt};

use crate::client::Client;
use crate::data::{self, ExportFormat, Exported, ImportData};
use crate::error::ClientError;
use crate::reactive::{ReactiveCollection, ReactiveSettings};
use crate::store::{Change, ChangeListener, Document, Filter, FilteredChange};

/// Ordering between two documents.
pub type Comparator = Arc<dyn Fn(&Document, &Document) -> Ordering + Send + Sync>;

/// Options for [`CollectionView::fetch`].
#[derive(Clone, Default)]
pub struct FetchSettings {
    pub skip: usize,
    pub limit: Option<usize>,
    pub sort: Option<Comparator>,
}

impl FetchSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn skip(mut self, n: usize) -> Self {
        self.skip = n;
        self
    }

    pub fn limit(mut self, n: usize) -> Self {
        self.limit = Some(n);
        self
    }

    pub fn sort_by<F>(mut self, cmp: F) -> Self
    where
        F: Fn(&Document, &Document) -> Ordering + Send + Sync + 'static,
    {
        self.sort = Some(Arc::new(cmp));
        self
    }
}

impl fmt::Debug for FetchSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchSettings")
            .field("skip", &self.skip)
            .field("limit", &self.limit)
            .field("sorted", &self.sort.is_some())
            .finish()
    }
}

// ── CollectionView ───────────────────────────────────────────────────

#[derive(Clone)]
pub struct CollectionView {
    name: String,
    client: Client,
    filter: Option<Filter>,
}

impl CollectionView {
    pub(crate) fn new(client: Client, name: &str) -> Self {
        Self {
            name: name.to_owned(),
            client,
            filter: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_filtered(&self) -> bool {
        self.filter.is_some()
    }

    /// Restrict the view to documents matching `predicate`.
    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Document) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Arc::new(predicate));
        self
    }

    pub fn clear_filter(mut self) -> Self {
        self.filter = None;
        self
    }

    // ── Reads ────────────────────────────────────────────────────────

    /// Matching documents: filter, then stable sort, then skip and limit.
    pub fn fetch(&self, settings: &FetchSettings) -> Vec<Document> {
        let mut docs = self.client.store().fetch(&self.name);
        if let Some(filter) = &self.filter {
            docs.retain(|doc| filter(doc));
        }
        if let Some(cmp) = &settings.sort {
            docs.sort_by(|a, b| cmp(a, b));
        }
        let mut docs: Vec<_> = docs.into_iter().skip(settings.skip).collect();
        if let Some(limit) = settings.limit {
            docs.truncate(limit);
        }
        docs
    }

    pub fn fetch_all(&self) -> Vec<Document> {
        self.fetch(&FetchSettings::default())
    }

    // ── Listeners ────────────────────────────────────────────────────

    /// Every mutation of the collection, ignoring the view's filter.
    pub fn on_change<F>(&self, callback: F) -> ChangeListener
    where
        F: Fn(&Change) + Send + Sync + 'static,
    {
        self.client.store().on_change(&self.name, callback)
    }

    /// Mutations touching the view's filter. An unfiltered view reports
    /// every mutation as a transition of an always-true predicate.
    pub fn observe<F>(&self, callback: F) -> ChangeListener
    where
        F: Fn(&FilteredChange) + Send + Sync + 'static,
    {
        self.client.store().observe(&self.name, self.filter_or_all(), callback)
    }

    /// Mutations touching `predicate`, independent of the view's filter.
    pub fn observe_with<P, F>(&self, predicate: P, callback: F) -> ChangeListener
    where
        P: Fn(&Document) -> bool + Send + Sync + 'static,
        F: Fn(&FilteredChange) + Send + Sync + 'static,
    {
        self.client.store().observe(&self.name, Arc::new(predicate), callback)
    }

    // ── Bulk data ────────────────────────────────────────────────────

    /// Import the documents of this collection found in `data`. Documents of
    /// other collections, or failing the view's filter, are ignored.
    pub fn import_data(&self, data: impl Into<ImportData>) -> BoxFuture<'static, Result<(), ClientError>> {
        let documents = match self.client.decode_snapshot(data.into()) {
            Ok(documents) => documents,
            Err(err) => return future::ready(Err(err)).boxed(),
        };
        let documents = documents
            .into_iter()
            .filter(|doc| doc.collection == self.name)
            .filter(|doc| self.filter.as_ref().is_none_or(|filter| filter(&doc.to_document())))
            .collect();
        self.client.import_documents(documents)
    }

    /// Snapshot of this view as `{ name: [documents] }`.
    pub fn export_data(&self, format: ExportFormat) -> Result<Exported, ClientError> {
        let mut collections = indexmap::IndexMap::new();
        collections.insert(self.name.clone(), self.fetch_all());
        self.client.encode_snapshot(data::snapshot_value(collections), format)
    }

    // ── Reactive ─────────────────────────────────────────────────────

    /// Live window over this view.
    pub fn reactive(&self, settings: ReactiveSettings) -> ReactiveCollection {
        ReactiveCollection::new(self.clone(), settings)
    }

    pub(crate) fn filter_or_all(&self) -> Filter {
        match &self.filter {
            Some(filter) => Arc::clone(filter),
            None => Arc::new(|_: &Document| true),
        }
    }

    pub(crate) fn client(&self) -> &Client {
        &self.client
    }
}

impl fmt::Debug for CollectionView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollectionView")
            .field("name", &self.name)
            .field("filtered", &self.filter.is_some())
            .finish_non_exhaustive()
    }
}
