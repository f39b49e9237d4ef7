//! Authoritative in-memory mirror of server collections.
//!
//! The [`DataStore`] applies `added`/`changed`/`removed` messages and fans
//! each mutation out to the change listeners of the affected collection.
//! Mutation happens under the store lock; fan-out happens after it is
//! released, so listeners may read the store freely.

mod change;
mod document;

use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;
use serde_json::{Map, Value};

pub use change::{Change, Delta, FieldChange, FilteredChange, Transition};
pub use document::{same_id, Document, ID_FIELD};

use crate::listener::{Listener, Registry};

/// Predicate selecting documents of a collection.
pub type Filter = Arc<dyn Fn(&Document) -> bool + Send + Sync>;

type RawCallback = dyn Fn(&Change) + Send + Sync;
type FilteredCallback = dyn Fn(&FilteredChange) + Send + Sync;

enum ChangeCallback {
    Raw(Box<RawCallback>),
    Filtered {
        filter: Filter,
        callback: Box<FilteredCallback>,
    },
}

pub struct ChangeRegistration {
    collection: String,
    callback: ChangeCallback,
}

/// Start/stop handle for a collection change listener.
pub type ChangeListener = Listener<ChangeRegistration>;

// ── DataStore ────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct DataStore {
    collections: Mutex<IndexMap<String, Vec<Document>>>,
    listeners: Arc<Registry<ChangeRegistration>>,
}

impl Default for DataStore {
    fn default() -> Self {
        Self {
            collections: Mutex::new(IndexMap::new()),
            listeners: Registry::new(),
        }
    }
}

impl DataStore {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Dispatch ─────────────────────────────────────────────────────

    /// Apply an `added` message.
    ///
    /// A document already present under the same id is dropped first,
    /// without notifying anyone of its removal.
    pub fn dispatch_added(&self, collection: &str, id: &Value, fields: Option<&Map<String, Value>>) {
        if missing_id(collection, id) {
            return;
        }
        let doc = {
            let mut collections = self.collections.lock();
            let docs = collections.entry(collection.to_owned()).or_default();
            if let Some(pos) = docs.iter().position(|d| same_id(d.id(), id)) {
                tracing::debug!(collection, id = %id, "Document re-added, replacing previous copy");
                docs.remove(pos);
            }
            let doc = Document::new(id.clone(), fields);
            docs.push(doc.clone());
            doc
        };

        let presence: IndexMap<String, FieldChange> = fields
            .map(|f| f.keys().map(|k| (k.clone(), FieldChange::Set)).collect())
            .unwrap_or_default();

        self.notify(collection, &Change::Added(doc.clone()), |filter| {
            filter(&doc).then(|| FilteredChange {
                prev: None,
                next: Some(doc.clone()),
                fields: presence.clone(),
                fields_changed: doc.fields().clone(),
                fields_removed: Vec::new(),
                transition: Transition::Entered,
            })
        });
    }

    /// Apply a `changed` message. An unknown id is treated as an addition.
    pub fn dispatch_changed(
        &self,
        collection: &str,
        id: &Value,
        fields: Option<&Map<String, Value>>,
        cleared: Option<&[String]>,
    ) {
        if missing_id(collection, id) {
            return;
        }
        let applied = {
            let mut collections = self.collections.lock();
            let docs = collections.entry(collection.to_owned()).or_default();
            docs.iter_mut().find(|d| same_id(d.id(), id)).map(|doc| {
                let prev = doc.clone();
                if let Some(fields) = fields {
                    doc.merge(fields);
                }
                for name in cleared.unwrap_or_default() {
                    doc.clear_field(name);
                }
                (prev, doc.clone())
            })
        };

        let Some((prev, next)) = applied else {
            tracing::debug!(collection, id = %id, "Change for unknown document, treating as added");
            self.dispatch_added(collection, id, fields);
            return;
        };

        let mut presence = IndexMap::new();
        if let Some(fields) = fields {
            presence.extend(fields.keys().map(|k| (k.clone(), FieldChange::Set)));
        }
        let fields_removed = cleared.map(<[String]>::to_vec).unwrap_or_default();
        presence.extend(fields_removed.iter().map(|k| (k.clone(), FieldChange::Cleared)));

        let delta = Delta {
            prev,
            next,
            fields: presence,
            fields_changed: fields.cloned().unwrap_or_default(),
            fields_removed,
        };

        self.notify(collection, &Change::Changed(delta.clone()), |filter| {
            Transition::from_flags(filter(&delta.prev), filter(&delta.next)).map(|transition| {
                FilteredChange {
                    prev: Some(delta.prev.clone()),
                    next: Some(delta.next.clone()),
                    fields: delta.fields.clone(),
                    fields_changed: delta.fields_changed.clone(),
                    fields_removed: delta.fields_removed.clone(),
                    transition,
                }
            })
        });
    }

    /// Apply a `removed` message. Unknown ids are ignored.
    pub fn dispatch_removed(&self, collection: &str, id: &Value) {
        if missing_id(collection, id) {
            return;
        }
        let removed = {
            let mut collections = self.collections.lock();
            let docs = collections.entry(collection.to_owned()).or_default();
            let pos = docs.iter().position(|d| same_id(d.id(), id));
            pos.map(|pos| docs.remove(pos))
        };
        let Some(doc) = removed else {
            return;
        };

        self.notify(collection, &Change::Removed(doc.clone()), |filter| {
            filter(&doc).then(|| FilteredChange {
                prev: Some(doc.clone()),
                next: None,
                fields: IndexMap::new(),
                fields_changed: Map::new(),
                fields_removed: Vec::new(),
                transition: Transition::Exited,
            })
        });
    }

    fn notify<F>(&self, collection: &str, change: &Change, filtered: F)
    where
        F: Fn(&Filter) -> Option<FilteredChange>,
    {
        self.listeners.for_each(|registration| {
            if registration.collection != collection {
                return;
            }
            match &registration.callback {
                ChangeCallback::Raw(callback) => callback(change),
                ChangeCallback::Filtered { filter, callback } => {
                    if let Some(change) = filtered(filter) {
                        callback(&change);
                    }
                }
            }
        });
    }

    // ── Reads ────────────────────────────────────────────────────────

    /// Copies of every document in `collection`, in arrival order.
    pub fn fetch(&self, collection: &str) -> Vec<Document> {
        self.collections
            .lock()
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }

    /// Copy of every collection.
    pub fn snapshot(&self) -> IndexMap<String, Vec<Document>> {
        self.collections.lock().clone()
    }

    /// `(collection, id)` of every held document.
    pub fn document_ids(&self) -> Vec<(String, Value)> {
        self.collections
            .lock()
            .iter()
            .flat_map(|(name, docs)| docs.iter().map(move |d| (name.clone(), d.id().clone())))
            .collect()
    }

    pub fn document_count(&self) -> usize {
        self.collections.lock().values().map(Vec::len).sum()
    }

    // ── Listeners ────────────────────────────────────────────────────

    /// Listen to every mutation of `collection`.
    pub fn on_change<F>(&self, collection: &str, callback: F) -> ChangeListener
    where
        F: Fn(&Change) + Send + Sync + 'static,
    {
        self.listeners.listen(Arc::new(ChangeRegistration {
            collection: collection.to_owned(),
            callback: ChangeCallback::Raw(Box::new(callback)),
        }))
    }

    /// Listen to mutations of `collection` that touch `filter`.
    pub fn observe<F>(&self, collection: &str, filter: Filter, callback: F) -> ChangeListener
    where
        F: Fn(&FilteredChange) + Send + Sync + 'static,
    {
        let listener = self.register_filtered(collection, filter, callback);
        listener.start();
        listener
    }

    /// Like [`observe`](Self::observe) but leaves the listener stopped.
    pub(crate) fn register_filtered<F>(&self, collection: &str, filter: Filter, callback: F) -> ChangeListener
    where
        F: Fn(&FilteredChange) + Send + Sync + 'static,
    {
        self.listeners.register(Arc::new(ChangeRegistration {
            collection: collection.to_owned(),
            callback: ChangeCallback::Filtered {
                filter,
                callback: Box::new(callback),
            },
        }))
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Detach every change listener.
    pub fn clear_listeners(&self) {
        self.listeners.clear();
    }
}

// ── Tests ────────────────────────────────────────────────────────────

/// Frames without a document id carry nothing to apply.
fn missing_id(collection: &str, id: &Value) -> bool {
    if id.is_null() {
        tracing::debug!(collection, "Ignoring document message without an id");
        return true;
    }
    false
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn fields(value: &Value) -> Option<&Map<String, Value>> {
        value.as_object()
    }

    fn recorder<T: Clone + Send + 'static>() -> (Arc<Mutex<Vec<T>>>, impl Fn(&T) + Send + Sync + 'static) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        (seen, move |item: &T| sink.lock().push(item.clone()))
    }

    #[test]
    fn added_then_fetch() {
        let store = DataStore::new();
        store.dispatch_added("items", &json!("1"), fields(&json!({ "v": 1 })));
        assert_eq!(
            store.fetch("items").into_iter().map(Value::from).collect::<Vec<_>>(),
            vec![json!({ "_id": "1", "v": 1 })]
        );
    }

    #[test]
    fn readd_replaces_without_duplicate() {
        let store = DataStore::new();
        store.dispatch_added("items", &json!("1"), fields(&json!({ "v": 1 })));
        store.dispatch_added("items", &json!(1), fields(&json!({ "v": 2 })));
        let docs = store.fetch("items");
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0]["v"], 2);
    }

    #[test]
    fn changed_merges_and_clears() {
        let store = DataStore::new();
        let (seen, record) = recorder::<Change>();
        let _listener = store.on_change("items", record);

        store.dispatch_added("items", &json!("1"), fields(&json!({ "a": 1, "b": 2 })));
        store.dispatch_changed(
            "items",
            &json!("1"),
            fields(&json!({ "a": 5 })),
            Some(&["b".to_owned()]),
        );

        let seen = seen.lock();
        let Change::Changed(delta) = &seen[1] else {
            panic!("expected change, got {:?}", seen[1]);
        };
        assert_eq!(Value::from(delta.prev.clone()), json!({ "_id": "1", "a": 1, "b": 2 }));
        assert_eq!(Value::from(delta.next.clone()), json!({ "_id": "1", "a": 5 }));
        assert_eq!(delta.fields["a"], FieldChange::Set);
        assert_eq!(delta.fields["b"], FieldChange::Cleared);
        assert_eq!(delta.fields_removed, vec!["b".to_owned()]);
    }

    #[test]
    fn changed_for_unknown_id_becomes_added() {
        let store = DataStore::new();
        let (seen, record) = recorder::<Change>();
        let _listener = store.on_change("items", record);

        store.dispatch_changed("items", &json!("9"), fields(&json!({ "v": 1 })), None);

        assert!(matches!(seen.lock()[0], Change::Added(_)));
        assert_eq!(store.document_count(), 1);
    }

    #[test]
    fn filtered_transitions() {
        let store = DataStore::new();
        let (seen, record) = recorder::<FilteredChange>();
        let filter: Filter = Arc::new(|doc: &Document| doc["v"].as_i64().is_some_and(|v| v > 1));
        let _listener = store.observe("items", filter, record);

        store.dispatch_added("items", &json!("a"), fields(&json!({ "v": 1 })));
        store.dispatch_changed("items", &json!("a"), fields(&json!({ "v": 2 })), None);
        store.dispatch_changed("items", &json!("a"), fields(&json!({ "v": 3 })), None);
        store.dispatch_changed("items", &json!("a"), fields(&json!({ "v": 1 })), None);
        store.dispatch_removed("items", &json!("a"));

        let transitions: Vec<_> = seen.lock().iter().map(|c| c.transition).collect();
        assert_eq!(
            transitions,
            vec![Transition::Entered, Transition::Stayed, Transition::Exited]
        );
    }

    #[test]
    fn listeners_only_see_their_collection() {
        let store = DataStore::new();
        let (seen, record) = recorder::<Change>();
        let listener = store.on_change("items", record);

        store.dispatch_added("other", &json!("x"), None);
        store.dispatch_removed("items", &json!("missing"));
        assert!(seen.lock().is_empty());

        listener.stop();
        store.dispatch_added("items", &json!("y"), None);
        assert!(seen.lock().is_empty());
    }

    #[test]
    fn messages_without_id_are_ignored() {
        let store = DataStore::new();
        let (seen, record) = recorder::<Change>();
        let _listener = store.on_change("items", record);

        store.dispatch_added("items", &json!("1"), fields(&json!({ "v": 1 })));
        store.dispatch_added("items", &Value::Null, fields(&json!({ "v": 2 })));
        store.dispatch_changed("items", &Value::Null, fields(&json!({ "v": 3 })), None);
        store.dispatch_removed("items", &Value::Null);

        assert_eq!(seen.lock().len(), 1);
        assert_eq!(
            store.fetch("items").into_iter().map(Value::from).collect::<Vec<_>>(),
            vec![json!({ "_id": "1", "v": 1 })]
        );
    }

    #[test]
    fn removal_of_unknown_collection_initializes_it() {
        let store = DataStore::new();
        store.dispatch_removed("ghost", &json!("1"));
        assert!(store.snapshot().contains_key("ghost"));
    }
}
