// ── Change notifications ──
//
// What collection listeners receive. Unfiltered listeners get a `Change`
// for every mutation; filtered listeners get a `FilteredChange` only when
// the mutation touches their predicate.

use indexmap::IndexMap;
use serde_json::{Map, Value};

use super::document::Document;

/// Whether a field was written or cleared by a change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldChange {
    Set,
    Cleared,
}

/// Full description of a `changed` message applied to one document.
#[derive(Debug, Clone, PartialEq)]
pub struct Delta {
    /// The document before the change.
    pub prev: Document,
    /// The document after the change.
    pub next: Document,
    /// Every touched field.
    pub fields: IndexMap<String, FieldChange>,
    /// Fields written, with their new values.
    pub fields_changed: Map<String, Value>,
    /// Fields cleared.
    pub fields_removed: Vec<String>,
}

/// Mutation delivered to unfiltered listeners.
#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    Added(Document),
    Changed(Delta),
    Removed(Document),
}

impl Change {
    pub fn document(&self) -> &Document {
        match self {
            Self::Added(doc) | Self::Removed(doc) => doc,
            Self::Changed(delta) => &delta.next,
        }
    }
}

/// How a mutation relates to a listener's predicate.
///
/// The `[prev, next]` pass flags `[0,1]`, `[1,0]` and `[1,1]` map to
/// `Entered`, `Exited` and `Stayed`. Mutations that fail the predicate on
/// both sides are never delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Entered,
    Exited,
    Stayed,
}

impl Transition {
    pub fn from_flags(prev: bool, next: bool) -> Option<Self> {
        match (prev, next) {
            (false, true) => Some(Self::Entered),
            (true, false) => Some(Self::Exited),
            (true, true) => Some(Self::Stayed),
            (false, false) => None,
        }
    }

    pub fn flags(self) -> (bool, bool) {
        match self {
            Self::Entered => (false, true),
            Self::Exited => (true, false),
            Self::Stayed => (true, true),
        }
    }
}

/// Mutation delivered to filtered listeners.
#[derive(Debug, Clone, PartialEq)]
pub struct FilteredChange {
    /// State before the mutation; `None` for additions.
    pub prev: Option<Document>,
    /// State after the mutation; `None` for removals.
    pub next: Option<Document>,
    pub fields: IndexMap<String, FieldChange>,
    pub fields_changed: Map<String, Value>,
    pub fields_removed: Vec<String>,
    pub transition: Transition,
}
