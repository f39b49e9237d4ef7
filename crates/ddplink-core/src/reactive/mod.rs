//! Live projections over a collection.
//!
//! A [`ReactiveCollection`] keeps a sorted, filtered, skip/limit window of a
//! collection up to date from its change stream. [`Reducer`]s fold that
//! window and [`ReactiveDocument`]s mirror its first element; both are owned
//! by the collection's dependent lists while started and only keep a weak
//! reference back.

mod collection;
mod document;
mod reducer;
mod window;

pub use collection::{ReactiveCollection, ReactiveSettings, Sort, TickerListener};
pub use document::{DocumentListener, ReactiveDocument};
pub use reducer::{Reducer, ReducerListener};

use crate::store::Document;

/// Something recomputed from a reactive collection's window.
pub(crate) trait WindowDependent: Send + Sync {
    fn refresh(&self, window: &[Document]);
}
