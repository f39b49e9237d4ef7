// ── Windowed mirror ──
//
// Pure state behind a reactive collection: the raw mirror of every
// filter-passing document and the window `raw[skip..skip + limit]`. Each
// operation patches the window incrementally and leaves
// `view == raw[skip..min(skip + limit, raw.len())]` true on return.

use std::cmp::Ordering;

use crate::collection::Comparator;
use crate::store::{same_id, Document};

/// `limit` value meaning "no limit".
pub(crate) const UNLIMITED: usize = usize::MAX;

#[derive(Debug, Clone)]
pub(crate) struct Window {
    raw: Vec<Document>,
    view: Vec<Document>,
    skip: usize,
    limit: usize,
}

impl Default for Window {
    fn default() -> Self {
        Self {
            raw: Vec::new(),
            view: Vec::new(),
            skip: 0,
            limit: UNLIMITED,
        }
    }
}

impl Window {
    pub(crate) fn view(&self) -> &[Document] {
        &self.view
    }

    pub(crate) fn skip(&self) -> usize {
        self.skip
    }

    pub(crate) fn limit(&self) -> usize {
        self.limit
    }

    fn end(&self) -> usize {
        self.skip.saturating_add(self.limit)
    }

    fn in_window(&self, index: usize) -> bool {
        index >= self.skip && index < self.end()
    }

    /// Replace the raw mirror wholesale and rebuild the window.
    pub(crate) fn reset(&mut self, skip: usize, limit: usize, raw: Vec<Document>) {
        self.skip = skip;
        self.limit = limit;
        self.raw = raw;
        self.view = self
            .raw
            .iter()
            .skip(self.skip)
            .take(self.limit)
            .cloned()
            .collect();
    }

    pub(crate) fn position(&self, id: &serde_json::Value) -> Option<usize> {
        self.raw.iter().position(|d| same_id(d.id(), id))
    }

    /// Insertion point for `doc`: first element the comparator does not rank
    /// before it. Appends when unsorted.
    fn insertion_index(&self, doc: &Document, sort: Option<&Comparator>) -> usize {
        match sort {
            Some(cmp) => self
                .raw
                .iter()
                .position(|existing| cmp(doc, existing) != Ordering::Greater)
                .unwrap_or(self.raw.len()),
            None => self.raw.len(),
        }
    }

    /// A document started passing the filter.
    pub(crate) fn insert(&mut self, doc: Document, sort: Option<&Comparator>) {
        let index = self.insertion_index(&doc, sort);
        self.insert_at(index, doc);
    }

    fn insert_at(&mut self, index: usize, doc: Document) {
        self.raw.insert(index, doc);
        if index >= self.end() {
            return;
        }
        // Inserting ahead of the window pushes raw[skip] into its first slot.
        let (offset, entering) = if index < self.skip {
            match self.raw.get(self.skip) {
                Some(doc) => (0, doc.clone()),
                None => return,
            }
        } else {
            (index - self.skip, self.raw[index].clone())
        };
        self.view.insert(offset, entering);
        self.view.truncate(self.limit);
    }

    /// A document stopped passing the filter.
    pub(crate) fn remove(&mut self, id: &serde_json::Value) -> bool {
        match self.position(id) {
            Some(index) => {
                self.remove_at(index);
                true
            }
            None => false,
        }
    }

    fn remove_at(&mut self, index: usize) {
        self.raw.remove(index);
        if index >= self.end() || self.view.is_empty() {
            return;
        }
        let offset = index.saturating_sub(self.skip);
        self.view.remove(offset);
        // Refill the vacated tail slot from raw.
        if let Some(doc) = self.raw.get(self.end() - 1) {
            self.view.push(doc.clone());
        }
    }

    /// A document kept passing the filter but its contents changed.
    ///
    /// Sorted: moves it to its new rank as one step. Unsorted: replaces it
    /// where it stands. Unknown documents are inserted.
    pub(crate) fn replace(&mut self, prev_id: &serde_json::Value, doc: Document, sort: Option<&Comparator>) {
        let Some(old) = self.position(prev_id) else {
            self.insert(doc, sort);
            return;
        };

        if let Some(cmp) = sort {
            // Rank among the other elements, i.e. in raw with `old` removed.
            let rank = self
                .raw
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != old)
                .position(|(_, existing)| cmp(&doc, existing) != Ordering::Greater)
                .unwrap_or(self.raw.len() - 1);
            if rank != old {
                self.remove_at(old);
                self.insert_at(rank, doc);
                return;
            }
        }

        if self.in_window(old) {
            self.view[old - self.skip] = doc.clone();
        }
        self.raw[old] = doc;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::Arc;

    fn doc(id: u64, v: i64) -> Document {
        Document::new(json!(id.to_string()), json!({ "v": v }).as_object())
    }

    fn by_v() -> Comparator {
        Arc::new(|a: &Document, b: &Document| a["v"].as_i64().cmp(&b["v"].as_i64()))
    }

    fn values(docs: &[Document]) -> Vec<i64> {
        docs.iter().map(|d| d["v"].as_i64().unwrap()).collect()
    }

    fn assert_consistent(w: &Window) {
        let expected: Vec<_> = w.raw.iter().skip(w.skip).take(w.limit).cloned().collect();
        assert_eq!(w.view, expected, "skip={} limit={}", w.skip, w.limit);
    }

    #[test]
    fn sorted_limit_keeps_smallest() {
        let sort = by_v();
        let mut w = Window::default();
        w.reset(0, 2, Vec::new());
        for (id, v) in [(1, 3), (2, 1), (3, 2)] {
            w.insert(doc(id, v), Some(&sort));
            assert_consistent(&w);
        }
        assert_eq!(values(w.view()), vec![1, 2]);
    }

    #[test]
    fn insert_before_window_shifts_it() {
        let sort = by_v();
        let mut w = Window::default();
        w.reset(1, 2, vec![doc(1, 10), doc(2, 20), doc(3, 30)]);
        assert_eq!(values(w.view()), vec![20, 30]);

        w.insert(doc(4, 5), Some(&sort));
        assert_consistent(&w);
        assert_eq!(values(w.view()), vec![10, 20]);
    }

    #[test]
    fn remove_refills_from_tail() {
        let mut w = Window::default();
        w.reset(0, 2, vec![doc(1, 1), doc(2, 2), doc(3, 3)]);
        assert!(w.remove(&json!("1")));
        assert_consistent(&w);
        assert_eq!(values(w.view()), vec![2, 3]);

        assert!(!w.remove(&json!("missing")));
    }

    #[test]
    fn remove_before_window_shifts_left() {
        let mut w = Window::default();
        w.reset(1, 2, vec![doc(1, 1), doc(2, 2), doc(3, 3), doc(4, 4)]);
        w.remove(&json!("1"));
        assert_consistent(&w);
        assert_eq!(values(w.view()), vec![3, 4]);
    }

    #[test]
    fn sorted_replace_moves_rank() {
        let sort = by_v();
        let mut w = Window::default();
        w.reset(0, 2, vec![doc(1, 1), doc(2, 2), doc(3, 3)]);
        w.replace(&json!("1"), doc(1, 9), Some(&sort));
        assert_consistent(&w);
        assert_eq!(values(&w.raw), vec![2, 3, 9]);
        assert_eq!(values(w.view()), vec![2, 3]);
    }

    #[test]
    fn unsorted_replace_keeps_position() {
        let mut w = Window::default();
        w.reset(0, UNLIMITED, vec![doc(1, 1), doc(2, 2)]);
        w.replace(&json!("1"), doc(1, 9), None);
        assert_eq!(values(w.view()), vec![9, 2]);
    }

    #[test]
    fn zero_limit_stays_empty() {
        let mut w = Window::default();
        w.reset(0, 0, vec![doc(1, 1)]);
        w.insert(doc(2, 0), None);
        w.remove(&json!("1"));
        assert!(w.view().is_empty());
        assert_consistent(&w);
    }

    /// Drive a long pseudo-random sequence of operations and check the
    /// window after every step.
    #[test]
    fn window_matches_slice_after_every_operation() {
        let mut seed: u64 = 0x2545_F491_4F6C_DD1D;
        let mut next = move |bound: u64| {
            seed ^= seed << 13;
            seed ^= seed >> 7;
            seed ^= seed << 17;
            seed % bound
        };

        for (skip, limit, sorted) in [(0, 3, true), (2, 2, true), (1, UNLIMITED, false), (3, 1, false)] {
            let sort = sorted.then(by_v);
            let mut w = Window::default();
            w.reset(skip, limit, Vec::new());
            let mut live: Vec<u64> = Vec::new();

            for _ in 0..400 {
                let id = next(12);
                let v = i64::try_from(next(50)).unwrap();
                if live.contains(&id) {
                    if next(2) == 0 {
                        w.remove(&json!(id.to_string()));
                        live.retain(|x| *x != id);
                    } else {
                        w.replace(&json!(id.to_string()), doc(id, v), sort.as_ref());
                    }
                } else {
                    w.insert(doc(id, v), sort.as_ref());
                    live.push(id);
                }
                assert_consistent(&w);
                assert_eq!(w.raw.len(), live.len());
                if sorted {
                    let raw = values(&w.raw);
                    assert!(raw.windows(2).all(|p| p[0] <= p[1]), "raw not sorted: {raw:?}");
                }
            }
        }
    }
}
