//! Outbound request buffer.

use std::collections::VecDeque;

/// Ordered buffer of outbound requests, drained once the connection is up.
///
/// Entries leave the queue only when the consumer passed to
/// [`process`](Self::process) accepts them, so a failed hand-off keeps the
/// entry (and everything behind it) for the next attempt.
#[derive(Debug)]
pub struct MessageQueue<T> {
    entries: VecDeque<T>,
    paused: bool,
}

impl<T> Default for MessageQueue<T> {
    fn default() -> Self {
        Self {
            entries: VecDeque::new(),
            paused: false,
        }
    }
}

impl<T> MessageQueue<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append to the back.
    pub fn push(&mut self, entry: T) {
        self.entries.push_back(entry);
    }

    /// Insert at the front, ahead of everything already queued.
    pub fn unshift(&mut self, entry: T) {
        self.entries.push_front(entry);
    }

    pub fn pause(&mut self) {
        self.paused = true;
    }

    pub fn resume(&mut self) {
        self.paused = false;
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.entries.iter()
    }

    /// Drain from the front while `consume` accepts entries.
    ///
    /// Stops at the first rejected entry, leaving it in place. Returns the
    /// number of entries removed. Does nothing while paused.
    pub fn process<F>(&mut self, mut consume: F) -> usize
    where
        F: FnMut(&T) -> bool,
    {
        let mut drained = 0;
        while !self.paused {
            let Some(front) = self.entries.front() else {
                break;
            };
            if !consume(front) {
                break;
            }
            self.entries.pop_front();
            drained += 1;
        }
        drained
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn fifo_with_priority_front() {
        let mut queue = MessageQueue::new();
        queue.push(1);
        queue.push(2);
        queue.unshift(0);

        let mut seen = Vec::new();
        let drained = queue.process(|n| {
            seen.push(*n);
            true
        });

        assert_eq!(drained, 3);
        assert_eq!(seen, vec![0, 1, 2]);
        assert!(queue.is_empty());
    }

    #[test]
    fn rejected_entry_stays_at_front() {
        let mut queue = MessageQueue::new();
        queue.push("a");
        queue.push("b");

        assert_eq!(queue.process(|_| false), 0);
        assert_eq!(queue.len(), 2);

        assert_eq!(queue.process(|e| *e == "a"), 1);
        assert_eq!(queue.iter().copied().collect::<Vec<_>>(), vec!["b"]);
    }

    #[test]
    fn paused_queue_is_not_drained() {
        let mut queue = MessageQueue::new();
        queue.push(1);
        queue.pause();
        assert_eq!(queue.process(|_| true), 0);
        assert_eq!(queue.len(), 1);

        queue.resume();
        assert_eq!(queue.process(|_| true), 1);
    }
}
