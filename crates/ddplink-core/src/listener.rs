//! Change-listener primitive.
//!
//! A [`Registry`] is an ordered list of payloads owned by some event source
//! (the event bus, a collection store, a reactive collection's tickers). A
//! [`Listener`] binds one payload to one registry and can attach or detach
//! it any number of times; both operations are idempotent.
//!
//! Sources never hold their lock while invoking payloads: fan-out iterates a
//! snapshot and checks each entry's liveness flag before the call, so a
//! payload detached mid-dispatch is skipped.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

// ── Registry ─────────────────────────────────────────────────────────

struct Entry<P: ?Sized> {
    id: u64,
    live: Arc<AtomicBool>,
    payload: Arc<P>,
}

impl<P: ?Sized> Entry<P> {
    fn retire(&self) {
        self.live.store(false, Ordering::Release);
    }
}

pub struct Registry<P: ?Sized> {
    entries: Mutex<Vec<Entry<P>>>,
    next_id: AtomicU64,
}

impl<P: ?Sized> Registry<P> {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            entries: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(0),
        })
    }

    /// Bind `payload` to this registry without attaching it.
    pub fn register(self: &Arc<Self>, payload: Arc<P>) -> Listener<P> {
        Listener {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            payload,
            registry: Arc::downgrade(self),
        }
    }

    /// Bind and attach `payload`.
    pub fn listen(self: &Arc<Self>, payload: Arc<P>) -> Listener<P> {
        let listener = self.register(payload);
        listener.start();
        listener
    }

    fn attach(&self, id: u64, payload: &Arc<P>) -> bool {
        let mut entries = self.entries.lock();
        if entries.iter().any(|entry| entry.id == id) {
            return false;
        }
        entries.push(Entry {
            id,
            live: Arc::new(AtomicBool::new(true)),
            payload: Arc::clone(payload),
        });
        true
    }

    fn detach(&self, id: u64) -> bool {
        let mut entries = self.entries.lock();
        let Some(index) = entries.iter().position(|entry| entry.id == id) else {
            return false;
        };
        entries.remove(index).retire();
        true
    }

    fn contains(&self, id: u64) -> bool {
        self.entries.lock().iter().any(|entry| entry.id == id)
    }

    /// Attached payloads in registration order.
    pub fn snapshot(&self) -> Vec<Arc<P>> {
        self.entries
            .lock()
            .iter()
            .map(|entry| Arc::clone(&entry.payload))
            .collect()
    }

    /// Invoke `f` on every attached payload, skipping any that were detached
    /// by an earlier invocation in the same pass.
    pub fn for_each(&self, mut f: impl FnMut(&P)) {
        let snapshot: Vec<(Arc<AtomicBool>, Arc<P>)> = self
            .entries
            .lock()
            .iter()
            .map(|entry| (Arc::clone(&entry.live), Arc::clone(&entry.payload)))
            .collect();
        for (live, payload) in snapshot {
            if live.load(Ordering::Acquire) {
                f(&payload);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Detach everything.
    pub fn clear(&self) {
        for entry in self.entries.lock().drain(..) {
            entry.retire();
        }
    }
}

impl<P: ?Sized> fmt::Debug for Registry<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry").field("len", &self.len()).finish()
    }
}

// ── Listener ─────────────────────────────────────────────────────────

/// Start/stop handle for one payload in one [`Registry`].
///
/// Dropping the handle does not detach the payload; use
/// [`stop`](Self::stop) or wrap it in a [`ListenerGuard`].
pub struct Listener<P: ?Sized> {
    id: u64,
    payload: Arc<P>,
    registry: Weak<Registry<P>>,
}

impl<P: ?Sized> Listener<P> {
    /// Attach the payload. No-op if already attached.
    pub fn start(&self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.attach(self.id, &self.payload);
        }
    }

    /// Detach the payload. No-op if already detached.
    pub fn stop(&self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.detach(self.id);
        }
    }

    pub fn is_active(&self) -> bool {
        self.registry
            .upgrade()
            .is_some_and(|registry| registry.contains(self.id))
    }

    pub fn payload(&self) -> &Arc<P> {
        &self.payload
    }
}

impl<P: ?Sized> Clone for Listener<P> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            payload: Arc::clone(&self.payload),
            registry: Weak::clone(&self.registry),
        }
    }
}

impl<P: ?Sized> fmt::Debug for Listener<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listener")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}

/// Stops the wrapped listener when dropped.
#[derive(Debug)]
pub struct ListenerGuard<P: ?Sized>(Listener<P>);

impl<P: ?Sized> ListenerGuard<P> {
    pub fn new(listener: Listener<P>) -> Self {
        Self(listener)
    }
}

impl<P: ?Sized> Drop for ListenerGuard<P> {
    fn drop(&mut self) {
        self.0.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    type Callback = dyn Fn() + Send + Sync;

    #[test]
    fn start_and_stop_are_idempotent() {
        let registry: Arc<Registry<Callback>> = Registry::new();
        let listener = registry.listen(Arc::new(|| {}));

        listener.start();
        listener.start();
        assert_eq!(registry.len(), 1);
        assert!(listener.is_active());

        listener.stop();
        listener.stop();
        assert!(registry.is_empty());
        assert!(!listener.is_active());

        listener.start();
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn detached_during_pass_is_skipped() {
        let registry: Arc<Registry<Callback>> = Registry::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let second = registry.register(Arc::new({
            let calls = Arc::clone(&calls);
            move || {
                calls.fetch_add(1, Ordering::SeqCst);
            }
        }));
        let first = registry.listen(Arc::new({
            let second = second.clone();
            move || second.stop()
        }));
        second.start();

        registry.for_each(|f| f());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(first.is_active());
    }

    #[test]
    fn cleared_during_pass_is_skipped() {
        let registry: Arc<Registry<Callback>> = Registry::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let weak = Arc::downgrade(&registry);
        let _first = registry.listen(Arc::new(move || {
            if let Some(registry) = weak.upgrade() {
                registry.clear();
            }
        }));
        for _ in 0..3 {
            let calls = Arc::clone(&calls);
            let _ = registry.listen(Arc::new(move || {
                calls.fetch_add(1, Ordering::SeqCst);
            }));
        }

        registry.for_each(|f| f());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(registry.is_empty());
    }

    #[test]
    fn guard_stops_on_drop() {
        let registry: Arc<Registry<Callback>> = Registry::new();
        {
            let _guard = ListenerGuard::new(registry.listen(Arc::new(|| {})));
            assert_eq!(registry.len(), 1);
        }
        assert!(registry.is_empty());
    }

    #[test]
    fn listener_outliving_registry_is_inert() {
        let registry: Arc<Registry<Callback>> = Registry::new();
        let listener = registry.listen(Arc::new(|| {}));
        drop(registry);
        listener.start();
        listener.stop();
        assert!(!listener.is_active());
    }
}
