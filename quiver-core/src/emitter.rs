//! Change Emitter
//!
//! The emitter is the notification primitive every other component builds on.
//! Listeners are invoked synchronously, in registration order, with a shared
//! reference to the dispatched event.
//!
//! # Dispatch Semantics
//!
//! - The listener list is snapshotted when a dispatch starts. Listeners added
//!   or removed while the dispatch is running do not affect it.
//! - Filter predicates are evaluated on every dispatch; a listener whose
//!   predicate rejects the event is skipped.
//! - `once` listeners are detached after their single invocation, even if the
//!   invocation panics.
//! - A muted emitter drops dispatches entirely but keeps its listeners.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use smallvec::SmallVec;
use tracing::trace;

/// Counter for generating unique emitter IDs.
static EMITTER_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Identifies one registered listener on an emitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl ListenerId {
    fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

type Callback<E> = Arc<dyn Fn(&E) + Send + Sync>;
type Predicate<E> = Arc<dyn Fn(&E) -> bool + Send + Sync>;

struct Listener<E> {
    id: ListenerId,
    once: bool,
    callback: Callback<E>,
    filter: Option<Predicate<E>>,
}

impl<E> Clone for Listener<E> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            once: self.once,
            callback: Arc::clone(&self.callback),
            filter: self.filter.clone(),
        }
    }
}

impl<E> Listener<E> {
    fn accepts(&self, event: &E) -> bool {
        self.filter.as_ref().map_or(true, |filter| filter(event))
    }
}

struct EmitterInner<E> {
    id: u64,
    muted: AtomicBool,
    listeners: Mutex<Vec<Listener<E>>>,
}

impl<E> EmitterInner<E> {
    fn remove(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock();
        match listeners.iter().position(|l| l.id == id) {
            Some(index) => {
                listeners.remove(index);
                true
            }
            None => false,
        }
    }
}

/// Detaches a `once` listener when dropped, so a panicking listener is still
/// removed.
struct OnceGuard<'a, E> {
    inner: &'a EmitterInner<E>,
    id: ListenerId,
}

impl<E> Drop for OnceGuard<'_, E> {
    fn drop(&mut self) {
        self.inner.remove(self.id);
    }
}

/// An ordered multi-listener event dispatcher.
///
/// Cloning an emitter yields another handle to the same listener list.
pub struct ChangeEmitter<E> {
    inner: Arc<EmitterInner<E>>,
}

impl<E: 'static> ChangeEmitter<E> {
    /// Create an emitter with no listeners.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(EmitterInner {
                id: EMITTER_ID_COUNTER.fetch_add(1, Ordering::Relaxed),
                muted: AtomicBool::new(false),
                listeners: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Get the emitter's unique ID.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Register a listener invoked on every dispatch.
    pub fn on<F>(&self, listener: F) -> Unsubscribe
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        self.register(Arc::new(listener), false)
    }

    /// Register a listener that receives `caller` alongside each event.
    pub fn on_with_caller<C, F>(&self, caller: C, listener: F) -> Unsubscribe
    where
        C: Send + Sync + 'static,
        F: Fn(&C, &E) + Send + Sync + 'static,
    {
        self.register(Arc::new(move |event: &E| listener(&caller, event)), false)
    }

    /// Register a listener invoked at most once.
    pub fn once<F>(&self, listener: F) -> Unsubscribe
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        self.register(Arc::new(listener), true)
    }

    /// Register a one-shot listener that receives `caller` alongside the event.
    pub fn once_with_caller<C, F>(&self, caller: C, listener: F) -> Unsubscribe
    where
        C: Send + Sync + 'static,
        F: Fn(&C, &E) + Send + Sync + 'static,
    {
        self.register(Arc::new(move |event: &E| listener(&caller, event)), true)
    }

    fn register(&self, callback: Callback<E>, once: bool) -> Unsubscribe {
        let id = ListenerId::next();
        self.inner.listeners.lock().push(Listener {
            id,
            once,
            callback,
            filter: None,
        });

        let weak: Weak<EmitterInner<E>> = Arc::downgrade(&self.inner);
        Unsubscribe {
            id,
            detach: Arc::new(move |id: ListenerId| {
                weak.upgrade().is_some_and(|inner| inner.remove(id))
            }),
        }
    }

    /// Remove a listener. Returns `false` if it was not registered.
    pub fn off(&self, id: ListenerId) -> bool {
        self.inner.remove(id)
    }

    /// Attach a predicate to a registered listener; the listener only sees
    /// events the predicate accepts. Returns `false` for unknown listeners.
    pub fn filter<P>(&self, id: ListenerId, predicate: P) -> bool
    where
        P: Fn(&E) -> bool + Send + Sync + 'static,
    {
        let mut listeners = self.inner.listeners.lock();
        match listeners.iter_mut().find(|l| l.id == id) {
            Some(listener) => {
                listener.filter = Some(Arc::new(predicate));
                true
            }
            None => false,
        }
    }

    /// Remove every listener.
    pub fn remove_listeners(&self) {
        self.inner.listeners.lock().clear();
    }

    /// Get the number of registered listeners.
    pub fn listener_count(&self) -> usize {
        self.inner.listeners.lock().len()
    }

    /// Suppress (or resume) dispatching.
    pub fn mute(&self, muted: bool) {
        self.inner.muted.store(muted, Ordering::SeqCst);
    }

    /// Check whether dispatches are currently suppressed.
    pub fn is_muted(&self) -> bool {
        self.inner.muted.load(Ordering::SeqCst)
    }

    /// Deliver `event` to every listener registered when the call starts.
    pub fn dispatch(&self, event: &E) {
        if self.is_muted() {
            trace!(emitter = self.inner.id, "dispatch suppressed, emitter muted");
            return;
        }

        // Snapshot under the lock, run user code without it.
        let snapshot: SmallVec<[Listener<E>; 4]> =
            self.inner.listeners.lock().iter().cloned().collect();
        let listeners: SmallVec<[Listener<E>; 4]> = snapshot
            .into_iter()
            .filter(|listener| listener.accepts(event))
            .collect();

        trace!(
            emitter = self.inner.id,
            listeners = listeners.len(),
            "dispatch"
        );

        for listener in listeners {
            let _guard = listener.once.then(|| OnceGuard {
                inner: &*self.inner,
                id: listener.id,
            });
            (listener.callback)(event);
        }
    }
}

impl<E: 'static> Default for ChangeEmitter<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> Clone for ChangeEmitter<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<E> fmt::Debug for ChangeEmitter<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeEmitter")
            .field("id", &self.inner.id)
            .field("muted", &self.inner.muted.load(Ordering::SeqCst))
            .field("listener_count", &self.inner.listeners.lock().len())
            .finish()
    }
}

/// Handle returned by listener registration.
///
/// Dropping the handle does not detach the listener; call
/// [`Unsubscribe::unsubscribe`] for that. The handle does not keep the
/// emitter alive.
#[derive(Clone)]
pub struct Unsubscribe {
    id: ListenerId,
    detach: Arc<dyn Fn(ListenerId) -> bool + Send + Sync>,
}

impl Unsubscribe {
    /// The listener this handle refers to.
    pub fn id(&self) -> ListenerId {
        self.id
    }

    /// Detach the listener. Returns `false` if it was already gone.
    pub fn unsubscribe(&self) -> bool {
        (self.detach)(self.id)
    }
}

impl fmt::Debug for Unsubscribe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Unsubscribe").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::panic::{catch_unwind, AssertUnwindSafe};
    use std::sync::atomic::AtomicI32;

    #[test]
    fn dispatch_calls_listeners_in_registration_order() {
        let emitter = ChangeEmitter::<i32>::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        let log_a = log.clone();
        emitter.on(move |e| log_a.lock().push(("a", *e)));
        let log_b = log.clone();
        emitter.on(move |e| log_b.lock().push(("b", *e)));

        emitter.dispatch(&1);
        emitter.dispatch(&2);

        assert_eq!(*log.lock(), vec![("a", 1), ("b", 1), ("a", 2), ("b", 2)]);
    }

    #[test]
    fn unsubscribe_detaches_listener() {
        let emitter = ChangeEmitter::<i32>::new();
        let count = Arc::new(AtomicI32::new(0));
        let count_clone = count.clone();

        let handle = emitter.on(move |_| {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });

        emitter.dispatch(&0);
        assert!(handle.unsubscribe());
        assert!(!handle.unsubscribe());
        emitter.dispatch(&0);

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(emitter.listener_count(), 0);
    }

    #[test]
    fn once_listener_runs_a_single_time() {
        let emitter = ChangeEmitter::<i32>::new();
        let count = Arc::new(AtomicI32::new(0));
        let count_clone = count.clone();

        emitter.once(move |_| {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });

        emitter.dispatch(&0);
        emitter.dispatch(&0);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(emitter.listener_count(), 0);
    }

    #[test]
    fn once_listener_is_removed_even_when_it_panics() {
        let emitter = ChangeEmitter::<i32>::new();
        emitter.once(|_| panic!("listener failure"));

        let result = catch_unwind(AssertUnwindSafe(|| emitter.dispatch(&0)));
        assert!(result.is_err());
        assert_eq!(emitter.listener_count(), 0);

        // A later dispatch is unaffected by the earlier failure.
        let count = Arc::new(AtomicI32::new(0));
        let count_clone = count.clone();
        emitter.on(move |_| {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });
        emitter.dispatch(&0);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn filter_skips_rejected_events() {
        let emitter = ChangeEmitter::<i32>::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();

        let handle = emitter.on(move |e| seen_clone.lock().push(*e));
        assert!(emitter.filter(handle.id(), |e| e % 2 == 0));

        for i in 0..5 {
            emitter.dispatch(&i);
        }
        assert_eq!(*seen.lock(), vec![0, 2, 4]);
    }

    #[test]
    fn muted_emitter_keeps_listeners() {
        let emitter = ChangeEmitter::<i32>::new();
        let count = Arc::new(AtomicI32::new(0));
        let count_clone = count.clone();
        emitter.on(move |_| {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });

        emitter.mute(true);
        emitter.dispatch(&0);
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(emitter.listener_count(), 1);

        emitter.mute(false);
        emitter.dispatch(&0);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn listeners_added_during_dispatch_wait_for_next_dispatch() {
        let emitter = ChangeEmitter::<i32>::new();
        let count = Arc::new(AtomicI32::new(0));

        let emitter_clone = emitter.clone();
        let count_clone = count.clone();
        emitter.once(move |_| {
            let count_inner = count_clone.clone();
            emitter_clone.on(move |_| {
                count_inner.fetch_add(1, Ordering::SeqCst);
            });
        });

        emitter.dispatch(&0);
        assert_eq!(count.load(Ordering::SeqCst), 0);

        emitter.dispatch(&0);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn listener_removed_during_dispatch_still_sees_that_dispatch() {
        let emitter = ChangeEmitter::<i32>::new();
        let count = Arc::new(AtomicI32::new(0));

        let second: Arc<Mutex<Option<Unsubscribe>>> = Arc::new(Mutex::new(None));
        let second_clone = second.clone();
        emitter.on(move |_| {
            if let Some(handle) = second_clone.lock().as_ref() {
                handle.unsubscribe();
            }
        });
        let count_clone = count.clone();
        let handle = emitter.on(move |_| {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });
        *second.lock() = Some(handle);

        emitter.dispatch(&0);
        emitter.dispatch(&0);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn caller_is_passed_to_listener() {
        let emitter = ChangeEmitter::<i32>::new();
        let total = Arc::new(AtomicI32::new(0));

        emitter.on_with_caller(total.clone(), |total, e| {
            total.fetch_add(*e, Ordering::SeqCst);
        });
        emitter.dispatch(&3);
        emitter.dispatch(&4);

        assert_eq!(total.load(Ordering::SeqCst), 7);
    }
}
