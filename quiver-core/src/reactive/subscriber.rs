//! Subscriber types for the reactive system.
//!
//! A [`Subscriber`] is a tracked computation: anything that re-runs (effects)
//! or invalidates itself (computed cells) when the reactive values it read
//! change. A [`SubscriberSet`] is the dependent set owned by every reactive
//! cell.
//!
//! # Ownership
//!
//! Cells own their subscribers (`Arc<Subscriber>`), so an effect stays alive
//! as long as something it depends on can still trigger it. Subscribers only
//! keep weak references back to the cells they read, so a computation never
//! extends a cell's lifetime. Disposing a subscriber drops its body, which
//! releases whatever the body captured.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::Mutex;
use tracing::{debug, trace};

use super::batch::BatchScope;
use super::context::ReactiveContext;

/// Unique identifier for a subscriber.
///
/// Each subscriber (effect, computed cell, or manual subscription) gets a
/// unique ID when created. The ID deduplicates subscriptions and pending
/// effects in a batch scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(u64);

impl SubscriberId {
    /// Generate a new unique subscriber ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

/// How a subscriber reacts to a change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriberKind {
    /// Re-runs immediately (or at the end of the batch): effects.
    Eager,
    /// Marks itself stale and forwards the notification: computed cells.
    Lazy,
}

/// Notification callback. Receives the batch scope being drained, if any, so
/// lazy subscribers can forward their dependents into the same scope.
pub(crate) type NotifyFn = Arc<dyn Fn(Option<&BatchScope>) + Send + Sync>;

/// A tracked computation.
pub struct Subscriber {
    id: SubscriberId,
    kind: SubscriberKind,
    /// `None` once disposed.
    notify: Mutex<Option<NotifyFn>>,
    disposed: AtomicBool,
    /// Cells read during the last tracked run, keyed by cell ID.
    sources: Mutex<IndexMap<u64, Weak<SubscriberSet>>>,
}

impl Subscriber {
    /// Create an eager subscriber with the given notification callback.
    pub fn new<F>(notify: F) -> Arc<Self>
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self::new_cyclic(SubscriberKind::Eager, move |_| Arc::new(move |_| notify()))
    }

    /// Create a subscriber whose callback may refer back to it weakly.
    pub(crate) fn new_cyclic<F>(kind: SubscriberKind, make_notify: F) -> Arc<Self>
    where
        F: FnOnce(Weak<Self>) -> NotifyFn,
    {
        Arc::new_cyclic(|weak| Self {
            id: SubscriberId::new(),
            kind,
            notify: Mutex::new(Some(make_notify(weak.clone()))),
            disposed: AtomicBool::new(false),
            sources: Mutex::new(IndexMap::new()),
        })
    }

    /// Get the subscriber's unique ID.
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    pub fn kind(&self) -> SubscriberKind {
        self.kind
    }

    /// Notify the subscriber that one of its dependencies changed.
    ///
    /// A disposed subscriber ignores notifications.
    pub fn notify(&self) {
        self.notify_in(None);
    }

    pub(crate) fn notify_in(&self, scope: Option<&BatchScope>) {
        if self.is_disposed() {
            return;
        }
        // Clone the callback out so it can re-enter (self-triggering effects)
        // or dispose this subscriber while running.
        let notify = self.notify.lock().clone();
        if let Some(notify) = notify {
            notify(scope);
        }
    }

    /// Run `f` as a tracked computation.
    ///
    /// Cells read during `f` become this subscriber's dependencies; cells read
    /// during the previous run but not this one drop the subscription.
    pub fn track<R>(self: &Arc<Self>, f: impl FnOnce() -> R) -> R {
        let ctx = ReactiveContext::enter(Arc::clone(self));
        let result = f();
        let captured = ctx.take_dependencies();
        drop(ctx);

        let stale: Vec<Weak<SubscriberSet>> = {
            let mut sources = self.sources.lock();
            let previous = std::mem::replace(&mut *sources, captured);
            previous
                .into_iter()
                .filter(|(id, _)| !sources.contains_key(id))
                .map(|(_, set)| set)
                .collect()
        };
        for set in stale.iter().filter_map(Weak::upgrade) {
            set.remove(self.id);
        }

        // Disposed from inside its own run: drop what this run subscribed.
        if self.is_disposed() {
            self.release_sources();
        }

        result
    }

    /// Permanently disable the subscriber. Idempotent.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!(subscriber = ?self.id, kind = ?self.kind, "disposing subscriber");
        let notify = self.notify.lock().take();
        self.release_sources();
        drop(notify);
    }

    fn release_sources(&self) {
        let sources = std::mem::take(&mut *self.sources.lock());
        for set in sources.values().filter_map(Weak::upgrade) {
            set.remove(self.id);
        }
    }

    /// Check if the subscriber has been disposed.
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Get the number of cells read during the last tracked run.
    pub fn dependency_count(&self) -> usize {
        self.sources.lock().len()
    }
}

impl fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscriber")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("disposed", &self.is_disposed())
            .field("dependency_count", &self.dependency_count())
            .finish()
    }
}

/// Counter for generating unique cell IDs.
static CELL_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// The dependent set of one reactive cell.
pub struct SubscriberSet {
    id: u64,
    subscribers: Mutex<IndexMap<SubscriberId, Arc<Subscriber>>>,
}

impl SubscriberSet {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            id: CELL_ID_COUNTER.fetch_add(1, Ordering::Relaxed),
            subscribers: Mutex::new(IndexMap::new()),
        })
    }

    /// Get the cell's unique ID.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Register the current tracked computation, if any, as a dependent.
    pub fn track(self: &Arc<Self>) {
        let Some(subscriber) = ReactiveContext::current_subscriber() else {
            return;
        };
        if subscriber.is_disposed() {
            return;
        }
        trace!(cell = self.id, subscriber = ?subscriber.id(), "tracking dependency");
        self.subscribers.lock().insert(subscriber.id(), subscriber);
        ReactiveContext::track_dependency(self);
    }

    /// Add a subscriber outside of any tracked run.
    pub fn add(&self, subscriber: Arc<Subscriber>) {
        self.subscribers.lock().insert(subscriber.id(), subscriber);
    }

    /// Remove a subscriber. Returns `false` if it was not subscribed.
    pub fn remove(&self, id: SubscriberId) -> bool {
        self.subscribers.lock().shift_remove(&id).is_some()
    }

    /// Get the number of live subscribers.
    pub fn len(&self) -> usize {
        self.subscribers
            .lock()
            .values()
            .filter(|s| !s.is_disposed())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Notify every subscriber that the cell changed.
    ///
    /// The set is cleared before anyone is notified: a subscriber that still
    /// depends on the cell re-subscribes when it re-runs. Inside a batch scope
    /// the subscribers are queued on the scope instead of being run.
    pub(crate) fn notify(&self, scope: Option<&BatchScope>) {
        let subscribers: Vec<Arc<Subscriber>> = std::mem::take(&mut *self.subscribers.lock())
            .into_values()
            .filter(|s| !s.is_disposed())
            .collect();
        if subscribers.is_empty() {
            return;
        }

        trace!(
            cell = self.id,
            subscribers = subscribers.len(),
            batched = scope.is_some(),
            "notifying subscribers"
        );

        match scope {
            Some(scope) => scope.register_effects(subscribers),
            None => {
                for subscriber in subscribers {
                    subscriber.notify_in(None);
                }
            }
        }
    }
}

impl fmt::Debug for SubscriberSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriberSet")
            .field("id", &self.id)
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicI32;

    #[test]
    fn subscriber_ids_are_unique() {
        let id1 = SubscriberId::new();
        let id2 = SubscriberId::new();
        let id3 = SubscriberId::new();

        assert_ne!(id1, id2);
        assert_ne!(id2, id3);
        assert_ne!(id1, id3);
    }

    #[test]
    fn subscriber_notify_calls_callback() {
        let called = Arc::new(AtomicBool::new(false));
        let called_clone = called.clone();

        let subscriber = Subscriber::new(move || {
            called_clone.store(true, Ordering::SeqCst);
        });

        assert!(!called.load(Ordering::SeqCst));
        subscriber.notify();
        assert!(called.load(Ordering::SeqCst));
    }

    #[test]
    fn disposed_subscriber_ignores_notifications() {
        let count = Arc::new(AtomicI32::new(0));
        let count_clone = count.clone();
        let subscriber = Subscriber::new(move || {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });

        subscriber.dispose();
        subscriber.dispose();
        subscriber.notify();

        assert!(subscriber.is_disposed());
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn track_records_cells_read() {
        let a = SubscriberSet::new();
        let b = SubscriberSet::new();
        let subscriber = Subscriber::new(|| {});

        subscriber.track(|| {
            a.track();
            b.track();
            a.track();
        });

        assert_eq!(subscriber.dependency_count(), 2);
        assert_eq!(a.len(), 1);
        assert_eq!(b.len(), 1);
    }

    #[test]
    fn retrack_drops_cells_no_longer_read() {
        let a = SubscriberSet::new();
        let b = SubscriberSet::new();
        let subscriber = Subscriber::new(|| {});

        subscriber.track(|| {
            a.track();
            b.track();
        });
        subscriber.track(|| a.track());

        assert_eq!(subscriber.dependency_count(), 1);
        assert_eq!(a.len(), 1);
        assert_eq!(b.len(), 0);
    }

    #[test]
    fn notify_clears_the_set_before_running_subscribers() {
        let set = SubscriberSet::new();
        let count = Arc::new(AtomicI32::new(0));
        let count_clone = count.clone();
        let subscriber = Subscriber::new(move || {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });
        set.add(subscriber);

        set.notify(None);
        set.notify(None);

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(set.is_empty());
    }

    #[test]
    fn dispose_unsubscribes_from_every_cell() {
        let a = SubscriberSet::new();
        let b = SubscriberSet::new();
        let subscriber = Subscriber::new(|| {});
        subscriber.track(|| {
            a.track();
            b.track();
        });

        subscriber.dispose();

        assert_eq!(a.len(), 0);
        assert_eq!(b.len(), 0);
        assert_eq!(subscriber.dependency_count(), 0);
    }
}
