//! Batch Scopes
//!
//! A batch scope defers both value writes and effect re-runs. Writes made
//! while a scope is current are queued as update closures; when the scope
//! drains, the updates are applied in FIFO order and every subscriber they
//! notified runs once.
//!
//! Draining happens in two phases:
//!
//! 1. **Updates** – queued closures run until the queue is empty. An update
//!    may queue further updates; they run in the same drain. Lazy subscribers
//!    (computed cells) notified by the updates are invalidated right away,
//!    which forwards their own dependents into this scope, so a read after
//!    the updates never sees a stale cached value.
//! 2. **Side effects** – each eager subscriber (effect) pending on the scope
//!    runs exactly once.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;
use tracing::trace;

use super::subscriber::{Subscriber, SubscriberId, SubscriberKind};

/// Which part of a scope's pending work to apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Apply {
    /// Run queued value updates and invalidate the computed cells they reach.
    Updates,
    /// Run pending subscribers only.
    SideEffects,
    /// Updates, then side effects.
    All,
}

impl Apply {
    fn includes_updates(self) -> bool {
        matches!(self, Apply::Updates | Apply::All)
    }

    fn includes_side_effects(self) -> bool {
        matches!(self, Apply::SideEffects | Apply::All)
    }
}

type Update = Box<dyn FnOnce(&BatchScope) + Send>;

static SCOPE_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// A deferral scope for writes and effect re-runs.
///
/// Cloning a scope yields another handle to the same pending work.
#[derive(Clone)]
pub struct BatchScope {
    inner: Arc<ScopeInner>,
}

struct ScopeInner {
    id: u64,
    updates: Mutex<VecDeque<Update>>,
    effects: Mutex<IndexMap<SubscriberId, Arc<Subscriber>>>,
}

impl BatchScope {
    pub(crate) fn new() -> Self {
        Self {
            inner: Arc::new(ScopeInner {
                id: SCOPE_ID_COUNTER.fetch_add(1, Ordering::Relaxed),
                updates: Mutex::new(VecDeque::new()),
                effects: Mutex::new(IndexMap::new()),
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Queue a write. It runs when the scope's updates are applied.
    pub(crate) fn register_update<F>(&self, update: F)
    where
        F: FnOnce(&BatchScope) + Send + 'static,
    {
        self.inner.updates.lock().push_back(Box::new(update));
    }

    /// Queue subscribers to be notified when side effects are applied.
    ///
    /// A subscriber already pending keeps its original position.
    pub(crate) fn register_effects(&self, subscribers: impl IntoIterator<Item = Arc<Subscriber>>) {
        let mut effects = self.inner.effects.lock();
        for subscriber in subscribers {
            effects.entry(subscriber.id()).or_insert(subscriber);
        }
    }

    /// Get the number of queued writes.
    pub fn pending_updates(&self) -> usize {
        self.inner.updates.lock().len()
    }

    /// Get the number of subscribers waiting to run.
    pub fn pending_effects(&self) -> usize {
        self.inner.effects.lock().len()
    }

    /// Apply pending work now.
    ///
    /// Only this scope's queues are drained; enclosing scopes are untouched.
    pub fn apply(&self, action: Apply) {
        trace!(
            scope = self.inner.id,
            ?action,
            updates = self.pending_updates(),
            effects = self.pending_effects(),
            "applying batch scope"
        );

        if action.includes_updates() {
            self.run_updates();
            self.invalidate_lazy();
        }
        if action.includes_side_effects() {
            self.run_side_effects();
        }
    }

    fn run_updates(&self) {
        loop {
            // Pop under the lock, run outside it: updates may queue more.
            let next = self.inner.updates.lock().pop_front();
            match next {
                Some(update) => update(self),
                None => break,
            }
        }
    }

    /// Invalidate pending computed cells until none are left.
    fn invalidate_lazy(&self) {
        // Invalidating a cell queues its dependents here, so an effect reached
        // through several paths still runs once.
        loop {
            let lazy: IndexMap<SubscriberId, Arc<Subscriber>> = {
                let mut effects = self.inner.effects.lock();
                let (lazy, eager) = std::mem::take(&mut *effects)
                    .into_iter()
                    .partition(|(_, s)| s.kind() == SubscriberKind::Lazy);
                *effects = eager;
                lazy
            };
            if lazy.is_empty() {
                break;
            }
            for subscriber in lazy.into_values() {
                subscriber.notify_in(Some(self));
            }
        }
    }

    fn run_side_effects(&self) {
        // Cells registered directly (not through an update) still go first.
        self.invalidate_lazy();

        let eager = std::mem::take(&mut *self.inner.effects.lock());
        for subscriber in eager.into_values() {
            subscriber.notify_in(None);
        }
    }
}

impl fmt::Debug for BatchScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchScope")
            .field("id", &self.inner.id)
            .field("pending_updates", &self.pending_updates())
            .field("pending_effects", &self.pending_effects())
            .finish()
    }
}
