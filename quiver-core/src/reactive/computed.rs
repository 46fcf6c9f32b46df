//! Computed Implementation
//!
//! A Computed is a cached derived value that re-evaluates only when it is
//! read after one of its dependencies changed.
//!
//! # How Computed Cells Work
//!
//! 1. Nothing runs on creation. The first read runs the getter inside a
//!    tracked run and caches the result.
//!
//! 2. When a dependency changes, the cell marks itself dirty, notifies its
//!    own dependents and emits a change event. It does not recompute.
//!
//! 3. The next read recomputes. If the new value differs from the cached
//!    one, a second change event carries both values.
//!
//! A computed cell is itself a reactive source: effects and other computed
//! cells that read it are notified when it is invalidated.
//!
//! # Thread Safety
//!
//! The cached value and dirty flag are protected by locks, and no lock is held
//! while the getter runs.

use std::fmt::{self, Debug};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use tracing::{trace, warn};

use super::batch::BatchScope;
use super::runtime::Runtime;
use super::subscriber::{NotifyFn, Subscriber, SubscriberId, SubscriberKind, SubscriberSet};
use crate::emitter::{ChangeEmitter, Unsubscribe};
use crate::error::{ReactiveError, Result};

/// Dirty state for a computed cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComputedState {
    /// The cached value is up-to-date.
    Clean,

    /// The cell must recompute on next read.
    Dirty,
}

/// Event emitted by a computed cell.
///
/// Invalidation emits `new_value: None`; a recompute that changed the value
/// emits both values.
#[derive(Debug, Clone, PartialEq)]
pub struct ComputedChange<T> {
    pub old_value: Option<T>,
    pub new_value: Option<T>,
}

type Getter<T> = Arc<dyn Fn() -> T + Send + Sync>;
type Setter<T> = Arc<dyn Fn(T) -> Result<()> + Send + Sync>;

/// A cached derived value that recomputes lazily.
///
/// Cloning yields another handle to the same cell.
pub struct Computed<T>
where
    T: Clone + Send + Sync + PartialEq + 'static,
{
    inner: Arc<ComputedInner<T>>,
}

struct ComputedInner<T> {
    /// Cells and effects that read this computed.
    subscribers: Arc<SubscriberSet>,

    /// The tracked run that reads this computed's own dependencies.
    computation: Arc<Subscriber>,

    getter: Getter<T>,
    setter: Option<Setter<T>>,

    /// The cached value (None if never computed).
    value: RwLock<Option<T>>,
    dirty: AtomicBool,
    change: ChangeEmitter<ComputedChange<T>>,
}

impl<T> ComputedInner<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    fn recompute(&self) -> T {
        // Cleared first so a dependency changing mid-run leaves the cell dirty.
        self.dirty.store(false, Ordering::SeqCst);
        let value = self.computation.track(|| (self.getter)());

        let previous = self.value.write().replace(value.clone());
        trace!(computed = self.subscribers.id(), "computed recomputed");
        if let Some(old_value) = previous {
            if old_value != value {
                self.change.dispatch(&ComputedChange {
                    old_value: Some(old_value),
                    new_value: Some(value.clone()),
                });
            }
        }
        value
    }

    fn invalidate(&self, scope: Option<&BatchScope>) {
        self.dirty.store(true, Ordering::SeqCst);
        let old_value = self.value.read().clone();
        trace!(computed = self.subscribers.id(), "computed invalidated");
        self.change.dispatch(&ComputedChange {
            old_value,
            new_value: None,
        });
        self.subscribers.notify(scope);
    }
}

impl<T> Drop for ComputedInner<T> {
    fn drop(&mut self) {
        self.computation.dispose();
    }
}

impl<T> Computed<T>
where
    T: Clone + Send + Sync + PartialEq + 'static,
{
    /// Create a read-only computed cell.
    ///
    /// The getter is not run until the first read.
    pub fn new<F>(getter: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        Self::build(Arc::new(getter), None)
    }

    /// Create a computed cell whose writes are forwarded to `setter`.
    pub fn with_setter<F, S>(getter: F, setter: S) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
        S: Fn(T) -> Result<()> + Send + Sync + 'static,
    {
        Self::build(Arc::new(getter), Some(Arc::new(setter)))
    }

    fn build(getter: Getter<T>, setter: Option<Setter<T>>) -> Self {
        let inner = Arc::new_cyclic(|this: &Weak<ComputedInner<T>>| {
            let this = this.clone();
            let computation = Subscriber::new_cyclic(SubscriberKind::Lazy, move |_| -> NotifyFn {
                Arc::new(move |scope| {
                    if let Some(inner) = this.upgrade() {
                        inner.invalidate(scope);
                    }
                })
            });
            ComputedInner {
                subscribers: SubscriberSet::new(),
                computation,
                getter,
                setter,
                value: RwLock::new(None),
                dirty: AtomicBool::new(true),
                change: ChangeEmitter::new(),
            }
        });
        Self { inner }
    }

    /// Get the computed's unique ID.
    pub fn id(&self) -> u64 {
        self.inner.subscribers.id()
    }

    /// Get the subscriber ID of the computation reading the dependencies.
    pub fn subscriber_id(&self) -> SubscriberId {
        self.inner.computation.id()
    }

    /// Get the current value, recomputing if necessary.
    ///
    /// If called within a tracked run, this also registers the running
    /// computation as a dependent.
    pub fn get(&self) -> T {
        self.inner.subscribers.track();
        self.read()
    }

    /// Get the current value without tracking the read.
    ///
    /// The cell still recomputes if it is dirty.
    pub fn get_untracked(&self) -> T {
        self.read()
    }

    fn read(&self) -> T {
        if self.inner.dirty.load(Ordering::SeqCst) {
            return self.inner.recompute();
        }
        let cached = self.inner.value.read().clone();
        match cached {
            Some(value) => value,
            None => self.inner.recompute(),
        }
    }

    /// Write through the cell's setter.
    ///
    /// Fails with [`ReactiveError::InvalidOperation`] if the cell was
    /// created without one.
    pub fn set(&self, value: T) -> Result<()> {
        match &self.inner.setter {
            Some(setter) => setter(value),
            None => {
                warn!(computed = self.id(), "write to a computed without setter");
                Err(ReactiveError::invalid_operation("this computed cannot be set"))
            }
        }
    }

    /// Check if the cell can be written.
    pub fn is_writable(&self) -> bool {
        self.inner.setter.is_some()
    }

    /// Mark the cell as needing recomputation and notify its dependents.
    pub fn mark_dirty(&self) {
        self.inner.invalidate(Runtime::current_scope().as_ref());
    }

    /// Get the current dirty state.
    pub fn state(&self) -> ComputedState {
        if self.inner.dirty.load(Ordering::SeqCst) {
            ComputedState::Dirty
        } else {
            ComputedState::Clean
        }
    }

    /// Check if the cell has a cached value.
    pub fn has_value(&self) -> bool {
        self.inner.value.read().is_some()
    }

    /// Listen for invalidations and value changes.
    pub fn on_change<F>(&self, listener: F) -> Unsubscribe
    where
        F: Fn(&ComputedChange<T>) + Send + Sync + 'static,
    {
        self.inner.change.on(listener)
    }

    /// Get a handle to the cell's change emitter.
    pub fn emitter(&self) -> ChangeEmitter<ComputedChange<T>> {
        self.inner.change.clone()
    }

    /// Get the number of dependents.
    pub fn dependent_count(&self) -> usize {
        self.inner.subscribers.len()
    }

    /// Get the number of cells read by the last computation.
    pub fn dependency_count(&self) -> usize {
        self.inner.computation.dependency_count()
    }
}

impl<T> Clone for Computed<T>
where
    T: Clone + Send + Sync + PartialEq + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Debug for Computed<T>
where
    T: Clone + Send + Sync + PartialEq + Debug + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Computed")
            .field("id", &self.id())
            .field("state", &self.state())
            .field("has_value", &self.has_value())
            .field("dependent_count", &self.dependent_count())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
