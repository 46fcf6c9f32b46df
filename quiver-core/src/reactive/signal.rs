//! Signal Implementation
//!
//! A Signal is the fundamental reactive primitive. It holds a value and
//! tracks which computations depend on it.
//!
//! # How Signals Work
//!
//! 1. When a signal is read within a tracked run (effect or computed), the
//!    running computation is registered as a subscriber.
//!
//! 2. When a signal is set to a value its equality policy considers
//!    different, all subscribers are notified. Equal writes are ignored.
//!
//! 3. Inside a batch, the write itself is deferred: the value changes when
//!    the batch drains, and subscribers run once afterwards.
//!
//! # Thread Safety
//!
//! The value is protected by a RwLock and the signal is `Send + Sync`, so a
//! cloned handle can be moved to another thread.

use std::fmt::{self, Debug};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use tracing::trace;

use super::batch::BatchScope;
use super::runtime::Runtime;
use super::subscriber::{NotifyFn, Subscriber, SubscriberId, SubscriberKind, SubscriberSet};

/// Decides whether a write actually changes a signal.
pub enum Equality<T> {
    /// Every write notifies, even with an identical value.
    Never,
    /// Writes for which the predicate returns `true` are ignored.
    Custom(Arc<dyn Fn(&T, &T) -> bool + Send + Sync>),
}

impl<T> Equality<T> {
    pub fn custom<F>(equals: F) -> Self
    where
        F: Fn(&T, &T) -> bool + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(equals))
    }

    pub fn is_equal(&self, current: &T, next: &T) -> bool {
        match self {
            Self::Never => false,
            Self::Custom(equals) => equals(current, next),
        }
    }
}

impl<T: PartialEq + 'static> Default for Equality<T> {
    fn default() -> Self {
        Self::custom(|a: &T, b: &T| a == b)
    }
}

impl<T> Clone for Equality<T> {
    fn clone(&self) -> Self {
        match self {
            Self::Never => Self::Never,
            Self::Custom(equals) => Self::Custom(Arc::clone(equals)),
        }
    }
}

impl<T> Debug for Equality<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Never => f.write_str("Never"),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// Options for creating a signal.
#[derive(Clone, Debug)]
pub struct SignalOptions<T> {
    pub equals: Equality<T>,
}

impl<T: PartialEq + 'static> Default for SignalOptions<T> {
    fn default() -> Self {
        Self {
            equals: Equality::default(),
        }
    }
}

/// A reactive signal holding a value of type T.
///
/// # Example
///
/// ```rust
/// use quiver_core::Signal;
///
/// let count = Signal::new(0);
/// count.set(5);
/// assert_eq!(count.get(), 5);
/// ```
pub struct Signal<T>
where
    T: Clone + Send + Sync + 'static,
{
    inner: Arc<SignalInner<T>>,
}

struct SignalInner<T> {
    value: RwLock<T>,
    equals: Equality<T>,
    subscribers: Arc<SubscriberSet>,
}

impl<T> SignalInner<T> {
    fn write(&self, value: T, scope: Option<&BatchScope>) {
        *self.value.write() = value;
        self.subscribers.notify(scope);
    }
}

impl<T> Signal<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a new signal that ignores writes equal to the current value.
    pub fn new(value: T) -> Self
    where
        T: PartialEq,
    {
        Self::with_options(value, SignalOptions::default())
    }

    /// Create a new signal with an explicit equality policy.
    pub fn with_options(value: T, options: SignalOptions<T>) -> Self {
        Self {
            inner: Arc::new(SignalInner {
                value: RwLock::new(value),
                equals: options.equals,
                subscribers: SubscriberSet::new(),
            }),
        }
    }

    /// Get the signal's unique ID.
    pub fn id(&self) -> u64 {
        self.inner.subscribers.id()
    }

    /// Get the current value.
    ///
    /// If called within a tracked run, this also registers the running
    /// computation as a subscriber.
    pub fn get(&self) -> T {
        self.inner.subscribers.track();
        self.inner.value.read().clone()
    }

    /// Run `f` on a snapshot of the current value, tracking the read like
    /// [`Signal::get`]. `f` may write to this signal.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        let value = self.get();
        f(&value)
    }

    /// Get the current value without tracking dependencies.
    pub fn get_untracked(&self) -> T {
        self.inner.value.read().clone()
    }

    /// Set a new value and notify subscribers.
    ///
    /// Does nothing if the equality policy considers `value` equal to the
    /// current value. Inside a batch the write is queued on the current
    /// scope.
    pub fn set(&self, value: T) {
        let current = self.get_untracked();
        if self.inner.equals.is_equal(&current, &value) {
            trace!(signal = self.id(), "signal write skipped: value unchanged");
            return;
        }

        match Runtime::current_scope() {
            Some(scope) => {
                trace!(signal = self.id(), scope = scope.id(), "signal write deferred");
                let inner = Arc::clone(&self.inner);
                scope.register_update(move |scope| inner.write(value, Some(scope)));
            }
            None => self.inner.write(value, None),
        }
    }

    /// Update the value using a function.
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&T) -> T,
    {
        let current = self.get_untracked();
        self.set(f(&current));
    }

    /// Register a callback that runs every time the signal changes.
    ///
    /// Unlike a tracked read, the subscription persists across
    /// notifications until [`Signal::unsubscribe`] is called.
    pub fn subscribe<F>(&self, notify: F) -> SubscriberId
    where
        F: Fn() + Send + Sync + 'static,
    {
        let cell: Weak<SubscriberSet> = Arc::downgrade(&self.inner.subscribers);
        let subscriber = Subscriber::new_cyclic(SubscriberKind::Eager, move |this| -> NotifyFn {
            Arc::new(move |_| {
                if let (Some(cell), Some(this)) = (cell.upgrade(), this.upgrade()) {
                    cell.add(this);
                }
                notify();
            })
        });
        let id = subscriber.id();
        self.inner.subscribers.add(subscriber);
        id
    }

    /// Remove a subscriber.
    pub fn unsubscribe(&self, subscriber_id: SubscriberId) -> bool {
        self.inner.subscribers.remove(subscriber_id)
    }

    /// Get the number of subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.len()
    }
}

impl<T> Clone for Signal<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Debug for Signal<T>
where
    T: Clone + Send + Sync + Debug + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("id", &self.id())
            .field("value", &self.get_untracked())
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}
