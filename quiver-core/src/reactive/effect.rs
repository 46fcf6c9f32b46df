//! Effect Implementation
//!
//! An Effect is a side-effecting computation that runs whenever its
//! dependencies change.
//!
//! # How Effects Work
//!
//! 1. When created, the effect runs its function immediately to establish
//!    initial dependencies.
//!
//! 2. When any dependency changes, the effect re-runs: right away, or once at
//!    the end of the enclosing batch.
//!
//! 3. Each run re-collects the dependencies; cells the previous run read but
//!    this one did not are unsubscribed.
//!
//! # Lifetime
//!
//! An effect stays subscribed until [`Effect::dispose`] is called, even if
//! every handle to it has been dropped. Disposal unsubscribes it from every
//! cell and drops the function together with whatever it captured. An effect
//! created inside [`Root::run`](super::Root::run) is also disposed with that
//! root.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use super::root::Root;
use super::runtime::Runtime;
use super::subscriber::{NotifyFn, Subscriber, SubscriberId, SubscriberKind};

/// A side-effecting computation that runs when dependencies change.
///
/// # Example
///
/// ```rust
/// use quiver_core::{Effect, Signal};
///
/// let count = Signal::new(0);
/// let watched = count.clone();
/// let effect = Effect::new(move || {
///     println!("Count is: {}", watched.get());
/// });
///
/// count.set(5); // Prints: "Count is: 5"
/// assert_eq!(effect.run_count(), 2);
/// ```
pub struct Effect {
    subscriber: Arc<Subscriber>,

    /// Number of times the effect has run.
    run_count: Arc<AtomicUsize>,
}

impl Effect {
    /// Create a new effect with the given function.
    ///
    /// The function runs immediately to establish initial dependencies.
    pub fn new<F>(run: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        let effect = Self::new_lazy(run);

        // Run immediately to establish dependencies
        effect.execute();

        effect
    }

    /// Create a new effect without running it immediately.
    ///
    /// It has no dependencies until [`Effect::execute`] is called.
    pub fn new_lazy<F>(run: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        let run_count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&run_count);

        let subscriber = Subscriber::new_cyclic(
            SubscriberKind::Eager,
            move |this: Weak<Subscriber>| -> NotifyFn {
                Arc::new(move |_| {
                    if let Some(this) = this.upgrade() {
                        counter.fetch_add(1, Ordering::SeqCst);
                        this.track(&run);
                    }
                })
            },
        );
        if let Some(root) = Root::current() {
            root.adopt(Arc::clone(&subscriber));
        }

        Self {
            subscriber,
            run_count,
        }
    }

    /// Get the subscriber ID for this effect.
    pub fn id(&self) -> SubscriberId {
        self.subscriber.id()
    }

    /// Execute the effect function now, re-collecting its dependencies.
    pub fn execute(&self) {
        self.subscriber.notify();
    }

    /// Schedule the effect to re-run.
    ///
    /// Inside a batch the run is deferred to the end of the batch and merged
    /// with any other pending run of the same effect.
    pub fn schedule(&self) {
        match Runtime::current_scope() {
            Some(scope) => scope.register_effects([Arc::clone(&self.subscriber)]),
            None => self.execute(),
        }
    }

    /// Dispose of the effect.
    ///
    /// After disposal, the effect will not run again.
    pub fn dispose(&self) {
        self.subscriber.dispose();
    }

    /// Check if the effect has been disposed.
    pub fn is_disposed(&self) -> bool {
        self.subscriber.is_disposed()
    }

    /// Get the number of times the effect has run.
    pub fn run_count(&self) -> usize {
        self.run_count.load(Ordering::SeqCst)
    }

    /// Get the number of cells read by the last run.
    pub fn dependency_count(&self) -> usize {
        self.subscriber.dependency_count()
    }
}

impl Clone for Effect {
    fn clone(&self) -> Self {
        Self {
            subscriber: Arc::clone(&self.subscriber),
            run_count: Arc::clone(&self.run_count),
        }
    }
}

impl std::fmt::Debug for Effect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Effect")
            .field("id", &self.id())
            .field("run_count", &self.run_count())
            .field("dependency_count", &self.dependency_count())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
