//! Reactive Context
//!
//! The reactive context tracks which computation is currently running.
//! When a cell is read, the current computation is registered as one of its
//! dependents.
//!
//! # Implementation
//!
//! A thread-local stack holds the running computations. Entering a tracked
//! run pushes a frame and the returned guard pops it, so the stack stays
//! balanced even when the computation panics. Nested runs (a computed read
//! from an effect) push nested frames.
//!
//! Each frame carries a `tracking` flag. [`ReactiveContext::untrack`] clears
//! it on the top frame for the duration of a closure, which hides the
//! computation from cells read inside it.

use std::cell::RefCell;
use std::sync::{Arc, Weak};

use indexmap::IndexMap;

use super::subscriber::{Subscriber, SubscriberId, SubscriberSet};

thread_local! {
    static CONTEXT_STACK: RefCell<Vec<ContextEntry>> = const { RefCell::new(Vec::new()) };
}

/// An entry in the reactive context stack.
struct ContextEntry {
    subscriber: Arc<Subscriber>,
    tracking: bool,
    /// Cells read during this run, in first-read order.
    dependencies: IndexMap<u64, Weak<SubscriberSet>>,
}

/// Guard that pops the context when dropped.
pub struct ReactiveContext {
    subscriber_id: SubscriberId,
}

impl ReactiveContext {
    /// Enter a new reactive context for the given subscriber.
    ///
    /// The context is exited when the returned guard is dropped.
    pub fn enter(subscriber: Arc<Subscriber>) -> Self {
        let subscriber_id = subscriber.id();
        CONTEXT_STACK.with(|stack| {
            stack.borrow_mut().push(ContextEntry {
                subscriber,
                tracking: true,
                dependencies: IndexMap::new(),
            });
        });

        Self { subscriber_id }
    }

    /// Check if reads are currently being tracked.
    pub fn is_active() -> bool {
        CONTEXT_STACK.with(|stack| stack.borrow().last().is_some_and(|entry| entry.tracking))
    }

    /// Get the computation reads are attributed to, if any.
    pub fn current_subscriber() -> Option<Arc<Subscriber>> {
        CONTEXT_STACK.with(|stack| {
            stack
                .borrow()
                .last()
                .filter(|entry| entry.tracking)
                .map(|entry| Arc::clone(&entry.subscriber))
        })
    }

    /// Record a dependency on the given cell.
    pub(crate) fn track_dependency(cell: &Arc<SubscriberSet>) {
        CONTEXT_STACK.with(|stack| {
            if let Some(entry) = stack.borrow_mut().last_mut() {
                if entry.tracking {
                    entry
                        .dependencies
                        .entry(cell.id())
                        .or_insert_with(|| Arc::downgrade(cell));
                }
            }
        });
    }

    /// Get the IDs of the cells read so far in the current context.
    pub fn get_dependencies() -> Vec<u64> {
        CONTEXT_STACK.with(|stack| {
            stack
                .borrow()
                .last()
                .map(|entry| entry.dependencies.keys().copied().collect())
                .unwrap_or_default()
        })
    }

    /// Take the dependencies collected by this guard's frame.
    pub(crate) fn take_dependencies(&self) -> IndexMap<u64, Weak<SubscriberSet>> {
        CONTEXT_STACK.with(|stack| {
            stack
                .borrow_mut()
                .last_mut()
                .filter(|entry| entry.subscriber.id() == self.subscriber_id)
                .map(|entry| std::mem::take(&mut entry.dependencies))
                .unwrap_or_default()
        })
    }

    /// Run `f` without attributing its reads to the current computation.
    ///
    /// The previous tracking state is restored on return and on unwind.
    pub fn untrack<R>(f: impl FnOnce() -> R) -> R {
        let previous = CONTEXT_STACK.with(|stack| {
            stack
                .borrow_mut()
                .last_mut()
                .map(|entry| std::mem::replace(&mut entry.tracking, false))
        });
        let _restore = UntrackGuard { previous };
        f()
    }
}

impl Drop for ReactiveContext {
    fn drop(&mut self) {
        CONTEXT_STACK.with(|stack| {
            let popped = stack.borrow_mut().pop();

            // Verify we're popping the right context.
            if let Some(entry) = popped {
                debug_assert_eq!(
                    entry.subscriber.id(),
                    self.subscriber_id,
                    "ReactiveContext mismatch: expected {:?}, got {:?}",
                    self.subscriber_id,
                    entry.subscriber.id()
                );
            }
        });
    }
}

struct UntrackGuard {
    previous: Option<bool>,
}

impl Drop for UntrackGuard {
    fn drop(&mut self) {
        if let Some(previous) = self.previous {
            CONTEXT_STACK.with(|stack| {
                if let Some(entry) = stack.borrow_mut().last_mut() {
                    entry.tracking = previous;
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::panic::{self, AssertUnwindSafe};

    #[test]
    fn context_tracks_subscriber() {
        let subscriber = Subscriber::new(|| {});

        assert!(!ReactiveContext::is_active());
        assert!(ReactiveContext::current_subscriber().is_none());

        {
            let _ctx = ReactiveContext::enter(subscriber.clone());

            assert!(ReactiveContext::is_active());
            assert_eq!(
                ReactiveContext::current_subscriber().map(|s| s.id()),
                Some(subscriber.id())
            );
        }

        // Context should be cleaned up after drop
        assert!(!ReactiveContext::is_active());
        assert!(ReactiveContext::current_subscriber().is_none());
    }

    #[test]
    fn context_tracks_dependencies_once() {
        let subscriber = Subscriber::new(|| {});
        let a = SubscriberSet::new();
        let b = SubscriberSet::new();
        let _ctx = ReactiveContext::enter(subscriber);

        ReactiveContext::track_dependency(&a);
        ReactiveContext::track_dependency(&b);
        ReactiveContext::track_dependency(&a);

        assert_eq!(ReactiveContext::get_dependencies(), vec![a.id(), b.id()]);
    }

    #[test]
    fn nested_contexts() {
        let outer = Subscriber::new(|| {});
        let inner = Subscriber::new(|| {});
        let current = || ReactiveContext::current_subscriber().map(|s| s.id());

        {
            let _ctx1 = ReactiveContext::enter(outer.clone());
            assert_eq!(current(), Some(outer.id()));

            {
                let _ctx2 = ReactiveContext::enter(inner.clone());
                assert_eq!(current(), Some(inner.id()));
            }

            // After inner context drops, outer should be current
            assert_eq!(current(), Some(outer.id()));
        }

        assert!(current().is_none());
    }

    #[test]
    fn untrack_hides_the_current_subscriber() {
        let subscriber = Subscriber::new(|| {});
        let _ctx = ReactiveContext::enter(subscriber);

        let inside = ReactiveContext::untrack(ReactiveContext::is_active);

        assert!(!inside);
        assert!(ReactiveContext::is_active());
    }

    #[test]
    fn untrack_restores_tracking_after_panic() {
        let subscriber = Subscriber::new(|| {});
        let _ctx = ReactiveContext::enter(subscriber);

        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            ReactiveContext::untrack(|| panic!("boom"));
        }));

        assert!(result.is_err());
        assert!(ReactiveContext::is_active());
    }

    #[test]
    fn untrack_outside_any_context_just_runs() {
        assert_eq!(ReactiveContext::untrack(|| 7), 7);
    }
}
