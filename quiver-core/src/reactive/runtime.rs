//! Reactive Runtime
//!
//! The runtime is the entry point that ties the per-thread state together:
//! the reactive context stack (who is reading) and the batch scope stack
//! (where writes go).
//!
//! # How It Works
//!
//! 1. When a cell is read inside a tracked run, the running computation is
//!    registered as a dependent of the cell.
//!
//! 2. When a cell is written outside any batch, its dependents are notified
//!    right away: effects re-run, computed cells mark themselves stale.
//!
//! 3. Inside [`Runtime::batch`], the write is queued on the innermost scope
//!    instead. When the outermost call returns, the scope drains: updates
//!    first, then every affected effect exactly once.
//!
//! # Thread Safety
//!
//! Cells are `Send + Sync` and may be shared across threads. Both stacks are
//! thread-local, so tracking and batching are per thread.

use std::cell::RefCell;
use std::sync::Arc;

use tracing::debug;

use super::batch::{Apply, BatchScope};
use super::context::ReactiveContext;
use super::root::Root;
use super::subscriber::Subscriber;

thread_local! {
    static SCOPE_STACK: RefCell<Vec<BatchScope>> = const { RefCell::new(Vec::new()) };
}

/// Guard that pops a batch scope when dropped.
struct ScopeGuard {
    id: u64,
}

impl ScopeGuard {
    fn push(scope: BatchScope) -> Self {
        let id = scope.id();
        SCOPE_STACK.with(|stack| stack.borrow_mut().push(scope));
        Self { id }
    }
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        SCOPE_STACK.with(|stack| {
            let popped = stack.borrow_mut().pop();
            if let Some(scope) = popped {
                debug_assert_eq!(scope.id(), self.id, "batch scope stack mismatch");
            }
        });
    }
}

/// The per-thread reactive runtime.
pub struct Runtime;

impl Runtime {
    /// Run `f` inside a new batch scope and drain the scope afterwards.
    ///
    /// Writes made by `f` are deferred until it returns. Nested calls get
    /// their own scope, drained when the nested call returns. If `f` panics
    /// the scope is discarded without applying its pending work.
    pub fn batch<R>(f: impl FnOnce(&BatchScope) -> R) -> R {
        let scope = BatchScope::new();
        let result = {
            let _guard = ScopeGuard::push(scope.clone());
            f(&scope)
        };

        debug!(
            scope = scope.id(),
            updates = scope.pending_updates(),
            effects = scope.pending_effects(),
            "draining batch scope"
        );
        scope.apply(Apply::All);
        result
    }

    /// Get the innermost batch scope on this thread, if any.
    pub fn current_scope() -> Option<BatchScope> {
        SCOPE_STACK.with(|stack| stack.borrow().last().cloned())
    }

    /// Check if writes on this thread are currently deferred.
    pub fn is_batching() -> bool {
        SCOPE_STACK.with(|stack| !stack.borrow().is_empty())
    }

    /// Get the computation reads are currently attributed to, if any.
    pub fn current_subscriber() -> Option<Arc<Subscriber>> {
        ReactiveContext::current_subscriber()
    }

    /// Get the root new effects on this thread are owned by, if any.
    pub fn current_root() -> Option<Root> {
        Root::current()
    }

    /// Check if we're inside a tracked run.
    pub fn is_tracking() -> bool {
        ReactiveContext::is_active()
    }

    /// Run `f` with dependency tracking suspended.
    pub fn untrack<R>(f: impl FnOnce() -> R) -> R {
        ReactiveContext::untrack(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::panic::{self, AssertUnwindSafe};

    #[test]
    fn batch_pushes_and_pops_a_scope() {
        assert!(!Runtime::is_batching());

        let id = Runtime::batch(|scope| {
            assert!(Runtime::is_batching());
            let current = Runtime::current_scope().map(|s| s.id());
            assert_eq!(current, Some(scope.id()));
            scope.id()
        });

        assert!(!Runtime::is_batching());
        assert!(Runtime::current_scope().is_none());
        let _ = id;
    }

    #[test]
    fn nested_batches_use_the_innermost_scope() {
        Runtime::batch(|outer| {
            Runtime::batch(|inner| {
                assert_ne!(outer.id(), inner.id());
                assert_eq!(Runtime::current_scope().map(|s| s.id()), Some(inner.id()));
            });
            assert_eq!(Runtime::current_scope().map(|s| s.id()), Some(outer.id()));
        });
    }

    #[test]
    fn panicking_batch_pops_its_scope() {
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            Runtime::batch(|_| panic!("boom"));
        }));

        assert!(result.is_err());
        assert!(!Runtime::is_batching());
    }

    #[test]
    fn not_tracking_outside_a_computation() {
        assert!(!Runtime::is_tracking());
        assert!(Runtime::current_subscriber().is_none());
    }
}
