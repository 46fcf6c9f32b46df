//! Effect Ownership
//!
//! A [`Root`] collects the effects created while it is the current root on
//! this thread and disposes them together. The root is current only for the
//! duration of [`Root::run`]; effects created later, even by an owned
//! effect's re-run, are not captured.

use std::cell::RefCell;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use super::subscriber::Subscriber;

thread_local! {
    static ROOT_STACK: RefCell<Vec<Root>> = const { RefCell::new(Vec::new()) };
}

static NEXT_ROOT_ID: AtomicU64 = AtomicU64::new(1);

/// Guard that pops a root when dropped.
struct RootGuard {
    id: u64,
}

impl RootGuard {
    fn push(root: Root) -> Self {
        let id = root.id();
        ROOT_STACK.with(|stack| stack.borrow_mut().push(root));
        Self { id }
    }
}

impl Drop for RootGuard {
    fn drop(&mut self) {
        ROOT_STACK.with(|stack| {
            let popped = stack.borrow_mut().pop();
            if let Some(root) = popped {
                debug_assert_eq!(root.id(), self.id, "root stack mismatch");
            }
        });
    }
}

/// Owner of a group of effects.
///
/// # Example
///
/// ```rust
/// use quiver_core::{Effect, Root, Signal};
///
/// let count = Signal::new(0);
/// let root = Root::new();
/// let reader = count.clone();
/// let effect = root.run(|| Effect::new(move || { reader.get(); }));
///
/// root.dispose();
/// assert!(effect.is_disposed());
/// ```
#[derive(Clone)]
pub struct Root {
    inner: Arc<RootInner>,
}

struct RootInner {
    id: u64,
    effects: Mutex<Vec<Arc<Subscriber>>>,
    disposed: AtomicBool,
}

impl Root {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RootInner {
                id: NEXT_ROOT_ID.fetch_add(1, Ordering::Relaxed),
                effects: Mutex::new(Vec::new()),
                disposed: AtomicBool::new(false),
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Run `f` with this root as the current root.
    ///
    /// Effects created by `f` are owned by this root. Nested calls make the
    /// innermost root current.
    pub fn run<R>(&self, f: impl FnOnce() -> R) -> R {
        let _guard = RootGuard::push(self.clone());
        f()
    }

    /// Get the innermost root on this thread, if any.
    pub fn current() -> Option<Root> {
        ROOT_STACK.with(|stack| stack.borrow().last().cloned())
    }

    /// Take ownership of an effect. An effect adopted by a disposed root is
    /// disposed right away.
    pub(crate) fn adopt(&self, effect: Arc<Subscriber>) {
        if self.is_disposed() {
            effect.dispose();
            return;
        }
        self.inner.effects.lock().push(effect);
    }

    /// Dispose every owned effect. Later calls do nothing.
    pub fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        let effects = std::mem::take(&mut *self.inner.effects.lock());
        debug!(root = self.id(), effects = effects.len(), "disposing root");
        for effect in effects {
            effect.dispose();
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst)
    }

    /// Number of effects currently owned.
    pub fn effect_count(&self) -> usize {
        self.inner.effects.lock().len()
    }
}

impl Default for Root {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Root {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Root")
            .field("id", &self.id())
            .field("effect_count", &self.effect_count())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
