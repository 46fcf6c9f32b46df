//! Deep observable stores.
//!
//! A [`Store`] wraps a target [`Object`] and turns key reads and writes into
//! reactive operations. Every key has its own dependent set, so an effect that
//! reads `store.get("a")` is only re-run by writes to `"a"`.
//!
//! When a store is created, nested objects that already have a store are
//! linked to it. With `deep` set, the other nested objects are wrapped in
//! child stores as well, and objects written later are wrapped on first
//! access. A child's change events are re-broadcast on the parent with the
//! key prefixed (`"obj.plop"`). Replacing or deleting the nested object tears
//! the link down, so the old object's later changes no longer reach the
//! parent.
//!
//! Objects that contain each other relay an event around the cycle once: a
//! store already relaying on this thread does not relay again.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use super::field::Field;
use super::options::{ObservableOptions, StoreConfig};
use super::registry;
use crate::emitter::{ChangeEmitter, Unsubscribe};
use crate::error::{ReactiveError, Result};
use crate::reactive::{BatchScope, ReactiveContext, Runtime, SubscriberSet};
use crate::value::{Object, Value};

thread_local! {
    /// Stores currently re-broadcasting a child event on this thread.
    static RELAYING: RefCell<HashSet<usize>> = RefCell::new(HashSet::new());
}

/// Marks a store as relaying until dropped.
struct RelayGuard {
    key: usize,
}

impl RelayGuard {
    /// `None` when the store is already relaying.
    fn enter(inner: &Arc<StoreInner>) -> Option<Self> {
        let key = Arc::as_ptr(inner) as usize;
        RELAYING
            .with(|relaying| relaying.borrow_mut().insert(key))
            .then(|| Self { key })
    }
}

impl Drop for RelayGuard {
    fn drop(&mut self) {
        RELAYING.with(|relaying| relaying.borrow_mut().remove(&self.key));
    }
}

/// A change to one key of a store.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    /// The changed key; `"parent.child"` for changes re-broadcast from a
    /// nested store.
    pub key: String,
    /// `Null` for deletions.
    pub new_value: Value,
    /// `None` when the key did not exist or no previous value is known.
    pub old_value: Option<Value>,
}

impl ChangeEvent {
    /// Key used by `watch_store` for its immediate call.
    pub const TARGET: &'static str = "$target";
}

/// A reactive view over a target object.
///
/// Cloning yields another handle to the same store. Observing the same
/// target twice yields the same store as well.
#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

/// Weak handle to a store.
#[derive(Clone, Debug, Default)]
pub struct WeakStore {
    inner: Weak<StoreInner>,
}

impl WeakStore {
    pub fn upgrade(&self) -> Option<Store> {
        self.inner.upgrade().map(Store::from_inner)
    }
}

pub(crate) struct StoreInner {
    target: Object,
    options: ObservableOptions,
    /// Dependent set per key, created on first tracked read.
    cells: Mutex<HashMap<String, Arc<SubscriberSet>>>,
    /// Child stores linked under the key they were reached through.
    children: Mutex<HashMap<String, ChildLink>>,
    change: ChangeEmitter<ChangeEvent>,
    /// Lazy store not yet started by `trigger`.
    awaiting_trigger: AtomicBool,
}

struct ChildLink {
    store: Store,
    listener: Unsubscribe,
}

impl ChildLink {
    fn detach(self) {
        self.listener.unsubscribe();
    }
}

impl StoreInner {
    fn write(&self, key: &str, value: Value, scope: Option<&BatchScope>) {
        let old_value = match self.target.set(key, value.clone()) {
            Ok(old_value) => old_value,
            Err(err) => {
                warn!(%err, key, "store write rejected by target");
                return;
            }
        };
        self.unlink_if_replaced(key, Some(&value));
        self.publish(
            ChangeEvent {
                key: key.to_owned(),
                new_value: value,
                old_value,
            },
            scope,
        );
    }

    fn remove(&self, key: &str, scope: Option<&BatchScope>) {
        let Some(old_value) = self.target.remove(key) else {
            return;
        };
        self.unlink_if_replaced(key, None);
        self.publish(
            ChangeEvent {
                key: key.to_owned(),
                new_value: Value::Null,
                old_value: Some(old_value),
            },
            scope,
        );
    }

    /// Dispatch the event, then notify the key's dependents.
    fn publish(&self, event: ChangeEvent, scope: Option<&BatchScope>) {
        if self.change.is_muted() {
            trace!(key = %event.key, "store muted, change not propagated");
            return;
        }
        self.change.dispatch(&event);
        let cell = self.cells.lock().get(&event.key).cloned();
        if let Some(cell) = cell {
            cell.notify(scope);
        }
    }

    /// Drop the child link under `key` unless `new_value` is the same object.
    fn unlink_if_replaced(&self, key: &str, new_value: Option<&Value>) {
        let stale = {
            let mut children = self.children.lock();
            let keep = match (children.get(key), new_value) {
                (None, _) => true,
                (Some(link), Some(Value::Object(object))) => {
                    link.store.inner.target.ptr_eq(object)
                }
                (Some(_), _) => false,
            };
            if keep {
                None
            } else {
                children.remove(key)
            }
        };
        if let Some(link) = stale {
            debug!(key, child = link.store.id(), "child store unlinked");
            link.detach();
        }
    }
}

impl Drop for StoreInner {
    fn drop(&mut self) {
        for (_, link) in self.children.get_mut().drain() {
            link.detach();
        }
        registry::release(self.target.id());
    }
}

/// Restores an emitter's mute flag on scope exit.
struct MuteRestore<'a> {
    emitter: &'a ChangeEmitter<ChangeEvent>,
    muted: bool,
}

impl Drop for MuteRestore<'_> {
    fn drop(&mut self) {
        self.emitter.mute(self.muted);
    }
}

impl Store {
    /// Return the store observing `target`, creating and linking it if there
    /// is none.
    pub(crate) fn observe(target: &Object, options: ObservableOptions) -> Self {
        let (store, created) =
            registry::get_or_insert_with(target, || Store::create(target.clone(), options));
        if created {
            store.link_nested();
        }
        store
    }

    /// Build a store without consulting the identity table.
    pub(crate) fn create(target: Object, options: ObservableOptions) -> Self {
        let lazy = options.config.lazy;
        let change = ChangeEmitter::new();
        change.mute(lazy);

        debug!(
            target_id = target.id(),
            deep = options.config.deep,
            watchable = options.config.watchable,
            readonly = options.config.readonly,
            lazy,
            "store created"
        );

        Self {
            inner: Arc::new(StoreInner {
                target,
                options,
                cells: Mutex::new(HashMap::new()),
                children: Mutex::new(HashMap::new()),
                change,
                awaiting_trigger: AtomicBool::new(lazy),
            }),
        }
    }

    pub(crate) fn from_inner(inner: Arc<StoreInner>) -> Self {
        Self { inner }
    }

    pub(crate) fn downgrade_inner(&self) -> Weak<StoreInner> {
        Arc::downgrade(&self.inner)
    }

    pub fn downgrade(&self) -> WeakStore {
        WeakStore {
            inner: self.downgrade_inner(),
        }
    }

    /// Get the store's unique ID.
    pub fn id(&self) -> u64 {
        self.inner.change.id()
    }

    /// Check whether two handles refer to the same store.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn config(&self) -> StoreConfig {
        self.inner.options.config
    }

    pub fn is_readonly(&self) -> bool {
        self.inner.options.config.readonly
    }

    /// Check whether the store boxes a single value (see `ref_value`).
    pub fn is_reference(&self) -> bool {
        self.inner.options.config.reference
    }

    /// The wrapped target. Writes to it bypass the store.
    pub fn raw(&self) -> Object {
        self.inner.target.clone()
    }

    /// Read `key`.
    ///
    /// Mixin properties take precedence over the target. With `deep` set,
    /// nested objects come back as child stores; objects that already have a
    /// store come back as that store either way.
    pub fn get(&self, key: &str) -> Field {
        self.track(key);

        if let Some(property) = self.inner.options.mixin.get(key) {
            return Field::Value((property.get)(self));
        }

        match self.inner.target.get(key).unwrap_or_default() {
            Value::Object(object) if self.inner.options.config.deep => {
                Field::Store(self.child(key, &object))
            }
            Value::Object(object) => match registry::lookup(&object) {
                Some(store) => Field::Store(store),
                None => Field::Value(Value::Object(object)),
            },
            value => Field::Value(value),
        }
    }

    /// Read `key` as a plain value; child stores are unwrapped to their target.
    pub fn get_value(&self, key: &str) -> Value {
        self.get(key).into_value()
    }

    /// Check whether `key` exists on the mixin or the target.
    pub fn has(&self, key: &str) -> bool {
        self.track(key);
        self.inner.options.mixin.contains(key) || self.inner.target.contains_key(key)
    }

    /// Keys of the target, in target order.
    pub fn keys(&self) -> Vec<String> {
        self.inner.target.keys()
    }

    /// Write `key`.
    ///
    /// Writes equal to the current value (per the store's compare function)
    /// are ignored. Inside a batch the write is queued on the current scope.
    pub fn set(&self, key: &str, value: impl Into<Value>) -> Result<()> {
        let value = value.into();

        if let Some(property) = self.inner.options.mixin.get(key) {
            return match &property.set {
                Some(set) => set(self, value),
                None => {
                    warn!(key, "write to read-only mixin property");
                    Err(ReactiveError::invalid_operation(format!(
                        "mixin property \"{key}\" is read-only"
                    )))
                }
            };
        }

        self.check_writable(key)?;

        if self.inner.target.contains_key(key) {
            let current = self.inner.target.get(key).unwrap_or_default();
            if self.inner.options.equals(&current, &value) {
                trace!(key, "store write skipped: value unchanged");
                return Ok(());
            }
        }

        if !self.inner.target.accepts_key(key) {
            return Err(ReactiveError::precondition(format!(
                "\"{key}\" is not a list index in range"
            )));
        }

        match Runtime::current_scope() {
            Some(scope) => {
                let inner = Arc::clone(&self.inner);
                let key = key.to_owned();
                scope.register_update(move |scope| inner.write(&key, value, Some(scope)));
            }
            None => self.inner.write(key, value, None),
        }
        Ok(())
    }

    /// Remove `key`. Returns `false` if it did not exist.
    pub fn delete(&self, key: &str) -> Result<bool> {
        if self.inner.options.mixin.contains(key) {
            warn!(key, "delete of mixin property");
            return Err(ReactiveError::invalid_operation(format!(
                "mixin property \"{key}\" cannot be deleted"
            )));
        }

        self.check_writable(key)?;

        if !self.inner.target.contains_key(key) {
            return Ok(false);
        }

        match Runtime::current_scope() {
            Some(scope) => {
                let inner = Arc::clone(&self.inner);
                let key = key.to_owned();
                scope.register_update(move |scope| inner.remove(&key, Some(scope)));
            }
            None => self.inner.remove(key, None),
        }
        Ok(true)
    }

    /// Write several keys inside one batch.
    ///
    /// Stops at the first rejected write; earlier writes still apply.
    pub fn update<K, V, I>(&self, partial: I) -> Result<()>
    where
        K: AsRef<str>,
        V: Into<Value>,
        I: IntoIterator<Item = (K, V)>,
    {
        Runtime::batch(|_| {
            partial
                .into_iter()
                .try_for_each(|(key, value)| self.set(key.as_ref(), value))
        })
    }

    /// Re-broadcast the current value of `keys` (every target key if empty).
    ///
    /// With `old_values`, keys whose old value equals the current one are
    /// skipped. Dispatches even while the store is muted; the first trigger of
    /// a lazy store unmutes it for good.
    pub fn trigger(&self, keys: &[&str], old_values: Option<&Object>) {
        let starting = self.inner.awaiting_trigger.swap(false, Ordering::SeqCst);
        let _restore = (!starting).then(|| MuteRestore {
            emitter: &self.inner.change,
            muted: self.inner.change.is_muted(),
        });
        if starting {
            debug!(store = self.id(), "lazy store started");
        }
        self.inner.change.mute(false);

        let keys: Vec<String> = if keys.is_empty() {
            self.inner.target.keys()
        } else {
            keys.iter().map(|key| (*key).to_owned()).collect()
        };
        let scope = Runtime::current_scope();

        for key in keys {
            let new_value = self.peek(&key);
            let old_value = match old_values {
                Some(old) if old.contains_key(&key) => {
                    let old_value = old.get(&key).unwrap_or_default();
                    if self.inner.options.equals(&old_value, &new_value) {
                        continue;
                    }
                    Some(old_value)
                }
                _ => None,
            };
            self.inner.publish(
                ChangeEvent {
                    key,
                    new_value,
                    old_value,
                },
                scope.as_ref(),
            );
        }
    }

    /// Listen for changes to this store and its linked children.
    pub fn on_change<F>(&self, listener: F) -> Unsubscribe
    where
        F: Fn(&ChangeEvent) + Send + Sync + 'static,
    {
        self.inner.change.on(listener)
    }

    /// Get a handle to the store's change emitter.
    pub fn emitter(&self) -> ChangeEmitter<ChangeEvent> {
        self.inner.change.clone()
    }

    /// Suppress (or resume) change propagation.
    pub fn mute(&self, muted: bool) {
        self.inner.change.mute(muted);
    }

    pub fn is_muted(&self) -> bool {
        self.inner.change.is_muted()
    }

    /// Get the number of computations depending on `key`.
    pub fn dependent_count(&self, key: &str) -> usize {
        self.inner
            .cells
            .lock()
            .get(key)
            .map_or(0, |cell| cell.len())
    }

    fn track(&self, key: &str) {
        if !self.inner.options.config.watchable || !ReactiveContext::is_active() {
            return;
        }
        let cell = Arc::clone(
            self.inner
                .cells
                .lock()
                .entry(key.to_owned())
                .or_insert_with(SubscriberSet::new),
        );
        cell.track();
    }

    /// Current value of `key` without tracking or wrapping.
    fn peek(&self, key: &str) -> Value {
        match self.inner.options.mixin.get(key) {
            Some(property) => (property.get)(self),
            None => self.inner.target.get(key).unwrap_or_default(),
        }
    }

    fn check_writable(&self, key: &str) -> Result<()> {
        if self.inner.options.config.readonly {
            warn!(key, store = self.id(), "write to read-only store");
            return Err(ReactiveError::invalid_operation(format!(
                "cannot modify \"{key}\": store is read-only"
            )));
        }
        Ok(())
    }

    /// Link the nested objects of the target: existing stores always, new
    /// child stores when `deep` is set.
    fn link_nested(&self) {
        for key in self.inner.target.keys() {
            let Some(Value::Object(object)) = self.inner.target.get(&key) else {
                continue;
            };
            if self.inner.options.config.deep {
                self.child(&key, &object);
            } else if let Some(store) = registry::lookup(&object) {
                self.link(&key, store);
            }
        }
    }

    /// Get or create the child store for the object under `key`.
    fn child(&self, key: &str, object: &Object) -> Store {
        if let Some(link) = self.inner.children.lock().get(key) {
            if link.store.inner.target.ptr_eq(object) {
                return link.store.clone();
            }
        }

        let child = Store::observe(object, self.inner.options.for_child());
        self.link(key, child)
    }

    /// Re-broadcast `child`'s events on this store under `key`.
    fn link(&self, key: &str, child: Store) -> Store {
        if child.ptr_eq(self) {
            return child;
        }
        if let Some(link) = self.inner.children.lock().get(key) {
            if link.store.ptr_eq(&child) {
                return child;
            }
        }

        let parent = Arc::downgrade(&self.inner);
        let prefix = key.to_owned();
        let listener = child.inner.change.on(move |event: &ChangeEvent| {
            let Some(parent) = parent.upgrade() else {
                return;
            };
            let Some(_relaying) = RelayGuard::enter(&parent) else {
                trace!(key = %event.key, "store already relaying, cycle stopped");
                return;
            };
            parent.change.dispatch(&ChangeEvent {
                key: format!("{prefix}.{}", event.key),
                new_value: event.new_value.clone(),
                old_value: event.old_value.clone(),
            });
        });
        debug!(key, parent = self.id(), child = child.id(), "child store linked");

        let stale = self.inner.children.lock().insert(
            key.to_owned(),
            ChildLink {
                store: child.clone(),
                listener,
            },
        );
        if let Some(stale) = stale {
            stale.detach();
        }
        child
    }
}

impl PartialEq for Store {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("id", &self.id())
            .field("config", &self.inner.options.config)
            .field("target", &self.inner.target)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::Effect;
    use std::sync::atomic::AtomicI32;

    fn record(store: &Store) -> Arc<Mutex<Vec<ChangeEvent>>> {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        store.on_change(move |event| sink.lock().push(event.clone()));
        events
    }

    fn observe(target: &Object, options: ObservableOptions) -> Store {
        Store::observe(target, options)
    }

    #[test]
    fn set_dispatches_key_and_values() {
        let store = observe(&Object::from_entries([("count", 1)]), ObservableOptions::new());
        let events = record(&store);

        store.set("count", 2).unwrap();

        assert_eq!(
            *events.lock(),
            vec![ChangeEvent {
                key: "count".into(),
                new_value: Value::from(2),
                old_value: Some(Value::from(1)),
            }]
        );
        assert_eq!(store.raw().get("count"), Some(Value::from(2)));
    }

    #[test]
    fn unchanged_write_is_ignored() {
        let store = observe(&Object::from_entries([("count", 1)]), ObservableOptions::new());
        let events = record(&store);

        store.set("count", 1).unwrap();

        assert!(events.lock().is_empty());
    }

    #[test]
    fn readonly_store_rejects_writes_and_deletes() {
        let target = Object::from_entries([("count", 1)]);
        let store = observe(&target, ObservableOptions::new().readonly(true));

        assert!(matches!(
            store.set("count", 2),
            Err(ReactiveError::InvalidOperation(_))
        ));
        assert!(matches!(
            store.delete("count"),
            Err(ReactiveError::InvalidOperation(_))
        ));
        assert_eq!(target.get("count"), Some(Value::from(1)));
    }

    #[test]
    fn delete_dispatches_null_with_old_value() {
        let store = observe(&Object::from_entries([("a", 1)]), ObservableOptions::new());
        let events = record(&store);

        assert!(store.delete("a").unwrap());
        assert!(!store.delete("a").unwrap());

        assert_eq!(events.lock().len(), 1);
        assert_eq!(events.lock()[0].new_value, Value::Null);
        assert_eq!(events.lock()[0].old_value, Some(Value::from(1)));
        assert!(!store.has("a"));
    }

    #[test]
    fn watchable_reads_are_tracked_per_key() {
        let store = observe(
            &Object::from_entries([("a", 1), ("b", 1)]),
            ObservableOptions::new().watchable(true),
        );
        let runs = Arc::new(AtomicI32::new(0));

        let reader = store.clone();
        let runs_clone = runs.clone();
        let _effect = Effect::new(move || {
            reader.get("a");
            runs_clone.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(store.dependent_count("a"), 1);

        store.set("b", 2).unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        store.set("a", 2).unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn lazy_store_is_silent_until_triggered() {
        let store = observe(&Object::from_entries([("a", 1)]), ObservableOptions::new().lazy(true));
        let events = record(&store);

        store.set("a", 2).unwrap();
        assert!(events.lock().is_empty());
        assert!(store.is_muted());

        store.trigger(&[], None);
        assert_eq!(events.lock().len(), 1);
        assert!(!store.is_muted());

        store.set("a", 3).unwrap();
        assert_eq!(events.lock().len(), 2);
    }

    #[test]
    fn trigger_skips_keys_matching_old_values() {
        let store = observe(
            &Object::from_entries([("a", 1), ("b", 2)]),
            ObservableOptions::new(),
        );
        let events = record(&store);

        let old = Object::from_entries([("a", 1), ("b", 1)]);
        store.trigger(&["a", "b"], Some(&old));

        let events = events.lock();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].key, "b");
        assert_eq!(events[0].old_value, Some(Value::from(1)));
    }

    #[test]
    fn trigger_restores_explicit_mute() {
        let store = observe(&Object::from_entries([("a", 1)]), ObservableOptions::new());
        let events = record(&store);
        store.mute(true);

        store.trigger(&["a"], None);

        assert_eq!(events.lock().len(), 1);
        assert!(store.is_muted());
    }

    #[test]
    fn list_targets_reject_non_index_keys() {
        let store = observe(&Object::from_values([1, 2]), ObservableOptions::new());

        assert!(matches!(
            store.set("name", 1),
            Err(ReactiveError::PreconditionViolation(_))
        ));
        store.set("2", 3).unwrap();
        assert_eq!(store.keys(), vec!["0", "1", "2"]);
    }

    #[test]
    fn list_targets_reject_huge_indices() {
        let store = observe(&Object::from_values([1, 2]), ObservableOptions::new());
        let events = record(&store);

        assert!(matches!(
            store.set("18446744073709551615", 3),
            Err(ReactiveError::PreconditionViolation(_))
        ));
        assert_eq!(store.keys(), vec!["0", "1"]);
        assert!(events.lock().is_empty());
    }

    #[test]
    fn existing_stores_are_linked_on_creation() {
        let inner_target = Object::from_entries([("k", 1)]);
        let inner = observe(&inner_target, ObservableOptions::new());
        let plain = Object::from_entries([("k", 1)]);
        let outer = observe(
            &Object::from_entries([("inner", inner_target), ("plain", plain.clone())]),
            ObservableOptions::new(),
        );
        let events = record(&outer);

        inner.set("k", 2).unwrap();
        assert!(registry::lookup(&plain).is_none());

        let keys: Vec<String> = events.lock().iter().map(|e| e.key.clone()).collect();
        assert_eq!(keys, vec!["inner.k"]);
    }

    #[test]
    fn mutually_nested_stores_relay_once() {
        let (a, b) = (Object::map(), Object::map());
        a.set("b", b.clone()).unwrap();
        b.set("a", a.clone()).unwrap();

        let store = observe(&a, ObservableOptions::reactive());
        let events = record(&store);
        store.set("x", 1).unwrap();

        let mut keys: Vec<String> = events.lock().iter().map(|e| e.key.clone()).collect();
        keys.sort();
        assert_eq!(keys, vec!["b.a.x", "x"]);
    }
}
