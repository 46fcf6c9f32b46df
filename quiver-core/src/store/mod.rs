//! Observable Stores
//!
//! A store makes a dynamic [`Object`] tree reactive: key reads register
//! dependencies (when `watchable`), key writes notify them and emit
//! [`ChangeEvent`]s, and nested objects are wrapped in child stores on first
//! access (when `deep`).
//!
//! Stores are identity-preserving: observing an object that already has a
//! live store returns that store, and the options passed the second time are
//! ignored.
//!
//! # Example
//!
//! ```rust
//! use quiver_core::store::reactive;
//! use quiver_core::value::Object;
//!
//! let state = reactive(Object::from_entries([("count", 1)]));
//! state.set("count", 2).unwrap();
//! assert_eq!(state.get("count").as_i64(), Some(2));
//! ```

mod field;
mod observable;
mod options;
mod registry;

pub use field::Field;
pub use observable::{ChangeEvent, Store, WeakStore};
pub use options::{
    Compare, Mixin, MixinGetter, MixinProperty, MixinSetter, ObservableOptions, StoreConfig,
};

use indexmap::IndexMap;

use crate::emitter::ChangeEmitter;
use crate::error::{ReactiveError, Result};
use crate::reactive::Computed;
use crate::value::{Object, Value};

/// The key a reference store boxes its value under.
pub const REF_KEY: &str = "value";

/// Anything that may resolve to a live store.
pub trait AsObservable {
    /// The store tracking this value, if there is one.
    fn observed(&self) -> Option<Store>;
}

impl AsObservable for Store {
    fn observed(&self) -> Option<Store> {
        Some(self.clone())
    }
}

impl AsObservable for Object {
    fn observed(&self) -> Option<Store> {
        registry::lookup(self)
    }
}

impl AsObservable for Value {
    fn observed(&self) -> Option<Store> {
        self.as_object().and_then(registry::lookup)
    }
}

impl AsObservable for Field {
    fn observed(&self) -> Option<Store> {
        match self {
            Field::Store(store) => Some(store.clone()),
            Field::Value(value) => value.observed(),
        }
    }
}

fn require<O: AsObservable + ?Sized>(value: &O, operation: &str) -> Result<Store> {
    value.observed().ok_or_else(|| {
        ReactiveError::precondition(format!("{operation}: value is not an observable"))
    })
}

/// Observe `target`, or return the store already observing it.
///
/// A new store links the nested objects that already have a store, and with
/// `deep` set wraps the rest, so their changes reach its listeners at once.
pub fn observable(target: Object, options: ObservableOptions) -> Store {
    Store::observe(&target, options)
}

/// Observe `target` with deep wrapping and read tracking.
pub fn reactive(target: Object) -> Store {
    observable(target, ObservableOptions::reactive())
}

pub fn is_observable<O: AsObservable + ?Sized>(value: &O) -> bool {
    value.observed().is_some()
}

/// Get the object a store wraps.
pub fn raw<O: AsObservable + ?Sized>(value: &O) -> Result<Object> {
    require(value, "raw").map(|store| store.raw())
}

/// Get the change emitter of an observable.
pub fn listen<O: AsObservable + ?Sized>(value: &O) -> Result<ChangeEmitter<ChangeEvent>> {
    require(value, "listen").map(|store| store.emitter())
}

/// Remove every change listener of an observable.
pub fn clear_listeners<O: AsObservable + ?Sized>(value: &O) -> Result<()> {
    require(value, "clear_listeners").map(|store| store.emitter().remove_listeners())
}

/// Re-broadcast keys of an observable. See [`Store::trigger`].
pub fn trigger_change<O: AsObservable + ?Sized>(
    value: &O,
    keys: &[&str],
    old_values: Option<&Object>,
) -> Result<()> {
    require(value, "trigger_change").map(|store| store.trigger(keys, old_values))
}

/// Box a single value in a watchable store under [`REF_KEY`].
pub fn ref_value(value: impl Into<Value>, lazy: bool) -> Store {
    let target = Object::from_entries([(REF_KEY, value.into())]);
    observable(
        target,
        ObservableOptions::new()
            .watchable(true)
            .lazy(lazy)
            .reference(true),
    )
}

/// Read the boxed value of a reference store.
pub fn unref(store: &Store) -> Result<Value> {
    if !store.is_reference() {
        return Err(ReactiveError::precondition(
            "unref: store is not a reference",
        ));
    }
    Ok(store.get_value(REF_KEY))
}

pub fn is_ref(store: &Store) -> bool {
    store.is_reference()
}

/// A computed cell bound to one key: reads the key, writes through to it.
///
/// The cell follows the key only if the store is watchable.
pub fn to_ref(store: &Store, key: &str) -> Computed<Value> {
    let (reader, writer) = (store.clone(), store.clone());
    let (read_key, write_key) = (key.to_owned(), key.to_owned());
    Computed::with_setter(
        move || reader.get_value(&read_key),
        move |value| writer.set(&write_key, value),
    )
}

/// [`to_ref`] for every key of the target, in key order.
pub fn to_refs(store: &Store) -> IndexMap<String, Computed<Value>> {
    store
        .keys()
        .into_iter()
        .map(|key| {
            let cell = to_ref(store, &key);
            (key, cell)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::Effect;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicI32, Ordering};
    use std::sync::Arc;

    #[test]
    fn observing_twice_returns_the_same_store() {
        let target = Object::from_entries([("a", 1)]);
        let first = observable(target.clone(), ObservableOptions::new());
        let second = reactive(target.clone());

        assert!(first.ptr_eq(&second));
        assert!(!second.config().deep);
    }

    #[test]
    fn dropped_stores_leave_the_table() {
        let target = Object::from_entries([("a", 1)]);
        let store = reactive(target.clone());
        assert!(is_observable(&target));

        drop(store);
        assert!(!is_observable(&target));
        assert!(raw(&target).is_err());
    }

    #[test]
    fn helpers_reject_plain_values() {
        let plain = Value::from(3);
        assert!(matches!(
            raw(&plain),
            Err(ReactiveError::PreconditionViolation(_))
        ));
        assert!(listen(&plain).is_err());
        assert!(clear_listeners(&plain).is_err());
        assert!(trigger_change(&plain, &[], None).is_err());
    }

    #[test]
    fn raw_returns_the_wrapped_target() {
        let target = Object::from_entries([("a", 1)]);
        let store = reactive(target.clone());

        assert!(raw(&store).unwrap().ptr_eq(&target));
        assert!(raw(&Value::Object(target.clone())).unwrap().ptr_eq(&target));
    }

    #[test]
    fn trigger_change_rebroadcasts_through_the_emitter() {
        let store = reactive(Object::from_entries([("a", 1)]));
        let count = Arc::new(AtomicI32::new(0));
        let count_clone = count.clone();
        listen(&store).unwrap().on(move |_| {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });

        trigger_change(&store, &["a"], None).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);

        clear_listeners(&store).unwrap();
        trigger_change(&store, &["a"], None).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn refs_box_a_single_value() {
        let boxed = ref_value(42, false);
        assert!(is_ref(&boxed));
        assert_eq!(unref(&boxed).unwrap(), Value::from(42));

        boxed.set(REF_KEY, 7).unwrap();
        assert_eq!(unref(&boxed).unwrap(), Value::from(7));

        let plain = reactive(Object::map());
        assert!(!is_ref(&plain));
        assert!(matches!(
            unref(&plain),
            Err(ReactiveError::PreconditionViolation(_))
        ));
    }

    #[test]
    fn refs_are_watchable() {
        let boxed = ref_value("a", false);
        let seen = Arc::new(Mutex::new(Vec::new()));

        let reader = boxed.clone();
        let seen_clone = seen.clone();
        let _effect = Effect::new(move || {
            if let Ok(value) = unref(&reader) {
                seen_clone.lock().push(value);
            }
        });
        boxed.set(REF_KEY, "b").unwrap();

        assert_eq!(*seen.lock(), vec![Value::from("a"), Value::from("b")]);
    }

    #[test]
    fn to_ref_reads_and_writes_one_key() {
        let store = reactive(Object::from_entries([("x", 1), ("y", 2)]));
        let x = to_ref(&store, "x");

        assert_eq!(x.get(), Value::from(1));
        store.set("x", 5).unwrap();
        assert_eq!(x.get(), Value::from(5));

        x.set(Value::from(9)).unwrap();
        assert_eq!(store.get_value("x"), Value::from(9));
    }

    #[test]
    fn to_refs_covers_every_key() {
        let store = reactive(Object::from_entries([("x", 1), ("y", 2)]));
        let refs = to_refs(&store);

        assert_eq!(refs.keys().collect::<Vec<_>>(), vec!["x", "y"]);
        assert_eq!(refs["y"].get(), Value::from(2));
    }
}
