//! Watchers
//!
//! Callback-style observation on top of the reactive primitives:
//!
//! - [`watch`] calls back with new and old values whenever one of several
//!   sources (signals, computed cells, getter closures) changes.
//! - [`watch_store`] forwards a store's change events.
//! - [`watch_keys`] watches selected keys of a store.
//! - [`watch_effect`] re-runs a closure whenever what it read changes.
//!
//! Every watcher runs until its [`WatchHandle`] is stopped.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::emitter::Unsubscribe;
use crate::reactive::{Computed, Effect, Runtime, Signal};
use crate::store::{ChangeEvent, Store};
use crate::value::Value;

/// Something [`watch`] can observe.
pub enum WatchSource<T>
where
    T: Clone + Send + Sync + PartialEq + 'static,
{
    Signal(Signal<T>),
    Computed(Computed<T>),
    Getter(Arc<dyn Fn() -> T + Send + Sync>),
}

impl<T> WatchSource<T>
where
    T: Clone + Send + Sync + PartialEq + 'static,
{
    pub fn getter<F>(getter: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        Self::Getter(Arc::new(getter))
    }

    fn into_computed(self) -> Computed<T> {
        match self {
            Self::Signal(signal) => Computed::new(move || signal.get()),
            Self::Computed(computed) => computed,
            Self::Getter(getter) => Computed::new(move || getter()),
        }
    }
}

impl<T> From<Signal<T>> for WatchSource<T>
where
    T: Clone + Send + Sync + PartialEq + 'static,
{
    fn from(signal: Signal<T>) -> Self {
        Self::Signal(signal)
    }
}

impl<T> From<Computed<T>> for WatchSource<T>
where
    T: Clone + Send + Sync + PartialEq + 'static,
{
    fn from(computed: Computed<T>) -> Self {
        Self::Computed(computed)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WatchOptions {
    /// Call back once right away, with empty old values.
    pub immediate: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreWatchOptions {
    /// Call back once right away with a [`ChangeEvent::TARGET`] event.
    pub immediate: bool,
    /// Only forward events for these keys.
    pub filter: Option<Vec<String>>,
}

/// Stops a watcher.
#[derive(Debug, Default)]
pub struct WatchHandle {
    listeners: Vec<Unsubscribe>,
    effect: Option<Effect>,
}

impl WatchHandle {
    /// Stop watching. Idempotent.
    pub fn stop(&self) {
        for listener in &self.listeners {
            listener.unsubscribe();
        }
        if let Some(effect) = &self.effect {
            effect.dispose();
        }
    }
}

/// Call `callback(new_values, old_values)` whenever a source changes value.
///
/// Values are compared with `PartialEq`; invalidations that leave every value
/// unchanged are not reported.
pub fn watch<T, I, F>(sources: I, callback: F, options: WatchOptions) -> WatchHandle
where
    T: Clone + Send + Sync + PartialEq + 'static,
    I: IntoIterator<Item = WatchSource<T>>,
    F: Fn(&[T], &[T]) + Send + Sync + 'static,
{
    let cells: Arc<Vec<Computed<T>>> =
        Arc::new(sources.into_iter().map(WatchSource::into_computed).collect());
    let read = |cells: &[Computed<T>]| -> Vec<T> {
        Runtime::untrack(|| cells.iter().map(Computed::get).collect())
    };

    let initial = read(&cells[..]);
    let last = Arc::new(Mutex::new(initial.clone()));
    let callback = Arc::new(callback);

    let listeners = cells
        .iter()
        .map(|cell| {
            let cells = Arc::clone(&cells);
            let last = Arc::clone(&last);
            let callback = Arc::clone(&callback);
            cell.on_change(move |_| {
                let new_values = read(&cells[..]);
                // Swap before calling back: reading above may recompute and
                // re-enter this listener.
                let old_values = std::mem::replace(&mut *last.lock(), new_values.clone());
                if new_values != old_values {
                    callback(&new_values, &old_values);
                }
            })
        })
        .collect();

    if options.immediate {
        callback(&initial, &[]);
    }

    WatchHandle {
        listeners,
        effect: None,
    }
}

/// Forward the change events of `store` to `callback`.
pub fn watch_store<F>(store: &Store, callback: F, options: StoreWatchOptions) -> WatchHandle
where
    F: Fn(&Store, &ChangeEvent) + Send + Sync + 'static,
{
    let callback = Arc::new(callback);

    if options.immediate {
        callback(
            store,
            &ChangeEvent {
                key: ChangeEvent::TARGET.to_owned(),
                new_value: Value::Object(store.raw()),
                old_value: None,
            },
        );
    }

    let weak = store.downgrade();
    let filter = options.filter;
    let listener = store.on_change(move |event| {
        if filter.as_ref().is_some_and(|keys| !keys.contains(&event.key)) {
            return;
        }
        if let Some(store) = weak.upgrade() {
            callback(&store, event);
        }
    });

    WatchHandle {
        listeners: vec![listener],
        effect: None,
    }
}

/// Call `callback(new_values, old_values)` when any of `keys` changes value.
///
/// Works on any store: changes are picked up from its events, not from read
/// tracking.
pub fn watch_keys<F>(store: &Store, keys: &[&str], callback: F, options: WatchOptions) -> WatchHandle
where
    F: Fn(&[Value], &[Value]) + Send + Sync + 'static,
{
    let keys: Vec<String> = keys.iter().map(|key| (*key).to_owned()).collect();
    let read = |store: &Store, keys: &[String]| -> Vec<Value> {
        Runtime::untrack(|| keys.iter().map(|key| store.get_value(key)).collect())
    };

    let initial = read(store, &keys[..]);
    let last = Arc::new(Mutex::new(initial.clone()));
    let callback = Arc::new(callback);

    let weak = store.downgrade();
    let listener = {
        let callback = Arc::clone(&callback);
        store.on_change(move |event| {
            if !keys.contains(&event.key) {
                return;
            }
            let Some(store) = weak.upgrade() else {
                return;
            };
            let new_values = read(&store, &keys[..]);
            let old_values = std::mem::replace(&mut *last.lock(), new_values.clone());
            if new_values != old_values {
                callback(&new_values, &old_values);
            }
        })
    };

    if options.immediate {
        callback(&initial, &[]);
    }

    WatchHandle {
        listeners: vec![listener],
        effect: None,
    }
}

/// Run `f` now and again whenever anything it read changes.
pub fn watch_effect<F>(f: F) -> WatchHandle
where
    F: Fn() + Send + Sync + 'static,
{
    WatchHandle {
        listeners: Vec::new(),
        effect: Some(Effect::new(f)),
    }
}
