//! Function-style entry points.
//!
//! Thin wrappers over the primitives for code that prefers accessor and
//! setter closures to handle types.

use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;

use crate::error::Result;
use crate::reactive::{BatchScope, Computed, Effect, Root, Runtime, Signal, SignalOptions};

/// Reads a value, tracking the read.
pub type Accessor<T> = Arc<dyn Fn() -> T + Send + Sync>;

/// Writes a value.
pub type Setter<T> = Arc<dyn Fn(T) + Send + Sync>;

/// Writes a value through a cell that may refuse it.
pub type TrySetter<T> = Arc<dyn Fn(T) -> Result<()> + Send + Sync>;

/// Create a signal and return its accessor and setter.
pub fn create_signal<T>(initial: T, options: SignalOptions<T>) -> (Accessor<T>, Setter<T>)
where
    T: Clone + Send + Sync + 'static,
{
    let signal = Signal::with_options(initial, options);
    let reader = signal.clone();
    (
        Arc::new(move || reader.get()),
        Arc::new(move |value| signal.set(value)),
    )
}

/// Create an effect that receives its previous return value.
///
/// The first run receives `initial`. Call `dispose` on the returned effect to
/// stop it.
pub fn create_effect<T, F>(f: F, initial: Option<T>) -> Effect
where
    T: Send + 'static,
    F: Fn(Option<T>) -> T + Send + Sync + 'static,
{
    let previous = Mutex::new(initial);
    Effect::new(move || {
        let last = previous.lock().take();
        let next = f(last);
        *previous.lock() = Some(next);
    })
}

/// Create a memoized accessor.
///
/// `f` runs eagerly inside an effect and feeds an internal signal, so the
/// accessor only notifies its readers when the result actually changes.
///
/// The backing effect lives as long as the enclosing [`Root`]. Created
/// outside any root, it stays subscribed for the life of its sources.
pub fn create_memo<T, F>(f: F) -> Accessor<T>
where
    T: Clone + Send + Sync + PartialEq + 'static,
    F: Fn(Option<T>) -> T + Send + Sync + 'static,
{
    let f = Arc::new(f);
    let slot: Arc<OnceLock<Signal<T>>> = Arc::new(OnceLock::new());
    let (feed, compute) = (Arc::clone(&slot), Arc::clone(&f));

    create_effect(
        move |previous: Option<T>| {
            let value = compute(previous);
            match feed.get() {
                Some(signal) => signal.set(value.clone()),
                None => {
                    let _ = feed.set(Signal::new(value.clone()));
                }
            }
            value
        },
        None,
    );

    Arc::new(move || match slot.get() {
        Some(signal) => signal.get(),
        None => f(None),
    })
}

/// Run `f` under a new [`Root`] and return its result.
///
/// Every effect created while `f` runs, memo effects included, is owned by
/// the root and stops when [`Root::dispose`] is called.
pub fn create_root<R>(f: impl FnOnce(Root) -> R) -> R {
    let root = Root::new();
    root.run(|| f(root.clone()))
}

/// Run `f` with writes deferred, then apply them and run affected effects once.
pub fn batch<R>(f: impl FnOnce(&BatchScope) -> R) -> R {
    Runtime::batch(f)
}

/// Run `f` without registering its reads as dependencies.
pub fn untrack<R>(f: impl FnOnce() -> R) -> R {
    Runtime::untrack(f)
}

/// Create a read-only computed cell.
pub fn computed<T, F>(getter: F) -> Computed<T>
where
    T: Clone + Send + Sync + PartialEq + 'static,
    F: Fn() -> T + Send + Sync + 'static,
{
    Computed::new(getter)
}

/// A computed cell that reads and writes a signal.
pub fn signal_to_computed<T>(signal: &Signal<T>) -> Computed<T>
where
    T: Clone + Send + Sync + PartialEq + 'static,
{
    let (reader, writer) = (signal.clone(), signal.clone());
    Computed::with_setter(
        move || reader.get(),
        move |value| {
            writer.set(value);
            Ok(())
        },
    )
}

/// Accessor and setter over a computed cell.
///
/// The setter returns the cell's error when it has no setter of its own.
pub fn computed_to_signal<T>(computed: &Computed<T>) -> (Accessor<T>, TrySetter<T>)
where
    T: Clone + Send + Sync + PartialEq + 'static,
{
    let (reader, writer) = (computed.clone(), computed.clone());
    (
        Arc::new(move || reader.get()),
        Arc::new(move |value| writer.set(value)),
    )
}
