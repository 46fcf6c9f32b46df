//! Quiver Core
//!
//! A fine-grained reactive state engine. It implements:
//!
//! - Reactive primitives (signals, computed cells, effects)
//! - Batched propagation with per-effect deduplication
//! - Deep observable stores over dynamic object trees
//! - Change emitters and callback-style watchers
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `reactive`: Core reactive primitives, dependency tracking and batching
//! - `store`: Observable stores, identity table, references
//! - `emitter`: Ordered listener lists used for change events
//! - `value`: The dynamic `Value` / `Object` tree stores operate on
//! - `watch`: Watchers over signals, computed cells and stores
//! - `api`: Function-style entry points (`create_signal`, `batch`, ...)
//!
//! # Example
//!
//! ```rust
//! use quiver_core::{Computed, Effect, Signal};
//!
//! // Create a signal
//! let count = Signal::new(0);
//!
//! // Create a derived value
//! let source = count.clone();
//! let doubled = Computed::new(move || source.get() * 2);
//!
//! // Create an effect
//! let (c, d) = (count.clone(), doubled.clone());
//! let _effect = Effect::new(move || {
//!     println!("Count: {}, Doubled: {}", c.get(), d.get());
//! });
//!
//! // Update the signal
//! count.set(5);
//! // Effect automatically runs, prints: "Count: 5, Doubled: 10"
//! ```

pub mod api;
pub mod emitter;
pub mod error;
pub mod reactive;
pub mod store;
pub mod value;
pub mod watch;

pub use api::{
    batch, computed, computed_to_signal, create_effect, create_memo, create_root, create_signal,
    signal_to_computed, untrack, Accessor, Setter, TrySetter,
};
pub use emitter::{ChangeEmitter, ListenerId, Unsubscribe};
pub use error::{ReactiveError, Result};
pub use reactive::{
    Apply, BatchScope, Computed, ComputedChange, Effect, Equality, Root, Runtime, Signal,
    SignalOptions,
};
pub use store::{
    clear_listeners, is_observable, is_ref, listen, observable, raw, reactive, ref_value,
    to_ref, to_refs, trigger_change, unref, ChangeEvent, Field, Mixin, ObservableOptions,
    Store, StoreConfig,
};
pub use value::{Object, Value};
pub use watch::{
    watch, watch_effect, watch_keys, watch_store, StoreWatchOptions, WatchHandle,
    WatchOptions, WatchSource,
};
