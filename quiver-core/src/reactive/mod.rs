//! Reactive Primitives
//!
//! This module implements the core reactive system: signals, computed cells,
//! effects and batch scopes. Stores (`crate::store`) are built on the same
//! primitives.
//!
//! # Concepts
//!
//! ## Signals
//!
//! A Signal is a container for mutable state. When a signal's value is read
//! within a tracked run (an effect or a computed cell), the signal registers
//! the running computation as a dependent. When the value changes, every
//! dependent is notified.
//!
//! ## Computed cells
//!
//! A Computed is a derived value that caches its result. A dependency change
//! only marks it dirty; it re-evaluates on the next read.
//!
//! ## Effects
//!
//! An Effect is a side-effecting computation that re-runs whenever its
//! dependencies change.
//!
//! ## Roots
//!
//! A [`Root`] owns the effects created inside [`Root::run`] and disposes
//! them together.
//!
//! ## Batches
//!
//! [`Runtime::batch`] defers writes and effect re-runs until the batch
//! returns, so an effect depending on several written cells runs once.
//!
//! # Implementation Notes
//!
//! Dependencies are discovered at run time: a thread-local context stack
//! records which computation is running, and every cell read while it runs
//! subscribes that computation. The set of dependencies is re-collected on
//! every run, so conditional reads are handled.

mod batch;
mod computed;
mod context;
mod effect;
mod root;
mod runtime;
mod signal;
mod subscriber;

pub use batch::{Apply, BatchScope};
pub use computed::{Computed, ComputedChange, ComputedState};
pub use context::ReactiveContext;
pub use effect::Effect;
pub use root::Root;
pub use runtime::Runtime;
pub use signal::{Equality, Signal, SignalOptions};
pub use subscriber::{Subscriber, SubscriberId, SubscriberKind, SubscriberSet};
