//! Identity table: target object -> live store.
//!
//! Observing the same object twice yields the same store, and a nested
//! object reached from several parents is wrapped once. Entries are weak, so
//! the table never keeps a store alive; a store removes its own entry when it
//! is dropped.

use std::sync::{OnceLock, Weak};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::debug;

use super::observable::{Store, StoreInner};
use crate::value::Object;

static REGISTRY: OnceLock<DashMap<usize, Weak<StoreInner>>> = OnceLock::new();

fn registry() -> &'static DashMap<usize, Weak<StoreInner>> {
    REGISTRY.get_or_init(DashMap::new)
}

/// Find the live store wrapping `target`, if any.
pub(crate) fn lookup(target: &Object) -> Option<Store> {
    registry()
        .get(&target.id())
        .and_then(|entry| entry.value().upgrade())
        .map(Store::from_inner)
}

/// Return the store wrapping `target`, creating it with `create` if needed.
/// The flag is `true` when the store was created by this call.
///
/// `create` runs under the table's shard lock and must not touch the table.
pub(crate) fn get_or_insert_with(
    target: &Object,
    create: impl FnOnce() -> Store,
) -> (Store, bool) {
    match registry().entry(target.id()) {
        Entry::Occupied(mut entry) => {
            if let Some(inner) = entry.get().upgrade() {
                return (Store::from_inner(inner), false);
            }
            let store = create();
            entry.insert(store.downgrade_inner());
            (store, true)
        }
        Entry::Vacant(entry) => {
            let store = create();
            entry.insert(store.downgrade_inner());
            (store, true)
        }
    }
}

/// Drop the entry for `key` if its store is gone.
pub(crate) fn release(key: usize) {
    if registry()
        .remove_if(&key, |_, store| store.strong_count() == 0)
        .is_some()
    {
        debug!(target_id = key, "store released");
    }
}
