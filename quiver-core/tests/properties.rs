//! Property-based invariant tests for propagation and stores.
//!
//! 1. An effect runs once per actual value change, never for equal writes.
//! 2. A batch runs a dependent effect at most once, whatever it contains.
//! 3. A computed cell always agrees with its getter.
//! 4. A disposed effect never runs again.
//! 5. A store's raw target matches a plain map after any write sequence.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use proptest::prelude::*;

use quiver_core::store::reactive;
use quiver_core::{Computed, Effect, Object, Runtime, Signal, Value};

// ── Helpers ─────────────────────────────────────────────────────────────

fn counting_effect(signal: &Signal<i32>) -> (Effect, Arc<AtomicUsize>) {
    let runs = Arc::new(AtomicUsize::new(0));
    let (reader, count) = (signal.clone(), runs.clone());
    let effect = Effect::new(move || {
        reader.get();
        count.fetch_add(1, Ordering::SeqCst);
    });
    (effect, runs)
}

#[derive(Debug, Clone)]
enum StoreOp {
    Set(String, i32),
    Delete(String),
}

fn store_op_strategy() -> impl Strategy<Value = StoreOp> {
    let key = prop_oneof![Just("a"), Just("b"), Just("c"), Just("d")].prop_map(String::from);
    prop_oneof![
        (key.clone(), -5i32..5).prop_map(|(k, v)| StoreOp::Set(k, v)),
        key.prop_map(StoreOp::Delete),
    ]
}

// ═════════════════════════════════════════════════════════════════════════
// 1. Effects run once per change
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn effect_runs_once_per_value_change(writes in proptest::collection::vec(0i32..4, 0..32)) {
        let signal = Signal::new(0);
        let (_effect, runs) = counting_effect(&signal);

        let mut current = 0;
        let mut changes = 0;
        for value in writes {
            if value != current {
                changes += 1;
                current = value;
            }
            signal.set(value);
        }

        prop_assert_eq!(runs.load(Ordering::SeqCst), 1 + changes);
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 2. Batches dedupe effect runs
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn batch_runs_each_effect_at_most_once(writes in proptest::collection::vec(0i32..4, 0..32)) {
        let signal = Signal::new(0);
        let (_effect, runs) = counting_effect(&signal);

        Runtime::batch(|_| {
            for value in &writes {
                signal.set(*value);
            }
        });

        // Writes are compared against the value at call time, which stays 0
        // until the batch drains.
        let queued: Vec<i32> = writes.iter().copied().filter(|value| *value != 0).collect();
        let expected = if queued.is_empty() { 1 } else { 2 };
        prop_assert_eq!(runs.load(Ordering::SeqCst), expected);
        prop_assert_eq!(signal.get(), queued.last().copied().unwrap_or(0));
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 3. Computed cells agree with their getter
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn computed_sum_is_always_current(
        writes in proptest::collection::vec((any::<bool>(), -100i32..100), 0..32),
        batched in any::<bool>(),
    ) {
        let a = Signal::new(0);
        let b = Signal::new(0);
        let (ra, rb) = (a.clone(), b.clone());
        let sum = Computed::new(move || ra.get() + rb.get());

        for (first, value) in writes {
            let target = if first { &a } else { &b };
            if batched {
                Runtime::batch(|_| target.set(value));
            } else {
                target.set(value);
            }
            prop_assert_eq!(sum.get(), a.get_untracked() + b.get_untracked());
        }
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 4. Disposal is final
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn disposed_effect_stays_silent(
        before in proptest::collection::vec(0i32..4, 0..8),
        after in proptest::collection::vec(0i32..4, 0..32),
    ) {
        let signal = Signal::new(0);
        let (effect, runs) = counting_effect(&signal);

        for value in before {
            signal.set(value);
        }
        effect.dispose();
        let frozen = runs.load(Ordering::SeqCst);

        for value in after {
            signal.set(value);
        }
        prop_assert_eq!(runs.load(Ordering::SeqCst), frozen);
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 5. Store targets track a plain model
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn store_target_matches_model(ops in proptest::collection::vec(store_op_strategy(), 0..48)) {
        let target = Object::map();
        let store = reactive(target.clone());
        let mut model: BTreeMap<String, i32> = BTreeMap::new();

        for op in ops {
            match op {
                StoreOp::Set(key, value) => {
                    store.set(&key, value).unwrap();
                    model.insert(key, value);
                }
                StoreOp::Delete(key) => {
                    let existed = store.delete(&key).unwrap();
                    prop_assert_eq!(existed, model.remove(&key).is_some());
                }
            }
        }

        let expected = Value::from_json(&serde_json::to_value(&model).unwrap());
        prop_assert!(Value::Object(target).deep_eq(&expected));
    }
}
