//! Store configuration.
//!
//! [`StoreConfig`] holds the plain flags and can be deserialized (for example
//! from a settings file); [`ObservableOptions`] adds the parts that are code:
//! the comparison function and mixin properties.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use super::observable::Store;
use crate::error::Result;
use crate::value::Value;

/// Flags controlling how a store tracks its target.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Wrap nested objects in child stores and re-broadcast their events.
    pub deep: bool,
    /// Register reads as dependencies of the running computation.
    pub watchable: bool,
    /// Start muted; the first `trigger` starts propagation.
    pub lazy: bool,
    /// Reject writes and deletes.
    pub readonly: bool,
    /// The store boxes a single `value` key (see `ref_value`).
    pub reference: bool,
}

impl StoreConfig {
    /// Deep and watchable: the configuration used by `reactive`.
    pub fn reactive() -> Self {
        Self {
            deep: true,
            watchable: true,
            ..Self::default()
        }
    }

    /// Configuration inherited by child stores.
    pub(crate) fn for_child(self) -> Self {
        Self {
            lazy: false,
            reference: false,
            ..self
        }
    }
}

/// Decides whether a write changes a key.
pub type Compare = Arc<dyn Fn(&Value, &Value) -> bool + Send + Sync>;

pub type MixinGetter = Arc<dyn Fn(&Store) -> Value + Send + Sync>;
pub type MixinSetter = Arc<dyn Fn(&Store, Value) -> Result<()> + Send + Sync>;

/// An extra property resolved before the target.
#[derive(Clone)]
pub struct MixinProperty {
    pub get: MixinGetter,
    /// Without a setter the property is read-only.
    pub set: Option<MixinSetter>,
}

impl fmt::Debug for MixinProperty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MixinProperty")
            .field("writable", &self.set.is_some())
            .finish()
    }
}

/// Extra properties layered over a store's target.
#[derive(Clone, Debug, Default)]
pub struct Mixin {
    properties: IndexMap<String, MixinProperty>,
}

impl Mixin {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a read-only property.
    pub fn getter<F>(mut self, name: impl Into<String>, get: F) -> Self
    where
        F: Fn(&Store) -> Value + Send + Sync + 'static,
    {
        self.properties.insert(
            name.into(),
            MixinProperty {
                get: Arc::new(get),
                set: None,
            },
        );
        self
    }

    /// Add a read-write property.
    pub fn property<G, S>(mut self, name: impl Into<String>, get: G, set: S) -> Self
    where
        G: Fn(&Store) -> Value + Send + Sync + 'static,
        S: Fn(&Store, Value) -> Result<()> + Send + Sync + 'static,
    {
        self.properties.insert(
            name.into(),
            MixinProperty {
                get: Arc::new(get),
                set: Some(Arc::new(set)),
            },
        );
        self
    }

    pub fn get(&self, name: &str) -> Option<&MixinProperty> {
        self.properties.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.properties.contains_key(name)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.properties.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }
}

/// Options for `observable`.
#[derive(Clone, Default)]
pub struct ObservableOptions {
    pub config: StoreConfig,
    /// Defaults to [`Value`] equality.
    pub compare: Option<Compare>,
    pub mixin: Mixin,
}

impl ObservableOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deep and watchable.
    pub fn reactive() -> Self {
        Self::from_config(StoreConfig::reactive())
    }

    pub fn from_config(config: StoreConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn deep(mut self, deep: bool) -> Self {
        self.config.deep = deep;
        self
    }

    pub fn watchable(mut self, watchable: bool) -> Self {
        self.config.watchable = watchable;
        self
    }

    pub fn lazy(mut self, lazy: bool) -> Self {
        self.config.lazy = lazy;
        self
    }

    pub fn readonly(mut self, readonly: bool) -> Self {
        self.config.readonly = readonly;
        self
    }

    pub(crate) fn reference(mut self, reference: bool) -> Self {
        self.config.reference = reference;
        self
    }

    pub fn compare<F>(mut self, compare: F) -> Self
    where
        F: Fn(&Value, &Value) -> bool + Send + Sync + 'static,
    {
        self.compare = Some(Arc::new(compare));
        self
    }

    pub fn mixin(mut self, mixin: Mixin) -> Self {
        self.mixin = mixin;
        self
    }

    pub(crate) fn equals(&self, current: &Value, next: &Value) -> bool {
        match &self.compare {
            Some(compare) => compare(current, next),
            None => current == next,
        }
    }

    /// Options for a store wrapping a nested object: same flags and compare,
    /// no mixin, never lazy, never a reference.
    pub(crate) fn for_child(&self) -> Self {
        Self {
            config: self.config.for_child(),
            compare: self.compare.clone(),
            mixin: Mixin::default(),
        }
    }
}

impl fmt::Debug for ObservableOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObservableOptions")
            .field("config", &self.config)
            .field("custom_compare", &self.compare.is_some())
            .field("mixin", &self.mixin)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults_are_all_off() {
        let config = StoreConfig::default();
        assert!(!config.deep && !config.watchable && !config.lazy);
        assert!(!config.readonly && !config.reference);
    }

    #[test]
    fn config_deserializes_with_missing_fields() {
        let config: StoreConfig =
            serde_json::from_str(r#"{ "deep": true, "readonly": true }"#).unwrap();
        assert_eq!(
            config,
            StoreConfig {
                deep: true,
                readonly: true,
                ..StoreConfig::default()
            }
        );
    }

    #[test]
    fn children_inherit_flags_but_not_lazy_or_mixin() {
        let options = ObservableOptions::reactive()
            .lazy(true)
            .readonly(true)
            .mixin(Mixin::new().getter("total", |_| Value::Null));
        let child = options.for_child();

        assert!(child.config.deep && child.config.watchable && child.config.readonly);
        assert!(!child.config.lazy);
        assert!(child.mixin.is_empty());
    }

    #[test]
    fn custom_compare_replaces_value_equality() {
        let options = ObservableOptions::new().compare(|_, _| false);
        assert!(!options.equals(&Value::from(1), &Value::from(1)));
        assert!(ObservableOptions::new().equals(&Value::from(1), &Value::from(1)));
    }
}
