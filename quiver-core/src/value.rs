//! Dynamic Values
//!
//! Stores observe plain object graphs. Since Rust has no runtime property
//! interception, those graphs are modelled explicitly: a [`Value`] is a
//! scalar or a handle to a shared [`Object`], and an object is either a map
//! (string keys, insertion ordered) or a list (index keys).
//!
//! Objects have identity. Two `Value::Object`s are equal only when they point
//! at the same object, mirroring reference semantics; use [`Value::deep_eq`]
//! for structural comparison.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;
use serde::ser::{Serialize, SerializeMap, SerializeSeq, Serializer};

use crate::error::{ReactiveError, Result};

/// A dynamically typed value held by an [`Object`].
#[derive(Clone, Debug, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Object(Object),
}

impl Value {
    /// Check whether the value is `Null`.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        self.as_f64()
            .filter(|n| n.fract() == 0.0)
            .map(|n| n as i64)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&Object> {
        match self {
            Self::Object(o) => Some(o),
            _ => None,
        }
    }

    /// Structural comparison: objects are compared by content, recursively.
    pub fn deep_eq(&self, other: &Self) -> bool {
        self.to_json() == other.to_json()
    }

    /// Convert into a JSON tree (a deep copy).
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    /// Build a value from a JSON tree. Every JSON object or array becomes a
    /// fresh [`Object`].
    pub fn from_json(json: &serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(*b),
            serde_json::Value::Number(n) => Self::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Self::String(s.clone()),
            serde_json::Value::Array(items) => {
                Self::Object(Object::from_values(items.iter().map(Self::from_json)))
            }
            serde_json::Value::Object(fields) => Self::Object(Object::from_entries(
                fields.iter().map(|(k, v)| (k.clone(), Self::from_json(v))),
            )),
        }
    }
}

/// Same-value equality: numbers compare numerically (with `NaN` equal to
/// itself), objects compare by identity.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Number(a), Self::Number(b)) => a == b || (a.is_nan() && b.is_nan()),
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Object(a), Self::Object(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Self::Null => serializer.serialize_unit(),
            Self::Bool(b) => serializer.serialize_bool(*b),
            Self::Number(n) if n.fract() == 0.0 && n.abs() < i64::MAX as f64 => {
                serializer.serialize_i64(*n as i64)
            }
            Self::Number(n) => serializer.serialize_f64(*n),
            Self::String(s) => serializer.serialize_str(s),
            Self::Object(o) => o.serialize(serializer),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Self::Number(f64::from(n))
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Self::Number(n as f64)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<Object> for Value {
    fn from(o: Object) -> Self {
        Self::Object(o)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        Self::from_json(&json)
    }
}

#[derive(Debug)]
enum Entries {
    Map(IndexMap<String, Value>),
    List(Vec<Value>),
}

fn parse_index(key: &str) -> Option<usize> {
    key.parse::<usize>().ok()
}

/// How far past its end a list may be written (and padded with `Null`).
pub const MAX_LIST_PADDING: usize = 1 << 16;

/// Parse `key` as an index `list` can be written at.
fn writable_index(list: &[Value], key: &str) -> Option<usize> {
    let index = parse_index(key)?;
    let limit = list.len().checked_add(MAX_LIST_PADDING)?;
    (index <= limit).then_some(index)
}

/// A shared, mutable map or list with reference identity.
///
/// Cloning an `Object` clones the handle, not the content.
#[derive(Clone)]
pub struct Object {
    entries: Arc<RwLock<Entries>>,
}

impl Object {
    fn with(entries: Entries) -> Self {
        Self {
            entries: Arc::new(RwLock::new(entries)),
        }
    }

    /// Create an empty map object.
    pub fn map() -> Self {
        Self::with(Entries::Map(IndexMap::new()))
    }

    /// Create an empty list object.
    pub fn list() -> Self {
        Self::with(Entries::List(Vec::new()))
    }

    /// Create a map object from key/value pairs.
    pub fn from_entries<K, V, I>(entries: I) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
        I: IntoIterator<Item = (K, V)>,
    {
        Self::with(Entries::Map(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        ))
    }

    /// Create a list object from values.
    pub fn from_values<V, I>(values: I) -> Self
    where
        V: Into<Value>,
        I: IntoIterator<Item = V>,
    {
        Self::with(Entries::List(values.into_iter().map(Into::into).collect()))
    }

    /// Address-based identity, stable for the lifetime of the object.
    pub fn id(&self) -> usize {
        Arc::as_ptr(&self.entries) as *const () as usize
    }

    /// Check whether two handles point at the same object.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.entries, &other.entries)
    }

    pub fn is_list(&self) -> bool {
        matches!(*self.entries.read(), Entries::List(_))
    }

    pub fn len(&self) -> usize {
        match &*self.entries.read() {
            Entries::Map(map) => map.len(),
            Entries::List(list) => list.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read the value at `key`. List objects accept decimal indices.
    pub fn get(&self, key: &str) -> Option<Value> {
        match &*self.entries.read() {
            Entries::Map(map) => map.get(key).cloned(),
            Entries::List(list) => parse_index(key).and_then(|i| list.get(i).cloned()),
        }
    }

    pub fn contains_key(&self, key: &str) -> bool {
        match &*self.entries.read() {
            Entries::Map(map) => map.contains_key(key),
            Entries::List(list) => parse_index(key).is_some_and(|i| i < list.len()),
        }
    }

    /// Check whether `key` can be written: any key for maps, indices no more
    /// than [`MAX_LIST_PADDING`] past the end for lists.
    pub fn accepts_key(&self, key: &str) -> bool {
        match &*self.entries.read() {
            Entries::Map(_) => true,
            Entries::List(list) => writable_index(list, key).is_some(),
        }
    }

    /// Write `value` at `key`, returning the previous value.
    ///
    /// Writing past the end of a list pads it with `Null`. Writing a
    /// non-index key into a list, or an index more than
    /// [`MAX_LIST_PADDING`] past its end, is rejected.
    pub fn set(&self, key: &str, value: impl Into<Value>) -> Result<Option<Value>> {
        let value = value.into();
        match &mut *self.entries.write() {
            Entries::Map(map) => Ok(map.insert(key.to_owned(), value)),
            Entries::List(list) => {
                let index = writable_index(list, key).ok_or_else(|| {
                    ReactiveError::precondition(format!(
                        "\"{key}\" is not a list index in range"
                    ))
                })?;
                if index >= list.len() {
                    list.resize(index, Value::Null);
                    list.push(value);
                    Ok(None)
                } else {
                    Ok(Some(std::mem::replace(&mut list[index], value)))
                }
            }
        }
    }

    /// Remove `key`. Removing a list slot leaves `Null` in its place so that
    /// the other indices keep their meaning.
    pub fn remove(&self, key: &str) -> Option<Value> {
        match &mut *self.entries.write() {
            Entries::Map(map) => map.shift_remove(key),
            Entries::List(list) => parse_index(key)
                .and_then(|i| list.get_mut(i))
                .map(std::mem::take),
        }
    }

    /// Append to a list object. Returns the new index, or `None` for maps.
    pub fn push(&self, value: impl Into<Value>) -> Option<usize> {
        match &mut *self.entries.write() {
            Entries::Map(_) => None,
            Entries::List(list) => {
                list.push(value.into());
                Some(list.len() - 1)
            }
        }
    }

    /// Keys in order: insertion order for maps, ascending indices for lists.
    pub fn keys(&self) -> Vec<String> {
        match &*self.entries.read() {
            Entries::Map(map) => map.keys().cloned().collect(),
            Entries::List(list) => (0..list.len()).map(|i| i.to_string()).collect(),
        }
    }

    /// Shallow copy into a new object with its own identity.
    pub fn snapshot(&self) -> Self {
        match &*self.entries.read() {
            Entries::Map(map) => Self::with(Entries::Map(map.clone())),
            Entries::List(list) => Self::with(Entries::List(list.clone())),
        }
    }

    /// Deep copy into a JSON tree.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

impl PartialEq for Object {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Serialize for Object {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match &*self.entries.read() {
            Entries::Map(map) => {
                let mut out = serializer.serialize_map(Some(map.len()))?;
                for (k, v) in map {
                    out.serialize_entry(k, v)?;
                }
                out.end()
            }
            Entries::List(list) => {
                let mut out = serializer.serialize_seq(Some(list.len()))?;
                for v in list {
                    out.serialize_element(v)?;
                }
                out.end()
            }
        }
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &*self.entries.read() {
            Entries::Map(map) => f.debug_map().entries(map.iter()).finish(),
            Entries::List(list) => f.debug_list().entries(list.iter()).finish(),
        }
    }
}
