use super::observable::Store;
use crate::value::Value;

/// Result of reading a store key.
#[derive(Clone, Debug, PartialEq)]
pub enum Field {
    Value(Value),
    /// A nested object, wrapped in its own store.
    Store(Store),
}

impl Field {
    /// Unwrap to a plain value; a child store yields its target object.
    pub fn into_value(self) -> Value {
        match self {
            Field::Value(value) => value,
            Field::Store(store) => Value::Object(store.raw()),
        }
    }

    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Field::Value(value) => Some(value),
            Field::Store(_) => None,
        }
    }

    pub fn as_store(&self) -> Option<&Store> {
        match self {
            Field::Store(store) => Some(store),
            Field::Value(_) => None,
        }
    }

    pub fn into_store(self) -> Option<Store> {
        match self {
            Field::Store(store) => Some(store),
            Field::Value(_) => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Field::Value(Value::Null))
    }

    pub fn as_f64(&self) -> Option<f64> {
        self.as_value().and_then(Value::as_f64)
    }

    pub fn as_i64(&self) -> Option<i64> {
        self.as_value().and_then(Value::as_i64)
    }

    pub fn as_bool(&self) -> Option<bool> {
        self.as_value().and_then(Value::as_bool)
    }

    pub fn as_str(&self) -> Option<&str> {
        self.as_value().and_then(Value::as_str)
    }
}

impl From<Field> for Value {
    fn from(field: Field) -> Self {
        field.into_value()
    }
}

impl PartialEq<Value> for Field {
    fn eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Field::Value(value), other) => value == other,
            (Field::Store(store), Value::Object(object)) => store.raw().ptr_eq(object),
            (Field::Store(_), _) => false,
        }
    }
}
