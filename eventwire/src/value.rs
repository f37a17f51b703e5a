//! Runtime value model for event payloads.
//!
//! Payload bodies are dynamically shaped: the peer may send any mix of
//! scalars, arrays, objects and the built-in container kinds, and the type
//! algebra in [`crate::rule`] decides at runtime whether a value matches a
//! declared shape. [`Value`] is the closed union those checks range over.
//!
//! `Undefined` is a first-class member: positional wire encoding omits a
//! trailing run of absent fields, and optionality of a payload field is
//! expressed as a rule that accepts `Undefined`.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Shared absent value, returned by reference from lookups that miss.
pub(crate) static UNDEFINED: Value = Value::Undefined;

/// A dynamically typed payload value.
///
/// Objects preserve insertion order (payload fields are projected to and
/// from positional arrays by declared key order) while comparing equal
/// regardless of key order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// Explicit null.
    Null,
    /// Absent value.
    Undefined,
    /// Boolean.
    Bool(bool),
    /// Double-precision number; NaN and the infinities are representable.
    Num(f64),
    /// Arbitrary-precision-style integer kind, distinct from `Num`.
    BigInt(i64),
    /// UTF-8 string.
    Str(String),
    /// Ordered sequence.
    Array(Vec<Value>),
    /// Keyed record with insertion-ordered keys.
    Object(IndexMap<String, Value>),
    /// Byte-array container.
    Bytes(Vec<u8>),
    /// Raw-buffer container.
    Buffer(Vec<u8>),
    /// Keyed container with non-string keys allowed.
    Map(Vec<(Value, Value)>),
    /// Membership container.
    Set(Vec<Value>),
}

impl Value {
    /// Build an object value from `(key, value)` pairs.
    pub fn object<K, I>(entries: I) -> Value
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        Value::Object(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v))
                .collect::<IndexMap<_, _>>(),
        )
    }

    /// Build an array value.
    pub fn array<I: IntoIterator<Item = Value>>(items: I) -> Value {
        Value::Array(items.into_iter().collect())
    }

    /// Whether this value is `Undefined`.
    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    /// Object member lookup. Returns `Undefined` for missing keys and for
    /// non-object values, mirroring dynamic member access.
    pub fn get(&self, key: &str) -> &Value {
        match self {
            Value::Object(map) => map.get(key).unwrap_or(&UNDEFINED),
            _ => &UNDEFINED,
        }
    }

    /// Borrow the string content, if this is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Numeric content, if this is a number.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Num(n) => Some(*n),
            _ => None,
        }
    }

    /// Boolean content, if this is a boolean.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// SameValueZero-style equivalence: like `==`, except `NaN` matches
    /// `NaN`. Used for enum-set membership, where a shape that lists `NaN`
    /// as an allowed value must accept it.
    pub fn same_value_zero(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Num(a), Value::Num(b)) => a == b || (a.is_nan() && b.is_nan()),
            (Value::Array(a), Value::Array(b)) | (Value::Set(a), Value::Set(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.same_value_zero(y))
            }
            (Value::Map(a), Value::Map(b)) => {
                a.len() == b.len()
                    && a.iter()
                        .zip(b)
                        .all(|((ak, av), (bk, bv))| ak.same_value_zero(bk) && av.same_value_zero(bv))
            }
            (Value::Object(a), Value::Object(b)) => {
                a.len() == b.len()
                    && a.iter()
                        .all(|(k, v)| b.get(k).is_some_and(|w| v.same_value_zero(w)))
            }
            _ => self == other,
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::Undefined
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Num(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Num(v as f64)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Num(f64::from(v))
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}
