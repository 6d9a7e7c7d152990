//! Shared value tree - the state representation.
//!
//! A [`Value`] is a cheap handle (`Rc`) over an immutable node. Cloning a
//! value shares the node, and the persistent setter in [`crate::address`]
//! copies only the nodes on the written path, so everything off the path
//! keeps pointer identity across state transitions. The diff engine's
//! UPDATE/unchanged classification is exactly that pointer identity,
//! exposed here as [`Value::same`].
//!
//! Objects are insertion-ordered (`IndexMap`) so that diffing, rendering,
//! and signal merging iterate members deterministically.
//!
//! `null` and "key not present" mean the same thing everywhere in the
//! framework: the component instance at that address does not exist.

use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;
use serde::de::{Deserialize, Deserializer};
use serde::ser::{Serialize, SerializeMap, SerializeSeq, Serializer};

/// Insertion-ordered object map used at every object-shaped tree level.
pub type ObjectMap = IndexMap<String, Value>;

/// A node in the state tree. Cheap to clone (bumps a refcount).
#[derive(Clone)]
pub struct Value(Rc<ValueKind>);

/// The closed set of value shapes.
#[derive(Clone, Debug, PartialEq)]
pub enum ValueKind {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Array(Vec<Value>),
    Object(ObjectMap),
}

impl Value {
    pub fn null() -> Self {
        Value(Rc::new(ValueKind::Null))
    }

    pub fn object(map: ObjectMap) -> Self {
        Value(Rc::new(ValueKind::Object(map)))
    }

    pub fn array(items: Vec<Value>) -> Self {
        Value(Rc::new(ValueKind::Array(items)))
    }

    /// Build an object value from key/value pairs, preserving order.
    pub fn from_pairs<K, I>(pairs: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        Value::object(pairs.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn kind(&self) -> &ValueKind {
        &self.0
    }

    /// Shape name for error messages.
    pub fn kind_name(&self) -> &'static str {
        match *self.0 {
            ValueKind::Null => "null",
            ValueKind::Bool(_) => "bool",
            ValueKind::Int(_) => "int",
            ValueKind::Float(_) => "float",
            ValueKind::Str(_) => "string",
            ValueKind::Array(_) => "array",
            ValueKind::Object(_) => "object",
        }
    }

    /// Pointer identity - true when both handles share one node.
    ///
    /// This is the "reference equality" the diff engine classifies with:
    /// a member that kept its node across a transition is unchanged, a
    /// member whose node was replaced is an update even if the contents
    /// are structurally equal.
    pub fn same(&self, other: &Value) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub fn is_null(&self) -> bool {
        matches!(*self.0, ValueKind::Null)
    }

    pub fn is_object(&self) -> bool {
        matches!(*self.0, ValueKind::Object(_))
    }

    pub fn is_array(&self) -> bool {
        matches!(*self.0, ValueKind::Array(_))
    }

    pub fn as_object(&self) -> Option<&ObjectMap> {
        match &*self.0 {
            ValueKind::Object(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&Vec<Value>> {
        match &*self.0 {
            ValueKind::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match *self.0 {
            ValueKind::Int(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match *self.0 {
            ValueKind::Bool(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match &*self.0 {
            ValueKind::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Object field lookup; `None` for non-objects or missing keys.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_object().and_then(|map| map.get(key))
    }

    /// Array element lookup; `None` for non-arrays or out-of-range indices.
    pub fn at(&self, index: usize) -> Option<&Value> {
        self.as_array().and_then(|items| items.get(index))
    }

    /// Mutable access to the underlying node, cloning it first if shared.
    ///
    /// This is what makes the in-place tree setter copy-on-write: writes
    /// through an aliased node never disturb the other holders.
    pub(crate) fn make_mut(&mut self) -> &mut ValueKind {
        Rc::make_mut(&mut self.0)
    }
}

/// Structural equality (contents, not identity). Tests rely on this;
/// the diff engine never does.
impl PartialEq for Value {
    fn eq(&self, other: &Value) -> bool {
        Rc::ptr_eq(&self.0, &other.0) || *self.0 == *other.0
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value(Rc::new(ValueKind::Bool(v)))
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value(Rc::new(ValueKind::Int(v)))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value(Rc::new(ValueKind::Float(v)))
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value(Rc::new(ValueKind::Str(v.to_string())))
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value(Rc::new(ValueKind::Str(v)))
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::array(items)
    }
}

// =============================================================================
// Serde bridge
// =============================================================================

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Value::null(),
            serde_json::Value::Bool(b) => b.into(),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    i.into()
                } else {
                    n.as_f64().unwrap_or(f64::NAN).into()
                }
            }
            serde_json::Value::String(s) => s.into(),
            serde_json::Value::Array(items) => {
                Value::array(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => {
                Value::object(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

impl From<&Value> for serde_json::Value {
    fn from(v: &Value) -> Self {
        match v.kind() {
            ValueKind::Null => serde_json::Value::Null,
            ValueKind::Bool(b) => serde_json::Value::Bool(*b),
            ValueKind::Int(n) => serde_json::Value::from(*n),
            ValueKind::Float(n) => serde_json::Value::from(*n),
            ValueKind::Str(s) => serde_json::Value::String(s.clone()),
            ValueKind::Array(items) => {
                serde_json::Value::Array(items.iter().map(serde_json::Value::from).collect())
            }
            ValueKind::Object(map) => serde_json::Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), serde_json::Value::from(v)))
                    .collect(),
            ),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.kind() {
            ValueKind::Null => serializer.serialize_unit(),
            ValueKind::Bool(b) => serializer.serialize_bool(*b),
            ValueKind::Int(n) => serializer.serialize_i64(*n),
            ValueKind::Float(n) => serializer.serialize_f64(*n),
            ValueKind::Str(s) => serializer.serialize_str(s),
            ValueKind::Array(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            ValueKind::Object(map) => {
                let mut out = serializer.serialize_map(Some(map.len()))?;
                for (k, v) in map {
                    out.serialize_entry(k, v)?;
                }
                out.end()
            }
        }
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = serde_json::Value::deserialize(deserializer)?;
        Ok(raw.into())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let json: serde_json::Value = self.into();
        write!(f, "{json}")
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_is_pointer_identity() {
        let a: Value = serde_json::json!({"x": 10}).into();
        let b = a.clone();
        let c: Value = serde_json::json!({"x": 10}).into();

        assert!(a.same(&b));
        assert!(!a.same(&c));
        // Structurally equal regardless of identity.
        assert_eq!(a, c);
    }

    #[test]
    fn test_json_round_trip() {
        let json = serde_json::json!({
            "name": "root",
            "count": 3,
            "ratio": 0.5,
            "items": [1, null, "two"],
        });
        let value: Value = json.clone().into();
        let back: serde_json::Value = (&value).into();
        assert_eq!(json, back);
    }

    #[test]
    fn test_object_preserves_insertion_order() {
        let value = Value::from_pairs([("z", Value::from(1)), ("a", Value::from(2))]);
        let keys: Vec<&str> = value
            .as_object()
            .unwrap()
            .keys()
            .map(String::as_str)
            .collect();
        assert_eq!(keys, ["z", "a"]);
    }

    #[test]
    fn test_accessors() {
        let value: Value = serde_json::json!({"a": [10, 20]}).into();
        assert_eq!(value.get("a").and_then(|v| v.at(1)).and_then(Value::as_int), Some(20));
        assert_eq!(value.get("missing"), None);
        assert_eq!(value.at(0), None);
        assert_eq!(value.kind_name(), "object");
    }

    #[test]
    fn test_serde_deserialize() {
        let value: Value = serde_json::from_str(r#"{"a": 1, "b": [true, null]}"#).unwrap();
        assert_eq!(value.get("a").and_then(Value::as_int), Some(1));
        assert!(value.get("b").and_then(|v| v.at(1)).unwrap().is_null());
    }
}
