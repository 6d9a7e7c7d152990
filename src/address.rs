//! Addresses - paths into the model/state/diff/binding/signal trees.
//!
//! An [`Address`] is an ordered sequence of [`Key`]s (object fields and
//! array indices) from a tree root to a node. All five trees the framework
//! maintains share this address space, so "the thing at `$.panes[2]`" means
//! the same location in each of them.
//!
//! Two tree accessors live here:
//! - [`get`] - lenient read; absent or non-indexable mid-path yields `None`
//! - [`set`] / [`set_mut`] - persistent and copy-on-write writes; writing
//!   through a non-indexable value is an [`Error::AddressFault`]

use std::fmt;

use crate::error::{Error, Result};
use crate::value::{Value, ValueKind};

/// One step of an address: an object field or an array index.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Key {
    Field(String),
    Index(usize),
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Field(name) => write!(f, ".{name}"),
            Key::Index(i) => write!(f, "[{i}]"),
        }
    }
}

impl From<&str> for Key {
    fn from(name: &str) -> Self {
        Key::Field(name.to_string())
    }
}

impl From<String> for Key {
    fn from(name: String) -> Self {
        Key::Field(name)
    }
}

impl From<usize> for Key {
    fn from(i: usize) -> Self {
        Key::Index(i)
    }
}

/// Path from a tree root to a node. Equality is element-wise.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Address(Vec<Key>);

impl Address {
    /// The empty address - the tree root itself.
    pub fn root() -> Self {
        Address(Vec::new())
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn keys(&self) -> &[Key] {
        &self.0
    }

    /// Extend with an object field step.
    pub fn field(mut self, name: impl Into<String>) -> Self {
        self.0.push(Key::Field(name.into()));
        self
    }

    /// Extend with an array index step.
    pub fn index(mut self, i: usize) -> Self {
        self.0.push(Key::Index(i));
        self
    }

    /// Extend with an arbitrary key step.
    pub fn child(mut self, key: Key) -> Self {
        self.0.push(key);
        self
    }

    /// Everything but the last step; `None` at the root.
    pub fn parent(&self) -> Option<Address> {
        if self.0.is_empty() {
            None
        } else {
            Some(Address(self.0[..self.0.len() - 1].to_vec()))
        }
    }

    /// Concatenate two addresses.
    pub fn join(&self, other: &Address) -> Address {
        let mut keys = self.0.clone();
        keys.extend(other.0.iter().cloned());
        Address(keys)
    }

    /// True when `prefix` is a leading run of this address.
    pub fn starts_with(&self, prefix: &Address) -> bool {
        self.0.len() >= prefix.0.len() && self.0[..prefix.0.len()] == prefix.0[..]
    }

    /// Longest shared leading run of two addresses.
    pub fn common_prefix(&self, other: &Address) -> Address {
        let shared = self
            .0
            .iter()
            .zip(other.0.iter())
            .take_while(|(a, b)| a == b)
            .count();
        Address(self.0[..shared].to_vec())
    }

    /// The address relative to `prefix`; `None` when not under it.
    pub fn strip_prefix(&self, prefix: &Address) -> Option<Address> {
        if self.starts_with(prefix) {
            Some(Address(self.0[prefix.0.len()..].to_vec()))
        } else {
            None
        }
    }
}

impl From<Vec<Key>> for Address {
    fn from(keys: Vec<Key>) -> Self {
        Address(keys)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "$")?;
        for key in &self.0 {
            write!(f, "{key}")?;
        }
        Ok(())
    }
}

// =============================================================================
// Tree access
// =============================================================================

/// Read the value at `address`, or `None` if any step lands on a missing
/// key/index or a non-indexable value. The empty address returns the root.
pub fn get<'a>(root: &'a Value, address: &Address) -> Option<&'a Value> {
    let mut current = root;
    for key in address.keys() {
        current = match key {
            Key::Field(name) => current.get(name)?,
            Key::Index(i) => current.at(*i)?,
        };
    }
    Some(current)
}

/// Persistent write: returns a new root with `value` at `address`.
///
/// Nodes on the path are fresh copies; every node off the path keeps
/// pointer identity with the previous root, which is what lets the diff
/// engine recognize untouched subtrees by identity. Missing intermediate
/// object fields are created; a missing array slot is allowed only
/// one-past-the-end (append). The empty address replaces the whole tree.
pub fn set(root: &Value, address: &Address, value: Value) -> Result<Value> {
    set_inner(root, address.keys(), value, address, 0)
}

fn set_inner(
    current: &Value,
    keys: &[Key],
    value: Value,
    full: &Address,
    depth: usize,
) -> Result<Value> {
    let Some((key, rest)) = keys.split_first() else {
        return Ok(value);
    };
    let here = || Address(full.0[..depth].to_vec());

    match (key, current.kind()) {
        (Key::Field(name), ValueKind::Object(map)) => {
            let child = map.get(name).cloned().unwrap_or_else(Value::null);
            let updated = set_inner(&child, rest, value, full, depth + 1)?;
            let mut map = map.clone();
            map.insert(name.clone(), updated);
            Ok(Value::object(map))
        }
        (Key::Field(name), ValueKind::Null) => {
            let updated = set_inner(&Value::null(), rest, value, full, depth + 1)?;
            Ok(Value::from_pairs([(name.clone(), updated)]))
        }
        (Key::Index(i), ValueKind::Array(items)) => {
            if *i > items.len() {
                return Err(Error::address(here(), "array (index past end)"));
            }
            let child = items.get(*i).cloned().unwrap_or_else(Value::null);
            let updated = set_inner(&child, rest, value, full, depth + 1)?;
            let mut items = items.clone();
            if *i == items.len() {
                items.push(updated);
            } else {
                items[*i] = updated;
            }
            Ok(Value::array(items))
        }
        _ => Err(Error::address(here(), current.kind_name())),
    }
}

/// Copy-on-write in-place write. Uniquely-owned nodes on the path are
/// mutated directly and retain identity; shared nodes are cloned first so
/// aliased trees are never disturbed. Same fault rules as [`set`].
pub fn set_mut(root: &mut Value, address: &Address, value: Value) -> Result<()> {
    set_mut_inner(root, address.keys(), value, address, 0)
}

fn set_mut_inner(
    current: &mut Value,
    keys: &[Key],
    value: Value,
    full: &Address,
    depth: usize,
) -> Result<()> {
    let Some((key, rest)) = keys.split_first() else {
        *current = value;
        return Ok(());
    };
    let here = || Address(full.0[..depth].to_vec());

    match key {
        Key::Field(name) => {
            if current.is_null() {
                *current = Value::object(Default::default());
            }
            if !current.is_object() {
                return Err(Error::address(here(), current.kind_name()));
            }
            let ValueKind::Object(map) = current.make_mut() else {
                return Err(Error::address(here(), "non-object"));
            };
            let child = map.entry(name.clone()).or_insert_with(Value::null);
            set_mut_inner(child, rest, value, full, depth + 1)
        }
        Key::Index(i) => {
            if !current.is_array() {
                return Err(Error::address(here(), current.kind_name()));
            }
            let ValueKind::Array(items) = current.make_mut() else {
                return Err(Error::address(here(), "non-array"));
            };
            if *i > items.len() {
                return Err(Error::address(here(), "array (index past end)"));
            }
            if *i == items.len() {
                items.push(Value::null());
            }
            set_mut_inner(&mut items[*i], rest, value, full, depth + 1)
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> Value {
        serde_json::json!({"a": {"b": [10, 20]}, "c": "side"}).into()
    }

    #[test]
    fn test_get() {
        let root = state();
        let addr = Address::root().field("a").field("b").index(1);
        assert_eq!(get(&root, &addr).and_then(Value::as_int), Some(20));
        assert_eq!(get(&root, &Address::root()).unwrap().kind_name(), "object");

        // Absent key and non-indexable mid-path both read as None.
        assert!(get(&root, &Address::root().field("missing")).is_none());
        assert!(get(&root, &Address::root().field("c").index(0)).is_none());
    }

    #[test]
    fn test_set_structural_sharing() {
        let root = state();
        let addr = Address::root().field("a").field("b").index(0);
        let next = set(&root, &addr, Value::from(99)).unwrap();

        assert_eq!(get(&next, &addr).and_then(Value::as_int), Some(99));
        // Off-path nodes keep identity; on-path nodes are fresh.
        assert!(next.get("c").unwrap().same(root.get("c").unwrap()));
        assert!(!next.get("a").unwrap().same(root.get("a").unwrap()));
        assert!(next
            .get("a")
            .and_then(|a| a.get("b"))
            .and_then(|b| b.at(1))
            .unwrap()
            .same(root.get("a").and_then(|a| a.get("b")).and_then(|b| b.at(1)).unwrap()));
        // Original untouched.
        assert_eq!(get(&root, &addr).and_then(Value::as_int), Some(10));
    }

    #[test]
    fn test_set_empty_address_replaces_root() {
        let root = state();
        let next = set(&root, &Address::root(), Value::from(7)).unwrap();
        assert_eq!(next.as_int(), Some(7));
    }

    #[test]
    fn test_set_creates_missing_object_keys() {
        let root: Value = serde_json::json!({}).into();
        let addr = Address::root().field("x").field("y");
        let next = set(&root, &addr, Value::from(1)).unwrap();
        assert_eq!(get(&next, &addr).and_then(Value::as_int), Some(1));
    }

    #[test]
    fn test_set_array_append_and_fault() {
        let root: Value = serde_json::json!({"a": [1]}).into();
        let append = Address::root().field("a").index(1);
        let next = set(&root, &append, Value::from(2)).unwrap();
        assert_eq!(next.get("a").unwrap().as_array().unwrap().len(), 2);

        let gap = Address::root().field("a").index(5);
        assert!(matches!(
            set(&root, &gap, Value::from(0)),
            Err(Error::AddressFault { .. })
        ));
    }

    #[test]
    fn test_set_through_scalar_faults() {
        let root = state();
        let addr = Address::root().field("c").field("inner");
        let err = set(&root, &addr, Value::null()).unwrap_err();
        match err {
            Error::AddressFault { address, found } => {
                assert_eq!(address, Address::root().field("c"));
                assert_eq!(found, "string");
            }
            other => panic!("expected AddressFault, got {other}"),
        }
    }

    #[test]
    fn test_set_mut_copy_on_write() {
        let mut root = state();
        let alias = root.clone();
        let addr = Address::root().field("a").field("b").index(0);
        set_mut(&mut root, &addr, Value::from(42)).unwrap();

        assert_eq!(get(&root, &addr).and_then(Value::as_int), Some(42));
        // The alias saw nothing.
        assert_eq!(get(&alias, &addr).and_then(Value::as_int), Some(10));
    }

    #[test]
    fn test_address_prefix_ops() {
        let a = Address::root().field("a").index(1).field("x");
        let b = Address::root().field("a").index(1).field("y");
        assert_eq!(a.common_prefix(&b), Address::root().field("a").index(1));
        assert!(a.starts_with(&a.common_prefix(&b)));
        assert_eq!(
            a.strip_prefix(&Address::root().field("a")),
            Some(Address::root().index(1).field("x"))
        );
        assert_eq!(a.strip_prefix(&b), None);
        assert_eq!(a.to_string(), "$.a[1].x");
    }
}
