//! Dynamic value type.

use crate::error::{ValueError, ValueResult};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use regex::Regex;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// A shared, mutable graph node.
///
/// Compound values are reference-counted so that value graphs can contain
/// cycles and so that several handles can observe in-place mutation. The
/// lock is never held across recursive descent; traversals snapshot the
/// child handles first.
pub type Node<T> = Arc<RwLock<T>>;

/// A dynamic value.
///
/// This is the closed set of value kinds the persistence layer manages.
/// Entity state, primary keys, and stored records are all `Value` graphs.
///
/// The derived [`Clone`] is a *handle* copy: compound variants share their
/// underlying node. Use [`crate::deep_clone`] for a structurally
/// independent copy and [`crate::deep_equals`] for structural comparison.
#[derive(Clone)]
pub enum Value {
    /// Null value.
    Null,
    /// Boolean value.
    Bool(bool),
    /// Signed integer (full i64 range).
    Integer(i64),
    /// Floating point number.
    Float(f64),
    /// Text string (UTF-8).
    Text(String),
    /// Point in time, compared by instant.
    Date(DateTime<Utc>),
    /// Compiled regular expression, compared by source pattern.
    Pattern(Regex),
    /// Binary buffer. Deep clones copy into new backing storage.
    Bytes(Arc<Vec<u8>>),
    /// Opaque, immutable payload. Shared by reference, compared by identity.
    Opaque(Arc<dyn Any + Send + Sync>),
    /// Ordered sequence of values.
    Array(Node<Vec<Value>>),
    /// Membership collection, insertion-ordered.
    Set(Node<Vec<Value>>),
    /// Associative map with arbitrary keys, insertion-ordered.
    Map(Node<Vec<(Value, Value)>>),
    /// Plain structured record with named fields.
    Record(Node<Vec<(String, Value)>>),
}

impl Value {
    /// Creates an array value from items.
    #[must_use]
    pub fn array(items: Vec<Value>) -> Self {
        Value::Array(Arc::new(RwLock::new(items)))
    }

    /// Creates a set value from members.
    ///
    /// Membership semantics are enforced by [`crate::deep_equals`], not by
    /// the constructor; callers are expected to pass distinct members.
    #[must_use]
    pub fn set(members: Vec<Value>) -> Self {
        Value::Set(Arc::new(RwLock::new(members)))
    }

    /// Creates a map value from key/value pairs.
    #[must_use]
    pub fn map(pairs: Vec<(Value, Value)>) -> Self {
        Value::Map(Arc::new(RwLock::new(pairs)))
    }

    /// Creates a record value from named fields.
    #[must_use]
    pub fn record(fields: Vec<(String, Value)>) -> Self {
        Value::Record(Arc::new(RwLock::new(fields)))
    }

    /// Creates a binary buffer value.
    #[must_use]
    pub fn bytes(data: Vec<u8>) -> Self {
        Value::Bytes(Arc::new(data))
    }

    /// Creates an opaque value from an immutable payload.
    #[must_use]
    pub fn opaque(payload: Arc<dyn Any + Send + Sync>) -> Self {
        Value::Opaque(payload)
    }

    /// Returns a short name for this value's kind.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Integer(_) => "integer",
            Value::Float(_) => "float",
            Value::Text(_) => "text",
            Value::Date(_) => "date",
            Value::Pattern(_) => "pattern",
            Value::Bytes(_) => "bytes",
            Value::Opaque(_) => "opaque",
            Value::Array(_) => "array",
            Value::Set(_) => "set",
            Value::Map(_) => "map",
            Value::Record(_) => "record",
        }
    }

    /// Check if this value is null.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Get this value as a boolean, if it is one.
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Get this value as an integer, if it is one.
    #[must_use]
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(n) => Some(*n),
            _ => None,
        }
    }

    /// Get this value as a float, if it is one.
    #[must_use]
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Get this value as a string, if it is a text string.
    #[must_use]
    pub fn as_text(&self) -> Option<String> {
        match self {
            Value::Text(s) => Some(s.clone()),
            _ => None,
        }
    }

    /// Returns the identity token of this value's graph node, if it has one.
    ///
    /// Two handles with the same token observe the same underlying node.
    /// Primitive kinds have no node and return `None`.
    #[must_use]
    pub fn node_ptr(&self) -> Option<usize> {
        match self {
            Value::Array(n) | Value::Set(n) => Some(Arc::as_ptr(n) as usize),
            Value::Map(n) => Some(Arc::as_ptr(n) as usize),
            Value::Record(n) => Some(Arc::as_ptr(n) as usize),
            _ => None,
        }
    }

    /// Checks whether two handles share the same graph node.
    #[must_use]
    pub fn is_same_node(&self, other: &Value) -> bool {
        match (self.node_ptr(), other.node_ptr()) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }

    /// Looks up a field of a record value.
    ///
    /// Returns `None` for missing fields and for non-record values.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<Value> {
        match self {
            Value::Record(node) => node
                .read()
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, v)| v.clone()),
            _ => None,
        }
    }

    /// Sets a field of a record value, replacing any existing value.
    pub fn set_field(&self, name: &str, value: Value) -> ValueResult<()> {
        match self {
            Value::Record(node) => {
                let mut fields = node.write();
                if let Some(entry) = fields.iter_mut().find(|(n, _)| n == name) {
                    entry.1 = value;
                } else {
                    fields.push((name.to_string(), value));
                }
                Ok(())
            }
            other => Err(ValueError::not_a_record(other.kind())),
        }
    }

    /// Removes a field of a record value. Missing fields are ignored.
    pub fn remove_field(&self, name: &str) -> ValueResult<()> {
        match self {
            Value::Record(node) => {
                node.write().retain(|(n, _)| n != name);
                Ok(())
            }
            other => Err(ValueError::not_a_record(other.kind())),
        }
    }

    /// Returns a snapshot of a record's fields (field values are handles).
    pub fn record_fields(&self) -> ValueResult<Vec<(String, Value)>> {
        match self {
            Value::Record(node) => Ok(node.read().clone()),
            other => Err(ValueError::not_a_record(other.kind())),
        }
    }

    /// Replaces all fields of a record value.
    pub fn set_record_fields(&self, fields: Vec<(String, Value)>) -> ValueResult<()> {
        match self {
            Value::Record(node) => {
                *node.write() = fields;
                Ok(())
            }
            other => Err(ValueError::not_a_record(other.kind())),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "Null"),
            Value::Bool(b) => write!(f, "Bool({b})"),
            Value::Integer(n) => write!(f, "Integer({n})"),
            Value::Float(x) => write!(f, "Float({x})"),
            Value::Text(s) => write!(f, "Text({s:?})"),
            Value::Date(d) => write!(f, "Date({d})"),
            Value::Pattern(p) => write!(f, "Pattern({:?})", p.as_str()),
            Value::Bytes(b) => write!(f, "Bytes({} bytes)", b.len()),
            Value::Opaque(o) => write!(f, "Opaque({:p})", Arc::as_ptr(o)),
            Value::Array(n) => write!(f, "Array({} items @{:#x})", n.read().len(), Arc::as_ptr(n) as usize),
            Value::Set(n) => write!(f, "Set({} members @{:#x})", n.read().len(), Arc::as_ptr(n) as usize),
            Value::Map(n) => write!(f, "Map({} pairs @{:#x})", n.read().len(), Arc::as_ptr(n) as usize),
            Value::Record(n) => {
                write!(f, "Record({{")?;
                for (i, (name, _)) in n.read().iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{name}")?;
                }
                write!(f, "}})")
            }
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Integer(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Integer(i64::from(n))
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(d: DateTime<Utc>) -> Self {
        Value::Date(d)
    }
}

impl From<()> for Value {
    fn from((): ()) -> Self {
        Value::Null
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handle_clone_shares_node() {
        let record = Value::record(vec![("a".into(), Value::Integer(1))]);
        let alias = record.clone();

        alias.set_field("a", Value::Integer(2)).unwrap();
        assert_eq!(record.field("a").unwrap().as_integer(), Some(2));
        assert!(record.is_same_node(&alias));
    }

    #[test]
    fn set_field_appends_and_replaces() {
        let record = Value::record(vec![]);
        record.set_field("x", Value::Integer(1)).unwrap();
        record.set_field("y", Value::Integer(2)).unwrap();
        record.set_field("x", Value::Integer(3)).unwrap();

        let fields = record.record_fields().unwrap();
        assert_eq!(fields.len(), 2);
        assert_eq!(record.field("x").unwrap().as_integer(), Some(3));
    }

    #[test]
    fn remove_field_deletes() {
        let record = Value::record(vec![("gone".into(), Value::Null)]);
        record.remove_field("gone").unwrap();
        assert!(record.field("gone").is_none());
    }

    #[test]
    fn record_ops_reject_non_records() {
        let value = Value::Integer(7);
        assert!(value.set_field("a", Value::Null).is_err());
        assert!(value.record_fields().is_err());
    }

    #[test]
    fn node_ptr_identity() {
        let a = Value::array(vec![]);
        let b = Value::array(vec![]);
        assert_ne!(a.node_ptr(), b.node_ptr());
        assert_eq!(a.node_ptr(), a.clone().node_ptr());
        assert!(Value::Integer(1).node_ptr().is_none());
    }

    #[test]
    fn kind_names() {
        assert_eq!(Value::Null.kind(), "null");
        assert_eq!(Value::bytes(vec![1]).kind(), "bytes");
        assert_eq!(Value::record(vec![]).kind(), "record");
    }
}
