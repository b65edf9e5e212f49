//! Primary key serialization, ordering, and key paths.

use crate::error::{ValueError, ValueResult};
use crate::value::Value;
use std::cmp::Ordering;
use std::fmt;

/// Derives the canonical serialized form of a primary key.
///
/// The encoding is injective over the supported key kinds (integer,
/// float, text, date, and flat tuples thereof) and stable under repeated
/// derivation: each part carries a kind tag, text is length-prefixed,
/// floats serialize by bit pattern (negative zero normalized), and tuple
/// parts are length-delimited. NaN floats and every non-key kind fail
/// with [`ValueError::UnsupportedKeyType`].
pub fn serialize_key(key: &Value) -> ValueResult<String> {
    serialize_part(key, false)
}

fn serialize_part(key: &Value, in_tuple: bool) -> ValueResult<String> {
    match key {
        Value::Integer(n) => Ok(format!("i:{n}")),
        Value::Float(f) if f.is_nan() => Err(ValueError::unsupported_key("float (NaN)")),
        Value::Float(f) => {
            let normalized = if *f == 0.0 { 0.0 } else { *f };
            Ok(format!("f:{:016x}", normalized.to_bits()))
        }
        Value::Text(s) => Ok(format!("s:{}:{}", s.len(), s)),
        Value::Date(d) => Ok(format!("d:{}", d.timestamp_millis())),
        Value::Array(node) if !in_tuple => {
            let parts = node.read().clone();
            let mut out = format!("t:{}:", parts.len());
            for part in &parts {
                let encoded = serialize_part(part, true)?;
                out.push_str(&format!("{}:{};", encoded.len(), encoded));
            }
            Ok(out)
        }
        Value::Array(_) => Err(ValueError::unsupported_key("nested tuple")),
        other => Err(ValueError::unsupported_key(other.kind())),
    }
}

/// Totally orders two key values.
///
/// Numbers (integers and floats) share one rank and compare numerically;
/// dates, text, and tuples follow, in that order. Tuples compare
/// element-wise, shorter first on a common prefix. Non-key kinds and NaN
/// fail with [`ValueError::UnsupportedKeyType`].
pub fn compare_keys(a: &Value, b: &Value) -> ValueResult<Ordering> {
    let ra = key_rank(a)?;
    let rb = key_rank(b)?;
    if ra != rb {
        return Ok(ra.cmp(&rb));
    }
    match (a, b) {
        (Value::Integer(x), Value::Integer(y)) => Ok(x.cmp(y)),
        (Value::Float(x), Value::Float(y)) => numeric_cmp(*x, *y),
        (Value::Integer(x), Value::Float(y)) => numeric_cmp(*x as f64, *y),
        (Value::Float(x), Value::Integer(y)) => numeric_cmp(*x, *y as f64),
        (Value::Date(x), Value::Date(y)) => Ok(x.cmp(y)),
        (Value::Text(x), Value::Text(y)) => Ok(x.cmp(y)),
        (Value::Array(x), Value::Array(y)) => {
            let xs = x.read().clone();
            let ys = y.read().clone();
            for (xv, yv) in xs.iter().zip(ys.iter()) {
                match compare_keys(xv, yv)? {
                    Ordering::Equal => {}
                    ord => return Ok(ord),
                }
            }
            Ok(xs.len().cmp(&ys.len()))
        }
        _ => Ok(Ordering::Equal), // equal ranks imply one of the arms above
    }
}

fn key_rank(key: &Value) -> ValueResult<u8> {
    match key {
        Value::Float(f) if f.is_nan() => Err(ValueError::unsupported_key("float (NaN)")),
        Value::Integer(_) | Value::Float(_) => Ok(0),
        Value::Date(_) => Ok(1),
        Value::Text(_) => Ok(2),
        Value::Array(_) => Ok(3),
        other => Err(ValueError::unsupported_key(other.kind())),
    }
}

fn numeric_cmp(x: f64, y: f64) -> ValueResult<Ordering> {
    x.partial_cmp(&y)
        .ok_or_else(|| ValueError::unsupported_key("float (NaN)"))
}

/// One or more dotted field-access paths used to extract and assign an
/// entity's primary key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyPath {
    /// A single dotted path resolving to a scalar key.
    Single(String),
    /// An ordered tuple of dotted paths resolving to a compound key.
    Compound(Vec<String>),
}

impl KeyPath {
    /// Resolves the primary key of a record.
    ///
    /// Returns `Ok(None)` when any path segment is missing, which is how
    /// a record that has not yet been assigned a generated key presents.
    pub fn extract(&self, record: &Value) -> ValueResult<Option<Value>> {
        match self {
            KeyPath::Single(path) => extract_path(record, path),
            KeyPath::Compound(paths) => {
                let mut parts = Vec::with_capacity(paths.len());
                for path in paths {
                    match extract_path(record, path)? {
                        Some(part) => parts.push(part),
                        None => return Ok(None),
                    }
                }
                Ok(Some(Value::array(parts)))
            }
        }
    }

    /// Assigns a primary key into a record through the dotted path(s),
    /// creating intermediate records as needed.
    ///
    /// Compound key paths expect a tuple key of matching arity.
    pub fn assign(&self, record: &Value, key: &Value) -> ValueResult<()> {
        match self {
            KeyPath::Single(path) => assign_path(record, path, key.clone()),
            KeyPath::Compound(paths) => {
                let parts = match key {
                    Value::Array(node) => node.read().clone(),
                    other => return Err(ValueError::unsupported_key(other.kind())),
                };
                if parts.len() != paths.len() {
                    return Err(ValueError::KeyArityMismatch {
                        paths: paths.len(),
                        parts: parts.len(),
                    });
                }
                for (path, part) in paths.iter().zip(parts) {
                    assign_path(record, path, part)?;
                }
                Ok(())
            }
        }
    }
}

impl fmt::Display for KeyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyPath::Single(path) => write!(f, "{path}"),
            KeyPath::Compound(paths) => write!(f, "[{}]", paths.join(", ")),
        }
    }
}

fn extract_path(record: &Value, path: &str) -> ValueResult<Option<Value>> {
    let mut current = record.clone();
    for segment in path.split('.') {
        match current.field(segment) {
            Some(next) => current = next,
            None => return Ok(None),
        }
    }
    Ok(Some(current))
}

fn assign_path(record: &Value, path: &str, key: Value) -> ValueResult<()> {
    let segments: Vec<&str> = path.split('.').collect();
    let mut current = record.clone();
    for segment in &segments[..segments.len() - 1] {
        match current.field(segment) {
            Some(next @ Value::Record(_)) => current = next,
            Some(_) => {
                return Err(ValueError::invalid_key_path(path, *segment));
            }
            None => {
                let created = Value::record(vec![]);
                current.set_field(segment, created.clone())?;
                current = created;
            }
        }
    }
    let last = segments
        .last()
        .ok_or_else(|| ValueError::invalid_key_path(path, ""))?;
    current.set_field(last, key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use chrono::Utc;

    #[test]
    fn serialized_keys_are_tagged_by_kind() {
        assert_eq!(serialize_key(&Value::Integer(42)).unwrap(), "i:42");
        assert_eq!(
            serialize_key(&Value::Text("foo".into())).unwrap(),
            "s:3:foo"
        );

        let date = Utc.timestamp_millis_opt(1_000).unwrap();
        assert_eq!(serialize_key(&Value::Date(date)).unwrap(), "d:1000");
    }

    #[test]
    fn serialized_keys_are_injective_across_kinds() {
        let one_int = serialize_key(&Value::Integer(1)).unwrap();
        let one_float = serialize_key(&Value::Float(1.0)).unwrap();
        let one_text = serialize_key(&Value::Text("1".into())).unwrap();
        assert_ne!(one_int, one_float);
        assert_ne!(one_int, one_text);
        assert_ne!(one_float, one_text);
    }

    #[test]
    fn tuple_keys_do_not_collide_with_concatenation() {
        let ab_c = serialize_key(&Value::array(vec![
            Value::Text("ab".into()),
            Value::Text("c".into()),
        ]))
        .unwrap();
        let a_bc = serialize_key(&Value::array(vec![
            Value::Text("a".into()),
            Value::Text("bc".into()),
        ]))
        .unwrap();
        assert_ne!(ab_c, a_bc);
    }

    #[test]
    fn serialization_is_stable() {
        let key = Value::array(vec![Value::Integer(7), Value::Text("x".into())]);
        assert_eq!(serialize_key(&key).unwrap(), serialize_key(&key).unwrap());
    }

    #[test]
    fn negative_zero_normalizes() {
        assert_eq!(
            serialize_key(&Value::Float(0.0)).unwrap(),
            serialize_key(&Value::Float(-0.0)).unwrap()
        );
    }

    #[test]
    fn unsupported_key_kinds_fail() {
        assert!(serialize_key(&Value::Null).is_err());
        assert!(serialize_key(&Value::Bool(true)).is_err());
        assert!(serialize_key(&Value::Float(f64::NAN)).is_err());
        assert!(serialize_key(&Value::record(vec![])).is_err());
        assert!(serialize_key(&Value::array(vec![Value::array(vec![])])).is_err());
    }

    #[test]
    fn numbers_compare_numerically_across_kinds() {
        assert_eq!(
            compare_keys(&Value::Integer(2), &Value::Float(2.5)).unwrap(),
            Ordering::Less
        );
        assert_eq!(
            compare_keys(&Value::Float(2.0), &Value::Integer(2)).unwrap(),
            Ordering::Equal
        );
    }

    #[test]
    fn kind_ranks_order_mixed_keys() {
        let number = Value::Integer(99);
        let date = Value::Date(Utc.timestamp_millis_opt(0).unwrap());
        let text = Value::Text("a".into());
        assert_eq!(compare_keys(&number, &date).unwrap(), Ordering::Less);
        assert_eq!(compare_keys(&date, &text).unwrap(), Ordering::Less);
    }

    #[test]
    fn tuples_compare_elementwise() {
        let a = Value::array(vec![Value::Integer(1), Value::Integer(2)]);
        let b = Value::array(vec![Value::Integer(1), Value::Integer(3)]);
        let prefix = Value::array(vec![Value::Integer(1)]);
        assert_eq!(compare_keys(&a, &b).unwrap(), Ordering::Less);
        assert_eq!(compare_keys(&prefix, &a).unwrap(), Ordering::Less);
    }

    #[test]
    fn extract_single_path() {
        let record = Value::record(vec![("id".into(), Value::Integer(5))]);
        let key = KeyPath::Single("id".into()).extract(&record).unwrap();
        assert_eq!(key.unwrap().as_integer(), Some(5));
    }

    #[test]
    fn extract_dotted_path() {
        let record = Value::record(vec![(
            "meta".into(),
            Value::record(vec![("id".into(), Value::Integer(9))]),
        )]);
        let key = KeyPath::Single("meta.id".into()).extract(&record).unwrap();
        assert_eq!(key.unwrap().as_integer(), Some(9));
    }

    #[test]
    fn extract_missing_segment_is_none() {
        let record = Value::record(vec![]);
        assert!(KeyPath::Single("id".into())
            .extract(&record)
            .unwrap()
            .is_none());
        assert!(KeyPath::Compound(vec!["a".into(), "b".into()])
            .extract(&record)
            .unwrap()
            .is_none());
    }

    #[test]
    fn compound_extracts_tuple() {
        let record = Value::record(vec![
            ("region".into(), Value::Text("eu".into())),
            ("seq".into(), Value::Integer(3)),
        ]);
        let key = KeyPath::Compound(vec!["region".into(), "seq".into()])
            .extract(&record)
            .unwrap()
            .unwrap();
        assert_eq!(serialize_key(&key).unwrap(), "t:2:6:s:2:eu;3:i:3;");
    }

    #[test]
    fn assign_creates_intermediate_records() {
        let record = Value::record(vec![]);
        KeyPath::Single("meta.id".into())
            .assign(&record, &Value::Integer(1))
            .unwrap();
        let meta = record.field("meta").unwrap();
        assert_eq!(meta.field("id").unwrap().as_integer(), Some(1));
    }

    #[test]
    fn assign_through_non_record_fails() {
        let record = Value::record(vec![("meta".into(), Value::Integer(0))]);
        let result = KeyPath::Single("meta.id".into()).assign(&record, &Value::Integer(1));
        assert!(matches!(result, Err(ValueError::InvalidKeyPath { .. })));
    }

    #[test]
    fn compound_assign_checks_arity() {
        let record = Value::record(vec![]);
        let path = KeyPath::Compound(vec!["a".into(), "b".into()]);
        let result = path.assign(&record, &Value::array(vec![Value::Integer(1)]));
        assert!(matches!(result, Err(ValueError::KeyArityMismatch { .. })));

        path.assign(
            &record,
            &Value::array(vec![Value::Integer(1), Value::Integer(2)]),
        )
        .unwrap();
        assert_eq!(record.field("b").unwrap().as_integer(), Some(2));
    }
}
