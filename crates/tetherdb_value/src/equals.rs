//! Cycle-safe structural equality.

use crate::value::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Structurally compares two value graphs, independent of node identity.
///
/// Comparison rules:
/// - primitives compare by value and exact kind (no numeric coercion);
///   floats use the primitive `==`, so NaN is unequal to itself
/// - dates compare by instant, patterns by source, byte buffers by
///   content, opaque payloads by identity only
/// - arrays compare positionally; records by matched field names; maps
///   and sets by membership (enumeration order never matters, and each
///   member of the right-hand side is consumed at most once)
///
/// Cycle safety: a traversal-scoped map pairs each visited node of `a`'s
/// graph with its partner in `b`'s graph before descending. When a
/// recorded node is encountered again, equality is decided by whether the
/// recorded pairing matches, instead of descending again. This terminates
/// cyclic structures and rejects graphs whose sharing topology differs.
#[must_use]
pub fn deep_equals(a: &Value, b: &Value) -> bool {
    let mut paired = HashMap::new();
    equals_value(a, b, &mut paired)
}

fn equals_value(a: &Value, b: &Value, paired: &mut HashMap<usize, usize>) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Integer(x), Value::Integer(y)) => x == y,
        (Value::Float(x), Value::Float(y)) => x == y,
        (Value::Text(x), Value::Text(y)) => x == y,
        (Value::Date(x), Value::Date(y)) => x == y,
        (Value::Pattern(x), Value::Pattern(y)) => x.as_str() == y.as_str(),
        (Value::Bytes(x), Value::Bytes(y)) => x == y,
        (Value::Opaque(x), Value::Opaque(y)) => {
            std::ptr::eq(Arc::as_ptr(x).cast::<()>(), Arc::as_ptr(y).cast::<()>())
        }
        (Value::Array(_), Value::Array(_)) => visit_pair(a, b, paired, |a, b, paired| {
            let (Value::Array(x), Value::Array(y)) = (a, b) else {
                return false;
            };
            let xs = x.read().clone();
            let ys = y.read().clone();
            xs.len() == ys.len()
                && xs
                    .iter()
                    .zip(ys.iter())
                    .all(|(av, bv)| equals_value(av, bv, paired))
        }),
        (Value::Record(_), Value::Record(_)) => visit_pair(a, b, paired, |a, b, paired| {
            let (Value::Record(x), Value::Record(y)) = (a, b) else {
                return false;
            };
            let xs = x.read().clone();
            let ys = y.read().clone();
            if xs.len() != ys.len() {
                return false;
            }
            for (name, av) in &xs {
                match ys.iter().find(|(n, _)| n == name) {
                    Some((_, bv)) => {
                        if !equals_value(av, bv, paired) {
                            return false;
                        }
                    }
                    None => return false,
                }
            }
            true
        }),
        (Value::Set(_), Value::Set(_)) => visit_pair(a, b, paired, |a, b, _| {
            let (Value::Set(x), Value::Set(y)) = (a, b) else {
                return false;
            };
            let xs = x.read().clone();
            let ys = y.read().clone();
            match_members(&xs, &ys, |av, bv| deep_equals(av, bv))
        }),
        (Value::Map(_), Value::Map(_)) => visit_pair(a, b, paired, |a, b, paired| {
            let (Value::Map(x), Value::Map(y)) = (a, b) else {
                return false;
            };
            let xs = x.read().clone();
            let ys = y.read().clone();
            if xs.len() != ys.len() {
                return false;
            }
            // Keys are matched as independent graphs (fresh pairing scope)
            // so a failed candidate match cannot pollute the outer map;
            // paired values recurse through the shared scope.
            let mut used = vec![false; ys.len()];
            for (ak, av) in &xs {
                let mut matched = false;
                for (i, (bk, bv)) in ys.iter().enumerate() {
                    if used[i] || !deep_equals(ak, bk) {
                        continue;
                    }
                    used[i] = true;
                    if !equals_value(av, bv, paired) {
                        return false;
                    }
                    matched = true;
                    break;
                }
                if !matched {
                    return false;
                }
            }
            true
        }),
        _ => false,
    }
}

/// Applies cycle bookkeeping for one node pair, then descends.
fn visit_pair<F>(a: &Value, b: &Value, paired: &mut HashMap<usize, usize>, descend: F) -> bool
where
    F: FnOnce(&Value, &Value, &mut HashMap<usize, usize>) -> bool,
{
    let (Some(aid), Some(bid)) = (a.node_ptr(), b.node_ptr()) else {
        return false;
    };
    if aid == bid {
        return true;
    }
    if let Some(&partner) = paired.get(&aid) {
        return partner == bid;
    }
    paired.insert(aid, bid);
    descend(a, b, paired)
}

/// Injective membership matching: every member of `xs` must claim a
/// distinct, structurally equal member of `ys`.
fn match_members<F>(xs: &[Value], ys: &[Value], eq: F) -> bool
where
    F: Fn(&Value, &Value) -> bool,
{
    if xs.len() != ys.len() {
        return false;
    }
    let mut used = vec![false; ys.len()];
    for av in xs {
        let mut matched = false;
        for (i, bv) in ys.iter().enumerate() {
            if used[i] || !eq(av, bv) {
                continue;
            }
            used[i] = true;
            matched = true;
            break;
        }
        if !matched {
            return false;
        }
    }
    true
}
