//! Cycle-preserving deep clone.

use crate::value::{Node, Value};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Produces a structurally independent copy of a value graph.
///
/// Cycles are preserved: every graph node is registered in a
/// traversal-scoped map *before* its children are visited, so a
/// self-reference or mutual cycle resolves to the already-created
/// (possibly still incomplete) clone instead of recursing forever.
///
/// The clone shares no mutable state with the input. The exceptions are
/// the declared immutable kinds: [`Value::Opaque`] payloads are shared by
/// reference and [`Value::Pattern`] shares its immutable compiled program.
/// Binary buffers are copied into new backing storage. Iteration order of
/// sequences, maps, sets, and record fields is preserved.
#[must_use]
pub fn deep_clone(value: &Value) -> Value {
    let mut traversed = HashMap::new();
    clone_value(value, &mut traversed)
}

fn clone_value(value: &Value, traversed: &mut HashMap<usize, Value>) -> Value {
    match value {
        Value::Null
        | Value::Bool(_)
        | Value::Integer(_)
        | Value::Float(_)
        | Value::Text(_)
        | Value::Date(_)
        | Value::Pattern(_) => value.clone(),
        Value::Bytes(data) => Value::Bytes(Arc::new(data.as_ref().clone())),
        Value::Opaque(payload) => Value::Opaque(Arc::clone(payload)),
        Value::Array(node) => {
            clone_node(node, traversed, Value::Array, |items, traversed| {
                items.iter().map(|v| clone_value(v, traversed)).collect()
            })
        }
        Value::Set(node) => clone_node(node, traversed, Value::Set, |members, traversed| {
            members.iter().map(|v| clone_value(v, traversed)).collect()
        }),
        Value::Map(node) => clone_node(node, traversed, Value::Map, |pairs, traversed| {
            // Keys run through the same traversal map as values, so a
            // cyclic key clones exactly once.
            pairs
                .iter()
                .map(|(k, v)| (clone_value(k, traversed), clone_value(v, traversed)))
                .collect()
        }),
        Value::Record(node) => clone_node(node, traversed, Value::Record, |fields, traversed| {
            fields
                .iter()
                .map(|(name, v)| (name.clone(), clone_value(v, traversed)))
                .collect()
        }),
    }
}

/// Clones one graph node, registering the clone before descending.
fn clone_node<T, F, C>(
    node: &Node<T>,
    traversed: &mut HashMap<usize, Value>,
    wrap: F,
    clone_contents: C,
) -> Value
where
    T: Default + Clone,
    F: Fn(Node<T>) -> Value,
    C: FnOnce(&T, &mut HashMap<usize, Value>) -> T,
{
    let id = Arc::as_ptr(node) as usize;
    if let Some(existing) = traversed.get(&id) {
        return existing.clone();
    }

    let target: Node<T> = Arc::new(RwLock::new(T::default()));
    traversed.insert(id, wrap(Arc::clone(&target)));

    // Snapshot the contents so no lock is held across recursion.
    let contents = node.read().clone();
    *target.write() = clone_contents(&contents, traversed);
    wrap(target)
}
