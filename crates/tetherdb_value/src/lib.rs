//! # TetherDB Value
//!
//! Dynamic value model for TetherDB.
//!
//! This crate provides:
//! - [`Value`], a closed enumeration of the value kinds the persistence
//!   layer can manage, with shared graph nodes that may form cycles
//! - [`deep_clone`], a cycle-preserving structural copy
//! - [`deep_equals`], cycle-safe structural equality
//! - Primary-key serialization, ordering, and [`KeyPath`] resolution
//!
//! ## Shared graph nodes
//!
//! Compound values (arrays, sets, maps, records) are reference-counted
//! nodes: the derived `Clone` copies the *handle*, so two handles observe
//! the same mutations. Structural copying is exclusively [`deep_clone`].
//!
//! ```
//! use tetherdb_value::{deep_clone, deep_equals, Value};
//!
//! let record = Value::record(vec![("name".into(), Value::from("alice"))]);
//! let snapshot = deep_clone(&record);
//! assert!(deep_equals(&record, &snapshot));
//!
//! record.set_field("name", Value::from("bob")).unwrap();
//! assert!(!deep_equals(&record, &snapshot));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod clone;
mod equals;
mod error;
mod key;
mod value;

pub use clone::deep_clone;
pub use equals::deep_equals;
pub use error::{ValueError, ValueResult};
pub use key::{compare_keys, serialize_key, KeyPath};
pub use value::{Node, Value};

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashSet;

    /// Strategy for acyclic value graphs over the clonable kinds.
    ///
    /// Floats are derived from integers so NaN never appears (NaN is
    /// deliberately unequal to itself and would falsify the roundtrip
    /// property), and record/map keys are unique.
    fn value_strategy() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(Value::Integer),
            any::<i32>().prop_map(|n| Value::Float(f64::from(n) / 8.0)),
            prop::string::string_regex("[a-z0-9 ]{0,12}")
                .expect("invalid regex")
                .prop_map(Value::Text),
            prop::collection::vec(any::<u8>(), 0..16).prop_map(Value::bytes),
        ];
        leaf.prop_recursive(3, 48, 6, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(Value::array),
                prop::collection::vec(inner.clone(), 0..4).prop_map(Value::set),
                prop::collection::btree_map(
                    prop::string::string_regex("[a-z]{1,6}").expect("invalid regex"),
                    inner.clone(),
                    0..4
                )
                .prop_map(|entries| {
                    Value::map(
                        entries
                            .into_iter()
                            .map(|(k, v)| (Value::Text(k), v))
                            .collect(),
                    )
                }),
                prop::collection::btree_map(
                    prop::string::string_regex("[a-z]{1,6}").expect("invalid regex"),
                    inner,
                    0..4
                )
                .prop_map(|fields| Value::record(fields.into_iter().collect())),
            ]
        })
    }

    /// Collects the identity tokens of every graph node in a value.
    fn collect_nodes(value: &Value, seen: &mut HashSet<usize>) {
        let Some(id) = value.node_ptr() else {
            return;
        };
        if !seen.insert(id) {
            return;
        }
        match value {
            Value::Array(node) | Value::Set(node) => {
                for item in node.read().iter() {
                    collect_nodes(item, seen);
                }
            }
            Value::Map(node) => {
                for (key, item) in node.read().iter() {
                    collect_nodes(key, seen);
                    collect_nodes(item, seen);
                }
            }
            Value::Record(node) => {
                for (_, item) in node.read().iter() {
                    collect_nodes(item, seen);
                }
            }
            _ => {}
        }
    }

    proptest! {
        #[test]
        fn clone_roundtrips_through_equality(value in value_strategy()) {
            let cloned = deep_clone(&value);
            prop_assert!(deep_equals(&value, &cloned));
            prop_assert!(deep_equals(&cloned, &value));
        }

        #[test]
        fn clone_shares_no_graph_node(value in value_strategy()) {
            let cloned = deep_clone(&value);

            let mut source_nodes = HashSet::new();
            let mut cloned_nodes = HashSet::new();
            collect_nodes(&value, &mut source_nodes);
            collect_nodes(&cloned, &mut cloned_nodes);

            prop_assert!(source_nodes.is_disjoint(&cloned_nodes));
        }

        #[test]
        fn equality_is_reflexive(value in value_strategy()) {
            prop_assert!(deep_equals(&value, &value));
        }
    }
}
