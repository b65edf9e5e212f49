//! Entity types and instances.

use std::fmt;
use tetherdb_value::{Value, ValueResult};

/// Static descriptor of an entity type.
///
/// The runtime type of an entity determines exactly one backing object
/// store; store names are never shared between types. Applications
/// declare descriptors as statics:
///
/// ```
/// use tetherdb_core::EntityType;
///
/// static TASK: EntityType = EntityType::new("Task", "tasks");
/// ```
#[derive(Debug)]
pub struct EntityType {
    /// Name of the type.
    pub name: &'static str,
    /// Name of the backing object store.
    pub store: &'static str,
}

impl EntityType {
    /// Creates an entity type descriptor.
    #[must_use]
    pub const fn new(name: &'static str, store: &'static str) -> Self {
        Self { name, store }
    }
}

/// A typed, key-identified in-memory record.
///
/// An `Entity` is a cheap handle: cloning it shares the underlying
/// record node, so every clone observes the same mutations. This is what
/// lets the persistence context hold the same live object the
/// application mutates, and overwrite it in place on abort. Instance
/// identity is record-node identity, not structural equality.
#[derive(Clone)]
pub struct Entity {
    ty: &'static EntityType,
    record: Value,
}

impl Entity {
    /// Creates an empty entity of the given type.
    #[must_use]
    pub fn new(ty: &'static EntityType) -> Self {
        Self {
            ty,
            record: Value::record(Vec::new()),
        }
    }

    /// Creates an entity with initial fields.
    #[must_use]
    pub fn with_fields(ty: &'static EntityType, fields: Vec<(String, Value)>) -> Self {
        Self {
            ty,
            record: Value::record(fields),
        }
    }

    /// Wraps an existing record value as an entity.
    ///
    /// # Errors
    ///
    /// Fails if `record` is not a record value.
    pub fn from_record(ty: &'static EntityType, record: Value) -> ValueResult<Self> {
        match record {
            Value::Record(_) => Ok(Self { ty, record }),
            other => Err(tetherdb_value::ValueError::not_a_record(other.kind())),
        }
    }

    /// Returns the entity's type descriptor.
    #[must_use]
    pub fn entity_type(&self) -> &'static EntityType {
        self.ty
    }

    /// Returns the entity's record value (a handle to the live state).
    #[must_use]
    pub fn record(&self) -> &Value {
        &self.record
    }

    /// Reads a field of the live state.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<Value> {
        self.record.field(field)
    }

    /// Writes a field of the live state.
    ///
    /// Never fails for entities built through this type's constructors.
    pub fn set(&self, field: &str, value: Value) -> ValueResult<()> {
        self.record.set_field(field, value)
    }

    /// Removes a field of the live state.
    pub fn unset(&self, field: &str) -> ValueResult<()> {
        self.record.remove_field(field)
    }

    /// Checks whether two handles refer to the same live instance.
    #[must_use]
    pub fn is_same_instance(&self, other: &Entity) -> bool {
        self.record.is_same_node(other.record())
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Entity({}, {:?})", self.ty.name, self.record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    static WIDGET: EntityType = EntityType::new("Widget", "widgets");

    #[test]
    fn clones_share_live_state() {
        let entity = Entity::new(&WIDGET);
        let alias = entity.clone();

        alias.set("size", Value::Integer(3)).unwrap();
        assert_eq!(entity.get("size").unwrap().as_integer(), Some(3));
        assert!(entity.is_same_instance(&alias));
    }

    #[test]
    fn distinct_entities_are_distinct_instances() {
        let a = Entity::new(&WIDGET);
        let b = Entity::new(&WIDGET);
        assert!(!a.is_same_instance(&b));
    }

    #[test]
    fn from_record_rejects_non_records() {
        let result = Entity::from_record(&WIDGET, Value::Integer(1));
        assert!(result.is_err());
    }

    #[test]
    fn with_fields_initializes_state() {
        let entity = Entity::with_fields(
            &WIDGET,
            vec![("color".to_string(), Value::from("red"))],
        );
        assert_eq!(entity.get("color").unwrap().as_text().as_deref(), Some("red"));
        assert_eq!(entity.entity_type().store, "widgets");
    }
}
