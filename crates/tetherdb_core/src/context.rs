//! Persistence context: snapshot-vs-live tracking of managed entities.

use crate::entity::Entity;
use crate::error::CoreResult;
use std::collections::HashMap;
use tetherdb_value::{deep_clone, deep_equals, Value};

/// One managed entity: its last-known-persisted snapshot and the live
/// object the application mutates.
pub(crate) struct ContextEntry {
    /// Deep clone taken when the entity became managed or last synced.
    snapshot: Value,
    /// The live instance handed to the application.
    live: Entity,
    /// Merged foreign entities are dirty-by-default: written back on
    /// commit even when deep-equal to their snapshot.
    foreign: bool,
}

/// Registry mapping entity type name -> serialized primary key -> entry.
///
/// Exclusively owned by the pair (entity manager, its active
/// transaction); cleared whenever a transaction completes.
#[derive(Default)]
pub(crate) struct PersistenceContext {
    entries: HashMap<&'static str, HashMap<String, ContextEntry>>,
}

impl PersistenceContext {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Registers an entity, snapshotting its current live state.
    ///
    /// An existing entry under the same key is replaced.
    pub(crate) fn manage(&mut self, entity: Entity, serialized_key: String, foreign: bool) {
        let snapshot = deep_clone(entity.record());
        self.entries
            .entry(entity.entity_type().name)
            .or_default()
            .insert(
                serialized_key,
                ContextEntry {
                    snapshot,
                    live: entity,
                    foreign,
                },
            );
    }

    /// Returns the managed live instance for a key, if any.
    pub(crate) fn get_live(&self, type_name: &str, serialized_key: &str) -> Option<Entity> {
        self.entries
            .get(type_name)
            .and_then(|by_key| by_key.get(serialized_key))
            .map(|entry| entry.live.clone())
    }

    /// Flags the entry for a key as foreign (dirty-by-default).
    pub(crate) fn mark_foreign(&mut self, type_name: &str, serialized_key: &str) {
        if let Some(entry) = self
            .entries
            .get_mut(type_name)
            .and_then(|by_key| by_key.get_mut(serialized_key))
        {
            entry.foreign = true;
        }
    }

    /// Removes the entry for a key. Returns whether one existed.
    pub(crate) fn detach(&mut self, type_name: &str, serialized_key: &str) -> bool {
        self.entries
            .get_mut(type_name)
            .map_or(false, |by_key| by_key.remove(serialized_key).is_some())
    }

    /// Removes the entry holding exactly this live instance.
    pub(crate) fn detach_entity(&mut self, entity: &Entity) -> bool {
        let Some(by_key) = self.entries.get_mut(entity.entity_type().name) else {
            return false;
        };
        let Some(key) = by_key
            .iter()
            .find(|(_, entry)| entry.live.is_same_instance(entity))
            .map(|(key, _)| key.clone())
        else {
            return false;
        };
        by_key.remove(&key).is_some()
    }

    /// Whether this exact live instance is managed.
    pub(crate) fn contains_entity(&self, entity: &Entity) -> bool {
        self.entries
            .get(entity.entity_type().name)
            .map_or(false, |by_key| {
                by_key
                    .values()
                    .any(|entry| entry.live.is_same_instance(entity))
            })
    }

    /// Whether an entity with this key is managed.
    pub(crate) fn contains_key(&self, type_name: &str, serialized_key: &str) -> bool {
        self.entries
            .get(type_name)
            .map_or(false, |by_key| by_key.contains_key(serialized_key))
    }

    /// Live instances whose state must be written back on commit:
    /// modified since their snapshot, or flagged foreign.
    pub(crate) fn dirty_entities(&self) -> Vec<Entity> {
        self.entries
            .values()
            .flat_map(|by_key| by_key.values())
            .filter(|entry| entry.foreign || !deep_equals(entry.live.record(), &entry.snapshot))
            .map(|entry| entry.live.clone())
            .collect()
    }

    /// Refreshes every snapshot to the current live state, after a
    /// successful commit.
    pub(crate) fn resnapshot_all(&mut self) {
        for entry in self.entries.values_mut().flat_map(|by_key| by_key.values_mut()) {
            entry.snapshot = deep_clone(entry.live.record());
            entry.foreign = false;
        }
    }

    /// Force-reverts every live instance to its snapshot, after an
    /// abort. Fields added or removed during the transaction are undone
    /// because the whole field set is overwritten.
    pub(crate) fn revert_all(&mut self) -> CoreResult<()> {
        for entry in self.entries.values().flat_map(|by_key| by_key.values()) {
            let restored = deep_clone(&entry.snapshot);
            entry.live.record().set_record_fields(restored.record_fields()?)?;
        }
        Ok(())
    }

    /// Re-seats the entry for a key on freshly fetched storage state.
    pub(crate) fn refresh_entry(
        &mut self,
        entity: &Entity,
        serialized_key: String,
        fetched: &Value,
    ) {
        let snapshot = deep_clone(fetched);
        self.entries
            .entry(entity.entity_type().name)
            .or_default()
            .insert(
                serialized_key,
                ContextEntry {
                    snapshot,
                    live: entity.clone(),
                    foreign: false,
                },
            );
    }

    /// Drops every entry.
    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }

    /// Number of managed entities.
    pub(crate) fn len(&self) -> usize {
        self.entries.values().map(HashMap::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntityType;

    static WIDGET: EntityType = EntityType::new("Widget", "widgets");

    fn managed(context: &mut PersistenceContext, key: i64) -> Entity {
        let entity = Entity::with_fields(
            &WIDGET,
            vec![
                ("id".to_string(), Value::Integer(key)),
                ("n".to_string(), Value::Integer(0)),
            ],
        );
        context.manage(entity.clone(), format!("i:{key}"), false);
        entity
    }

    #[test]
    fn fresh_entries_are_clean() {
        let mut context = PersistenceContext::new();
        managed(&mut context, 1);
        assert!(context.dirty_entities().is_empty());
        assert_eq!(context.len(), 1);
    }

    #[test]
    fn mutation_makes_entry_dirty() {
        let mut context = PersistenceContext::new();
        let entity = managed(&mut context, 1);

        entity.set("n", Value::Integer(5)).unwrap();
        let dirty = context.dirty_entities();
        assert_eq!(dirty.len(), 1);
        assert!(dirty[0].is_same_instance(&entity));
    }

    #[test]
    fn foreign_entries_are_dirty_without_mutation() {
        let mut context = PersistenceContext::new();
        let entity = Entity::with_fields(&WIDGET, vec![("id".to_string(), Value::Integer(9))]);
        context.manage(entity, "i:9".to_string(), true);
        assert_eq!(context.dirty_entities().len(), 1);
    }

    #[test]
    fn resnapshot_cleans_dirty_entries() {
        let mut context = PersistenceContext::new();
        let entity = managed(&mut context, 1);

        entity.set("n", Value::Integer(5)).unwrap();
        context.resnapshot_all();
        assert!(context.dirty_entities().is_empty());
        // The live state keeps the mutation.
        assert_eq!(entity.get("n").unwrap().as_integer(), Some(5));
    }

    #[test]
    fn revert_restores_live_state() {
        let mut context = PersistenceContext::new();
        let entity = managed(&mut context, 1);

        entity.set("n", Value::Integer(5)).unwrap();
        entity.set("added", Value::Bool(true)).unwrap();
        entity.unset("id").unwrap();

        context.revert_all().unwrap();
        assert_eq!(entity.get("n").unwrap().as_integer(), Some(0));
        assert_eq!(entity.get("id").unwrap().as_integer(), Some(1));
        assert!(entity.get("added").is_none());
    }

    #[test]
    fn detach_by_key_and_by_instance() {
        let mut context = PersistenceContext::new();
        let first = managed(&mut context, 1);
        managed(&mut context, 2);

        assert!(context.detach("Widget", "i:2"));
        assert!(!context.detach("Widget", "i:2"));
        assert!(context.detach_entity(&first));
        assert_eq!(context.len(), 0);
    }

    #[test]
    fn lookup_returns_same_live_instance() {
        let mut context = PersistenceContext::new();
        let entity = managed(&mut context, 1);

        let found = context.get_live("Widget", "i:1").unwrap();
        assert!(found.is_same_instance(&entity));
        assert!(context.contains_entity(&entity));
        assert!(context.contains_key("Widget", "i:1"));
        assert!(!context.contains_key("Widget", "i:2"));
    }

    #[test]
    fn clear_empties_everything() {
        let mut context = PersistenceContext::new();
        managed(&mut context, 1);
        managed(&mut context, 2);
        context.clear();
        assert_eq!(context.len(), 0);
    }
}
