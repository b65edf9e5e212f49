//! Entity manager facade.

use crate::config::RunnerConfig;
use crate::context::PersistenceContext;
use crate::entity::{Entity, EntityType};
use crate::error::{CoreError, CoreResult};
use crate::transaction::Transaction;
use crate::types::TransactionId;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tetherdb_store::{ObjectStoreDatabase, Query, StoreError};
use tetherdb_value::{deep_clone, serialize_key, KeyPath, Value};

/// Observer of transaction-level events raised by a runner.
///
/// Called with `(transaction, aborted, error)`: `aborted` is false for
/// an idle warning and true when the runner aborted the transaction on
/// its own.
pub type TransactionObserver = Arc<dyn Fn(TransactionId, bool, Option<&CoreError>) + Send + Sync>;

/// State shared between the manager and its transactions.
pub(crate) struct ManagerShared {
    pub(crate) database: Arc<dyn ObjectStoreDatabase>,
    pub(crate) types: HashMap<&'static str, &'static EntityType>,
    pub(crate) store_names: Vec<String>,
    pub(crate) context: Mutex<PersistenceContext>,
    pub(crate) key_paths: Mutex<HashMap<String, KeyPath>>,
    pub(crate) config: RunnerConfig,
    pub(crate) observer: Mutex<Option<TransactionObserver>>,
    /// Only one read-write transaction may be open at a time.
    pub(crate) tx_active: Mutex<bool>,
}

/// The entity-manager facade over an object-store database.
///
/// Owns the registered entity types, the persistence context, the
/// cached key paths, and at most one active read-write [`Transaction`].
/// Entities fetched through [`find`](EntityManager::find) and
/// [`query`](EntityManager::query) become managed immediately and
/// participate in the next transaction's dirty-check; the context is
/// cleared whenever a transaction completes.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use tetherdb_core::{EntityManager, Entity, EntityType};
/// use tetherdb_store::MemoryDatabase;
/// use tetherdb_value::{KeyPath, Value};
///
/// static TASK: EntityType = EntityType::new("Task", "tasks");
///
/// let db = MemoryDatabase::new();
/// db.create_store("tasks", KeyPath::Single("id".into()), true);
/// let manager = EntityManager::new(Arc::new(db), &[&TASK]);
///
/// let task = Entity::new(&TASK);
/// task.set("title", Value::from("ship it")).unwrap();
/// manager
///     .run_transaction(|tx| {
///         tx.persist(&task)?;
///         Ok(())
///     })
///     .unwrap();
/// assert_eq!(task.get("id").unwrap().as_integer(), Some(1));
/// ```
pub struct EntityManager {
    shared: Arc<ManagerShared>,
}

impl EntityManager {
    /// Creates an entity manager with the default runner configuration.
    #[must_use]
    pub fn new(database: Arc<dyn ObjectStoreDatabase>, types: &[&'static EntityType]) -> Self {
        Self::with_config(database, types, RunnerConfig::default())
    }

    /// Creates an entity manager with a custom runner configuration.
    #[must_use]
    pub fn with_config(
        database: Arc<dyn ObjectStoreDatabase>,
        types: &[&'static EntityType],
        config: RunnerConfig,
    ) -> Self {
        let mut type_map = HashMap::with_capacity(types.len());
        let mut store_names = Vec::with_capacity(types.len());
        for ty in types {
            type_map.insert(ty.name, *ty);
            store_names.push(ty.store.to_string());
        }
        store_names.sort();
        Self {
            shared: Arc::new(ManagerShared {
                database,
                types: type_map,
                store_names,
                context: Mutex::new(PersistenceContext::new()),
                key_paths: Mutex::new(HashMap::new()),
                config,
                observer: Mutex::new(None),
                tx_active: Mutex::new(false),
            }),
        }
    }

    /// Installs the observer notified of idle warnings and self-aborts.
    pub fn set_idle_observer(&self, observer: TransactionObserver) {
        *self.shared.observer.lock() = Some(observer);
    }

    fn registered(&self, ty: &'static EntityType) -> CoreResult<()> {
        if self.shared.types.contains_key(ty.name) {
            Ok(())
        } else {
            Err(CoreError::UnknownEntityType {
                name: ty.name.to_string(),
            })
        }
    }

    /// Resolves a store's key path, discovering it once and caching it.
    fn key_path(&self, store: &str) -> CoreResult<KeyPath> {
        if let Some(path) = self.shared.key_paths.lock().get(store) {
            return Ok(path.clone());
        }
        let handle = self.shared.database.begin(&[store.to_string()])?;
        let path = handle.key_path(store)?;
        handle.commit()?;
        handle.wait_closed()?;
        self.shared
            .key_paths
            .lock()
            .insert(store.to_string(), path.clone());
        Ok(path)
    }

    /// Finds the entity with the given primary key.
    ///
    /// Consults the context first: a managed key yields the existing
    /// live instance without touching storage. Otherwise the record is
    /// fetched through a plain short-lived read and becomes managed.
    pub fn find(&self, ty: &'static EntityType, key: &Value) -> CoreResult<Option<Entity>> {
        self.registered(ty)?;
        let serialized = serialize_key(key)?;
        if let Some(live) = self.shared.context.lock().get_live(ty.name, &serialized) {
            return Ok(Some(live));
        }

        let handle = self.shared.database.begin(&[ty.store.to_string()])?;
        let record = handle.get(ty.store, key)?;
        handle.commit()?;
        handle.wait_closed()?;

        match record {
            None => Ok(None),
            Some(record) => {
                let entity = Entity::from_record(ty, record)?;
                self.shared
                    .context
                    .lock()
                    .manage(entity.clone(), serialized, false);
                Ok(Some(entity))
            }
        }
    }

    /// Runs an ordered query, resolving each matched record
    /// context-first so managed keys never yield duplicate instances.
    pub fn query(&self, ty: &'static EntityType, query: &Query) -> CoreResult<Vec<Entity>> {
        self.registered(ty)?;
        let key_path = self.key_path(ty.store)?;

        let handle = self.shared.database.begin(&[ty.store.to_string()])?;
        let records = handle.query(ty.store, query)?;
        handle.commit()?;
        handle.wait_closed()?;

        let mut entities = Vec::with_capacity(records.len());
        let mut context = self.shared.context.lock();
        for record in records {
            let key = key_path
                .extract(&record)?
                .ok_or_else(|| StoreError::missing_key(ty.store))?;
            let serialized = serialize_key(&key)?;
            let entity = match context.get_live(ty.name, &serialized) {
                Some(live) => live,
                None => {
                    let entity = Entity::from_record(ty, record)?;
                    context.manage(entity.clone(), serialized, false);
                    entity
                }
            };
            entities.push(entity);
        }
        Ok(entities)
    }

    /// Starts a read-write transaction.
    ///
    /// # Errors
    ///
    /// Fails synchronously with `InvalidState` while another read-write
    /// transaction is active - that is a programmer error, not a queueing
    /// request.
    pub fn start_transaction(&self) -> CoreResult<Transaction> {
        let mut active = self.shared.tx_active.lock();
        if *active {
            return Err(CoreError::invalid_state(
                "a read-write transaction is already active",
            ));
        }
        *active = true;
        Ok(Transaction::new(Arc::clone(&self.shared)))
    }

    /// Runs `work` inside a transaction: commit on `Ok`, abort on `Err`.
    ///
    /// The abort's own expected `Aborted` failure is swallowed; the
    /// original error from `work` is what the caller sees.
    pub fn run_transaction<T, F>(&self, work: F) -> CoreResult<T>
    where
        F: FnOnce(&Transaction) -> CoreResult<T>,
    {
        let transaction = self.start_transaction()?;
        match work(&transaction) {
            Ok(value) => {
                transaction.commit()?;
                Ok(value)
            }
            Err(error) => {
                match transaction.abort() {
                    Err(abort_error) if abort_error.is_abort() => {}
                    Err(abort_error) => {
                        tracing::warn!(
                            error = %abort_error,
                            "abort after a failed transaction body reported an unexpected error"
                        );
                    }
                    Ok(()) => {}
                }
                Err(error)
            }
        }
    }

    /// Whether this exact live instance is managed.
    #[must_use]
    pub fn contains(&self, entity: &Entity) -> bool {
        self.shared.context.lock().contains_entity(entity)
    }

    /// Whether an entity of this type with this key is managed.
    pub fn contains_by_primary_key(
        &self,
        ty: &'static EntityType,
        key: &Value,
    ) -> CoreResult<bool> {
        self.registered(ty)?;
        let serialized = serialize_key(key)?;
        Ok(self
            .shared
            .context
            .lock()
            .contains_key(ty.name, &serialized))
    }

    /// Detaches an entity from the context. Returns whether it was
    /// managed.
    #[must_use]
    pub fn detach(&self, entity: &Entity) -> bool {
        self.shared.context.lock().detach_entity(entity)
    }

    /// Merges a foreign entity into the context and returns the managed
    /// instance.
    ///
    /// If the key is already managed, the foreign state is copied over
    /// the managed live object. Either way the entry is flagged foreign:
    /// merged entities are dirty-by-default and written back on the next
    /// commit even when deep-equal to their snapshot.
    pub fn merge(&self, entity: &Entity) -> CoreResult<Entity> {
        let ty = entity.entity_type();
        self.registered(ty)?;
        let key_path = self.key_path(ty.store)?;
        let key = key_path.extract(entity.record())?.ok_or_else(|| {
            CoreError::invalid_state("cannot merge an entity without a primary key")
        })?;
        let serialized = serialize_key(&key)?;

        let mut context = self.shared.context.lock();
        if let Some(managed) = context.get_live(ty.name, &serialized) {
            if !managed.is_same_instance(entity) {
                let fields = deep_clone(entity.record()).record_fields()?;
                managed.record().set_record_fields(fields)?;
            }
            context.mark_foreign(ty.name, &serialized);
            Ok(managed)
        } else {
            let managed = Entity::from_record(ty, deep_clone(entity.record()))?;
            context.manage(managed.clone(), serialized, true);
            Ok(managed)
        }
    }

    /// Re-fetches an entity's record and overwrites both the live state
    /// and the snapshot with what storage holds.
    ///
    /// # Errors
    ///
    /// Fails with `EntityNotFound` if the record is gone.
    pub fn refresh(&self, entity: &Entity) -> CoreResult<()> {
        let ty = entity.entity_type();
        self.registered(ty)?;
        let key_path = self.key_path(ty.store)?;
        let key = key_path.extract(entity.record())?.ok_or_else(|| {
            CoreError::invalid_state("cannot refresh an entity without a primary key")
        })?;
        let serialized = serialize_key(&key)?;

        let handle = self.shared.database.begin(&[ty.store.to_string()])?;
        let record = handle.get(ty.store, &key)?;
        handle.commit()?;
        handle.wait_closed()?;

        let Some(record) = record else {
            return Err(CoreError::entity_not_found(ty.store, serialized));
        };
        entity.record().set_record_fields(record.record_fields()?)?;
        self.shared
            .context
            .lock()
            .refresh_entry(entity, serialized, &record);
        Ok(())
    }

    /// Detaches every managed entity.
    pub fn clear(&self) {
        self.shared.context.lock().clear();
    }

    /// Number of entities currently managed by the context.
    #[must_use]
    pub fn managed_count(&self) -> usize {
        self.shared.context.lock().len()
    }
}

impl std::fmt::Debug for EntityManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityManager")
            .field("types", &self.shared.types.len())
            .field("managed", &self.managed_count())
            .field("tx_active", &*self.shared.tx_active.lock())
            .finish_non_exhaustive()
    }
}
