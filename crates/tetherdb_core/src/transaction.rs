//! The public unit of atomic work.

use crate::completion::Completion;
use crate::entity::{Entity, EntityType};
use crate::error::{CoreError, CoreResult};
use crate::manager::ManagerShared;
use crate::runner::{IdleObserver, TransactionRunner};
use crate::types::TransactionId;
use parking_lot::Mutex;
use std::sync::Arc;
use tetherdb_store::{Query, StoreError, TransactionHandle};
use tetherdb_value::{deep_clone, serialize_key, KeyPath, Value};

/// A long-lived, application-controlled read-write transaction.
///
/// Operations queue against a lazily created [`TransactionRunner`] that
/// keeps the underlying short-lived transaction alive. The transaction
/// is one-shot: the first [`commit`](Transaction::commit) or
/// [`abort`](Transaction::abort) deactivates it permanently, and every
/// later call fails with `InvalidState`.
///
/// No mutation performed through `persist`, `remove`, or the query
/// methods is visible to storage until `commit()` succeeds. An abort
/// returns every managed entity to exactly its pre-transaction
/// observable state, including fields added or removed meanwhile.
pub struct Transaction {
    id: TransactionId,
    shared: Arc<ManagerShared>,
    inner: Mutex<TxInner>,
}

struct TxInner {
    active: bool,
    runner: Option<Arc<TransactionRunner>>,
}

impl Transaction {
    pub(crate) fn new(shared: Arc<ManagerShared>) -> Self {
        Self {
            id: TransactionId::next(),
            shared,
            inner: Mutex::new(TxInner {
                active: true,
                runner: None,
            }),
        }
    }

    /// Returns this transaction's ID.
    #[must_use]
    pub fn id(&self) -> TransactionId {
        self.id
    }

    /// Whether commit/abort has not been called yet.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.inner.lock().active
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

    /// Returns the runner, opening the underlying short-lived
    /// transaction on first use.
    fn runner(&self) -> CoreResult<Arc<TransactionRunner>> {
        let mut inner = self.inner.lock();
        if !inner.active {
            return Err(CoreError::invalid_state("transaction is no longer active"));
        }
        Self::runner_locked(&self.shared, self.id, &mut inner)
    }

    fn runner_locked(
        shared: &Arc<ManagerShared>,
        id: TransactionId,
        inner: &mut TxInner,
    ) -> CoreResult<Arc<TransactionRunner>> {
        if let Some(runner) = &inner.runner {
            return Ok(Arc::clone(runner));
        }
        let probe_store = shared
            .store_names
            .first()
            .cloned()
            .ok_or_else(|| CoreError::invalid_state("no entity types registered"))?;
        let handle = shared.database.begin(&shared.store_names)?;
        let observer = Self::runner_observer(Arc::clone(shared), id);
        let runner = Arc::new(TransactionRunner::new(
            handle,
            probe_store,
            shared.config.clone(),
            Some(observer),
        ));
        inner.runner = Some(Arc::clone(&runner));
        Ok(runner)
    }

    /// Observer wired into the runner: settles the transaction when the
    /// runner aborts itself, then forwards to the manager-level observer.
    fn runner_observer(shared: Arc<ManagerShared>, id: TransactionId) -> IdleObserver {
        Arc::new(move |aborted, error| {
            if aborted {
                let mut context = shared.context.lock();
                if let Err(revert_error) = context.revert_all() {
                    tracing::error!(%id, error = %revert_error, "failed to revert entities after self-abort");
                }
                context.clear();
                drop(context);
                *shared.tx_active.lock() = false;
            }
            let observer = shared.observer.lock().clone();
            if let Some(observer) = observer {
                observer(id, aborted, error);
            }
        })
    }

    /// Persists an entity.
    ///
    /// Queues a create against the runner; once the store resolves it,
    /// the generated key (if the record carried none) is assigned into
    /// the live entity through the store's key path, and the entity
    /// becomes managed. The caller keeps working with the same live
    /// instance.
    pub fn persist(&self, entity: &Entity) -> CoreResult<()> {
        self.registered(entity.entity_type())?;
        let runner = self.runner()?;

        let completion: Completion<()> = Completion::new();
        let settle = completion.clone();
        let shared = Arc::clone(&self.shared);
        let entity = entity.clone();
        runner.queue_operation(Box::new(move |handle| {
            settle.settle(persist_op(&shared, &entity, handle));
        }))?;
        completion.wait()
    }

    /// Removes the record with the given primary key.
    ///
    /// If the context manages an entity under that key, the entry is
    /// detached once the delete resolves - without re-fetching.
    pub fn remove(&self, ty: &'static EntityType, key: &Value) -> CoreResult<()> {
        self.registered(ty)?;
        let serialized = serialize_key(key)?;
        let runner = self.runner()?;

        let completion: Completion<()> = Completion::new();
        let settle = completion.clone();
        let shared = Arc::clone(&self.shared);
        let key = deep_clone(key);
        runner.queue_operation(Box::new(move |handle| {
            settle.settle(remove_op(&shared, ty, &key, &serialized, handle));
        }))?;
        completion.wait()
    }

    /// Applies `mutator` to every entity matched by `query`.
    ///
    /// Matched records resolve context-first, so a key that is already
    /// managed yields the existing live instance (its state wins over
    /// the fetched record) and never a duplicate. Newly encountered
    /// records become managed before the mutator runs. Resolves to the
    /// match count.
    pub fn update_query<F>(
        &self,
        ty: &'static EntityType,
        query: Query,
        mutator: F,
    ) -> CoreResult<usize>
    where
        F: FnMut(&Entity) + Send + 'static,
    {
        self.registered(ty)?;
        let runner = self.runner()?;

        let completion: Completion<usize> = Completion::new();
        let settle = completion.clone();
        let shared = Arc::clone(&self.shared);
        let mut mutator = mutator;
        runner.queue_operation(Box::new(move |handle| {
            settle.settle(update_query_op(&shared, ty, &query, &mut mutator, handle));
        }))?;
        completion.wait()
    }

    /// Deletes every record matched by `query`, detaching each from the
    /// context as it goes. Resolves to the match count.
    pub fn delete_query(&self, ty: &'static EntityType, query: Query) -> CoreResult<usize> {
        self.registered(ty)?;
        let runner = self.runner()?;

        let completion: Completion<usize> = Completion::new();
        let settle = completion.clone();
        let shared = Arc::clone(&self.shared);
        runner.queue_operation(Box::new(move |handle| {
            settle.settle(delete_query_op(&shared, ty, &query, handle));
        }))?;
        completion.wait()
    }

    /// Commits the transaction.
    ///
    /// Queues a write-back for every dirty context entry (modified since
    /// its snapshot, or merged as foreign), delegates to the runner's
    /// commit, and on success re-snapshots every entry before the
    /// context is cleared. A transaction that never touched storage and
    /// has nothing dirty completes without ever opening an underlying
    /// transaction.
    pub fn commit(&self) -> CoreResult<()> {
        let finalize = {
            let mut inner = self.inner.lock();
            if !inner.active {
                return Err(CoreError::invalid_state("transaction is no longer active"));
            }
            inner.active = false;
            let dirty = self.shared.context.lock().dirty_entities();
            if inner.runner.is_none() && dirty.is_empty() {
                None
            } else {
                match Self::runner_locked(&self.shared, self.id, &mut inner) {
                    Ok(runner) => Some((runner, dirty)),
                    Err(error) => {
                        drop(inner);
                        self.revert_context(&error);
                        self.complete();
                        return Err(error);
                    }
                }
            }
        };
        let Some((runner, dirty)) = finalize else {
            self.complete();
            return Ok(());
        };

        // Write-backs are waited on individually so a failed write
        // surfaces - and aborts - before the underlying commit request.
        let mut write_backs = Vec::with_capacity(dirty.len());
        for entity in dirty {
            let completion: Completion<()> = Completion::new();
            let settle = completion.clone();
            runner.queue_operation(Box::new(move |handle| {
                settle.settle(write_back_op(&entity, handle));
            }))?;
            write_backs.push(completion);
        }
        for write_back in write_backs {
            if let Err(error) = write_back.wait() {
                if let Ok(completion) = runner.abort() {
                    let _ = completion.wait();
                }
                self.revert_context(&error);
                self.complete();
                return Err(error);
            }
        }

        match runner.commit()?.wait() {
            Ok(()) => {
                self.shared.context.lock().resnapshot_all();
                self.complete();
                Ok(())
            }
            Err(error) => {
                // The underlying transaction did not commit; in-memory
                // state reverts exactly as on abort.
                self.revert_context(&error);
                self.complete();
                Err(error)
            }
        }
    }

    /// Aborts the transaction.
    ///
    /// Delegates to the runner's abort and, on its guaranteed failure,
    /// overwrites every managed entity's live fields with a fresh clone
    /// of its snapshot before re-raising the abort error. The result is
    /// therefore always an error - `Aborted` on the expected path.
    pub fn abort(&self) -> CoreResult<()> {
        let runner = {
            let mut inner = self.inner.lock();
            if !inner.active {
                return Err(CoreError::invalid_state("transaction is no longer active"));
            }
            inner.active = false;
            inner.runner.clone()
        };

        let abort_error = match runner {
            Some(runner) => match runner.abort()?.wait() {
                Err(error) => error,
                Ok(()) => {
                    CoreError::protocol_violation("abort completion resolved successfully")
                }
            },
            None => CoreError::aborted("transaction aborted"),
        };

        self.revert_context(&abort_error);
        self.complete();
        Err(abort_error)
    }

    fn revert_context(&self, cause: &CoreError) {
        if let Err(revert_error) = self.shared.context.lock().revert_all() {
            tracing::error!(
                id = %self.id,
                error = %revert_error,
                cause = %cause,
                "failed to revert entities to their snapshots"
            );
        }
    }

    /// The owner's completion callback: the context does not outlive one
    /// transaction, and the manager may start the next one.
    fn complete(&self) {
        self.shared.context.lock().clear();
        *self.shared.tx_active.lock() = false;
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        let active = self.inner.lock().active;
        if active {
            // Best-effort cleanup for transactions never finalized.
            let _ = self.abort();
        }
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish_non_exhaustive()
    }
}

/// Resolves a store's key path, caching the discovery.
fn key_path_for(
    shared: &ManagerShared,
    store: &str,
    handle: &dyn TransactionHandle,
) -> CoreResult<KeyPath> {
    if let Some(path) = shared.key_paths.lock().get(store) {
        return Ok(path.clone());
    }
    let path = handle.key_path(store)?;
    shared
        .key_paths
        .lock()
        .insert(store.to_string(), path.clone());
    Ok(path)
}

fn persist_op(
    shared: &ManagerShared,
    entity: &Entity,
    handle: &dyn TransactionHandle,
) -> CoreResult<()> {
    let store = entity.entity_type().store;
    let key_path = key_path_for(shared, store, handle)?;
    let key = handle.add(store, &deep_clone(entity.record()))?;
    if key_path.extract(entity.record())?.is_none() {
        key_path.assign(entity.record(), &key)?;
    }
    let serialized = serialize_key(&key)?;
    shared.context.lock().manage(entity.clone(), serialized, false);
    Ok(())
}

fn remove_op(
    shared: &ManagerShared,
    ty: &'static EntityType,
    key: &Value,
    serialized: &str,
    handle: &dyn TransactionHandle,
) -> CoreResult<()> {
    handle.delete(ty.store, key)?;
    shared.context.lock().detach(ty.name, serialized);
    Ok(())
}

fn update_query_op(
    shared: &ManagerShared,
    ty: &'static EntityType,
    query: &Query,
    mutator: &mut dyn FnMut(&Entity),
    handle: &dyn TransactionHandle,
) -> CoreResult<usize> {
    let key_path = key_path_for(shared, ty.store, handle)?;
    let count = handle.update_query(ty.store, query, &mut |record| {
        let key = key_path
            .extract(record)?
            .ok_or_else(|| StoreError::missing_key(ty.store))?;
        let serialized = serialize_key(&key)?;
        let entity = {
            let mut context = shared.context.lock();
            match context.get_live(ty.name, &serialized) {
                Some(live) => live,
                None => {
                    let entity = Entity::from_record(ty, deep_clone(record))?;
                    context.manage(entity.clone(), serialized, false);
                    entity
                }
            }
        };
        mutator(&entity);
        *record = deep_clone(entity.record());
        Ok(())
    })?;
    Ok(count)
}

fn delete_query_op(
    shared: &ManagerShared,
    ty: &'static EntityType,
    query: &Query,
    handle: &dyn TransactionHandle,
) -> CoreResult<usize> {
    let key_path = key_path_for(shared, ty.store, handle)?;
    let records = handle.query(ty.store, query)?;
    let mut count = 0;
    for record in &records {
        let key = key_path
            .extract(record)?
            .ok_or_else(|| StoreError::missing_key(ty.store))?;
        let serialized = serialize_key(&key)?;
        handle.delete(ty.store, &key)?;
        shared.context.lock().detach(ty.name, &serialized);
        count += 1;
    }
    Ok(count)
}

fn write_back_op(entity: &Entity, handle: &dyn TransactionHandle) -> CoreResult<()> {
    handle.put(entity.entity_type().store, &deep_clone(entity.record()))?;
    Ok(())
}
