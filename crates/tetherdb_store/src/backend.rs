//! Object-store boundary trait definitions.

use crate::error::StoreResult;
use crate::query::Query;
use tetherdb_value::{KeyPath, Value};

/// A local object-store database offering short-lived transactions.
///
/// This is the external collaborator the persistence layer is built on.
/// Implementations are **short-lived transaction engines**: a transaction
/// that no operation has touched within the engine's inactivity window
/// auto-closes, which is exactly the behavior the keep-alive runner in
/// `tetherdb_core` defeats.
///
/// # Invariants
///
/// - `begin` opens one read-write transaction spanning the given stores
/// - records returned by a handle share no mutable state with the stored
///   data or with caller-side graphs
/// - implementations must be `Send + Sync`; handles must be `Send` so
///   they can move to a keep-alive thread
///
/// # Implementors
///
/// - [`crate::MemoryDatabase`] - For testing and ephemeral data
pub trait ObjectStoreDatabase: Send + Sync {
    /// Opens a short-lived read-write transaction over the given stores.
    ///
    /// # Errors
    ///
    /// Returns an error if any named store does not exist.
    fn begin(&self, store_names: &[String]) -> StoreResult<Box<dyn TransactionHandle>>;

    /// Returns the names of all object stores in the database.
    fn store_names(&self) -> Vec<String>;
}

/// One live short-lived read-write transaction.
///
/// Every operation resets the engine's inactivity clock. A handle that
/// has expired, committed, or aborted fails all further operations.
/// Writes are not visible outside the transaction until [`commit`] and
/// the close signal ([`wait_closed`]) report success.
///
/// [`commit`]: TransactionHandle::commit
/// [`wait_closed`]: TransactionHandle::wait_closed
pub trait TransactionHandle: Send {
    /// Reads the record stored under `key`, if any.
    fn get(&self, store: &str, key: &Value) -> StoreResult<Option<Value>>;

    /// Inserts a new record and returns its primary key.
    ///
    /// When the store auto-generates keys and the record carries none,
    /// the generated key is assigned into the stored record through the
    /// store's key path and returned.
    ///
    /// # Errors
    ///
    /// Fails if a record with the same key already exists, or if the
    /// record has no key and the store does not generate one.
    fn add(&self, store: &str, record: &Value) -> StoreResult<Value>;

    /// Inserts or replaces the record stored under its own primary key.
    fn put(&self, store: &str, record: &Value) -> StoreResult<()>;

    /// Deletes the record stored under `key`. Missing keys are ignored.
    fn delete(&self, store: &str, key: &Value) -> StoreResult<()>;

    /// Runs an ordered query and returns the matched records.
    fn query(&self, store: &str, query: &Query) -> StoreResult<Vec<Value>>;

    /// Applies `mutator` to every record matched by `query`, re-saves
    /// each mutated record, and returns the match count.
    fn update_query(
        &self,
        store: &str,
        query: &Query,
        mutator: &mut dyn FnMut(&mut Value) -> StoreResult<()>,
    ) -> StoreResult<usize>;

    /// Returns the key path configured for a store.
    ///
    /// Callers discover this once per store and cache it.
    fn key_path(&self, store: &str) -> StoreResult<KeyPath>;

    /// Requests a graceful close; buffered writes publish atomically.
    fn commit(&self) -> StoreResult<()>;

    /// Requests an abort; buffered writes are discarded.
    fn abort(&self) -> StoreResult<()>;

    /// Blocks until the transaction closes.
    ///
    /// Resolves with `Ok(())` when the handle closed successfully, fails
    /// with [`crate::StoreError::Aborted`] after an explicit abort, and
    /// with [`crate::StoreError::Expired`] when the engine auto-closed
    /// the transaction.
    fn wait_closed(&self) -> StoreResult<()>;
}
