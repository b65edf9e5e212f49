//! Error types for store operations.

use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur at the object-store boundary.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The named store does not exist in the database.
    #[error("unknown object store: {name}")]
    UnknownStore {
        /// Name of the store.
        name: String,
    },

    /// The named store is not part of this transaction's scope.
    #[error("object store {name} is not in transaction scope")]
    OutOfScope {
        /// Name of the store.
        name: String,
    },

    /// The transaction has already been committed or aborted.
    #[error("transaction is closed")]
    TransactionClosed,

    /// The transaction was explicitly aborted.
    #[error("transaction aborted")]
    Aborted,

    /// The engine auto-closed the transaction after its inactivity lease
    /// ran out.
    #[error("transaction expired after inactivity")]
    Expired,

    /// A record carries no primary key and the store does not generate one.
    #[error("record in store {store} has no primary key")]
    MissingKey {
        /// Name of the store.
        store: String,
    },

    /// A record with the same primary key already exists.
    #[error("duplicate primary key {key} in store {store}")]
    DuplicateKey {
        /// Name of the store.
        store: String,
        /// Serialized form of the key.
        key: String,
    },

    /// A key or key path could not be processed.
    #[error("key error: {0}")]
    Key(#[from] tetherdb_value::ValueError),
}

impl StoreError {
    /// Creates an unknown store error.
    pub fn unknown_store(name: impl Into<String>) -> Self {
        Self::UnknownStore { name: name.into() }
    }

    /// Creates an out-of-scope error.
    pub fn out_of_scope(name: impl Into<String>) -> Self {
        Self::OutOfScope { name: name.into() }
    }

    /// Creates a missing key error.
    pub fn missing_key(store: impl Into<String>) -> Self {
        Self::MissingKey {
            store: store.into(),
        }
    }
}
