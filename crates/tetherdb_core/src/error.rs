//! Error types for the transaction engine.

use thiserror::Error;

/// Result type for engine operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in the transaction engine.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Operation attempted on an inactive or aborted runner/transaction.
    ///
    /// Always a caller error; surfaced synchronously, never retried.
    #[error("invalid state: {message}")]
    InvalidState {
        /// Description of the violated precondition.
        message: String,
    },

    /// Expected terminal signal of a deliberately aborted transaction.
    ///
    /// Propagated to the caller; not an engine failure.
    #[error("transaction aborted: {reason}")]
    Aborted {
        /// Why the transaction was aborted.
        reason: String,
    },

    /// The underlying handle reported success after an abort was
    /// requested. Indicates a bug in the collaborator or this engine.
    #[error("protocol violation: {message}")]
    ProtocolViolation {
        /// Description of the violation.
        message: String,
    },

    /// A record that should exist is gone from storage.
    #[error("entity not found: key {key} in store {store}")]
    EntityNotFound {
        /// The backing store searched.
        store: String,
        /// Serialized form of the primary key.
        key: String,
    },

    /// The entity type is not registered with the entity manager.
    #[error("unknown entity type: {name}")]
    UnknownEntityType {
        /// Name of the type.
        name: String,
    },

    /// Value or key error.
    #[error("value error: {0}")]
    Value(#[from] tetherdb_value::ValueError),

    /// Object-store error.
    #[error("store error: {0}")]
    Store(#[from] tetherdb_store::StoreError),
}

impl CoreError {
    /// Creates an invalid state error.
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    /// Creates an aborted error.
    pub fn aborted(reason: impl Into<String>) -> Self {
        Self::Aborted {
            reason: reason.into(),
        }
    }

    /// Creates a protocol violation error.
    pub fn protocol_violation(message: impl Into<String>) -> Self {
        Self::ProtocolViolation {
            message: message.into(),
        }
    }

    /// Creates an entity not found error.
    pub fn entity_not_found(store: impl Into<String>, key: impl Into<String>) -> Self {
        Self::EntityNotFound {
            store: store.into(),
            key: key.into(),
        }
    }

    /// Whether this error is the expected signal of a deliberate abort.
    #[must_use]
    pub fn is_abort(&self) -> bool {
        matches!(self, Self::Aborted { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn abort_kind_is_recognized() {
        assert!(CoreError::aborted("requested").is_abort());
        assert!(!CoreError::invalid_state("nope").is_abort());
        assert!(!CoreError::protocol_violation("bad").is_abort());
    }

    #[test]
    fn store_errors_convert() {
        let err: CoreError = tetherdb_store::StoreError::TransactionClosed.into();
        assert!(matches!(err, CoreError::Store(_)));
    }
}
