//! Core type definitions.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Unique identifier for a transaction.
///
/// Transaction IDs are monotonically increasing and never reused within
/// a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TransactionId(pub u64);

impl TransactionId {
    /// Allocates the next transaction ID.
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "txn:{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique_and_increasing() {
        let a = TransactionId::next();
        let b = TransactionId::next();
        assert!(a < b);
    }

    #[test]
    fn display_format() {
        let id = TransactionId(42);
        assert_eq!(format!("{id}"), "txn:42");
    }
}
