//! Query descriptions for object-store reads.

use std::fmt;
use std::sync::Arc;
use tetherdb_value::Value;

/// Direction of a query over primary keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyOrder {
    /// Ascending key order.
    #[default]
    Ascending,
    /// Descending key order.
    Descending,
}

/// Record filter applied before ordering and pagination.
#[derive(Clone)]
pub enum Filter {
    /// Matches the single record with exactly this primary key.
    Key(Value),
    /// Matches records whose primary key falls in a range.
    Range {
        /// Lower bound, unbounded when `None`.
        lower: Option<Value>,
        /// Upper bound, unbounded when `None`.
        upper: Option<Value>,
        /// Whether the lower bound itself is excluded.
        lower_open: bool,
        /// Whether the upper bound itself is excluded.
        upper_open: bool,
    },
    /// Matches records the predicate accepts.
    Predicate(Arc<dyn Fn(&Value) -> bool + Send + Sync>),
}

impl fmt::Debug for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Filter::Key(key) => f.debug_tuple("Key").field(key).finish(),
            Filter::Range {
                lower,
                upper,
                lower_open,
                upper_open,
            } => f
                .debug_struct("Range")
                .field("lower", lower)
                .field("upper", upper)
                .field("lower_open", lower_open)
                .field("upper_open", upper_open)
                .finish(),
            Filter::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}

/// An ordered, paginated query over one object store.
#[derive(Debug, Clone, Default)]
pub struct Query {
    /// Record filter; `None` matches everything.
    pub filter: Option<Filter>,
    /// Key order of the results.
    pub order: KeyOrder,
    /// Number of matched records to skip.
    pub offset: usize,
    /// Maximum number of records to return; `None` is unbounded.
    pub limit: Option<usize>,
}

impl Query {
    /// A query matching every record in ascending key order.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Restricts the query to one exact primary key.
    #[must_use]
    pub fn key(mut self, key: Value) -> Self {
        self.filter = Some(Filter::Key(key));
        self
    }

    /// Restricts the query to a closed key range.
    #[must_use]
    pub fn range(mut self, lower: Option<Value>, upper: Option<Value>) -> Self {
        self.filter = Some(Filter::Range {
            lower,
            upper,
            lower_open: false,
            upper_open: false,
        });
        self
    }

    /// Restricts the query with a record predicate.
    #[must_use]
    pub fn predicate<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Filter::Predicate(Arc::new(predicate)));
        self
    }

    /// Sets descending key order.
    #[must_use]
    pub fn descending(mut self) -> Self {
        self.order = KeyOrder::Descending;
        self
    }

    /// Sets the number of matched records to skip.
    #[must_use]
    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    /// Sets the maximum number of records to return.
    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_everything_ascending() {
        let query = Query::all();
        assert!(query.filter.is_none());
        assert_eq!(query.order, KeyOrder::Ascending);
        assert_eq!(query.offset, 0);
        assert!(query.limit.is_none());
    }

    #[test]
    fn builders_compose() {
        let query = Query::all()
            .range(Some(Value::Integer(1)), None)
            .descending()
            .offset(2)
            .limit(10);
        assert!(matches!(query.filter, Some(Filter::Range { .. })));
        assert_eq!(query.order, KeyOrder::Descending);
        assert_eq!(query.offset, 2);
        assert_eq!(query.limit, Some(10));
    }
}
