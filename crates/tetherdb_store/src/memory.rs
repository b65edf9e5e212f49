//! In-memory object-store database for testing.

use crate::backend::{ObjectStoreDatabase, TransactionHandle};
use crate::error::{StoreError, StoreResult};
use crate::query::{Filter, KeyOrder, Query};
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tetherdb_value::{compare_keys, deep_clone, serialize_key, KeyPath, Value};

/// Default inactivity lease of a transaction.
const DEFAULT_LEASE: Duration = Duration::from_secs(30);

/// An in-memory object-store database.
///
/// This engine is suitable for unit tests, integration tests, and
/// ephemeral data. It faithfully models the one property the layer above
/// exists to defeat: its transactions are **short-lived**. A transaction
/// that no operation has touched within the configured lease auto-closes
/// and reports [`StoreError::Expired`] from then on.
///
/// Records are stored as structurally independent deep clones, so no
/// stored graph is ever aliased by - or mutated through - caller-side
/// values.
///
/// # Example
///
/// ```rust
/// use tetherdb_store::{MemoryDatabase, ObjectStoreDatabase};
/// use tetherdb_value::{KeyPath, Value};
///
/// let db = MemoryDatabase::new();
/// db.create_store("tasks", KeyPath::Single("id".into()), true);
///
/// let tx = db.begin(&["tasks".into()]).unwrap();
/// let record = Value::record(vec![("title".into(), Value::from("write docs"))]);
/// let key = tx.add("tasks", &record).unwrap();
/// assert_eq!(key.as_integer(), Some(1));
/// tx.commit().unwrap();
/// tx.wait_closed().unwrap();
/// ```
pub struct MemoryDatabase {
    shared: Arc<Shared>,
    lease: Duration,
}

struct Shared {
    stores: Mutex<HashMap<String, StoreData>>,
}

#[derive(Clone)]
struct StoreData {
    key_path: KeyPath,
    auto_increment: bool,
    next_key: i64,
    /// Serialized key -> record, in insertion order.
    records: Vec<(String, Value)>,
}

impl MemoryDatabase {
    /// Creates a new empty in-memory database with the default lease.
    #[must_use]
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                stores: Mutex::new(HashMap::new()),
            }),
            lease: DEFAULT_LEASE,
        }
    }

    /// Sets the inactivity lease applied to every transaction.
    ///
    /// Tests exercising expiry or keep-alive shorten this.
    #[must_use]
    pub fn lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }

    /// Creates an object store with the given key path.
    ///
    /// With `auto_increment`, records added without a key get generated
    /// integer keys 1, 2, 3, ...
    pub fn create_store(&self, name: impl Into<String>, key_path: KeyPath, auto_increment: bool) {
        self.shared.stores.lock().insert(
            name.into(),
            StoreData {
                key_path,
                auto_increment,
                next_key: 1,
                records: Vec::new(),
            },
        );
    }
}

impl Default for MemoryDatabase {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjectStoreDatabase for MemoryDatabase {
    fn begin(&self, store_names: &[String]) -> StoreResult<Box<dyn TransactionHandle>> {
        let stores = self.shared.stores.lock();
        let mut working = HashMap::with_capacity(store_names.len());
        for name in store_names {
            let data = stores
                .get(name)
                .ok_or_else(|| StoreError::unknown_store(name.clone()))?;
            working.insert(name.clone(), data.clone());
        }
        Ok(Box::new(MemoryTransaction {
            shared: Arc::clone(&self.shared),
            lease: self.lease,
            state: Mutex::new(TxState {
                status: TxStatus::Open,
                last_touch: Instant::now(),
                working,
                modified: HashSet::new(),
            }),
            closed: Condvar::new(),
        }))
    }

    fn store_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.shared.stores.lock().keys().cloned().collect();
        names.sort();
        names
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TxStatus {
    Open,
    Committed,
    Aborted,
    Expired,
}

struct TxState {
    status: TxStatus,
    last_touch: Instant,
    /// Private copy of every in-scope store; published on commit.
    working: HashMap<String, StoreData>,
    /// Stores this transaction wrote to; only these publish on commit,
    /// so read-only transactions never clobber concurrent commits.
    modified: HashSet<String>,
}

/// One live short-lived transaction over a [`MemoryDatabase`].
struct MemoryTransaction {
    shared: Arc<Shared>,
    lease: Duration,
    state: Mutex<TxState>,
    closed: Condvar,
}

impl MemoryTransaction {
    /// Checks liveness, enforces the lease, and resets the clock.
    fn touch(&self) -> StoreResult<MutexGuard<'_, TxState>> {
        let mut state = self.state.lock();
        match state.status {
            TxStatus::Open => {
                if state.last_touch.elapsed() >= self.lease {
                    state.status = TxStatus::Expired;
                    self.closed.notify_all();
                    return Err(StoreError::Expired);
                }
                state.last_touch = Instant::now();
                Ok(state)
            }
            TxStatus::Committed | TxStatus::Aborted => Err(StoreError::TransactionClosed),
            TxStatus::Expired => Err(StoreError::Expired),
        }
    }
}

fn store_data<'a>(state: &'a mut TxState, store: &str) -> StoreResult<&'a mut StoreData> {
    state
        .working
        .get_mut(store)
        .ok_or_else(|| StoreError::out_of_scope(store))
}

fn record_key(data: &StoreData, record: &Value, store: &str) -> StoreResult<Value> {
    data.key_path
        .extract(record)?
        .ok_or_else(|| StoreError::missing_key(store))
}

fn filter_matches(filter: Option<&Filter>, key: &Value, record: &Value) -> bool {
    match filter {
        None => true,
        Some(Filter::Key(wanted)) => {
            compare_keys(key, wanted).map_or(false, |ord| ord == Ordering::Equal)
        }
        Some(Filter::Range {
            lower,
            upper,
            lower_open,
            upper_open,
        }) => {
            if let Some(bound) = lower {
                match compare_keys(key, bound) {
                    Ok(Ordering::Less) => return false,
                    Ok(Ordering::Equal) if *lower_open => return false,
                    Err(_) => return false,
                    _ => {}
                }
            }
            if let Some(bound) = upper {
                match compare_keys(key, bound) {
                    Ok(Ordering::Greater) => return false,
                    Ok(Ordering::Equal) if *upper_open => return false,
                    Err(_) => return false,
                    _ => {}
                }
            }
            true
        }
        Some(Filter::Predicate(predicate)) => predicate(record),
    }
}

/// Matched records in query order: (position in `records`, key).
fn collect_matches(data: &StoreData, query: &Query, store: &str) -> StoreResult<Vec<usize>> {
    let mut matched: Vec<(usize, Value)> = Vec::new();
    for (position, (_, record)) in data.records.iter().enumerate() {
        let key = record_key(data, record, store)?;
        if filter_matches(query.filter.as_ref(), &key, record) {
            matched.push((position, key));
        }
    }
    // Keys were validated on insert, so comparison cannot fail here.
    matched.sort_by(|(_, a), (_, b)| compare_keys(a, b).unwrap_or(Ordering::Equal));
    if query.order == KeyOrder::Descending {
        matched.reverse();
    }
    let limited: Vec<usize> = matched
        .into_iter()
        .skip(query.offset)
        .take(query.limit.unwrap_or(usize::MAX))
        .map(|(position, _)| position)
        .collect();
    Ok(limited)
}

impl TransactionHandle for MemoryTransaction {
    fn get(&self, store: &str, key: &Value) -> StoreResult<Option<Value>> {
        let mut state = self.touch()?;
        let data = store_data(&mut state, store)?;
        let serialized = serialize_key(key)?;
        Ok(data
            .records
            .iter()
            .find(|(existing, _)| *existing == serialized)
            .map(|(_, record)| deep_clone(record)))
    }

    fn add(&self, store: &str, record: &Value) -> StoreResult<Value> {
        let mut state = self.touch()?;
        let data = store_data(&mut state, store)?;
        let stored = deep_clone(record);

        let key = match data.key_path.extract(&stored)? {
            Some(key) => key,
            None if data.auto_increment => {
                let key = Value::Integer(data.next_key);
                data.next_key += 1;
                data.key_path.assign(&stored, &key)?;
                key
            }
            None => return Err(StoreError::missing_key(store)),
        };

        let serialized = serialize_key(&key)?;
        if data.records.iter().any(|(existing, _)| *existing == serialized) {
            return Err(StoreError::DuplicateKey {
                store: store.to_string(),
                key: serialized,
            });
        }
        data.records.push((serialized, stored));
        state.modified.insert(store.to_string());
        Ok(key)
    }

    fn put(&self, store: &str, record: &Value) -> StoreResult<()> {
        let mut state = self.touch()?;
        let data = store_data(&mut state, store)?;
        let stored = deep_clone(record);

        let key = match data.key_path.extract(&stored)? {
            Some(key) => key,
            None if data.auto_increment => {
                let key = Value::Integer(data.next_key);
                data.next_key += 1;
                data.key_path.assign(&stored, &key)?;
                key
            }
            None => return Err(StoreError::missing_key(store)),
        };

        let serialized = serialize_key(&key)?;
        if let Some(slot) = data
            .records
            .iter_mut()
            .find(|(existing, _)| *existing == serialized)
        {
            slot.1 = stored;
        } else {
            data.records.push((serialized, stored));
        }
        state.modified.insert(store.to_string());
        Ok(())
    }

    fn delete(&self, store: &str, key: &Value) -> StoreResult<()> {
        let mut state = self.touch()?;
        let data = store_data(&mut state, store)?;
        let serialized = serialize_key(key)?;
        data.records.retain(|(existing, _)| *existing != serialized);
        state.modified.insert(store.to_string());
        Ok(())
    }

    fn query(&self, store: &str, query: &Query) -> StoreResult<Vec<Value>> {
        let mut state = self.touch()?;
        let data = store_data(&mut state, store)?;
        let matched = collect_matches(data, query, store)?;
        Ok(matched
            .into_iter()
            .map(|position| deep_clone(&data.records[position].1))
            .collect())
    }

    fn update_query(
        &self,
        store: &str,
        query: &Query,
        mutator: &mut dyn FnMut(&mut Value) -> StoreResult<()>,
    ) -> StoreResult<usize> {
        let mut state = self.touch()?;
        let data = store_data(&mut state, store)?;
        let matched = collect_matches(data, query, store)?;

        let mut count = 0;
        for position in matched {
            let mut record = deep_clone(&data.records[position].1);
            mutator(&mut record)?;
            data.records[position].1 = deep_clone(&record);
            count += 1;
        }
        if count > 0 {
            state.modified.insert(store.to_string());
        }
        Ok(count)
    }

    fn key_path(&self, store: &str) -> StoreResult<KeyPath> {
        let mut state = self.touch()?;
        let data = store_data(&mut state, store)?;
        Ok(data.key_path.clone())
    }

    fn commit(&self) -> StoreResult<()> {
        let mut state = self.touch()?;
        let working = std::mem::take(&mut state.working);
        let modified = std::mem::take(&mut state.modified);
        {
            let mut stores = self.shared.stores.lock();
            for (name, data) in working {
                if modified.contains(&name) {
                    stores.insert(name, data);
                }
            }
        }
        state.status = TxStatus::Committed;
        self.closed.notify_all();
        Ok(())
    }

    fn abort(&self) -> StoreResult<()> {
        let mut state = self.touch()?;
        state.working.clear();
        state.status = TxStatus::Aborted;
        self.closed.notify_all();
        Ok(())
    }

    fn wait_closed(&self) -> StoreResult<()> {
        let mut state = self.state.lock();
        loop {
            match state.status {
                TxStatus::Committed => return Ok(()),
                TxStatus::Aborted => return Err(StoreError::Aborted),
                TxStatus::Expired => return Err(StoreError::Expired),
                TxStatus::Open => {
                    let deadline = state.last_touch + self.lease;
                    if Instant::now() >= deadline {
                        state.status = TxStatus::Expired;
                        self.closed.notify_all();
                        return Err(StoreError::Expired);
                    }
                    self.closed.wait_until(&mut state, deadline);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> MemoryDatabase {
        let db = MemoryDatabase::new();
        db.create_store("foo", KeyPath::Single("id".into()), true);
        db.create_store("bar", KeyPath::Single("key".into()), false);
        db
    }

    fn record(fields: Vec<(&str, Value)>) -> Value {
        Value::record(
            fields
                .into_iter()
                .map(|(name, value)| (name.to_string(), value))
                .collect(),
        )
    }

    #[test]
    fn add_generates_sequential_keys() {
        let db = test_db();
        let tx = db.begin(&["foo".into()]).unwrap();

        let k1 = tx.add("foo", &record(vec![("n", Value::Integer(1))])).unwrap();
        let k2 = tx.add("foo", &record(vec![("n", Value::Integer(2))])).unwrap();
        assert_eq!(k1.as_integer(), Some(1));
        assert_eq!(k2.as_integer(), Some(2));

        // The generated key is assigned into the stored record.
        let stored = tx.get("foo", &k1).unwrap().unwrap();
        assert_eq!(stored.field("id").unwrap().as_integer(), Some(1));
    }

    #[test]
    fn add_rejects_duplicate_keys() {
        let db = test_db();
        let tx = db.begin(&["bar".into()]).unwrap();

        tx.add("bar", &record(vec![("key", Value::Integer(7))]))
            .unwrap();
        let result = tx.add("bar", &record(vec![("key", Value::Integer(7))]));
        assert!(matches!(result, Err(StoreError::DuplicateKey { .. })));
    }

    #[test]
    fn add_without_key_fails_without_auto_increment() {
        let db = test_db();
        let tx = db.begin(&["bar".into()]).unwrap();
        let result = tx.add("bar", &record(vec![("n", Value::Integer(1))]));
        assert!(matches!(result, Err(StoreError::MissingKey { .. })));
    }

    #[test]
    fn get_returns_independent_clone() {
        let db = test_db();
        let tx = db.begin(&["foo".into()]).unwrap();
        let key = tx.add("foo", &record(vec![("n", Value::Integer(1))])).unwrap();

        let fetched = tx.get("foo", &key).unwrap().unwrap();
        fetched.set_field("n", Value::Integer(99)).unwrap();

        let again = tx.get("foo", &key).unwrap().unwrap();
        assert_eq!(again.field("n").unwrap().as_integer(), Some(1));
    }

    #[test]
    fn put_upserts() {
        let db = test_db();
        let tx = db.begin(&["bar".into()]).unwrap();

        tx.put("bar", &record(vec![("key", Value::Integer(1)), ("v", Value::Integer(10))]))
            .unwrap();
        tx.put("bar", &record(vec![("key", Value::Integer(1)), ("v", Value::Integer(20))]))
            .unwrap();

        let fetched = tx.get("bar", &Value::Integer(1)).unwrap().unwrap();
        assert_eq!(fetched.field("v").unwrap().as_integer(), Some(20));
    }

    #[test]
    fn delete_is_idempotent() {
        let db = test_db();
        let tx = db.begin(&["foo".into()]).unwrap();
        let key = tx.add("foo", &record(vec![])).unwrap();

        tx.delete("foo", &key).unwrap();
        tx.delete("foo", &key).unwrap();
        assert!(tx.get("foo", &key).unwrap().is_none());
    }

    #[test]
    fn query_orders_and_paginates() {
        let db = test_db();
        let tx = db.begin(&["foo".into()]).unwrap();
        for n in 1..=4 {
            tx.add("foo", &record(vec![("n", Value::Integer(n))])).unwrap();
        }

        let descending = tx
            .query("foo", &Query::all().descending().limit(2))
            .unwrap();
        assert_eq!(descending.len(), 2);
        assert_eq!(descending[0].field("id").unwrap().as_integer(), Some(4));
        assert_eq!(descending[1].field("id").unwrap().as_integer(), Some(3));

        let offset = tx.query("foo", &Query::all().offset(3)).unwrap();
        assert_eq!(offset.len(), 1);
        assert_eq!(offset[0].field("id").unwrap().as_integer(), Some(4));
    }

    #[test]
    fn query_filters_by_key_and_range() {
        let db = test_db();
        let tx = db.begin(&["foo".into()]).unwrap();
        for _ in 0..3 {
            tx.add("foo", &record(vec![])).unwrap();
        }

        let exact = tx
            .query("foo", &Query::all().key(Value::Integer(2)))
            .unwrap();
        assert_eq!(exact.len(), 1);

        let range = tx
            .query(
                "foo",
                &Query::all().range(Some(Value::Integer(2)), Some(Value::Integer(3))),
            )
            .unwrap();
        assert_eq!(range.len(), 2);
    }

    #[test]
    fn query_predicate_filters_records() {
        let db = test_db();
        let tx = db.begin(&["foo".into()]).unwrap();
        tx.add("foo", &record(vec![("kind", Value::from("a"))])).unwrap();
        tx.add("foo", &record(vec![("kind", Value::from("b"))])).unwrap();

        let matched = tx
            .query(
                "foo",
                &Query::all().predicate(|r| {
                    r.field("kind").and_then(|k| k.as_text()).as_deref() == Some("b")
                }),
            )
            .unwrap();
        assert_eq!(matched.len(), 1);
    }

    #[test]
    fn update_query_mutates_and_counts() {
        let db = test_db();
        let tx = db.begin(&["foo".into()]).unwrap();
        tx.add("foo", &record(vec![])).unwrap();
        tx.add("foo", &record(vec![])).unwrap();

        let count = tx
            .update_query("foo", &Query::all().limit(1), &mut |r| {
                r.set_field("marked", Value::Bool(true))?;
                Ok(())
            })
            .unwrap();
        assert_eq!(count, 1);

        let first = tx.get("foo", &Value::Integer(1)).unwrap().unwrap();
        let second = tx.get("foo", &Value::Integer(2)).unwrap().unwrap();
        assert_eq!(first.field("marked").unwrap().as_bool(), Some(true));
        assert!(second.field("marked").is_none());
    }

    #[test]
    fn writes_invisible_until_commit() {
        let db = test_db();
        let tx = db.begin(&["foo".into()]).unwrap();
        let key = tx.add("foo", &record(vec![])).unwrap();

        let reader = db.begin(&["foo".into()]).unwrap();
        assert!(reader.get("foo", &key).unwrap().is_none());

        tx.commit().unwrap();
        tx.wait_closed().unwrap();

        let reader = db.begin(&["foo".into()]).unwrap();
        assert!(reader.get("foo", &key).unwrap().is_some());
    }

    #[test]
    fn read_only_commit_does_not_clobber_concurrent_writes() {
        let db = test_db();
        let writer = db.begin(&["foo".into()]).unwrap();
        let reader = db.begin(&["foo".into()]).unwrap();

        let key = writer.add("foo", &record(vec![])).unwrap();
        writer.commit().unwrap();
        writer.wait_closed().unwrap();

        // The reader began before the write; closing it must not
        // publish its stale snapshot over the committed record.
        assert!(reader.get("foo", &key).unwrap().is_none());
        reader.commit().unwrap();
        reader.wait_closed().unwrap();

        let check = db.begin(&["foo".into()]).unwrap();
        assert!(check.get("foo", &key).unwrap().is_some());
    }

    #[test]
    fn abort_discards_writes() {
        let db = test_db();
        let tx = db.begin(&["foo".into()]).unwrap();
        let key = tx.add("foo", &record(vec![])).unwrap();

        tx.abort().unwrap();
        assert!(matches!(tx.wait_closed(), Err(StoreError::Aborted)));

        let reader = db.begin(&["foo".into()]).unwrap();
        assert!(reader.get("foo", &key).unwrap().is_none());
    }

    #[test]
    fn operations_fail_after_close() {
        let db = test_db();
        let tx = db.begin(&["foo".into()]).unwrap();
        tx.commit().unwrap();

        let result = tx.add("foo", &record(vec![]));
        assert!(matches!(result, Err(StoreError::TransactionClosed)));
    }

    #[test]
    fn idle_transaction_expires() {
        let db = test_db().lease(Duration::from_millis(40));
        let tx = db.begin(&["foo".into()]).unwrap();

        std::thread::sleep(Duration::from_millis(120));
        assert!(matches!(
            tx.get("foo", &Value::Integer(1)),
            Err(StoreError::Expired)
        ));
        assert!(matches!(tx.wait_closed(), Err(StoreError::Expired)));
    }

    #[test]
    fn touched_transaction_outlives_many_leases() {
        let db = test_db().lease(Duration::from_millis(100));
        let tx = db.begin(&["foo".into()]).unwrap();

        // Keep touching well inside the lease for several windows.
        for _ in 0..8 {
            std::thread::sleep(Duration::from_millis(25));
            tx.get("foo", &Value::Integer(1)).unwrap();
        }
        tx.commit().unwrap();
        tx.wait_closed().unwrap();
    }

    #[test]
    fn wait_closed_reports_expiry_without_operations() {
        let db = test_db().lease(Duration::from_millis(40));
        let tx = db.begin(&["foo".into()]).unwrap();
        assert!(matches!(tx.wait_closed(), Err(StoreError::Expired)));
    }

    #[test]
    fn begin_rejects_unknown_stores() {
        let db = test_db();
        let result = db.begin(&["nope".into()]);
        assert!(matches!(result, Err(StoreError::UnknownStore { .. })));
    }

    #[test]
    fn scope_is_enforced() {
        let db = test_db();
        let tx = db.begin(&["foo".into()]).unwrap();
        let result = tx.get("bar", &Value::Integer(1));
        assert!(matches!(result, Err(StoreError::OutOfScope { .. })));
    }

    #[test]
    fn store_names_are_sorted() {
        let db = test_db();
        assert_eq!(db.store_names(), vec!["bar".to_string(), "foo".to_string()]);
    }
}
