//! In-process record store.
//!
//! Holds tables, cost centers and counters in memory with the same
//! concurrency contract as the PostgreSQL store: one lock per ScopeKey for
//! reservations. Failures can be injected to exercise retry and fallback
//! paths.

use super::{CodeRow, EntityRef, RecordStore, StoreError, StoredRow};
use crate::code::{ScopeKey, TableKind};
use crate::executor::DbError;
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

#[derive(Debug, Clone)]
struct MemoryRow {
    id: String,
    code: Option<String>,
    created_at: DateTime<Utc>,
    insertion: u64,
}

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<HashMap<TableKind, Vec<MemoryRow>>>,
    cost_centers: Mutex<HashMap<Uuid, String>>,
    counters: Mutex<HashMap<ScopeKey, Arc<Mutex<u32>>>>,
    locks: Mutex<HashSet<TableKind>>,
    failing_updates: Mutex<HashSet<String>>,
    unique_codes: Mutex<HashSet<TableKind>>,
    fail_reads: AtomicU32,
    reject_reads: AtomicU32,
    fail_lookups: AtomicU32,
    next_row: AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Consume one unit of an injected failure budget
fn take_failure(budget: &AtomicU32) -> bool {
    budget
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject inserts of a code already present in `table`, like a unique index
    pub fn enforce_unique_codes(&self, table: TableKind) {
        lock(&self.unique_codes).insert(table);
    }

    pub fn add_cost_center(&self, id: Uuid, code: &str) {
        lock(&self.cost_centers).insert(id, code.to_string());
    }

    /// Insert a record created "now" (strictly after every earlier insert)
    pub fn insert_record(&self, table: TableKind, code: &str) -> Result<String, StoreError> {
        let insertion = self.next_row.fetch_add(1, Ordering::SeqCst);
        let created_at = epoch() + Duration::seconds(insertion as i64);
        self.insert_row(table, Some(code.to_string()), created_at, insertion)
    }

    /// Insert a record with an explicit creation time
    pub fn insert_record_at(
        &self,
        table: TableKind,
        code: Option<&str>,
        created_at: DateTime<Utc>,
    ) -> Result<String, StoreError> {
        let insertion = self.next_row.fetch_add(1, Ordering::SeqCst);
        self.insert_row(table, code.map(str::to_string), created_at, insertion)
    }

    fn insert_row(
        &self,
        table: TableKind,
        code: Option<String>,
        created_at: DateTime<Utc>,
        insertion: u64,
    ) -> Result<String, StoreError> {
        let unique = lock(&self.unique_codes).contains(&table);
        let mut tables = lock(&self.tables);
        let rows = tables.entry(table).or_default();
        if let (true, Some(code)) = (unique, &code) {
            if rows.iter().any(|r| r.code.as_ref() == Some(code)) {
                return Err(StoreError::UniqueViolation(format!("{table}.code = {code}")));
            }
        }
        let id = format!("{}-{insertion}", table.as_str());
        rows.push(MemoryRow { id: id.clone(), code, created_at, insertion });
        Ok(id)
    }

    /// Codes of `table` in creation order
    pub fn codes(&self, table: TableKind) -> Vec<String> {
        self.sorted_rows(table).into_iter().filter_map(|r| r.code).collect()
    }

    /// Current counter value of a lane, if it was ever reserved
    pub fn counter(&self, key: &ScopeKey) -> Option<u32> {
        let slot = lock(&self.counters).get(key).cloned()?;
        let value = *lock(&slot);
        Some(value)
    }

    /// Make the next `n` counter reads, prefix queries and reservations fail
    /// with a transient error
    pub fn fail_next_reads(&self, n: u32) {
        self.fail_reads.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` reads fail with a permanent database error, like a
    /// missing table
    pub fn reject_next_reads(&self, n: u32) {
        self.reject_reads.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` scope lookups fail
    pub fn fail_next_lookups(&self, n: u32) {
        self.fail_lookups.store(n, Ordering::SeqCst);
    }

    /// Make every update of row `id` fail
    pub fn fail_updates_for(&self, id: &str) {
        lock(&self.failing_updates).insert(id.to_string());
    }

    pub fn is_locked(&self, table: TableKind) -> bool {
        lock(&self.locks).contains(&table)
    }

    fn sorted_rows(&self, table: TableKind) -> Vec<MemoryRow> {
        let mut rows = lock(&self.tables).get(&table).cloned().unwrap_or_default();
        rows.sort_by_key(|r| (r.created_at, r.insertion));
        rows
    }

    fn counter_slot(&self, key: &ScopeKey) -> Arc<Mutex<u32>> {
        Arc::clone(lock(&self.counters).entry(key.clone()).or_default())
    }

    fn injected_read_failure(&self) -> Result<(), StoreError> {
        if take_failure(&self.reject_reads) {
            return Err(StoreError::Database(DbError::Other("injected permanent failure".to_string())));
        }
        if take_failure(&self.fail_reads) {
            return Err(StoreError::Unavailable("injected read failure".to_string()));
        }
        Ok(())
    }
}

fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
        .single()
        .unwrap_or_else(Utc::now)
}

impl RecordStore for MemoryStore {
    fn query_by_code_prefix(
        &self,
        table: TableKind,
        prefix: &str,
        limit: usize,
    ) -> Result<Vec<CodeRow>, StoreError> {
        self.injected_read_failure()?;
        Ok(self
            .sorted_rows(table)
            .into_iter()
            .rev()
            .filter_map(|r| {
                let code = r.code?;
                code.starts_with(prefix).then_some(CodeRow { code, created_at: r.created_at })
            })
            .take(limit)
            .collect())
    }

    fn lookup_scope_code(&self, entity: &EntityRef) -> Result<Option<String>, StoreError> {
        if take_failure(&self.fail_lookups) {
            return Err(StoreError::Unavailable("injected lookup failure".to_string()));
        }
        match entity {
            EntityRef::CostCenter(id) => Ok(lock(&self.cost_centers).get(id).cloned()),
        }
    }

    fn counter_value(&self, key: &ScopeKey) -> Result<Option<u32>, StoreError> {
        self.injected_read_failure()?;
        Ok(self.counter(key))
    }

    fn reserve(&self, key: &ScopeKey, floor: u32, count: u32) -> Result<u32, StoreError> {
        self.injected_read_failure()?;
        let slot = self.counter_slot(key);
        let mut last = lock(&slot);
        let next = (*last).max(floor).checked_add(count).ok_or_else(|| {
            StoreError::Corrupt(format!("counter {key} overflow"))
        })?;
        *last = next;
        Ok(next)
    }

    fn load_rows(&self, table: TableKind) -> Result<Vec<StoredRow>, StoreError> {
        self.injected_read_failure()?;
        Ok(self
            .sorted_rows(table)
            .into_iter()
            .map(|r| StoredRow { id: r.id, code: r.code, created_at: r.created_at })
            .collect())
    }

    fn update_code(&self, table: TableKind, id: &str, code: &str) -> Result<(), StoreError> {
        if lock(&self.failing_updates).contains(id) {
            return Err(StoreError::Unavailable(format!("injected update failure for {id}")));
        }
        let unique = lock(&self.unique_codes).contains(&table);
        let mut tables = lock(&self.tables);
        let rows = tables.entry(table).or_default();
        if unique && rows.iter().any(|r| r.id != id && r.code.as_deref() == Some(code)) {
            return Err(StoreError::UniqueViolation(format!("{table}.code = {code}")));
        }
        match rows.iter_mut().find(|r| r.id == id) {
            Some(row) => {
                row.code = Some(code.to_string());
                Ok(())
            }
            None => Err(StoreError::Corrupt(format!("row {id} no longer exists in {table}"))),
        }
    }

    fn reset_counter(&self, key: &ScopeKey, value: u32) -> Result<(), StoreError> {
        let slot = self.counter_slot(key);
        *lock(&slot) = value;
        Ok(())
    }

    fn try_lock_table(&self, table: TableKind) -> Result<bool, StoreError> {
        Ok(lock(&self.locks).insert(table))
    }

    fn unlock_table(&self, table: TableKind) -> Result<(), StoreError> {
        lock(&self.locks).remove(&table);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::code::DocumentType;

    #[test]
    fn test_prefix_query_is_newest_first_and_limited() {
        let store = MemoryStore::new();
        for code in ["ROM-AL-ALM001-0001", "ROM-AL-ALM002-0001", "ROM-AL-ALM001-0002", "ROM-AL-ALM001-0003"] {
            store.insert_record(TableKind::Manifests, code).unwrap();
        }
        let rows = store.query_by_code_prefix(TableKind::Manifests, "ROM-AL-ALM001-", 2).unwrap();
        let codes: Vec<_> = rows.into_iter().map(|r| r.code).collect();
        assert_eq!(codes, vec!["ROM-AL-ALM001-0003", "ROM-AL-ALM001-0002"]);
    }

    #[test]
    fn test_reserve_respects_floor_and_count() {
        let store = MemoryStore::new();
        let key = ScopeKey::new(DocumentType::OutboundManifest, "ALM001");
        assert_eq!(store.reserve(&key, 0, 1).unwrap(), 1);
        assert_eq!(store.reserve(&key, 0, 3).unwrap(), 4);
        assert_eq!(store.reserve(&key, 10, 1).unwrap(), 11);
        assert_eq!(store.reserve(&key, 5, 1).unwrap(), 12);
        assert_eq!(store.counter(&key), Some(12));
    }

    #[test]
    fn test_injected_failures_are_consumed() {
        let store = MemoryStore::new();
        store.fail_next_reads(2);
        assert!(store.query_by_code_prefix(TableKind::Manifests, "", 10).is_err());
        assert!(store.reserve(&ScopeKey::inventory_items(), 0, 1).is_err());
        assert!(store.query_by_code_prefix(TableKind::Manifests, "", 10).is_ok());
    }

    #[test]
    fn test_rejected_reads_are_permanent_errors() {
        let store = MemoryStore::new();
        store.reject_next_reads(1);
        store.fail_next_reads(1);
        let key = ScopeKey::inventory_items();
        assert!(!store.counter_value(&key).unwrap_err().is_transient());
        assert!(store.counter_value(&key).unwrap_err().is_transient());
        assert_eq!(store.counter_value(&key).unwrap(), None);
        store.reserve(&key, 10_039, 1).unwrap();
        assert_eq!(store.counter_value(&key).unwrap(), Some(10_040));
    }

    #[test]
    fn test_unique_codes_enforced_when_enabled() {
        let store = MemoryStore::new();
        store.insert_record(TableKind::Materials, "10001").unwrap();
        store.insert_record(TableKind::Materials, "10001").unwrap();

        store.enforce_unique_codes(TableKind::Requisitions);
        store.insert_record(TableKind::Requisitions, "SCO-AL-1000-0001").unwrap();
        let err = store.insert_record(TableKind::Requisitions, "SCO-AL-1000-0001").unwrap_err();
        assert!(err.is_unique_violation());
    }

    #[test]
    fn test_table_lock_is_exclusive() {
        let store = MemoryStore::new();
        assert!(store.try_lock_table(TableKind::Materials).unwrap());
        assert!(!store.try_lock_table(TableKind::Materials).unwrap());
        assert!(store.try_lock_table(TableKind::Manifests).unwrap());
        store.unlock_table(TableKind::Materials).unwrap();
        assert!(store.try_lock_table(TableKind::Materials).unwrap());
    }
}
