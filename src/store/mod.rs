//! Record store seam.
//!
//! The allocator never talks to a database directly; it goes through
//! [`RecordStore`], which exposes the handful of reads and transactional
//! primitives code sequencing needs. [`PgRecordStore`] is the PostgreSQL
//! implementation and [`MemoryStore`] an in-process one.

pub mod memory;
pub mod postgres;
pub mod schema;

pub use memory::MemoryStore;
pub use postgres::PgRecordStore;

use crate::code::{ScopeKey, TableKind};
use crate::executor::DbError;
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// A code and the creation time of the record that carries it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeRow {
    pub code: String,
    pub created_at: DateTime<Utc>,
}

/// A full record as seen by the repair service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRow {
    pub id: String,
    pub code: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Entity whose own code becomes a scope code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityRef {
    CostCenter(Uuid),
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityRef::CostCenter(id) => write!(f, "cost center {id}"),
        }
    }
}

/// Persisted counter of one scope lane
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterRow {
    pub doc_type: String,
    pub scope: String,
    pub last_value: i64,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Record store error type
#[derive(Debug)]
pub enum StoreError {
    /// Error reported by the database
    Database(DbError),
    /// Unique constraint violation (duplicate code)
    UniqueViolation(String),
    /// No connection could be obtained
    Unavailable(String),
    /// Stored state is not what the operation expected
    Corrupt(String),
}

impl StoreError {
    pub fn is_unique_violation(&self) -> bool {
        matches!(self, StoreError::UniqueViolation(_))
    }

    /// Whether the same call may succeed later (lost connection, empty pool,
    /// timeout, lock conflict)
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Database(e) => e.is_transient(),
            StoreError::Unavailable(_) => true,
            StoreError::UniqueViolation(_) | StoreError::Corrupt(_) => false,
        }
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Database(e) => write!(f, "{e}"),
            StoreError::UniqueViolation(s) => write!(f, "Unique constraint violated: {s}"),
            StoreError::Unavailable(s) => write!(f, "Record store unavailable: {s}"),
            StoreError::Corrupt(s) => write!(f, "Unexpected stored state: {s}"),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::Database(e) => Some(e),
            _ => None,
        }
    }
}

impl From<DbError> for StoreError {
    fn from(err: DbError) -> Self {
        if err.is_unique_violation() {
            StoreError::UniqueViolation(err.to_string())
        } else {
            StoreError::Database(err)
        }
    }
}

/// Operations the sequencing subsystem needs from the record store
pub trait RecordStore {
    /// Most recent codes (by creation time, descending) starting with `prefix`
    fn query_by_code_prefix(
        &self,
        table: TableKind,
        prefix: &str,
        limit: usize,
    ) -> Result<Vec<CodeRow>, StoreError>;

    /// Code of the referenced entity, `None` when it does not exist
    fn lookup_scope_code(&self, entity: &EntityRef) -> Result<Option<String>, StoreError>;

    /// Last value of `key`'s counter, `None` before the lane's first reservation
    fn counter_value(&self, key: &ScopeKey) -> Result<Option<u32>, StoreError>;

    /// Atomically advance the counter of `key` to `max(last, floor) + count`,
    /// creating it on first use, and return the new last value.
    ///
    /// Implementations serialize concurrent calls for the same key while
    /// letting different keys proceed in parallel.
    fn reserve(&self, key: &ScopeKey, floor: u32, count: u32) -> Result<u32, StoreError>;

    /// Every row of a table ordered by creation time ascending
    fn load_rows(&self, table: TableKind) -> Result<Vec<StoredRow>, StoreError>;

    /// Overwrite the code of one row
    fn update_code(&self, table: TableKind, id: &str, code: &str) -> Result<(), StoreError>;

    /// Set the counter of `key` to exactly `value`
    fn reset_counter(&self, key: &ScopeKey, value: u32) -> Result<(), StoreError>;

    /// Take the exclusive maintenance lock of a table; `false` when already held
    fn try_lock_table(&self, table: TableKind) -> Result<bool, StoreError>;

    fn unlock_table(&self, table: TableKind) -> Result<(), StoreError>;
}

impl<T: RecordStore + ?Sized> RecordStore for &T {
    fn query_by_code_prefix(&self, table: TableKind, prefix: &str, limit: usize) -> Result<Vec<CodeRow>, StoreError> {
        (**self).query_by_code_prefix(table, prefix, limit)
    }
    fn lookup_scope_code(&self, entity: &EntityRef) -> Result<Option<String>, StoreError> {
        (**self).lookup_scope_code(entity)
    }
    fn counter_value(&self, key: &ScopeKey) -> Result<Option<u32>, StoreError> {
        (**self).counter_value(key)
    }
    fn reserve(&self, key: &ScopeKey, floor: u32, count: u32) -> Result<u32, StoreError> {
        (**self).reserve(key, floor, count)
    }
    fn load_rows(&self, table: TableKind) -> Result<Vec<StoredRow>, StoreError> {
        (**self).load_rows(table)
    }
    fn update_code(&self, table: TableKind, id: &str, code: &str) -> Result<(), StoreError> {
        (**self).update_code(table, id, code)
    }
    fn reset_counter(&self, key: &ScopeKey, value: u32) -> Result<(), StoreError> {
        (**self).reset_counter(key, value)
    }
    fn try_lock_table(&self, table: TableKind) -> Result<bool, StoreError> {
        (**self).try_lock_table(table)
    }
    fn unlock_table(&self, table: TableKind) -> Result<(), StoreError> {
        (**self).unlock_table(table)
    }
}

impl<T: RecordStore + ?Sized> RecordStore for Arc<T> {
    fn query_by_code_prefix(&self, table: TableKind, prefix: &str, limit: usize) -> Result<Vec<CodeRow>, StoreError> {
        (**self).query_by_code_prefix(table, prefix, limit)
    }
    fn lookup_scope_code(&self, entity: &EntityRef) -> Result<Option<String>, StoreError> {
        (**self).lookup_scope_code(entity)
    }
    fn counter_value(&self, key: &ScopeKey) -> Result<Option<u32>, StoreError> {
        (**self).counter_value(key)
    }
    fn reserve(&self, key: &ScopeKey, floor: u32, count: u32) -> Result<u32, StoreError> {
        (**self).reserve(key, floor, count)
    }
    fn load_rows(&self, table: TableKind) -> Result<Vec<StoredRow>, StoreError> {
        (**self).load_rows(table)
    }
    fn update_code(&self, table: TableKind, id: &str, code: &str) -> Result<(), StoreError> {
        (**self).update_code(table, id, code)
    }
    fn reset_counter(&self, key: &ScopeKey, value: u32) -> Result<(), StoreError> {
        (**self).reset_counter(key, value)
    }
    fn try_lock_table(&self, table: TableKind) -> Result<bool, StoreError> {
        (**self).try_lock_table(table)
    }
    fn unlock_table(&self, table: TableKind) -> Result<(), StoreError> {
        (**self).unlock_table(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(StoreError::Unavailable("pool exhausted".into()).is_transient());
        assert!(!StoreError::Corrupt("counter out of range".into()).is_transient());
        assert!(!StoreError::UniqueViolation("code".into()).is_transient());
        assert!(!StoreError::Database(DbError::ParseError("column 0".into())).is_transient());
    }

    #[test]
    fn test_unique_violation_from_db_error_is_not_detected_for_other_errors() {
        let err = StoreError::from(DbError::Other("relation does not exist".into()));
        assert!(!err.is_unique_violation());
        assert!(!err.is_transient());
    }
}
