//! PostgreSQL record store.
//!
//! Reads run on a pooled connection; each counter reservation runs in its own
//! transaction that locks the counter row of the target ScopeKey with
//! `SELECT ... FOR UPDATE`, so concurrent reservations for one lane serialize
//! and different lanes never wait on each other.

use super::schema::{like_prefix, quote_ident, LOCK_TAG};
use super::{CodeRow, CounterRow, EntityRef, RecordStore, StoreError, StoredRow};
use crate::code::{ScopeKey, TableKind};
use crate::config::{DatabaseConfig, TableSpec, TablesConfig};
use crate::connection::ConnectionError;
use crate::executor::{DbError, PgExecutor, SeqExecutor};
use crate::pool::{ConnectionPool, PooledClient};
use crate::transaction::Transaction;
use chrono::{DateTime, Utc};
use may_postgres::Row;

#[cfg(feature = "tracing")]
use crate::metrics::tracing_helpers;

pub struct PgRecordStore {
    pool: ConnectionPool,
    tables: TablesConfig,
}

impl PgRecordStore {
    pub fn new(pool: ConnectionPool, tables: TablesConfig) -> Self {
        Self { pool, tables }
    }

    /// Open a pool from `database` and wrap it
    pub fn connect(database: &DatabaseConfig, tables: TablesConfig) -> Result<Self, ConnectionError> {
        Ok(Self::new(ConnectionPool::connect(database)?, tables))
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    pub fn tables(&self) -> &TablesConfig {
        &self.tables
    }

    /// Run `f` with an executor on a checked-out connection
    pub fn with_executor<T>(
        &self,
        f: impl FnOnce(&PgExecutor) -> Result<T, DbError>,
    ) -> Result<T, StoreError> {
        let conn = self.checkout()?;
        let executor = PgExecutor::new(conn.client().clone());
        Ok(f(&executor)?)
    }

    /// Create the counter table if it does not exist yet
    pub fn initialize(&self) -> Result<(), StoreError> {
        let counters = self.tables.counters.clone();
        self.with_executor(|executor| super::schema::initialize_counter_table(executor, &counters))
    }

    /// Every counter row, lock rows excluded
    pub fn list_counters(&self) -> Result<Vec<CounterRow>, StoreError> {
        let sql = format!(
            "SELECT doc_type, scope_code, last_value, updated_at FROM {} WHERE doc_type <> $1 ORDER BY doc_type, scope_code",
            quote_ident(&self.tables.counters)
        );
        let rows = self.with_executor(|executor| executor.query_all(&sql, &[&LOCK_TAG]))?;
        rows.iter()
            .map(|row| {
                Ok(CounterRow {
                    doc_type: get(row, 0)?,
                    scope: get(row, 1)?,
                    last_value: get(row, 2)?,
                    updated_at: Some(get::<DateTime<Utc>>(row, 3)?),
                })
            })
            .collect()
    }

    fn checkout(&self) -> Result<PooledClient<'_>, StoreError> {
        self.pool.acquire().map_err(|e| StoreError::Unavailable(e.to_string()))
    }

    fn spec(&self, table: TableKind) -> &TableSpec {
        self.tables.spec(table)
    }

    fn reserve_in(
        &self,
        tx: &Transaction,
        key: &ScopeKey,
        floor: u32,
        count: u32,
    ) -> Result<u32, StoreError> {
        let counters = quote_ident(&self.tables.counters);
        let tag = key.doc_type.tag();

        tx.execute(
            &format!(
                "INSERT INTO {counters} (doc_type, scope_code, last_value, updated_at) \
                 VALUES ($1, $2, 0, NOW()) ON CONFLICT (doc_type, scope_code) DO NOTHING"
            ),
            &[&tag, &key.scope],
        )?;

        let row = tx.query_one(
            &format!(
                "SELECT last_value FROM {counters} WHERE doc_type = $1 AND scope_code = $2 FOR UPDATE"
            ),
            &[&tag, &key.scope],
        )?;
        let last: i64 = get(&row, 0)?;

        let next = last.max(i64::from(floor)) + i64::from(count);
        let next = u32::try_from(next)
            .map_err(|_| StoreError::Corrupt(format!("counter {key} out of range: {next}")))?;

        tx.execute(
            &format!(
                "UPDATE {counters} SET last_value = $3, updated_at = NOW() \
                 WHERE doc_type = $1 AND scope_code = $2"
            ),
            &[&tag, &key.scope, &i64::from(next)],
        )?;
        Ok(next)
    }
}

fn get<T>(row: &Row, idx: usize) -> Result<T, StoreError>
where
    T: for<'a> may_postgres::types::FromSql<'a>,
{
    row.try_get::<usize, T>(idx)
        .map_err(|e| StoreError::Database(DbError::ParseError(format!("column {idx}: {e}"))))
}

impl RecordStore for PgRecordStore {
    fn query_by_code_prefix(
        &self,
        table: TableKind,
        prefix: &str,
        limit: usize,
    ) -> Result<Vec<CodeRow>, StoreError> {
        let spec = self.spec(table);
        let code = quote_ident(&spec.code_column);
        let created = quote_ident(&spec.created_column);
        let sql = format!(
            "SELECT {code}, {created}::timestamptz FROM {} \
             WHERE {code} LIKE $1 ESCAPE '\\' ORDER BY {created} DESC LIMIT $2",
            quote_ident(&spec.name)
        );
        let pattern = like_prefix(prefix);
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        let rows = self.with_executor(|executor| executor.query_all(&sql, &[&pattern, &limit]))?;
        rows.iter()
            .map(|row| Ok(CodeRow { code: get(row, 0)?, created_at: get(row, 1)? }))
            .collect()
    }

    fn lookup_scope_code(&self, entity: &EntityRef) -> Result<Option<String>, StoreError> {
        match entity {
            EntityRef::CostCenter(id) => {
                let spec = &self.tables.cost_centers;
                let sql = format!(
                    "SELECT {} FROM {} WHERE {} = $1",
                    quote_ident(&spec.code_column),
                    quote_ident(&spec.name),
                    quote_ident(&spec.id_column)
                );
                let rows = self.with_executor(|executor| executor.query_all(&sql, &[id]))?;
                match rows.first() {
                    Some(row) => get::<Option<String>>(row, 0),
                    None => Ok(None),
                }
            }
        }
    }

    fn reserve(&self, key: &ScopeKey, floor: u32, count: u32) -> Result<u32, StoreError> {
        #[cfg(feature = "tracing")]
        let _span = tracing_helpers::reserve_span(key.doc_type.tag(), &key.scope).entered();

        let conn = self.checkout()?;
        let tx = Transaction::begin(conn.client().clone())?;
        // Dropping `tx` on error rolls back and releases the row lock
        let next = self.reserve_in(&tx, key, floor, count)?;
        tx.commit()?;

        log::debug!("Reserved {count} value(s) in {key}, counter now {next}");
        Ok(next)
    }

    fn counter_value(&self, key: &ScopeKey) -> Result<Option<u32>, StoreError> {
        let sql = format!(
            "SELECT last_value FROM {} WHERE doc_type = $1 AND scope_code = $2",
            quote_ident(&self.tables.counters)
        );
        let tag = key.doc_type.tag();
        let rows = self.with_executor(|executor| executor.query_all(&sql, &[&tag, &key.scope]))?;
        match rows.first() {
            Some(row) => {
                let last: i64 = get(row, 0)?;
                u32::try_from(last)
                    .map(Some)
                    .map_err(|_| StoreError::Corrupt(format!("counter {key} out of range: {last}")))
            }
            None => Ok(None),
        }
    }

    fn load_rows(&self, table: TableKind) -> Result<Vec<StoredRow>, StoreError> {
        let spec = self.spec(table);
        let id = quote_ident(&spec.id_column);
        let created = quote_ident(&spec.created_column);
        let sql = format!(
            "SELECT {id}::text, {}, {created}::timestamptz FROM {} ORDER BY {created} ASC, {id} ASC",
            quote_ident(&spec.code_column),
            quote_ident(&spec.name)
        );

        let rows = self.with_executor(|executor| executor.query_all(&sql, &[]))?;
        rows.iter()
            .map(|row| {
                Ok(StoredRow {
                    id: get(row, 0)?,
                    code: get(row, 1)?,
                    created_at: get(row, 2)?,
                })
            })
            .collect()
    }

    fn update_code(&self, table: TableKind, id: &str, code: &str) -> Result<(), StoreError> {
        let spec = self.spec(table);
        let sql = format!(
            "UPDATE {} SET {} = $1 WHERE {}::text = $2",
            quote_ident(&spec.name),
            quote_ident(&spec.code_column),
            quote_ident(&spec.id_column)
        );
        let affected = self.with_executor(|executor| executor.execute(&sql, &[&code, &id]))?;
        if affected == 0 {
            return Err(StoreError::Corrupt(format!("row {id} no longer exists in {}", spec.name)));
        }
        Ok(())
    }

    fn reset_counter(&self, key: &ScopeKey, value: u32) -> Result<(), StoreError> {
        let sql = format!(
            "INSERT INTO {} (doc_type, scope_code, last_value, updated_at) VALUES ($1, $2, $3, NOW()) \
             ON CONFLICT (doc_type, scope_code) DO UPDATE SET last_value = EXCLUDED.last_value, updated_at = NOW()",
            quote_ident(&self.tables.counters)
        );
        let tag = key.doc_type.tag();
        self.with_executor(|executor| executor.execute(&sql, &[&tag, &key.scope, &i64::from(value)]))?;
        Ok(())
    }

    fn try_lock_table(&self, table: TableKind) -> Result<bool, StoreError> {
        // Flyway-style lock row: whoever inserts it holds the lock
        let sql = format!(
            "INSERT INTO {} (doc_type, scope_code, last_value, updated_at) VALUES ($1, $2, 0, NOW()) \
             ON CONFLICT (doc_type, scope_code) DO NOTHING",
            quote_ident(&self.tables.counters)
        );
        let name = table.as_str();
        let inserted = self.with_executor(|executor| executor.execute(&sql, &[&LOCK_TAG, &name]))?;
        Ok(inserted > 0)
    }

    fn unlock_table(&self, table: TableKind) -> Result<(), StoreError> {
        let sql = format!(
            "DELETE FROM {} WHERE doc_type = $1 AND scope_code = $2",
            quote_ident(&self.tables.counters)
        );
        let name = table.as_str();
        self.with_executor(|executor| executor.execute(&sql, &[&LOCK_TAG, &name]))?;
        Ok(())
    }
}
