//! Helpers for tests that run against a real PostgreSQL database.
//!
//! Tests call [`TestDatabase::from_env`] and return early when
//! `TEST_DATABASE_URL` is not set, so the suite passes on machines without a
//! database. Each [`TestDatabase`] gets its own uniquely named tables.

use crate::code::TableKind;
use crate::config::{CostCenterSpec, DatabaseConfig, TableSpec, TablesConfig};
use crate::executor::{DbError, SeqExecutor};
use crate::store::{PgRecordStore, StoreError};
use uuid::Uuid;

pub const TEST_DATABASE_URL: &str = "TEST_DATABASE_URL";

pub struct TestDatabase {
    store: PgRecordStore,
}

impl TestDatabase {
    /// Connect and create a fresh set of tables, `None` when no database is configured
    pub fn from_env() -> Option<Self> {
        Self::open(false, None)
    }

    /// Like [`TestDatabase::from_env`], with a unique index on every code column
    pub fn from_env_with_unique_codes() -> Option<Self> {
        Self::open(true, None)
    }

    /// Like [`TestDatabase::from_env`], with every pooled session limited to
    /// `statement_timeout_ms`
    pub fn from_env_with_statement_timeout(statement_timeout_ms: u64) -> Option<Self> {
        Self::open(false, Some(statement_timeout_ms))
    }

    fn open(unique_codes: bool, statement_timeout_ms: Option<u64>) -> Option<Self> {
        let url = std::env::var(TEST_DATABASE_URL).ok()?;
        match Self::connect(&url, unique_codes, statement_timeout_ms) {
            Ok(db) => Some(db),
            Err(e) => panic!("{TEST_DATABASE_URL} is set but the test database is unusable: {e}"),
        }
    }

    fn connect(url: &str, unique_codes: bool, statement_timeout_ms: Option<u64>) -> Result<Self, StoreError> {
        let suffix = Uuid::new_v4().simple().to_string();
        let suffix = &suffix[..12];
        let tables = TablesConfig {
            requisitions: TableSpec::named(&format!("t_{suffix}_requisitions")),
            documents: TableSpec::named(&format!("t_{suffix}_documents")),
            manifests: TableSpec::named(&format!("t_{suffix}_manifests")),
            materials: TableSpec::named(&format!("t_{suffix}_materials")),
            cost_centers: CostCenterSpec {
                name: format!("t_{suffix}_cost_centers"),
                ..CostCenterSpec::default()
            },
            counters: format!("t_{suffix}_counters"),
        };

        let mut database = DatabaseConfig { url: url.to_string(), max_connections: 4, ..DatabaseConfig::default() };
        if let Some(ms) = statement_timeout_ms {
            database.statement_timeout_ms = ms;
        }
        let store = PgRecordStore::connect(&database, tables)
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        let unique = if unique_codes { " UNIQUE" } else { "" };
        let tables = store.tables().clone();
        store.with_executor(|executor| {
            for table in TableKind::ALL {
                executor.execute(
                    &format!(
                        "CREATE TABLE {} (id BIGSERIAL PRIMARY KEY, code TEXT{unique}, \
                         created_at TIMESTAMPTZ NOT NULL DEFAULT clock_timestamp())",
                        tables.spec(table).name
                    ),
                    &[],
                )?;
            }
            executor.execute(
                &format!("CREATE TABLE {} (id UUID PRIMARY KEY, codigo TEXT)", tables.cost_centers.name),
                &[],
            )?;
            Ok(())
        })?;
        store.initialize()?;

        Ok(Self { store })
    }

    pub fn store(&self) -> &PgRecordStore {
        &self.store
    }

    /// Drop the counter table, as if the schema was never initialized
    pub fn drop_counter_table(&self) -> Result<(), StoreError> {
        let name = self.store.tables().counters.clone();
        self.store.with_executor(|executor| executor.execute(&format!("DROP TABLE {name}"), &[]))?;
        Ok(())
    }

    /// Insert a record carrying `code`, returning its id
    pub fn insert_record(&self, table: TableKind, code: &str) -> Result<String, StoreError> {
        let name = self.store.tables().spec(table).name.clone();
        let row = self.store.with_executor(|executor| {
            executor.query_one(&format!("INSERT INTO {name} (code) VALUES ($1) RETURNING id::text"), &[&code])
        })?;
        row.try_get::<usize, String>(0)
            .map_err(|e| StoreError::Database(DbError::ParseError(e.to_string())))
    }

    pub fn add_cost_center(&self, id: Uuid, code: &str) -> Result<(), StoreError> {
        let name = self.store.tables().cost_centers.name.clone();
        self.store.with_executor(|executor| {
            executor.execute(&format!("INSERT INTO {name} (id, codigo) VALUES ($1, $2)"), &[&id, &code])
        })?;
        Ok(())
    }

    /// Codes of `table` in creation order
    pub fn codes(&self, table: TableKind) -> Result<Vec<String>, StoreError> {
        let name = self.store.tables().spec(table).name.clone();
        let rows = self.store.with_executor(|executor| {
            executor.query_all(&format!("SELECT code FROM {name} ORDER BY created_at, id"), &[])
        })?;
        rows.iter()
            .map(|row| {
                row.try_get::<usize, String>(0)
                    .map_err(|e| StoreError::Database(DbError::ParseError(e.to_string())))
            })
            .collect()
    }
}

impl Drop for TestDatabase {
    fn drop(&mut self) {
        let tables = self.store.tables().clone();
        let mut names: Vec<String> = TableKind::ALL.iter().map(|t| tables.spec(*t).name.clone()).collect();
        names.push(tables.cost_centers.name.clone());
        names.push(tables.counters.clone());
        let sql = format!("DROP TABLE IF EXISTS {}", names.join(", "));
        if let Err(e) = self.store.with_executor(|executor| executor.execute(&sql, &[])) {
            log::warn!("Failed to drop test tables: {e}");
        }
    }
}
