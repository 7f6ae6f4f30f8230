//! Counter table management.
//!
//! One row per ScopeKey, created lazily by the first reservation in that lane.
//! Repair locks live in the same table under the reserved `#LOCK` type tag.

use crate::code::MAX_SCOPE_LEN;
use crate::executor::{DbError, SeqExecutor};
use sea_query::{Alias, ColumnDef, Expr, Index, IndexCreateStatement, PostgresQueryBuilder, Table, TableCreateStatement};

/// Type tag of repair lock rows; never a valid document tag
pub const LOCK_TAG: &str = "#LOCK";

/// `CREATE TABLE` for the counter table
pub fn create_counter_table(name: &str) -> TableCreateStatement {
    Table::create()
        .table(Alias::new(name))
        .if_not_exists()
        .col(ColumnDef::new("doc_type").string().string_len(8).not_null())
        .col(ColumnDef::new("scope_code").string().string_len(MAX_SCOPE_LEN as u32).not_null())
        .col(ColumnDef::new("last_value").big_integer().not_null().default(0))
        .col(ColumnDef::new("updated_at").timestamp_with_time_zone().not_null())
        .to_owned()
}

/// Unique index the `ON CONFLICT (doc_type, scope_code)` clauses rely on
pub fn create_counter_key_index(name: &str) -> IndexCreateStatement {
    Index::create()
        .name(format!("uq_{name}_scope"))
        .table(Alias::new(name))
        .col(Expr::col("doc_type"))
        .col(Expr::col("scope_code"))
        .unique()
        .if_not_exists()
        .to_owned()
}

/// Create the counter table and its key index if they don't exist
pub fn initialize_counter_table(executor: &dyn SeqExecutor, name: &str) -> Result<(), DbError> {
    let table_sql = create_counter_table(name).build(PostgresQueryBuilder);
    executor.execute(&table_sql, &[])?;

    let index_sql = create_counter_key_index(name).build(PostgresQueryBuilder);
    executor.execute(&index_sql, &[])?;

    log::info!("Counter table {name} is ready");
    Ok(())
}

/// Double-quote an identifier taken from configuration
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Escape `LIKE` metacharacters so `prefix` matches literally
pub fn like_prefix(prefix: &str) -> String {
    let mut pattern = String::with_capacity(prefix.len() + 1);
    for ch in prefix.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(ch);
    }
    pattern.push('%');
    pattern
}
