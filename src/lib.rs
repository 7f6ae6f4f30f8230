//! # seqguard
//!
//! Scope-local, concurrency-safe document code sequencing on PostgreSQL for
//! the `may` coroutine runtime.
//!
//! Codes look like `ROM-AL-ALM001-0001` (type, organization, scope, sequence)
//! or, for inventory items, a bare `10040`. Each `(type, scope)` pair is an
//! independent numbering lane backed by a counter row that is locked for the
//! duration of a reservation, so concurrent callers in one lane never receive
//! the same code and different lanes never wait on each other.
//!
//! ```
//! use seqguard::{allocate_code, AllocatorConfig, DocumentType, MemoryStore, ScopeRef};
//!
//! let store = MemoryStore::new();
//! let scope = ScopeRef::code("ALM001");
//! let config = AllocatorConfig::default();
//!
//! let first = allocate_code(&store, &config, &DocumentType::OutboundManifest, &scope).unwrap();
//! let second = allocate_code(&store, &config, &DocumentType::OutboundManifest, &scope).unwrap();
//! assert_eq!(first.code().as_str(), "ROM-AL-ALM001-0001");
//! assert_eq!(second.code().as_str(), "ROM-AL-ALM001-0002");
//! ```

pub mod allocator;
pub mod code;
pub mod config;
pub mod connection;
pub mod error;
pub mod executor;
pub mod metrics;
pub mod pool;
pub mod repair;
pub mod scanner;
pub mod scope;
pub mod store;
pub mod transaction;

#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers;

pub use allocator::{Allocation, AllocationState, BulkAllocation, CodeAllocator, InsertError};
pub use code::{Code, DocumentType, FormatError, ParsedCode, ScopeKey, TableKind};
pub use config::{AllocatorConfig, DatabaseConfig, FallbackPolicy, RepairConfig, ScopePolicy, SeqguardConfig};
pub use connection::{connect, validate_connection_string, ConnectionError};
pub use error::SeqError;
pub use executor::{DbError, PgExecutor, SeqExecutor};
pub use pool::ConnectionPool;
pub use repair::{CodeRepairService, RepairOptions, RepairPartialFailure, RepairReport};
pub use scope::{ScopeRef, ScopeResolver};
pub use store::{MemoryStore, PgRecordStore, RecordStore, StoreError};
pub use transaction::Transaction;

/// Allocate the next code of `doc_type` in the lane `scope_ref` resolves to
pub fn allocate_code<S: RecordStore>(
    store: S,
    config: &AllocatorConfig,
    doc_type: &DocumentType,
    scope_ref: &ScopeRef,
) -> Result<Allocation, SeqError> {
    CodeAllocator::new(store, config.clone()).allocate(doc_type, scope_ref)
}

/// Allocate `count` consecutive codes in one lane
pub fn allocate_bulk_codes<S: RecordStore>(
    store: S,
    config: &AllocatorConfig,
    doc_type: &DocumentType,
    scope_ref: &ScopeRef,
    count: u32,
) -> Result<BulkAllocation, SeqError> {
    CodeAllocator::new(store, config.clone()).allocate_bulk(doc_type, scope_ref, count)
}

/// Renumber every record of `table` in creation order
pub fn repair_sequential_codes<S: RecordStore>(
    store: S,
    config: &RepairConfig,
    table: TableKind,
    options: RepairOptions,
) -> Result<RepairReport, SeqError> {
    CodeRepairService::new(store, config.clone()).repair(table, options)
}

/// Split a code into type, scope and sequence; `None` when it matches no grammar
pub fn parse_code(code: &str) -> Option<ParsedCode> {
    code::parse_code(code)
}
