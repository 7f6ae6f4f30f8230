//! Code allocation.
//!
//! One allocation walks `Idle -> ResolvingScope -> Scanning -> Formatting`
//! and ends in `Succeeded`, `FallbackApplied` or `Failed`:
//!
//! 1. the scope reference is resolved to a canonical scope code,
//! 2. the lane counter is advanced in one locked reservation
//!    ([`RecordStore::reserve`]); a lane without a counter is first seeded
//!    from a scan of its most recent codes,
//! 3. the reserved value is rendered with the type's template.
//!
//! Once a lane has a counter, the counter alone decides the next value.
//!
//! Transient store failures during step 2 (lost connection, timeout, lock
//! conflict) are retried with jittered backoff; once the retries are spent the
//! configured [`FallbackPolicy`] decides between failing and issuing a
//! clock-seeded code flagged as [`Allocation::FallbackApplied`]. Permanent
//! store errors fail the call at once as [`SeqError::StoreRejected`].
//! The allocator never writes owning records; [`CodeAllocator::allocate_and_insert`]
//! runs the caller's insert and retries it on unique-constraint collisions.

mod bulk;
mod retry;

pub use bulk::BulkAllocation;

use crate::code::{format_code, validate_scope, Code, DocumentType, ScopeKey};
use crate::config::{AllocatorConfig, FallbackPolicy, ScopePolicy};
use crate::error::SeqError;
use crate::scanner::SequenceScanner;
use crate::scope::{canonical_scope, ScopeRef, ScopeResolver};
use crate::store::{RecordStore, StoreError};
use retry::{Backoff, Deadline};
use std::fmt;
use std::time::Instant;

#[cfg(feature = "metrics")]
use crate::metrics::METRICS;
#[cfg(feature = "tracing")]
use crate::metrics::tracing_helpers;

/// Result of a single allocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Allocation {
    /// Next value of the lane's sequence
    Succeeded(Code),
    /// The store could not be reached. The code is clock-seeded: it breaks the
    /// lane's ordering and may repeat a code already issued in the lane, so
    /// store it through [`CodeAllocator::allocate_and_insert`] with a unique
    /// index on the code column.
    FallbackApplied { code: Code, cause: String },
}

impl Allocation {
    pub fn code(&self) -> &Code {
        match self {
            Allocation::Succeeded(code) | Allocation::FallbackApplied { code, .. } => code,
        }
    }

    pub fn into_code(self) -> Code {
        match self {
            Allocation::Succeeded(code) | Allocation::FallbackApplied { code, .. } => code,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, Allocation::FallbackApplied { .. })
    }

    /// Terminal state this allocation ended in
    pub fn state(&self) -> AllocationState {
        match self {
            Allocation::Succeeded(_) => AllocationState::Succeeded,
            Allocation::FallbackApplied { .. } => AllocationState::FallbackApplied,
        }
    }
}

impl fmt::Display for Allocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Allocation::Succeeded(code) => write!(f, "{code}"),
            Allocation::FallbackApplied { code, .. } => write!(f, "{code} (fallback)"),
        }
    }
}

/// Progress of one allocation call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AllocationState {
    Idle,
    ResolvingScope,
    Scanning,
    Formatting,
    Succeeded,
    FallbackApplied,
    Failed,
}

impl AllocationState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            AllocationState::Succeeded | AllocationState::FallbackApplied | AllocationState::Failed
        )
    }
}

/// Trace-level log of state transitions
struct Progress<'a> {
    doc_type: &'a DocumentType,
    state: AllocationState,
}

impl<'a> Progress<'a> {
    fn new(doc_type: &'a DocumentType) -> Self {
        Self { doc_type, state: AllocationState::Idle }
    }

    fn enter(&mut self, next: AllocationState) {
        log::trace!("allocation {}: {:?} -> {:?}", self.doc_type, self.state, next);
        self.state = next;
    }
}

/// Error returned by the caller's insert in [`CodeAllocator::allocate_and_insert`]
#[derive(Debug)]
pub enum InsertError {
    /// The code collided with the unique constraint on the code column
    Duplicate(String),
    /// Any other store failure; not retried
    Store(StoreError),
}

impl fmt::Display for InsertError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InsertError::Duplicate(msg) => write!(f, "Duplicate code: {msg}"),
            InsertError::Store(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for InsertError {}

impl From<StoreError> for InsertError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::UniqueViolation(msg) => InsertError::Duplicate(msg),
            other => InsertError::Store(other),
        }
    }
}

/// Codes produced by one pass, before they are wrapped for the caller
pub(crate) struct Minted {
    codes: Vec<Code>,
    fallback: Option<String>,
}

pub struct CodeAllocator<S> {
    store: S,
    config: AllocatorConfig,
}

impl<S: RecordStore> CodeAllocator<S> {
    pub fn new(store: S, config: AllocatorConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &AllocatorConfig {
        &self.config
    }

    /// Allocate the next code of `doc_type` in the lane `scope_ref` resolves to
    pub fn allocate(&self, doc_type: &DocumentType, scope_ref: &ScopeRef) -> Result<Allocation, SeqError> {
        let deadline = Deadline::start(self.config.allocation_timeout());
        let minted = self.observe(doc_type, 1, || self.mint(doc_type, scope_ref, 1, &deadline))?;
        Ok(single(minted))
    }

    /// Allocate a code and hand it to `insert`, recomputing and retrying while
    /// the insert reports a duplicate.
    ///
    /// Gives up with [`SeqError::DuplicateOnInsert`] after `max_retries` extra
    /// attempts, or [`SeqError::DeadlineExceeded`] when the deadline passes first.
    pub fn allocate_and_insert<T, F>(
        &self,
        doc_type: &DocumentType,
        scope_ref: &ScopeRef,
        mut insert: F,
    ) -> Result<(Allocation, T), SeqError>
    where
        F: FnMut(&Code) -> Result<T, InsertError>,
    {
        let deadline = Deadline::start(self.config.allocation_timeout());
        let backoff = self.backoff();
        let mut attempts = 0u32;

        loop {
            let allocation =
                single(self.observe(doc_type, 1, || self.mint(doc_type, scope_ref, 1, &deadline))?);
            attempts += 1;

            match insert(allocation.code()) {
                Ok(value) => return Ok((allocation, value)),
                Err(InsertError::Store(e)) => return Err(SeqError::from(e)),
                Err(InsertError::Duplicate(msg)) => {
                    if attempts > self.config.max_retries {
                        return Err(SeqError::DuplicateOnInsert {
                            code: allocation.into_code().into_string(),
                            attempts,
                        });
                    }
                    if deadline.expired() {
                        return Err(SeqError::DeadlineExceeded { elapsed: deadline.elapsed() });
                    }
                    log::warn!(
                        "Code {} already taken ({msg}), retrying (attempt {attempts})",
                        allocation.code()
                    );
                    #[cfg(feature = "metrics")]
                    METRICS.record_retry("duplicate");
                    deadline.sleep(backoff.delay(attempts - 1));
                }
            }
        }
    }

    /// Resolve `scope_ref` into the lane of `doc_type`, applying the
    /// configured sentinel scope when the reference does not resolve
    pub fn resolve_key(&self, doc_type: &DocumentType, scope_ref: &ScopeRef) -> Result<ScopeKey, SeqError> {
        let resolver = ScopeResolver::new(&self.store, self.config.organization_scope.as_str());
        let scope = match resolver.resolve(doc_type, scope_ref) {
            Ok(scope) => scope,
            Err(SeqError::ScopeNotFound(what)) => match self.config.scope_policy(doc_type) {
                ScopePolicy::Strict => return Err(SeqError::ScopeNotFound(what)),
                ScopePolicy::Sentinel(sentinel) => {
                    let sentinel = canonical_scope(&sentinel);
                    log::warn!("{what} did not resolve, numbering {doc_type} under sentinel scope '{sentinel}'");
                    sentinel
                }
            },
            Err(e) => return Err(e),
        };
        validate_scope(doc_type, &scope)?;
        Ok(ScopeKey::new(doc_type.clone(), scope))
    }

    /// Shared allocation path: `count` consecutive codes of one lane
    pub(crate) fn mint(
        &self,
        doc_type: &DocumentType,
        scope_ref: &ScopeRef,
        count: u32,
        deadline: &Deadline,
    ) -> Result<Minted, SeqError> {
        let mut progress = Progress::new(doc_type);
        let result = self.mint_tracked(doc_type, scope_ref, count, deadline, &mut progress);
        progress.enter(match &result {
            Ok(Minted { fallback: None, .. }) => AllocationState::Succeeded,
            Ok(Minted { fallback: Some(_), .. }) => AllocationState::FallbackApplied,
            Err(_) => AllocationState::Failed,
        });
        result
    }

    fn mint_tracked(
        &self,
        doc_type: &DocumentType,
        scope_ref: &ScopeRef,
        count: u32,
        deadline: &Deadline,
        progress: &mut Progress<'_>,
    ) -> Result<Minted, SeqError> {
        let max = doc_type.template().max_sequence();
        if count > max {
            return Err(SeqError::InvalidRequest(format!(
                "cannot allocate {count} {doc_type} codes, at most {max} fit the sequence width"
            )));
        }

        progress.enter(AllocationState::ResolvingScope);
        let key = self.resolve_key(doc_type, scope_ref)?;

        progress.enter(AllocationState::Scanning);
        let (first, fallback) = match self.reserve_with_retry(&key, count, deadline) {
            Ok(first) => (first, None),
            Err(SeqError::QueryFailure(cause)) if self.config.fallback == FallbackPolicy::TimestampSeeded => {
                log::warn!("Sequence for {key} unavailable ({cause}), issuing clock-seeded code(s)");
                (fallback_start(max, count), Some(cause.to_string()))
            }
            Err(e) => return Err(e),
        };

        progress.enter(AllocationState::Formatting);
        let codes = (0..count)
            .map(|offset| format_code(doc_type, &key.scope, first + offset))
            .collect::<Result<Vec<_>, _>>()?;

        log::debug!("Allocated {count} code(s) in {key} starting at {first}");
        Ok(Minted { codes, fallback })
    }

    /// First value of `count` freshly reserved values of `key`'s lane
    fn reserve_with_retry(&self, key: &ScopeKey, count: u32, deadline: &Deadline) -> Result<u32, SeqError> {
        let scanner = SequenceScanner::new(&self.store, self.config.scan_window);
        let backoff = self.backoff();
        let mut attempt = 0u32;

        loop {
            if deadline.expired() {
                return Err(SeqError::DeadlineExceeded { elapsed: deadline.elapsed() });
            }

            let reserved = self
                .floor(&scanner, key)
                .and_then(|floor| self.store.reserve(key, floor, count).map_err(SeqError::from));

            match reserved {
                Ok(last) => return Ok(last - count + 1),
                Err(SeqError::QueryFailure(e)) if attempt < self.config.max_retries => {
                    log::warn!("Reservation in {key} failed ({e}), retrying (attempt {})", attempt + 1);
                    #[cfg(feature = "metrics")]
                    METRICS.record_retry("query_failure");
                    deadline.sleep(backoff.delay(attempt));
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Value a new counter starts from: the scanned maximum for a lane that
    /// has never reserved, `0` (no effect on `max(last, floor)`) otherwise
    fn floor(&self, scanner: &SequenceScanner<&S>, key: &ScopeKey) -> Result<u32, SeqError> {
        match self.store.counter_value(key)? {
            Some(_) => Ok(0),
            None => scanner.current_max(key),
        }
    }

    fn backoff(&self) -> Backoff {
        Backoff::new(self.config.backoff_base_ms, self.config.backoff_max_ms)
    }

    /// Run one allocation pass with metrics and a tracing span around it
    fn observe(
        &self,
        doc_type: &DocumentType,
        count: u32,
        run: impl FnOnce() -> Result<Minted, SeqError>,
    ) -> Result<Minted, SeqError> {
        #[cfg(feature = "tracing")]
        let _span = tracing_helpers::allocate_span(doc_type.tag(), count).entered();
        #[cfg(not(feature = "tracing"))]
        let _ = count;

        let started = Instant::now();
        let result = run();
        let outcome = match &result {
            Ok(Minted { fallback: None, .. }) => "succeeded",
            Ok(Minted { fallback: Some(_), .. }) => "fallback",
            Err(_) => "failed",
        };
        if let Err(e) = &result {
            log::debug!("Allocation of {doc_type} failed: {e}");
        }

        #[cfg(feature = "metrics")]
        METRICS.record_allocation(doc_type.tag(), outcome, started.elapsed());
        #[cfg(not(feature = "metrics"))]
        let _ = (outcome, started);

        result
    }
}

fn single(minted: Minted) -> Allocation {
    let Minted { codes, fallback } = minted;
    match (codes.into_iter().next(), fallback) {
        (Some(code), None) => Allocation::Succeeded(code),
        (Some(code), Some(cause)) => Allocation::FallbackApplied { code, cause },
        (None, _) => unreachable!("a single allocation mints exactly one code"),
    }
}

/// Clock-seeded first sequence of a fallback range of `count` values, kept
/// inside `1..=max`
fn fallback_start(max: u32, count: u32) -> u32 {
    let span = u64::from(max - count + 1);
    let millis = chrono::Utc::now().timestamp_millis().unsigned_abs();
    1 + (millis % span) as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::code::{FormatError, TableKind};
    use crate::store::MemoryStore;
    use uuid::Uuid;

    fn fast_config() -> AllocatorConfig {
        AllocatorConfig {
            backoff_base_ms: 1,
            backoff_max_ms: 2,
            ..AllocatorConfig::default()
        }
    }

    #[test]
    fn test_first_and_second_allocation() {
        let store = MemoryStore::new();
        let allocator = CodeAllocator::new(&store, fast_config());
        let scope = ScopeRef::code("ALM001");

        let first = allocator.allocate(&DocumentType::OutboundManifest, &scope).unwrap();
        let second = allocator.allocate(&DocumentType::OutboundManifest, &scope).unwrap();
        assert_eq!(first, Allocation::Succeeded(Code::try_from("ROM-AL-ALM001-0001".to_string()).unwrap()));
        assert_eq!(second.code().as_str(), "ROM-AL-ALM001-0002");
        assert_eq!(second.state(), AllocationState::Succeeded);
    }

    #[test]
    fn test_continues_after_existing_records() {
        let store = MemoryStore::new();
        store.insert_record(TableKind::Materials, "10039").unwrap();
        let allocator = CodeAllocator::new(&store, fast_config());
        let allocation = allocator
            .allocate(&DocumentType::InventoryItem, &ScopeRef::Organization)
            .unwrap();
        assert_eq!(allocation.code().as_str(), "10040");
    }

    #[test]
    fn test_missing_scope_fails_without_touching_counters() {
        let store = MemoryStore::new();
        let allocator = CodeAllocator::new(&store, fast_config());
        let id = Uuid::new_v4();
        let err = allocator
            .allocate(&DocumentType::Requisition, &ScopeRef::CostCenter(id))
            .unwrap_err();
        assert!(matches!(err, SeqError::ScopeNotFound(_)));
        assert!(store.codes(TableKind::Requisitions).is_empty());
    }

    #[test]
    fn test_sentinel_scope_is_opt_in() {
        let store = MemoryStore::new();
        let mut config = fast_config();
        config.sentinel_scopes.insert("sco".to_string(), "0000".to_string());
        let allocator = CodeAllocator::new(&store, config);
        let allocation = allocator
            .allocate(&DocumentType::Requisition, &ScopeRef::CostCenter(Uuid::new_v4()))
            .unwrap();
        assert_eq!(allocation.code().as_str(), "SCO-AL-0000-0001");
    }

    #[test]
    fn test_invalid_scope_is_format_error() {
        let store = MemoryStore::new();
        let allocator = CodeAllocator::new(&store, fast_config());
        let err = allocator
            .allocate(&DocumentType::Requisition, &ScopeRef::code("TOOLONGSCOPE"))
            .unwrap_err();
        assert!(matches!(err, SeqError::Format(_)));
        assert!(store.counter(&ScopeKey::new(DocumentType::Requisition, "TOOLONGSCOPE")).is_none());
    }

    #[test]
    fn test_transient_failure_is_retried() {
        let store = MemoryStore::new();
        store.fail_next_reads(2);
        let allocator = CodeAllocator::new(&store, fast_config());
        let allocation = allocator
            .allocate(&DocumentType::OutboundManifest, &ScopeRef::code("ALM001"))
            .unwrap();
        assert_eq!(allocation, Allocation::Succeeded(Code::try_from("ROM-AL-ALM001-0001".to_string()).unwrap()));
    }

    #[test]
    fn test_exhausted_retries_apply_fallback() {
        let store = MemoryStore::new();
        store.fail_next_reads(100);
        let allocator = CodeAllocator::new(&store, fast_config());
        let allocation = allocator
            .allocate(&DocumentType::OutboundManifest, &ScopeRef::code("ALM001"))
            .unwrap();
        assert!(allocation.is_fallback());
        assert_eq!(allocation.state(), AllocationState::FallbackApplied);
        let parsed = allocation.code().parsed();
        assert_eq!(parsed.scope, "ALM001");
        assert!((1..=9_999).contains(&parsed.sequence));
    }

    #[test]
    fn test_exhausted_retries_fail_when_fallback_disabled() {
        let store = MemoryStore::new();
        store.fail_next_reads(100);
        let config = AllocatorConfig { fallback: FallbackPolicy::Disabled, ..fast_config() };
        let allocator = CodeAllocator::new(&store, config);
        let err = allocator
            .allocate(&DocumentType::OutboundManifest, &ScopeRef::code("ALM001"))
            .unwrap_err();
        assert!(matches!(err, SeqError::QueryFailure(_)));
    }

    #[test]
    fn test_permanent_store_error_skips_retry_and_fallback() {
        let store = MemoryStore::new();
        store.reject_next_reads(1);
        store.fail_next_reads(1);
        let allocator = CodeAllocator::new(&store, fast_config());
        let err = allocator
            .allocate(&DocumentType::OutboundManifest, &ScopeRef::code("ALM001"))
            .unwrap_err();
        assert!(matches!(err, SeqError::StoreRejected(_)));
        assert!(!err.is_recoverable());

        // The transient failure behind it is retried as usual
        let allocation = allocator
            .allocate(&DocumentType::OutboundManifest, &ScopeRef::code("ALM001"))
            .unwrap();
        assert_eq!(allocation, Allocation::Succeeded(Code::try_from("ROM-AL-ALM001-0001".to_string()).unwrap()));
    }

    #[test]
    fn test_overlong_manifest_scope_is_format_error() {
        let store = MemoryStore::new();
        let allocator = CodeAllocator::new(&store, fast_config());
        let scope = "A".repeat(crate::code::MAX_SCOPE_LEN + 1);
        let err = allocator
            .allocate(&DocumentType::OutboundManifest, &ScopeRef::code(scope.as_str()))
            .unwrap_err();
        assert!(matches!(err, SeqError::Format(FormatError::ScopeLength { .. })));
        assert!(store.counter(&ScopeKey::new(DocumentType::OutboundManifest, scope)).is_none());
    }

    #[test]
    fn test_stored_fallback_code_does_not_move_sequence() {
        let store = MemoryStore::new();
        let allocator = CodeAllocator::new(&store, fast_config());
        let scope = ScopeRef::code("ALM001");
        let insert = |code: &Code| -> Result<String, InsertError> {
            Ok(store.insert_record(TableKind::Manifests, code.as_str())?)
        };

        let (first, _) = allocator.allocate_and_insert(&DocumentType::OutboundManifest, &scope, insert).unwrap();
        assert_eq!(first.code().as_str(), "ROM-AL-ALM001-0001");

        store.fail_next_reads(100);
        let (fallback, _) = allocator.allocate_and_insert(&DocumentType::OutboundManifest, &scope, insert).unwrap();
        assert!(fallback.is_fallback());
        store.fail_next_reads(0);

        let next = allocator.allocate(&DocumentType::OutboundManifest, &scope).unwrap();
        assert_eq!(next.code().as_str(), "ROM-AL-ALM001-0002");
    }

    #[test]
    fn test_records_written_after_counter_creation_do_not_move_sequence() {
        let store = MemoryStore::new();
        let allocator = CodeAllocator::new(&store, fast_config());
        let scope = ScopeRef::code("ALM001");

        allocator.allocate(&DocumentType::OutboundManifest, &scope).unwrap();
        store.insert_record(TableKind::Manifests, "ROM-AL-ALM001-9500").unwrap();

        let next = allocator.allocate(&DocumentType::OutboundManifest, &scope).unwrap();
        assert_eq!(next.code().as_str(), "ROM-AL-ALM001-0002");
    }

    #[test]
    fn test_sequence_overflow_is_fatal() {
        let store = MemoryStore::new();
        store.insert_record(TableKind::Manifests, "ROM-AL-ALM001-9999").unwrap();
        let allocator = CodeAllocator::new(&store, fast_config());
        let err = allocator
            .allocate(&DocumentType::OutboundManifest, &ScopeRef::code("ALM001"))
            .unwrap_err();
        assert!(matches!(err, SeqError::Format(_)));
    }

    #[test]
    fn test_allocate_and_insert_retries_duplicates() {
        let store = MemoryStore::new();
        store.enforce_unique_codes(TableKind::Manifests);
        let allocator = CodeAllocator::new(&store, fast_config());

        // First insert collides with a record written behind the allocator's back
        let mut collisions = 0;
        let (allocation, id) = allocator
            .allocate_and_insert(&DocumentType::OutboundManifest, &ScopeRef::code("ALM001"), |code| {
                if collisions == 0 {
                    collisions += 1;
                    return Err(InsertError::Duplicate(format!("{code} exists")));
                }
                Ok(store.insert_record(TableKind::Manifests, code.as_str())?)
            })
            .unwrap();
        assert_eq!(allocation.code().as_str(), "ROM-AL-ALM001-0002");
        assert!(id.starts_with("manifests-"));
    }

    #[test]
    fn test_allocate_and_insert_gives_up() {
        let store = MemoryStore::new();
        let config = AllocatorConfig { max_retries: 2, ..fast_config() };
        let allocator = CodeAllocator::new(&store, config);
        let err = allocator
            .allocate_and_insert(&DocumentType::OutboundManifest, &ScopeRef::code("ALM001"), |code| {
                Err::<(), _>(InsertError::Duplicate(code.to_string()))
            })
            .unwrap_err();
        match err {
            SeqError::DuplicateOnInsert { attempts, .. } => assert_eq!(attempts, 3),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_fallback_start_stays_in_range() {
        for count in [1, 10, 9_999] {
            let start = fallback_start(9_999, count);
            assert!(start >= 1);
            assert!(start + count - 1 <= 9_999);
        }
    }

    #[test]
    fn test_state_terminality() {
        assert!(!AllocationState::Scanning.is_terminal());
        assert!(AllocationState::Failed.is_terminal());
        assert!(AllocationState::FallbackApplied.is_terminal());
    }
}
