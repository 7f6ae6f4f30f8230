//! Allocation scenarios against the in-process store.

use seqguard::{
    allocate_bulk_codes, allocate_code, parse_code, AllocatorConfig, CodeAllocator, DocumentType,
    FallbackPolicy, MemoryStore, ScopeRef, SeqError, TableKind,
};
use uuid::Uuid;

fn config() -> AllocatorConfig {
    AllocatorConfig { backoff_base_ms: 1, backoff_max_ms: 2, ..AllocatorConfig::default() }
}

#[test]
fn test_manifest_lane_starts_at_one() {
    let store = MemoryStore::new();
    let scope = ScopeRef::code("ALM001");

    let first = allocate_code(&store, &config(), &DocumentType::OutboundManifest, &scope).unwrap();
    assert_eq!(first.code().as_str(), "ROM-AL-ALM001-0001");
    store.insert_record(TableKind::Manifests, first.code().as_str()).unwrap();

    let second = allocate_code(&store, &config(), &DocumentType::OutboundManifest, &scope).unwrap();
    assert_eq!(second.code().as_str(), "ROM-AL-ALM001-0002");
}

#[test]
fn test_requisition_scope_from_cost_center() {
    let store = MemoryStore::new();
    let cost_center = Uuid::new_v4();
    store.add_cost_center(cost_center, "1000");

    let allocation = allocate_code(
        &store,
        &config(),
        &DocumentType::Requisition,
        &ScopeRef::CostCenter(cost_center),
    )
    .unwrap();
    assert_eq!(allocation.code().as_str(), "SCO-AL-1000-0001");
    assert!(!allocation.is_fallback());
}

#[test]
fn test_inventory_item_follows_existing_maximum() {
    let store = MemoryStore::new();
    for code in ["10001", "10039", "10017"] {
        store.insert_record(TableKind::Materials, code).unwrap();
    }
    let allocation =
        allocate_code(&store, &config(), &DocumentType::InventoryItem, &ScopeRef::Organization).unwrap();
    assert_eq!(allocation.code().as_str(), "10040");
}

#[test]
fn test_parse_return_manifest() {
    let parsed = parse_code("RDV-AL-PROD100-0025").unwrap();
    assert_eq!(parsed.doc_type, DocumentType::ReturnManifest);
    assert_eq!(parsed.scope, "PROD100");
    assert_eq!(parsed.sequence, 25);
}

#[test]
fn test_missing_cost_center_persists_nothing() {
    let store = MemoryStore::new();
    let allocator = CodeAllocator::new(&store, config());

    let result = allocator.allocate_and_insert(
        &DocumentType::Requisition,
        &ScopeRef::CostCenter(Uuid::new_v4()),
        |code| Ok(store.insert_record(TableKind::Requisitions, code.as_str())?),
    );
    assert!(matches!(result, Err(SeqError::ScopeNotFound(_))));
    assert!(store.codes(TableKind::Requisitions).is_empty());
}

#[test]
fn test_sequential_calls_have_no_gaps() {
    let store = MemoryStore::new();
    let allocator = CodeAllocator::new(&store, config());
    let scope = ScopeRef::code("AB12");
    let doc_type = DocumentType::document("NFE").unwrap();

    let sequences: Vec<u32> = (0..25)
        .map(|_| {
            let (allocation, _) = allocator
                .allocate_and_insert(&doc_type, &scope, |code| {
                    Ok(store.insert_record(TableKind::Documents, code.as_str())?)
                })
                .unwrap();
            allocation.code().parsed().sequence
        })
        .collect();
    assert_eq!(sequences, (1..=25).collect::<Vec<_>>());
}

#[test]
fn test_lanes_are_independent() {
    let store = MemoryStore::new();
    let allocator = CodeAllocator::new(&store, config());

    let a = allocator.allocate(&DocumentType::OutboundManifest, &ScopeRef::code("ALM001")).unwrap();
    let b = allocator.allocate(&DocumentType::OutboundManifest, &ScopeRef::code("ALM002")).unwrap();
    let c = allocator.allocate(&DocumentType::ReturnManifest, &ScopeRef::code("ALM001")).unwrap();
    for allocation in [a, b, c] {
        assert_eq!(allocation.code().parsed().sequence, 1);
    }
}

#[test]
fn test_bulk_returns_exact_range() {
    let store = MemoryStore::new();
    store.insert_record(TableKind::Materials, "10039").unwrap();
    let batch =
        allocate_bulk_codes(&store, &config(), &DocumentType::InventoryItem, &ScopeRef::Organization, 5)
            .unwrap();
    let codes: Vec<&str> = batch.codes().iter().map(|c| c.as_str()).collect();
    assert_eq!(codes, vec!["10040", "10041", "10042", "10043", "10044"]);
}

#[test]
fn test_fallback_is_distinguishable() {
    let store = MemoryStore::new();
    store.fail_next_reads(u32::MAX);

    let allocation =
        allocate_code(&store, &config(), &DocumentType::OutboundManifest, &ScopeRef::code("ALM001")).unwrap();
    assert!(allocation.is_fallback());

    let strict = AllocatorConfig { fallback: FallbackPolicy::Disabled, ..config() };
    let err = allocate_code(&store, &strict, &DocumentType::OutboundManifest, &ScopeRef::code("ALM001"))
        .unwrap_err();
    assert!(err.is_recoverable());
}

#[test]
fn test_deadline_stops_retrying() {
    let store = MemoryStore::new();
    store.fail_next_reads(u32::MAX);
    let config = AllocatorConfig {
        max_retries: 1_000,
        backoff_base_ms: 5,
        backoff_max_ms: 5,
        allocation_timeout_ms: 30,
        ..AllocatorConfig::default()
    };

    let err = allocate_code(&store, &config, &DocumentType::OutboundManifest, &ScopeRef::code("ALM001"))
        .unwrap_err();
    assert!(matches!(err, SeqError::DeadlineExceeded { .. }));
}
