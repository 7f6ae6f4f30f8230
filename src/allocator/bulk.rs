//! Bulk allocation: one scan and one reservation for a whole batch.

use super::retry::Deadline;
use super::{CodeAllocator, Minted};
use crate::code::{Code, DocumentType};
use crate::error::SeqError;
use crate::scope::ScopeRef;
use crate::store::RecordStore;

/// Codes of one batch, consecutive within a single lane
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BulkAllocation {
    Succeeded(Vec<Code>),
    /// Clock-seeded batch issued while the store was unreadable
    FallbackApplied { codes: Vec<Code>, cause: String },
}

impl BulkAllocation {
    pub fn codes(&self) -> &[Code] {
        match self {
            BulkAllocation::Succeeded(codes) | BulkAllocation::FallbackApplied { codes, .. } => codes,
        }
    }

    pub fn into_codes(self) -> Vec<Code> {
        match self {
            BulkAllocation::Succeeded(codes) | BulkAllocation::FallbackApplied { codes, .. } => codes,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, BulkAllocation::FallbackApplied { .. })
    }

    pub fn len(&self) -> usize {
        self.codes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes().is_empty()
    }
}

impl From<Minted> for BulkAllocation {
    fn from(minted: Minted) -> Self {
        match minted.fallback {
            None => BulkAllocation::Succeeded(minted.codes),
            Some(cause) => BulkAllocation::FallbackApplied { codes: minted.codes, cause },
        }
    }
}

impl<S: RecordStore> CodeAllocator<S> {
    /// Allocate `count` consecutive codes `base+1 ..= base+count` in one lane.
    ///
    /// The lane counter is advanced by `count` under the lane lock, so
    /// overlapping batches (or single allocations) never receive the same
    /// values. `count == 0` returns an empty batch without reading the store.
    pub fn allocate_bulk(
        &self,
        doc_type: &DocumentType,
        scope_ref: &ScopeRef,
        count: u32,
    ) -> Result<BulkAllocation, SeqError> {
        if count == 0 {
            return Ok(BulkAllocation::Succeeded(Vec::new()));
        }
        let deadline = Deadline::start(self.config.allocation_timeout());
        let minted = self.observe(doc_type, count, || self.mint(doc_type, scope_ref, count, &deadline))?;
        Ok(minted.into())
    }
}
