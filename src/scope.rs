//! Scope resolution.
//!
//! Turns a caller's [`ScopeRef`] into the canonical scope code of a lane:
//! trimmed, upper-cased, never empty. Inventory items always resolve to the
//! fixed organization-wide scope. The resolver never invents a scope; a
//! reference that does not resolve is [`SeqError::ScopeNotFound`].

use crate::code::{DocumentType, ITEM_SCOPE};
use crate::error::SeqError;
use crate::store::{EntityRef, RecordStore};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// What a code is numbered under
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScopeRef {
    /// A scope code given directly (warehouse, product line, ...)
    Code(String),
    /// A cost center whose own code is the scope
    CostCenter(Uuid),
    /// The configured organization-wide scope
    Organization,
}

impl ScopeRef {
    pub fn code(code: impl Into<String>) -> Self {
        ScopeRef::Code(code.into())
    }
}

impl fmt::Display for ScopeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScopeRef::Code(code) => write!(f, "scope '{code}'"),
            ScopeRef::CostCenter(id) => write!(f, "cost center {id}"),
            ScopeRef::Organization => f.write_str("organization scope"),
        }
    }
}

/// Trim and upper-case a scope code
pub fn canonical_scope(raw: &str) -> String {
    raw.trim().to_uppercase()
}

pub struct ScopeResolver<S> {
    store: S,
    organization_scope: String,
}

impl<S: RecordStore> ScopeResolver<S> {
    pub fn new(store: S, organization_scope: impl Into<String>) -> Self {
        Self { store, organization_scope: organization_scope.into() }
    }

    /// Canonical scope code for `scope_ref` in the lanes of `doc_type`.
    ///
    /// Store failures are [`SeqError::QueryFailure`] or
    /// [`SeqError::StoreRejected`]; a reference that does
    /// not exist or resolves to a blank code is [`SeqError::ScopeNotFound`].
    pub fn resolve(&self, doc_type: &DocumentType, scope_ref: &ScopeRef) -> Result<String, SeqError> {
        if *doc_type == DocumentType::InventoryItem {
            return Ok(ITEM_SCOPE.to_string());
        }

        let raw = match scope_ref {
            ScopeRef::Code(code) => code.clone(),
            ScopeRef::Organization => self.organization_scope.clone(),
            ScopeRef::CostCenter(id) => {
                let entity = EntityRef::CostCenter(*id);
                match self.store.lookup_scope_code(&entity)? {
                    Some(code) => code,
                    None => {
                        log::debug!("{entity} does not exist");
                        return Err(SeqError::ScopeNotFound(entity.to_string()));
                    }
                }
            }
        };

        let scope = canonical_scope(&raw);
        if scope.is_empty() {
            return Err(SeqError::ScopeNotFound(format!("{scope_ref} resolves to an empty code")));
        }
        Ok(scope)
    }
}
