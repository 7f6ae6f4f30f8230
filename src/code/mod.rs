//! Document codes: types, templates, formatting and parsing.
//!
//! Every sequenced code follows `<TYPE>-AL-<SCOPE>-<SEQ>` with a 4-digit,
//! zero-padded `SEQ`. Inventory item codes are bare 5-digit numbers.
//!
//! ```
//! use seqguard::code::{format_code, parse_code, DocumentType};
//!
//! let code = format_code(&DocumentType::OutboundManifest, "ALM001", 1).unwrap();
//! assert_eq!(code.as_str(), "ROM-AL-ALM001-0001");
//!
//! let parsed = parse_code("RDV-AL-PROD100-0025").unwrap();
//! assert_eq!(parsed.doc_type, DocumentType::ReturnManifest);
//! assert_eq!(parsed.scope, "PROD100");
//! assert_eq!(parsed.sequence, 25);
//! ```

mod format;
mod parse;

pub use format::{format_code, validate_scope};
pub use parse::parse_code;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Organization segment present in every separated code
pub const ORG_SEGMENT: &str = "AL";

/// Scope code of the inventory-item lane (organization-wide, not printed)
pub const ITEM_SCOPE: &str = "";

/// Longest scope code any lane accepts; the counter table's `scope_code`
/// column has the same width
pub const MAX_SCOPE_LEN: usize = 64;

/// Prefixes that belong to dedicated document types and cannot be used by
/// generic documents
pub const RESERVED_PREFIXES: [&str; 3] = ["SCO", "ROM", "RDV"];

/// Document type tag
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DocumentType {
    /// Purchase requisition (`SCO`)
    Requisition,
    /// Generic document carrying its own three-letter prefix
    Document(String),
    /// Outbound manifest / romaneio (`ROM`)
    OutboundManifest,
    /// Inbound or return manifest (`RDV`)
    ReturnManifest,
    /// Inventory item code (bare number)
    InventoryItem,
}

impl DocumentType {
    /// Build a generic document type, validating its prefix
    pub fn document(prefix: &str) -> Result<Self, FormatError> {
        validate_prefix(prefix)?;
        Ok(DocumentType::Document(prefix.to_string()))
    }

    /// Short tag identifying the type (`SCO`, `ROM`, `RDV`, `ITEM` or the document prefix)
    pub fn tag(&self) -> &str {
        match self {
            DocumentType::Requisition => "SCO",
            DocumentType::Document(prefix) => prefix,
            DocumentType::OutboundManifest => "ROM",
            DocumentType::ReturnManifest => "RDV",
            DocumentType::InventoryItem => "ITEM",
        }
    }

    /// Table holding records of this type
    pub fn table(&self) -> TableKind {
        match self {
            DocumentType::Requisition => TableKind::Requisitions,
            DocumentType::Document(_) => TableKind::Documents,
            DocumentType::OutboundManifest | DocumentType::ReturnManifest => TableKind::Manifests,
            DocumentType::InventoryItem => TableKind::Materials,
        }
    }

    /// Segment layout for this type
    pub fn template(&self) -> Template {
        match self {
            DocumentType::Requisition => Template {
                separated: true,
                scope: ScopeRule::AnyChars { min: 1, max: 6 },
                seq_width: 4,
            },
            DocumentType::Document(_) => Template {
                separated: true,
                scope: ScopeRule::UpperAlnum { min: 2, max: 4 },
                seq_width: 4,
            },
            DocumentType::OutboundManifest | DocumentType::ReturnManifest => Template {
                separated: true,
                scope: ScopeRule::AnyChars { min: 1, max: MAX_SCOPE_LEN },
                seq_width: 4,
            },
            DocumentType::InventoryItem => Template {
                separated: false,
                scope: ScopeRule::Fixed(ITEM_SCOPE),
                seq_width: 5,
            },
        }
    }
}

impl fmt::Display for DocumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for DocumentType {
    type Err = FormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "SCO" => Ok(DocumentType::Requisition),
            "ROM" => Ok(DocumentType::OutboundManifest),
            "RDV" => Ok(DocumentType::ReturnManifest),
            "ITEM" => Ok(DocumentType::InventoryItem),
            other => DocumentType::document(other),
        }
    }
}

fn validate_prefix(prefix: &str) -> Result<(), FormatError> {
    let well_formed = prefix.len() == 3 && prefix.bytes().all(|b| b.is_ascii_uppercase());
    if !well_formed || RESERVED_PREFIXES.contains(&prefix) {
        return Err(FormatError::InvalidPrefix(prefix.to_string()));
    }
    Ok(())
}

/// Record table a document type lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableKind {
    Requisitions,
    Documents,
    Manifests,
    Materials,
}

impl TableKind {
    pub const ALL: [TableKind; 4] = [
        TableKind::Requisitions,
        TableKind::Documents,
        TableKind::Manifests,
        TableKind::Materials,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TableKind::Requisitions => "requisitions",
            TableKind::Documents => "documents",
            TableKind::Manifests => "manifests",
            TableKind::Materials => "materials",
        }
    }
}

impl fmt::Display for TableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TableKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TableKind::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown table '{s}' (expected one of requisitions, documents, manifests, materials)"))
    }
}

/// Allowed content of the scope segment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeRule {
    /// Uppercase ASCII letters and digits, `min..=max` characters
    UpperAlnum { min: usize, max: usize },
    /// Any characters except line breaks, `min..=max` characters
    AnyChars { min: usize, max: usize },
    /// The scope is a fixed literal that is not printed
    Fixed(&'static str),
}

/// Segment layout of one document type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Template {
    /// `TYPE-AL-SCOPE-SEQ` when true, bare `SEQ` otherwise
    pub separated: bool,
    pub scope: ScopeRule,
    pub seq_width: usize,
}

impl Template {
    /// Largest sequence that fits the zero-padded width
    pub fn max_sequence(&self) -> u32 {
        10u32.pow(self.seq_width as u32) - 1
    }
}

/// The independent numbering lane of a code
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScopeKey {
    pub doc_type: DocumentType,
    pub scope: String,
}

impl ScopeKey {
    pub fn new(doc_type: DocumentType, scope: impl Into<String>) -> Self {
        Self { doc_type, scope: scope.into() }
    }

    /// Lane of the organization-wide inventory item codes
    pub fn inventory_items() -> Self {
        Self::new(DocumentType::InventoryItem, ITEM_SCOPE)
    }

    /// Leading text shared by every code of this lane
    pub fn prefix(&self) -> String {
        if self.doc_type.template().separated {
            format!("{}-{}-{}-", self.doc_type.tag(), ORG_SEGMENT, self.scope)
        } else {
            String::new()
        }
    }
}

impl fmt::Display for ScopeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.scope.is_empty() {
            write!(f, "{}", self.doc_type)
        } else {
            write!(f, "{}/{}", self.doc_type, self.scope)
        }
    }
}

/// A validated document code
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Code(String);

impl Code {
    pub(crate) fn new_unchecked(value: String) -> Self {
        Code(value)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    /// Components of this code (always present for a validated code)
    pub fn parsed(&self) -> ParsedCode {
        match parse_code(&self.0) {
            Some(parsed) => parsed,
            None => unreachable!("Code values are validated on construction"),
        }
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Code {
    type Error = FormatError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if parse_code(&value).is_some() {
            Ok(Code(value))
        } else {
            Err(FormatError::Unparseable(value))
        }
    }
}

impl From<Code> for String {
    fn from(code: Code) -> Self {
        code.0
    }
}

impl AsRef<str> for Code {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Components recovered from a code string
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedCode {
    pub doc_type: DocumentType,
    pub scope: String,
    pub sequence: u32,
}

impl ParsedCode {
    pub fn scope_key(&self) -> ScopeKey {
        ScopeKey::new(self.doc_type.clone(), self.scope.clone())
    }
}

/// A segment does not fit its template
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormatError {
    /// Generic document prefix is not three uppercase letters, or is reserved
    InvalidPrefix(String),
    /// Scope code length outside the slot's bounds
    ScopeLength { scope: String, min: usize, max: usize },
    /// Scope code contains a character the slot does not accept
    ScopeCharacters(String),
    /// A scope was given for a type whose scope is a fixed literal
    UnexpectedScope(String),
    /// Sequence does not fit the digit budget
    SequenceOverflow { sequence: u64, max: u32 },
    /// String does not match any code grammar
    Unparseable(String),
}

impl fmt::Display for FormatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FormatError::InvalidPrefix(p) => {
                write!(f, "'{p}' is not a valid document prefix (three uppercase letters, not SCO/ROM/RDV)")
            }
            FormatError::ScopeLength { scope, min, max } => {
                write!(f, "scope '{scope}' must be {min}..={max} characters")
            }
            FormatError::ScopeCharacters(scope) => {
                write!(f, "scope '{scope}' contains characters not allowed in its slot")
            }
            FormatError::UnexpectedScope(scope) => {
                write!(f, "scope '{scope}' given for a type without a scope segment")
            }
            FormatError::SequenceOverflow { sequence, max } => {
                write!(f, "sequence {sequence} exceeds the maximum {max}")
            }
            FormatError::Unparseable(code) => write!(f, "'{code}' is not a valid code"),
        }
    }
}

impl std::error::Error for FormatError {}
