use super::{Code, DocumentType, FormatError, ScopeRule, ORG_SEGMENT};

/// Render `(doc_type, scope, sequence)` into its canonical code.
///
/// Scope and sequence must fit their slots exactly; nothing is truncated and
/// sequences never wrap around.
pub fn format_code(doc_type: &DocumentType, scope: &str, sequence: u32) -> Result<Code, FormatError> {
    if let DocumentType::Document(prefix) = doc_type {
        DocumentType::document(prefix)?;
    }
    validate_scope(doc_type, scope)?;

    let template = doc_type.template();
    let max = template.max_sequence();
    if sequence > max {
        return Err(FormatError::SequenceOverflow { sequence: u64::from(sequence), max });
    }

    let width = template.seq_width;
    let code = if template.separated {
        format!("{}-{}-{}-{:0width$}", doc_type.tag(), ORG_SEGMENT, scope, sequence)
    } else {
        format!("{sequence:0width$}")
    };
    Ok(Code::new_unchecked(code))
}

/// Check that `scope` fits the scope slot of `doc_type`.
pub fn validate_scope(doc_type: &DocumentType, scope: &str) -> Result<(), FormatError> {
    match doc_type.template().scope {
        ScopeRule::Fixed(literal) => {
            if scope != literal {
                return Err(FormatError::UnexpectedScope(scope.to_string()));
            }
        }
        ScopeRule::UpperAlnum { min, max } => {
            let len = scope.chars().count();
            if len < min || len > max {
                return Err(FormatError::ScopeLength { scope: scope.to_string(), min, max });
            }
            if !scope.bytes().all(|b| b.is_ascii_uppercase() || b.is_ascii_digit()) {
                return Err(FormatError::ScopeCharacters(scope.to_string()));
            }
        }
        ScopeRule::AnyChars { min, max } => {
            let len = scope.chars().count();
            if len < min || len > max {
                return Err(FormatError::ScopeLength { scope: scope.to_string(), min, max });
            }
            if scope.contains('\n') {
                return Err(FormatError::ScopeCharacters(scope.to_string()));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::code::MAX_SCOPE_LEN;

    #[test]
    fn test_format_each_type() {
        assert_eq!(
            format_code(&DocumentType::OutboundManifest, "ALM001", 1).unwrap().as_str(),
            "ROM-AL-ALM001-0001"
        );
        assert_eq!(
            format_code(&DocumentType::ReturnManifest, "PROD100", 25).unwrap().as_str(),
            "RDV-AL-PROD100-0025"
        );
        assert_eq!(
            format_code(&DocumentType::Requisition, "1000", 1).unwrap().as_str(),
            "SCO-AL-1000-0001"
        );
        assert_eq!(
            format_code(&DocumentType::Document("NFE".into()), "AB12", 9_999).unwrap().as_str(),
            "NFE-AL-AB12-9999"
        );
        assert_eq!(format_code(&DocumentType::InventoryItem, "", 10_040).unwrap().as_str(), "10040");
        assert_eq!(format_code(&DocumentType::InventoryItem, "", 7).unwrap().as_str(), "00007");
    }

    #[test]
    fn test_sequence_overflow_is_rejected() {
        assert_eq!(
            format_code(&DocumentType::OutboundManifest, "ALM001", 10_000),
            Err(FormatError::SequenceOverflow { sequence: 10_000, max: 9_999 })
        );
        assert!(format_code(&DocumentType::InventoryItem, "", 100_000).is_err());
    }

    #[test]
    fn test_scope_width_violations() {
        // Requisition scope slot is 1..=6 characters
        assert!(matches!(
            format_code(&DocumentType::Requisition, "1234567", 1),
            Err(FormatError::ScopeLength { .. })
        ));
        assert!(format_code(&DocumentType::Requisition, "", 1).is_err());

        // Generic documents take 2..=4 uppercase alphanumerics
        let doc = DocumentType::Document("NFE".into());
        assert!(matches!(format_code(&doc, "A", 1), Err(FormatError::ScopeLength { .. })));
        assert!(matches!(format_code(&doc, "ABCDE", 1), Err(FormatError::ScopeLength { .. })));
        assert_eq!(
            format_code(&doc, "ab", 1),
            Err(FormatError::ScopeCharacters("ab".into()))
        );

        assert!(format_code(&DocumentType::OutboundManifest, "", 1).is_err());
        assert!(format_code(&DocumentType::OutboundManifest, &"A".repeat(MAX_SCOPE_LEN), 1).is_ok());
        assert_eq!(
            validate_scope(&DocumentType::ReturnManifest, &"A".repeat(MAX_SCOPE_LEN + 1)),
            Err(FormatError::ScopeLength { scope: "A".repeat(MAX_SCOPE_LEN + 1), min: 1, max: MAX_SCOPE_LEN })
        );
        assert!(format_code(&DocumentType::OutboundManifest, "A\nB", 1).is_err());
        assert_eq!(
            format_code(&DocumentType::InventoryItem, "X", 1),
            Err(FormatError::UnexpectedScope("X".into()))
        );
    }

    #[test]
    fn test_invalid_generic_prefix() {
        assert_eq!(
            format_code(&DocumentType::Document("ROM".into()), "AB", 1),
            Err(FormatError::InvalidPrefix("ROM".into()))
        );
        assert!(format_code(&DocumentType::Document("Nfe".into()), "AB", 1).is_err());
    }
}
