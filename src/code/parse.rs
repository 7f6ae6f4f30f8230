use super::{DocumentType, ParsedCode, ITEM_SCOPE};
use once_cell::sync::Lazy;
use regex::Regex;

// `[0-9]` rather than `\d`: the regex crate's `\d` is Unicode-aware.
static REQUISITION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^SCO-AL-(.{1,6})-([0-9]{4})$").expect("requisition grammar"));
static MANIFEST: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(ROM|RDV)-AL-(.+)-([0-9]{4})$").expect("manifest grammar"));
static DOCUMENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([A-Z]{3})-AL-([0-9A-Z]{2,4})-([0-9]{4})$").expect("document grammar"));
static ITEM: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[0-9]{5}$").expect("item grammar"));

/// Parse a code string back into its components.
///
/// Matching is exact: partial matches, surrounding whitespace and unknown
/// shapes all return `None`.
pub fn parse_code(code: &str) -> Option<ParsedCode> {
    if let Some(caps) = REQUISITION.captures(code) {
        return Some(ParsedCode {
            doc_type: DocumentType::Requisition,
            scope: caps[1].to_string(),
            sequence: caps[2].parse().ok()?,
        });
    }

    if let Some(caps) = MANIFEST.captures(code) {
        let doc_type = if &caps[1] == "ROM" {
            DocumentType::OutboundManifest
        } else {
            DocumentType::ReturnManifest
        };
        return Some(ParsedCode {
            doc_type,
            scope: caps[2].to_string(),
            sequence: caps[3].parse().ok()?,
        });
    }

    if let Some(caps) = DOCUMENT.captures(code) {
        let doc_type = DocumentType::document(&caps[1]).ok()?;
        return Some(ParsedCode {
            doc_type,
            scope: caps[2].to_string(),
            sequence: caps[3].parse().ok()?,
        });
    }

    if ITEM.is_match(code) {
        return Some(ParsedCode {
            doc_type: DocumentType::InventoryItem,
            scope: ITEM_SCOPE.to_string(),
            sequence: code.parse().ok()?,
        });
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::code::format_code;

    #[test]
    fn test_parse_return_manifest() {
        let parsed = parse_code("RDV-AL-PROD100-0025").unwrap();
        assert_eq!(parsed.doc_type, DocumentType::ReturnManifest);
        assert_eq!(parsed.scope, "PROD100");
        assert_eq!(parsed.sequence, 25);
    }

    #[test]
    fn test_parse_requisition_before_generic() {
        // Also matches the generic grammar; the dedicated type wins.
        let parsed = parse_code("SCO-AL-1000-0001").unwrap();
        assert_eq!(parsed.doc_type, DocumentType::Requisition);
        assert_eq!(parsed.scope, "1000");
    }

    #[test]
    fn test_parse_item_code() {
        let parsed = parse_code("10039").unwrap();
        assert_eq!(parsed.doc_type, DocumentType::InventoryItem);
        assert_eq!(parsed.scope, "");
        assert_eq!(parsed.sequence, 10_039);
    }

    #[test]
    fn test_parse_rejects_partial_matches() {
        for code in [
            "",
            "1004",
            "100400",
            " 10040",
            "ROM-AL-ALM001-001",
            "ROM-AL-ALM001-00001",
            "ROM-AL--0001",
            "ROM-XX-ALM001-0001",
            "rom-AL-ALM001-0001",
            "SCO-AL-1234567-0001",
            "NFE-AL-A-0001",
            "NFE-AL-abc-0001",
            "ROM-AL-ALM001-0001\n",
            "ROM-AL-ALM001-٠٠٠١",
        ] {
            assert!(parse_code(code).is_none(), "should reject {code:?}");
        }
    }

    #[test]
    fn test_scope_with_separator_round_trips() {
        let code = format_code(&DocumentType::OutboundManifest, "CD-02", 7).unwrap();
        assert_eq!(code.as_str(), "ROM-AL-CD-02-0007");
        let parsed = parse_code(code.as_str()).unwrap();
        assert_eq!(parsed.scope, "CD-02");
        assert_eq!(parsed.sequence, 7);

        let code = format_code(&DocumentType::Requisition, "A-1234", 12).unwrap();
        let parsed = parse_code(code.as_str()).unwrap();
        assert_eq!(parsed.doc_type, DocumentType::Requisition);
        assert_eq!(parsed.scope, "A-1234");
        assert_eq!(parsed.sequence, 12);
    }

    #[test]
    fn test_round_trip_all_types() {
        let cases: Vec<(DocumentType, &str)> = vec![
            (DocumentType::Requisition, "1000"),
            (DocumentType::Requisition, "Ç01"),
            (DocumentType::Document("NFE".into()), "AB12"),
            (DocumentType::Document("ORC".into()), "01"),
            (DocumentType::OutboundManifest, "ALM001"),
            (DocumentType::ReturnManifest, "PROD100"),
            (DocumentType::InventoryItem, ""),
        ];
        for (doc_type, scope) in cases {
            let max = doc_type.template().max_sequence();
            for seq in [0, 1, 42, max] {
                let code = format_code(&doc_type, scope, seq).unwrap();
                let parsed = parse_code(code.as_str()).unwrap();
                assert_eq!(parsed.doc_type, doc_type);
                assert_eq!(parsed.scope, scope);
                assert_eq!(parsed.sequence, seq);
            }
        }
    }
}
