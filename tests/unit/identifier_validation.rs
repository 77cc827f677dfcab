//! Unit tests for media identifier validation

use media_ingest::identifier::{IdentifierError, MAX_ID_LEN};
use media_ingest::MediaId;

#[test]
fn test_catalog_ids_are_accepted() {
    for raw in ["dQw4w9WgXcQ", "a-b_c", "x1.y2", "7"] {
        assert_eq!(MediaId::parse(raw).unwrap().as_str(), raw);
    }
}

#[test]
fn test_empty_id() {
    assert_eq!(MediaId::parse(""), Err(IdentifierError::Empty));
    assert_eq!(MediaId::parse("   "), Err(IdentifierError::Empty));
}

#[test]
fn test_overlong_id() {
    let raw = "a".repeat(MAX_ID_LEN + 1);
    assert!(matches!(
        MediaId::parse(&raw),
        Err(IdentifierError::TooLong { .. })
    ));
    assert!(MediaId::parse(&"a".repeat(MAX_ID_LEN)).is_ok());
}

#[test]
fn test_ids_cannot_escape_the_asset_directory() {
    for raw in ["../x", "a/b", "a\\b", ".", "..", "abc.", "a b", "a:b"] {
        assert!(MediaId::parse(raw).is_err(), "{raw} was accepted");
    }
}

#[test]
fn test_ids_are_case_sensitive() {
    assert_ne!(MediaId::parse("abc").unwrap(), MediaId::parse("ABC").unwrap());
}
