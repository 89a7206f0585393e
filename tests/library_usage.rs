//! Integration tests for gptab library usage.
//!
//! These tests verify that the library can be used as a dependency
//! from external projects.

use gptab::{parse_gp_data, Song, TabError, QUARTER_TIME};

/// Test that all major types are accessible from the library.
#[test]
fn test_types_accessible() {
    // This test verifies that the public API types compile and are usable.
    // If any re-export is missing, this test will fail to compile.

    fn _assert_types() {
        let _: fn(&[u8]) -> Result<Option<Song>, TabError> = parse_gp_data;
        let _: i64 = QUARTER_TIME;
    }
}

/// Test error handling for invalid data.
#[test]
fn test_parse_error() {
    let invalid_data = vec![0u8; 10]; // too short to hold a version header
    let result = parse_gp_data(&invalid_data);

    assert!(result.is_err(), "Should return error for invalid data");
    let err = result.unwrap_err();
    assert!(
        matches!(err, TabError::Truncated { .. }),
        "Should be a truncation error, got {err:?}"
    );
}

/// Test the soft failure path for unknown format versions.
#[test]
fn test_unknown_version_is_not_an_error() {
    let mut data = vec![24u8]; // length prefix of the 30-byte version field
    data.extend_from_slice(b"UNKNOWN TABLATURE FORMAT");
    data.resize(31, 0);

    let result = parse_gp_data(&data).expect("unknown versions decode to no output");
    assert!(result.is_none());
}
