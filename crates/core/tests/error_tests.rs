//! Tests for error types

use artools_core::Error;
use miette::Diagnostic;
use std::path::Path;

#[test]
fn test_configuration_error() {
    let error = Error::configuration("max_concurrent_downloads must be at least 1");
    assert_eq!(
        error.to_string(),
        "Configuration error: max_concurrent_downloads must be at least 1"
    );
    assert!(error.help().is_none());

    let error = Error::configuration_with_help("bad key", "see the docs");
    assert_eq!(error.help().unwrap().to_string(), "see the docs");
}

#[test]
fn test_io_error_with_path() {
    let source = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
    let error = Error::io(source, Path::new("/corpus"), "read artifact root");
    assert_eq!(error.to_string(), "I/O read artifact root failed: /corpus");
    assert_eq!(error.code().unwrap().to_string(), "artools::core::io");
}

#[test]
fn test_io_error_conversion() {
    let io_error = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
    let error = Error::from(io_error);
    assert!(error.to_string().contains("I/O") && error.to_string().contains("failed"));
    assert!(matches!(error, Error::Io { path: None, .. }));
}

#[test]
fn test_conflicts_and_cancelled() {
    let error = Error::Conflicts { count: 3 };
    assert!(error.to_string().starts_with("3 tool reference conflict(s)"));
    assert!(error.help().is_some());

    let error = Error::cancelled("download");
    assert_eq!(error.to_string(), "Run cancelled: download");
    match error {
        Error::Cancelled { stage } => assert_eq!(stage, "download"),
        _ => panic!("Expected Cancelled variant"),
    }
}

#[test]
fn test_error_debug_format() {
    let error = Error::serialization("debug test");
    let debug_str = format!("{error:?}");
    assert!(debug_str.contains("Serialization"));
    assert!(debug_str.contains("debug test"));
}
