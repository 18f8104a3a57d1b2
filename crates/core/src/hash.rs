//! SHA-256 helpers shared by the cache, orchestrator and package builder.

use crate::{Error, Result};
use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::Path;

/// Compute the lower-case hex SHA-256 of a byte slice.
#[must_use]
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Compute the SHA-256 and size of a file, streaming its contents.
///
/// # Errors
///
/// Returns an error if the file cannot be opened or read.
pub fn sha256_file(path: &Path) -> Result<(String, u64)> {
    let mut file = std::fs::File::open(path).map_err(|e| Error::io(e, path, "open"))?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; 64 * 1024];
    let mut size = 0u64;

    loop {
        let n = file
            .read(&mut buffer)
            .map_err(|e| Error::io(e, path, "read"))?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
        size += n as u64;
    }

    Ok((hex::encode(hasher.finalize()), size))
}

/// Normalize a declared digest to lower-case hex.
///
/// Accepts an optional `sha256:` prefix. Returns `None` unless the value is
/// exactly 64 hex characters.
#[must_use]
pub fn normalize_digest(value: &str) -> Option<String> {
    let trimmed = value.trim();
    let hex = trimmed
        .strip_prefix("sha256:")
        .or_else(|| trimmed.strip_prefix("SHA256:"))
        .unwrap_or(trimmed);
    if hex.len() == 64 && hex.chars().all(|c| c.is_ascii_hexdigit()) {
        Some(hex.to_ascii_lowercase())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const HELLO_SHA: &str = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";

    #[test]
    fn test_sha256_hex() {
        assert_eq!(sha256_hex(b"hello"), HELLO_SHA);
    }

    #[test]
    fn test_sha256_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("f");
        std::fs::write(&path, b"hello").unwrap();
        let (hash, size) = sha256_file(&path).unwrap();
        assert_eq!(hash, HELLO_SHA);
        assert_eq!(size, 5);
    }

    #[test]
    fn test_sha256_file_missing() {
        let temp = TempDir::new().unwrap();
        assert!(sha256_file(&temp.path().join("missing")).is_err());
    }

    #[test]
    fn test_normalize_digest() {
        assert_eq!(normalize_digest(HELLO_SHA).as_deref(), Some(HELLO_SHA));
        assert_eq!(
            normalize_digest(&format!("sha256:{}", HELLO_SHA.to_uppercase())).as_deref(),
            Some(HELLO_SHA)
        );
        assert_eq!(normalize_digest("abc"), None);
        assert_eq!(normalize_digest(&"z".repeat(64)), None);
    }
}
