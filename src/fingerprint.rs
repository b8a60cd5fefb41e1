//! Content fingerprints - SHA-256 for incremental processing.
//!
//! A fingerprint is the hash of a file's exact bytes; equal fingerprints
//! mean the file has not changed since the manifest entry was written.

use std::fs;
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::error::Result;

/// Compute SHA-256 hash of bytes, return hex string
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let result = hasher.finalize();
    hex::encode(result)
}

/// Fingerprint a file's current content.
pub fn fingerprint_file(path: &Path) -> Result<String> {
    let bytes = fs::read(path)?;
    Ok(sha256_hex(&bytes))
}

// We need hex encoding
mod hex {
    pub fn encode(bytes: impl AsRef<[u8]>) -> String {
        bytes.as_ref().iter().map(|b| format!("{:02x}", b)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_deterministic() {
        let data = b"<svg/>";
        let h1 = sha256_hex(data);
        let h2 = sha256_hex(data);
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 64);
    }

    #[test]
    fn test_hash_changes_with_content() {
        assert_ne!(sha256_hex(b"a"), sha256_hex(b"b"));
    }

    #[test]
    fn test_fingerprint_file_matches_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fig.svg");
        fs::write(&path, b"<svg/>").unwrap();
        assert_eq!(fingerprint_file(&path).unwrap(), sha256_hex(b"<svg/>"));
    }
}
