// CLASSIFICATION: COMMUNITY
// Filename: hash.rs v0.1
// Author: Lukas Bower
// Date Modified: 2026-10-18

//! SHA-256 digest helpers for measured content.
//!
//! Digests are lowercase hex. Comparison is a plain string comparison:
//! the values are public integrity references, not secrets.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::error::NodeError;

/// Hex digest of `data`.
#[must_use]
pub fn digest(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Hex digest of the file at `path`, streamed in 64 KiB chunks.
pub fn digest_file(path: &Path) -> io::Result<String> {
    let mut f = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = f.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Compare an expected digest with an actual one.
pub fn verify_digest(subject: &str, expected: &str, actual: &str) -> Result<(), NodeError> {
    if expected == actual {
        Ok(())
    } else {
        Err(NodeError::Integrity {
            subject: subject.to_owned(),
            expected: expected.to_owned(),
            actual: actual.to_owned(),
        })
    }
}

/// Bytes whose digest matched a reference value.
///
/// Only [`verify_bytes`] can build one, so any type that requires a
/// `VerifiedBytes` to be constructed is unreachable from unverified input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedBytes {
    bytes: Vec<u8>,
    digest: String,
}

impl VerifiedBytes {
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    #[must_use]
    pub fn digest(&self) -> &str {
        &self.digest
    }
}

/// Check `bytes` against `expected` and return them wrapped as verified.
pub fn verify_bytes(
    subject: &str,
    expected: &str,
    bytes: Vec<u8>,
) -> Result<VerifiedBytes, NodeError> {
    let actual = digest(&bytes);
    verify_digest(subject, expected, &actual)?;
    Ok(VerifiedBytes {
        bytes,
        digest: actual,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const EMPTY: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

    #[test]
    fn digest_is_lowercase_and_deterministic() {
        assert_eq!(digest(b""), EMPTY);
        assert_eq!(digest(b"abc"), digest(b"abc"));
        assert!(digest(b"abc").chars().all(|c| !c.is_ascii_uppercase()));
    }

    #[test]
    fn file_digest_matches_memory_digest() {
        let mut file = NamedTempFile::new().unwrap();
        let payload = vec![7u8; 200_000];
        file.write_all(&payload).unwrap();
        assert_eq!(digest_file(file.path()).unwrap(), digest(&payload));
    }

    #[test]
    fn uppercase_reference_is_a_mismatch() {
        let upper = EMPTY.to_ascii_uppercase();
        let err = verify_bytes("config", &upper, Vec::new()).unwrap_err();
        assert_eq!(err.kind(), "integrity");
    }

    #[test]
    fn single_bit_flip_is_detected() {
        let data = b"models: []\n".to_vec();
        let reference = digest(&data);
        for idx in 0..data.len() {
            let mut flipped = data.clone();
            flipped[idx] ^= 0x01;
            assert!(verify_bytes("config", &reference, flipped).is_err());
        }
        let ok = verify_bytes("config", &reference, data).unwrap();
        assert_eq!(ok.digest(), reference);
    }
}
