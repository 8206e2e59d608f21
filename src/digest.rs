//! SHA256 digest utilities
//!
//! Content addresses for blobs and manifests are always `sha256:<64 hex>`.
//! The digest of an image is the digest of its manifest bytes.

use crate::error::{ResolverError, Result};
use sha2::{Digest, Sha256};

pub const SHA256_PREFIX: &str = "sha256:";

/// Utilities for working with SHA256 digests in registry context
pub struct DigestUtils;

impl DigestUtils {
    /// Compute the hex SHA256 of `data`
    pub fn compute_sha256(data: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(data);
        hex::encode(hasher.finalize())
    }

    /// Compute a full registry digest (with `sha256:` prefix)
    pub fn compute_docker_digest(data: &[u8]) -> String {
        format!("{}{}", SHA256_PREFIX, Self::compute_sha256(data))
    }

    /// Validate SHA256 hex string (64 characters, lowercase hex)
    pub fn is_valid_sha256_hex(hex_part: &str) -> bool {
        hex_part.len() == 64
            && hex_part
                .chars()
                .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
    }

    /// Validate full digest format (sha256:xxxxx)
    pub fn is_valid_docker_digest(digest: &str) -> bool {
        digest
            .strip_prefix(SHA256_PREFIX)
            .is_some_and(Self::is_valid_sha256_hex)
    }

    /// Normalize a digest to the prefixed form, validating it on the way
    pub fn normalize_digest(digest: &str) -> Result<String> {
        let digest = digest.trim();
        let full = if digest.starts_with(SHA256_PREFIX) {
            digest.to_string()
        } else {
            format!("{}{}", SHA256_PREFIX, digest)
        };

        if !Self::is_valid_docker_digest(&full) {
            return Err(ResolverError::Validation(format!(
                "Invalid SHA256 digest: '{}'",
                digest
            )));
        }
        Ok(full)
    }

    /// Verify data matches expected digest
    pub fn verify_data_integrity(data: &[u8], expected_digest: &str) -> Result<()> {
        let computed = Self::compute_docker_digest(data);
        if computed != expected_digest {
            return Err(ResolverError::Validation(format!(
                "Data integrity check failed: expected {}, computed {}",
                expected_digest, computed
            )));
        }
        Ok(())
    }

    /// Format digest for display (truncated for readability)
    pub fn format_digest_short(digest: &str) -> String {
        if digest.len() > 19 {
            format!("{}...", &digest[..19])
        } else {
            digest.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_digest_matches_known_value() {
        assert_eq!(
            DigestUtils::compute_docker_digest(b""),
            "sha256:e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_normalize_adds_prefix() {
        let hex_part = DigestUtils::compute_sha256(b"layer");
        let normalized = DigestUtils::normalize_digest(&hex_part).unwrap();
        assert_eq!(normalized, format!("sha256:{}", hex_part));
        assert_eq!(DigestUtils::normalize_digest(&normalized).unwrap(), normalized);
    }

    #[test]
    fn test_normalize_rejects_garbage() {
        assert!(DigestUtils::normalize_digest("sha256:deadbeef").is_err());
        assert!(DigestUtils::normalize_digest("not-a-digest").is_err());
        let upper = "A".repeat(64);
        assert!(DigestUtils::normalize_digest(&upper).is_err());
    }

    #[test]
    fn test_verify_data_integrity() {
        let digest = DigestUtils::compute_docker_digest(b"payload");
        assert!(DigestUtils::verify_data_integrity(b"payload", &digest).is_ok());
        assert!(DigestUtils::verify_data_integrity(b"other", &digest).is_err());
    }
}
