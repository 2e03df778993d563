//! Deterministic lookup digests.
//!
//! A digest is the searchable projection of a plaintext value whose
//! encrypted projection cannot be compared. SHA3-512, hex encoded at rest.

use serde::{Deserialize, Serialize};
use sha3::{Digest, Sha3_512};
use std::fmt;
use subtle::ConstantTimeEq;

use nutrivault_common::{Error, Result};

/// Digest size in bytes (512-bit).
pub const DIGEST_SIZE: usize = 64;

/// One-way, deterministic hash of a plaintext value.
///
/// Unsalted, so identical inputs always collide. This is what makes equality
/// lookup possible, and also what exposes low-entropy inputs to offline
/// guessing.
#[derive(Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct LookupDigest([u8; DIGEST_SIZE]);

impl LookupDigest {
    /// Hash a plaintext value.
    pub fn of(plaintext: &str) -> Self {
        let mut out = [0u8; DIGEST_SIZE];
        out.copy_from_slice(&Sha3_512::digest(plaintext.as_bytes()));
        Self(out)
    }

    /// Lowercase hex form, as persisted.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse the persisted hex form.
    ///
    /// # Errors
    /// - `Serialization` if the input is not 128 hex characters
    pub fn from_hex(encoded: &str) -> Result<Self> {
        let bytes = hex::decode(encoded)
            .map_err(|e| Error::Serialization(format!("invalid digest encoding: {}", e)))?;
        let bytes: [u8; DIGEST_SIZE] = bytes
            .try_into()
            .map_err(|_| Error::Serialization("invalid digest length".to_string()))?;
        Ok(Self(bytes))
    }

    /// Get the digest bytes.
    pub fn as_bytes(&self) -> &[u8; DIGEST_SIZE] {
        &self.0
    }
}

impl PartialEq for LookupDigest {
    fn eq(&self, other: &Self) -> bool {
        self.0.ct_eq(&other.0).into()
    }
}

impl Eq for LookupDigest {}

impl fmt::Debug for LookupDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LookupDigest({}..)", &self.to_hex()[..8])
    }
}

impl TryFrom<String> for LookupDigest {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        Self::from_hex(&s)
    }
}

impl From<LookupDigest> for String {
    fn from(digest: LookupDigest) -> String {
        digest.to_hex()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_answer_empty() {
        assert_eq!(
            LookupDigest::of("").to_hex(),
            "a69f73cca23a9ac5c8b567dc185a756e97c982164fe25859e0d1dcc1475c80a6\
             15b2123af1f5f94c11e3e9402c3ac558f500199d95b6d3e301758586281dcd26"
        );
    }

    #[test]
    fn test_deterministic() {
        assert_eq!(LookupDigest::of("a@x.com"), LookupDigest::of("a@x.com"));
        assert_ne!(LookupDigest::of("a@x.com"), LookupDigest::of("b@x.com"));
    }

    #[test]
    fn test_hex_roundtrip() {
        let digest = LookupDigest::of("pw1");
        let hex = digest.to_hex();
        assert_eq!(hex.len(), DIGEST_SIZE * 2);
        assert_eq!(LookupDigest::from_hex(&hex).unwrap(), digest);
    }

    #[test]
    fn test_from_hex_rejects_bad_input() {
        assert!(LookupDigest::from_hex("abcd").is_err());
        assert!(LookupDigest::from_hex(&"g".repeat(DIGEST_SIZE * 2)).is_err());
    }

    #[test]
    fn test_debug_truncated() {
        let debug = format!("{:?}", LookupDigest::of("secret"));
        assert!(debug.len() < 30);
    }
}
