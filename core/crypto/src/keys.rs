//! Key types with secure memory handling.
//!
//! The symmetric key zeroizes its memory on drop to prevent sensitive data
//! from persisting in memory.

use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

use nutrivault_common::{Error, Result};

/// Length of the field encryption key in bytes (128-bit).
pub const KEY_LENGTH: usize = 16;

/// Process-wide key used for every encrypted field.
///
/// Loaded once at startup and immutable thereafter.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SymmetricKey {
    key: [u8; KEY_LENGTH],
}

impl SymmetricKey {
    /// Create a key from raw bytes.
    pub fn from_bytes(key: [u8; KEY_LENGTH]) -> Self {
        Self { key }
    }

    /// Create a key from a slice of arbitrary length.
    ///
    /// # Errors
    /// - Returns `InvalidKeyLength` unless `raw` is exactly KEY_LENGTH bytes
    pub fn from_slice(raw: &[u8]) -> Result<Self> {
        let key: [u8; KEY_LENGTH] = raw.try_into().map_err(|_| Error::InvalidKeyLength {
            expected: KEY_LENGTH,
            actual: raw.len(),
        })?;
        Ok(Self { key })
    }

    /// Generate a random key.
    pub fn generate() -> Self {
        use rand::RngCore;
        let mut key = [0u8; KEY_LENGTH];
        rand::thread_rng().fill_bytes(&mut key);
        Self { key }
    }

    /// Get the key bytes.
    ///
    /// # Security
    /// The returned slice should be used immediately and not stored.
    pub fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.key
    }
}

impl fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SymmetricKey([REDACTED])")
    }
}
