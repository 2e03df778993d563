//! Cryptographic primitives for NutriVault.
//!
//! This module provides:
//! - The process-wide symmetric key with automatic zeroization
//! - Field-level encryption using AES-128-CBC with a fresh random IV per call
//! - Deterministic SHA3-512 lookup digests for equality search
//!
//! # Security Guarantees
//! - Key material is zeroized on drop and never printed
//! - No plaintext or key material is ever logged
//! - Digest comparisons run in constant time
//!
//! # Known Limitations
//! - CBC carries no authentication tag. A wrong key is only detected when
//!   the padding or UTF-8 check happens to fail.
//! - Digests are unsalted so that they stay searchable across records.

pub mod cipher;
pub mod digest;
pub mod keys;

pub use cipher::{EncryptedField, FieldCipher, IV_SIZE};
pub use digest::{LookupDigest, DIGEST_SIZE};
pub use keys::{SymmetricKey, KEY_LENGTH};
