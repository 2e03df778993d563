//! Field-level encryption using AES-128-CBC.
//!
//! Every call to [`FieldCipher::encrypt`] draws a fresh random IV, so the
//! same plaintext never produces the same stored value twice. Equality
//! search goes through [`LookupDigest`] instead.

use aes::cipher::{
    block_padding::Pkcs7, generic_array::GenericArray, BlockDecryptMut, BlockEncryptMut, KeyIvInit,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::digest::LookupDigest;
use crate::keys::SymmetricKey;
use nutrivault_common::{Error, Result};

type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;
type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;

/// IV size for AES-CBC (16 bytes).
pub const IV_SIZE: usize = 16;

/// AES block size (16 bytes).
pub const BLOCK_SIZE: usize = 16;

/// An encrypted field value: `{iv, ciphertext}`.
///
/// Persisted as `"<iv-hex>:<ciphertext-hex>"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EncryptedField {
    iv: [u8; IV_SIZE],
    ciphertext: Vec<u8>,
}

impl EncryptedField {
    /// The IV used for this value.
    pub fn iv(&self) -> &[u8; IV_SIZE] {
        &self.iv
    }

    /// The padded ciphertext.
    pub fn ciphertext(&self) -> &[u8] {
        &self.ciphertext
    }

    /// Encode to the persisted string form.
    pub fn encode(&self) -> String {
        format!("{}:{}", hex::encode(self.iv), hex::encode(&self.ciphertext))
    }

    /// Parse the persisted string form.
    ///
    /// # Errors
    /// - `DecryptionFailure` if the separator is missing, either part is not
    ///   hex, the IV is not IV_SIZE bytes, or the ciphertext is not a
    ///   non-empty multiple of BLOCK_SIZE
    pub fn parse(encoded: &str) -> Result<Self> {
        let (iv_hex, ct_hex) = encoded
            .split_once(':')
            .ok_or_else(|| Error::DecryptionFailure("missing IV separator".to_string()))?;

        let iv: [u8; IV_SIZE] = hex::decode(iv_hex)
            .map_err(|e| Error::DecryptionFailure(format!("invalid IV encoding: {}", e)))?
            .try_into()
            .map_err(|_| Error::DecryptionFailure("invalid IV length".to_string()))?;

        let ciphertext = hex::decode(ct_hex)
            .map_err(|e| Error::DecryptionFailure(format!("invalid ciphertext encoding: {}", e)))?;

        if ciphertext.is_empty() || ciphertext.len() % BLOCK_SIZE != 0 {
            return Err(Error::DecryptionFailure(
                "ciphertext is not a whole number of blocks".to_string(),
            ));
        }

        Ok(Self { iv, ciphertext })
    }
}

impl fmt::Display for EncryptedField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl FromStr for EncryptedField {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for EncryptedField {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        Self::parse(&s)
    }
}

impl From<EncryptedField> for String {
    fn from(field: EncryptedField) -> String {
        field.encode()
    }
}

/// Encrypts and decrypts individual field values under the process key.
pub struct FieldCipher {
    key: SymmetricKey,
}

impl FieldCipher {
    /// Create a cipher bound to `key`.
    pub fn new(key: SymmetricKey) -> Self {
        Self { key }
    }

    /// Encrypt a plaintext value.
    ///
    /// # Postconditions
    /// - The IV is freshly random; two calls on the same input differ
    pub fn encrypt(&self, plaintext: &str) -> EncryptedField {
        use rand::RngCore;
        let mut iv = [0u8; IV_SIZE];
        rand::thread_rng().fill_bytes(&mut iv);
        self.encrypt_with_iv(iv, plaintext.as_bytes())
    }

    /// Encrypt with a caller-chosen IV.
    ///
    /// # Warning
    /// Reusing an IV under the same key leaks equality of plaintext prefixes.
    /// Only known-answer tests call this.
    pub(crate) fn encrypt_with_iv(&self, iv: [u8; IV_SIZE], plaintext: &[u8]) -> EncryptedField {
        let ciphertext = Aes128CbcEnc::new(
            GenericArray::from_slice(self.key.as_bytes()),
            GenericArray::from_slice(&iv),
        )
        .encrypt_padded_vec_mut::<Pkcs7>(plaintext);

        EncryptedField { iv, ciphertext }
    }

    /// Decrypt a field value.
    ///
    /// # Errors
    /// - `DecryptionFailure` on bad padding (the usual symptom of a wrong key),
    ///   bad block alignment, or non-UTF-8 output
    pub fn decrypt(&self, field: &EncryptedField) -> Result<String> {
        if field.ciphertext.is_empty() || field.ciphertext.len() % BLOCK_SIZE != 0 {
            return Err(Error::DecryptionFailure(
                "ciphertext is not a whole number of blocks".to_string(),
            ));
        }

        let plaintext = Aes128CbcDec::new(
            GenericArray::from_slice(self.key.as_bytes()),
            GenericArray::from_slice(&field.iv),
        )
        .decrypt_padded_vec_mut::<Pkcs7>(&field.ciphertext)
        .map_err(|_| Error::DecryptionFailure("invalid padding".to_string()))?;

        String::from_utf8(plaintext)
            .map_err(|_| Error::DecryptionFailure("plaintext is not valid UTF-8".to_string()))
    }

    /// Decrypt an optional field.
    pub fn decrypt_opt(&self, field: Option<&EncryptedField>) -> Result<Option<String>> {
        field.map(|f| self.decrypt(f)).transpose()
    }

    /// Encrypt each value of an ordered sequence.
    pub fn encrypt_all<S: AsRef<str>>(&self, values: &[S]) -> Vec<EncryptedField> {
        values.iter().map(|v| self.encrypt(v.as_ref())).collect()
    }

    /// Decrypt each value of an ordered sequence, failing on the first error.
    pub fn decrypt_all(&self, fields: &[EncryptedField]) -> Result<Vec<String>> {
        fields.iter().map(|f| self.decrypt(f)).collect()
    }

    /// Compute the deterministic lookup digest of a plaintext value.
    pub fn digest(&self, plaintext: &str) -> LookupDigest {
        LookupDigest::of(plaintext)
    }
}

impl fmt::Debug for FieldCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldCipher").field("key", &self.key).finish()
    }
}
