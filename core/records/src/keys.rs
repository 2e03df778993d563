//! Startup key loading and validation.
//!
//! The key is checked against data already on disk before anything else
//! runs. CBC has no authentication tag, so a wrong key is caught only when
//! the trial decryption trips on padding or UTF-8. A wrong key that yields
//! well-formed output passes validation undetected.

use tracing::{error, info};

use crate::config::USERS_COLLECTION;
use nutrivault_common::{Error, Result};
use nutrivault_crypto::{EncryptedField, FieldCipher, SymmetricKey};
use nutrivault_storage::{Filter, RecordStore};

/// Field decrypted to prove the key matches persisted data.
const CHECK_FIELD: &str = "fullName";

/// Loads and validates the process key.
pub struct KeyManager;

impl KeyManager {
    /// Load the raw key.
    ///
    /// # Errors
    /// - `InvalidKeyLength` unless `raw` is exactly 16 bytes
    pub fn load(raw: &[u8]) -> Result<SymmetricKey> {
        SymmetricKey::from_slice(raw)
    }

    /// Decrypt one persisted protected field with `cipher`.
    ///
    /// An empty user collection has nothing to check and passes.
    ///
    /// # Errors
    /// - `KeyMismatch` if the checked field is missing, malformed, or does
    ///   not decrypt
    /// - Storage errors from the lookup itself
    pub async fn validate(cipher: &FieldCipher, store: &dyn RecordStore) -> Result<()> {
        let Some(first) = store.find_one(USERS_COLLECTION, &Filter::all()).await? else {
            info!("No users on record; key accepted");
            return Ok(());
        };

        let checked = first
            .get(CHECK_FIELD)
            .and_then(|v| v.as_str())
            .ok_or(Error::KeyMismatch)
            .and_then(|s| EncryptedField::parse(s).map_err(|_| Error::KeyMismatch))
            .and_then(|field| cipher.decrypt(&field).map_err(|_| Error::KeyMismatch));

        match checked {
            Ok(_) => {
                info!("Key validated against stored data");
                Ok(())
            }
            Err(e) => {
                error!("Incorrect key: unable to decrypt stored user data");
                Err(e)
            }
        }
    }
}
