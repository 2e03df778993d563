//! Process-wide context: the validated key and the store handle.

use std::sync::Arc;
use tracing::info;

use crate::config::{CoreConfig, HISTORY_COLLECTION, USERS_COLLECTION};
use crate::history::HistoryLedger;
use crate::keys::KeyManager;
use crate::users::UserDirectory;
use nutrivault_common::Result;
use nutrivault_crypto::FieldCipher;
use nutrivault_storage::{RecordStore, StoreRegistry};

/// Indexes declared on every store at startup: `(collection, field, unique)`.
const INDEXES: &[(&str, &str, bool)] = &[
    (USERS_COLLECTION, "userId", true),
    (USERS_COLLECTION, "emailDigest", true),
    (HISTORY_COLLECTION, "owner", false),
    (HISTORY_COLLECTION, "id", true),
];

/// Everything a component needs, built once and passed down.
#[derive(Clone)]
pub struct CoreContext {
    cipher: Arc<FieldCipher>,
    store: Arc<dyn RecordStore>,
}

impl CoreContext {
    /// Load and validate `raw_key` against `store`.
    ///
    /// Either a fully usable context comes back or nothing does.
    ///
    /// # Errors
    /// - `InvalidKeyLength` if the key is not 16 bytes
    /// - `KeyMismatch` if the key cannot decrypt stored data
    /// - Storage errors while declaring indexes
    pub async fn open(raw_key: &[u8], store: Arc<dyn RecordStore>) -> Result<Self> {
        let cipher = Arc::new(FieldCipher::new(KeyManager::load(raw_key)?));

        for (collection, field, unique) in INDEXES {
            store.ensure_index(collection, field, *unique).await?;
        }

        KeyManager::validate(&cipher, store.as_ref()).await?;
        info!(backend = store.name(), "Context ready");
        Ok(Self { cipher, store })
    }

    /// Resolve the configured store, then [`open`](Self::open) it.
    pub async fn from_config(
        config: &CoreConfig,
        registry: &StoreRegistry,
        raw_key: &[u8],
    ) -> Result<Self> {
        let store = config.open_store(registry)?;
        Self::open(raw_key, store).await
    }

    /// The field cipher.
    pub fn cipher(&self) -> &Arc<FieldCipher> {
        &self.cipher
    }

    /// The record store.
    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    /// A user directory sharing this context.
    pub fn users(&self) -> UserDirectory {
        UserDirectory::new(self.cipher.clone(), self.store.clone())
    }

    /// A history ledger sharing this context.
    pub fn history(&self) -> HistoryLedger {
        HistoryLedger::new(self.cipher.clone(), self.store.clone())
    }
}
