//! Per-user scan history.
//!
//! Entries are append-only and never updated. Every query is scoped to one
//! owner, and positions count only that owner's entries in creation order.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::config::HISTORY_COLLECTION;
use nutrivault_common::{Error, Result, UserId};
use nutrivault_crypto::{EncryptedField, FieldCipher};
use nutrivault_storage::{Filter, RecordStore};

/// Display text for an image with no recognizable text. Never recorded.
pub const NOTHING_DETECTED: &str = "⚠️ No text detected";

/// A history entry as persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub id: Uuid,
    pub owner: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extracted_text: Option<EncryptedField>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_text: Option<EncryptedField>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis_text: Option<EncryptedField>,
    pub timestamp: DateTime<Utc>,
}

impl HistoryEntry {
    fn new(owner: UserId) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner,
            extracted_text: None,
            input_text: None,
            analysis_text: None,
            timestamp: Utc::now(),
        }
    }
}

/// A decrypted history entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryItem {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extracted_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analysis_text: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Append-only event log keyed by owner.
#[derive(Clone)]
pub struct HistoryLedger {
    cipher: Arc<FieldCipher>,
    store: Arc<dyn RecordStore>,
}

impl HistoryLedger {
    /// Create a ledger over `store`, encrypting with `cipher`.
    pub fn new(cipher: Arc<FieldCipher>, store: Arc<dyn RecordStore>) -> Self {
        Self { cipher, store }
    }

    fn owner_filter(user_id: UserId) -> Filter {
        Filter::eq("owner", user_id.get())
    }

    async fn append(&self, entry: &HistoryEntry) -> Result<()> {
        self.store
            .append(HISTORY_COLLECTION, serde_json::to_value(entry)?)
            .await?;
        debug!(owner = %entry.owner, id = %entry.id, "History entry recorded");
        Ok(())
    }

    /// Record extracted text.
    ///
    /// Returns `false` without writing when `text` is blank or the
    /// nothing-detected sentinel.
    pub async fn record_extraction(&self, user_id: UserId, text: &str) -> Result<bool> {
        if text.trim().is_empty() || text == NOTHING_DETECTED {
            return Ok(false);
        }
        let mut entry = HistoryEntry::new(user_id);
        entry.extracted_text = Some(self.cipher.encrypt(text));
        self.append(&entry).await?;
        Ok(true)
    }

    /// Record an analysis and the text it was run on.
    pub async fn record_analysis(
        &self,
        user_id: UserId,
        input_text: &str,
        analysis_text: &str,
    ) -> Result<()> {
        let mut entry = HistoryEntry::new(user_id);
        entry.input_text = Some(self.cipher.encrypt(input_text));
        entry.analysis_text = Some(self.cipher.encrypt(analysis_text));
        self.append(&entry).await
    }

    /// The user's entries in creation order, decrypted.
    ///
    /// Documents that do not parse as an entry are logged and skipped.
    ///
    /// # Errors
    /// - `DecryptionFailure` if any stored field does not decrypt
    pub async fn list(&self, user_id: UserId) -> Result<Vec<HistoryItem>> {
        self.store
            .find_all(HISTORY_COLLECTION, &Self::owner_filter(user_id))
            .await?
            .into_iter()
            .filter_map(|doc| match serde_json::from_value::<HistoryEntry>(doc) {
                Ok(entry) => Some(self.decrypt_entry(entry)),
                Err(e) => {
                    error!(owner = %user_id, error = %e, "Skipping malformed history entry");
                    None
                }
            })
            .collect()
    }

    /// Remove the user's `position`-th entry (zero-based).
    ///
    /// Positions count only this user's entries, recomputed on every call.
    ///
    /// # Errors
    /// - `PositionOutOfRange` if `position < 0` or `position >= count`
    pub async fn delete_at(&self, user_id: UserId, position: i64) -> Result<()> {
        let filter = Self::owner_filter(user_id);
        let Ok(index) = usize::try_from(position) else {
            let count = self.store.find_all(HISTORY_COLLECTION, &filter).await?.len();
            return Err(Error::PositionOutOfRange { position, count });
        };

        let removed = self
            .store
            .delete_at(HISTORY_COLLECTION, &filter, index)
            .await?;
        info!(
            owner = %user_id,
            position,
            id = removed.get("id").and_then(|v| v.as_str()).unwrap_or("?"),
            "History entry deleted"
        );
        Ok(())
    }

    fn decrypt_entry(&self, entry: HistoryEntry) -> Result<HistoryItem> {
        self.decrypt_fields(&entry).inspect_err(|e| {
            error!(owner = %entry.owner, id = %entry.id, error = %e, "History entry could not be decrypted");
        })
    }

    fn decrypt_fields(&self, entry: &HistoryEntry) -> Result<HistoryItem> {
        Ok(HistoryItem {
            extracted_text: self.cipher.decrypt_opt(entry.extracted_text.as_ref())?,
            input_text: self.cipher.decrypt_opt(entry.input_text.as_ref())?,
            analysis_text: self.cipher.decrypt_opt(entry.analysis_text.as_ref())?,
            timestamp: entry.timestamp,
        })
    }
}
