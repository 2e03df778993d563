//! Service configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

use nutrivault_common::{Error, Result};
use nutrivault_storage::{RecordStore, StoreRegistry};

/// Environment variable consulted for the field encryption key.
pub const KEY_ENV: &str = "NUTRIVAULT_KEY";

/// Default configuration file name.
pub const CONFIG_FILENAME: &str = "nutrivault.json";

/// Collection holding user records.
pub const USERS_COLLECTION: &str = "users";

/// Collection holding history entries.
pub const HISTORY_COLLECTION: &str = "history";

/// Which record store backs the service, and how to reach it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Store type (e.g., "file", "document", "memory").
    pub backend: String,
    /// Store-specific configuration.
    #[serde(default)]
    pub backend_config: serde_json::Value,
}

impl CoreConfig {
    /// Configuration for a store type.
    pub fn new(backend: impl Into<String>, backend_config: serde_json::Value) -> Self {
        Self {
            backend: backend.into(),
            backend_config,
        }
    }

    /// Load configuration from a JSON file.
    ///
    /// # Errors
    /// - File cannot be read
    /// - File is not valid configuration JSON
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    /// Serialize configuration to JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Deserialize configuration from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Resolve the configured store.
    pub fn open_store(&self, registry: &StoreRegistry) -> Result<Arc<dyn RecordStore>> {
        registry.resolve(&self.backend, self.backend_config.clone())
    }
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self::new("file", serde_json::json!({ "root": "data" }))
    }
}
