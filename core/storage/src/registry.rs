//! Backend selection at startup.
//!
//! The configuration names a backend (`memory`, `file` or `document`) and
//! carries a JSON object of backend options. The registry maps the name to
//! a factory that validates those options and opens the store.

use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::document::DocumentStore;
use crate::file::FileStore;
use crate::memory::MemoryStore;
use crate::store::RecordStore;
use nutrivault_common::{Error, Result};

/// Opens a store from its backend options.
pub type StoreFactory = Box<dyn Fn(&Value) -> Result<Arc<dyn RecordStore>> + Send + Sync>;

/// Backend factories keyed by configuration name.
pub struct StoreRegistry {
    factories: BTreeMap<String, StoreFactory>,
}

impl StoreRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    /// Add a backend under `name`, replacing any earlier one.
    pub fn with_backend(mut self, name: impl Into<String>, factory: StoreFactory) -> Self {
        self.factories.insert(name.into(), factory);
        self
    }

    /// Open the backend `name` with `options`.
    ///
    /// # Errors
    /// - `Validation` if no backend has that name
    /// - `Validation` if the options are missing a required key
    /// - Whatever the backend reports while opening
    pub fn resolve(&self, name: &str, options: Value) -> Result<Arc<dyn RecordStore>> {
        let factory = self.factories.get(name).ok_or_else(|| {
            let known: Vec<&str> = self.factories.keys().map(String::as_str).collect();
            Error::Validation(format!(
                "Unknown store backend '{}' (expected one of: {})",
                name,
                known.join(", ")
            ))
        })?;
        factory(&options)
    }
}

impl Default for StoreRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn required_str<'a>(options: &'a Value, key: &str, backend: &str) -> Result<&'a str> {
    options
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| Error::Validation(format!("{} store requires '{}'", backend, key)))
}

fn open_memory(_options: &Value) -> Result<Arc<dyn RecordStore>> {
    Ok(Arc::new(MemoryStore::new()))
}

fn open_file(options: &Value) -> Result<Arc<dyn RecordStore>> {
    let root = required_str(options, "root", "file")?;
    Ok(Arc::new(FileStore::new(root)?))
}

fn open_document(options: &Value) -> Result<Arc<dyn RecordStore>> {
    match required_str(options, "path", "document")? {
        ":memory:" => Ok(Arc::new(DocumentStore::in_memory()?)),
        path => Ok(Arc::new(DocumentStore::open(path)?)),
    }
}

/// Registry holding the built-in backends.
///
/// - `memory`: no options
/// - `file`: `{"root": "<dir>"}`
/// - `document`: `{"path": "<sqlite file>"}`, or `":memory:"`
pub fn create_default_registry() -> StoreRegistry {
    StoreRegistry::new()
        .with_backend("memory", Box::new(open_memory))
        .with_backend("file", Box::new(open_file))
        .with_backend("document", Box::new(open_document))
}
