//! Whole-collection file record store.
//!
//! Each collection lives in `<root>/<collection>.json` as one JSON array.
//! Every write loads the entire collection, mutates it in memory, and writes
//! the whole array back.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};
use tokio::fs;
use tracing::{debug, error};

use crate::collection::Collection;
use crate::store::{validate_name, Document, Filter, IndexSpec, Mutation, RecordStore};
use nutrivault_common::{Error, Result};

/// Whole-collection file record store.
///
/// Writers to the same collection are serialized within this process, so
/// two concurrent mutations cannot silently discard each other. Separate
/// processes sharing a root still race, and the last writer wins.
pub struct FileStore {
    root: PathBuf,
    writers: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    indexes: RwLock<HashMap<String, Vec<IndexSpec>>>,
}

impl FileStore {
    /// Create a new file store with the given root directory.
    ///
    /// # Postconditions
    /// - Root directory is created if it doesn't exist
    ///
    /// # Errors
    /// - Permission denied
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();

        if !root.exists() {
            std::fs::create_dir_all(&root)?;
        }

        Ok(Self {
            root,
            writers: Mutex::new(HashMap::new()),
            indexes: RwLock::new(HashMap::new()),
        })
    }

    /// Path of the file backing `collection`.
    pub fn collection_path(&self, collection: &str) -> PathBuf {
        self.root.join(format!("{}.json", collection))
    }

    fn writer(&self, collection: &str) -> Result<Arc<tokio::sync::Mutex<()>>> {
        let mut writers = self
            .writers
            .lock()
            .map_err(|_| Error::Storage("writer table lock poisoned".to_string()))?;
        Ok(writers.entry(collection.to_string()).or_default().clone())
    }

    fn indexes_for(&self, collection: &str) -> Result<Vec<IndexSpec>> {
        let indexes = self
            .indexes
            .read()
            .map_err(|_| Error::Storage("index table lock poisoned".to_string()))?;
        Ok(indexes.get(collection).cloned().unwrap_or_default())
    }

    /// Load a collection.
    ///
    /// A missing or blank file is an empty collection. A file that does not
    /// parse as an array of objects is logged and also treated as empty; the
    /// next write replaces it.
    async fn load(&self, collection: &str) -> Result<Collection> {
        validate_name(collection)?;
        let path = self.collection_path(collection);

        if !fs::try_exists(&path).await? {
            return Ok(Collection::default());
        }

        let raw = match fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) => {
                error!("Failed to read {}: {}", path.display(), e);
                return Ok(Collection::default());
            }
        };

        if raw.trim().is_empty() {
            return Ok(Collection::default());
        }

        match serde_json::from_str::<Vec<Value>>(&raw) {
            Ok(docs) if docs.iter().all(Value::is_object) => Ok(Collection::from_docs(docs)),
            Ok(_) => {
                error!(
                    "Failed to load {}: expected an array of objects",
                    path.display()
                );
                Ok(Collection::default())
            }
            Err(e) => {
                error!("Failed to load {}: {}", path.display(), e);
                Ok(Collection::default())
            }
        }
    }

    /// Write a collection back in full.
    ///
    /// Written to a sibling temp file first and renamed over the target, so
    /// readers never observe a partial file.
    async fn save(&self, collection: &str, data: &Collection) -> Result<()> {
        let path = self.collection_path(collection);
        let tmp = self.root.join(format!("{}.json.tmp", collection));

        let json = serde_json::to_string_pretty(data.docs())?;
        fs::write(&tmp, json).await?;
        fs::rename(&tmp, &path).await?;

        debug!("Saved {} ({} records)", path.display(), data.len());
        Ok(())
    }

    /// Run load-mutate-save under the collection's writer lock.
    async fn mutate<T>(
        &self,
        collection: &str,
        f: impl FnOnce(&mut Collection, &[IndexSpec]) -> Result<T> + Send,
    ) -> Result<T> {
        validate_name(collection)?;
        let writer = self.writer(collection)?;
        let _guard = writer.lock().await;

        let indexes = self.indexes_for(collection)?;
        let mut data = self.load(collection).await?;
        let out = f(&mut data, &indexes)?;
        self.save(collection, &data).await?;
        Ok(out)
    }
}

#[async_trait]
impl RecordStore for FileStore {
    fn name(&self) -> &str {
        "file"
    }

    async fn ensure_index(&self, collection: &str, field: &str, unique: bool) -> Result<()> {
        validate_name(collection)?;
        validate_name(field)?;
        let mut indexes = self
            .indexes
            .write()
            .map_err(|_| Error::Storage("index table lock poisoned".to_string()))?;
        let specs = indexes.entry(collection.to_string()).or_default();
        if !specs.iter().any(|s| s.field == field) {
            specs.push(IndexSpec {
                field: field.to_string(),
                unique,
            });
        }
        Ok(())
    }

    async fn append(&self, collection: &str, record: Document) -> Result<()> {
        self.mutate(collection, move |data, indexes| data.append(record, indexes))
            .await
    }

    async fn append_numbered(
        &self,
        collection: &str,
        field: &str,
        record: Document,
    ) -> Result<i64> {
        validate_name(field)?;
        self.mutate(collection, move |data, indexes| {
            data.append_numbered(field, record, indexes)
        })
        .await
    }

    async fn find_one(&self, collection: &str, filter: &Filter) -> Result<Option<Document>> {
        Ok(self.load(collection).await?.find_one(filter))
    }

    async fn find_all(&self, collection: &str, filter: &Filter) -> Result<Vec<Document>> {
        Ok(self.load(collection).await?.find_all(filter))
    }

    async fn update_one(
        &self,
        collection: &str,
        filter: &Filter,
        mutation: &Mutation,
    ) -> Result<bool> {
        // An unmatched update still rewrites the file; harmless, and keeps
        // the write path uniform.
        self.mutate(collection, |data, indexes| {
            data.update_one(filter, mutation, indexes)
        })
        .await
    }

    async fn delete_at(
        &self,
        collection: &str,
        filter: &Filter,
        position: usize,
    ) -> Result<Document> {
        self.mutate(collection, |data, _| data.delete_at(filter, position))
            .await
    }

    async fn max_of(&self, collection: &str, field: &str) -> Result<Option<i64>> {
        Ok(self.load(collection).await?.max_of(field))
    }
}
