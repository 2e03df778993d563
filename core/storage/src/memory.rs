//! In-memory record store for testing.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;

use crate::collection::Collection;
use crate::store::{validate_name, Document, Filter, IndexSpec, Mutation, RecordStore};
use nutrivault_common::{Error, Result};

#[derive(Default)]
struct Inner {
    collections: HashMap<String, Collection>,
    indexes: HashMap<String, Vec<IndexSpec>>,
}

/// In-memory record store.
///
/// Useful for testing and development. All data is stored in memory
/// and lost on drop.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    /// Create a new empty memory store.
    pub fn new() -> Self {
        Self::default()
    }

    fn read<T>(&self, f: impl FnOnce(&Inner) -> T) -> Result<T> {
        let inner = self
            .inner
            .read()
            .map_err(|_| Error::Storage("memory store lock poisoned".to_string()))?;
        Ok(f(&inner))
    }

    fn write<T>(&self, f: impl FnOnce(&mut Inner) -> Result<T>) -> Result<T> {
        let mut inner = self
            .inner
            .write()
            .map_err(|_| Error::Storage("memory store lock poisoned".to_string()))?;
        f(&mut inner)
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn ensure_index(&self, collection: &str, field: &str, unique: bool) -> Result<()> {
        validate_name(collection)?;
        validate_name(field)?;
        self.write(|inner| {
            let specs = inner.indexes.entry(collection.to_string()).or_default();
            if !specs.iter().any(|s| s.field == field) {
                specs.push(IndexSpec {
                    field: field.to_string(),
                    unique,
                });
            }
            Ok(())
        })
    }

    async fn append(&self, collection: &str, record: Document) -> Result<()> {
        validate_name(collection)?;
        self.write(|inner| {
            let indexes = inner.indexes.get(collection).cloned().unwrap_or_default();
            inner
                .collections
                .entry(collection.to_string())
                .or_default()
                .append(record, &indexes)
        })
    }

    async fn append_numbered(
        &self,
        collection: &str,
        field: &str,
        record: Document,
    ) -> Result<i64> {
        validate_name(collection)?;
        validate_name(field)?;
        self.write(|inner| {
            let indexes = inner.indexes.get(collection).cloned().unwrap_or_default();
            inner
                .collections
                .entry(collection.to_string())
                .or_default()
                .append_numbered(field, record, &indexes)
        })
    }

    async fn find_one(&self, collection: &str, filter: &Filter) -> Result<Option<Document>> {
        self.read(|inner| {
            inner
                .collections
                .get(collection)
                .and_then(|c| c.find_one(filter))
        })
    }

    async fn find_all(&self, collection: &str, filter: &Filter) -> Result<Vec<Document>> {
        self.read(|inner| {
            inner
                .collections
                .get(collection)
                .map(|c| c.find_all(filter))
                .unwrap_or_default()
        })
    }

    async fn update_one(
        &self,
        collection: &str,
        filter: &Filter,
        mutation: &Mutation,
    ) -> Result<bool> {
        self.write(|inner| {
            let indexes = inner.indexes.get(collection).cloned().unwrap_or_default();
            match inner.collections.get_mut(collection) {
                Some(c) => c.update_one(filter, mutation, &indexes),
                None => Ok(false),
            }
        })
    }

    async fn delete_at(
        &self,
        collection: &str,
        filter: &Filter,
        position: usize,
    ) -> Result<Document> {
        self.write(|inner| {
            inner
                .collections
                .entry(collection.to_string())
                .or_default()
                .delete_at(filter, position)
        })
    }

    async fn max_of(&self, collection: &str, field: &str) -> Result<Option<i64>> {
        self.read(|inner| inner.collections.get(collection).and_then(|c| c.max_of(field)))
    }
}
