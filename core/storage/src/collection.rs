//! In-memory collection shared by the memory and file backends.

use serde_json::Value;

use crate::store::{Document, Filter, IndexSpec, Mutation};
use nutrivault_common::{Error, Result};

/// Ordered documents of one collection.
#[derive(Debug, Clone, Default)]
pub(crate) struct Collection {
    docs: Vec<Document>,
}

impl Collection {
    /// Wrap already-loaded documents.
    pub fn from_docs(docs: Vec<Document>) -> Self {
        Self { docs }
    }

    pub fn docs(&self) -> &[Document] {
        &self.docs
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    /// Reject `doc` if any unique index already holds its value.
    ///
    /// `skip` excludes one position (the document being updated).
    fn check_unique(&self, doc: &Document, indexes: &[IndexSpec], skip: Option<usize>) -> Result<()> {
        for index in indexes.iter().filter(|i| i.unique) {
            let value = match doc.get(&index.field) {
                None | Some(Value::Null) => continue,
                Some(v) => v,
            };
            let taken = self
                .docs
                .iter()
                .enumerate()
                .filter(|(i, _)| Some(*i) != skip)
                .any(|(_, other)| other.get(&index.field) == Some(value));
            if taken {
                return Err(Error::UniqueViolation {
                    field: index.field.clone(),
                });
            }
        }
        Ok(())
    }

    pub fn append(&mut self, doc: Document, indexes: &[IndexSpec]) -> Result<()> {
        if !doc.is_object() {
            return Err(Error::Storage("Document is not an object".to_string()));
        }
        self.check_unique(&doc, indexes, None)?;
        self.docs.push(doc);
        Ok(())
    }

    /// Append `doc` with `field` set to the next number after the current
    /// maximum.
    pub fn append_numbered(
        &mut self,
        field: &str,
        mut doc: Document,
        indexes: &[IndexSpec],
    ) -> Result<i64> {
        let next = self.max_of(field).map_or(1, |max| max.max(0) + 1);
        doc.as_object_mut()
            .ok_or_else(|| Error::Storage("Document is not an object".to_string()))?
            .insert(field.to_string(), Value::from(next));
        self.append(doc, indexes)?;
        Ok(next)
    }

    pub fn find_one(&self, filter: &Filter) -> Option<Document> {
        self.docs.iter().find(|d| filter.matches(d)).cloned()
    }

    pub fn find_all(&self, filter: &Filter) -> Vec<Document> {
        self.docs.iter().filter(|d| filter.matches(d)).cloned().collect()
    }

    pub fn update_one(
        &mut self,
        filter: &Filter,
        mutation: &Mutation,
        indexes: &[IndexSpec],
    ) -> Result<bool> {
        let Some(idx) = self.docs.iter().position(|d| filter.matches(d)) else {
            return Ok(false);
        };

        let mut updated = self.docs[idx].clone();
        mutation.apply(&mut updated)?;

        let touched: Vec<IndexSpec> = indexes
            .iter()
            .filter(|i| mutation.touches(&i.field))
            .cloned()
            .collect();
        self.check_unique(&updated, &touched, Some(idx))?;

        self.docs[idx] = updated;
        Ok(true)
    }

    pub fn delete_at(&mut self, filter: &Filter, position: usize) -> Result<Document> {
        let scoped: Vec<usize> = self
            .docs
            .iter()
            .enumerate()
            .filter(|(_, d)| filter.matches(d))
            .map(|(i, _)| i)
            .collect();

        let idx = *scoped.get(position).ok_or(Error::PositionOutOfRange {
            position: position as i64,
            count: scoped.len(),
        })?;

        Ok(self.docs.remove(idx))
    }

    pub fn max_of(&self, field: &str) -> Option<i64> {
        self.docs
            .iter()
            .filter_map(|d| d.get(field).and_then(Value::as_i64))
            .max()
    }
}
