//! Record store trait definition.

use async_trait::async_trait;
use serde_json::Value;

use nutrivault_common::{Error, Result};

/// A stored record: a JSON object.
pub type Document = Value;

/// Conjunction of field equalities over indexable fields.
///
/// An empty filter matches every document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    clauses: Vec<(String, Value)>,
}

impl Filter {
    /// Match every document.
    pub fn all() -> Self {
        Self::default()
    }

    /// Match documents whose `field` equals `value`.
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::all().and(field, value)
    }

    /// Add another equality clause.
    pub fn and(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.clauses.push((field.into(), value.into()));
        self
    }

    /// The `(field, value)` clauses.
    pub fn clauses(&self) -> &[(String, Value)] {
        &self.clauses
    }

    /// Evaluate against a document.
    pub fn matches(&self, doc: &Document) -> bool {
        self.clauses
            .iter()
            .all(|(field, value)| doc.get(field) == Some(value))
    }
}

/// Field assignments applied to a single matched document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Mutation {
    assignments: Vec<(String, Value)>,
}

impl Mutation {
    /// Assign `value` to `field`.
    pub fn set(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::default().and_set(field, value)
    }

    /// Add another assignment.
    pub fn and_set(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.assignments.push((field.into(), value.into()));
        self
    }

    /// The `(field, value)` assignments.
    pub fn assignments(&self) -> &[(String, Value)] {
        &self.assignments
    }

    /// Apply to a document in place.
    ///
    /// # Errors
    /// - Returns error if `doc` is not a JSON object
    pub fn apply(&self, doc: &mut Document) -> Result<()> {
        let object = doc
            .as_object_mut()
            .ok_or_else(|| Error::Storage("Document is not an object".to_string()))?;
        for (field, value) in &self.assignments {
            object.insert(field.clone(), value.clone());
        }
        Ok(())
    }

    /// Whether this mutation touches `field`.
    pub fn touches(&self, field: &str) -> bool {
        self.assignments.iter().any(|(f, _)| f == field)
    }
}

/// A secondary index declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSpec {
    /// Top-level field name.
    pub field: String,
    /// Reject a second document with the same non-null value.
    pub unique: bool,
}

/// Check that a collection or field name is a plain identifier.
///
/// Backends splice these names into file names and SQL, so only ASCII
/// alphanumerics and `_` are accepted.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(Error::Validation(format!("Invalid name: {:?}", name)));
    }
    Ok(())
}

/// Persistence abstraction over named collections of JSON documents.
///
/// Every backend keeps documents in insertion order and exposes the same
/// ordering through `find_all` and `delete_at`. Components depend only on
/// this trait, never on a concrete backend.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Get the backend name (e.g., "file", "document", "memory").
    fn name(&self) -> &str;

    /// Declare a secondary index on `field`.
    ///
    /// Idempotent. Unique indexes make later `append` calls fail with
    /// `UniqueViolation` when the value is already present.
    async fn ensure_index(&self, collection: &str, field: &str, unique: bool) -> Result<()>;

    /// Append a document at the end of the collection.
    ///
    /// # Errors
    /// - `UniqueViolation` if a unique index already holds the value
    /// - `Storage` if `record` is not a JSON object
    async fn append(&self, collection: &str, record: Document) -> Result<()>;

    /// Append a document under the next free integer in `field`.
    ///
    /// The number is `max(field) + 1`, or 1 for an empty collection, and is
    /// assigned inside the same critical section as the insert, so
    /// concurrent callers never receive the same number.
    ///
    /// # Returns
    /// The assigned number.
    ///
    /// # Errors
    /// - `UniqueViolation` if a unique index already holds another value
    /// - `Storage` if `record` is not a JSON object
    async fn append_numbered(
        &self,
        collection: &str,
        field: &str,
        record: Document,
    ) -> Result<i64>;

    /// First document matching `filter`, in insertion order.
    async fn find_one(&self, collection: &str, filter: &Filter) -> Result<Option<Document>>;

    /// All documents matching `filter`, in insertion order.
    async fn find_all(&self, collection: &str, filter: &Filter) -> Result<Vec<Document>>;

    /// Apply `mutation` to the first document matching `filter`.
    ///
    /// # Returns
    /// `false` if nothing matched.
    async fn update_one(
        &self,
        collection: &str,
        filter: &Filter,
        mutation: &Mutation,
    ) -> Result<bool>;

    /// Remove the `position`-th document among those matching `filter`.
    ///
    /// The scoped ordering is recomputed inside the backend's critical
    /// section on every call.
    ///
    /// # Errors
    /// - `PositionOutOfRange` if `position >= count`
    async fn delete_at(&self, collection: &str, filter: &Filter, position: usize)
        -> Result<Document>;

    /// Largest integer value of `field` across the collection.
    async fn max_of(&self, collection: &str, field: &str) -> Result<Option<i64>>;
}
