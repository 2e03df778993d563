//! SQLite-backed document record store.
//!
//! One table per collection, one JSON document per row. Row order (`seq`)
//! is insertion order. Declared indexes become expression indexes over
//! the field's value; unique ones are enforced by SQLite.
//!
//! Every field access goes through [`field_expr`], which yields NULL for a
//! malformed body instead of failing the statement. A corrupt row therefore
//! never matches a filter and is otherwise skipped with an `error!`.

use async_trait::async_trait;
use rusqlite::{
    params_from_iter, types::Value as SqlValue, Connection, ErrorCode, OptionalExtension,
    Transaction,
};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info};

use crate::store::{validate_name, Document, Filter, IndexSpec, Mutation, RecordStore};
use nutrivault_common::{Error, Result};

struct Inner {
    conn: Connection,
    tables: HashSet<String>,
    indexes: HashMap<String, Vec<IndexSpec>>,
}

impl Inner {
    fn ensure_table(&mut self, collection: &str) -> Result<()> {
        if self.tables.contains(collection) {
            return Ok(());
        }
        validate_name(collection)?;
        self.conn
            .execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS \"{}\" (
                    seq INTEGER PRIMARY KEY AUTOINCREMENT,
                    body TEXT NOT NULL
                );",
                collection
            ))
            .map_err(db_err)?;
        self.tables.insert(collection.to_string());
        Ok(())
    }

    fn unique_fields(&self, collection: &str) -> Vec<String> {
        self.indexes
            .get(collection)
            .map(|specs| {
                specs
                    .iter()
                    .filter(|s| s.unique)
                    .map(|s| s.field.clone())
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// SQL expression for a top-level field, NULL when the body is not JSON.
///
/// Index definitions and queries must use the identical expression for
/// SQLite to match them up.
fn field_expr(field: &str) -> String {
    format!(
        "(CASE WHEN json_valid(body) THEN json_extract(body, '$.{}') END)",
        field
    )
}

/// Map a rusqlite error, surfacing constraint failures as conflicts.
fn db_err(err: rusqlite::Error) -> Error {
    match &err {
        rusqlite::Error::SqliteFailure(e, msg) if e.code == ErrorCode::ConstraintViolation => {
            let field = msg
                .as_deref()
                .and_then(|m| m.rsplit("__").next())
                .map(|f| f.trim_end_matches('\'').to_string())
                .unwrap_or_else(|| "unknown".to_string());
            Error::UniqueViolation { field }
        }
        _ => Error::Storage(err.to_string()),
    }
}

/// Convert a JSON scalar to the SQL value `json_extract` would yield.
fn to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or(f64::NAN)),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

/// Build a `WHERE` clause and its parameters from a filter.
fn where_clause(filter: &Filter) -> Result<(String, Vec<SqlValue>)> {
    if filter.clauses().is_empty() {
        return Ok(("1 = 1".to_string(), Vec::new()));
    }
    let mut parts = Vec::new();
    let mut params = Vec::new();
    for (field, value) in filter.clauses() {
        validate_name(field)?;
        if value.is_null() {
            parts.push(format!("json_valid(body) AND {} IS NULL", field_expr(field)));
        } else {
            parts.push(format!("{} = ?", field_expr(field)));
            params.push(to_sql(value));
        }
    }
    Ok((parts.join(" AND "), params))
}

/// Parse a stored body, logging and skipping rows that are not JSON objects.
fn parse_body(collection: &str, seq: i64, body: &str) -> Option<Document> {
    match serde_json::from_str::<Value>(body) {
        Ok(doc) if doc.is_object() => Some(doc),
        Ok(_) => {
            error!("Skipping {} row {}: body is not an object", collection, seq);
            None
        }
        Err(e) => {
            error!("Skipping {} row {}: {}", collection, seq, e);
            None
        }
    }
}

/// Matching rows as `(seq, body)` in insertion order.
fn select_rows(conn: &Connection, collection: &str, filter: &Filter) -> Result<Vec<(i64, String)>> {
    let (clause, params) = where_clause(filter)?;
    let sql = format!(
        "SELECT seq, body FROM \"{}\" WHERE {} ORDER BY seq",
        collection, clause
    );
    let mut stmt = conn.prepare(&sql).map_err(db_err)?;
    let rows = stmt
        .query_map(params_from_iter(params), |row| Ok((row.get(0)?, row.get(1)?)))
        .map_err(db_err)?;
    rows.collect::<std::result::Result<Vec<_>, _>>().map_err(db_err)
}

/// Insert `record` after checking the collection's unique fields.
///
/// The pre-check turns a collision into `UniqueViolation` before SQLite's
/// own index rejects it.
fn insert_checked(
    tx: &Transaction<'_>,
    collection: &str,
    unique: &[String],
    record: &Document,
) -> Result<()> {
    for field in unique {
        let value = match record.get(field) {
            None | Some(Value::Null) => continue,
            Some(v) => to_sql(v),
        };
        let taken: Option<i64> = tx
            .query_row(
                &format!(
                    "SELECT seq FROM \"{}\" WHERE {} = ?1 LIMIT 1",
                    collection,
                    field_expr(field)
                ),
                [value],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err)?;
        if taken.is_some() {
            return Err(Error::UniqueViolation {
                field: field.clone(),
            });
        }
    }

    tx.execute(
        &format!("INSERT INTO \"{}\" (body) VALUES (?1)", collection),
        [record.to_string()],
    )
    .map_err(db_err)?;
    Ok(())
}

/// Largest integer value of `field`, ignoring corrupt rows.
fn select_max(conn: &Connection, collection: &str, field: &str) -> Result<Option<i64>> {
    conn.query_row(
        &format!(
            "SELECT MAX(CAST({} AS INTEGER)) FROM \"{}\"",
            field_expr(field),
            collection
        ),
        [],
        |row| row.get::<_, Option<i64>>(0),
    )
    .map_err(db_err)
}

/// SQLite document store.
///
/// A single connection behind a mutex; blocking SQLite work runs on the
/// blocking thread pool. Every mutation runs in its own transaction.
pub struct DocumentStore {
    inner: Arc<Mutex<Inner>>,
}

impl DocumentStore {
    /// Open (or create) a database at `path`.
    ///
    /// # Errors
    /// - Database cannot be opened
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref()).map_err(db_err)?;
        info!("Document store opened at {}", path.as_ref().display());
        Ok(Self::with_connection(conn))
    }

    /// Create an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        Ok(Self::with_connection(conn))
    }

    fn with_connection(conn: Connection) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                conn,
                tables: HashSet::new(),
                indexes: HashMap::new(),
            })),
        }
    }

    /// Run `f` against the connection on the blocking pool.
    async fn run<T, F>(&self, collection: &str, f: F) -> Result<T>
    where
        F: FnOnce(&mut Inner) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        validate_name(collection)?;
        let inner = Arc::clone(&self.inner);
        let collection = collection.to_string();
        tokio::task::spawn_blocking(move || {
            let mut inner = inner
                .lock()
                .map_err(|_| Error::Storage("document store lock poisoned".to_string()))?;
            inner.ensure_table(&collection)?;
            f(&mut inner)
        })
        .await
        .map_err(|e| Error::Storage(format!("document store task failed: {}", e)))?
    }
}

#[async_trait]
impl RecordStore for DocumentStore {
    fn name(&self) -> &str {
        "document"
    }

    async fn ensure_index(&self, collection: &str, field: &str, unique: bool) -> Result<()> {
        validate_name(field)?;
        let coll = collection.to_string();
        let field = field.to_string();
        self.run(collection, move |inner| {
            let sql = format!(
                "CREATE {} INDEX IF NOT EXISTS \"{coll}__{field}\" ON \"{coll}\" ({expr})",
                if unique { "UNIQUE" } else { "" },
                expr = field_expr(&field),
            );
            inner.conn.execute_batch(&sql).map_err(db_err)?;

            let specs = inner.indexes.entry(coll.clone()).or_default();
            if !specs.iter().any(|s| s.field == field) {
                specs.push(IndexSpec { field: field.clone(), unique });
            }
            debug!("Index ready: {}.{} (unique: {})", coll, field, unique);
            Ok(())
        })
        .await
    }

    async fn append(&self, collection: &str, record: Document) -> Result<()> {
        if !record.is_object() {
            return Err(Error::Storage("Document is not an object".to_string()));
        }
        let coll = collection.to_string();
        self.run(collection, move |inner| {
            let unique = inner.unique_fields(&coll);
            let tx = inner.conn.transaction().map_err(db_err)?;
            insert_checked(&tx, &coll, &unique, &record)?;
            tx.commit().map_err(db_err)
        })
        .await
    }

    async fn append_numbered(
        &self,
        collection: &str,
        field: &str,
        mut record: Document,
    ) -> Result<i64> {
        validate_name(field)?;
        let coll = collection.to_string();
        let field = field.to_string();
        self.run(collection, move |inner| {
            let unique = inner.unique_fields(&coll);
            let tx = inner.conn.transaction().map_err(db_err)?;

            let next = select_max(&tx, &coll, &field)?.map_or(1, |max| max.max(0) + 1);
            record
                .as_object_mut()
                .ok_or_else(|| Error::Storage("Document is not an object".to_string()))?
                .insert(field.clone(), Value::from(next));

            insert_checked(&tx, &coll, &unique, &record)?;
            tx.commit().map_err(db_err)?;
            debug!("Appended {} with {} = {}", coll, field, next);
            Ok(next)
        })
        .await
    }

    async fn find_one(&self, collection: &str, filter: &Filter) -> Result<Option<Document>> {
        Ok(self.find_all(collection, filter).await?.into_iter().next())
    }

    async fn find_all(&self, collection: &str, filter: &Filter) -> Result<Vec<Document>> {
        let coll = collection.to_string();
        let filter = filter.clone();
        self.run(collection, move |inner| {
            let rows = select_rows(&inner.conn, &coll, &filter)?;
            Ok(rows
                .into_iter()
                .filter_map(|(seq, body)| parse_body(&coll, seq, &body))
                .collect())
        })
        .await
    }

    async fn update_one(
        &self,
        collection: &str,
        filter: &Filter,
        mutation: &Mutation,
    ) -> Result<bool> {
        let coll = collection.to_string();
        let filter = filter.clone();
        let mutation = mutation.clone();
        self.run(collection, move |inner| {
            let tx = inner.conn.transaction().map_err(db_err)?;

            let target = select_rows(&tx, &coll, &filter)?
                .into_iter()
                .find_map(|(seq, body)| parse_body(&coll, seq, &body).map(|doc| (seq, doc)));
            let Some((seq, mut doc)) = target else {
                return Ok(false);
            };

            mutation.apply(&mut doc)?;
            tx.execute(
                &format!("UPDATE \"{}\" SET body = ?1 WHERE seq = ?2", coll),
                rusqlite::params![doc.to_string(), seq],
            )
            .map_err(db_err)?;
            tx.commit().map_err(db_err)?;
            Ok(true)
        })
        .await
    }

    async fn delete_at(
        &self,
        collection: &str,
        filter: &Filter,
        position: usize,
    ) -> Result<Document> {
        let coll = collection.to_string();
        let filter = filter.clone();
        self.run(collection, move |inner| {
            let tx = inner.conn.transaction().map_err(db_err)?;

            let scoped: Vec<(i64, Document)> = select_rows(&tx, &coll, &filter)?
                .into_iter()
                .filter_map(|(seq, body)| parse_body(&coll, seq, &body).map(|doc| (seq, doc)))
                .collect();

            let count = scoped.len();
            let (seq, doc) = scoped
                .into_iter()
                .nth(position)
                .ok_or(Error::PositionOutOfRange {
                    position: position as i64,
                    count,
                })?;

            tx.execute(&format!("DELETE FROM \"{}\" WHERE seq = ?1", coll), [seq])
                .map_err(db_err)?;
            tx.commit().map_err(db_err)?;
            Ok(doc)
        })
        .await
    }

    async fn max_of(&self, collection: &str, field: &str) -> Result<Option<i64>> {
        validate_name(field)?;
        let coll = collection.to_string();
        let field = field.to_string();
        self.run(collection, move |inner| select_max(&inner.conn, &coll, &field))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_document_persists_across_open() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("records.db");

        {
            let store = DocumentStore::open(&path).unwrap();
            store.append("users", json!({"userId": 1, "name": "a"})).await.unwrap();
        }

        let store = DocumentStore::open(&path).unwrap();
        let found = store.find_one("users", &Filter::eq("userId", 1)).await.unwrap();
        assert_eq!(found, Some(json!({"userId": 1, "name": "a"})));
    }

    #[tokio::test]
    async fn test_document_unique_index_enforced_by_sqlite() {
        let store = DocumentStore::in_memory().unwrap();
        store.ensure_index("users", "emailDigest", true).await.unwrap();
        store.append("users", json!({"emailDigest": "aa"})).await.unwrap();

        // Bypass the pre-insert check to hit the index itself.
        let err = {
            let inner = store.inner.lock().unwrap();
            inner
                .conn
                .execute(
                    "INSERT INTO \"users\" (body) VALUES (?1)",
                    [json!({"emailDigest": "aa"}).to_string()],
                )
                .map_err(db_err)
                .unwrap_err()
        };
        match err {
            Error::UniqueViolation { field } => assert_eq!(field, "emailDigest"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_document_skips_corrupted_rows() {
        let store = DocumentStore::in_memory().unwrap();
        store.ensure_index("history", "owner", false).await.unwrap();
        store.ensure_index("history", "id", true).await.unwrap();
        store.append("history", json!({"owner": 1, "id": 1, "n": 0})).await.unwrap();
        {
            let inner = store.inner.lock().unwrap();
            inner
                .conn
                .execute("INSERT INTO \"history\" (body) VALUES ('{broken')", [])
                .unwrap();
        }
        store.append("history", json!({"owner": 1, "id": 2, "n": 2})).await.unwrap();

        let all = store.find_all("history", &Filter::all()).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[1]["n"], 2);

        let mine = store.find_all("history", &Filter::eq("owner", 1)).await.unwrap();
        assert_eq!(mine.len(), 2);
        assert!(store
            .find_one("history", &Filter::eq("owner", 1).and("n", 2))
            .await
            .unwrap()
            .is_some());
        assert!(store
            .find_all("history", &Filter::eq("owner", Value::Null))
            .await
            .unwrap()
            .is_empty());

        assert_eq!(store.max_of("history", "id").await.unwrap(), Some(2));
        assert_eq!(
            store
                .append_numbered("history", "id", json!({"owner": 1, "n": 3}))
                .await
                .unwrap(),
            3
        );

        let removed = store
            .delete_at("history", &Filter::eq("owner", 1), 1)
            .await
            .unwrap();
        assert_eq!(removed["n"], 2);
        let left = store.find_all("history", &Filter::eq("owner", 1)).await.unwrap();
        assert_eq!(left.len(), 2);
        assert_eq!(left[1]["n"], 3);
    }

    #[tokio::test]
    async fn test_document_indexes_tolerate_existing_corrupt_rows() {
        let store = DocumentStore::in_memory().unwrap();
        store.append("users", json!({"userId": 1})).await.unwrap();
        {
            let inner = store.inner.lock().unwrap();
            inner
                .conn
                .execute("INSERT INTO \"users\" (body) VALUES ('not json')", [])
                .unwrap();
        }
        store.ensure_index("users", "userId", true).await.unwrap();
        assert_eq!(
            store
                .append_numbered("users", "userId", json!({"name": "b"}))
                .await
                .unwrap(),
            2
        );
    }

    #[tokio::test]
    async fn test_document_null_filter() {
        let store = DocumentStore::in_memory().unwrap();
        store.append("users", json!({"userId": 1, "dob": null})).await.unwrap();
        store.append("users", json!({"userId": 2, "dob": "x"})).await.unwrap();

        let none = store.find_all("users", &Filter::eq("dob", Value::Null)).await.unwrap();
        assert_eq!(none.len(), 1);
        assert_eq!(none[0]["userId"], 1);
    }
}
