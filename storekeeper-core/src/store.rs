// src/store.rs
//! Embedded document store backing the maintenance tasks.
//!
//! A database is a directory (the "connection string") holding one JSON
//! file per logical database: `<dir>/<db>.json`, shaped as
//! `{ "collection": [ {"_id": ..., ...}, ... ], ... }` - the same layout
//! the import/export tooling of document databases uses.
//!
//! The store offers exactly the boundary the tasks need: count-with-filter,
//! find-with-filter-and-projection (snapshot cursor, configurable batch),
//! single-document `$set`/`$unset` updates, and distinct-values queries.
//! Mutations live in memory until `flush()`, which persists atomically
//! (temp file + rename); tasks flush after every mutating batch.

use parking_lot::RwLock;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::document::{Document, DocumentId};
use crate::error::{Result, StoreError};
use crate::query::matches_filter;

type Collections = BTreeMap<String, Vec<Document>>;

#[derive(Debug)]
struct StoreInner {
    collections: Collections,
}

/// Handle to one open database. One handle per run; dropping it releases
/// the in-memory state (unflushed mutations are discarded, never partially
/// written).
#[derive(Debug)]
pub struct Store {
    inner: Arc<RwLock<StoreInner>>,
    path: PathBuf,
}

impl Store {
    /// Open an existing database. Fails closed: a missing or unreadable
    /// database aborts before any mutation can happen.
    pub fn connect(uri: &str, db: &str) -> Result<Store> {
        let path = database_path(uri, db);
        let content = fs::read_to_string(&path).map_err(|e| {
            StoreError::Connection(format!("cannot open {}: {}", path.display(), e))
        })?;
        let collections = parse_database(&content)
            .map_err(|e| StoreError::Connection(format!("cannot parse {}: {}", path.display(), e)))?;
        Ok(Store {
            inner: Arc::new(RwLock::new(StoreInner { collections })),
            path,
        })
    }

    /// Open a database, creating it (and its directory) when absent.
    /// Only the clone task's destination uses this.
    pub fn create(uri: &str, db: &str) -> Result<Store> {
        let path = database_path(uri, db);
        if path.exists() {
            return Self::connect(uri, db);
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let store = Store {
            inner: Arc::new(RwLock::new(StoreInner {
                collections: BTreeMap::new(),
            })),
            path,
        };
        store.flush()?;
        Ok(store)
    }

    /// Path of the backing file (diagnostics and summaries).
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn collection(&self, name: &str) -> Collection {
        Collection {
            name: name.to_string(),
            inner: Arc::clone(&self.inner),
        }
    }

    /// Names of collections holding at least one document, sorted.
    pub fn list_collections(&self) -> Vec<String> {
        let inner = self.inner.read();
        inner
            .collections
            .iter()
            .filter(|(_, docs)| !docs.is_empty())
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Drop a collection entirely (clone destination replacement).
    pub fn drop_collection(&self, name: &str) {
        self.inner.write().collections.remove(name);
    }

    /// Persist the current state atomically: write a sibling temp file,
    /// then rename over the database file.
    pub fn flush(&self) -> Result<()> {
        let rendered = {
            let inner = self.inner.read();
            let mut root = serde_json::Map::new();
            for (name, docs) in &inner.collections {
                let values: Vec<Value> = docs.iter().map(|d| d.to_value()).collect();
                root.insert(name.clone(), Value::Array(values));
            }
            serde_json::to_string_pretty(&Value::Object(root))?
        };

        let temp_path = self.path.with_extension("json.tmp");
        fs::write(&temp_path, rendered)?;
        fs::rename(&temp_path, &self.path)?;
        Ok(())
    }
}

fn database_path(uri: &str, db: &str) -> PathBuf {
    let dir = uri.strip_prefix("file://").unwrap_or(uri);
    Path::new(dir).join(format!("{}.json", db))
}

fn parse_database(content: &str) -> Result<Collections> {
    let root: Value = serde_json::from_str(content)?;
    let obj = root
        .as_object()
        .ok_or_else(|| StoreError::InvalidUpdate("database root must be an object".into()))?;

    let mut collections = BTreeMap::new();
    for (name, docs) in obj {
        let arr = docs.as_array().ok_or_else(|| {
            StoreError::InvalidUpdate(format!("collection '{}' must be an array", name))
        })?;
        let mut parsed = Vec::with_capacity(arr.len());
        for value in arr {
            parsed.push(Document::from_value(value)?);
        }
        collections.insert(name.clone(), parsed);
    }
    Ok(collections)
}

/// View over one collection. Missing collections read as empty and are
/// created on first write.
pub struct Collection {
    name: String,
    inner: Arc<RwLock<StoreInner>>,
}

impl Collection {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn count_documents(&self, filter: &Value) -> Result<u64> {
        let inner = self.inner.read();
        let docs = match inner.collections.get(&self.name) {
            Some(docs) => docs,
            None => return Ok(0),
        };
        let mut count = 0u64;
        for doc in docs {
            if matches_filter(doc, filter)? {
                count += 1;
            }
        }
        Ok(count)
    }

    /// All matching documents as JSON values.
    pub fn find(&self, filter: &Value) -> Result<Vec<Value>> {
        self.find_with_projection(filter, None)
    }

    /// Matching documents with an optional projection: only the listed
    /// fields are carried (plus `_id`, always).
    pub fn find_with_projection(
        &self,
        filter: &Value,
        projection: Option<&[&str]>,
    ) -> Result<Vec<Value>> {
        let inner = self.inner.read();
        let docs = match inner.collections.get(&self.name) {
            Some(docs) => docs,
            None => return Ok(Vec::new()),
        };
        let mut out = Vec::new();
        for doc in docs {
            if matches_filter(doc, filter)? {
                out.push(project(doc, projection));
            }
        }
        Ok(out)
    }

    pub fn find_one(&self, filter: &Value) -> Result<Option<Value>> {
        let inner = self.inner.read();
        let docs = match inner.collections.get(&self.name) {
            Some(docs) => docs,
            None => return Ok(None),
        };
        for doc in docs {
            if matches_filter(doc, filter)? {
                return Ok(Some(doc.to_value()));
            }
        }
        Ok(None)
    }

    /// Snapshot cursor over the matching documents; the snapshot is taken
    /// up front, so updating documents while draining the cursor is safe.
    pub fn find_batched(
        &self,
        filter: &Value,
        projection: Option<&[&str]>,
    ) -> Result<FindCursor> {
        let snapshot = self.find_with_projection(filter, projection)?;
        Ok(FindCursor { snapshot, pos: 0 })
    }

    /// Update the first matching document. Returns (matched, modified);
    /// modified stays 0 when the update is a no-op, which is what makes
    /// re-runs of every task converge.
    pub fn update_one(&self, filter: &Value, update: &Value) -> Result<(u64, u64)> {
        self.update_internal(filter, update, true)
    }

    /// Update every matching document. Returns (matched, modified).
    pub fn update_many(&self, filter: &Value, update: &Value) -> Result<(u64, u64)> {
        self.update_internal(filter, update, false)
    }

    fn update_internal(&self, filter: &Value, update: &Value, single: bool) -> Result<(u64, u64)> {
        let mut inner = self.inner.write();
        let docs = match inner.collections.get_mut(&self.name) {
            Some(docs) => docs,
            None => return Ok((0, 0)),
        };
        let mut matched = 0u64;
        let mut modified = 0u64;
        for doc in docs.iter_mut() {
            if !matches_filter(doc, filter)? {
                continue;
            }
            matched += 1;
            if apply_update(doc, update)? {
                modified += 1;
            }
            if single {
                break;
            }
        }
        Ok((matched, modified))
    }

    /// Distinct values of `field` across matching documents, first-seen
    /// order, missing fields skipped.
    pub fn distinct(&self, field: &str, filter: &Value) -> Result<Vec<Value>> {
        let inner = self.inner.read();
        let docs = match inner.collections.get(&self.name) {
            Some(docs) => docs,
            None => return Ok(Vec::new()),
        };
        let mut seen: ahash::AHashSet<String> = ahash::AHashSet::new();
        let mut out = Vec::new();
        for doc in docs {
            if !matches_filter(doc, filter)? {
                continue;
            }
            let value = if field == "_id" {
                Some(doc.id_value())
            } else {
                doc.get(field).cloned()
            };
            if let Some(value) = value {
                let key = value.to_string();
                if seen.insert(key) {
                    out.push(value);
                }
            }
        }
        Ok(out)
    }

    /// Insert one document; assigns an ObjectId when `_id` is absent.
    pub fn insert_one(&self, fields: HashMap<String, Value>) -> Result<DocumentId> {
        let mut value_map = serde_json::Map::new();
        for (k, v) in fields {
            value_map.insert(k, v);
        }
        let doc = Document::from_value(&Value::Object(value_map))?;
        let id = doc.id.clone();
        self.insert_documents(vec![doc])?;
        Ok(id)
    }

    /// Bulk insert preserving `_id` values (clone task).
    pub fn insert_many(&self, values: &[Value]) -> Result<u64> {
        let mut docs = Vec::with_capacity(values.len());
        for value in values {
            docs.push(Document::from_value(value)?);
        }
        let count = docs.len() as u64;
        self.insert_documents(docs)?;
        Ok(count)
    }

    fn insert_documents(&self, docs: Vec<Document>) -> Result<()> {
        let mut inner = self.inner.write();
        let existing = inner.collections.entry(self.name.clone()).or_default();
        for doc in docs {
            if existing.iter().any(|d| d.id == doc.id) {
                return Err(StoreError::InvalidUpdate(format!(
                    "duplicate _id {} in collection '{}'",
                    doc.id_string(),
                    self.name
                )));
            }
            existing.push(doc);
        }
        Ok(())
    }
}

/// Apply a `$set` / `$unset` update document. Returns whether anything
/// actually changed.
fn apply_update(doc: &mut Document, update: &Value) -> Result<bool> {
    let obj = update
        .as_object()
        .ok_or_else(|| StoreError::InvalidUpdate("update must be a JSON object".into()))?;

    let mut changed = false;
    for (op, args) in obj {
        let args = args.as_object().ok_or_else(|| {
            StoreError::InvalidUpdate(format!("{} expects an object of fields", op))
        })?;
        match op.as_str() {
            "$set" => {
                for (field, value) in args {
                    if field == "_id" {
                        return Err(StoreError::InvalidUpdate("_id is immutable".into()));
                    }
                    if doc.get(field) != Some(value) {
                        doc.set(field.clone(), value.clone());
                        changed = true;
                    }
                }
            }
            "$unset" => {
                for field in args.keys() {
                    if doc.remove(field).is_some() {
                        changed = true;
                    }
                }
            }
            other => {
                return Err(StoreError::InvalidUpdate(format!(
                    "unsupported update operator: {}",
                    other
                )));
            }
        }
    }
    Ok(changed)
}

fn project(doc: &Document, projection: Option<&[&str]>) -> Value {
    match projection {
        None => doc.to_value(),
        Some(fields) => {
            let mut map = serde_json::Map::new();
            map.insert("_id".to_string(), doc.id_value());
            for field in fields {
                if let Some(value) = doc.get(field) {
                    map.insert((*field).to_string(), value.clone());
                }
            }
            Value::Object(map)
        }
    }
}

/// Cursor over a point-in-time snapshot of a find result.
pub struct FindCursor {
    snapshot: Vec<Value>,
    pos: usize,
}

impl FindCursor {
    /// Next chunk of at most `chunk_size` documents; empty when drained.
    pub fn next_chunk(&mut self, chunk_size: usize) -> Vec<Value> {
        let end = (self.pos + chunk_size.max(1)).min(self.snapshot.len());
        let chunk = self.snapshot[self.pos..end].to_vec();
        self.pos = end;
        chunk
    }

    pub fn remaining(&self) -> usize {
        self.snapshot.len() - self.pos
    }

    pub fn is_finished(&self) -> bool {
        self.pos >= self.snapshot.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn open_store(seed: Value) -> (TempDir, Store) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.json");
        fs::write(&path, serde_json::to_string(&seed).unwrap()).unwrap();
        let store = Store::connect(dir.path().to_str().unwrap(), "app").unwrap();
        (dir, store)
    }

    #[test]
    fn test_connect_missing_database_fails_closed() {
        let dir = TempDir::new().unwrap();
        let err = Store::connect(dir.path().to_str().unwrap(), "nope").unwrap_err();
        assert!(matches!(err, StoreError::Connection(_)));
    }

    #[test]
    fn test_connect_rejects_garbage() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("bad.json"), "not json").unwrap();
        let err = Store::connect(dir.path().to_str().unwrap(), "bad").unwrap_err();
        assert!(matches!(err, StoreError::Connection(_)));
    }

    #[test]
    fn test_count_find_update_distinct() {
        let (_dir, store) = open_store(json!({
            "orders": [
                {"_id": 1, "deliveryStatus": "PREPARING_FOR_DISPATCH"},
                {"_id": 2, "deliveryStatus": "PREPARING"},
                {"_id": 3, "deliveryStatus": "PREPARING_FOR_DISPATCH"}
            ]
        }));
        let orders = store.collection("orders");

        assert_eq!(orders.count_documents(&json!({})).unwrap(), 3);
        assert_eq!(
            orders
                .count_documents(&json!({"deliveryStatus": "PREPARING_FOR_DISPATCH"}))
                .unwrap(),
            2
        );

        let (matched, modified) = orders
            .update_many(
                &json!({"deliveryStatus": "PREPARING_FOR_DISPATCH"}),
                &json!({"$set": {"deliveryStatus": "PREPARING"}}),
            )
            .unwrap();
        assert_eq!((matched, modified), (2, 2));

        let distinct = orders.distinct("deliveryStatus", &json!({})).unwrap();
        assert_eq!(distinct, vec![json!("PREPARING")]);
    }

    #[test]
    fn test_update_noop_counts_zero_modified() {
        let (_dir, store) = open_store(json!({
            "orders": [{"_id": 1, "deliveryStatus": "PREPARING"}]
        }));
        let orders = store.collection("orders");
        let (matched, modified) = orders
            .update_one(
                &json!({"_id": 1}),
                &json!({"$set": {"deliveryStatus": "PREPARING"}}),
            )
            .unwrap();
        assert_eq!((matched, modified), (1, 0));
    }

    #[test]
    fn test_id_is_immutable() {
        let (_dir, store) = open_store(json!({"users": [{"_id": 1}]}));
        let err = store
            .collection("users")
            .update_one(&json!({"_id": 1}), &json!({"$set": {"_id": 2}}))
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidUpdate(_)));
    }

    #[test]
    fn test_projection_keeps_id_and_requested_fields() {
        let (_dir, store) = open_store(json!({
            "users": [{"_id": "A", "userId": "old1", "email": "a@x"}]
        }));
        let rows = store
            .collection("users")
            .find_with_projection(&json!({}), Some(&["userId"]))
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0], json!({"_id": "A", "userId": "old1"}));
    }

    #[test]
    fn test_cursor_chunks() {
        let docs: Vec<Value> = (0..25).map(|i| json!({"_id": i})).collect();
        let (_dir, store) = open_store(json!({ "users": docs }));
        let mut cursor = store
            .collection("users")
            .find_batched(&json!({}), None)
            .unwrap();

        assert_eq!(cursor.remaining(), 25);
        assert_eq!(cursor.next_chunk(10).len(), 10);
        assert_eq!(cursor.next_chunk(10).len(), 10);
        assert_eq!(cursor.next_chunk(10).len(), 5);
        assert!(cursor.is_finished());
        assert!(cursor.next_chunk(10).is_empty());
    }

    #[test]
    fn test_missing_collection_reads_empty() {
        let (_dir, store) = open_store(json!({}));
        let ghosts = store.collection("ghosts");
        assert_eq!(ghosts.count_documents(&json!({})).unwrap(), 0);
        assert!(ghosts.find(&json!({})).unwrap().is_empty());
        assert!(ghosts.distinct("x", &json!({})).unwrap().is_empty());
    }

    #[test]
    fn test_flush_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = Store::create(dir.path().to_str().unwrap(), "fresh").unwrap();
        let users = store.collection("users");
        let mut fields = HashMap::new();
        fields.insert("name".to_string(), json!("Alice"));
        users.insert_one(fields).unwrap();
        store.flush().unwrap();

        let reopened = Store::connect(dir.path().to_str().unwrap(), "fresh").unwrap();
        assert_eq!(
            reopened
                .collection("users")
                .count_documents(&json!({}))
                .unwrap(),
            1
        );
    }

    #[test]
    fn test_insert_many_preserves_ids_and_rejects_duplicates() {
        let dir = TempDir::new().unwrap();
        let store = Store::create(dir.path().to_str().unwrap(), "dest").unwrap();
        let coll = store.collection("users");
        coll.insert_many(&[json!({"_id": "A"}), json!({"_id": "B"})])
            .unwrap();
        assert!(coll.insert_many(&[json!({"_id": "A"})]).is_err());
        assert_eq!(coll.count_documents(&json!({})).unwrap(), 2);
    }

    #[test]
    fn test_drop_and_list_collections() {
        let (_dir, store) = open_store(json!({
            "users": [{"_id": 1}],
            "orders": [{"_id": 1}]
        }));
        assert_eq!(store.list_collections(), vec!["orders", "users"]);
        store.drop_collection("orders");
        assert_eq!(store.list_collections(), vec!["users"]);
    }
}
