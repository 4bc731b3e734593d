use flux_core::{Document, Record, Result, Store, StoreConfig, TransactionState};
use parking_lot::Mutex;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

pub use flux_core::{Error as FluxError, Record as FluxRecord};

pub mod find;
pub use find::Find;

pub mod aggregate;
pub use aggregate::{Group, Pipeline};

/// FluxDB database handle
///
/// Cloning is cheap and every clone shares the same store. Each call takes
/// the store lock for its whole duration, so calls from different threads
/// are serialized.
#[derive(Clone)]
pub struct Database {
    store: Arc<Mutex<Store>>,
}

impl Database {
    /// Open (or create) a database in the given directory
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_config(path, StoreConfig::default())
    }

    /// Open a database with a custom configuration
    pub fn open_with_config(path: impl AsRef<Path>, config: StoreConfig) -> Result<Self> {
        let store = Store::open_with_config(path, config)?;
        Ok(Self {
            store: Arc::new(Mutex::new(store)),
        })
    }

    /// Create a collection indexed on `indexed_fields`. False if it exists.
    pub fn create_collection(&self, name: &str, indexed_fields: &[&str]) -> Result<bool> {
        self.store.lock().create_collection(name, indexed_fields)
    }

    pub fn drop_collection(&self, name: &str) -> Result<bool> {
        self.store.lock().drop_collection(name)
    }

    pub fn clear_collection(&self, name: &str) -> Result<bool> {
        self.store.lock().clear_collection(name)
    }

    pub fn list_collections(&self) -> Result<Vec<String>> {
        self.store.lock().list_collections()
    }

    pub fn list_indexes(&self, name: &str) -> Result<Vec<String>> {
        self.store.lock().list_indexes(name)
    }

    /// Index more fields of an existing collection
    pub fn create_index(&self, name: &str, fields: &[&str]) -> Result<bool> {
        self.store.lock().create_index(name, fields)
    }

    /// Insert a record, returning its identifier
    pub fn insert(&self, collection: &str, data: Document) -> Result<Uuid> {
        self.store.lock().insert(collection, &data)
    }

    pub fn insert_many(&self, collection: &str, data: Vec<Document>) -> Result<Vec<Uuid>> {
        self.store.lock().insert_many(collection, &data)
    }

    pub fn find(&self, collection: &str, find: Find) -> Result<Vec<Record>> {
        let opts = find.into_options();
        self.store.lock().find(collection, &opts)
    }

    pub fn find_one(&self, collection: &str, query: Document) -> Result<Option<Record>> {
        self.store.lock().find_one(collection, &query)
    }

    pub fn count(&self, collection: &str, query: Document) -> Result<usize> {
        self.store.lock().count(collection, &query)
    }

    pub fn exists(&self, collection: &str, id: Uuid) -> Result<bool> {
        self.store.lock().exists(collection, id)
    }

    /// Merge `patch` into a record. False if it does not exist.
    pub fn update(&self, collection: &str, id: Uuid, patch: Document) -> Result<bool> {
        self.store.lock().update(collection, id, &patch)
    }

    pub fn delete(&self, collection: &str, id: Uuid) -> Result<bool> {
        self.store.lock().delete(collection, id)
    }

    pub fn aggregate(&self, collection: &str, pipeline: Pipeline) -> Result<Vec<Document>> {
        self.store.lock().aggregate(collection, pipeline.stages())
    }

    pub fn begin_transaction(&self) -> Result<()> {
        self.store.lock().begin_transaction()
    }

    pub fn commit(&self) -> Result<usize> {
        self.store.lock().commit()
    }

    pub fn rollback(&self) -> Result<usize> {
        self.store.lock().rollback()
    }

    pub fn is_transaction_active(&self) -> bool {
        self.store.lock().is_transaction_active()
    }

    pub fn transaction_state(&self) -> TransactionState {
        self.store.lock().transaction_state()
    }

    pub fn pending_operations(&self) -> usize {
        self.store.lock().pending_operations()
    }

    /// Run `f` inside a transaction, committing on success and rolling back
    /// when `f` fails
    ///
    /// The store lock is only held per call, not for the whole closure. The
    /// transaction belongs to the store, so writes made through other clones
    /// while `f` runs are queued into it as well. Callers sharing a
    /// `Database` across threads must serialize transactions themselves.
    pub fn transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Database) -> Result<T>,
    {
        self.begin_transaction()?;
        match f(self) {
            Ok(value) => {
                self.commit()?;
                Ok(value)
            }
            Err(e) => {
                self.rollback()?;
                Err(e)
            }
        }
    }

    /// Write a collection's buffered records to its file
    pub fn flush(&self, collection: &str) -> Result<usize> {
        self.store.lock().flush(collection)
    }

    pub fn flush_all(&self) -> Result<usize> {
        self.store.lock().flush_all()
    }

    pub fn export_collection(&self, collection: &str, output: impl AsRef<Path>) -> Result<bool> {
        self.store.lock().export_collection(collection, output)
    }

    pub fn import_collection(&self, collection: &str, input: impl AsRef<Path>) -> Result<bool> {
        self.store.lock().import_collection(collection, input)
    }
}

/// Helper to build record data
pub struct RecordBuilder {
    data: Document,
}

impl RecordBuilder {
    pub fn new() -> Self {
        Self {
            data: Document::new(),
        }
    }

    /// Use a fixed identifier instead of a generated one
    pub fn id(mut self, id: Uuid) -> Self {
        self.data
            .insert(flux_core::ID_FIELD.to_string(), Value::String(id.to_string()));
        self
    }

    pub fn string(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.data.insert(key.into(), Value::String(value.into()));
        self
    }

    pub fn number(mut self, key: impl Into<String>, value: impl Into<serde_json::Number>) -> Self {
        self.data.insert(key.into(), Value::Number(value.into()));
        self
    }

    pub fn bool(mut self, key: impl Into<String>, value: bool) -> Self {
        self.data.insert(key.into(), Value::Bool(value));
        self
    }

    pub fn value(mut self, key: impl Into<String>, value: Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }

    pub fn build(self) -> Document {
        self.data
    }
}

impl Default for RecordBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn person(name: &str, age: i64) -> Document {
        RecordBuilder::new().string("name", name).number("age", age).build()
    }

    #[test]
    fn test_database_insert_and_find() {
        let dir = TempDir::new().unwrap();
        let db = Database::open(dir.path()).unwrap();
        db.create_collection("people", &["age"]).unwrap();

        let alice = db.insert("people", person("Alice", 30)).unwrap();
        db.insert("people", person("Bob", 20)).unwrap();

        let older = db.find("people", Find::new().gt("age", 25)).unwrap();
        assert_eq!(older.len(), 1);
        assert_eq!(older[0].id, alice);
        assert_eq!(older[0].get("age"), Some("30"));

        let sorted = db.find("people", Find::new().sort_asc("age")).unwrap();
        let names: Vec<_> = sorted.iter().map(|r| r.get("name").unwrap()).collect();
        assert_eq!(names, vec!["Bob", "Alice"]);
    }

    #[test]
    fn test_record_builder() {
        let id = Uuid::new_v4();
        let data = RecordBuilder::new()
            .id(id)
            .string("name", "Alice")
            .number("age", 30)
            .bool("active", true)
            .value("tags", json!(["a", "b"]))
            .build();

        assert_eq!(
            Value::Object(data),
            json!({"_id": id.to_string(), "name": "Alice", "age": 30, "active": true, "tags": ["a", "b"]})
        );
    }

    #[test]
    fn test_values_are_stored_as_text() {
        let dir = TempDir::new().unwrap();
        let db = Database::open(dir.path()).unwrap();
        let data = RecordBuilder::new()
            .bool("active", true)
            .value("tags", json!(["a", "b"]))
            .value("missing", Value::Null)
            .build();
        let id = db.insert("things", data).unwrap();

        let record = db.find_one("things", Document::new()).unwrap().unwrap();
        assert_eq!(record.id, id);
        assert_eq!(record.get("active"), Some("true"));
        assert_eq!(record.get("tags"), Some(r#"["a","b"]"#));
        assert_eq!(record.get("missing"), Some("null"));
    }

    #[test]
    fn test_transaction_closure_commits() {
        let dir = TempDir::new().unwrap();
        let db = Database::open(dir.path()).unwrap();

        let id = db
            .transaction(|tx| tx.insert("users", person("Alice", 30)))
            .unwrap();
        assert!(!db.is_transaction_active());
        assert_eq!(db.transaction_state(), TransactionState::Idle);
        assert!(db.exists("users", id).unwrap());
    }

    #[test]
    fn test_transaction_closure_rolls_back_on_error() {
        let dir = TempDir::new().unwrap();
        let db = Database::open(dir.path()).unwrap();
        db.create_collection("users", &[]).unwrap();

        let result: Result<()> = db.transaction(|tx| {
            tx.insert("users", person("Alice", 30))?;
            Err(FluxError::InvalidArgument("abort".into()))
        });

        assert!(result.is_err());
        assert!(!db.is_transaction_active());
        assert_eq!(db.count("users", Document::new()).unwrap(), 0);
    }

    #[test]
    fn test_clones_share_store() {
        let dir = TempDir::new().unwrap();
        let db = Database::open(dir.path()).unwrap();
        let other = db.clone();

        let handle = std::thread::spawn(move || {
            for i in 0..50 {
                other.insert("events", RecordBuilder::new().number("n", i).build()).unwrap();
            }
        });
        for i in 0..50 {
            db.insert("events", RecordBuilder::new().number("n", i).build()).unwrap();
        }
        handle.join().unwrap();

        assert_eq!(db.count("events", Document::new()).unwrap(), 100);
    }

    #[test]
    fn test_aggregate_via_builder() {
        let dir = TempDir::new().unwrap();
        let db = Database::open(dir.path()).unwrap();
        db.insert_many(
            "people",
            vec![
                RecordBuilder::new().string("city", "Oslo").number("age", 30).build(),
                RecordBuilder::new().string("city", "Oslo").number("age", 40).build(),
                RecordBuilder::new().string("city", "Rome").number("age", 20).build(),
            ],
        )
        .unwrap();

        let rows = db
            .aggregate("people", Pipeline::new().group(Group::by("city").sum("total", "age").count("n")))
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(Value::Object(rows[0].clone()), json!({"_id": "Oslo", "total": 70.0, "n": 2}));
    }
}
