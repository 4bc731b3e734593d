/// Index store - per-collection field indexes for exact-match lookup
///
/// One JSON document per collection: field -> value text -> identifiers.
/// The document is cached in memory and rewritten in full on every mutation.
/// Operator conditions ($gt, $lt, $in) are never answered from the index.

use crate::types::{to_text, Document, Record};
use crate::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::trace;
use uuid::Uuid;

/// Value text -> identifiers holding that value
pub type ValueBuckets = BTreeMap<String, BTreeSet<Uuid>>;

/// Persisted index document of one collection
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IndexDocument {
    pub fields: BTreeMap<String, ValueBuckets>,
}

impl IndexDocument {
    /// Empty buckets for each field
    pub fn new<S: AsRef<str>>(fields: &[S]) -> Self {
        Self {
            fields: fields
                .iter()
                .map(|f| (f.as_ref().to_string(), ValueBuckets::new()))
                .collect(),
        }
    }

    /// Add a record's identifier under its value for every indexed field.
    /// A missing field indexes under the empty string.
    pub fn add(&mut self, record: &Record) {
        for (field, buckets) in self.fields.iter_mut() {
            let value = record
                .field_text(field)
                .map(|v| v.into_owned())
                .unwrap_or_default();
            buckets.entry(value).or_default().insert(record.id);
        }
    }

    /// Remove an identifier from every bucket, dropping emptied buckets
    pub fn remove(&mut self, id: &Uuid) {
        for buckets in self.fields.values_mut() {
            buckets.retain(|_, ids| {
                ids.remove(id);
                !ids.is_empty()
            });
        }
    }

    /// Empty every field's buckets, keeping the field set
    pub fn clear(&mut self) {
        for buckets in self.fields.values_mut() {
            buckets.clear();
        }
    }

    /// True iff at least one top-level query key is indexed
    pub fn covers(&self, query: &Document) -> bool {
        query.keys().any(|key| self.fields.contains_key(key))
    }

    /// Intersect the identifier sets of every indexed key with a bare value.
    ///
    /// None when no such key exists, meaning the caller must scan.
    pub fn lookup(&self, query: &Document) -> Option<HashSet<Uuid>> {
        let mut result: Option<HashSet<Uuid>> = None;
        for (key, condition) in query {
            if matches!(condition, Value::Object(_)) {
                continue;
            }
            let Some(buckets) = self.fields.get(key) else {
                continue;
            };
            let ids: HashSet<Uuid> = buckets
                .get(&to_text(condition))
                .map(|ids| ids.iter().copied().collect())
                .unwrap_or_default();
            result = Some(match result {
                None => ids,
                Some(acc) => acc.intersection(&ids).copied().collect(),
            });
        }
        result
    }
}

pub struct IndexStore {
    dir: PathBuf,
    cache: HashMap<String, IndexDocument>,
}

impl IndexStore {
    /// Index documents live in `dir`, which is created if missing
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            cache: HashMap::new(),
        })
    }

    fn path(&self, collection: &str) -> PathBuf {
        self.dir.join(format!("{}.json", collection))
    }

    /// Cached document, loading it from disk on first use
    fn document(&mut self, collection: &str) -> Result<Option<&mut IndexDocument>> {
        if !self.cache.contains_key(collection) {
            match fs::read(self.path(collection)) {
                Ok(bytes) => {
                    let doc: IndexDocument = serde_json::from_slice(&bytes)?;
                    self.cache.insert(collection.to_string(), doc);
                }
                Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
                Err(e) => return Err(e.into()),
            }
        }
        Ok(self.cache.get_mut(collection))
    }

    fn save(&self, collection: &str) -> Result<()> {
        let Some(doc) = self.cache.get(collection) else {
            return Ok(());
        };
        let bytes = serde_json::to_vec_pretty(doc)?;
        let path = self.path(collection);
        let tmp = path.with_extension("json.tmp");
        {
            let mut file = File::create(&tmp)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    /// Initialize empty buckets for each field. Replaces any existing index.
    pub fn create<S: AsRef<str>>(&mut self, collection: &str, fields: &[S]) -> Result<()> {
        self.cache
            .insert(collection.to_string(), IndexDocument::new(fields));
        self.save(collection)
    }

    /// Add fields to an existing index (or start one), then index `records`
    pub fn extend<S: AsRef<str>>(
        &mut self,
        collection: &str,
        fields: &[S],
        records: &[Record],
    ) -> Result<()> {
        let mut doc = self.document(collection)?.cloned().unwrap_or_default();
        for field in fields {
            doc.fields.entry(field.as_ref().to_string()).or_default();
        }
        doc.clear();
        for record in records {
            doc.add(record);
        }
        self.cache.insert(collection.to_string(), doc);
        self.save(collection)
    }

    /// Delete a collection's index document
    pub fn drop_index(&mut self, collection: &str) -> Result<()> {
        self.cache.remove(collection);
        match fs::remove_file(self.path(collection)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Empty the buckets but keep the field set
    pub fn clear(&mut self, collection: &str) -> Result<()> {
        let Some(doc) = self.document(collection)? else {
            return Ok(());
        };
        doc.clear();
        self.save(collection)
    }

    /// Index a record under its current values (idempotent)
    pub fn update(&mut self, collection: &str, record: &Record) -> Result<()> {
        let Some(doc) = self.document(collection)? else {
            return Ok(());
        };
        doc.add(record);
        self.save(collection)
    }

    /// Move a record to the buckets of its new values
    pub fn reindex(&mut self, collection: &str, record: &Record) -> Result<()> {
        let Some(doc) = self.document(collection)? else {
            return Ok(());
        };
        doc.remove(&record.id);
        doc.add(record);
        self.save(collection)
    }

    /// Remove an identifier from every bucket of every field
    pub fn remove_id(&mut self, collection: &str, id: &Uuid) -> Result<()> {
        let Some(doc) = self.document(collection)? else {
            return Ok(());
        };
        doc.remove(id);
        self.save(collection)
    }

    /// Clear and repopulate from a full record set. No-op without an index.
    pub fn rebuild(&mut self, collection: &str, records: &[Record]) -> Result<bool> {
        let Some(doc) = self.document(collection)? else {
            return Ok(false);
        };
        doc.clear();
        for record in records {
            doc.add(record);
        }
        self.save(collection)?;
        Ok(true)
    }

    /// True iff at least one top-level query key has a configured index
    pub fn can_use_index(&mut self, collection: &str, query: &Document) -> Result<bool> {
        Ok(self
            .document(collection)?
            .map_or(false, |doc| doc.covers(query)))
    }

    /// Candidate identifiers for the bare-valued indexed keys of a query
    pub fn query_index(&mut self, collection: &str, query: &Document) -> Result<Option<HashSet<Uuid>>> {
        let ids = self
            .document(collection)?
            .and_then(|doc| doc.lookup(query));
        trace!(
            "Index lookup on {} resolved {:?} candidates",
            collection,
            ids.as_ref().map(HashSet::len)
        );
        Ok(ids)
    }

    /// Indexed field names of a collection
    pub fn fields(&mut self, collection: &str) -> Result<Vec<String>> {
        Ok(self
            .document(collection)?
            .map(|doc| doc.fields.keys().cloned().collect())
            .unwrap_or_default())
    }

    #[cfg(test)]
    fn snapshot(&mut self, collection: &str) -> Result<Option<IndexDocument>> {
        Ok(self.document(collection)?.cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn person(name: &str, age: &str) -> Record {
        Record::new(Uuid::new_v4())
            .with_field("name", name)
            .with_field("age", age)
    }

    fn query(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_update_and_lookup() {
        let dir = TempDir::new().unwrap();
        let mut index = IndexStore::open(dir.path()).unwrap();
        index.create("users", &["age"]).unwrap();

        let alice = person("Alice", "30");
        let bob = person("Bob", "20");
        index.update("users", &alice).unwrap();
        index.update("users", &bob).unwrap();
        // idempotent
        index.update("users", &alice).unwrap();

        let ids = index.query_index("users", &query(json!({"age": 30}))).unwrap().unwrap();
        assert_eq!(ids, [alice.id].into_iter().collect());

        let doc = index.snapshot("users").unwrap().unwrap();
        assert_eq!(doc.fields["age"]["30"].len(), 1);
    }

    #[test]
    fn test_operator_queries_fall_back() {
        let dir = TempDir::new().unwrap();
        let mut index = IndexStore::open(dir.path()).unwrap();
        index.create("users", &["age"]).unwrap();

        let q = query(json!({"age": {"$gt": 25}}));
        assert!(index.can_use_index("users", &q).unwrap());
        assert!(index.query_index("users", &q).unwrap().is_none());
    }

    #[test]
    fn test_lookup_intersects_keys() {
        let dir = TempDir::new().unwrap();
        let mut index = IndexStore::open(dir.path()).unwrap();
        index.create("users", &["name", "age"]).unwrap();

        let a = person("Alice", "30");
        let b = person("Bob", "30");
        index.update("users", &a).unwrap();
        index.update("users", &b).unwrap();

        let ids = index
            .query_index("users", &query(json!({"age": "30", "name": "Bob", "city": "x"})))
            .unwrap()
            .unwrap();
        assert_eq!(ids, [b.id].into_iter().collect());

        let none = index
            .query_index("users", &query(json!({"age": "31"})))
            .unwrap()
            .unwrap();
        assert!(none.is_empty());
    }

    #[test]
    fn test_remove_id_drops_empty_buckets() {
        let dir = TempDir::new().unwrap();
        let mut index = IndexStore::open(dir.path()).unwrap();
        index.create("users", &["age"]).unwrap();

        let a = person("Alice", "30");
        index.update("users", &a).unwrap();
        index.remove_id("users", &a.id).unwrap();

        let doc = index.snapshot("users").unwrap().unwrap();
        assert!(doc.fields["age"].is_empty());
    }

    #[test]
    fn test_reindex_moves_buckets() {
        let dir = TempDir::new().unwrap();
        let mut index = IndexStore::open(dir.path()).unwrap();
        index.create("users", &["age"]).unwrap();

        let mut a = person("Alice", "30");
        index.update("users", &a).unwrap();
        a.set("age", "31");
        index.reindex("users", &a).unwrap();

        let doc = index.snapshot("users").unwrap().unwrap();
        assert!(!doc.fields["age"].contains_key("30"));
        assert!(doc.fields["age"]["31"].contains(&a.id));
    }

    #[test]
    fn test_unindexed_collection_is_noop() {
        let dir = TempDir::new().unwrap();
        let mut index = IndexStore::open(dir.path()).unwrap();

        let a = person("Alice", "30");
        index.update("plain", &a).unwrap();
        assert!(!index.can_use_index("plain", &query(json!({"age": 30}))).unwrap());
        assert!(!index.rebuild("plain", &[a]).unwrap());
        assert!(!dir.path().join("plain.json").exists());
    }

    #[test]
    fn test_document_persists_across_instances() {
        let dir = TempDir::new().unwrap();
        let a = person("Alice", "30");
        {
            let mut index = IndexStore::open(dir.path()).unwrap();
            index.create("users", &["age"]).unwrap();
            index.update("users", &a).unwrap();
        }

        let mut index = IndexStore::open(dir.path()).unwrap();
        assert_eq!(index.fields("users").unwrap(), vec!["age"]);
        let ids = index.query_index("users", &query(json!({"age": "30"}))).unwrap().unwrap();
        assert!(ids.contains(&a.id));

        let raw: Value = serde_json::from_slice(&fs::read(dir.path().join("users.json")).unwrap()).unwrap();
        assert_eq!(raw["age"]["30"][0], json!(a.id.to_string()));
    }

    #[test]
    fn test_clear_keeps_fields_and_drop_removes() {
        let dir = TempDir::new().unwrap();
        let mut index = IndexStore::open(dir.path()).unwrap();
        index.create("users", &["age", "name"]).unwrap();
        index.update("users", &person("A", "1")).unwrap();

        index.clear("users").unwrap();
        let doc = index.snapshot("users").unwrap().unwrap();
        assert_eq!(doc.fields.len(), 2);
        assert!(doc.fields.values().all(|b| b.is_empty()));

        index.drop_index("users").unwrap();
        assert!(index.snapshot("users").unwrap().is_none());
        assert!(!dir.path().join("users.json").exists());
    }

    #[test]
    fn test_extend_indexes_existing_records() {
        let dir = TempDir::new().unwrap();
        let mut index = IndexStore::open(dir.path()).unwrap();
        let a = person("Alice", "30");

        index.extend("users", &["name"], &[a.clone()]).unwrap();
        let ids = index.query_index("users", &query(json!({"name": "Alice"}))).unwrap().unwrap();
        assert!(ids.contains(&a.id));
    }
}
