/// Store - the engine tying collections, buffer, indexes and transactions together
///
/// Mutating calls pass through the transaction gate first; when they run,
/// inserts go to the write buffer and the index, while updates and deletes
/// flush the buffer and rewrite the collection file. Reads resolve candidates
/// through the index when the query allows it, otherwise scan, then merge in
/// the buffered records.
///
/// A `Store` is single-threaded (`&mut self` everywhere). Callers sharing one
/// across threads must serialize access themselves.

use crate::aggregate;
use crate::buffer::WriteBuffer;
use crate::codec;
use crate::collection::CollectionStore;
use crate::config::StoreConfig;
use crate::index::IndexStore;
use crate::query::{self, FindOptions};
use crate::transaction::{PendingOp, TransactionBuffer, TransactionState};
use crate::types::{Document, Record};
use crate::{Error, Result};
use serde_json::Value;
use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;

pub struct Store {
    dir: PathBuf,
    config: StoreConfig,
    collections: CollectionStore,
    indexes: IndexStore,
    buffer: WriteBuffer,
    transaction: TransactionBuffer,
}

impl Store {
    /// Open a store rooted at `path` with the default configuration
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_config(path, StoreConfig::default())
    }

    /// Open a store rooted at `path`
    pub fn open_with_config(path: impl AsRef<Path>, config: StoreConfig) -> Result<Self> {
        config.validate().map_err(Error::InvalidArgument)?;

        let dir = path.as_ref().to_path_buf();
        if config.create_dirs {
            fs::create_dir_all(&dir)?;
        } else if !dir.is_dir() {
            return Err(Error::InvalidArgument(format!(
                "storage directory {} does not exist",
                dir.display()
            )));
        }

        let collections = CollectionStore::new(&dir, config.collection_extension.clone());
        let indexes = IndexStore::open(dir.join(&config.index_dir))?;
        let buffer = WriteBuffer::new(config.buffer_size);

        info!("Opened store at {} (buffer size {})", dir.display(), config.buffer_size);

        Ok(Self {
            dir,
            config,
            collections,
            indexes,
            buffer,
            transaction: TransactionBuffer::new(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    // Collections

    /// Create an empty collection, indexing `indexed_fields` if non-empty.
    ///
    /// Returns false if the collection already exists.
    pub fn create_collection<S: AsRef<str>>(&mut self, name: &str, indexed_fields: &[S]) -> Result<bool> {
        if !self.collections.create(name)? {
            return Ok(false);
        }
        if !indexed_fields.is_empty() {
            self.indexes.create(name, indexed_fields)?;
        }
        info!("Created collection {} ({} indexed fields)", name, indexed_fields.len());
        Ok(true)
    }

    /// Remove a collection, its index and its buffered records
    pub fn drop_collection(&mut self, name: &str) -> Result<bool> {
        if !self.collections.remove(name)? {
            return Ok(false);
        }
        self.indexes.drop_index(name)?;
        self.buffer.discard(name);
        info!("Dropped collection {}", name);
        Ok(true)
    }

    /// Empty a collection, keeping its indexed field set
    pub fn clear_collection(&mut self, name: &str) -> Result<bool> {
        if !self.collections.clear(name)? {
            return Ok(false);
        }
        self.indexes.clear(name)?;
        self.buffer.discard(name);
        info!("Cleared collection {}", name);
        Ok(true)
    }

    pub fn list_collections(&self) -> Result<Vec<String>> {
        self.collections.list()
    }

    /// Indexed field names of a collection, empty without an index
    pub fn list_indexes(&mut self, name: &str) -> Result<Vec<String>> {
        self.collections.path(name)?;
        self.indexes.fields(name)
    }

    /// Index additional fields of an existing collection, populating the
    /// index from every live record. False if the collection does not exist.
    pub fn create_index<S: AsRef<str>>(&mut self, name: &str, fields: &[S]) -> Result<bool> {
        if !self.collections.exists(name)? {
            return Ok(false);
        }
        let records = self.live_records(name)?;
        self.indexes.extend(name, fields, &records)?;
        info!("Indexed {} fields of collection {} over {} records", fields.len(), name, records.len());
        Ok(true)
    }

    // Records

    /// Insert a record, returning its identifier.
    ///
    /// The identifier is fixed now, even when a transaction defers the
    /// insert itself. A missing collection is created when the insert runs.
    pub fn insert(&mut self, collection: &str, data: &Document) -> Result<Uuid> {
        self.collections.path(collection)?;
        let record = Record::from_document(data)?;
        let id = record.id;
        self.submit(PendingOp::Insert {
            collection: collection.to_string(),
            record,
        })?;
        Ok(id)
    }

    /// Insert several records, returning their identifiers in input order
    pub fn insert_many(&mut self, collection: &str, data: &[Document]) -> Result<Vec<Uuid>> {
        data.iter().map(|doc| self.insert(collection, doc)).collect()
    }

    /// Merge `patch` into the record with identifier `id`.
    ///
    /// False if the collection or record does not exist. While a transaction
    /// is active the update is queued and this returns true.
    pub fn update(&mut self, collection: &str, id: Uuid, patch: &Document) -> Result<bool> {
        if !self.transaction.is_active() && !self.collections.exists(collection)? {
            return Ok(false);
        }
        self.collections.path(collection)?;
        self.submit(PendingOp::Update {
            collection: collection.to_string(),
            id,
            patch: patch.clone(),
        })
    }

    /// Remove the record with identifier `id`.
    ///
    /// False if the collection or record does not exist. While a transaction
    /// is active the delete is queued and this returns true.
    pub fn delete(&mut self, collection: &str, id: Uuid) -> Result<bool> {
        if !self.transaction.is_active() && !self.collections.exists(collection)? {
            return Ok(false);
        }
        self.collections.path(collection)?;
        self.submit(PendingOp::Delete {
            collection: collection.to_string(),
            id,
        })
    }

    /// Whether a live record (on disk or buffered) has this identifier
    pub fn exists(&self, collection: &str, id: Uuid) -> Result<bool> {
        if self.buffer.contains(collection, &id) {
            return Ok(true);
        }
        let ids: HashSet<Uuid> = [id].into_iter().collect();
        Ok(!self.collections.scan_by_ids(collection, &ids)?.is_empty())
    }

    /// Records matching `opts`, buffered records included
    pub fn find(&mut self, collection: &str, opts: &FindOptions) -> Result<Vec<Record>> {
        let persisted = self.load_candidates(collection, &opts.query)?;
        let buffered = self.buffer.records(collection);
        Ok(query::merge(persisted, buffered, opts))
    }

    /// First record matching `query`
    pub fn find_one(&mut self, collection: &str, query: &Document) -> Result<Option<Record>> {
        let opts = FindOptions::new().with_query(query.clone());
        Ok(self.find(collection, &opts)?.into_iter().next())
    }

    /// Number of live records matching `query`
    pub fn count(&mut self, collection: &str, query: &Document) -> Result<usize> {
        let opts = FindOptions::new().with_query(query.clone());
        Ok(self.find(collection, &opts)?.len())
    }

    /// Run a grouping pipeline over every live record of a collection
    pub fn aggregate(&mut self, collection: &str, pipeline: &[Value]) -> Result<Vec<Document>> {
        let rows = self
            .find(collection, &FindOptions::new())?
            .iter()
            .map(Record::to_document)
            .collect();
        aggregate::run(rows, pipeline)
    }

    // Transactions

    pub fn begin_transaction(&mut self) -> Result<()> {
        self.transaction.begin()
    }

    /// Replay queued operations in order, then flush every touched
    /// collection. Returns the number of operations applied.
    ///
    /// Replay is not atomic: when an operation fails, the ones before it stay
    /// applied, the rest are discarded and `Error::CommitFailed` reports how
    /// many took effect.
    pub fn commit(&mut self) -> Result<usize> {
        let ops = self.transaction.take_for_commit()?;
        let total = ops.len();

        let mut touched = BTreeSet::new();
        for (applied, op) in ops.into_iter().enumerate() {
            touched.insert(op.collection().to_string());
            let kind = op.kind();
            if let Err(e) = self.execute(op) {
                warn!("Commit stopped at {} operation {} of {}: {}", kind, applied + 1, total, e);
                return Err(Error::CommitFailed {
                    applied,
                    source: Box::new(e),
                });
            }
        }

        for name in &touched {
            self.buffer
                .flush(name, &self.collections)
                .map_err(|e| Error::CommitFailed {
                    applied: total,
                    source: Box::new(e),
                })?;
        }

        debug!("Committed {} operations across {} collections", total, touched.len());
        Ok(total)
    }

    /// Discard queued operations. Returns how many were dropped.
    pub fn rollback(&mut self) -> Result<usize> {
        self.transaction.rollback()
    }

    pub fn is_transaction_active(&self) -> bool {
        self.transaction.is_active()
    }

    pub fn transaction_state(&self) -> TransactionState {
        self.transaction.state()
    }

    /// Number of operations queued in the active transaction
    pub fn pending_operations(&self) -> usize {
        self.transaction.len()
    }

    // Buffer

    /// Append a collection's buffered records to its file
    pub fn flush(&mut self, collection: &str) -> Result<usize> {
        self.buffer.flush(collection, &self.collections)
    }

    pub fn flush_all(&mut self) -> Result<usize> {
        self.buffer.flush_all(&self.collections)
    }

    /// Number of records waiting in a collection's buffer
    pub fn buffered(&self, collection: &str) -> usize {
        self.buffer.len(collection)
    }

    // Import/export

    pub fn export_collection(&mut self, collection: &str, output: impl AsRef<Path>) -> Result<bool> {
        crate::transfer::export_collection(&self.collections, &mut self.buffer, collection, output.as_ref())
    }

    pub fn import_collection(&mut self, collection: &str, input: impl AsRef<Path>) -> Result<bool> {
        crate::transfer::import_collection(
            &self.collections,
            &mut self.buffer,
            &mut self.indexes,
            collection,
            input.as_ref(),
        )
    }

    // Internals

    fn submit(&mut self, op: PendingOp) -> Result<bool> {
        match self.transaction.defer(op) {
            Some(op) => self.execute(op),
            None => Ok(true),
        }
    }

    fn execute(&mut self, op: PendingOp) -> Result<bool> {
        match op {
            PendingOp::Insert { collection, record } => {
                self.apply_insert(&collection, &record)?;
                Ok(true)
            }
            PendingOp::Update { collection, id, patch } => self.apply_update(&collection, id, &patch),
            PendingOp::Delete { collection, id } => self.apply_delete(&collection, id),
        }
    }

    fn apply_insert(&mut self, collection: &str, record: &Record) -> Result<()> {
        if self.collections.create(collection)? {
            info!("Created collection {} on first insert", collection);
        }

        let full = self.buffer.push(collection, codec::encode(record));
        self.indexes.update(collection, record)?;
        if full {
            self.buffer.flush(collection, &self.collections)?;
        }
        Ok(())
    }

    fn apply_update(&mut self, collection: &str, id: Uuid, patch: &Document) -> Result<bool> {
        let Some(mut records) = self.locate(collection, id)? else {
            return Ok(false);
        };
        let Some(record) = records.iter_mut().find(|r| r.id == id) else {
            return Ok(false);
        };
        record.apply_patch(patch);
        let updated = record.clone();

        self.collections.rewrite(collection, &records)?;
        self.indexes.reindex(collection, &updated)?;
        debug!("Updated record {} in {}", id, collection);
        Ok(true)
    }

    fn apply_delete(&mut self, collection: &str, id: Uuid) -> Result<bool> {
        let Some(mut records) = self.locate(collection, id)? else {
            return Ok(false);
        };
        let before = records.len();
        records.retain(|r| r.id != id);
        if records.len() == before {
            return Ok(false);
        }

        self.collections.rewrite(collection, &records)?;
        self.indexes.remove_id(collection, &id)?;
        debug!("Deleted record {} from {}", id, collection);
        Ok(true)
    }

    /// Persisted records of a collection holding `id`, or `None` when no
    /// live record has it. A buffered target is flushed first so the
    /// returned records include it; otherwise storage is left untouched.
    fn locate(&mut self, collection: &str, id: Uuid) -> Result<Option<Vec<Record>>> {
        if !self.collections.exists(collection)? {
            return Ok(None);
        }
        if self.buffer.contains(collection, &id) {
            self.buffer.flush(collection, &self.collections)?;
            return Ok(Some(self.collections.scan_all(collection)?));
        }
        let records = self.collections.scan_all(collection)?;
        Ok(records.iter().any(|r| r.id == id).then_some(records))
    }

    /// Persisted records that may match `query`, via the index when possible
    fn load_candidates(&mut self, collection: &str, query: &Document) -> Result<Vec<Record>> {
        if !query.is_empty() && self.indexes.can_use_index(collection, query)? {
            if let Some(ids) = self.indexes.query_index(collection, query)? {
                return self.collections.scan_by_ids(collection, &ids);
            }
        }
        self.collections.scan_all(collection)
    }

    fn live_records(&self, collection: &str) -> Result<Vec<Record>> {
        let mut records = self.collections.scan_all(collection)?;
        records.extend(self.buffer.records(collection));
        Ok(records)
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        if let Err(e) = self.buffer.flush_all(&self.collections) {
            warn!("Failed to flush write buffer on close: {}", e);
        }
    }
}
