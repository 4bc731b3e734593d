/// Test utilities and helpers for FluxDB testing
///
/// This module provides common test utilities to simplify writing tests.

use anyhow::Context;
use flux_api::{Database, RecordBuilder};
use flux_core::{Document, Record, StoreConfig};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use uuid::Uuid;

/// Install a fmt subscriber honouring `RUST_LOG`. Safe to call repeatedly.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

/// Test database wrapper that manages temporary directory lifecycle
pub struct TestDatabase {
    pub db: Database,
    pub path: PathBuf,
    config: StoreConfig,
    _temp_dir: Option<TempDir>,
}

impl TestDatabase {
    /// Create a new test database with a temporary directory
    pub fn new() -> Self {
        Self::with_config(StoreConfig::default())
    }

    /// Create a test database whose buffer flushes every `records` inserts
    pub fn with_buffer_size(records: usize) -> Self {
        Self::with_config(StoreConfig::new().with_buffer_size(records))
    }

    pub fn with_config(config: StoreConfig) -> Self {
        init_tracing();
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let path = temp_dir.path().to_path_buf();
        let db = Database::open_with_config(&path, config.clone()).expect("Failed to open database");

        Self {
            db,
            path,
            config,
            _temp_dir: Some(temp_dir),
        }
    }

    /// Open a test database at a specific path
    pub fn open(path: PathBuf) -> Self {
        let db = Database::open(&path).expect("Failed to open database");

        Self {
            db,
            path,
            config: StoreConfig::default(),
            _temp_dir: None,
        }
    }

    /// Get the database path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Close and reopen the database (for testing persistence)
    pub fn reopen(self) -> Self {
        let Self {
            db,
            path,
            config,
            _temp_dir,
        } = self;
        drop(db);
        let db = Database::open_with_config(&path, config.clone()).expect("Failed to reopen database");
        Self {
            db,
            path,
            config,
            _temp_dir,
        }
    }

    /// Path of a collection's backing file
    pub fn collection_file(&self, collection: &str) -> PathBuf {
        self.path
            .join(format!("{}.{}", collection, self.config.collection_extension))
    }

    /// Raw bytes of a collection file, None if it does not exist
    pub fn collection_bytes(&self, collection: &str) -> anyhow::Result<Option<Vec<u8>>> {
        let path = self.collection_file(collection);
        if !path.exists() {
            return Ok(None);
        }
        let bytes = std::fs::read(&path)
            .with_context(|| format!("reading collection file {}", path.display()))?;
        Ok(Some(bytes))
    }
}

impl Default for TestDatabase {
    fn default() -> Self {
        Self::new()
    }
}

const CITIES: [&str; 4] = ["Oslo", "Bergen", "Rome", "Lima"];

/// Mock data generator for testing
pub struct MockDataGenerator {
    counter: u64,
}

impl MockDataGenerator {
    /// Create a new mock data generator
    pub fn new() -> Self {
        Self { counter: 0 }
    }

    /// Generate a person record and advance the counter
    pub fn person(&mut self) -> Document {
        let idx = self.counter;
        self.counter += 1;
        RecordBuilder::new()
            .string("name", format!("person{}", idx))
            .number("age", 18 + (idx % 50))
            .string("city", CITIES[(idx % CITIES.len() as u64) as usize])
            .build()
    }

    /// Generate a record with a payload of the given size (does not increment)
    pub fn sized_record(&self, bytes: usize) -> Document {
        RecordBuilder::new()
            .number("index", self.counter)
            .string("data", "x".repeat(bytes))
            .build()
    }
}

impl Default for MockDataGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// Insert `count` generated people, returning their identifiers
pub fn write_people(db: &Database, collection: &str, count: usize) -> anyhow::Result<Vec<Uuid>> {
    let mut gen = MockDataGenerator::new();
    (0..count)
        .map(|i| {
            db.insert(collection, gen.person())
                .with_context(|| format!("inserting person {} into {}", i, collection))
        })
        .collect()
}

/// JSON object literal to a query/patch document
pub fn doc(value: Value) -> Document {
    match value {
        Value::Object(map) => map,
        other => panic!("Expected a JSON object, got {}", other),
    }
}

/// Values of `field` across records, in order
pub fn field_values<'a>(records: &'a [Record], field: &str) -> Vec<&'a str> {
    records.iter().map(|r| r.get(field).unwrap_or("")).collect()
}

/// Identifiers of records, sorted, for order-insensitive comparison
pub fn sorted_ids(records: &[Record]) -> Vec<Uuid> {
    let mut ids: Vec<Uuid> = records.iter().map(|r| r.id).collect();
    ids.sort();
    ids
}
