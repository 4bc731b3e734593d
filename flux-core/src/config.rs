/// Store configuration for buffering and on-disk layout
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Number of buffered records per collection that triggers a flush
    pub buffer_size: usize,

    /// Create the storage directory if it does not exist
    pub create_dirs: bool,

    /// File extension of collection files (without the dot)
    pub collection_extension: String,

    /// Sub-directory holding the per-collection index documents
    pub index_dir: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            buffer_size: 1000,
            create_dirs: true,
            collection_extension: "fdb".to_string(),
            index_dir: "indexes".to_string(),
        }
    }
}

impl StoreConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the flush threshold in records
    pub fn with_buffer_size(mut self, records: usize) -> Self {
        self.buffer_size = records;
        self
    }

    /// Set whether a missing storage directory is created
    pub fn with_create_dirs(mut self, create: bool) -> Self {
        self.create_dirs = create;
        self
    }

    /// Set the collection file extension
    pub fn with_collection_extension(mut self, ext: impl Into<String>) -> Self {
        self.collection_extension = ext.into();
        self
    }

    /// Set the index sub-directory name
    pub fn with_index_dir(mut self, dir: impl Into<String>) -> Self {
        self.index_dir = dir.into();
        self
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), String> {
        if self.buffer_size == 0 {
            return Err("buffer_size must be greater than 0".to_string());
        }

        if self.collection_extension.is_empty() || self.collection_extension.contains('.') {
            return Err("collection_extension must be a non-empty name without dots".to_string());
        }

        if self.index_dir.is_empty() {
            return Err("index_dir must not be empty".to_string());
        }

        Ok(())
    }
}
