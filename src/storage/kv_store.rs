use std::collections::HashSet;
use std::path::Path;

use log::{debug, error};
use rocksdb::{BlockBasedOptions, DBCompressionType, IteratorMode, Options, WriteBatch, DB};
use thiserror::Error;

use crate::config::StorageConfig;

/// Error type for KVStore operations
#[derive(Debug, Error)]
pub enum KVStoreError {
    /// IO error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// RocksDB error
    #[error("RocksDB error: {0}")]
    RocksDBError(String),

    /// Batch operation failed
    #[error("Batch operation failed: {0}")]
    BatchOperationFailed(String),

    /// Store has been closed
    #[error("Store is closed")]
    Closed,

    /// Other error
    #[error("Other error: {0}")]
    Other(String),
}

impl From<rocksdb::Error> for KVStoreError {
    fn from(err: rocksdb::Error) -> Self {
        KVStoreError::RocksDBError(err.to_string())
    }
}

/// Write batch operation for atomic updates
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteBatchOperation {
    /// Put operation
    Put { key: Vec<u8>, value: Vec<u8> },
    /// Delete operation
    Delete { key: Vec<u8> },
}

/// Extension trait for Vec<WriteBatchOperation>
pub trait WriteBatchOperationExt {
    /// Add a put operation to the batch
    fn put(&mut self, key: Vec<u8>, value: Vec<u8>);

    /// Add a delete operation to the batch
    fn delete(&mut self, key: Vec<u8>);
}

impl WriteBatchOperationExt for Vec<WriteBatchOperation> {
    fn put(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.push(WriteBatchOperation::Put { key, value });
    }

    fn delete(&mut self, key: Vec<u8>) {
        self.push(WriteBatchOperation::Delete { key });
    }
}

/// Byte-keyed key-value store.
///
/// Keys are unique and no iteration order is guaranteed. Implementations use
/// interior mutability so a single store can be shared between tries behind
/// an `Arc`.
pub trait KVStore: Send + Sync {
    /// Put a key-value pair
    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), KVStoreError>;

    /// Get a value by key
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, KVStoreError>;

    /// Remove a key-value pair; removing an absent key is not an error
    fn remove(&self, key: &[u8]) -> Result<(), KVStoreError>;

    /// Check if a key exists
    fn contains_key(&self, key: &[u8]) -> Result<bool, KVStoreError> {
        Ok(self.get(key)?.is_some())
    }

    /// All keys currently in the store
    fn key_set(&self) -> Result<HashSet<Vec<u8>>, KVStoreError>;

    /// Write a batch of operations atomically
    fn write_batch(&self, operations: Vec<WriteBatchOperation>) -> Result<(), KVStoreError>;

    /// All key-value pairs whose key starts with `prefix`
    fn prefix_lookup(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, KVStoreError>;

    /// Flush any pending writes to durable storage
    fn flush(&self) -> Result<(), KVStoreError>;

    /// Flush and release background resources
    fn close(&self) -> Result<(), KVStoreError> {
        self.flush()
    }

    /// True if `remove` only marks keys for a later compaction
    fn defers_deletes(&self) -> bool {
        false
    }

    /// Remove every key
    fn clear(&self) -> Result<(), KVStoreError> {
        let mut batch = Vec::new();
        for key in self.key_set()? {
            batch.delete(key);
        }
        self.write_batch(batch)
    }
}

/// RocksDB implementation of KVStore
pub struct RocksDBStore {
    /// RocksDB instance
    db: DB,
}

impl RocksDBStore {
    /// Open (or create) a RocksDBStore with default options
    pub fn new(path: &Path) -> Result<Self, KVStoreError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        Self::with_options(path, opts)
    }

    /// Open a RocksDBStore tuned by a storage configuration
    pub fn with_config(config: &StorageConfig) -> Result<Self, KVStoreError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.set_max_open_files(config.max_open_files);
        opts.set_write_buffer_size(config.write_buffer_size * 1024 * 1024);
        opts.set_max_write_buffer_number(config.max_write_buffer_number);

        if config.enable_compression {
            opts.set_compression_type(compression_type(&config.compression_type));
        } else {
            opts.set_compression_type(DBCompressionType::None);
        }

        if config.enable_bloom_filters {
            let mut block_opts = BlockBasedOptions::default();
            block_opts.set_bloom_filter(config.bloom_filter_bits_per_key as f64, false);
            opts.set_block_based_table_factory(&block_opts);
        }

        Self::with_options(Path::new(&config.db_path), opts)
    }

    /// Open a RocksDBStore with custom options
    pub fn with_options(path: &Path, options: Options) -> Result<Self, KVStoreError> {
        let db = DB::open(&options, path).map_err(|e| {
            error!("Failed to open RocksDB at {:?}: {}", path, e);
            KVStoreError::RocksDBError(format!("Failed to open RocksDB: {}", e))
        })?;
        debug!("Opened RocksDB at {:?}", path);
        Ok(Self { db })
    }

    /// Compact the database files
    pub fn compact_range(&self) {
        self.db.compact_range(None::<&[u8]>, None::<&[u8]>);
    }
}

fn compression_type(name: &str) -> DBCompressionType {
    match name.to_ascii_lowercase().as_str() {
        "snappy" => DBCompressionType::Snappy,
        "zlib" => DBCompressionType::Zlib,
        "zstd" => DBCompressionType::Zstd,
        "none" => DBCompressionType::None,
        _ => DBCompressionType::Lz4,
    }
}

impl KVStore for RocksDBStore {
    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), KVStoreError> {
        self.db.put(key, value)
            .map_err(|e| KVStoreError::RocksDBError(format!("Failed to put key: {}", e)))
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, KVStoreError> {
        self.db.get(key)
            .map_err(|e| KVStoreError::RocksDBError(format!("Failed to get key: {}", e)))
    }

    fn remove(&self, key: &[u8]) -> Result<(), KVStoreError> {
        self.db.delete(key)
            .map_err(|e| KVStoreError::RocksDBError(format!("Failed to delete key: {}", e)))
    }

    fn key_set(&self) -> Result<HashSet<Vec<u8>>, KVStoreError> {
        let mut keys = HashSet::new();
        for item in self.db.iterator(IteratorMode::Start) {
            let (key, _) = item
                .map_err(|e| KVStoreError::RocksDBError(format!("Failed to iterate: {}", e)))?;
            keys.insert(key.to_vec());
        }
        Ok(keys)
    }

    fn write_batch(&self, operations: Vec<WriteBatchOperation>) -> Result<(), KVStoreError> {
        let mut batch = WriteBatch::default();

        for op in operations {
            match op {
                WriteBatchOperation::Put { key, value } => {
                    batch.put(&key, &value);
                },
                WriteBatchOperation::Delete { key } => {
                    batch.delete(&key);
                },
            }
        }

        self.db.write(batch)
            .map_err(|e| KVStoreError::BatchOperationFailed(format!("Failed to write batch: {}", e)))
    }

    fn prefix_lookup(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, KVStoreError> {
        let mut results = Vec::new();
        let iterator = self.db.iterator(IteratorMode::From(prefix, rocksdb::Direction::Forward));

        for item in iterator {
            let (key, value) = item
                .map_err(|e| KVStoreError::RocksDBError(format!("Failed to iterate: {}", e)))?;

            if key.starts_with(prefix) {
                results.push((key.to_vec(), value.to_vec()));
            } else {
                // Keys are sorted, so we've moved past the prefix
                break;
            }
        }

        Ok(results)
    }

    fn flush(&self) -> Result<(), KVStoreError> {
        self.db.flush()
            .map_err(|e| KVStoreError::RocksDBError(format!("Failed to flush: {}", e)))
    }

    fn close(&self) -> Result<(), KVStoreError> {
        self.flush()?;
        self.db.cancel_all_background_work(true);
        debug!("Closed RocksDB store");
        Ok(())
    }
}
