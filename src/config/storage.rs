use serde::{Serialize, Deserialize};

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Database path
    pub db_path: String,

    /// Maximum open files
    pub max_open_files: i32,

    /// Write buffer size in MB
    pub write_buffer_size: usize,

    /// Maximum write buffer number
    pub max_write_buffer_number: i32,

    /// Enable compression
    pub enable_compression: bool,

    /// Compression type (none, snappy, lz4, zlib, zstd)
    pub compression_type: String,

    /// Enable bloom filters
    pub enable_bloom_filters: bool,

    /// Bloom filter bits per key
    pub bloom_filter_bits_per_key: i32,

    /// Key prefix for the state trie namespace inside the shared database
    pub trie_prefix: String,

    /// Key prefix under which deferred deletes are recorded
    pub tombstone_prefix: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: "./data/vibetrie".to_string(),
            max_open_files: 1000,
            write_buffer_size: 64, // 64MB
            max_write_buffer_number: 3,
            enable_compression: true,
            compression_type: "lz4".to_string(),
            enable_bloom_filters: true,
            bloom_filter_bits_per_key: 10,
            trie_prefix: "state-trie:".to_string(),
            tombstone_prefix: "state-trie-tombstones:".to_string(),
        }
    }
}
