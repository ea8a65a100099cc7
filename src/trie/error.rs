use thiserror::Error;

use crate::storage::KVStoreError;

/// Error types for trie operations
#[derive(Debug, Error)]
pub enum TrieError {
    /// Malformed, empty or misaligned key
    #[error("Conversion error: {0}")]
    Conversion(String),

    /// A referenced node is not in the store (compacted away or foreign root)
    #[error("Missing trie node: {0}")]
    MissingNode(String),

    /// A stored node failed its hash check or could not be decoded
    #[error("Corrupted trie node {hash}: {reason}")]
    CorruptedNode { hash: String, reason: String },

    /// Underlying store failure
    #[error("Storage error: {0}")]
    Storage(#[from] KVStoreError),

    /// Logic error such as dumping an uncommitted trie
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),
}

/// Result type for trie operations
pub type TrieResult<T> = Result<T, TrieError>;
