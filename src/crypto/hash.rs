use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sha2::Sha256;
use sha3::{Digest, Keccak256, Sha3_256};

/// A 32-byte digest, used both as store key and as in-trie node reference
pub type Hash = [u8; 32];

/// Compute SHA-256 hash of data
pub fn sha256(data: &[u8]) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Compute Keccak-256 hash of data
pub fn keccak256(data: &[u8]) -> Hash {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Compute SHA3-256 hash of data
pub fn sha3_256(data: &[u8]) -> Hash {
    let mut hasher = Sha3_256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Hash function injected into tries.
///
/// Any `Fn(&[u8]) -> Hash` closure implements this trait, so callers can plug
/// in their own digest without wrapping it.
pub trait HashFunction: Send + Sync {
    fn digest(&self, data: &[u8]) -> Hash;
}

impl<F> HashFunction for F
where
    F: Fn(&[u8]) -> Hash + Send + Sync,
{
    fn digest(&self, data: &[u8]) -> Hash {
        self(data)
    }
}

/// Built-in hash algorithms selectable from configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HashAlgorithm {
    Keccak256,
    Sha3_256,
    Sha256,
}

impl Default for HashAlgorithm {
    fn default() -> Self {
        HashAlgorithm::Keccak256
    }
}

impl HashAlgorithm {
    /// Get the digest function for this algorithm
    pub fn function(&self) -> Arc<dyn HashFunction> {
        match self {
            HashAlgorithm::Keccak256 => Arc::new(keccak256),
            HashAlgorithm::Sha3_256 => Arc::new(sha3_256),
            HashAlgorithm::Sha256 => Arc::new(sha256),
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HashAlgorithm::Keccak256 => write!(f, "keccak256"),
            HashAlgorithm::Sha3_256 => write!(f, "sha3_256"),
            HashAlgorithm::Sha256 => write!(f, "sha256"),
        }
    }
}

/// Parse a 32-byte hash from a hex string (with or without `0x`)
pub fn hash_from_hex(s: &str) -> Result<Hash, String> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    let bytes = hex::decode(s).map_err(|e| format!("Invalid hex: {}", e))?;
    if bytes.len() != 32 {
        return Err(format!("Expected 32 bytes, got {}", bytes.len()));
    }
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&bytes);
    Ok(hash)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256() {
        // Test vector from https://www.di-mgt.com.au/sha_testvectors.html
        let expected = hex::decode("ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad").unwrap();
        assert_eq!(sha256(b"abc").to_vec(), expected);
    }

    #[test]
    fn test_keccak256_empty() {
        let expected = hex::decode("c5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470").unwrap();
        assert_eq!(keccak256(b"").to_vec(), expected);
    }

    #[test]
    fn test_algorithms_differ() {
        let data = b"vibecoin";
        let k = HashAlgorithm::Keccak256.function().digest(data);
        let s3 = HashAlgorithm::Sha3_256.function().digest(data);
        let s2 = HashAlgorithm::Sha256.function().digest(data);
        assert_ne!(k, s3);
        assert_ne!(k, s2);
        assert_eq!(s2, sha256(data));
    }

    #[test]
    fn test_closure_as_hash_function() {
        let f: Arc<dyn HashFunction> = Arc::new(|data: &[u8]| sha256(data));
        assert_eq!(f.digest(b"abc"), sha256(b"abc"));
    }

    #[test]
    fn test_hash_from_hex() {
        let h = keccak256(b"x");
        assert_eq!(hash_from_hex(&hex::encode(h)).unwrap(), h);
        assert_eq!(hash_from_hex(&format!("0x{}", hex::encode(h))).unwrap(), h);
        assert!(hash_from_hex("abcd").is_err());
        assert!(hash_from_hex("zz").is_err());
    }
}
