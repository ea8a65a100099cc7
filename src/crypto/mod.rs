// VibeCoin Cryptography Module
//
// Hash primitives used for trie node addressing. Concrete digests are
// injected into tries through the `HashFunction` trait.

pub mod hash;

pub use hash::{Hash, HashAlgorithm, HashFunction, hash_from_hex, keccak256, sha256, sha3_256};
