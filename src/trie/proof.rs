use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::crypto::{Hash, HashFunction};
use crate::storage::{KVStore, MemoryStore};
use crate::trie::error::TrieResult;
use crate::trie::key::TrieKey;
use crate::trie::mpt::{check_key, MerklePatriciaTrie};
use crate::trie::node::Node;

/// Proof for Merkle Patricia Trie verification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Proof {
    /// The root hash of the trie
    pub root: Hash,
    /// The key being proven
    pub key: Vec<u8>,
    /// Encodings of the nodes on the lookup path, root first
    pub nodes: Vec<Vec<u8>>,
}

impl MerklePatriciaTrie {
    /// Collect the nodes a verifier needs to look `key` up under the
    /// committed root. Works for absent keys too.
    pub fn prove(&self, key: &[u8]) -> TrieResult<Proof> {
        check_key(key)?;
        let root = self.root_hash()?;
        let path = TrieKey::from_normal(key);

        let mut nodes = Vec::new();
        let mut node_ref = self.root_ref().clone();
        let mut depth = 0;

        while let Some(hash) = node_ref.hash().copied() {
            nodes.push(self.encoded(&hash)?);
            let node = self.resolve(&node_ref)?;
            match &*node {
                Node::Null | Node::Leaf(_) => break,
                Node::Extension(ext) => {
                    if !path.nibbles()[depth..].starts_with(ext.path.nibbles()) {
                        break;
                    }
                    depth += ext.path.len();
                    node_ref = ext.child.clone();
                }
                Node::Branch(branch) => {
                    if depth == path.len() {
                        break;
                    }
                    node_ref = branch.children[path.get(depth) as usize].clone();
                    depth += 1;
                }
            }
        }

        Ok(Proof {
            root,
            key: key.to_vec(),
            nodes,
        })
    }
}

/// Check a proof against its root.
///
/// Returns the proven value, or `None` if the proof shows the key is absent.
/// A proof missing a node on the path fails with `MissingNode`; a tampered
/// node no longer hashes to its parent's reference and is reported the same
/// way.
pub fn verify_proof(proof: &Proof, hasher: Arc<dyn HashFunction>) -> TrieResult<Option<Vec<u8>>> {
    let store = Arc::new(MemoryStore::new());
    for encoded in &proof.nodes {
        store.put(&hasher.digest(encoded), encoded)?;
    }
    let trie = MerklePatriciaTrie::new(store, hasher).revert_to(proof.root)?;
    trie.get(&proof.key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::keccak256;
    use crate::trie::error::TrieError;

    fn committed_trie() -> MerklePatriciaTrie {
        let mut trie = MerklePatriciaTrie::new(Arc::new(MemoryStore::new()), Arc::new(keccak256));
        for (key, value) in [("do", "verb"), ("dog", "puppy"), ("doge", "coin"), ("horse", "stallion")] {
            trie.put(key.as_bytes(), value.as_bytes()).unwrap();
        }
        trie.commit().unwrap();
        trie
    }

    #[test]
    fn test_proof_of_presence() {
        let trie = committed_trie();
        for (key, value) in [("do", "verb"), ("dog", "puppy"), ("doge", "coin"), ("horse", "stallion")] {
            let proof = trie.prove(key.as_bytes()).unwrap();
            assert_eq!(proof.root, trie.root_hash().unwrap());
            let proven = verify_proof(&proof, Arc::new(keccak256)).unwrap();
            assert_eq!(proven, Some(value.as_bytes().to_vec()));
        }
    }

    #[test]
    fn test_proof_of_absence() {
        let trie = committed_trie();
        let proof = trie.prove(b"dot").unwrap();
        assert!(!proof.nodes.is_empty());
        assert_eq!(verify_proof(&proof, Arc::new(keccak256)).unwrap(), None);
    }

    #[test]
    fn test_tampered_proof_fails() {
        let trie = committed_trie();
        let mut proof = trie.prove(b"dog").unwrap();
        let last = proof.nodes.len() - 1;
        let tampered = proof.nodes[last].len() - 1;
        proof.nodes[last][tampered] ^= 0xff;

        let result = verify_proof(&proof, Arc::new(keccak256));
        assert!(matches!(result, Err(TrieError::MissingNode(_))));
    }

    #[test]
    fn test_truncated_proof_fails() {
        let trie = committed_trie();
        let mut proof = trie.prove(b"horse").unwrap();
        proof.nodes.truncate(1);
        if trie.prove(b"horse").unwrap().nodes.len() > 1 {
            assert!(matches!(
                verify_proof(&proof, Arc::new(keccak256)),
                Err(TrieError::MissingNode(_))
            ));
        }
    }

    #[test]
    fn test_uncommitted_trie_cannot_prove() {
        let mut trie = committed_trie();
        trie.put(b"cat", b"kitten").unwrap();
        assert!(matches!(trie.prove(b"cat"), Err(TrieError::InvariantViolation(_))));
    }
}
