use std::sync::Arc;

use array_init::array_init;
use serde::{Deserialize, Serialize};

use crate::crypto::{Hash, HashFunction};
use crate::trie::error::{TrieError, TrieResult};
use crate::trie::key::TrieKey;
use crate::trie::node::{BranchNode, Node, NodeRef, BRANCH_WIDTH};

/// On-disk form of a node.
///
/// Children are referenced by hash only; leaf and extension paths use the
/// hex-prefix packing of [`TrieKey::to_packed`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
enum StoredNode {
    Empty,
    Branch {
        children: [Option<Hash>; BRANCH_WIDTH],
        value: Option<Vec<u8>>,
    },
    Extension {
        path: Vec<u8>,
        child: Hash,
    },
    Leaf {
        path: Vec<u8>,
        value: Vec<u8>,
    },
}

fn child_hash(child: &NodeRef) -> TrieResult<Option<Hash>> {
    match child {
        NodeRef::Empty => Ok(None),
        NodeRef::Dirty(_) => Err(TrieError::InvariantViolation(
            "Cannot encode a node with an uncommitted child".to_string(),
        )),
        other => Ok(other.hash().copied()),
    }
}

/// Serialize a node whose children are all committed
pub fn encode_node(node: &Node) -> TrieResult<Vec<u8>> {
    let stored = match node {
        Node::Null => StoredNode::Empty,
        Node::Branch(branch) => {
            let mut children: [Option<Hash>; BRANCH_WIDTH] = [None; BRANCH_WIDTH];
            for (slot, child) in children.iter_mut().zip(branch.children.iter()) {
                *slot = child_hash(child)?;
            }
            StoredNode::Branch {
                children,
                value: branch.value.clone(),
            }
        }
        Node::Extension(ext) => {
            let child = child_hash(&ext.child)?.ok_or_else(|| {
                TrieError::InvariantViolation("Extension node without a child".to_string())
            })?;
            StoredNode::Extension {
                path: ext.path.to_packed(false),
                child,
            }
        }
        Node::Leaf(leaf) => StoredNode::Leaf {
            path: leaf.path.to_packed(true),
            value: leaf.value.clone(),
        },
    };

    bincode::serialize(&stored)
        .map_err(|e| TrieError::InvariantViolation(format!("Failed to encode {} node: {}", node.node_type(), e)))
}

/// Deserialize a stored node; `hash` is only used for error reporting
pub fn decode_node(hash: &Hash, bytes: &[u8]) -> TrieResult<Node> {
    let corrupted = |reason: String| TrieError::CorruptedNode {
        hash: hex::encode(hash),
        reason,
    };

    let stored: StoredNode = bincode::deserialize(bytes).map_err(|e| corrupted(e.to_string()))?;

    let node = match stored {
        StoredNode::Empty => Node::Null,
        StoredNode::Branch { children, value } => {
            let children: [NodeRef; BRANCH_WIDTH] = array_init(|i| match children[i] {
                Some(h) => NodeRef::Hash(h),
                None => NodeRef::Empty,
            });
            Node::Branch(BranchNode { children, value })
        }
        StoredNode::Extension { path, child } => {
            let (path, is_leaf) = TrieKey::from_packed(&path).map_err(|e| corrupted(e.to_string()))?;
            if is_leaf {
                return Err(corrupted("extension path carries the leaf flag".to_string()));
            }
            if path.is_empty() {
                return Err(corrupted("extension with an empty path".to_string()));
            }
            Node::extension(path, NodeRef::Hash(child))
        }
        StoredNode::Leaf { path, value } => {
            let (path, is_leaf) = TrieKey::from_packed(&path).map_err(|e| corrupted(e.to_string()))?;
            if !is_leaf {
                return Err(corrupted("leaf path is missing the leaf flag".to_string()));
            }
            Node::leaf(path, value)
        }
    };
    Ok(node)
}

/// Digest of the encoded empty node, the root hash of an empty trie
pub fn null_hash(hasher: &dyn HashFunction) -> Hash {
    // Encoding the unit variant cannot fail
    let encoded = bincode::serialize(&StoredNode::Empty).unwrap_or_default();
    hasher.digest(&encoded)
}

/// Decode a node and check that it matches the hash it was stored under
pub fn decode_verified(hasher: &dyn HashFunction, hash: &Hash, bytes: &[u8]) -> TrieResult<Arc<Node>> {
    let actual = hasher.digest(bytes);
    if &actual != hash {
        return Err(TrieError::CorruptedNode {
            hash: hex::encode(hash),
            reason: format!("content hashes to {}", hex::encode(actual)),
        });
    }
    Ok(Arc::new(decode_node(hash, bytes)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::keccak256;

    fn committed(node: Node) -> NodeRef {
        let bytes = encode_node(&node).unwrap();
        NodeRef::Clean {
            hash: keccak256(&bytes),
            node: Arc::new(node),
        }
    }

    #[test]
    fn test_leaf_roundtrip() {
        let leaf = Node::leaf(TrieKey::from_hex("abc").unwrap(), b"value".to_vec());
        let bytes = encode_node(&leaf).unwrap();
        let decoded = decode_node(&keccak256(&bytes), &bytes).unwrap();
        assert_eq!(decoded, leaf);

        let empty_path = Node::leaf(TrieKey::empty(), b"v".to_vec());
        let bytes = encode_node(&empty_path).unwrap();
        assert_eq!(decode_node(&keccak256(&bytes), &bytes).unwrap(), empty_path);
    }

    #[test]
    fn test_branch_and_extension_reference_children_by_hash() {
        let child = committed(Node::leaf(TrieKey::from_hex("1").unwrap(), b"a".to_vec()));
        let child_hash = *child.hash().unwrap();

        let mut branch = Node::empty_branch();
        branch.children[3] = child;
        branch.value = Some(b"here".to_vec());
        let branch = Node::Branch(branch);
        let bytes = encode_node(&branch).unwrap();

        match decode_node(&keccak256(&bytes), &bytes).unwrap() {
            Node::Branch(decoded) => {
                assert_eq!(decoded.children[3], NodeRef::Hash(child_hash));
                assert_eq!(decoded.child_count(), 1);
                assert_eq!(decoded.value, Some(b"here".to_vec()));
            }
            other => panic!("expected branch, got {:?}", other),
        }

        let branch_ref = committed(branch);
        let ext = Node::extension(TrieKey::from_hex("12").unwrap(), branch_ref.clone());
        let bytes = encode_node(&ext).unwrap();
        match decode_node(&keccak256(&bytes), &bytes).unwrap() {
            Node::Extension(decoded) => {
                assert_eq!(decoded.path, TrieKey::from_hex("12").unwrap());
                assert_eq!(decoded.child, NodeRef::Hash(*branch_ref.hash().unwrap()));
            }
            other => panic!("expected extension, got {:?}", other),
        }
    }

    #[test]
    fn test_dirty_child_cannot_be_encoded() {
        let mut branch = Node::empty_branch();
        branch.children[0] = NodeRef::dirty(Node::leaf(TrieKey::empty(), vec![1]));
        let result = encode_node(&Node::Branch(branch));
        assert!(matches!(result, Err(TrieError::InvariantViolation(_))));
    }

    #[test]
    fn test_garbage_is_corrupted() {
        let result = decode_node(&[0u8; 32], &[0xff, 0xff, 0xff, 0xff, 0x01]);
        assert!(matches!(result, Err(TrieError::CorruptedNode { .. })));
    }

    #[test]
    fn test_hash_mismatch_is_corrupted() {
        let bytes = encode_node(&Node::leaf(TrieKey::single(1), vec![1])).unwrap();
        let hasher: &dyn HashFunction = &keccak256;
        assert!(decode_verified(hasher, &keccak256(&bytes), &bytes).is_ok());
        assert!(matches!(
            decode_verified(hasher, &[9u8; 32], &bytes),
            Err(TrieError::CorruptedNode { .. })
        ));
    }

    #[test]
    fn test_null_hash_is_stable() {
        let hasher: &dyn HashFunction = &keccak256;
        let bytes = encode_node(&Node::Null).unwrap();
        assert_eq!(null_hash(hasher), keccak256(&bytes));
        assert_eq!(decode_node(&null_hash(hasher), &bytes).unwrap(), Node::Null);
    }
}
