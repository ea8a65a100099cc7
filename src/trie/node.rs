use std::sync::Arc;

use array_init::array_init;

use crate::crypto::Hash;
use crate::trie::key::TrieKey;

/// Number of child slots in a branch node
pub const BRANCH_WIDTH: usize = 16;

/// Node types in the Merkle Patricia Trie
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    /// Empty subtree
    Null,

    /// 16-way fork with an optional value for keys ending here
    Branch(BranchNode),

    /// Shared path segment; the child is always a branch
    Extension(ExtensionNode),

    /// Remaining key suffix and its value
    Leaf(LeafNode),
}

#[derive(Debug, Clone, PartialEq)]
pub struct BranchNode {
    /// Children nodes (one for each hex digit)
    pub children: [NodeRef; BRANCH_WIDTH],
    /// Value stored at this branch (if any)
    pub value: Option<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExtensionNode {
    /// Shared nibble path, never empty
    pub path: TrieKey,
    pub child: NodeRef,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LeafNode {
    /// Nibble-encoded key suffix (may be empty)
    pub path: TrieKey,
    pub value: Vec<u8>,
}

/// Reference from a parent (or the trie root) to a node.
///
/// Committed nodes are immutable and shared between snapshots through the
/// `Arc`; a mutation always builds a fresh `Dirty` node along the changed
/// path.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeRef {
    /// No node
    Empty,
    /// Persisted node not loaded yet
    Hash(Hash),
    /// Persisted node held in memory
    Clean { hash: Hash, node: Arc<Node> },
    /// Node created or changed since the last commit
    Dirty(Arc<Node>),
}

impl NodeRef {
    /// Wrap a freshly built node
    pub fn dirty(node: Node) -> Self {
        match node {
            Node::Null => NodeRef::Empty,
            node => NodeRef::Dirty(Arc::new(node)),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, NodeRef::Empty)
    }

    pub fn is_dirty(&self) -> bool {
        matches!(self, NodeRef::Dirty(_))
    }

    /// Hash of the referenced node, if it has been committed
    pub fn hash(&self) -> Option<&Hash> {
        match self {
            NodeRef::Hash(hash) | NodeRef::Clean { hash, .. } => Some(hash),
            NodeRef::Empty | NodeRef::Dirty(_) => None,
        }
    }

    /// The in-memory node, if loaded
    pub fn loaded(&self) -> Option<&Arc<Node>> {
        match self {
            NodeRef::Clean { node, .. } | NodeRef::Dirty(node) => Some(node),
            NodeRef::Empty | NodeRef::Hash(_) => None,
        }
    }

    /// Same node reference (pointer or hash identity)
    pub fn same_as(&self, other: &NodeRef) -> bool {
        match (self, other) {
            (NodeRef::Empty, NodeRef::Empty) => true,
            (NodeRef::Dirty(a), NodeRef::Dirty(b)) => Arc::ptr_eq(a, b),
            _ => match (self.hash(), other.hash()) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            },
        }
    }
}

impl Node {
    /// Create a new leaf node
    pub fn leaf(path: TrieKey, value: Vec<u8>) -> Self {
        Node::Leaf(LeafNode { path, value })
    }

    /// Create a new extension node
    pub fn extension(path: TrieKey, child: NodeRef) -> Self {
        Node::Extension(ExtensionNode { path, child })
    }

    /// Create a new branch node with no children or value
    pub fn empty_branch() -> BranchNode {
        BranchNode {
            children: array_init(|_| NodeRef::Empty),
            value: None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Node::Null)
    }

    /// Value held by a leaf or a branch
    pub fn value(&self) -> Option<&Vec<u8>> {
        match self {
            Node::Leaf(leaf) => Some(&leaf.value),
            Node::Branch(branch) => branch.value.as_ref(),
            Node::Extension(_) | Node::Null => None,
        }
    }

    /// Get the node type as a string
    pub fn node_type(&self) -> &'static str {
        match self {
            Node::Null => "null",
            Node::Leaf(_) => "leaf",
            Node::Extension(_) => "extension",
            Node::Branch(_) => "branch",
        }
    }
}

impl BranchNode {
    /// Number of non-empty children
    pub fn child_count(&self) -> usize {
        self.children.iter().filter(|c| !c.is_empty()).count()
    }

    /// Index of the only child, if there is exactly one
    pub fn single_child(&self) -> Option<usize> {
        let mut found = None;
        for (i, child) in self.children.iter().enumerate() {
            if child.is_empty() {
                continue;
            }
            if found.is_some() {
                return None;
            }
            found = Some(i);
        }
        found
    }
}
