use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use dashmap::DashMap;
use log::{debug, trace};

use crate::config::TrieConfig;
use crate::crypto::{Hash, HashFunction};
use crate::storage::{KVStore, WriteBatchOperation, WriteBatchOperationExt};
use crate::trie::encode::{decode_verified, encode_node, null_hash};
use crate::trie::error::{TrieError, TrieResult};
use crate::trie::key::TrieKey;
use crate::trie::node::{BranchNode, Node, NodeRef};
use crate::trie::scanner::{DumpScanner, EntryScanner, KeyScanner, Scanner, ValueScanner};

/// Persistent Merkle Patricia Trie over a [`KVStore`].
///
/// Mutations copy the path from the root to the changed node and leave the
/// rest shared, so committed roots stay valid while a working trie diverges.
/// Nothing reaches the store until [`commit`](Self::commit).
pub struct MerklePatriciaTrie {
    /// Root node of the trie
    root: NodeRef,
    store: Arc<dyn KVStore>,
    hasher: Arc<dyn HashFunction>,
    config: TrieConfig,
    /// Root hash of an empty trie
    null_hash: Hash,
    /// Decoded nodes by hash
    node_cache: DashMap<Hash, Arc<Node>>,
    /// Persisted nodes replaced since the last commit
    stale: Vec<Hash>,
}

impl MerklePatriciaTrie {
    /// Create an empty trie with default configuration
    pub fn new(store: Arc<dyn KVStore>, hasher: Arc<dyn HashFunction>) -> Self {
        Self::with_config(store, hasher, TrieConfig::default())
    }

    /// Create an empty trie; `hasher` takes precedence over `config.hash_algorithm`
    pub fn with_config(store: Arc<dyn KVStore>, hasher: Arc<dyn HashFunction>, config: TrieConfig) -> Self {
        let null_hash = null_hash(hasher.as_ref());
        Self {
            root: NodeRef::Empty,
            store,
            hasher,
            config,
            null_hash,
            node_cache: DashMap::new(),
            stale: Vec::new(),
        }
    }

    /// Create an empty trie hashing with the configured algorithm
    pub fn from_config(store: Arc<dyn KVStore>, config: &TrieConfig) -> Self {
        Self::with_config(store, config.hash_algorithm.function(), config.clone())
    }

    pub fn store(&self) -> &Arc<dyn KVStore> {
        &self.store
    }

    pub fn hasher(&self) -> &Arc<dyn HashFunction> {
        &self.hasher
    }

    pub fn config(&self) -> &TrieConfig {
        &self.config
    }

    /// Root hash of the empty trie under this trie's hash function
    pub fn null_hash(&self) -> Hash {
        self.null_hash
    }

    /// True if there are mutations not yet committed
    pub fn is_dirty(&self) -> bool {
        self.root.is_dirty()
    }

    /// Hash of the committed root
    pub fn root_hash(&self) -> TrieResult<Hash> {
        match &self.root {
            NodeRef::Empty => Ok(self.null_hash),
            NodeRef::Dirty(_) => Err(TrieError::InvariantViolation(
                "Root hash requested for an uncommitted trie".to_string(),
            )),
            NodeRef::Hash(hash) | NodeRef::Clean { hash, .. } => Ok(*hash),
        }
    }

    pub(crate) fn root_ref(&self) -> &NodeRef {
        &self.root
    }

    /// Get a value from the trie
    pub fn get(&self, key: &[u8]) -> TrieResult<Option<Vec<u8>>> {
        check_key(key)?;
        let path = TrieKey::from_normal(key);
        let mut node_ref = self.root.clone();
        let mut depth = 0;

        loop {
            let node = self.resolve(&node_ref)?;
            match &*node {
                Node::Null => return Ok(None),
                Node::Leaf(leaf) => {
                    if leaf.path.nibbles() == &path.nibbles()[depth..] {
                        return Ok(Some(leaf.value.clone()));
                    }
                    return Ok(None);
                }
                Node::Extension(ext) => {
                    if !path.nibbles()[depth..].starts_with(ext.path.nibbles()) {
                        return Ok(None);
                    }
                    depth += ext.path.len();
                    node_ref = ext.child.clone();
                }
                Node::Branch(branch) => {
                    if depth == path.len() {
                        return Ok(branch.value.clone());
                    }
                    node_ref = branch.children[path.get(depth) as usize].clone();
                    depth += 1;
                }
            }
        }
    }

    /// Insert or replace a value. An empty value removes the key.
    pub fn put(&mut self, key: &[u8], value: &[u8]) -> TrieResult<()> {
        check_key(key)?;
        if value.is_empty() {
            return self.remove(key);
        }

        let root = self.root.clone();
        if let Some(new_root) = self.insert_at(&root, TrieKey::from_normal(key), value.to_vec())? {
            self.root = new_root;
        }
        Ok(())
    }

    /// Remove a key; removing an absent key is a no-op
    pub fn remove(&mut self, key: &[u8]) -> TrieResult<()> {
        check_key(key)?;
        let root = self.root.clone();
        if let Some(new_root) = self.remove_at(&root, TrieKey::from_normal(key))? {
            self.root = new_root;
        }
        Ok(())
    }

    /// Persist every dirty node in one write batch and return the new root hash.
    ///
    /// Committing a clean trie writes nothing.
    pub fn commit(&mut self) -> TrieResult<Hash> {
        if !self.root.is_dirty() && self.stale.is_empty() {
            return self.root_hash();
        }

        let mut puts = Vec::new();
        let root = self.persist(&self.root, &mut puts)?;

        let mut batch: Vec<WriteBatchOperation> = Vec::with_capacity(puts.len() + self.stale.len());
        if self.disposes_stale() {
            let rewritten: HashSet<&Hash> = puts.iter().map(|(hash, _)| hash).collect();
            let mut seen = HashSet::new();
            for hash in &self.stale {
                if !rewritten.contains(hash) && seen.insert(*hash) {
                    batch.delete(hash.to_vec());
                }
            }
        }
        let disposed = batch.len();
        let written = puts.len();
        for (hash, bytes) in puts {
            batch.put(hash.to_vec(), bytes);
        }
        self.store.write_batch(batch)?;

        self.stale.clear();
        self.root = root;
        let root_hash = self.root_hash()?;
        debug!(
            "Committed trie root {} ({} nodes written, {} disposed)",
            hex::encode(root_hash),
            written,
            disposed
        );
        Ok(root_hash)
    }

    /// Trie positioned at `root_hash` over `store`, sharing this trie's hash
    /// function and configuration
    pub fn revert(&self, root_hash: Hash, store: Arc<dyn KVStore>) -> TrieResult<MerklePatriciaTrie> {
        let mut trie = MerklePatriciaTrie::with_config(store, self.hasher.clone(), self.config.clone());
        if root_hash != trie.null_hash {
            let node = trie.load(&root_hash)?;
            trie.root = NodeRef::Clean { hash: root_hash, node };
        }
        debug!("Reverted trie to root {}", hex::encode(root_hash));
        Ok(trie)
    }

    /// Trie positioned at `root_hash` over this trie's store
    pub fn revert_to(&self, root_hash: Hash) -> TrieResult<MerklePatriciaTrie> {
        self.revert(root_hash, self.store.clone())
    }

    /// Empty trie over this trie's store
    pub fn revert_empty(&self) -> MerklePatriciaTrie {
        MerklePatriciaTrie::with_config(self.store.clone(), self.hasher.clone(), self.config.clone())
    }

    /// Flush the underlying store
    pub fn flush(&self) -> TrieResult<()> {
        self.store.flush()?;
        Ok(())
    }

    /// Visit every reachable node, parents before children
    pub fn traverse(&self, scanner: &mut dyn Scanner) -> TrieResult<()> {
        self.traverse_at(&self.root, TrieKey::empty(), scanner)
    }

    /// Hashes of all nodes reachable from the committed root
    pub fn dump(&self) -> TrieResult<HashSet<Hash>> {
        self.ensure_committed("dump")?;
        let mut scanner = DumpScanner::default();
        self.traverse(&mut scanner)?;
        Ok(scanner.into_hashes())
    }

    /// Encoding of every reachable node, enough to rebuild the trie elsewhere
    pub fn dump_nodes(&self) -> TrieResult<HashMap<Hash, Vec<u8>>> {
        let mut nodes = HashMap::new();
        for hash in self.dump()? {
            let bytes = self.encoded(&hash)?;
            nodes.insert(hash, bytes);
        }
        Ok(nodes)
    }

    /// All stored keys
    pub fn key_set(&self) -> TrieResult<HashSet<Vec<u8>>> {
        let mut scanner = KeyScanner::default();
        self.traverse(&mut scanner)?;
        scanner.into_keys().iter().map(|key| key.to_normal()).collect()
    }

    /// All stored values
    pub fn values(&self) -> TrieResult<Vec<Vec<u8>>> {
        let mut scanner = ValueScanner::default();
        self.traverse(&mut scanner)?;
        Ok(scanner.into_values())
    }

    /// All key-value pairs
    pub fn entries(&self) -> TrieResult<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut scanner = EntryScanner::default();
        self.traverse(&mut scanner)?;
        scanner
            .into_entries()
            .into_iter()
            .map(|(key, value)| Ok((key.to_normal()?, value)))
            .collect()
    }

    /// Number of stored keys
    pub fn size(&self) -> TrieResult<usize> {
        Ok(self.values()?.len())
    }

    /// Node behind a reference, loading it from the store if needed
    pub(crate) fn resolve(&self, node_ref: &NodeRef) -> TrieResult<Arc<Node>> {
        match node_ref {
            NodeRef::Empty => Ok(Arc::new(Node::Null)),
            NodeRef::Clean { node, .. } | NodeRef::Dirty(node) => Ok(node.clone()),
            NodeRef::Hash(hash) => self.load(hash),
        }
    }

    /// Stored encoding of a persisted node
    pub(crate) fn encoded(&self, hash: &Hash) -> TrieResult<Vec<u8>> {
        self.store
            .get(hash)?
            .ok_or_else(|| TrieError::MissingNode(hex::encode(hash)))
    }

    fn load(&self, hash: &Hash) -> TrieResult<Arc<Node>> {
        if *hash == self.null_hash {
            return Ok(Arc::new(Node::Null));
        }
        if let Some(node) = self.node_cache.get(hash) {
            return Ok(node.value().clone());
        }

        let bytes = self.encoded(hash)?;
        let node = decode_verified(self.hasher.as_ref(), hash, &bytes)?;
        trace!("Loaded {} node {}", node.node_type(), hex::encode(hash));
        self.cache_node(*hash, node.clone());
        Ok(node)
    }

    fn cache_node(&self, hash: Hash, node: Arc<Node>) {
        if self.node_cache.len() < self.config.node_cache_size {
            self.node_cache.insert(hash, node);
        }
    }

    fn ensure_committed(&self, operation: &str) -> TrieResult<()> {
        if self.root.is_dirty() {
            return Err(TrieError::InvariantViolation(format!(
                "{} requires a committed trie",
                operation
            )));
        }
        Ok(())
    }

    /// Replaced nodes are removed only from stores that defer deletes. The
    /// store is content-addressed, so a replaced hash may still be referenced
    /// elsewhere in the new root; compaction keeps it while a retained root
    /// reaches it.
    fn disposes_stale(&self) -> bool {
        self.config.dispose_stale_nodes && self.store.defers_deletes()
    }

    /// Record a persisted node that is being replaced
    fn retire(&mut self, node_ref: &NodeRef) {
        if !self.disposes_stale() {
            return;
        }
        if let Some(hash) = node_ref.hash() {
            if *hash != self.null_hash {
                self.stale.push(*hash);
            }
        }
    }

    /// Insert below `node_ref`; `None` means nothing changed
    fn insert_at(&mut self, node_ref: &NodeRef, path: TrieKey, value: Vec<u8>) -> TrieResult<Option<NodeRef>> {
        let node = self.resolve(node_ref)?;
        match &*node {
            Node::Null => Ok(Some(NodeRef::dirty(Node::leaf(path, value)))),

            Node::Leaf(leaf) => {
                if leaf.path == path {
                    if leaf.value == value {
                        return Ok(None);
                    }
                    self.retire(node_ref);
                    return Ok(Some(NodeRef::dirty(Node::leaf(path, value))));
                }

                // Split at the first differing nibble
                let common = leaf.path.common_prefix_length(&path);
                let mut branch = Node::empty_branch();
                place(&mut branch, &leaf.path, common, leaf.value.clone());
                place(&mut branch, &path, common, value);

                self.retire(node_ref);
                Ok(Some(with_prefix(path.slice(0, common), branch)))
            }

            Node::Extension(ext) => {
                let common = ext.path.common_prefix_length(&path);
                if common == ext.path.len() {
                    return match self.insert_at(&ext.child, path.shift(common), value)? {
                        None => Ok(None),
                        Some(child) => {
                            self.retire(node_ref);
                            Ok(Some(NodeRef::dirty(Node::extension(ext.path.clone(), child))))
                        }
                    };
                }

                let mut branch = Node::empty_branch();
                let rest = ext.path.shift(common + 1);
                branch.children[ext.path.get(common) as usize] = if rest.is_empty() {
                    ext.child.clone()
                } else {
                    NodeRef::dirty(Node::extension(rest, ext.child.clone()))
                };
                place(&mut branch, &path, common, value);

                self.retire(node_ref);
                Ok(Some(with_prefix(path.slice(0, common), branch)))
            }

            Node::Branch(branch) => {
                let mut updated = branch.clone();
                if path.is_empty() {
                    if branch.value.as_ref() == Some(&value) {
                        return Ok(None);
                    }
                    updated.value = Some(value);
                } else {
                    let index = path.get(0) as usize;
                    match self.insert_at(&branch.children[index], path.shift(1), value)? {
                        None => return Ok(None),
                        Some(child) => updated.children[index] = child,
                    }
                }
                self.retire(node_ref);
                Ok(Some(NodeRef::dirty(Node::Branch(updated))))
            }
        }
    }

    /// Remove below `node_ref`; `None` means the key was absent
    fn remove_at(&mut self, node_ref: &NodeRef, path: TrieKey) -> TrieResult<Option<NodeRef>> {
        let node = self.resolve(node_ref)?;
        match &*node {
            Node::Null => Ok(None),

            Node::Leaf(leaf) => {
                if leaf.path != path {
                    return Ok(None);
                }
                self.retire(node_ref);
                Ok(Some(NodeRef::Empty))
            }

            Node::Extension(ext) => {
                if !path.starts_with(&ext.path) {
                    return Ok(None);
                }
                match self.remove_at(&ext.child, path.shift(ext.path.len()))? {
                    None => Ok(None),
                    Some(child) => {
                        self.retire(node_ref);
                        Ok(Some(self.join(ext.path.clone(), child)?))
                    }
                }
            }

            Node::Branch(branch) => {
                let mut updated = branch.clone();
                if path.is_empty() {
                    if updated.value.take().is_none() {
                        return Ok(None);
                    }
                } else {
                    let index = path.get(0) as usize;
                    match self.remove_at(&branch.children[index], path.shift(1))? {
                        None => return Ok(None),
                        Some(child) => updated.children[index] = child,
                    }
                }
                self.retire(node_ref);
                Ok(Some(self.normalize(updated)?))
            }
        }
    }

    /// Collapse a branch left with too little content after a removal
    fn normalize(&mut self, branch: BranchNode) -> TrieResult<NodeRef> {
        if branch.child_count() == 0 {
            return Ok(match branch.value {
                Some(value) => NodeRef::dirty(Node::leaf(TrieKey::empty(), value)),
                None => NodeRef::Empty,
            });
        }
        if branch.value.is_none() {
            if let Some(index) = branch.single_child() {
                let child = branch.children[index].clone();
                return self.join(TrieKey::single(index as u8), child);
            }
        }
        Ok(NodeRef::dirty(Node::Branch(branch)))
    }

    /// Put `prefix` in front of `child`, merging it into a leaf or extension
    /// child so an extension always points at a branch
    fn join(&mut self, prefix: TrieKey, child: NodeRef) -> TrieResult<NodeRef> {
        let node = self.resolve(&child)?;
        match &*node {
            Node::Null => Ok(NodeRef::Empty),
            Node::Branch(_) => Ok(NodeRef::dirty(Node::extension(prefix, child))),
            Node::Extension(ext) => {
                self.retire(&child);
                Ok(NodeRef::dirty(Node::extension(prefix.concat(&ext.path), ext.child.clone())))
            }
            Node::Leaf(leaf) => {
                self.retire(&child);
                Ok(NodeRef::dirty(Node::leaf(prefix.concat(&leaf.path), leaf.value.clone())))
            }
        }
    }

    /// Hash and encode dirty nodes bottom-up, collecting the store writes
    fn persist(&self, node_ref: &NodeRef, puts: &mut Vec<(Hash, Vec<u8>)>) -> TrieResult<NodeRef> {
        let node = match node_ref {
            NodeRef::Dirty(node) => node,
            other => return Ok(other.clone()),
        };

        let committed = match &**node {
            Node::Branch(branch) => {
                let mut branch = branch.clone();
                for child in branch.children.iter_mut() {
                    if child.is_dirty() {
                        let persisted = self.persist(child, puts)?;
                        *child = persisted;
                    }
                }
                Node::Branch(branch)
            }
            Node::Extension(ext) => Node::extension(ext.path.clone(), self.persist(&ext.child, puts)?),
            other => other.clone(),
        };

        let bytes = encode_node(&committed)?;
        let hash = self.hasher.digest(&bytes);
        puts.push((hash, bytes));

        let committed = Arc::new(committed);
        self.cache_node(hash, committed.clone());
        Ok(NodeRef::Clean { hash, node: committed })
    }

    fn traverse_at(&self, node_ref: &NodeRef, path: TrieKey, scanner: &mut dyn Scanner) -> TrieResult<()> {
        if node_ref.is_empty() {
            return Ok(());
        }
        let node = self.resolve(node_ref)?;
        if !scanner.scan(&path, node_ref.hash(), &node) {
            return Ok(());
        }
        match &*node {
            Node::Branch(branch) => {
                for (index, child) in branch.children.iter().enumerate() {
                    if !child.is_empty() {
                        self.traverse_at(child, path.push(index as u8), scanner)?;
                    }
                }
            }
            Node::Extension(ext) => self.traverse_at(&ext.child, path.concat(&ext.path), scanner)?,
            Node::Leaf(_) | Node::Null => {}
        }
        Ok(())
    }
}

/// Reject keys the trie cannot address
pub(crate) fn check_key(key: &[u8]) -> TrieResult<()> {
    if key.is_empty() {
        return Err(TrieError::Conversion("Empty key".to_string()));
    }
    Ok(())
}

/// Hang `value` for `path` off a fresh branch that sits `depth` nibbles down
fn place(branch: &mut BranchNode, path: &TrieKey, depth: usize, value: Vec<u8>) {
    if depth == path.len() {
        branch.value = Some(value);
    } else {
        branch.children[path.get(depth) as usize] = NodeRef::dirty(Node::leaf(path.shift(depth + 1), value));
    }
}

/// Wrap a new branch in an extension when it sits below a shared prefix
fn with_prefix(prefix: TrieKey, branch: BranchNode) -> NodeRef {
    let branch = NodeRef::dirty(Node::Branch(branch));
    if prefix.is_empty() {
        branch
    } else {
        NodeRef::dirty(Node::extension(prefix, branch))
    }
}
