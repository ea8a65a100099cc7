use std::collections::HashSet;

use crate::crypto::Hash;
use crate::trie::key::TrieKey;
use crate::trie::node::Node;

/// Visitor driven by [`MerklePatriciaTrie::traverse`](crate::trie::MerklePatriciaTrie::traverse).
///
/// `path` is the nibble path leading to `node`; `hash` is `None` for nodes
/// not committed yet. Returning `false` skips the node's children.
pub trait Scanner {
    fn scan(&mut self, path: &TrieKey, hash: Option<&Hash>, node: &Node) -> bool;
}

/// Full key and value if `node` terminates a key at `path`
fn terminal<'a>(path: &TrieKey, node: &'a Node) -> Option<(TrieKey, &'a Vec<u8>)> {
    match node {
        Node::Leaf(leaf) => Some((path.concat(&leaf.path), &leaf.value)),
        Node::Branch(branch) => branch.value.as_ref().map(|v| (path.clone(), v)),
        Node::Extension(_) | Node::Null => None,
    }
}

/// Collects the hash of every reachable persisted node
#[derive(Debug, Default)]
pub struct DumpScanner {
    hashes: HashSet<Hash>,
}

impl DumpScanner {
    pub fn into_hashes(self) -> HashSet<Hash> {
        self.hashes
    }
}

impl Scanner for DumpScanner {
    fn scan(&mut self, _path: &TrieKey, hash: Option<&Hash>, _node: &Node) -> bool {
        if let Some(hash) = hash {
            self.hashes.insert(*hash);
        }
        true
    }
}

/// Collects the nibble path of every stored key
#[derive(Debug, Default)]
pub struct KeyScanner {
    keys: Vec<TrieKey>,
}

impl KeyScanner {
    pub fn into_keys(self) -> Vec<TrieKey> {
        self.keys
    }
}

impl Scanner for KeyScanner {
    fn scan(&mut self, path: &TrieKey, _hash: Option<&Hash>, node: &Node) -> bool {
        if let Some((key, _)) = terminal(path, node) {
            self.keys.push(key);
        }
        true
    }
}

#[derive(Debug, Default)]
pub struct ValueScanner {
    values: Vec<Vec<u8>>,
}

impl ValueScanner {
    pub fn into_values(self) -> Vec<Vec<u8>> {
        self.values
    }
}

impl Scanner for ValueScanner {
    fn scan(&mut self, path: &TrieKey, _hash: Option<&Hash>, node: &Node) -> bool {
        if let Some((_, value)) = terminal(path, node) {
            self.values.push(value.clone());
        }
        true
    }
}

#[derive(Debug, Default)]
pub struct EntryScanner {
    entries: Vec<(TrieKey, Vec<u8>)>,
}

impl EntryScanner {
    pub fn into_entries(self) -> Vec<(TrieKey, Vec<u8>)> {
        self.entries
    }
}

impl Scanner for EntryScanner {
    fn scan(&mut self, path: &TrieKey, _hash: Option<&Hash>, node: &Node) -> bool {
        if let Some((key, value)) = terminal(path, node) {
            self.entries.push((key, value.clone()));
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trie::node::NodeRef;

    #[test]
    fn test_terminal_nodes() {
        let prefix = TrieKey::from_hex("ab").unwrap();

        let leaf = Node::leaf(TrieKey::from_hex("cd").unwrap(), vec![1]);
        let mut entries = EntryScanner::default();
        assert!(entries.scan(&prefix, None, &leaf));

        let mut branch = Node::empty_branch();
        branch.value = Some(vec![2]);
        branch.children[1] = NodeRef::Hash([1u8; 32]);
        entries.scan(&prefix, Some(&[3u8; 32]), &Node::Branch(branch));

        let ext = Node::extension(TrieKey::single(1), NodeRef::Hash([1u8; 32]));
        entries.scan(&prefix, Some(&[4u8; 32]), &ext);

        let entries = entries.into_entries();
        assert_eq!(
            entries,
            vec![
                (TrieKey::from_hex("abcd").unwrap(), vec![1]),
                (TrieKey::from_hex("ab").unwrap(), vec![2]),
            ]
        );
    }

    #[test]
    fn test_dump_scanner_skips_uncommitted() {
        let leaf = Node::leaf(TrieKey::empty(), vec![1]);
        let mut dump = DumpScanner::default();
        dump.scan(&TrieKey::empty(), None, &leaf);
        dump.scan(&TrieKey::empty(), Some(&[5u8; 32]), &leaf);
        dump.scan(&TrieKey::single(2), Some(&[5u8; 32]), &leaf);

        let hashes = dump.into_hashes();
        assert_eq!(hashes.len(), 1);
        assert!(hashes.contains(&[5u8; 32]));
    }
}
