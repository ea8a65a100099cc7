use std::fmt;

use crate::trie::error::TrieError;

/// Nibble is a 4-bit value (0-15)
pub type Nibble = u8;

/// Nibble path through the trie.
///
/// Each byte of a normal key becomes two nibbles, high half first. Paths
/// stored in leaves and extensions are arbitrary nibble runs and need not be
/// byte-aligned.
#[derive(Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TrieKey(Vec<Nibble>);

impl TrieKey {
    /// The empty path
    pub fn empty() -> Self {
        TrieKey(Vec::new())
    }

    /// A path made of one nibble
    pub fn single(nibble: Nibble) -> Self {
        debug_assert!(nibble < 16);
        TrieKey(vec![nibble])
    }

    /// Split a byte key into nibbles.
    ///
    /// For example, the byte 0xAB becomes the nibbles 0xA and 0xB.
    pub fn from_normal(bytes: &[u8]) -> Self {
        let mut nibbles = Vec::with_capacity(bytes.len() * 2);
        for &byte in bytes {
            nibbles.push(byte >> 4);
            nibbles.push(byte & 0x0F);
        }
        TrieKey(nibbles)
    }

    /// Build a path from raw nibbles, rejecting values above 15
    pub fn from_nibbles(nibbles: Vec<Nibble>) -> Result<Self, TrieError> {
        if let Some(bad) = nibbles.iter().find(|n| **n > 0x0F) {
            return Err(TrieError::Conversion(format!("Invalid nibble: {}", bad)));
        }
        Ok(TrieKey(nibbles))
    }

    /// Parse a path written as hex digits, one digit per nibble
    pub fn from_hex(hex: &str) -> Result<Self, TrieError> {
        let mut nibbles = Vec::with_capacity(hex.len());
        for c in hex.chars() {
            let nibble = c
                .to_digit(16)
                .ok_or_else(|| TrieError::Conversion(format!("Invalid hex character: {}", c)))?;
            nibbles.push(nibble as Nibble);
        }
        Ok(TrieKey(nibbles))
    }

    /// Join nibble pairs back into bytes; fails if the path is not byte-aligned
    pub fn to_normal(&self) -> Result<Vec<u8>, TrieError> {
        if self.0.len() % 2 != 0 {
            return Err(TrieError::Conversion(format!(
                "Key of {} nibbles is not byte-aligned",
                self.0.len()
            )));
        }
        Ok(self.0.chunks(2).map(|pair| (pair[0] << 4) | pair[1]).collect())
    }

    pub fn nibbles(&self) -> &[Nibble] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Nibble at `index`
    pub fn get(&self, index: usize) -> Nibble {
        self.0[index]
    }

    /// Length of the longest shared prefix
    pub fn common_prefix_length(&self, other: &TrieKey) -> usize {
        common_prefix_length(&self.0, &other.0)
    }

    /// Sub-path `[from, to)`
    pub fn slice(&self, from: usize, to: usize) -> TrieKey {
        TrieKey(self.0[from..to].to_vec())
    }

    /// Path with the first `n` nibbles dropped
    pub fn shift(&self, n: usize) -> TrieKey {
        TrieKey(self.0[n..].to_vec())
    }

    pub fn starts_with(&self, prefix: &TrieKey) -> bool {
        self.0.starts_with(&prefix.0)
    }

    /// `self` followed by `other`
    pub fn concat(&self, other: &TrieKey) -> TrieKey {
        let mut nibbles = Vec::with_capacity(self.0.len() + other.0.len());
        nibbles.extend_from_slice(&self.0);
        nibbles.extend_from_slice(&other.0);
        TrieKey(nibbles)
    }

    /// `self` followed by one nibble
    pub fn push(&self, nibble: Nibble) -> TrieKey {
        let mut nibbles = Vec::with_capacity(self.0.len() + 1);
        nibbles.extend_from_slice(&self.0);
        nibbles.push(nibble);
        TrieKey(nibbles)
    }

    /// Hex-prefix (compact) encoding used in stored leaves and extensions.
    ///
    /// The first nibble carries flags: bit 1 marks a leaf, bit 0 an odd
    /// length. An odd path packs its first nibble next to the flags.
    ///
    /// For example:
    /// - [0, 1, 2, 3, 4, 5] as an extension node becomes [0x00, 0x01, 0x23, 0x45]
    /// - [1, 2, 3, 4, 5] as a leaf node becomes [0x31, 0x23, 0x45]
    pub fn to_packed(&self, is_leaf: bool) -> Vec<u8> {
        let nibbles = &self.0;
        let mut compact = Vec::with_capacity(nibbles.len() / 2 + 1);
        let flags = if is_leaf { 0x20 } else { 0x00 };

        let rest = if nibbles.len() % 2 != 0 {
            compact.push(flags | 0x10 | nibbles[0]);
            &nibbles[1..]
        } else {
            compact.push(flags);
            &nibbles[..]
        };
        for pair in rest.chunks(2) {
            compact.push((pair[0] << 4) | pair[1]);
        }
        compact
    }

    /// Decode a hex-prefix encoded path, returning the path and the leaf flag
    pub fn from_packed(compact: &[u8]) -> Result<(TrieKey, bool), TrieError> {
        let first = *compact
            .first()
            .ok_or_else(|| TrieError::Conversion("Empty packed key".to_string()))?;
        if first & 0xC0 != 0 {
            return Err(TrieError::Conversion(format!("Invalid packed key flags: {:#04x}", first)));
        }
        let is_leaf = first & 0x20 != 0;
        let is_odd = first & 0x10 != 0;
        if !is_odd && first & 0x0F != 0 {
            return Err(TrieError::Conversion(format!("Invalid packed key padding: {:#04x}", first)));
        }

        let mut nibbles = Vec::with_capacity(compact.len() * 2);
        if is_odd {
            nibbles.push(first & 0x0F);
        }
        for &byte in &compact[1..] {
            nibbles.push(byte >> 4);
            nibbles.push(byte & 0x0F);
        }
        Ok((TrieKey(nibbles), is_leaf))
    }
}

/// Length of the shared prefix of two nibble slices
pub fn common_prefix_length(a: &[Nibble], b: &[Nibble]) -> usize {
    a.iter().zip(b.iter()).take_while(|(x, y)| x == y).count()
}

impl From<&[u8]> for TrieKey {
    fn from(bytes: &[u8]) -> Self {
        TrieKey::from_normal(bytes)
    }
}

impl fmt::Display for TrieKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for nibble in &self.0 {
            write!(f, "{:x}", nibble)?;
        }
        Ok(())
    }
}

impl fmt::Debug for TrieKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TrieKey({})", self)
    }
}
