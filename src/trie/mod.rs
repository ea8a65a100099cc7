pub mod encode;
pub mod error;
pub mod key;
pub mod mpt;
pub mod node;
pub mod proof;
pub mod scanner;
pub mod secure;

pub use error::{TrieError, TrieResult};
pub use key::{Nibble, TrieKey};
pub use mpt::MerklePatriciaTrie;
pub use node::{Node, NodeRef};
pub use proof::{verify_proof, Proof};
pub use scanner::{DumpScanner, EntryScanner, KeyScanner, Scanner, ValueScanner};
pub use secure::SecureTrie;
