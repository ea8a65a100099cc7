// vibetrie - Merkle Patricia Trie state storage for blockchain nodes

pub mod config;
pub mod crypto;
pub mod state;
pub mod storage;
pub mod trie;

// Initialize logging
pub fn init_logger() {
    env_logger::init();
}
