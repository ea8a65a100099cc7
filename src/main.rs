use std::collections::HashSet;
use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;

use log::{error, info};
use structopt::StructOpt;

use vibetrie::config::Config;
use vibetrie::crypto::{hash_from_hex, Hash};
use vibetrie::init_logger;
use vibetrie::storage::{KVStore, NoDeleteStore, PrefixStore, RocksDBStore};
use vibetrie::trie::MerklePatriciaTrie;

type CliResult<T> = Result<T, Box<dyn Error>>;

#[derive(Debug, StructOpt)]
#[structopt(name = "vibetrie", about = "Merkle Patricia Trie state store tool")]
struct Opt {
    /// Configuration file
    #[structopt(long, short, parse(from_os_str))]
    config: Option<PathBuf>,

    /// Database directory (overrides the configuration)
    #[structopt(long, parse(from_os_str))]
    db: Option<PathBuf>,

    #[structopt(subcommand)]
    command: Command,
}

#[derive(Debug, StructOpt)]
enum Command {
    /// Write a default configuration file
    InitConfig {
        #[structopt(parse(from_os_str), default_value = "vibetrie.toml")]
        output: PathBuf,
    },

    /// Apply key=value pairs on top of a root and print the new root.
    /// An empty value removes the key.
    Put {
        /// Parent root (hex); the empty trie if omitted
        #[structopt(long)]
        root: Option<String>,

        /// Entries as key=value; use a 0x prefix for hex bytes
        #[structopt(required = true)]
        entries: Vec<String>,
    },

    /// Look up a key
    Get {
        #[structopt(long)]
        root: String,

        key: String,
    },

    /// List all keys under a root
    Keys {
        #[structopt(long)]
        root: String,
    },

    /// List the hashes of all nodes reachable from a root
    Dump {
        #[structopt(long)]
        root: String,
    },

    /// Print a Merkle proof for a key as JSON
    Prove {
        #[structopt(long)]
        root: String,

        key: String,
    },

    /// Delete disposed nodes not reachable from the given roots
    Prune {
        #[structopt(required = true)]
        roots: Vec<String>,
    },
}

/// Parse `0x`-prefixed hex, or take the string's UTF-8 bytes
fn parse_bytes(s: &str) -> CliResult<Vec<u8>> {
    match s.strip_prefix("0x") {
        Some(hex_str) => Ok(hex::decode(hex_str)?),
        None => Ok(s.as_bytes().to_vec()),
    }
}

fn format_bytes(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(s) if !s.chars().any(char::is_control) => s.to_string(),
        _ => format!("0x{}", hex::encode(bytes)),
    }
}

fn parse_root(s: &str) -> CliResult<Hash> {
    Ok(hash_from_hex(s)?)
}

/// Open the trie store: a namespace of the database with tombstones kept in
/// a sibling namespace so pruning survives restarts
fn open_trie(config: &Config) -> CliResult<(Arc<RocksDBStore>, Arc<NoDeleteStore>, MerklePatriciaTrie)> {
    let db = Arc::new(RocksDBStore::with_config(&config.storage)?);
    let shared: Arc<dyn KVStore> = db.clone();
    let nodes = Arc::new(PrefixStore::new(shared.clone(), config.storage.trie_prefix.as_bytes()));
    let tombstones = Arc::new(PrefixStore::new(shared, config.storage.tombstone_prefix.as_bytes()));
    let store = Arc::new(NoDeleteStore::with_tombstones(nodes, tombstones));
    let trie = MerklePatriciaTrie::from_config(store.clone(), &config.trie);
    Ok((db, store, trie))
}

fn run(opt: Opt) -> CliResult<()> {
    if let Command::InitConfig { output } = &opt.command {
        Config::generate_default(output)?;
        return Ok(());
    }

    let mut config = match &opt.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if let Some(db) = &opt.db {
        config.storage.db_path = db.to_string_lossy().to_string();
    }

    let (db, store, empty) = open_trie(&config)?;

    match opt.command {
        Command::InitConfig { .. } => {}

        Command::Put { root, entries } => {
            let mut trie = match root {
                Some(root) => empty.revert_to(parse_root(&root)?)?,
                None => empty,
            };
            for entry in &entries {
                let (key, value) = entry
                    .split_once('=')
                    .ok_or_else(|| format!("Expected key=value, got {}", entry))?;
                trie.put(&parse_bytes(key)?, &parse_bytes(value)?)?;
            }
            let root = trie.commit()?;
            trie.flush()?;
            info!("Applied {} entries", entries.len());
            println!("{}", hex::encode(root));
        }

        Command::Get { root, key } => {
            let trie = empty.revert_to(parse_root(&root)?)?;
            match trie.get(&parse_bytes(&key)?)? {
                Some(value) => println!("{}", format_bytes(&value)),
                None => {
                    return Err(format!("Key {} not found", key).into());
                }
            }
        }

        Command::Keys { root } => {
            let trie = empty.revert_to(parse_root(&root)?)?;
            let mut keys: Vec<_> = trie.key_set()?.into_iter().collect();
            keys.sort();
            for key in keys {
                println!("{}", format_bytes(&key));
            }
        }

        Command::Dump { root } => {
            let trie = empty.revert_to(parse_root(&root)?)?;
            let mut hashes: Vec<_> = trie.dump()?.into_iter().map(hex::encode).collect();
            hashes.sort();
            for hash in hashes {
                println!("{}", hash);
            }
        }

        Command::Prove { root, key } => {
            let trie = empty.revert_to(parse_root(&root)?)?;
            let proof = trie.prove(&parse_bytes(&key)?)?;
            let json = serde_json::json!({
                "root": hex::encode(proof.root),
                "key": hex::encode(&proof.key),
                "nodes": proof.nodes.iter().map(hex::encode).collect::<Vec<_>>(),
            });
            println!("{}", serde_json::to_string_pretty(&json)?);
        }

        Command::Prune { roots } => {
            let mut excludes = HashSet::new();
            for root in &roots {
                let trie = empty.revert_to(parse_root(root)?)?;
                excludes.extend(trie.dump()?.into_iter().map(|hash| hash.to_vec()));
            }
            let deleted = store.compact(&excludes)?;
            store.flush()?;
            db.compact_range();
            println!("Deleted {} nodes", deleted);
        }
    }

    store.close()?;
    Ok(())
}

fn main() {
    // Initialize logger
    init_logger();

    // Parse command line arguments
    let opt = Opt::from_args();

    if let Err(e) = run(opt) {
        error!("{}", e);
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
