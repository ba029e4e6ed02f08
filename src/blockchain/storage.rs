use std::collections::HashSet;
use std::path::Path;

use sled::{Db, Tree};
use thiserror::Error;

use super::block::Block;
use super::transaction::Transaction;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] sled::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Deserialization error: {0}")]
    DeserializationError(String),
}

/// sled-backed persistence for the node's ledger state.
///
/// The chain, the open-transaction pool and the peer registry each live in
/// their own tree. Writes replace the whole tree: the state is small at
/// this scale and wholesale replacement is what conflict resolution needs
/// anyway. Durability is strictly best-effort; the in-memory state is the
/// source of truth while the node runs.
pub struct BlockchainStorage {
    db: Db,
    blocks: Tree,
    open_transactions: Tree,
    nodes: Tree,
}

impl std::fmt::Debug for BlockchainStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockchainStorage").finish()
    }
}

impl BlockchainStorage {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let db = sled::open(path)?;

        let blocks = db.open_tree("blocks")?;
        let open_transactions = db.open_tree("open_transactions")?;
        let nodes = db.open_tree("nodes")?;

        Ok(Self {
            db,
            blocks,
            open_transactions,
            nodes,
        })
    }

    /// Replaces the persisted chain. Keys are big-endian block indices so
    /// sled's key order is chain order.
    pub fn save_chain(&self, chain: &[Block]) -> Result<(), StorageError> {
        self.blocks.clear()?;

        for block in chain {
            let value = bincode::serialize(block)
                .map_err(|e| StorageError::SerializationError(e.to_string()))?;
            self.blocks.insert(block.index.to_be_bytes(), value)?;
        }

        Ok(())
    }

    /// Loads the persisted chain, empty if nothing was saved yet
    pub fn load_chain(&self) -> Result<Vec<Block>, StorageError> {
        let mut chain = Vec::new();

        for entry in self.blocks.iter() {
            let (_, value) = entry?;
            let block: Block = bincode::deserialize(&value)
                .map_err(|e| StorageError::DeserializationError(e.to_string()))?;
            chain.push(block);
        }

        chain.sort_by_key(|block| block.index);
        Ok(chain)
    }

    /// Replaces the persisted open-transaction pool
    pub fn save_open_transactions(&self, pool: &[Transaction]) -> Result<(), StorageError> {
        self.open_transactions.clear()?;

        for (position, transaction) in pool.iter().enumerate() {
            let value = bincode::serialize(transaction)
                .map_err(|e| StorageError::SerializationError(e.to_string()))?;
            self.open_transactions
                .insert((position as u64).to_be_bytes(), value)?;
        }

        Ok(())
    }

    /// Loads the persisted pool in submission order
    pub fn load_open_transactions(&self) -> Result<Vec<Transaction>, StorageError> {
        let mut pool = Vec::new();

        for entry in self.open_transactions.iter() {
            let (_, value) = entry?;
            let transaction: Transaction = bincode::deserialize(&value)
                .map_err(|e| StorageError::DeserializationError(e.to_string()))?;
            pool.push(transaction);
        }

        Ok(pool)
    }

    /// Replaces the persisted peer registry
    pub fn save_nodes(&self, nodes: &HashSet<String>) -> Result<(), StorageError> {
        self.nodes.clear()?;

        for node in nodes {
            self.nodes.insert(node.as_bytes(), &[])?;
        }

        Ok(())
    }

    /// Loads the persisted peer registry
    pub fn load_nodes(&self) -> Result<HashSet<String>, StorageError> {
        let mut nodes = HashSet::new();

        for entry in self.nodes.iter() {
            let (key, _) = entry?;
            nodes.insert(String::from_utf8_lossy(&key).to_string());
        }

        Ok(nodes)
    }

    /// Flushes all pending writes to disk
    pub fn flush(&self) -> Result<(), StorageError> {
        self.db.flush()?;
        Ok(())
    }
}
