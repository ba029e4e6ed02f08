use futures::future;
use log::{info, warn};
use thiserror::Error;
use uuid::Uuid;

use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex};

use super::block::Block;
use super::crypto::Address;
use super::storage::{BlockchainStorage, StorageError};
use super::transaction::Transaction;
use super::verification;
use crate::network::{normalize_peer, PeerTransport};

/// Errors that can occur during blockchain operations
#[derive(Debug, Error)]
pub enum BlockchainError {
    #[error("Invalid transaction signature")]
    InvalidSignature,

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Insufficient funds: required {required}, available {available}")]
    InsufficientFunds { required: f64, available: f64 },

    #[error("Proof of work is invalid")]
    InvalidProofOfWork,

    #[error("Previous hash stored in the block does not match the local tip")]
    ChainLinkMismatch,

    #[error("Block index {got} does not attach at the tip (expected {expected})")]
    StaleOrOutOfOrderBlock { expected: u64, got: u64 },

    #[error("Proof-of-work search failed: {0}")]
    MiningFailed(String),

    #[error("Storage error: {0}")]
    StorageError(#[from] StorageError),
}

/// Everything a node mutates: the chain, the open-transaction pool and the
/// peer registry live behind one mutex so mining completion, block
/// acceptance and conflict resolution can never interleave partial updates.
struct LedgerState {
    chain: Vec<Block>,
    open_transactions: Vec<Transaction>,
    nodes: HashSet<String>,
}

fn tip(state: &LedgerState) -> &Block {
    state
        .chain
        .last()
        .expect("chain always holds at least the genesis block")
}

/// Balance of `address`: credits and debits from the whole chain, plus
/// pending pool debits so a sender cannot promise the same funds twice.
/// Recomputed on every call; the chain itself is the source of truth.
fn balance_in(state: &LedgerState, address: &Address) -> f64 {
    let mut balance = 0.0;

    for block in &state.chain {
        for transaction in &block.transactions {
            if transaction.sender == *address {
                balance -= transaction.amount;
            }
            if transaction.recipient == *address {
                balance += transaction.amount;
            }
        }
    }

    for transaction in &state.open_transactions {
        if transaction.sender == *address {
            balance -= transaction.amount;
        }
    }

    balance
}

fn peer_list(state: &LedgerState) -> Vec<String> {
    let mut peers: Vec<String> = state.nodes.iter().cloned().collect();
    peers.sort();
    peers
}

/// The ledger and its consensus rules.
///
/// One instance owns all mutable node state; it is constructed explicitly
/// at startup (wallet address first, then the chain) and handed to the
/// request layer.
#[derive(Clone)]
pub struct Blockchain {
    state: Arc<Mutex<LedgerState>>,
    transport: Arc<dyn PeerTransport>,
    storage: Option<Arc<BlockchainStorage>>,
    address: Address,
    node_id: Uuid,
}

impl std::fmt::Debug for Blockchain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Blockchain")
            .field("address", &self.address)
            .field("node_id", &self.node_id)
            .finish()
    }
}

impl Blockchain {
    /// Creates an in-memory blockchain with a genesis block.
    ///
    /// `address` is this node's identity: mining rewards are credited to
    /// it. `transport` is the peer collaborator used for broadcasts and
    /// conflict resolution.
    pub fn new(address: Address, node_id: Uuid, transport: Arc<dyn PeerTransport>) -> Self {
        Blockchain {
            state: Arc::new(Mutex::new(LedgerState {
                chain: vec![Block::genesis()],
                open_transactions: Vec::new(),
                nodes: HashSet::new(),
            })),
            transport,
            storage: None,
            address,
            node_id,
        }
    }

    /// Creates a blockchain backed by sled storage, restoring any
    /// previously persisted state.
    ///
    /// A persisted chain that fails verification is discarded (corruption
    /// is fatal to that candidate only) and the node starts from genesis.
    pub fn with_storage<P: AsRef<Path>>(
        address: Address,
        node_id: Uuid,
        transport: Arc<dyn PeerTransport>,
        path: P,
    ) -> Result<Self, BlockchainError> {
        let storage = BlockchainStorage::new(path)?;

        let mut chain = storage.load_chain()?;
        let mut open_transactions = storage.load_open_transactions()?;
        let mut nodes = storage.load_nodes()?;

        if chain.is_empty() {
            chain = vec![Block::genesis()];
        } else if !verification::verify_chain(&chain) {
            warn!("persisted chain failed verification, starting from genesis");
            chain = vec![Block::genesis()];
            open_transactions.clear();
            nodes.clear();
        } else {
            info!(
                "loaded {} blocks and {} open transactions from storage",
                chain.len(),
                open_transactions.len()
            );
        }

        let blockchain = Blockchain {
            state: Arc::new(Mutex::new(LedgerState {
                chain,
                open_transactions,
                nodes,
            })),
            transport,
            storage: Some(Arc::new(storage)),
            address,
            node_id,
        };

        blockchain.persist(&blockchain.state.lock().unwrap());
        Ok(blockchain)
    }

    /// This node's own address (mining rewards go here)
    pub fn address(&self) -> &Address {
        &self.address
    }

    /// Snapshot of the full chain
    pub fn chain(&self) -> Vec<Block> {
        self.state.lock().unwrap().chain.clone()
    }

    /// Snapshot of the open-transaction pool
    pub fn open_transactions(&self) -> Vec<Transaction> {
        self.state.lock().unwrap().open_transactions.clone()
    }

    /// Registered peer nodes, sorted for stable output
    pub fn nodes(&self) -> Vec<String> {
        peer_list(&self.state.lock().unwrap())
    }

    /// The most recent block
    pub fn last_block(&self) -> Block {
        tip(&self.state.lock().unwrap()).clone()
    }

    /// Runs full-chain verification on the current chain
    pub fn is_valid(&self) -> bool {
        verification::verify_chain(&self.state.lock().unwrap().chain)
    }

    /// Balance of `address`, recomputed by scanning the chain and the pool
    pub fn get_balance(&self, address: &Address) -> f64 {
        balance_in(&self.state.lock().unwrap(), address)
    }

    /// Validates and pools a transaction.
    ///
    /// The signature must verify against the sender's public key and the
    /// sender must afford the amount (chain balance minus pending pool
    /// debits). Locally submitted transactions are forwarded to all
    /// registered peers; `is_receiving` marks a transaction that arrived
    /// as a peer broadcast and must not be re-broadcast.
    ///
    /// Returns the index of the block that will include the transaction.
    pub async fn add_transaction(
        &self,
        transaction: Transaction,
        is_receiving: bool,
    ) -> Result<u64, BlockchainError> {
        if !transaction.amount.is_finite() || transaction.amount < 0.0 {
            return Err(BlockchainError::InvalidAmount(format!(
                "Amount must be non-negative: {}",
                transaction.amount
            )));
        }

        let (index, peers) = {
            let mut state = self.state.lock().unwrap();

            if !verification::verify_transaction(&transaction, |a| balance_in(&state, a), false) {
                return Err(BlockchainError::InvalidSignature);
            }

            let available = balance_in(&state, &transaction.sender);
            if available < transaction.amount {
                return Err(BlockchainError::InsufficientFunds {
                    required: transaction.amount,
                    available,
                });
            }

            state.open_transactions.push(transaction.clone());
            self.persist(&state);

            (tip(&state).index + 1, peer_list(&state))
        };

        if !is_receiving {
            self.transport.broadcast_transaction(&transaction, &peers).await;
        }

        Ok(index)
    }

    /// Mines a block from the current pool.
    ///
    /// The pool and tip are snapshotted under the lock, the proof is
    /// searched on a blocking worker without it, and the result is only
    /// appended if the tip has not moved in the meantime (otherwise the
    /// search is retried against the new tip). The mining-reward
    /// transaction is appended after the proof is found, as the last
    /// entry of the block, and the pool is cleared.
    pub async fn mine_block(&self) -> Result<Block, BlockchainError> {
        loop {
            let (snapshot, previous_hash, index) = {
                let state = self.state.lock().unwrap();

                if !verification::verify_transactions(&state.open_transactions, |a| {
                    balance_in(&state, a)
                }) {
                    return Err(BlockchainError::InvalidSignature);
                }

                let last = tip(&state);
                (
                    state.open_transactions.clone(),
                    verification::hash_block(last),
                    last.index + 1,
                )
            };

            let search_transactions = snapshot.clone();
            let search_hash = previous_hash.clone();
            let proof = tokio::task::spawn_blocking(move || {
                let mut proof = 0u64;
                while !verification::valid_proof(
                    proof,
                    &search_transactions,
                    &search_hash,
                    verification::DIFFICULTY,
                ) {
                    proof += 1;
                }
                proof
            })
            .await
            .map_err(|e| BlockchainError::MiningFailed(e.to_string()))?;

            let (block, peers) = {
                let mut state = self.state.lock().unwrap();

                // A peer block may have attached while the search ran; the
                // proof only fits the tip it was computed against.
                if tip(&state).index + 1 != index
                    || verification::hash_block(tip(&state)) != previous_hash
                {
                    info!("tip moved during proof search, retrying");
                    continue;
                }

                let mut transactions = snapshot;
                transactions.push(Transaction::reward(self.address.clone()));

                let block = Block::new(index, previous_hash, transactions, proof);
                state.chain.push(block.clone());
                state.open_transactions.clear();
                self.persist(&state);

                (block, peer_list(&state))
            };

            info!(
                "mined block {} with {} transactions",
                block.index,
                block.transactions.len()
            );
            self.transport.broadcast_block(&block, &peers).await;
            return Ok(block);
        }
    }

    /// Accepts a block broadcast by a peer.
    ///
    /// The block must attach at the current tip: its index must be exactly
    /// one past the tip, its previous hash must equal the tip's hash, and
    /// its proof must hold over its transactions minus the trailing reward
    /// entry. Acceptance is atomic; pooled transactions that appear in the
    /// block are dropped so they are not mined twice.
    pub fn add_block(&self, block: Block) -> Result<(), BlockchainError> {
        let mut state = self.state.lock().unwrap();

        let (expected, tip_hash) = {
            let last = tip(&state);
            (last.index + 1, verification::hash_block(last))
        };

        if block.index != expected {
            return Err(BlockchainError::StaleOrOutOfOrderBlock {
                expected,
                got: block.index,
            });
        }

        if block.previous_hash != tip_hash {
            return Err(BlockchainError::ChainLinkMismatch);
        }

        let Some((_, payload)) = block.transactions.split_last() else {
            return Err(BlockchainError::InvalidProofOfWork);
        };
        if !verification::valid_proof(
            block.proof,
            payload,
            &block.previous_hash,
            verification::DIFFICULTY,
        ) {
            return Err(BlockchainError::InvalidProofOfWork);
        }

        state
            .open_transactions
            .retain(|open| !block.transactions.contains(open));

        info!("accepted peer block {}", block.index);
        state.chain.push(block);
        self.persist(&state);

        Ok(())
    }

    /// Adds a peer to the registry. Addresses are normalized to their
    /// authority, and re-registration is a no-op (set semantics).
    pub fn register_node(&self, address: &str) {
        let peer = normalize_peer(address);
        if peer.is_empty() {
            return;
        }

        let mut state = self.state.lock().unwrap();
        if state.nodes.insert(peer.clone()) {
            info!("registered peer node {}", peer);
            self.persist(&state);
        }
    }

    /// Longest-valid-chain conflict resolution.
    ///
    /// Fetches every registered peer's chain concurrently; unreachable
    /// peers are skipped. The longest valid candidate that is strictly
    /// longer than the local chain replaces it (equal length keeps the
    /// local chain, so resolution never thrashes on ties and never
    /// shortens the chain). Returns whether the local chain was replaced.
    pub async fn resolve_conflicts(&self) -> bool {
        let (peers, local_len) = {
            let state = self.state.lock().unwrap();
            (peer_list(&state), state.chain.len())
        };

        let fetched =
            future::join_all(peers.iter().map(|peer| self.transport.fetch_chain(peer))).await;

        let mut candidate: Option<Vec<Block>> = None;
        let mut best_len = local_len;

        for result in fetched {
            match result {
                Ok(chain) if chain.len() > best_len => {
                    if verification::verify_chain(&chain) {
                        best_len = chain.len();
                        candidate = Some(chain);
                    } else {
                        warn!("peer offered a longer but invalid chain, discarding");
                    }
                }
                Ok(_) => {}
                Err(err) => warn!("skipping peer during conflict resolution: {}", err),
            }
        }

        let Some(chain) = candidate else {
            return false;
        };

        let mut state = self.state.lock().unwrap();
        if chain.len() <= state.chain.len() {
            // The local chain caught up while peers were being queried.
            return false;
        }

        info!(
            "replacing local chain of {} blocks with peer chain of {} blocks",
            state.chain.len(),
            chain.len()
        );
        state.chain = chain;
        state.open_transactions.clear();
        self.persist(&state);

        true
    }

    /// Best-effort persistence; the in-memory state stays authoritative.
    fn persist(&self, state: &LedgerState) {
        let Some(storage) = &self.storage else {
            return;
        };

        let result = storage
            .save_chain(&state.chain)
            .and_then(|_| storage.save_open_transactions(&state.open_transactions))
            .and_then(|_| storage.save_nodes(&state.nodes))
            .and_then(|_| storage.flush());

        if let Err(err) = result {
            warn!("failed to persist ledger state: {}", err);
        }
    }
}
