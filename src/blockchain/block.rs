use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::transaction::Transaction;

/// A block in the chain.
///
/// Immutable once constructed. There is no cached hash field; the block's
/// digest is always recomputed from its canonical form (see
/// `verification::hash_block`), so a mutated block can never carry a stale
/// but matching hash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Block {
    /// Index of the block in the chain (genesis = 0)
    pub index: u64,

    /// Hash of the previous block's canonical form
    pub previous_hash: String,

    /// Transactions included in this block. In every mined block the last
    /// entry is the mining-reward transaction.
    pub transactions: Vec<Transaction>,

    /// Proof-of-work nonce
    pub proof: u64,

    /// Timestamp when the block was created
    #[schema(value_type = String, example = "2023-01-01T12:00:00Z")]
    pub timestamp: DateTime<Utc>,
}

impl Block {
    /// Creates a new block
    pub fn new(index: u64, previous_hash: String, transactions: Vec<Transaction>, proof: u64) -> Self {
        Block {
            index,
            previous_hash,
            transactions,
            proof,
            timestamp: Utc::now(),
        }
    }

    /// The genesis block.
    ///
    /// Every field is a fixed constant (including the epoch timestamp), so
    /// independently started nodes agree on the genesis hash and their
    /// chains can link against each other.
    pub fn genesis() -> Self {
        Block {
            index: 0,
            previous_hash: String::new(),
            transactions: Vec::new(),
            proof: 100,
            timestamp: DateTime::UNIX_EPOCH,
        }
    }

    /// The canonical representation used for hashing.
    ///
    /// Object keys are kept sorted by serde_json; transactions appear in
    /// block order, each in its own canonical form.
    pub fn canonical_value(&self) -> serde_json::Value {
        serde_json::json!({
            "index": self.index,
            "previous_hash": self.previous_hash,
            "proof": self.proof,
            "timestamp": self.timestamp,
            "transactions": self
                .transactions
                .iter()
                .map(|tx| tx.canonical_value())
                .collect::<Vec<_>>(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::crypto::Address;
    use crate::blockchain::hashing;

    #[test]
    fn test_genesis_is_deterministic() {
        let first = Block::genesis();
        let second = Block::genesis();

        assert_eq!(first, second);
        assert_eq!(
            hashing::hash_json(&first.canonical_value()),
            hashing::hash_json(&second.canonical_value())
        );
        assert_eq!(first.index, 0);
        assert!(first.previous_hash.is_empty());
        assert!(first.transactions.is_empty());
    }

    #[test]
    fn test_canonical_value_covers_transactions() {
        let reward = Transaction::reward(Address("miner".to_string()));
        let block = Block::new(1, "prev".to_string(), vec![reward], 42);

        let baseline = hashing::hash_json(&block.canonical_value());

        let mut tampered = block.clone();
        tampered.transactions[0].amount += 1.0;

        assert_ne!(baseline, hashing::hash_json(&tampered.canonical_value()));
    }
}
