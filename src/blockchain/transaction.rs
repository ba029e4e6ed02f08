use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use super::crypto::{verify_signature, Address, CryptoError, DigitalSignature};

/// Synthetic sender address of every mining-reward transaction.
pub const REWARD_SENDER: &str = "MINING";

/// Amount credited to the miner per mined block. Fixed, shared by all nodes.
pub const MINING_REWARD: f64 = 10.0;

/// Errors that can occur during transaction operations
#[derive(Debug, Error)]
pub enum TransactionError {
    #[error("Transaction already signed")]
    AlreadySigned,

    #[error("Transaction not signed")]
    NotSigned,

    #[error("Wallet address does not match sender address")]
    SenderMismatch,

    #[error("Crypto error: {0}")]
    CryptoError(#[from] CryptoError),
}

/// A single sender → recipient value transfer.
///
/// Immutable once constructed. The canonical form (sorted-key JSON over
/// sender, recipient, amount and timestamp, signature excluded) is the
/// one input used for signing, proof-of-work guesses and block hashing;
/// reordering those fields would break signature and proof verification
/// between nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Transaction {
    /// Sender's address
    pub sender: Address,

    /// Recipient's address
    pub recipient: Address,

    /// Amount being transferred
    pub amount: f64,

    /// Digital signature over the canonical form. Always serialized
    /// (reward transactions carry an explicit null): bincode is not
    /// self-describing, so skipped fields would corrupt stored values.
    pub signature: Option<DigitalSignature>,

    /// Timestamp when the transaction was created
    #[schema(value_type = String, example = "2023-01-01T12:00:00Z")]
    pub timestamp: DateTime<Utc>,
}

impl Transaction {
    /// Creates a new unsigned transaction
    pub fn new(sender: Address, recipient: Address, amount: f64) -> Self {
        Transaction {
            sender,
            recipient,
            amount,
            signature: None,
            timestamp: Utc::now(),
        }
    }

    /// Creates the mining-reward transaction crediting `recipient`.
    ///
    /// Reward transactions are unsigned; they are appended as the last
    /// entry of a mined block and excluded from proof-of-work input.
    pub fn reward(recipient: Address) -> Self {
        Transaction {
            sender: Address(REWARD_SENDER.to_string()),
            recipient,
            amount: MINING_REWARD,
            signature: None,
            timestamp: Utc::now(),
        }
    }

    /// Whether this is a mining-reward transaction
    pub fn is_reward(&self) -> bool {
        self.sender.0 == REWARD_SENDER
    }

    /// The canonical representation used for signing and hashing.
    ///
    /// serde_json keeps object keys sorted, so the field order here is
    /// fixed no matter how the value was built. The signature is not part
    /// of the canonical form.
    pub fn canonical_value(&self) -> serde_json::Value {
        serde_json::json!({
            "sender": self.sender.0,
            "recipient": self.recipient.0,
            "amount": self.amount,
            "timestamp": self.timestamp,
        })
    }

    /// The byte string signed by the sender's wallet
    pub fn signing_bytes(&self) -> Vec<u8> {
        self.canonical_value().to_string().into_bytes()
    }

    /// Signs the transaction with `wallet`, which must own the sender address
    pub fn sign(&mut self, wallet: &super::crypto::Wallet) -> Result<(), TransactionError> {
        if self.signature.is_some() {
            return Err(TransactionError::AlreadySigned);
        }

        if wallet.address() != &self.sender {
            return Err(TransactionError::SenderMismatch);
        }

        let signature = wallet.sign(&self.signing_bytes())?;
        self.signature = Some(signature);

        Ok(())
    }

    /// Verifies the transaction's signature against the sender's public key
    pub fn verify_signature(&self) -> Result<bool, TransactionError> {
        let signature = match &self.signature {
            Some(sig) => sig,
            None => return Err(TransactionError::NotSigned),
        };

        let public_key = self.sender.to_public_key()?;

        verify_signature(&self.signing_bytes(), signature, &public_key)
            .map_err(TransactionError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::crypto::Wallet;

    #[test]
    fn test_new_transaction() {
        let sender_wallet = Wallet::new().unwrap();
        let recipient_wallet = Wallet::new().unwrap();

        let transaction = Transaction::new(
            sender_wallet.address().clone(),
            recipient_wallet.address().clone(),
            10.5,
        );

        assert_eq!(transaction.sender, *sender_wallet.address());
        assert_eq!(transaction.recipient, *recipient_wallet.address());
        assert_eq!(transaction.amount, 10.5);
        assert!(transaction.signature.is_none());
        assert!(!transaction.is_reward());
    }

    #[test]
    fn test_sign_and_verify() {
        let sender_wallet = Wallet::new().unwrap();
        let recipient_wallet = Wallet::new().unwrap();

        let mut transaction = Transaction::new(
            sender_wallet.address().clone(),
            recipient_wallet.address().clone(),
            10.5,
        );

        transaction.sign(&sender_wallet).unwrap();
        assert!(transaction.signature.is_some());
        assert!(transaction.verify_signature().unwrap());
    }

    #[test]
    fn test_sign_rejects_foreign_wallet() {
        let sender_wallet = Wallet::new().unwrap();
        let other_wallet = Wallet::new().unwrap();

        let mut transaction = Transaction::new(
            sender_wallet.address().clone(),
            other_wallet.address().clone(),
            1.0,
        );

        assert!(matches!(
            transaction.sign(&other_wallet),
            Err(TransactionError::SenderMismatch)
        ));
    }

    #[test]
    fn test_tampered_amount_breaks_signature() {
        let sender_wallet = Wallet::new().unwrap();
        let recipient_wallet = Wallet::new().unwrap();

        let mut transaction = Transaction::new(
            sender_wallet.address().clone(),
            recipient_wallet.address().clone(),
            10.0,
        );
        transaction.sign(&sender_wallet).unwrap();

        transaction.amount = 100.0;
        assert!(!transaction.verify_signature().unwrap());
    }

    #[test]
    fn test_reward_transaction() {
        let miner_wallet = Wallet::new().unwrap();

        let transaction = Transaction::reward(miner_wallet.address().clone());

        assert_eq!(transaction.sender.0, REWARD_SENDER);
        assert_eq!(transaction.recipient, *miner_wallet.address());
        assert_eq!(transaction.amount, MINING_REWARD);
        assert!(transaction.is_reward());
        assert!(transaction.verify_signature().is_err());
    }

    #[test]
    fn test_canonical_value_excludes_signature() {
        let sender_wallet = Wallet::new().unwrap();
        let recipient_wallet = Wallet::new().unwrap();

        let mut transaction = Transaction::new(
            sender_wallet.address().clone(),
            recipient_wallet.address().clone(),
            3.0,
        );

        let unsigned = transaction.canonical_value();
        transaction.sign(&sender_wallet).unwrap();

        assert_eq!(unsigned, transaction.canonical_value());
    }
}
