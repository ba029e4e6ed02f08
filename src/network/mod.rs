//! Peer transport: how this node talks to its registered peers.
//!
//! The ledger core only depends on the `PeerTransport` trait; the HTTP
//! implementation below speaks to the same routes the `api` module serves.

use async_trait::async_trait;
use log::{debug, warn};
use serde::Deserialize;
use thiserror::Error;

use std::time::Duration;

use crate::blockchain::{Block, Transaction};

/// Errors raised by peer communication
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Peer {peer} unreachable: {reason}")]
    Unreachable { peer: String, reason: String },

    #[error("Peer {peer} answered with status {status}")]
    BadStatus { peer: String, status: u16 },

    #[error("Failed to decode response from peer {peer}: {reason}")]
    Decode { peer: String, reason: String },
}

/// Network collaborator used by the ledger.
///
/// Fetch failures surface as errors so the caller can skip that peer;
/// broadcasts are best-effort and must never fail the local operation.
#[async_trait(?Send)]
pub trait PeerTransport: Send + Sync {
    /// Fetches a peer's full chain
    async fn fetch_chain(&self, peer: &str) -> Result<Vec<Block>, TransportError>;

    /// Announces a freshly mined block to all peers
    async fn broadcast_block(&self, block: &Block, peers: &[String]);

    /// Forwards a newly accepted transaction to all peers
    async fn broadcast_transaction(&self, transaction: &Transaction, peers: &[String]);
}

/// Reduces a peer address to its authority: scheme and trailing slashes
/// are dropped, so `http://localhost:5001/` and `localhost:5001` register
/// as the same node.
pub fn normalize_peer(address: &str) -> String {
    let trimmed = address.trim();
    let without_scheme = trimmed
        .strip_prefix("http://")
        .or_else(|| trimmed.strip_prefix("https://"))
        .unwrap_or(trimmed);

    without_scheme.trim_end_matches('/').to_string()
}

#[derive(Deserialize)]
struct ChainPayload {
    chain: Vec<Block>,
}

/// `PeerTransport` over plain HTTP, using the actix client.
pub struct HttpPeerTransport {
    timeout: Duration,
}

impl HttpPeerTransport {
    pub fn new() -> Self {
        Self {
            timeout: Duration::from_secs(5),
        }
    }

    fn client(&self) -> awc::Client {
        awc::Client::builder().timeout(self.timeout).finish()
    }
}

impl Default for HttpPeerTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait(?Send)]
impl PeerTransport for HttpPeerTransport {
    async fn fetch_chain(&self, peer: &str) -> Result<Vec<Block>, TransportError> {
        let url = format!("http://{}/chain", peer);

        let mut response = self.client().get(&url).send().await.map_err(|e| {
            TransportError::Unreachable {
                peer: peer.to_string(),
                reason: e.to_string(),
            }
        })?;

        if !response.status().is_success() {
            return Err(TransportError::BadStatus {
                peer: peer.to_string(),
                status: response.status().as_u16(),
            });
        }

        let payload: ChainPayload =
            response.json().await.map_err(|e| TransportError::Decode {
                peer: peer.to_string(),
                reason: e.to_string(),
            })?;

        Ok(payload.chain)
    }

    async fn broadcast_block(&self, block: &Block, peers: &[String]) {
        for peer in peers {
            let url = format!("http://{}/broadcast-block", peer);
            let body = serde_json::json!({ "block": block });

            match self.client().post(&url).send_json(&body).await {
                Ok(response) if response.status().is_success() => {
                    debug!("peer {} accepted block {}", peer, block.index);
                }
                Ok(response) => {
                    // The peer's chain disagrees with ours; the next
                    // conflict-resolution round settles it.
                    warn!(
                        "peer {} declined block {} (status {}), needs resolving",
                        peer,
                        block.index,
                        response.status()
                    );
                }
                Err(err) => warn!("failed to announce block to peer {}: {}", peer, err),
            }
        }
    }

    async fn broadcast_transaction(&self, transaction: &Transaction, peers: &[String]) {
        for peer in peers {
            let url = format!("http://{}/broadcast-transaction", peer);

            match self.client().post(&url).send_json(transaction).await {
                Ok(response) if response.status().is_success() => {
                    debug!("peer {} accepted transaction broadcast", peer);
                }
                Ok(response) => warn!(
                    "peer {} declined transaction (status {})",
                    peer,
                    response.status()
                ),
                Err(err) => warn!("failed to forward transaction to peer {}: {}", peer, err),
            }
        }
    }
}
