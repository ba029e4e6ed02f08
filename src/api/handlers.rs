use actix_web::{web, HttpResponse, Responder};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use std::str::FromStr;

use crate::blockchain::{Address, Block, Blockchain, BlockchainError, Transaction, Wallet};

/// Shared per-node state handed to every handler.
///
/// A masternode runs without a wallet: it relays broadcasts and serves its
/// chain but refuses direct mining and direct transaction submission.
pub struct NodeState {
    pub blockchain: Blockchain,
    pub wallet: Option<Wallet>,
}

pub type NodeData = web::Data<NodeState>;

/// Response for the chain endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct ChainResponse {
    /// The length of the chain
    pub length: usize,

    /// The blocks in the chain
    pub chain: Vec<Block>,

    /// Whether the chain passes full verification
    pub is_valid: bool,
}

/// Request for the transaction endpoint. The node itself is the sender:
/// it signs the transfer with its own wallet.
#[derive(Serialize, Deserialize, ToSchema)]
pub struct TransactionRequest {
    /// The recipient's address
    pub recipient: String,

    /// The amount to transfer
    pub amount: f64,
}

/// Response for the transaction endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct TransactionResponse {
    /// The message
    pub message: String,

    /// The index of the block that will include this transaction
    pub block_index: u64,
}

/// Response for the mine endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct MineResponse {
    /// The message
    pub message: String,

    /// The newly mined block
    pub block: Block,
}

/// Response for the balance endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct BalanceResponse {
    /// The queried address
    pub address: String,

    /// The balance computed from the chain and pending pool
    pub balance: f64,
}

/// Request for the node registration endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct RegisterNodesRequest {
    /// Peer addresses to register
    pub nodes: Vec<String>,
}

/// Response for the node listing and registration endpoints
#[derive(Serialize, Deserialize, ToSchema)]
pub struct NodesResponse {
    /// The message
    pub message: String,

    /// All registered peer nodes
    pub total_nodes: Vec<String>,
}

/// Response for the conflict-resolution endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct ResolveResponse {
    /// The message
    pub message: String,

    /// Whether the local chain was replaced
    pub replaced: bool,

    /// The chain length after resolution
    pub length: usize,
}

/// Request carrying a peer-broadcast block
#[derive(Serialize, Deserialize, ToSchema)]
pub struct BroadcastBlockRequest {
    /// The mined block being announced
    pub block: Block,
}

/// Get the full blockchain
#[utoipa::path(
    get,
    path = "/chain",
    responses(
        (status = 200, description = "Blockchain retrieved successfully", body = ChainResponse)
    )
)]
pub async fn get_chain(state: NodeData) -> impl Responder {
    let chain = state.blockchain.chain();
    let is_valid = state.blockchain.is_valid();

    HttpResponse::Ok().json(ChainResponse {
        length: chain.len(),
        chain,
        is_valid,
    })
}

/// Get all open (not yet mined) transactions
#[utoipa::path(
    get,
    path = "/transactions/pending",
    responses(
        (status = 200, description = "Pending transactions retrieved successfully", body = Vec<Transaction>)
    )
)]
pub async fn get_pending_transactions(state: NodeData) -> impl Responder {
    HttpResponse::Ok().json(state.blockchain.open_transactions())
}

/// Submit a new transaction from this node's wallet
#[utoipa::path(
    post,
    path = "/transactions/new",
    request_body = TransactionRequest,
    responses(
        (status = 201, description = "Transaction accepted into the pool", body = TransactionResponse),
        (status = 400, description = "Invalid transaction data"),
        (status = 403, description = "Node has no wallet (masternode)")
    )
)]
pub async fn new_transaction(
    state: NodeData,
    request: web::Json<TransactionRequest>,
) -> impl Responder {
    let Some(wallet) = &state.wallet else {
        return HttpResponse::Forbidden().json(serde_json::json!({
            "error": "Adding transactions directly to the masternode is not possible"
        }));
    };

    let recipient = match Address::from_str(&request.recipient) {
        Ok(address) => address,
        Err(err) => {
            return HttpResponse::BadRequest().json(serde_json::json!({
                "error": format!("Invalid recipient address: {}", err)
            }));
        }
    };

    let mut transaction = Transaction::new(wallet.address().clone(), recipient, request.amount);
    if let Err(err) = transaction.sign(wallet) {
        return HttpResponse::BadRequest().json(serde_json::json!({
            "error": format!("Failed to sign transaction: {}", err)
        }));
    }

    match state.blockchain.add_transaction(transaction, false).await {
        Ok(block_index) => HttpResponse::Created().json(TransactionResponse {
            message: format!("Transaction will be added to block {}", block_index),
            block_index,
        }),
        Err(err) => HttpResponse::BadRequest().json(serde_json::json!({
            "error": format!("Failed to add transaction: {}", err)
        })),
    }
}

/// Mine a block from the open-transaction pool
#[utoipa::path(
    post,
    path = "/mine",
    responses(
        (status = 200, description = "Block mined successfully", body = MineResponse),
        (status = 400, description = "Pool contains an invalid transaction"),
        (status = 403, description = "Node has no wallet (masternode)")
    )
)]
pub async fn mine(state: NodeData) -> impl Responder {
    if state.wallet.is_none() {
        return HttpResponse::Forbidden().json(serde_json::json!({
            "error": "Mining directly on the masternode is not possible"
        }));
    }

    match state.blockchain.mine_block().await {
        Ok(block) => HttpResponse::Ok().json(MineResponse {
            message: "New block forged".to_string(),
            block,
        }),
        Err(err) => HttpResponse::BadRequest().json(serde_json::json!({
            "error": format!("Failed to mine block: {}", err)
        })),
    }
}

/// Get the balance of an address
#[utoipa::path(
    get,
    path = "/balance/{address}",
    responses(
        (status = 200, description = "Balance retrieved successfully", body = BalanceResponse)
    )
)]
pub async fn get_balance(state: NodeData, address: web::Path<String>) -> impl Responder {
    let address = Address(address.into_inner());
    let balance = state.blockchain.get_balance(&address);

    HttpResponse::Ok().json(BalanceResponse {
        address: address.0,
        balance,
    })
}

/// List all registered peer nodes
#[utoipa::path(
    get,
    path = "/nodes",
    responses(
        (status = 200, description = "Peer nodes retrieved successfully", body = NodesResponse)
    )
)]
pub async fn get_nodes(state: NodeData) -> impl Responder {
    HttpResponse::Ok().json(NodesResponse {
        message: "All nodes".to_string(),
        total_nodes: state.blockchain.nodes(),
    })
}

/// Register peer nodes
#[utoipa::path(
    post,
    path = "/nodes/register",
    request_body = RegisterNodesRequest,
    responses(
        (status = 201, description = "Peer nodes registered", body = NodesResponse),
        (status = 400, description = "No nodes supplied")
    )
)]
pub async fn register_nodes(
    state: NodeData,
    request: web::Json<RegisterNodesRequest>,
) -> impl Responder {
    if request.nodes.is_empty() {
        return HttpResponse::BadRequest().json(serde_json::json!({
            "error": "Please supply a list of node addresses"
        }));
    }

    for node in &request.nodes {
        state.blockchain.register_node(node);
    }

    HttpResponse::Created().json(NodesResponse {
        message: "New nodes have been added".to_string(),
        total_nodes: state.blockchain.nodes(),
    })
}

/// Run longest-chain conflict resolution against all registered peers
#[utoipa::path(
    get,
    path = "/nodes/resolve",
    responses(
        (status = 200, description = "Conflict resolution finished", body = ResolveResponse)
    )
)]
pub async fn resolve_conflicts(state: NodeData) -> impl Responder {
    let replaced = state.blockchain.resolve_conflicts().await;

    let message = if replaced {
        "Our chain was replaced"
    } else {
        "Our chain is authoritative"
    };

    HttpResponse::Ok().json(ResolveResponse {
        message: message.to_string(),
        replaced,
        length: state.blockchain.chain().len(),
    })
}

/// Accept a block broadcast by a peer
#[utoipa::path(
    post,
    path = "/broadcast-block",
    request_body = BroadcastBlockRequest,
    responses(
        (status = 201, description = "Block accepted and appended"),
        (status = 409, description = "Block is behind the local chain"),
        (status = 500, description = "Block rejected")
    )
)]
pub async fn receive_block(
    state: NodeData,
    request: web::Json<BroadcastBlockRequest>,
) -> impl Responder {
    match state.blockchain.add_block(request.into_inner().block) {
        Ok(()) => HttpResponse::Created().json(serde_json::json!({
            "message": "Block added"
        })),
        Err(BlockchainError::StaleOrOutOfOrderBlock { expected, got }) if got < expected => {
            // The sender is behind us; nothing to do locally.
            HttpResponse::Conflict().json(serde_json::json!({
                "error": "Blockchain seems to be shorter, block not added"
            }))
        }
        Err(err @ BlockchainError::StaleOrOutOfOrderBlock { .. }) => {
            // The sender is ahead of us; this node needs conflict resolution.
            HttpResponse::InternalServerError().json(serde_json::json!({
                "error": format!("{}", err)
            }))
        }
        Err(err) => HttpResponse::InternalServerError().json(serde_json::json!({
            "error": format!("Block seems invalid: {}", err)
        })),
    }
}

/// Accept a transaction broadcast by a peer
#[utoipa::path(
    post,
    path = "/broadcast-transaction",
    request_body = Transaction,
    responses(
        (status = 201, description = "Transaction accepted into the pool"),
        (status = 500, description = "Transaction rejected")
    )
)]
pub async fn receive_transaction(
    state: NodeData,
    transaction: web::Json<Transaction>,
) -> impl Responder {
    match state
        .blockchain
        .add_transaction(transaction.into_inner(), true)
        .await
    {
        Ok(_) => HttpResponse::Created().json(serde_json::json!({
            "message": "Successfully added transaction"
        })),
        Err(err) => HttpResponse::InternalServerError().json(serde_json::json!({
            "error": format!("Creating a transaction failed: {}", err)
        })),
    }
}
