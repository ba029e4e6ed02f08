use actix_cors::Cors;
use actix_web::{middleware, web, App, HttpServer};
use anyhow::Context;
use log::{info, warn};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;
use uuid::Uuid;

use std::env;
use std::sync::Arc;

mod api;
mod blockchain;
mod network;

use api::handlers::NodeState;
use blockchain::{Address, Blockchain, Wallet};
use network::HttpPeerTransport;

/// Resolves the node's identity and builds the blockchain.
///
/// The wallet comes first: the chain needs the node's address for mining
/// rewards. A node started with the `MASTERNODE` env var runs without a
/// wallet under the reserved `MASTERNODE` address and refuses direct
/// mining and submission.
fn initialize_node(transport: Arc<HttpPeerTransport>) -> anyhow::Result<NodeState> {
    let node_id = Uuid::new_v4();

    let (address, wallet) = if env::var("MASTERNODE").is_ok() {
        info!("running as masternode: direct mining and submission disabled");
        (Address("MASTERNODE".to_string()), None)
    } else {
        let key_file = env::var("WALLET_KEY_FILE").unwrap_or_else(|_| "wallet.key".to_string());
        let wallet = Wallet::load_or_create(&key_file)
            .context("unable to configure wallet for blockchain integration")?;
        info!("node {} using wallet address {}", node_id, wallet.address());
        (wallet.address().clone(), Some(wallet))
    };

    let data_dir = env::var("DATA_DIR").unwrap_or_else(|_| "data/chain".to_string());
    let blockchain =
        match Blockchain::with_storage(address.clone(), node_id, transport.clone(), &data_dir) {
            Ok(blockchain) => {
                info!("blockchain storage at {}", data_dir);
                blockchain
            }
            Err(err) => {
                warn!("failed to open storage at {}: {}", data_dir, err);
                warn!("falling back to an in-memory blockchain");
                Blockchain::new(address, node_id, transport)
            }
        };

    Ok(NodeState { blockchain, wallet })
}

#[derive(OpenApi)]
#[openapi(
    paths(
        api::handlers::get_chain,
        api::handlers::get_pending_transactions,
        api::handlers::new_transaction,
        api::handlers::mine,
        api::handlers::get_balance,
        api::handlers::get_nodes,
        api::handlers::register_nodes,
        api::handlers::resolve_conflicts,
        api::handlers::receive_block,
        api::handlers::receive_transaction
    ),
    components(
        schemas(
            blockchain::Block,
            blockchain::Transaction,
            blockchain::Address,
            blockchain::DigitalSignature,
            api::handlers::ChainResponse,
            api::handlers::TransactionRequest,
            api::handlers::TransactionResponse,
            api::handlers::MineResponse,
            api::handlers::BalanceResponse,
            api::handlers::RegisterNodesRequest,
            api::handlers::NodesResponse,
            api::handlers::ResolveResponse,
            api::handlers::BroadcastBlockRequest
        )
    ),
    tags(
        (name = "powchain", description = "Proof-of-work blockchain node endpoints")
    ),
    info(
        title = "powchain node",
        version = "0.1.0",
        description = "A minimal proof-of-work blockchain node with longest-chain consensus"
    )
)]
struct ApiDoc;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let transport = Arc::new(HttpPeerTransport::new());
    let state = web::Data::new(initialize_node(transport)?);

    let port: u16 = env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8080);
    info!("starting HTTP server on 0.0.0.0:{}", port);

    HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        let openapi = ApiDoc::openapi();

        App::new()
            .wrap(middleware::Logger::default())
            .wrap(cors)
            .app_data(state.clone())
            .configure(api::configure_routes)
            .service(
                SwaggerUi::new("/swagger-ui/{_:.*}").url("/api-docs/openapi.json", openapi.clone()),
            )
    })
    .bind(("0.0.0.0", port))?
    .run()
    .await?;

    Ok(())
}
