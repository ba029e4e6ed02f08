use actix_web::web;

use super::handlers;

/// Configures the node's routes. Peer-facing paths (`/chain`,
/// `/broadcast-*`) are the ones `HttpPeerTransport` calls on other nodes.
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/chain", web::get().to(handlers::get_chain))
        .route(
            "/transactions/pending",
            web::get().to(handlers::get_pending_transactions),
        )
        .route("/transactions/new", web::post().to(handlers::new_transaction))
        .route("/mine", web::post().to(handlers::mine))
        .route("/balance/{address}", web::get().to(handlers::get_balance))
        .route("/nodes", web::get().to(handlers::get_nodes))
        .route("/nodes/register", web::post().to(handlers::register_nodes))
        .route("/nodes/resolve", web::get().to(handlers::resolve_conflicts))
        .route("/broadcast-block", web::post().to(handlers::receive_block))
        .route(
            "/broadcast-transaction",
            web::post().to(handlers::receive_transaction),
        );
}
