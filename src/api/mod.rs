// API module
//
// Thin HTTP layer over the blockchain core: handlers deserialize, call
// into the ledger and serialize the result. No consensus logic lives here.

pub mod handlers;
pub mod routes;

// Re-export main components for easier access
pub use routes::configure_routes;
