//! REST API routes configuration

use crate::api::handlers::{self, ApiState};
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};

/// Create the API router with all routes
pub fn create_router(state: ApiState) -> Router {
    // Configure CORS for browser access
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health check
        .route("/health", get(handlers::health_check))
        // Node
        .route("/api/node/status", get(handlers::get_node_status))
        // Wallets
        .route("/api/wallets", get(handlers::list_wallets))
        .route("/api/wallets", post(handlers::create_wallet))
        .route("/api/wallets/{name}/accounts", post(handlers::add_account))
        // Transactions
        .route("/api/transfers", post(handlers::send_transfer))
        .route("/api/transactions", get(handlers::list_transactions))
        .route("/api/harvesting", post(handlers::set_harvesting))
        // Multisig
        .route(
            "/api/multisig/conversions",
            post(handlers::convert_to_multisig),
        )
        .route("/api/multisig/signatures", post(handlers::sign_multisig))
        .route("/api/multisig/pending", get(handlers::list_pending_multisig))
        // Add state and middleware
        .with_state(state)
        .layer(cors)
}
