//! HTTP router and middleware stack.

use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::state::AppState;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

pub fn create(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([axum::http::Method::GET, axum::http::Method::POST])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handlers::health))
        .route("/api/wallet/status", get(handlers::wallet_status))
        .route("/api/wallet/register", post(handlers::wallet_register))
        .route("/api/wallet/recover", post(handlers::wallet_recover))
        .route("/api/punks", get(handlers::list_punks))
        .route("/api/punks/owner", get(handlers::punks_by_owner))
        .route("/api/punks/{punk_id}", get(handlers::punk_detail))
        .route("/api/supply", get(handlers::supply))
        .route("/api/escrow/list", post(handlers::escrow_list))
        .route("/api/escrow/info", get(handlers::escrow_info))
        .route("/api/escrow/listings", get(handlers::escrow_listings))
        .route(
            "/api/escrow/update-outpoint",
            post(handlers::escrow_update_outpoint),
        )
        .route("/api/escrow/buy", post(handlers::escrow_buy))
        .route("/api/escrow/execute", post(handlers::escrow_execute))
        .route("/api/escrow/cancel", post(handlers::escrow_cancel))
        .route("/api/marketplace/sales", get(handlers::marketplace_sales))
        .route("/api/admin/audit", get(handlers::admin_audit))
        .route("/api/admin/reserve-claim", post(handlers::admin_reserve_claim))
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
