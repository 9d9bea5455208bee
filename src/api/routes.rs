//! Route Definitions

use super::{handlers::*, websocket::websocket_handler};
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

/// Build the API router with all endpoints
pub fn create_router(state: Arc<AppState>) -> Router {
    let crash = Router::new()
        .route("/current", get(current_round_handler))
        .route("/bet", post(place_bet_handler))
        .route("/cashout", post(cash_out_handler))
        .route("/bets/:bet_id", get(bet_handler))
        .route("/history", get(history_handler))
        .route("/rounds/:round_id/verify", get(verify_round_handler));

    Router::new()
        .route("/health", get(health_handler))
        .nest("/api/crash", crash)
        // Live event feed
        .route("/ws", get(websocket_handler))
        .route("/metrics", get(metrics_handler))
        .fallback(not_found_handler)
        .with_state(state)
}
