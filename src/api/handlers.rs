//! Request Handlers
//!
//! Thin adapters from HTTP to the engine. Every multiplier a response carries
//! is computed server-side.

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    http::header,
    response::{IntoResponse, Response},
    Extension, Json,
};
use serde::Deserialize;
use std::sync::Arc;

use super::{errors::ApiError, middleware::RequestId, models::*};
use crate::engine::CrashEngine;
use crate::errors::EngineError;
use crate::fairness::{verify, VerificationReport};
use crate::ledger::{Bet, BetId};
use crate::round::{RoundId, RoundSnapshot};

/// Shared application state
pub struct AppState {
    pub engine: Arc<CrashEngine>,
}

/// Default number of revealed rounds returned by `/history`
pub const DEFAULT_HISTORY_LIMIT: usize = 15;

fn body<T>(request_id: &RequestId, payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| ApiError::bad_request(request_id.0.clone(), rejection.body_text()))
}

/// GET /health
pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let rounds = state.engine.rounds();
    let (round_id, phase) = rounds.read(|round| {
        let phase = round
            .live()
            .map(|live| live.phase())
            .unwrap_or_else(|_| round.committed_phase());
        (round.id(), phase)
    });
    Json(HealthResponse {
        status: "Running".to_string(),
        round_id,
        phase,
        feed_observers: state.engine.publisher().receiver_count(),
    })
}

/// GET /api/crash/current
pub async fn current_round_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
) -> Result<Json<RoundSnapshot>, ApiError> {
    state
        .engine
        .rounds()
        .snapshot()
        .map(Json)
        .map_err(|e| ApiError::engine(request_id.0, e))
}

/// POST /api/crash/bet
pub async fn place_bet_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    payload: Result<Json<PlaceBetRequest>, JsonRejection>,
) -> Result<Json<PlaceBetResponse>, ApiError> {
    let request = body(&request_id, payload)?;
    if request.account_id.trim().is_empty() {
        return Err(ApiError::bad_request(request_id.0, "accountId is required".to_string()));
    }

    let placed = state
        .engine
        .reconciler()
        .place_bet(&request.account_id, request.amount, request.round_id)
        .await
        .map_err(|e| ApiError::engine(request_id.0, e))?;

    Ok(Json(PlaceBetResponse {
        bet_id: placed.bet_id,
        round_id: placed.round_id,
        new_balance: placed.new_balance,
    }))
}

/// POST /api/crash/cashout
pub async fn cash_out_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    payload: Result<Json<CashOutRequest>, JsonRejection>,
) -> Result<Json<CashOutResponse>, ApiError> {
    let request = body(&request_id, payload)?;

    let receipt = state
        .engine
        .reconciler()
        .cash_out(&request.account_id, request.bet_id)
        .await
        .map_err(|e| ApiError::engine(request_id.0, e))?;

    Ok(Json(CashOutResponse {
        bet_id: receipt.bet_id,
        win_amount: receipt.win_amount,
        multiplier: receipt.multiplier,
        new_balance: receipt.new_balance,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BetQuery {
    pub account_id: String,
}

/// GET /api/crash/bets/:bet_id?accountId={id}
pub async fn bet_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    Path(bet_id): Path<u64>,
    query: Result<Query<BetQuery>, QueryRejection>,
) -> Result<Json<Bet>, ApiError> {
    let Query(query) =
        query.map_err(|rejection| ApiError::bad_request(request_id.0.clone(), rejection.body_text()))?;

    state
        .engine
        .reconciler()
        .bet(&query.account_id, BetId(bet_id))
        .map(Json)
        .map_err(|e| ApiError::engine(request_id.0, e))
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(default)]
    pub limit: Option<usize>,
}

/// GET /api/crash/history?limit={n}
pub async fn history_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<HistoryQuery>,
) -> Json<HistoryResponse> {
    let limit = query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
    let rounds = state.engine.rounds().history(limit);
    Json(HistoryResponse {
        total_returned: rounds.len(),
        rounds,
    })
}

/// GET /api/crash/rounds/:round_id/verify
pub async fn verify_round_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    Path(round_id): Path<u64>,
) -> Result<Json<VerificationReport>, ApiError> {
    let round_id = RoundId(round_id);
    let rounds = state.engine.rounds();
    let reveal = rounds
        .reveal(round_id)
        .ok_or_else(|| ApiError::engine(request_id.0.clone(), EngineError::RoundNotFound { round_id }))?;

    verify(
        &reveal.server_seed,
        reveal.round_id,
        &reveal.server_seed_hash,
        reveal.crash_point,
        rounds.fairness_params(),
    )
    .map(Json)
    .map_err(|e| ApiError::internal_error(request_id.0, e.to_string()))
}

/// GET /metrics
pub async fn metrics_handler(State(state): State<Arc<AppState>>) -> Response {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        state.engine.metrics().to_prometheus_format(),
    )
        .into_response()
}

/// Fallback for unknown paths
pub async fn not_found_handler(Extension(request_id): Extension<RequestId>) -> ApiError {
    ApiError::not_found(request_id.0, "No such endpoint".to_string())
}
