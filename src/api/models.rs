//! API Request and Response Models

use serde::{Deserialize, Serialize};

use crate::ledger::{AccountId, Amount, BetId};
use crate::round::{Multiplier, RoundId, RoundPhase, RoundReveal};

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub round_id: RoundId,
    pub phase: RoundPhase,
    pub feed_observers: usize,
}

/// POST /api/crash/bet
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaceBetRequest {
    pub account_id: AccountId,
    pub amount: Amount,
    /// Round the client believes is open; rejected if it is not the current one
    #[serde(default)]
    pub round_id: Option<RoundId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaceBetResponse {
    pub bet_id: BetId,
    pub round_id: RoundId,
    pub new_balance: Amount,
}

/// POST /api/crash/cashout
///
/// A client-supplied multiplier is not part of the request and is ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CashOutRequest {
    pub account_id: AccountId,
    pub bet_id: BetId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CashOutResponse {
    pub bet_id: BetId,
    pub win_amount: Amount,
    pub multiplier: Multiplier,
    pub new_balance: Amount,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryResponse {
    pub rounds: Vec<RoundReveal>,
    pub total_returned: usize,
}
