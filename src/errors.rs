//! Error types for the crash round engine
//!
//! Request-level failures surface to callers as [`EngineError`]. The external
//! wallet collaborator reports through [`SettlementError`], and configuration
//! loading through [`ConfigurationError`].

use crate::ledger::{AccountId, Amount, BetId};
use crate::round::RoundId;

/// Failures of bet and cash-out requests, plus the fatal clock path.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    #[error("Round {round_id} is not accepting bets")]
    RoundNotAcceptingBets { round_id: RoundId },

    #[error("Insufficient funds")]
    InsufficientFunds,

    #[error("Round {round_id} has already crashed")]
    RoundAlreadyCrashed { round_id: RoundId },

    #[error("Bet {bet_id} is already resolved")]
    BetAlreadyResolved { bet_id: BetId },

    #[error("Bet {bet_id} not found")]
    BetNotFound { bet_id: BetId },

    #[error("Settlement unavailable: {reason}")]
    SettlementUnavailable { reason: String },

    #[error("Invalid stake {stake}: {reason}")]
    InvalidStake { stake: Amount, reason: String },

    #[error("Round {round_id} not found")]
    RoundNotFound { round_id: RoundId },

    /// The clock could not compute a multiplier sample. Never recoverable.
    #[error("Clock fault: {0}")]
    ClockFault(String),
}

impl EngineError {
    /// Stable machine-readable code used on the wire.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::RoundNotAcceptingBets { .. } => "ROUND_NOT_ACCEPTING_BETS",
            EngineError::InsufficientFunds => "INSUFFICIENT_FUNDS",
            EngineError::RoundAlreadyCrashed { .. } => "ROUND_ALREADY_CRASHED",
            EngineError::BetAlreadyResolved { .. } => "BET_ALREADY_RESOLVED",
            EngineError::BetNotFound { .. } => "BET_NOT_FOUND",
            EngineError::SettlementUnavailable { .. } => "SETTLEMENT_UNAVAILABLE",
            EngineError::InvalidStake { .. } => "INVALID_STAKE",
            EngineError::RoundNotFound { .. } => "ROUND_NOT_FOUND",
            EngineError::ClockFault(_) => "CLOCK_FAULT",
        }
    }
}

/// Errors reported by a [`SettlementGateway`](crate::settlement::SettlementGateway).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SettlementError {
    #[error("Insufficient funds: balance {balance}, requested {requested}")]
    InsufficientFunds { balance: Amount, requested: Amount },

    #[error("Unknown account {0}")]
    UnknownAccount(AccountId),

    #[error("Settlement service unavailable: {0}")]
    Unavailable(String),
}

/// Configuration loading and validation errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigurationError {
    #[error("Failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("Invalid value for {field}: '{value}' ({reason})")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Validation failed: {0}")]
    ValidationFailed(String),
}

impl From<toml::de::Error> for ConfigurationError {
    fn from(e: toml::de::Error) -> Self {
        ConfigurationError::LoadFailed(format!("Failed to parse TOML: {}", e))
    }
}

impl From<std::io::Error> for ConfigurationError {
    fn from(e: std::io::Error) -> Self {
        ConfigurationError::LoadFailed(e.to_string())
    }
}

/// Convenience type alias for engine results
pub type EngineResult<T> = Result<T, EngineError>;
