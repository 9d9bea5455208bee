//! Bet ledger
//!
//! Owns the lifecycle of every bet. Bets are resolved only against the round
//! they reference; the ledger never mutates round state.

pub mod bet;
pub mod book;

pub use bet::{AccountId, Amount, Bet, BetId, BetStatus};
pub use book::{BetLedger, CashOutClaim, RoundSettlement};
