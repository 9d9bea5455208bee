use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::round::{Multiplier, RoundId};

/// Minor currency units (e.g. cents)
pub type Amount = u64;

/// Account identifier owned by the wallet collaborator
pub type AccountId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BetId(pub u64);

impl fmt::Display for BetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Bet lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum BetStatus {
    /// Admitted during betting; debit in flight
    Reserved,
    /// Debit succeeded; waiting for a cash-out or the crash
    Pending,
    /// Claimed by a cash-out at `multiplier`; credit in flight
    Settling { multiplier: Multiplier },
    /// Credit failed after the win was locked in
    CreditOwed { multiplier: Multiplier },
    WonAt { multiplier: Multiplier },
    Lost,
    /// Never accepted. `refunded` is false while a debit may still be outstanding.
    Voided { refunded: bool },
}

impl BetStatus {
    /// No further settlement work remains for this bet
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BetStatus::WonAt { .. } | BetStatus::Lost | BetStatus::Voided { refunded: true }
        )
    }

    /// The win is locked in, whether or not the credit has landed yet
    pub fn locked_multiplier(&self) -> Option<Multiplier> {
        match self {
            BetStatus::Settling { multiplier }
            | BetStatus::CreditOwed { multiplier }
            | BetStatus::WonAt { multiplier } => Some(*multiplier),
            _ => None,
        }
    }
}

impl fmt::Display for BetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BetStatus::Reserved => write!(f, "reserved"),
            BetStatus::Pending => write!(f, "pending"),
            BetStatus::Settling { multiplier } => write!(f, "settling@{}", multiplier),
            BetStatus::CreditOwed { multiplier } => write!(f, "creditOwed@{}", multiplier),
            BetStatus::WonAt { multiplier } => write!(f, "wonAt@{}", multiplier),
            BetStatus::Lost => write!(f, "lost"),
            BetStatus::Voided { .. } => write!(f, "voided"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bet {
    pub id: BetId,
    pub round_id: RoundId,
    pub account_id: AccountId,
    pub stake: Amount,
    pub placed_at: DateTime<Utc>,
    pub status: BetStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settled_at: Option<DateTime<Utc>>,
}

impl Bet {
    pub fn new(id: BetId, round_id: RoundId, account_id: AccountId, stake: Amount) -> Self {
        Self {
            id,
            round_id,
            account_id,
            stake,
            placed_at: Utc::now(),
            status: BetStatus::Reserved,
            settled_at: None,
        }
    }

    /// Amount owed for a locked-in win
    pub fn payout(&self) -> Option<Amount> {
        self.status
            .locked_multiplier()
            .and_then(|m| m.apply(self.stake))
    }

    pub(crate) fn transition(&mut self, status: BetStatus) {
        self.status = status;
        if status.is_terminal() {
            self.settled_at = Some(Utc::now());
        }
    }
}
