use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

use crate::ledger::Amount;

/// Monotonically increasing round identifier. Doubles as the fairness round index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoundId(pub u64);

impl RoundId {
    pub fn next(self) -> Self {
        RoundId(self.0 + 1)
    }
}

impl fmt::Display for RoundId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Round lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoundPhase {
    Betting,
    Flying,
    Crashed,
}

impl fmt::Display for RoundPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoundPhase::Betting => write!(f, "betting"),
            RoundPhase::Flying => write!(f, "flying"),
            RoundPhase::Crashed => write!(f, "crashed"),
        }
    }
}

/// Payout factor in fixed-point hundredths (`134` is `1.34x`).
///
/// Serialized on the wire as a decimal number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Multiplier(u64);

impl Multiplier {
    pub const ONE: Multiplier = Multiplier(100);

    pub const fn from_hundredths(hundredths: u64) -> Self {
        Multiplier(hundredths)
    }

    pub const fn hundredths(self) -> u64 {
        self.0
    }

    pub fn as_f64(self) -> f64 {
        self.0 as f64 / 100.0
    }

    /// Round a decimal factor half-up to hundredths.
    pub fn from_f64(value: f64) -> Option<Self> {
        let scaled = (value * 100.0 + 0.5).floor();
        if !scaled.is_finite() || scaled < 0.0 || scaled >= u64::MAX as f64 {
            return None;
        }
        Some(Multiplier(scaled as u64))
    }

    /// `floor(stake * self)`, or `None` on overflow.
    pub fn apply(self, stake: Amount) -> Option<Amount> {
        let payout = (stake as u128).checked_mul(self.0 as u128)? / 100;
        u64::try_from(payout).ok()
    }
}

impl fmt::Display for Multiplier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.0 / 100, self.0 % 100)
    }
}

impl Serialize for Multiplier {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(self.as_f64())
    }
}

impl<'de> Deserialize<'de> for Multiplier {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = f64::deserialize(deserializer)?;
        Multiplier::from_f64(value)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid multiplier {}", value)))
    }
}

/// Point-in-time public view of the current round.
///
/// `crash_point` and `server_seed` are only populated once the round has crashed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundSnapshot {
    pub round_id: RoundId,
    pub phase: RoundPhase,
    pub server_seed_hash: String,
    pub multiplier: Multiplier,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub countdown_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elapsed_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crash_point: Option<Multiplier>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_seed: Option<String>,
}

/// Fairness record published after a round crashes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundReveal {
    pub round_id: RoundId,
    /// Hex-encoded 32-byte server seed
    pub server_seed: String,
    /// Hex-encoded SHA-256 of the seed, published when the round opened
    pub server_seed_hash: String,
    pub crash_point: Multiplier,
    pub crashed_at: DateTime<Utc>,
}
