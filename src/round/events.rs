use super::types::{Multiplier, RoundId};

/// State changes committed by the round state machine, in commit order.
#[derive(Debug, Clone, PartialEq)]
pub enum RoundEvent {
    RoundOpened {
        round_id: RoundId,
        server_seed_hash: String,
        countdown_seconds: u64,
    },
    Countdown {
        round_id: RoundId,
        seconds: u64,
    },
    Launched {
        round_id: RoundId,
    },
    Tick {
        round_id: RoundId,
        multiplier: Multiplier,
        elapsed_ms: u64,
    },
    RoundCrashed {
        round_id: RoundId,
        crash_point: Multiplier,
        server_seed: String,
        server_seed_hash: String,
    },
}

impl RoundEvent {
    pub fn round_id(&self) -> RoundId {
        match self {
            RoundEvent::RoundOpened { round_id, .. }
            | RoundEvent::Countdown { round_id, .. }
            | RoundEvent::Launched { round_id }
            | RoundEvent::Tick { round_id, .. }
            | RoundEvent::RoundCrashed { round_id, .. } => *round_id,
        }
    }
}
