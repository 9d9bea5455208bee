//! Crash Engine - real-time crash game round engine
//!
//! One round at a time moves through betting, flight and crash. The crash
//! point of every round is committed before betting opens and can be
//! verified by anyone once the seed is revealed.

pub mod api;
pub mod broadcast;
pub mod config;
pub mod engine;
pub mod errors;
pub mod fairness;
pub mod ledger;
pub mod metrics;
pub mod reconciler;
pub mod round;
pub mod settlement;

pub use config::{ConfigLoader, CrashConfig};
pub use engine::{CrashEngine, EngineHandle};
pub use errors::{ConfigurationError, EngineError, EngineResult, SettlementError};
pub use ledger::{Bet, BetId, BetStatus};
pub use round::{Multiplier, RoundId, RoundPhase};
pub use settlement::{InMemoryWallet, SettlementGateway};
