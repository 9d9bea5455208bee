//! Shared fixtures for the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use crash_engine::{
    config::{CrashConfig, WalletAccount},
    fairness::{crash_point, FairnessParams, SeedGenerator, ServerSeed},
    ledger::{Amount, BetId},
    settlement::{InMemoryWallet, SettlementGateway},
    CrashEngine, Multiplier, RoundId, SettlementError,
};
use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
};

pub const STARTING_BALANCE: Amount = 1_000_000;

/// Serves pre-chosen seeds, then random ones
pub struct ScriptedSeeds(Mutex<VecDeque<ServerSeed>>);

impl ScriptedSeeds {
    pub fn new(seeds: Vec<ServerSeed>) -> Self {
        Self(Mutex::new(seeds.into()))
    }
}

impl SeedGenerator for ScriptedSeeds {
    fn next_seed(&self) -> ServerSeed {
        self.0
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(ServerSeed::generate)
    }
}

/// First counter seed whose crash point for `round` satisfies `want`
pub fn seed_for(round: u64, want: impl Fn(Multiplier) -> bool) -> ServerSeed {
    let params = FairnessParams::default();
    (0u64..)
        .map(|n| {
            let mut bytes = [0u8; 32];
            bytes[..8].copy_from_slice(&n.to_be_bytes());
            ServerSeed::from_bytes(bytes)
        })
        .find(|seed| want(crash_point(seed, RoundId(round), &params)))
        .unwrap()
}

pub fn crash_of(seed: &ServerSeed, round: u64) -> Multiplier {
    crash_point(seed, RoundId(round), &FairnessParams::default())
}

pub fn between(low: u64, high: u64) -> impl Fn(Multiplier) -> bool {
    move |m| m.hundredths() >= low && m.hundredths() < high
}

/// Default timings with funded test accounts and a retrier that only runs when asked
pub fn test_config() -> CrashConfig {
    let mut config = CrashConfig::default();
    config.settlement.retry_interval_ms = 3_600_000;
    config.wallet.accounts = ["alice", "bob"]
        .into_iter()
        .map(|id| WalletAccount {
            id: id.to_string(),
            balance: STARTING_BALANCE,
        })
        .collect();
    config
}

/// In-memory wallet whose operations can be made to fail
pub struct FlakyWallet {
    pub inner: InMemoryWallet,
    pub fail_debits: AtomicBool,
    pub fail_credits: AtomicBool,
}

impl FlakyWallet {
    pub fn new(config: &CrashConfig) -> Self {
        Self {
            inner: InMemoryWallet::with_accounts(
                config
                    .wallet
                    .accounts
                    .iter()
                    .map(|a| (a.id.clone(), a.balance)),
            ),
            fail_debits: AtomicBool::new(false),
            fail_credits: AtomicBool::new(false),
        }
    }

    pub fn set_fail_credits(&self, fail: bool) {
        self.fail_credits.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl SettlementGateway for FlakyWallet {
    async fn debit(&self, account: &str, amount: Amount, bet_id: BetId) -> Result<Amount, SettlementError> {
        if self.fail_debits.load(Ordering::SeqCst) {
            return Err(SettlementError::Unavailable("wallet offline".to_string()));
        }
        self.inner.debit(account, amount, bet_id).await
    }

    async fn credit(&self, account: &str, amount: Amount, bet_id: BetId) -> Result<Amount, SettlementError> {
        if self.fail_credits.load(Ordering::SeqCst) {
            return Err(SettlementError::Unavailable("wallet offline".to_string()));
        }
        self.inner.credit(account, amount, bet_id).await
    }

    async fn reverse_debit(&self, account: &str, bet_id: BetId) -> Result<Amount, SettlementError> {
        self.inner.reverse_debit(account, bet_id).await
    }

    async fn balance(&self, account: &str) -> Result<Amount, SettlementError> {
        self.inner.balance(account).await
    }
}

/// Engine on `test_config()` with scripted seeds and the returned wallet
pub fn engine_with_seeds(seeds: Vec<ServerSeed>) -> (Arc<CrashEngine>, Arc<FlakyWallet>) {
    engine_with(test_config(), seeds)
}

pub fn engine_with(config: CrashConfig, seeds: Vec<ServerSeed>) -> (Arc<CrashEngine>, Arc<FlakyWallet>) {
    let wallet = Arc::new(FlakyWallet::new(&config));
    let engine = CrashEngine::with_seed_generator(
        config,
        wallet.clone(),
        Box::new(ScriptedSeeds::new(seeds)),
    )
    .unwrap();
    (Arc::new(engine), wallet)
}
