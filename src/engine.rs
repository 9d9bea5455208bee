//! Engine assembly
//!
//! Builds every component from a [`CrashConfig`] and starts the background
//! tasks (clock, settlement retrier, heartbeat) under one shutdown signal.

use std::sync::Arc;
use tokio::{
    sync::watch,
    task::{JoinError, JoinHandle},
    time::Instant,
};
use tracing::{info, warn};

use crate::broadcast::BroadcastPublisher;
use crate::config::CrashConfig;
use crate::errors::{ConfigurationError, EngineError, EngineResult};
use crate::fairness::{FairnessSource, OsSeedGenerator, SeedGenerator};
use crate::ledger::BetLedger;
use crate::metrics::EngineMetrics;
use crate::reconciler::RequestReconciler;
use crate::round::{RoundClock, RoundStateMachine};
use crate::settlement::{InMemoryWallet, SettlementGateway, SettlementRetrier};

/// Fully wired engine. Cheap to share behind an `Arc`.
pub struct CrashEngine {
    config: CrashConfig,
    rounds: Arc<RoundStateMachine>,
    ledger: Arc<BetLedger>,
    reconciler: Arc<RequestReconciler>,
    retrier: Arc<SettlementRetrier>,
    publisher: Arc<BroadcastPublisher>,
    metrics: Arc<EngineMetrics>,
}

impl CrashEngine {
    pub fn new(
        config: CrashConfig,
        gateway: Arc<dyn SettlementGateway>,
    ) -> Result<Self, ConfigurationError> {
        Self::with_seed_generator(config, gateway, Box::new(OsSeedGenerator))
    }

    /// Engine backed by an [`InMemoryWallet`] seeded from `config.wallet`
    pub fn in_memory(config: CrashConfig) -> Result<(Self, Arc<InMemoryWallet>), ConfigurationError> {
        let wallet = Arc::new(InMemoryWallet::with_accounts(
            config
                .wallet
                .accounts
                .iter()
                .map(|account| (account.id.clone(), account.balance)),
        ));
        let engine = Self::new(config, wallet.clone())?;
        Ok((engine, wallet))
    }

    pub fn with_seed_generator(
        config: CrashConfig,
        gateway: Arc<dyn SettlementGateway>,
        seeds: Box<dyn SeedGenerator>,
    ) -> Result<Self, ConfigurationError> {
        config.validate()?;

        let metrics = Arc::new(EngineMetrics::new());
        let ledger = Arc::new(BetLedger::new(config.settlement.archived_bet_capacity));
        let rounds = Arc::new(RoundStateMachine::new(
            FairnessSource::with_generator(config.fairness_params()?, seeds),
            config.curve(),
            config.timings(),
            config.round.history_capacity,
            ledger.clone(),
            Instant::now(),
        ));
        let publisher = Arc::new(BroadcastPublisher::new(config.broadcast.channel_capacity));
        let reconciler = Arc::new(RequestReconciler::new(
            rounds.clone(),
            ledger.clone(),
            gateway.clone(),
            metrics.clone(),
            config.stake_limits(),
            config.settlement_timeout(),
        ));
        let retrier = Arc::new(SettlementRetrier::new(
            rounds.clone(),
            ledger.clone(),
            gateway,
            metrics.clone(),
            config.settlement_timeout(),
            config.retry_interval(),
        ));

        Ok(Self {
            config,
            rounds,
            ledger,
            reconciler,
            retrier,
            publisher,
            metrics,
        })
    }

    /// Spawn the clock, retrier and heartbeat tasks
    pub fn start(&self) -> EngineHandle {
        let (shutdown, watcher) = watch::channel(false);

        let clock = RoundClock::new(
            self.rounds.clone(),
            self.publisher.clone(),
            self.metrics.clone(),
            self.config.tick_interval(),
        )
        .spawn(watcher.clone());
        let retrier = self.retrier.clone().spawn(watcher.clone());
        let heartbeat = self
            .publisher
            .spawn_heartbeat(self.config.heartbeat_period(), watcher);

        info!(
            betting_ms = self.config.round.betting_ms,
            cooldown_ms = self.config.round.cooldown_ms,
            house_edge_bps = self.config.fairness.house_edge_bps,
            "🚀 Crash engine started"
        );

        EngineHandle {
            shutdown,
            clock: Some(clock),
            retrier,
            heartbeat,
        }
    }

    pub fn config(&self) -> &CrashConfig {
        &self.config
    }

    pub fn rounds(&self) -> &Arc<RoundStateMachine> {
        &self.rounds
    }

    pub fn ledger(&self) -> &Arc<BetLedger> {
        &self.ledger
    }

    pub fn reconciler(&self) -> &Arc<RequestReconciler> {
        &self.reconciler
    }

    pub fn retrier(&self) -> &Arc<SettlementRetrier> {
        &self.retrier
    }

    pub fn publisher(&self) -> &Arc<BroadcastPublisher> {
        &self.publisher
    }

    pub fn metrics(&self) -> &Arc<EngineMetrics> {
        &self.metrics
    }
}

fn clock_outcome(joined: Result<EngineResult<()>, JoinError>) -> EngineResult<()> {
    joined.map_err(|e| EngineError::ClockFault(format!("clock task aborted: {}", e)))?
}

/// Controls the running background tasks
pub struct EngineHandle {
    shutdown: watch::Sender<bool>,
    clock: Option<JoinHandle<EngineResult<()>>>,
    retrier: JoinHandle<()>,
    heartbeat: JoinHandle<()>,
}

impl EngineHandle {
    /// Resolve when the clock task ends. `Err` carries the fault that stopped it.
    ///
    /// Safe to use in `select!`: a cancelled wait leaves the handle intact.
    pub async fn clock_stopped(&mut self) -> EngineResult<()> {
        let Some(clock) = self.clock.as_mut() else {
            return Ok(());
        };
        let outcome = clock_outcome(clock.await);
        self.clock = None;
        outcome
    }

    /// Signal every task to stop and wait for them
    pub async fn shutdown(mut self) -> EngineResult<()> {
        let _ = self.shutdown.send(true);

        if let Err(e) = self.retrier.await {
            warn!(error = %e, "Settlement retrier ended abnormally");
        }
        if let Err(e) = self.heartbeat.await {
            warn!(error = %e, "Heartbeat task ended abnormally");
        }
        let outcome = match self.clock.take() {
            Some(clock) => clock_outcome(clock.await),
            None => Ok(()),
        };

        info!("Crash engine stopped");
        outcome
    }
}
