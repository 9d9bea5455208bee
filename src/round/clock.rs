//! Round clock
//!
//! A single task drives every phase transition on a fixed cadence. Each tick
//! commits state first and publishes the resulting events afterwards, so a
//! slow observer can never hold the round lock.

use std::{sync::Arc, time::Duration};
use tokio::{
    sync::watch,
    task::JoinHandle,
    time::{interval, Instant, MissedTickBehavior},
};
use tracing::{error, info};

use super::state::RoundStateMachine;
use crate::broadcast::BroadcastPublisher;
use crate::errors::EngineResult;
use crate::metrics::EngineMetrics;

pub struct RoundClock {
    rounds: Arc<RoundStateMachine>,
    publisher: Arc<BroadcastPublisher>,
    metrics: Arc<EngineMetrics>,
    tick_interval: Duration,
}

impl RoundClock {
    pub fn new(
        rounds: Arc<RoundStateMachine>,
        publisher: Arc<BroadcastPublisher>,
        metrics: Arc<EngineMetrics>,
        tick_interval: Duration,
    ) -> Self {
        Self {
            rounds,
            publisher,
            metrics,
            tick_interval,
        }
    }

    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<EngineResult<()>> {
        tokio::spawn(self.run(shutdown))
    }

    /// Drive the round until shutdown. Returns `Err` only on a clock fault.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> EngineResult<()> {
        info!(tick_ms = self.tick_interval.as_millis() as u64, "⏱️ Round clock started");

        if let Some(opened) = self.rounds.opening_event() {
            self.metrics.record_event(&opened);
            self.publisher.publish(&opened);
        }

        let mut ticker = interval(self.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;

                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Round clock shutting down");
                        return Ok(());
                    }
                }
                _ = ticker.tick() => self.step()?,
            }
        }
    }

    /// Sample the round once, then publish what was committed.
    fn step(&self) -> EngineResult<()> {
        let events = self.rounds.advance(Instant::now()).map_err(|e| {
            error!(error = %e, "Round clock fault");
            e
        })?;
        for event in &events {
            self.metrics.record_event(event);
            self.publisher.publish(event);
        }
        Ok(())
    }
}
