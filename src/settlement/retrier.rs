//! Settlement retrier
//!
//! Background worker that finishes settlement work a request could not:
//! owed credits, unconfirmed debit reversals, and archiving of fully settled
//! rounds. It never touches the round lock.

use std::{sync::Arc, time::Duration};
use tokio::{sync::watch, task::JoinHandle, time::MissedTickBehavior};
use tracing::{debug, info, warn};

use super::{with_timeout, SettlementGateway};
use crate::ledger::{BetLedger, RoundSettlement};
use crate::metrics::EngineMetrics;
use crate::round::RoundStateMachine;

/// Outcome of one retrier pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetrySummary {
    pub credits_settled: usize,
    pub credits_failed: usize,
    pub reversals_settled: usize,
    pub reversals_failed: usize,
    pub archived: Vec<RoundSettlement>,
}

pub struct SettlementRetrier {
    rounds: Arc<RoundStateMachine>,
    ledger: Arc<BetLedger>,
    gateway: Arc<dyn SettlementGateway>,
    metrics: Arc<EngineMetrics>,
    timeout: Duration,
    interval: Duration,
}

impl SettlementRetrier {
    pub fn new(
        rounds: Arc<RoundStateMachine>,
        ledger: Arc<BetLedger>,
        gateway: Arc<dyn SettlementGateway>,
        metrics: Arc<EngineMetrics>,
        timeout: Duration,
        interval: Duration,
    ) -> Self {
        Self {
            rounds,
            ledger,
            gateway,
            metrics,
            timeout,
            interval,
        }
    }

    pub fn spawn(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(self.interval);
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                    _ = tick.tick() => {
                        self.run_once().await;
                    }
                }
            }
            debug!("Settlement retrier stopped");
        })
    }

    /// Retry owed credits and reversals, then archive settled rounds.
    pub async fn run_once(&self) -> RetrySummary {
        let mut summary = RetrySummary::default();

        for owed in self.ledger.owed_credits() {
            let Some(bet) = self.ledger.claim_owed_credit(owed.id) else {
                continue;
            };
            let Some(amount) = bet.payout() else {
                self.ledger.credit_failed(bet.id);
                summary.credits_failed += 1;
                continue;
            };

            match with_timeout(self.timeout, self.gateway.credit(&bet.account_id, amount, bet.id)).await {
                Ok(_) => {
                    self.ledger.complete_credit(bet.id);
                    self.metrics.record_credit_retry();
                    self.metrics.record_cash_out(amount);
                    info!(bet_id = %bet.id, amount, "Owed credit settled");
                    summary.credits_settled += 1;
                }
                Err(e) => {
                    self.ledger.credit_failed(bet.id);
                    self.metrics.record_settlement_failure();
                    warn!(bet_id = %bet.id, error = %e, "Owed credit still failing");
                    summary.credits_failed += 1;
                }
            }
        }

        for voided in self.ledger.unrefunded() {
            match with_timeout(self.timeout, self.gateway.reverse_debit(&voided.account_id, voided.id)).await {
                Ok(_) => {
                    self.ledger.mark_refunded(voided.id);
                    self.metrics.record_reversal();
                    debug!(bet_id = %voided.id, "Voided bet reversal confirmed");
                    summary.reversals_settled += 1;
                }
                Err(e) => {
                    self.metrics.record_settlement_failure();
                    warn!(bet_id = %voided.id, error = %e, "Reversal still failing");
                    summary.reversals_failed += 1;
                }
            }
        }

        let current = self.rounds.current_round_id();
        for settlement in self.ledger.archive_settled(current) {
            self.metrics.record_archived(&settlement);
            info!(
                round_id = ?settlement.round_id,
                bets = settlement.bets,
                staked = settlement.staked,
                credited = settlement.credited,
                won = settlement.won,
                lost = settlement.lost,
                "📒 Round settled and archived"
            );
            summary.archived.push(settlement);
        }

        summary
    }
}
