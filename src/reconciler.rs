//! Request reconciler
//!
//! The only path by which a player request mutates the bet ledger. Every
//! decision is taken against the live round state, read under the round lock
//! at the moment the request is processed. Gateway calls always happen after
//! that lock is released.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::{sync::Arc, time::Duration};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::errors::{EngineError, EngineResult, SettlementError};
use crate::ledger::{AccountId, Amount, Bet, BetId, BetLedger};
use crate::metrics::EngineMetrics;
use crate::round::{LiveRead, Multiplier, RoundId, RoundStateMachine};
use crate::settlement::{with_timeout, SettlementGateway};

/// Accepted stake range in minor units
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakeLimits {
    pub min: Amount,
    pub max: Amount,
}

impl Default for StakeLimits {
    fn default() -> Self {
        Self {
            min: 100,
            max: 100_000_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlacedBet {
    pub bet_id: BetId,
    pub round_id: RoundId,
    pub stake: Amount,
    pub new_balance: Amount,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CashOutReceipt {
    pub bet_id: BetId,
    pub round_id: RoundId,
    pub multiplier: Multiplier,
    pub win_amount: Amount,
    pub new_balance: Amount,
}

pub struct RequestReconciler {
    rounds: Arc<RoundStateMachine>,
    ledger: Arc<BetLedger>,
    gateway: Arc<dyn SettlementGateway>,
    metrics: Arc<EngineMetrics>,
    limits: StakeLimits,
    settlement_timeout: Duration,
    account_locks: DashMap<AccountId, Arc<Mutex<()>>>,
}

impl RequestReconciler {
    pub fn new(
        rounds: Arc<RoundStateMachine>,
        ledger: Arc<BetLedger>,
        gateway: Arc<dyn SettlementGateway>,
        metrics: Arc<EngineMetrics>,
        limits: StakeLimits,
        settlement_timeout: Duration,
    ) -> Self {
        Self {
            rounds,
            ledger,
            gateway,
            metrics,
            limits,
            settlement_timeout,
            account_locks: DashMap::new(),
        }
    }

    pub fn limits(&self) -> StakeLimits {
        self.limits
    }

    pub fn gateway(&self) -> &Arc<dyn SettlementGateway> {
        &self.gateway
    }

    /// Place a bet on the current round.
    ///
    /// Runs on its own task: once admitted, the debit and its ledger entry
    /// complete even if the caller stops waiting.
    pub async fn place_bet(
        self: &Arc<Self>,
        account_id: &str,
        stake: Amount,
        round_id: Option<RoundId>,
    ) -> EngineResult<PlacedBet> {
        let this = self.clone();
        let account = account_id.to_string();
        let result = tokio::spawn(async move { this.place_bet_inner(&account, stake, round_id).await })
            .await
            .unwrap_or_else(|e| {
                Err(EngineError::SettlementUnavailable {
                    reason: format!("bet task failed: {}", e),
                })
            });

        match &result {
            Ok(placed) => {
                self.metrics.record_bet(stake);
                info!(
                    account = account_id,
                    bet_id = %placed.bet_id,
                    round_id = %placed.round_id,
                    stake,
                    "🎟️ Bet accepted"
                );
            }
            Err(e) => {
                self.metrics.record_bet_rejected();
                debug!(account = account_id, stake, error = %e, "Bet rejected");
            }
        }
        result
    }

    fn validate_stake(&self, stake: Amount) -> EngineResult<()> {
        if stake < self.limits.min {
            return Err(EngineError::InvalidStake {
                stake,
                reason: format!("minimum stake is {}", self.limits.min),
            });
        }
        if stake > self.limits.max {
            return Err(EngineError::InvalidStake {
                stake,
                reason: format!("maximum stake is {}", self.limits.max),
            });
        }
        Ok(())
    }

    fn account_lock(&self, account_id: &str) -> Arc<Mutex<()>> {
        self.account_locks
            .entry(account_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn place_bet_inner(
        &self,
        account_id: &str,
        stake: Amount,
        round_id: Option<RoundId>,
    ) -> EngineResult<PlacedBet> {
        self.validate_stake(stake)?;

        let lock = self.account_lock(account_id);
        let result = {
            let _serialized = lock.lock().await;
            self.admit_and_debit(account_id, stake, round_id).await
        };
        drop(lock);
        self.account_locks
            .remove_if(account_id, |_, l| Arc::strong_count(l) == 1);
        result
    }

    async fn admit_and_debit(
        &self,
        account_id: &str,
        stake: Amount,
        round_id: Option<RoundId>,
    ) -> EngineResult<PlacedBet> {
        let bet = self.rounds.read(|round| -> EngineResult<Bet> {
            let current = round.id();
            if let Some(requested) = round_id {
                if requested != current {
                    return Err(EngineError::RoundNotAcceptingBets {
                        round_id: requested,
                    });
                }
            }
            match round.live()? {
                LiveRead::Betting { .. } => {
                    Ok(self.ledger.reserve(current, account_id.to_string(), stake))
                }
                _ => Err(EngineError::RoundNotAcceptingBets { round_id: current }),
            }
        })?;

        let debit = with_timeout(
            self.settlement_timeout,
            self.gateway.debit(account_id, stake, bet.id),
        )
        .await;

        match debit {
            Ok(new_balance) => match self.ledger.confirm(bet.id) {
                Ok(_) => Ok(PlacedBet {
                    bet_id: bet.id,
                    round_id: bet.round_id,
                    stake,
                    new_balance,
                }),
                Err(e) => {
                    info!(bet_id = %bet.id, "Debit landed after betting closed, reversing");
                    self.compensate(&bet).await;
                    Err(e)
                }
            },
            Err(SettlementError::InsufficientFunds { .. }) => {
                self.ledger.discard(bet.id, true);
                self.metrics.record_bet_voided();
                Err(EngineError::InsufficientFunds)
            }
            Err(SettlementError::UnknownAccount(account)) => {
                warn!(account = %account, "Bet from unknown wallet account");
                self.ledger.discard(bet.id, true);
                self.metrics.record_bet_voided();
                Err(EngineError::InsufficientFunds)
            }
            Err(SettlementError::Unavailable(reason)) => {
                self.metrics.record_settlement_failure();
                warn!(bet_id = %bet.id, reason = %reason, "Debit failed, compensating");
                self.compensate(&bet).await;
                Err(EngineError::SettlementUnavailable { reason })
            }
        }
    }

    /// Reverse any debit that may have applied for a bet that was never accepted.
    /// Returns whether the reversal is confirmed.
    async fn compensate(&self, bet: &Bet) -> bool {
        self.metrics.record_bet_voided();
        let reversal = with_timeout(
            self.settlement_timeout,
            self.gateway.reverse_debit(&bet.account_id, bet.id),
        )
        .await;

        match reversal {
            Ok(_) => {
                self.ledger.discard(bet.id, true);
                self.metrics.record_reversal();
                true
            }
            Err(e) => {
                self.ledger.discard(bet.id, false);
                self.metrics.record_settlement_failure();
                warn!(bet_id = %bet.id, error = %e, "Reversal failed, left for the retrier");
                false
            }
        }
    }

    /// Cash out a bet at the multiplier the live round shows right now.
    ///
    /// Runs on its own task: once the win is claimed, its credit is carried
    /// to `WonAt` or `CreditOwed` even if the caller stops waiting.
    pub async fn cash_out(self: &Arc<Self>, account_id: &str, bet_id: BetId) -> EngineResult<CashOutReceipt> {
        let this = self.clone();
        let account = account_id.to_string();
        tokio::spawn(async move { this.cash_out_inner(&account, bet_id).await })
            .await
            .unwrap_or_else(|e| {
                Err(EngineError::SettlementUnavailable {
                    reason: format!("cash-out task failed: {}", e),
                })
            })
    }

    async fn cash_out_inner(&self, account_id: &str, bet_id: BetId) -> EngineResult<CashOutReceipt> {
        let claim = self.rounds.read(|round| {
            self.ledger.claim_cash_out(bet_id, account_id, |bet_round| {
                if bet_round != round.id() {
                    return Err(EngineError::RoundAlreadyCrashed {
                        round_id: bet_round,
                    });
                }
                match round.live()? {
                    LiveRead::Flying { multiplier, .. } => Ok(multiplier),
                    LiveRead::Betting { .. } => Err(EngineError::RoundNotAcceptingBets {
                        round_id: bet_round,
                    }),
                    LiveRead::Crashed => Err(EngineError::RoundAlreadyCrashed {
                        round_id: bet_round,
                    }),
                }
            })
        });

        let claim = match claim {
            Ok(claim) => claim,
            Err(e) => {
                self.metrics.record_cash_out_rejected();
                debug!(bet_id = %bet_id, error = %e, "Cash-out rejected");
                return Err(e);
            }
        };

        let bet = &claim.bet;
        let Some(win_amount) = claim.multiplier.apply(bet.stake) else {
            self.ledger.credit_failed(bet_id);
            return Err(EngineError::SettlementUnavailable {
                reason: "payout overflow".to_string(),
            });
        };

        let credit = with_timeout(
            self.settlement_timeout,
            self.gateway.credit(account_id, win_amount, bet_id),
        )
        .await;

        match credit {
            Ok(new_balance) => {
                self.ledger.complete_credit(bet_id);
                self.metrics.record_cash_out(win_amount);
                info!(
                    account = account_id,
                    bet_id = %bet_id,
                    multiplier = %claim.multiplier,
                    win_amount,
                    retry = claim.retry,
                    "💰 Cash-out settled"
                );
                Ok(CashOutReceipt {
                    bet_id,
                    round_id: bet.round_id,
                    multiplier: claim.multiplier,
                    win_amount,
                    new_balance,
                })
            }
            Err(e) => {
                self.ledger.credit_failed(bet_id);
                self.metrics.record_settlement_failure();
                warn!(
                    bet_id = %bet_id,
                    multiplier = %claim.multiplier,
                    error = %e,
                    "Credit failed, win kept as owed"
                );
                Err(EngineError::SettlementUnavailable {
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Look up a bet on behalf of `account_id`. Other accounts' bets read as missing.
    pub fn bet(&self, account_id: &str, bet_id: BetId) -> EngineResult<Bet> {
        self.ledger
            .get(bet_id)
            .filter(|bet| bet.account_id == account_id)
            .ok_or(EngineError::BetNotFound { bet_id })
    }
}
