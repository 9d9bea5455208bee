use dashmap::DashMap;
use lru::LruCache;
use serde::{Deserialize, Serialize};
use std::{
    num::NonZeroUsize,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
};

use super::bet::{AccountId, Amount, Bet, BetId, BetStatus};
use crate::errors::{EngineError, EngineResult};
use crate::round::{Multiplier, RoundId};

fn lock(bet: &Mutex<Bet>) -> MutexGuard<'_, Bet> {
    bet.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A bet claimed for a cash-out, with the multiplier it was claimed at
#[derive(Debug, Clone)]
pub struct CashOutClaim {
    pub bet: Bet,
    pub multiplier: Multiplier,
    /// The claim retries a previously owed credit
    pub retry: bool,
}

/// Conservation summary produced when a round's bets are archived
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundSettlement {
    pub round_id: Option<RoundId>,
    pub bets: usize,
    pub staked: Amount,
    pub credited: Amount,
    pub won: usize,
    pub lost: usize,
    pub voided: usize,
}

/// Live bet book plus a bounded archive of settled bets.
///
/// Every mutation takes the bet's own mutex. Callers that also need the round
/// lock must acquire it first.
pub struct BetLedger {
    bets: DashMap<BetId, Arc<Mutex<Bet>>>,
    by_round: DashMap<RoundId, Vec<BetId>>,
    archive: Mutex<LruCache<BetId, Bet>>,
    next_id: AtomicU64,
}

impl BetLedger {
    pub fn new(archive_capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(archive_capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            bets: DashMap::new(),
            by_round: DashMap::new(),
            archive: Mutex::new(LruCache::new(capacity)),
            next_id: AtomicU64::new(1),
        }
    }

    fn entry(&self, bet_id: BetId) -> Option<Arc<Mutex<Bet>>> {
        self.bets.get(&bet_id).map(|e| e.value().clone())
    }

    fn round_entries(&self, round_id: RoundId) -> Vec<Arc<Mutex<Bet>>> {
        let ids = match self.by_round.get(&round_id) {
            Some(ids) => ids.clone(),
            None => return Vec::new(),
        };
        ids.into_iter().filter_map(|id| self.entry(id)).collect()
    }

    /// Admit a new bet in the `Reserved` state. Must run under the round read lock.
    pub fn reserve(&self, round_id: RoundId, account_id: AccountId, stake: Amount) -> Bet {
        let id = BetId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let bet = Bet::new(id, round_id, account_id, stake);
        self.bets.insert(id, Arc::new(Mutex::new(bet.clone())));
        self.by_round.entry(round_id).or_default().push(id);
        bet
    }

    /// `Reserved -> Pending` once the debit has landed
    pub fn confirm(&self, bet_id: BetId) -> EngineResult<Bet> {
        let entry = self.entry(bet_id).ok_or(EngineError::BetNotFound { bet_id })?;
        let mut bet = lock(&entry);
        match bet.status {
            BetStatus::Reserved => {
                bet.transition(BetStatus::Pending);
                Ok(bet.clone())
            }
            BetStatus::Voided { .. } => Err(EngineError::RoundNotAcceptingBets {
                round_id: bet.round_id,
            }),
            _ => Err(EngineError::BetAlreadyResolved { bet_id }),
        }
    }

    /// Void a reservation whose debit never took effect (or was reversed)
    pub fn discard(&self, bet_id: BetId, refunded: bool) {
        if let Some(entry) = self.entry(bet_id) {
            let mut bet = lock(&entry);
            if matches!(bet.status, BetStatus::Reserved | BetStatus::Voided { .. }) {
                bet.transition(BetStatus::Voided { refunded });
            }
        }
    }

    /// Close betting for `round_id`: every in-flight reservation is voided.
    /// Must run inside the `Betting -> Flying` transition.
    pub fn close_book(&self, round_id: RoundId) -> usize {
        let mut voided = 0;
        for entry in self.round_entries(round_id) {
            let mut bet = lock(&entry);
            if bet.status == BetStatus::Reserved {
                bet.transition(BetStatus::Voided { refunded: false });
                voided += 1;
            }
        }
        voided
    }

    /// Force every unclaimed bet of `round_id` to `Lost`.
    /// Must run inside the `Flying -> Crashed` transition.
    pub fn force_lost(&self, round_id: RoundId) -> usize {
        let mut lost = 0;
        for entry in self.round_entries(round_id) {
            let mut bet = lock(&entry);
            if bet.status == BetStatus::Pending {
                bet.transition(BetStatus::Lost);
                lost += 1;
            }
        }
        lost
    }

    /// Claim a bet for cash-out.
    ///
    /// A `Pending` bet is claimed at the multiplier returned by `live`, which
    /// is handed the bet's round and must read the live round state. A bet
    /// whose credit is owed is re-claimed at its locked multiplier and `live`
    /// is not consulted. A bet lost to the crash reports the crash.
    pub fn claim_cash_out<F>(
        &self,
        bet_id: BetId,
        account_id: &str,
        live: F,
    ) -> EngineResult<CashOutClaim>
    where
        F: FnOnce(RoundId) -> EngineResult<Multiplier>,
    {
        let entry = self.entry(bet_id).ok_or(EngineError::BetNotFound { bet_id })?;
        let mut bet = lock(&entry);
        if bet.account_id != account_id {
            return Err(EngineError::BetNotFound { bet_id });
        }

        let (multiplier, retry) = match bet.status {
            BetStatus::Pending => (live(bet.round_id)?, false),
            BetStatus::CreditOwed { multiplier } => (multiplier, true),
            BetStatus::Reserved => {
                return Err(EngineError::RoundNotAcceptingBets {
                    round_id: bet.round_id,
                })
            }
            BetStatus::Lost => {
                return Err(EngineError::RoundAlreadyCrashed {
                    round_id: bet.round_id,
                })
            }
            _ => return Err(EngineError::BetAlreadyResolved { bet_id }),
        };

        bet.transition(BetStatus::Settling { multiplier });
        Ok(CashOutClaim {
            bet: bet.clone(),
            multiplier,
            retry,
        })
    }

    /// Claim an owed credit for a background retry
    pub fn claim_owed_credit(&self, bet_id: BetId) -> Option<Bet> {
        let entry = self.entry(bet_id)?;
        let mut bet = lock(&entry);
        match bet.status {
            BetStatus::CreditOwed { multiplier } => {
                bet.transition(BetStatus::Settling { multiplier });
                Some(bet.clone())
            }
            _ => None,
        }
    }

    /// `Settling -> WonAt` after the credit landed
    pub fn complete_credit(&self, bet_id: BetId) -> Option<Bet> {
        let entry = self.entry(bet_id)?;
        let mut bet = lock(&entry);
        match bet.status {
            BetStatus::Settling { multiplier } => {
                bet.transition(BetStatus::WonAt { multiplier });
                Some(bet.clone())
            }
            _ => None,
        }
    }

    /// `Settling -> CreditOwed` after the credit failed
    pub fn credit_failed(&self, bet_id: BetId) {
        if let Some(entry) = self.entry(bet_id) {
            let mut bet = lock(&entry);
            if let BetStatus::Settling { multiplier } = bet.status {
                bet.transition(BetStatus::CreditOwed { multiplier });
            }
        }
    }

    pub fn mark_refunded(&self, bet_id: BetId) {
        if let Some(entry) = self.entry(bet_id) {
            let mut bet = lock(&entry);
            if bet.status == (BetStatus::Voided { refunded: false }) {
                bet.transition(BetStatus::Voided { refunded: true });
            }
        }
    }

    /// Look up a live or recently archived bet
    pub fn get(&self, bet_id: BetId) -> Option<Bet> {
        if let Some(entry) = self.entry(bet_id) {
            return Some(lock(&entry).clone());
        }
        self.archive
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&bet_id)
            .cloned()
    }

    fn collect_where(&self, predicate: impl Fn(&BetStatus) -> bool) -> Vec<Bet> {
        let entries: Vec<_> = self.bets.iter().map(|e| e.value().clone()).collect();
        entries
            .iter()
            .filter_map(|entry| {
                let bet = lock(entry);
                predicate(&bet.status).then(|| bet.clone())
            })
            .collect()
    }

    pub fn owed_credits(&self) -> Vec<Bet> {
        self.collect_where(|s| matches!(s, BetStatus::CreditOwed { .. }))
    }

    /// Voided reservations whose debit may still need reversing
    pub fn unrefunded(&self) -> Vec<Bet> {
        self.collect_where(|s| *s == BetStatus::Voided { refunded: false })
    }

    pub fn bets_for_round(&self, round_id: RoundId) -> Vec<Bet> {
        self.round_entries(round_id)
            .iter()
            .map(|entry| lock(entry).clone())
            .collect()
    }

    pub fn live_count(&self) -> usize {
        self.bets.len()
    }

    /// Move fully settled rounds older than `current` into the archive.
    pub fn archive_settled(&self, current: RoundId) -> Vec<RoundSettlement> {
        let rounds: Vec<RoundId> = self
            .by_round
            .iter()
            .map(|e| *e.key())
            .filter(|id| *id < current)
            .collect();

        let mut summaries = Vec::new();
        for round_id in rounds {
            let bets = self.bets_for_round(round_id);
            if !bets.iter().all(|b| b.status.is_terminal()) {
                continue;
            }

            let mut summary = RoundSettlement {
                round_id: Some(round_id),
                bets: bets.len(),
                ..Default::default()
            };
            for bet in &bets {
                match bet.status {
                    BetStatus::WonAt { .. } => {
                        summary.won += 1;
                        summary.staked += bet.stake;
                        summary.credited += bet.payout().unwrap_or(0);
                    }
                    BetStatus::Lost => {
                        summary.lost += 1;
                        summary.staked += bet.stake;
                    }
                    _ => summary.voided += 1,
                }
            }

            self.by_round.remove(&round_id);
            let mut archive = self.archive.lock().unwrap_or_else(PoisonError::into_inner);
            for bet in bets {
                let id = bet.id;
                archive.put(id, bet);
                self.bets.remove(&id);
            }
            summaries.push(summary);
        }
        summaries
    }
}

impl Default for BetLedger {
    fn default() -> Self {
        Self::new(10_000)
    }
}
