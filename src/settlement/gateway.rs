//! Settlement gateway
//!
//! The engine's only view of the external wallet. Every operation carries the
//! bet id it settles and must be idempotent per `(bet, operation)`, so a call
//! retried after a timeout can never move money twice.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard, PoisonError},
};
use tracing::debug;

use crate::errors::SettlementError;
use crate::ledger::{AccountId, Amount, BetId};

/// Wallet collaborator interface
#[async_trait]
pub trait SettlementGateway: Send + Sync {
    /// Withdraw a stake. Returns the new balance.
    async fn debit(&self, account: &str, amount: Amount, bet_id: BetId) -> Result<Amount, SettlementError>;

    /// Pay out a win. Returns the new balance.
    async fn credit(&self, account: &str, amount: Amount, bet_id: BetId) -> Result<Amount, SettlementError>;

    /// Undo the debit recorded for `bet_id`, if any. A debit that arrives
    /// after its reversal must be refused.
    async fn reverse_debit(&self, account: &str, bet_id: BetId) -> Result<Amount, SettlementError>;

    async fn balance(&self, account: &str) -> Result<Amount, SettlementError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SettlementOp {
    Debit,
    Credit,
    Reversal,
}

/// One applied balance movement
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JournalEntry {
    pub bet_id: BetId,
    pub account_id: AccountId,
    pub op: SettlementOp,
    pub amount: Amount,
    pub balance_after: Amount,
    pub at: DateTime<Utc>,
}

#[derive(Default)]
struct WalletState {
    balances: HashMap<AccountId, Amount>,
    applied: HashMap<(BetId, SettlementOp), Amount>,
    journal: Vec<JournalEntry>,
}

impl WalletState {
    fn balance_of(&self, account: &str) -> Result<Amount, SettlementError> {
        self.balances
            .get(account)
            .copied()
            .ok_or_else(|| SettlementError::UnknownAccount(account.to_string()))
    }

    fn apply(&mut self, account: &str, bet_id: BetId, op: SettlementOp, amount: Amount, balance: Amount) {
        self.balances.insert(account.to_string(), balance);
        self.applied.insert((bet_id, op), amount);
        self.journal.push(JournalEntry {
            bet_id,
            account_id: account.to_string(),
            op,
            amount,
            balance_after: balance,
            at: Utc::now(),
        });
    }
}

/// Process-local wallet used for standalone runs and tests
#[derive(Default)]
pub struct InMemoryWallet {
    state: Mutex<WalletState>,
}

impl InMemoryWallet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_accounts<I, S>(accounts: I) -> Self
    where
        I: IntoIterator<Item = (S, Amount)>,
        S: Into<AccountId>,
    {
        let wallet = Self::new();
        for (account, balance) in accounts {
            wallet.open_account(account, balance);
        }
        wallet
    }

    fn state(&self) -> MutexGuard<'_, WalletState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create or reset an account
    pub fn open_account(&self, account: impl Into<AccountId>, balance: Amount) {
        self.state().balances.insert(account.into(), balance);
    }

    /// Sum of applied movements of one kind
    pub fn total(&self, op: SettlementOp) -> Amount {
        self.state()
            .journal
            .iter()
            .filter(|e| e.op == op)
            .map(|e| e.amount)
            .sum()
    }

    /// Credits applied for one bet
    pub fn credited_for(&self, bet_id: BetId) -> Amount {
        self.state()
            .journal
            .iter()
            .filter(|e| e.op == SettlementOp::Credit && e.bet_id == bet_id)
            .map(|e| e.amount)
            .sum()
    }
}

#[async_trait]
impl SettlementGateway for InMemoryWallet {
    async fn debit(&self, account: &str, amount: Amount, bet_id: BetId) -> Result<Amount, SettlementError> {
        let mut state = self.state();
        let balance = state.balance_of(account)?;

        if state.applied.contains_key(&(bet_id, SettlementOp::Debit)) {
            return Ok(balance);
        }
        if state.applied.contains_key(&(bet_id, SettlementOp::Reversal)) {
            return Err(SettlementError::Unavailable(format!(
                "bet {} was already reversed",
                bet_id
            )));
        }
        if balance < amount {
            return Err(SettlementError::InsufficientFunds {
                balance,
                requested: amount,
            });
        }

        let new_balance = balance - amount;
        state.apply(account, bet_id, SettlementOp::Debit, amount, new_balance);
        debug!(account, bet_id = %bet_id, amount, new_balance, "Debit applied");
        Ok(new_balance)
    }

    async fn credit(&self, account: &str, amount: Amount, bet_id: BetId) -> Result<Amount, SettlementError> {
        let mut state = self.state();
        let balance = state.balance_of(account)?;

        if state.applied.contains_key(&(bet_id, SettlementOp::Credit)) {
            return Ok(balance);
        }

        let new_balance = balance
            .checked_add(amount)
            .ok_or_else(|| SettlementError::Unavailable("balance overflow".to_string()))?;
        state.apply(account, bet_id, SettlementOp::Credit, amount, new_balance);
        debug!(account, bet_id = %bet_id, amount, new_balance, "Credit applied");
        Ok(new_balance)
    }

    async fn reverse_debit(&self, account: &str, bet_id: BetId) -> Result<Amount, SettlementError> {
        let mut state = self.state();
        let balance = state.balance_of(account)?;

        if state.applied.contains_key(&(bet_id, SettlementOp::Reversal)) {
            return Ok(balance);
        }

        match state.applied.get(&(bet_id, SettlementOp::Debit)).copied() {
            Some(amount) => {
                let new_balance = balance.saturating_add(amount);
                state.apply(account, bet_id, SettlementOp::Reversal, amount, new_balance);
                debug!(account, bet_id = %bet_id, amount, new_balance, "Debit reversed");
                Ok(new_balance)
            }
            None => {
                // Tombstone so a late debit for this bet is refused
                state.applied.insert((bet_id, SettlementOp::Reversal), 0);
                Ok(balance)
            }
        }
    }

    async fn balance(&self, account: &str) -> Result<Amount, SettlementError> {
        self.state().balance_of(account)
    }
}
