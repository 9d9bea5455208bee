//! Engine metrics
//!
//! Plain atomic counters rendered in the Prometheus text exposition format.

use serde::{Deserialize, Serialize};
use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::ledger::RoundSettlement;
use crate::round::{Multiplier, RoundEvent};

/// Prometheus-compatible counters for the round engine
#[derive(Debug, Default)]
pub struct EngineMetrics {
    /// Round lifecycle
    pub rounds_started_total: AtomicU64,
    pub rounds_crashed_total: AtomicU64,
    pub current_round_id: AtomicU64,
    pub current_multiplier_hundredths: AtomicU64,
    pub last_crash_point_hundredths: AtomicU64,

    /// Bets
    pub bets_placed_total: AtomicU64,
    pub bets_rejected_total: AtomicU64,
    pub bets_voided_total: AtomicU64,
    pub stake_placed_total: AtomicU64,
    pub cash_outs_total: AtomicU64,
    pub cash_outs_rejected_total: AtomicU64,
    pub payouts_total: AtomicU64,

    /// Settlement
    pub settlement_failures_total: AtomicU64,
    pub credit_retries_total: AtomicU64,
    pub debit_reversals_total: AtomicU64,
    pub rounds_archived_total: AtomicU64,
    pub archived_staked_total: AtomicU64,
    pub archived_credited_total: AtomicU64,

    /// Event feed
    pub feed_events_total: AtomicU64,
    pub websocket_connections_active: AtomicU64,
    pub websocket_messages_sent_total: AtomicU64,
    pub websocket_resyncs_total: AtomicU64,
}

/// Point-in-time copy of the counters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub rounds_crashed: u64,
    pub bets_placed: u64,
    pub cash_outs: u64,
    pub stake_placed: u64,
    pub payouts: u64,
    pub settlement_failures: u64,
    pub websocket_connections: u64,
}

fn inc(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

fn write_metric(out: &mut String, name: &str, help: &str, kind: &str, value: impl std::fmt::Display) {
    let _ = write!(
        out,
        "# HELP crash_engine_{name} {help}\n\
         # TYPE crash_engine_{name} {kind}\n\
         crash_engine_{name} {value}\n\n"
    );
}

impl EngineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a committed round event
    pub fn record_event(&self, event: &RoundEvent) {
        inc(&self.feed_events_total);
        match event {
            RoundEvent::RoundOpened { round_id, .. } => {
                inc(&self.rounds_started_total);
                self.current_round_id.store(round_id.0, Ordering::Relaxed);
                self.current_multiplier_hundredths
                    .store(Multiplier::ONE.hundredths(), Ordering::Relaxed);
            }
            RoundEvent::Tick { multiplier, .. } => {
                self.current_multiplier_hundredths
                    .store(multiplier.hundredths(), Ordering::Relaxed);
            }
            RoundEvent::RoundCrashed { crash_point, .. } => {
                inc(&self.rounds_crashed_total);
                self.current_multiplier_hundredths
                    .store(crash_point.hundredths(), Ordering::Relaxed);
                self.last_crash_point_hundredths
                    .store(crash_point.hundredths(), Ordering::Relaxed);
            }
            RoundEvent::Countdown { .. } | RoundEvent::Launched { .. } => {}
        }
    }

    pub fn record_bet(&self, stake: u64) {
        inc(&self.bets_placed_total);
        self.stake_placed_total.fetch_add(stake, Ordering::Relaxed);
    }

    pub fn record_bet_rejected(&self) {
        inc(&self.bets_rejected_total);
    }

    pub fn record_bet_voided(&self) {
        inc(&self.bets_voided_total);
    }

    pub fn record_cash_out(&self, payout: u64) {
        inc(&self.cash_outs_total);
        self.payouts_total.fetch_add(payout, Ordering::Relaxed);
    }

    pub fn record_cash_out_rejected(&self) {
        inc(&self.cash_outs_rejected_total);
    }

    pub fn record_settlement_failure(&self) {
        inc(&self.settlement_failures_total);
    }

    pub fn record_credit_retry(&self) {
        inc(&self.credit_retries_total);
    }

    pub fn record_reversal(&self) {
        inc(&self.debit_reversals_total);
    }

    pub fn record_archived(&self, settlement: &RoundSettlement) {
        inc(&self.rounds_archived_total);
        self.archived_staked_total
            .fetch_add(settlement.staked, Ordering::Relaxed);
        self.archived_credited_total
            .fetch_add(settlement.credited, Ordering::Relaxed);
    }

    pub fn websocket_connected(&self) {
        inc(&self.websocket_connections_active);
    }

    pub fn websocket_disconnected(&self) {
        let _ = self.websocket_connections_active.fetch_update(
            Ordering::Relaxed,
            Ordering::Relaxed,
            |v| Some(v.saturating_sub(1)),
        );
    }

    pub fn record_websocket_message(&self) {
        inc(&self.websocket_messages_sent_total);
    }

    pub fn record_websocket_resync(&self) {
        inc(&self.websocket_resyncs_total);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            rounds_crashed: self.rounds_crashed_total.load(Ordering::Relaxed),
            bets_placed: self.bets_placed_total.load(Ordering::Relaxed),
            cash_outs: self.cash_outs_total.load(Ordering::Relaxed),
            stake_placed: self.stake_placed_total.load(Ordering::Relaxed),
            payouts: self.payouts_total.load(Ordering::Relaxed),
            settlement_failures: self.settlement_failures_total.load(Ordering::Relaxed),
            websocket_connections: self.websocket_connections_active.load(Ordering::Relaxed),
        }
    }

    /// Render every metric in Prometheus text format
    pub fn to_prometheus_format(&self) -> String {
        let mut out = String::new();
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        let as_multiplier = |c: &AtomicU64| Multiplier::from_hundredths(load(c)).as_f64();

        // Rounds
        write_metric(&mut out, "rounds_started_total", "Rounds opened for betting", "counter", load(&self.rounds_started_total));
        write_metric(&mut out, "rounds_crashed_total", "Rounds that reached their crash point", "counter", load(&self.rounds_crashed_total));
        write_metric(&mut out, "current_round_id", "Identifier of the current round", "gauge", load(&self.current_round_id));
        write_metric(&mut out, "current_multiplier", "Last published multiplier", "gauge", as_multiplier(&self.current_multiplier_hundredths));
        write_metric(&mut out, "last_crash_point", "Crash point of the most recent round", "gauge", as_multiplier(&self.last_crash_point_hundredths));

        // Bets
        write_metric(&mut out, "bets_placed_total", "Accepted bets", "counter", load(&self.bets_placed_total));
        write_metric(&mut out, "bets_rejected_total", "Rejected bet requests", "counter", load(&self.bets_rejected_total));
        write_metric(&mut out, "bets_voided_total", "Reservations voided by the book closing or a failed debit", "counter", load(&self.bets_voided_total));
        write_metric(&mut out, "stake_placed_total", "Total accepted stake in minor units", "counter", load(&self.stake_placed_total));
        write_metric(&mut out, "cash_outs_total", "Successful cash-outs", "counter", load(&self.cash_outs_total));
        write_metric(&mut out, "cash_outs_rejected_total", "Rejected cash-out requests", "counter", load(&self.cash_outs_rejected_total));
        write_metric(&mut out, "payouts_total", "Total credited payouts in minor units", "counter", load(&self.payouts_total));

        // Settlement
        write_metric(&mut out, "settlement_failures_total", "Settlement gateway calls that failed or timed out", "counter", load(&self.settlement_failures_total));
        write_metric(&mut out, "credit_retries_total", "Owed credits completed by the retrier", "counter", load(&self.credit_retries_total));
        write_metric(&mut out, "debit_reversals_total", "Debits reversed for voided bets", "counter", load(&self.debit_reversals_total));
        write_metric(&mut out, "rounds_archived_total", "Fully settled rounds archived", "counter", load(&self.rounds_archived_total));
        write_metric(&mut out, "archived_staked_total", "Stake of archived rounds in minor units", "counter", load(&self.archived_staked_total));
        write_metric(&mut out, "archived_credited_total", "Credits of archived rounds in minor units", "counter", load(&self.archived_credited_total));

        // Feed
        write_metric(&mut out, "feed_events_total", "Round events published", "counter", load(&self.feed_events_total));
        write_metric(&mut out, "websocket_connections_active", "Connected feed observers", "gauge", load(&self.websocket_connections_active));
        write_metric(&mut out, "websocket_messages_sent_total", "Feed messages written to sockets", "counter", load(&self.websocket_messages_sent_total));
        write_metric(&mut out, "websocket_resyncs_total", "Snapshots sent to lagging observers", "counter", load(&self.websocket_resyncs_total));

        out
    }
}
