//! Round state machine
//!
//! The canonical round lives behind one reader/writer lock. The clock is the
//! only caller of [`RoundStateMachine::advance`]; every other component reads
//! through [`RoundStateMachine::read`], which evaluates the round at the
//! instant the lock was acquired.
//!
//! The guard is never exposed, so no lock can be held across an `.await`.

use chrono::Utc;
use std::{
    collections::VecDeque,
    sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard},
    time::Duration,
};
use tokio::time::Instant;
use tracing::{debug, info};

use super::curve::MultiplierCurve;
use super::events::RoundEvent;
use super::types::{Multiplier, RoundId, RoundPhase, RoundReveal, RoundSnapshot};
use crate::errors::EngineResult;
use crate::fairness::{FairnessParams, FairnessSource, ServerSeed};
use crate::ledger::BetLedger;

/// Phase durations
#[derive(Debug, Clone, Copy)]
pub struct RoundTimings {
    pub betting: Duration,
    pub cooldown: Duration,
}

impl Default for RoundTimings {
    fn default() -> Self {
        Self {
            betting: Duration::from_secs(5),
            cooldown: Duration::from_secs(3),
        }
    }
}

struct Round {
    id: RoundId,
    phase: RoundPhase,
    seed: ServerSeed,
    seed_hash: String,
    crash_point: Multiplier,
    /// End of betting and start of flight
    launch_at: Instant,
    next_round_at: Option<Instant>,
    current: Multiplier,
    last_countdown: u64,
}

struct Inner {
    round: Round,
    history: VecDeque<RoundReveal>,
}

/// Phase of a round as observed at a specific instant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiveRead {
    Betting { remaining: Duration },
    Flying { multiplier: Multiplier, elapsed: Duration },
    Crashed,
}

impl LiveRead {
    pub fn phase(&self) -> RoundPhase {
        match self {
            LiveRead::Betting { .. } => RoundPhase::Betting,
            LiveRead::Flying { .. } => RoundPhase::Flying,
            LiveRead::Crashed => RoundPhase::Crashed,
        }
    }
}

/// Read-only view of the current round at one instant
pub struct RoundView<'a> {
    round: &'a Round,
    curve: &'a MultiplierCurve,
    now: Instant,
}

impl RoundView<'_> {
    pub fn id(&self) -> RoundId {
        self.round.id
    }

    /// Last phase committed by the clock
    pub fn committed_phase(&self) -> RoundPhase {
        self.round.phase
    }

    pub fn now(&self) -> Instant {
        self.now
    }

    /// Evaluate the round at this view's instant.
    ///
    /// Flight begins exactly at the betting deadline, and a round whose
    /// recomputed multiplier has reached the crash point reads as crashed even
    /// before the clock commits the transition.
    pub fn live(&self) -> EngineResult<LiveRead> {
        let round = self.round;
        match round.phase {
            RoundPhase::Crashed => Ok(LiveRead::Crashed),
            RoundPhase::Betting if self.now < round.launch_at => Ok(LiveRead::Betting {
                remaining: round.launch_at - self.now,
            }),
            RoundPhase::Betting | RoundPhase::Flying => {
                let elapsed = self.now.saturating_duration_since(round.launch_at);
                let sample = self.curve.multiplier_at(elapsed)?;
                if sample >= round.crash_point {
                    Ok(LiveRead::Crashed)
                } else {
                    Ok(LiveRead::Flying {
                        multiplier: sample.max(round.current),
                        elapsed,
                    })
                }
            }
        }
    }

    /// Public snapshot. The seed is only revealed once the crash is committed.
    pub fn snapshot(&self) -> EngineResult<RoundSnapshot> {
        let round = self.round;
        let mut snapshot = RoundSnapshot {
            round_id: round.id,
            phase: round.phase,
            server_seed_hash: round.seed_hash.clone(),
            multiplier: Multiplier::ONE,
            countdown_ms: None,
            elapsed_ms: None,
            crash_point: None,
            server_seed: None,
        };

        match self.live()? {
            LiveRead::Betting { remaining } => {
                snapshot.phase = RoundPhase::Betting;
                snapshot.countdown_ms = Some(remaining.as_millis() as u64);
            }
            LiveRead::Flying {
                multiplier,
                elapsed,
            } => {
                snapshot.phase = RoundPhase::Flying;
                snapshot.multiplier = multiplier;
                snapshot.elapsed_ms = Some(elapsed.as_millis() as u64);
            }
            LiveRead::Crashed => {
                snapshot.phase = RoundPhase::Crashed;
                snapshot.multiplier = round.crash_point;
                snapshot.crash_point = Some(round.crash_point);
                if round.phase == RoundPhase::Crashed {
                    snapshot.server_seed = Some(round.seed.to_hex());
                }
            }
        }
        Ok(snapshot)
    }
}

fn whole_seconds_remaining(remaining: Duration) -> u64 {
    (remaining.as_millis() as u64 + 999) / 1000
}

/// Single owner of the canonical round and the revealed-round history
pub struct RoundStateMachine {
    inner: RwLock<Inner>,
    fairness: FairnessSource,
    curve: MultiplierCurve,
    timings: RoundTimings,
    history_capacity: usize,
    ledger: Arc<BetLedger>,
}

impl RoundStateMachine {
    /// Create the machine with round 1 open for betting from `now`.
    pub fn new(
        fairness: FairnessSource,
        curve: MultiplierCurve,
        timings: RoundTimings,
        history_capacity: usize,
        ledger: Arc<BetLedger>,
        now: Instant,
    ) -> Self {
        let first = Self::open_round(&fairness, &timings, RoundId(1), now);
        Self {
            inner: RwLock::new(Inner {
                round: first,
                history: VecDeque::with_capacity(history_capacity),
            }),
            fairness,
            curve,
            timings,
            history_capacity: history_capacity.max(1),
            ledger,
        }
    }

    fn open_round(
        fairness: &FairnessSource,
        timings: &RoundTimings,
        id: RoundId,
        now: Instant,
    ) -> Round {
        let commitment = fairness.commit(id);
        info!(
            round_id = %id,
            server_seed_hash = %commitment.seed_hash,
            "🎲 Round opened for betting"
        );
        Round {
            id,
            phase: RoundPhase::Betting,
            seed: commitment.seed,
            seed_hash: commitment.seed_hash,
            crash_point: commitment.crash_point,
            launch_at: now + timings.betting,
            next_round_at: None,
            current: Multiplier::ONE,
            last_countdown: whole_seconds_remaining(timings.betting),
        }
    }

    fn read_guard(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_guard(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` against the current round under the read lock.
    ///
    /// The view's instant is taken after the lock is acquired, so the read
    /// is ordered against every committed transition.
    pub fn read<R>(&self, f: impl FnOnce(&RoundView<'_>) -> R) -> R {
        let guard = self.read_guard();
        let view = RoundView {
            round: &guard.round,
            curve: &self.curve,
            now: Instant::now(),
        };
        f(&view)
    }

    #[cfg(test)]
    pub(crate) fn read_at<R>(&self, now: Instant, f: impl FnOnce(&RoundView<'_>) -> R) -> R {
        let guard = self.read_guard();
        let view = RoundView {
            round: &guard.round,
            curve: &self.curve,
            now,
        };
        f(&view)
    }

    /// The `RoundOpened` event for the current round, if it is still betting
    pub fn opening_event(&self) -> Option<RoundEvent> {
        let guard = self.read_guard();
        let round = &guard.round;
        (round.phase == RoundPhase::Betting).then(|| RoundEvent::RoundOpened {
            round_id: round.id,
            server_seed_hash: round.seed_hash.clone(),
            countdown_seconds: round.last_countdown,
        })
    }

    /// Advance the round to `now`, committing every due transition.
    ///
    /// Returns the committed events in order. A failure to sample the curve
    /// leaves the round untouched and is fatal to the caller.
    pub fn advance(&self, now: Instant) -> EngineResult<Vec<RoundEvent>> {
        let mut guard = self.write_guard();
        let inner = &mut *guard;
        let mut events = Vec::new();

        match inner.round.phase {
            RoundPhase::Betting => {
                if now < inner.round.launch_at {
                    let seconds = whole_seconds_remaining(inner.round.launch_at - now);
                    if seconds < inner.round.last_countdown {
                        inner.round.last_countdown = seconds;
                        events.push(RoundEvent::Countdown {
                            round_id: inner.round.id,
                            seconds,
                        });
                    }
                    return Ok(events);
                }

                let elapsed = now - inner.round.launch_at;
                let sample = self.curve.multiplier_at(elapsed)?;
                self.launch(&mut inner.round, &mut events);
                self.apply_sample(inner, sample, elapsed, now, &mut events);
            }
            RoundPhase::Flying => {
                let elapsed = now.saturating_duration_since(inner.round.launch_at);
                let sample = self.curve.multiplier_at(elapsed)?;
                self.apply_sample(inner, sample, elapsed, now, &mut events);
            }
            RoundPhase::Crashed => {
                let due = inner.round.next_round_at.map_or(true, |at| now >= at);
                if due {
                    let id = inner.round.id.next();
                    inner.round = Self::open_round(&self.fairness, &self.timings, id, now);
                    events.push(RoundEvent::RoundOpened {
                        round_id: id,
                        server_seed_hash: inner.round.seed_hash.clone(),
                        countdown_seconds: inner.round.last_countdown,
                    });
                }
            }
        }

        Ok(events)
    }

    fn launch(&self, round: &mut Round, events: &mut Vec<RoundEvent>) {
        round.phase = RoundPhase::Flying;
        round.current = Multiplier::ONE;
        let voided = self.ledger.close_book(round.id);
        info!(round_id = %round.id, voided_reservations = voided, "🚀 Round launched");
        events.push(RoundEvent::Launched { round_id: round.id });
    }

    fn apply_sample(
        &self,
        inner: &mut Inner,
        sample: Multiplier,
        elapsed: Duration,
        now: Instant,
        events: &mut Vec<RoundEvent>,
    ) {
        let round = &mut inner.round;
        if sample < round.crash_point {
            round.current = round.current.max(sample);
            events.push(RoundEvent::Tick {
                round_id: round.id,
                multiplier: round.current,
                elapsed_ms: elapsed.as_millis() as u64,
            });
            return;
        }

        round.phase = RoundPhase::Crashed;
        round.current = round.crash_point;
        round.next_round_at = Some(now + self.timings.cooldown);
        let lost = self.ledger.force_lost(round.id);

        let reveal = RoundReveal {
            round_id: round.id,
            server_seed: round.seed.to_hex(),
            server_seed_hash: round.seed_hash.clone(),
            crash_point: round.crash_point,
            crashed_at: Utc::now(),
        };
        info!(
            round_id = %round.id,
            crash_point = %round.crash_point,
            elapsed_ms = elapsed.as_millis() as u64,
            lost_bets = lost,
            "💥 Round crashed"
        );
        events.push(RoundEvent::RoundCrashed {
            round_id: round.id,
            crash_point: round.crash_point,
            server_seed: reveal.server_seed.clone(),
            server_seed_hash: reveal.server_seed_hash.clone(),
        });

        inner.history.push_front(reveal);
        inner.history.truncate(self.history_capacity);
        debug!(history_len = inner.history.len(), "Round history updated");
    }

    /// Live snapshot of the current round
    pub fn snapshot(&self) -> EngineResult<RoundSnapshot> {
        self.read(|view| view.snapshot())
    }

    pub fn current_round_id(&self) -> RoundId {
        self.read_guard().round.id
    }

    /// Most recent revealed rounds, newest first
    pub fn history(&self, limit: usize) -> Vec<RoundReveal> {
        self.read_guard()
            .history
            .iter()
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn reveal(&self, round_id: RoundId) -> Option<RoundReveal> {
        self.read_guard()
            .history
            .iter()
            .find(|r| r.round_id == round_id)
            .cloned()
    }

    pub fn fairness_params(&self) -> &FairnessParams {
        self.fairness.params()
    }

    pub fn curve(&self) -> &MultiplierCurve {
        &self.curve
    }

    pub fn timings(&self) -> &RoundTimings {
        &self.timings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::EngineError;
    use crate::fairness::{self, SeedGenerator};
    use crate::ledger::BetStatus;
    use std::sync::Mutex;

    struct ScriptedSeeds(Mutex<VecDeque<ServerSeed>>);

    impl SeedGenerator for ScriptedSeeds {
        fn next_seed(&self) -> ServerSeed {
            self.0
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(ServerSeed::generate)
        }
    }

    fn seed_for(round: RoundId, want: impl Fn(Multiplier) -> bool) -> ServerSeed {
        let params = FairnessParams::default();
        (0u64..)
            .map(|n| {
                let mut bytes = [0u8; 32];
                bytes[..8].copy_from_slice(&n.to_le_bytes());
                ServerSeed::from_bytes(bytes)
            })
            .find(|seed| want(fairness::crash_point(seed, round, &params)))
            .unwrap()
    }

    fn build_machine(seeds: Vec<ServerSeed>, history: usize, now: Instant) -> (RoundStateMachine, Arc<BetLedger>) {
        let ledger = Arc::new(BetLedger::default());
        let source = FairnessSource::with_generator(
            FairnessParams::default(),
            Box::new(ScriptedSeeds(Mutex::new(seeds.into()))),
        );
        let machine = RoundStateMachine::new(
            source,
            MultiplierCurve::default(),
            RoundTimings::default(),
            history,
            ledger.clone(),
            now,
        );
        (machine, ledger)
    }

    fn run_until_crash(machine: &RoundStateMachine, mut now: Instant) -> (Vec<RoundEvent>, Instant) {
        let mut events = Vec::new();
        loop {
            let step = machine.advance(now).unwrap();
            let crashed = step
                .iter()
                .any(|e| matches!(e, RoundEvent::RoundCrashed { .. }));
            events.extend(step);
            if crashed {
                return (events, now);
            }
            now += Duration::from_millis(100);
        }
    }

    fn m(h: u64) -> Multiplier {
        Multiplier::from_hundredths(h)
    }

    #[test]
    fn test_opens_betting_with_hidden_crash_point() {
        let start = Instant::now();
        let (machine, _) = build_machine(vec![], 10, start);

        let snapshot = machine.read_at(start, |v| v.snapshot()).unwrap();
        assert_eq!(snapshot.round_id, RoundId(1));
        assert_eq!(snapshot.phase, RoundPhase::Betting);
        assert_eq!(snapshot.server_seed_hash.len(), 64);
        assert_eq!(snapshot.countdown_ms, Some(5_000));
        assert!(snapshot.crash_point.is_none());
        assert!(snapshot.server_seed.is_none());

        match machine.opening_event() {
            Some(RoundEvent::RoundOpened {
                countdown_seconds, ..
            }) => assert_eq!(countdown_seconds, 5),
            other => panic!("unexpected opening event {:?}", other),
        }
    }

    #[test]
    fn test_countdown_emitted_once_per_second() {
        let start = Instant::now();
        let (machine, _) = build_machine(vec![], 10, start);

        assert!(machine.advance(start + Duration::from_millis(500)).unwrap().is_empty());
        assert_eq!(
            machine.advance(start + Duration::from_secs(1)).unwrap(),
            vec![RoundEvent::Countdown {
                round_id: RoundId(1),
                seconds: 4
            }]
        );
        assert!(machine.advance(start + Duration::from_millis(1_500)).unwrap().is_empty());

        let seconds: Vec<u64> = (2..5)
            .flat_map(|s| machine.advance(start + Duration::from_secs(s)).unwrap())
            .filter_map(|e| match e {
                RoundEvent::Countdown { seconds, .. } => Some(seconds),
                _ => None,
            })
            .collect();
        assert_eq!(seconds, vec![3, 2, 1]);
    }

    #[test]
    fn test_flight_crashes_at_first_sample_past_crash_point() {
        let start = Instant::now();
        let seed = seed_for(RoundId(1), |cp| cp == m(200));
        let (machine, _) = build_machine(vec![seed], 10, start);
        let launch = start + Duration::from_secs(5);

        let (events, crashed_at) = run_until_crash(&machine, launch);
        assert_eq!(events[0], RoundEvent::Launched { round_id: RoundId(1) });

        let mut last = Multiplier::ONE;
        for event in &events[1..events.len() - 1] {
            match event {
                RoundEvent::Tick { multiplier, .. } => {
                    assert!(*multiplier >= last);
                    assert!(*multiplier < m(200));
                    last = *multiplier;
                }
                other => panic!("unexpected event {:?}", other),
            }
        }

        match events.last() {
            Some(RoundEvent::RoundCrashed { crash_point, .. }) => assert_eq!(*crash_point, m(200)),
            other => panic!("expected crash, got {:?}", other),
        }

        let flight = (crashed_at - launch).as_secs_f64();
        assert!(flight > 11.8 && flight < 11.95, "crashed after {}s", flight);

        let snapshot = machine.read_at(crashed_at, |v| v.snapshot()).unwrap();
        assert_eq!(snapshot.phase, RoundPhase::Crashed);
        assert_eq!(snapshot.multiplier, m(200));
        assert!(snapshot.server_seed.is_some());
    }

    #[test]
    fn test_five_second_read_observes_1_34() {
        let start = Instant::now();
        let seed = seed_for(RoundId(1), |cp| cp == m(200));
        let (machine, _) = build_machine(vec![seed], 10, start);
        let launch = start + Duration::from_secs(5);
        machine.advance(launch).unwrap();

        let live = machine
            .read_at(launch + Duration::from_secs(5), |v| v.live())
            .unwrap();
        assert_eq!(
            live,
            LiveRead::Flying {
                multiplier: m(134),
                elapsed: Duration::from_secs(5)
            }
        );
    }

    #[test]
    fn test_reader_sees_crash_before_clock_commits() {
        let start = Instant::now();
        let seed = seed_for(RoundId(1), |cp| cp == m(200));
        let (machine, _) = build_machine(vec![seed], 10, start);
        let launch = start + Duration::from_secs(5);
        machine.advance(launch).unwrap();

        let late = launch + Duration::from_secs(12);
        machine.read_at(late, |v| {
            assert_eq!(v.committed_phase(), RoundPhase::Flying);
            assert_eq!(v.live().unwrap(), LiveRead::Crashed);
        });
    }

    #[test]
    fn test_instant_crash_round() {
        let start = Instant::now();
        let seed = seed_for(RoundId(1), |cp| cp == Multiplier::ONE);
        let (machine, _) = build_machine(vec![seed], 10, start);

        let events = machine.advance(start + Duration::from_secs(5)).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0], RoundEvent::Launched { round_id: RoundId(1) });
        assert!(matches!(
            events[1],
            RoundEvent::RoundCrashed { crash_point, .. } if crash_point == Multiplier::ONE
        ));
    }

    #[test]
    fn test_transitions_settle_the_book() {
        let start = Instant::now();
        let seed = seed_for(RoundId(1), |cp| cp >= m(150));
        let (machine, ledger) = build_machine(vec![seed], 10, start);

        let accepted = ledger.reserve(RoundId(1), "alice".to_string(), 100);
        ledger.confirm(accepted.id).unwrap();
        let in_flight = ledger.reserve(RoundId(1), "bob".to_string(), 100);

        machine.advance(start + Duration::from_secs(5)).unwrap();
        assert_eq!(
            ledger.get(in_flight.id).unwrap().status,
            BetStatus::Voided { refunded: false }
        );
        assert_eq!(ledger.get(accepted.id).unwrap().status, BetStatus::Pending);

        run_until_crash(&machine, start + Duration::from_secs(5));
        assert_eq!(ledger.get(accepted.id).unwrap().status, BetStatus::Lost);
    }

    #[test]
    fn test_next_round_opens_after_cooldown() {
        let start = Instant::now();
        let (machine, _) = build_machine(vec![], 10, start);

        let (events, crashed_at) = run_until_crash(&machine, start + Duration::from_secs(5));
        let first_hash = match events.last() {
            Some(RoundEvent::RoundCrashed {
                server_seed_hash, ..
            }) => server_seed_hash.clone(),
            other => panic!("expected crash, got {:?}", other),
        };

        assert!(machine
            .advance(crashed_at + Duration::from_millis(2_900))
            .unwrap()
            .is_empty());

        let events = machine.advance(crashed_at + Duration::from_secs(3)).unwrap();
        match &events[..] {
            [RoundEvent::RoundOpened {
                round_id,
                server_seed_hash,
                countdown_seconds,
            }] => {
                assert_eq!(*round_id, RoundId(2));
                assert_ne!(*server_seed_hash, first_hash);
                assert_eq!(*countdown_seconds, 5);
            }
            other => panic!("expected round opened, got {:?}", other),
        }
        assert_eq!(machine.current_round_id(), RoundId(2));
    }

    #[test]
    fn test_reveals_verify_and_history_is_bounded() {
        let mut now = Instant::now();
        let (machine, _) = build_machine(vec![], 2, now);

        for _ in 0..3 {
            let (_, crashed_at) = run_until_crash(&machine, now + Duration::from_secs(5));
            now = crashed_at + Duration::from_secs(3);
            machine.advance(now).unwrap();
        }

        let history = machine.history(10);
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].round_id, RoundId(3));
        assert_eq!(history[1].round_id, RoundId(2));
        assert!(machine.reveal(RoundId(1)).is_none());

        for reveal in history {
            let report = fairness::verify(
                &reveal.server_seed,
                reveal.round_id,
                &reveal.server_seed_hash,
                reveal.crash_point,
                machine.fairness_params(),
            )
            .unwrap();
            assert!(report.is_valid());
        }
    }

    #[test]
    fn test_clock_fault_leaves_round_untouched() {
        let start = Instant::now();
        let ledger = Arc::new(BetLedger::default());
        let machine = RoundStateMachine::new(
            FairnessSource::new(FairnessParams::default()),
            MultiplierCurve::new(f64::NAN),
            RoundTimings::default(),
            10,
            ledger,
            start,
        );

        let err = machine.advance(start + Duration::from_secs(5)).unwrap_err();
        assert!(matches!(err, EngineError::ClockFault(_)));
        machine.read_at(start, |v| assert_eq!(v.committed_phase(), RoundPhase::Betting));
    }
}
