//! Event feed publisher
//!
//! Committed round events are converted to wire messages and fanned out over
//! a bounded `tokio::sync::broadcast` channel. Publishing never waits on an
//! observer: a receiver that falls behind loses messages and is expected to
//! resynchronise from a snapshot.

use chrono::Utc;
use serde::Serialize;
use std::{
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};
use tokio::{
    sync::{broadcast, watch},
    task::JoinHandle,
    time::{interval, MissedTickBehavior},
};
use tracing::debug;

use crate::round::{Multiplier, RoundEvent, RoundId, RoundPhase, RoundSnapshot};

/// Wire message type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedKind {
    Status,
    Countdown,
    Multiplier,
    Crash,
    Heartbeat,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusPayload {
    pub status: RoundPhase,
    pub round_id: RoundId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_seed_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub countdown_seconds: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub multiplier: Option<Multiplier>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elapsed_ms: Option<u64>,
    /// Set on the snapshot sent to an observer that fell behind
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub resync: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CountdownPayload {
    pub round_id: RoundId,
    pub seconds: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TickPayload {
    pub round_id: RoundId,
    pub multiplier: Multiplier,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CrashPayload {
    pub round_id: RoundId,
    pub crash_point: Multiplier,
    pub server_seed: String,
    pub server_seed_hash: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HeartbeatPayload {
    /// Unix milliseconds
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FeedPayload {
    Status(StatusPayload),
    Countdown(CountdownPayload),
    Tick(TickPayload),
    Crash(CrashPayload),
    Heartbeat(HeartbeatPayload),
}

/// `{ "type", "seq", "payload" }`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeedMessage {
    #[serde(rename = "type")]
    pub kind: FeedKind,
    pub seq: u64,
    pub payload: FeedPayload,
}

impl FeedMessage {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

fn encode(event: &RoundEvent) -> (FeedKind, FeedPayload) {
    match event {
        RoundEvent::RoundOpened {
            round_id,
            server_seed_hash,
            countdown_seconds,
        } => (
            FeedKind::Status,
            FeedPayload::Status(StatusPayload {
                status: RoundPhase::Betting,
                round_id: *round_id,
                server_seed_hash: Some(server_seed_hash.clone()),
                countdown_seconds: Some(*countdown_seconds),
                multiplier: None,
                elapsed_ms: None,
                resync: false,
            }),
        ),
        RoundEvent::Countdown { round_id, seconds } => (
            FeedKind::Countdown,
            FeedPayload::Countdown(CountdownPayload {
                round_id: *round_id,
                seconds: *seconds,
            }),
        ),
        RoundEvent::Launched { round_id } => (
            FeedKind::Status,
            FeedPayload::Status(StatusPayload {
                status: RoundPhase::Flying,
                round_id: *round_id,
                server_seed_hash: None,
                countdown_seconds: None,
                multiplier: None,
                elapsed_ms: None,
                resync: false,
            }),
        ),
        RoundEvent::Tick {
            round_id,
            multiplier,
            elapsed_ms,
        } => (
            FeedKind::Multiplier,
            FeedPayload::Tick(TickPayload {
                round_id: *round_id,
                multiplier: *multiplier,
                elapsed_ms: *elapsed_ms,
            }),
        ),
        RoundEvent::RoundCrashed {
            round_id,
            crash_point,
            server_seed,
            server_seed_hash,
        } => (
            FeedKind::Crash,
            FeedPayload::Crash(CrashPayload {
                round_id: *round_id,
                crash_point: *crash_point,
                server_seed: server_seed.clone(),
                server_seed_hash: server_seed_hash.clone(),
            }),
        ),
    }
}

/// Fan-out of round events to every connected observer
pub struct BroadcastPublisher {
    tx: broadcast::Sender<FeedMessage>,
    /// Last assigned sequence number. Held while sending so channel order matches `seq`.
    seq: Mutex<u64>,
}

impl BroadcastPublisher {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            seq: Mutex::new(0),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FeedMessage> {
        self.tx.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn last_seq(&self) -> u64 {
        *self.seq.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn send(&self, kind: FeedKind, payload: FeedPayload) -> usize {
        let mut seq = self.seq.lock().unwrap_or_else(PoisonError::into_inner);
        *seq += 1;
        let message = FeedMessage {
            kind,
            seq: *seq,
            payload,
        };
        match self.tx.send(message) {
            Ok(receivers) => receivers,
            Err(_) => {
                debug!(seq = *seq, "No feed observers connected");
                0
            }
        }
    }

    /// Publish a committed round event. Returns the number of receivers.
    pub fn publish(&self, event: &RoundEvent) -> usize {
        let (kind, payload) = encode(event);
        self.send(kind, payload)
    }

    pub fn publish_heartbeat(&self) -> usize {
        self.send(
            FeedKind::Heartbeat,
            FeedPayload::Heartbeat(HeartbeatPayload {
                timestamp: Utc::now().timestamp_millis(),
            }),
        )
    }

    /// Status message describing `snapshot`, stamped with the last published `seq`.
    pub fn resync_message(&self, snapshot: &RoundSnapshot) -> FeedMessage {
        FeedMessage {
            kind: FeedKind::Status,
            seq: self.last_seq(),
            payload: FeedPayload::Status(StatusPayload {
                status: snapshot.phase,
                round_id: snapshot.round_id,
                server_seed_hash: Some(snapshot.server_seed_hash.clone()),
                countdown_seconds: snapshot.countdown_ms.map(|ms| (ms + 999) / 1000),
                multiplier: Some(snapshot.multiplier),
                elapsed_ms: snapshot.elapsed_ms,
                resync: true,
            }),
        }
    }

    /// Publish heartbeats until `shutdown` flips.
    pub fn spawn_heartbeat(
        self: &Arc<Self>,
        period: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let publisher = self.clone();
        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // First tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        publisher.publish_heartbeat();
                    }
                }
            }
            debug!("Heartbeat task stopped");
        })
    }
}
