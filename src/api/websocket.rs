//! WebSocket event feed
//!
//! Each connection gets the current round as a `status` message, then every
//! published feed message in `seq` order. A session that falls behind the
//! broadcast buffer is sent a fresh snapshot instead of the messages it missed.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use super::handlers::AppState;
use crate::broadcast::{FeedMessage, FeedPayload};
use crate::engine::CrashEngine;

static NEXT_CLIENT_ID: AtomicU64 = AtomicU64::new(1);

/// GET /ws
pub async fn websocket_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    let engine = state.engine.clone();
    ws.on_upgrade(move |socket| handle_connection(socket, engine))
}

/// Current round as a feed message, or `None` if the round cannot be read.
fn snapshot_message(engine: &CrashEngine, resync: bool) -> Option<FeedMessage> {
    let snapshot = engine
        .rounds()
        .snapshot()
        .map_err(|e| warn!(error = %e, "Cannot snapshot round for feed"))
        .ok()?;
    let mut message = engine.publisher().resync_message(&snapshot);
    if let FeedPayload::Status(ref mut status) = message.payload {
        status.resync = resync;
    }
    Some(message)
}

async fn send_message<S>(sender: &mut S, message: &FeedMessage) -> bool
where
    S: SinkExt<Message> + Unpin,
{
    let text = match message.to_json() {
        Ok(text) => text,
        Err(e) => {
            warn!(seq = message.seq, error = %e, "Failed to serialize feed message");
            return true;
        }
    };
    sender.send(Message::Text(text)).await.is_ok()
}

async fn handle_connection(socket: WebSocket, engine: Arc<CrashEngine>) {
    let client_id = NEXT_CLIENT_ID.fetch_add(1, Ordering::Relaxed);
    let metrics = engine.metrics().clone();
    metrics.websocket_connected();
    info!(client_id, "🔌 WebSocket client connected");

    let (mut sender, mut receiver) = socket.split();
    // Subscribe before the snapshot so nothing published in between is lost
    let mut feed = engine.publisher().subscribe();

    if let Some(welcome) = snapshot_message(&engine, false) {
        if !send_message(&mut sender, &welcome).await {
            metrics.websocket_disconnected();
            return;
        }
        metrics.record_websocket_message();
    }

    loop {
        tokio::select! {
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => {
                        debug!(client_id, "Client closed the feed");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!(client_id, error = %e, "WebSocket receive error");
                        break;
                    }
                }
            }
            published = feed.recv() => {
                let message = match published {
                    Ok(message) => message,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(client_id, skipped, "Feed observer lagged, resyncing");
                        metrics.record_websocket_resync();
                        match snapshot_message(&engine, true) {
                            Some(message) => message,
                            None => continue,
                        }
                    }
                    Err(RecvError::Closed) => break,
                };

                if !send_message(&mut sender, &message).await {
                    debug!(client_id, "Client went away");
                    break;
                }
                metrics.record_websocket_message();
            }
        }
    }

    metrics.websocket_disconnected();
    info!(client_id, "🔌 WebSocket client disconnected");
}
