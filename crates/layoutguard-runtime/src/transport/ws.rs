//! Collab WebSocket handler.
//!
//! Responsibilities:
//! - Upgrade HTTP -> WS
//! - Extract doc/ticket from the query string and resolve the ticket
//! - Bridge text frames to the hub, hub messages back to frames
//! - Lifecycle: ping + idle timeout

use axum::{
    extract::{ws::Message, ws::WebSocket, ws::WebSocketUpgrade, Query, State},
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::time::{Duration, Instant};
use tracing::Instrument;

use layoutguard_core::error::{LayoutError, Result};

use crate::app_state::AppState;
use crate::transport::codec::{decode, encode, error_frame, Inbound};

#[derive(Debug, Deserialize)]
pub struct CollabQuery {
    pub doc: String,
    pub ticket: String,
}

pub async fn ws_upgrade(
    State(app): State<AppState>,
    ws: WebSocketUpgrade,
    Query(q): Query<CollabQuery>,
) -> Response {
    ws.on_upgrade(move |socket| {
        let span = tracing::info_span!("collab", doc = %q.doc);
        async move {
            if let Err(e) = run_session(app, q, socket).await {
                tracing::debug!(error = %e, "collab session ended with error");
            }
        }
        .instrument(span)
    })
}

async fn run_session(app: AppState, q: CollabQuery, socket: WebSocket) -> Result<()> {
    let (mut ws_tx, mut ws_rx) = socket.split();

    let user = match app.resolve_ticket(&q.ticket) {
        Ok(u) => u,
        Err(e) => {
            let _ = ws_tx
                .send(error_frame(e.client_code().as_str(), &e.to_string()))
                .await;
            return Err(e);
        }
    };

    let hub = app.hub();
    let (peer, mut from_hub) = hub.connect(&q.doc, &user)?;

    let server = &app.cfg().server;
    let idle_timeout = Duration::from_millis(server.idle_timeout_ms);
    let mut ping_tick = tokio::time::interval(Duration::from_millis(server.ping_interval_ms));
    ping_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    let mut last_activity = Instant::now();

    let res: Result<()> = async {
        loop {
            tokio::select! {
                out = from_hub.recv() => {
                    // Hub dropped us (slow consumer or shutdown).
                    let Some(m) = out else { break; };
                    ws_tx
                        .send(encode(&m)?)
                        .await
                        .map_err(|e| LayoutError::Transport(format!("socket send failed: {e}")))?;
                }

                incoming = ws_rx.next() => {
                    let Some(Ok(msg)) = incoming else { break; };
                    last_activity = Instant::now();

                    match decode(msg) {
                        Ok(Inbound::Sync(m)) => hub.handle(peer, m),
                        Ok(Inbound::Ping(p)) => {
                            let _ = ws_tx.send(Message::Pong(p)).await;
                        }
                        Ok(Inbound::Pong(_)) => {}
                        Ok(Inbound::Close) => break,
                        Err(e) => {
                            let _ = ws_tx
                                .send(error_frame(e.client_code().as_str(), &e.to_string()))
                                .await;
                        }
                    }
                }

                _ = ping_tick.tick() => {
                    let _ = ws_tx.send(Message::Ping(Vec::new())).await;
                }

                _ = tokio::time::sleep(Duration::from_millis(250)) => {
                    if last_activity.elapsed() >= idle_timeout {
                        let _ = ws_tx.send(error_frame("TIMEOUT", "idle timeout")).await;
                        break;
                    }
                }
            }
        }
        Ok::<(), LayoutError>(())
    }
    .await;

    hub.disconnect(peer);
    res
}
