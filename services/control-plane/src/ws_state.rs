//! `/ws/state`: broadcasts the running engine's tick emissions to any
//! number of subscribers, coalesced over `wsBatchTime`.
//!
//! Per-socket structure mirrors the teacher's forwarder/receiver WS
//! handlers: one task owns the socket, `tokio::select!`s between the
//! engine's broadcast receiver and inbound client frames (here only close
//! and ping/pong matter, the protocol is server-push only), and a bounded
//! coalescing buffer stands in for the teacher's per-stream `mpsc` relay —
//! a slow client just sees a bigger next `updates` batch instead of being
//! fed from an ever-growing queue.

use std::collections::HashMap;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use replay_engine::EngineEvent;
use replay_protocol::{EngineMeta, SensorUpdate, SnapshotEntry, UpdateEntry, WsStateMessage};
use tokio::sync::broadcast;
use tracing::warn;

use crate::state::AppState;

pub async fn ws_state_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn meta(state: &AppState) -> EngineMeta {
    EngineMeta {
        has_controller: state.sessions.has_controller().await,
        control_timeout_secs: state.sessions.control_timeout_secs(),
    }
}

async fn send_snapshot(socket: &mut WebSocket, state: &AppState) -> bool {
    let entries = state.engine.ws_snapshot().await;
    let sensors = entries
        .into_iter()
        .map(|(hash, slot)| SnapshotEntry {
            id: hash,
            value: slot.value,
            name: state.registry.hash_to_name(hash).map(str::to_owned),
            textname: None,
        })
        .collect();
    let msg = WsStateMessage::Snapshot {
        sensors,
        meta: meta(state).await,
    };
    send_message(socket, &msg).await
}

async fn send_message(socket: &mut WebSocket, msg: &WsStateMessage) -> bool {
    match serde_json::to_string(msg) {
        Ok(json) => socket.send(Message::Text(json.into())).await.is_ok(),
        Err(err) => {
            warn!(error = %err, "failed to serialize ws/state message");
            false
        }
    }
}

fn to_update_entry(update: &SensorUpdate, state: &AppState) -> UpdateEntry {
    UpdateEntry {
        id: update.id,
        value: update.value,
        has_value: update.has_value,
        name: state.registry.hash_to_name(update.id).map(str::to_owned),
        textname: None,
    }
}

async fn handle_socket(mut socket: WebSocket, state: AppState) {
    if !send_snapshot(&mut socket, &state).await {
        return;
    }

    let mut events = state.engine.subscribe();
    let mut coalesce_interval = tokio::time::interval(state.ws_batch.max(Duration::from_millis(1)));
    coalesce_interval.tick().await;
    let mut pending: HashMap<i64, SensorUpdate> = HashMap::new();
    let mut last_step: Option<(u64, i64)> = None;
    let mut need_new_snapshot = false;

    loop {
        tokio::select! {
            biased;
            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(Message::Ping(data))) => { let _ = socket.send(Message::Pong(data)).await; }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => { warn!(error = %err, "ws/state receive error"); break; }
                }
            }
            event = events.recv() => {
                match event {
                    Ok(EngineEvent::Step(payload)) => {
                        last_step = Some((payload.step_id, payload.step_ts));
                        for update in &payload.updates {
                            pending.insert(update.id, *update);
                        }
                    }
                    Ok(EngineEvent::Reset) => {
                        pending.clear();
                        last_step = None;
                        if !send_message(&mut socket, &WsStateMessage::Reset).await {
                            break;
                        }
                        need_new_snapshot = true;
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => {
                        need_new_snapshot = true;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            _ = coalesce_interval.tick() => {
                if need_new_snapshot {
                    need_new_snapshot = false;
                    if !send_snapshot(&mut socket, &state).await {
                        break;
                    }
                    continue;
                }
                let Some((step_id, step_ts)) = last_step.take() else { continue };
                if pending.is_empty() {
                    continue;
                }
                let updates = pending.drain().map(|(_, u)| to_update_entry(&u, &state)).collect();
                let msg = WsStateMessage::Updates {
                    step_id,
                    step_ts,
                    step_unix: step_ts / 1_000_000,
                    updates,
                };
                if !send_message(&mut socket, &msg).await {
                    break;
                }
            }
        }
    }
}
