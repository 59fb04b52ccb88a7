//! Live-update WebSocket endpoint.
//!
//! One broadcast endpoint at `/ws`. Messages are JSON hints containing
//! at least `{eventId}`; the console uses them only as a signal to
//! refresh. No ordering or delivery guarantees; slow consumers that
//! lag the channel simply miss hints.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::broadcast::Receiver;

use sluice_engine::EventUpdate;

use crate::server::AppState;

/// Upgrades the connection and subscribes it to state-change hints.
pub(crate) async fn ws_handler(
    State(state): State<Arc<AppState>>,
    ws: WebSocketUpgrade,
) -> Response {
    let rx = state.broadcaster.subscribe();
    ws.on_upgrade(move |socket| drive_socket(socket, rx))
}

async fn drive_socket(mut socket: WebSocket, mut rx: Receiver<EventUpdate>) {
    tracing::debug!("live-update subscriber connected");
    loop {
        tokio::select! {
            update = rx.recv() => match update {
                Ok(update) => {
                    let hint = serde_json::json!({
                        "eventId": update.event_id,
                        "state": update.state.as_str(),
                    });
                    if socket.send(Message::Text(hint.to_string())).await.is_err() {
                        break;
                    }
                }
                // A lagged subscriber just misses hints.
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            },
            incoming = socket.recv() => match incoming {
                // Client messages are drained and ignored.
                Some(Ok(_)) => {}
                Some(Err(_)) | None => break,
            },
        }
    }
    tracing::debug!("live-update subscriber disconnected");
}
