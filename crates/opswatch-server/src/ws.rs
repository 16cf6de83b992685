//! Live-update WebSocket channel.
//!
//! Dashboard sessions attach here. The server-to-client direction carries
//! broadcast envelopes; the client-to-server direction is keepalive only and
//! its frames are drained and dropped.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use tokio::sync::mpsc;
use tracing::debug;

use crate::api::AppState;

/// Frames buffered per session. A session that stays this far behind gets
/// evicted by the broadcaster's send timeout instead of stalling everyone.
const SESSION_BUFFER: usize = 32;

/// `GET /ws` -- upgrade and run the session loop.
pub async fn live_updates_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| session_loop(socket, state))
}

async fn session_loop(mut socket: WebSocket, state: AppState) {
    let (tx, mut rx) = mpsc::channel::<String>(SESSION_BUFFER);
    let id = state.registry.register(tx).await;
    debug!(subscriber = %id, "dashboard session attached");

    loop {
        tokio::select! {
            frame = rx.recv() => match frame {
                Some(frame) => {
                    if socket.send(Message::Text(frame.into())).await.is_err() {
                        break;
                    }
                }
                // Sender side gone: the broadcaster evicted this session.
                None => break,
            },
            inbound = socket.recv() => match inbound {
                Some(Ok(_)) => {} // keepalive, nothing to do
                _ => break,       // closed or errored
            },
        }
    }

    state.registry.unregister(id).await;
    debug!(subscriber = %id, "dashboard session detached");
}
