//! WebSocket event stream. Each connection gets its own hub subscription and
//! a keepalive loop; a subscriber that cannot keep up is dropped rather than
//! allowed to stall the hub.

use std::time::{Duration, Instant};

use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::broadcast::error::RecvError;

use crate::events::EventHub;
use crate::web::AppState;

const PING_INTERVAL: Duration = Duration::from_secs(20);
const PING_DEADLINE: Duration = Duration::from_secs(2);
const WRITE_DEADLINE: Duration = Duration::from_secs(3);
const IDLE_EXPIRY: Duration = Duration::from_secs(60);

pub async fn ws_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    let hub = state.hub.clone();
    ws.on_upgrade(move |socket| client_session(socket, hub))
}

async fn client_session(socket: WebSocket, hub: EventHub) {
    let mut rx = hub.subscribe();
    let (mut sink, mut stream) = socket.split();
    let mut ping = tokio::time::interval(PING_INTERVAL);
    let mut last_inbound = Instant::now();

    loop {
        tokio::select! {
            ev = rx.recv() => match ev {
                Ok(ev) => {
                    let Ok(text) = serde_json::to_string(&ev) else {
                        continue;
                    };
                    let send = sink.send(Message::Text(text.into()));
                    if !matches!(tokio::time::timeout(WRITE_DEADLINE, send).await, Ok(Ok(()))) {
                        break;
                    }
                }
                // Too far behind to catch up; disconnect instead of stalling.
                Err(RecvError::Lagged(_)) => break,
                Err(RecvError::Closed) => break,
            },
            _ = ping.tick() => {
                if last_inbound.elapsed() > IDLE_EXPIRY {
                    break;
                }
                let send = sink.send(Message::Ping(Bytes::new()));
                if !matches!(tokio::time::timeout(PING_DEADLINE, send).await, Ok(Ok(()))) {
                    break;
                }
            },
            msg = stream.next() => match msg {
                Some(Ok(_)) => last_inbound = Instant::now(),
                _ => break,
            },
        }
    }

    let _ = sink.close().await;
}
