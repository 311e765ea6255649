//! WebSocket connection handler.
//!
//! One socket is one session. The adapter only frames and routes: it decodes
//! inbound JSON records, hands them to the hub, and drains the session's
//! outbound channel back onto the socket.

use super::protocol::{ClientMessage, ServerMessage};
use crate::hub::Hub;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use std::time::Instant;
use tokio::time::{interval, Duration};
use tracing::{debug, error, info, warn};

/// Keep-alive ping interval.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// No traffic for this long means the connection is dead (3 missed pings).
const CONNECTION_TIMEOUT: Duration = Duration::from_secs(90);

#[derive(Clone)]
pub struct WsState {
    pub hub: Hub,
}

/// Handle a WebSocket upgrade request.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<WsState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state.hub))
}

/// Drive an established connection until either side closes it.
async fn handle_socket(mut socket: WebSocket, hub: Hub) {
    let (session_id, mut rx) = hub.register().await;
    info!(session_id = %session_id, "websocket connected");

    let mut ping_interval = interval(PING_INTERVAL);
    ping_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut last_activity = Instant::now();

    loop {
        tokio::select! {
            // Outbound messages queued by the hub.
            Some(msg) = rx.recv() => {
                let text = match serde_json::to_string(&msg) {
                    Ok(text) => text,
                    Err(e) => {
                        error!(session_id = %session_id, "failed to encode outbound message: {}", e);
                        continue;
                    }
                };
                if let Err(e) = socket.send(Message::Text(text)).await {
                    debug!(session_id = %session_id, "failed to send message: {}", e);
                    break;
                }
            }

            // Keep-alive ping and dead-connection detection.
            _ = ping_interval.tick() => {
                if last_activity.elapsed() > CONNECTION_TIMEOUT {
                    warn!(session_id = %session_id, "connection timed out (no activity for {:?})", CONNECTION_TIMEOUT);
                    break;
                }
                if let Err(e) = socket.send(Message::Ping(vec![])).await {
                    debug!(session_id = %session_id, "failed to send ping: {}", e);
                    break;
                }
            }

            // Inbound frames.
            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        last_activity = Instant::now();
                        handle_client_message(&hub, &session_id, &text).await;
                    }
                    Some(Ok(Message::Binary(data))) => {
                        // The protocol is text, but accept JSON sent as a
                        // binary frame.
                        last_activity = Instant::now();
                        match std::str::from_utf8(&data) {
                            Ok(text) => handle_client_message(&hub, &session_id, text).await,
                            Err(_) => {
                                hub.notify(&session_id, ServerMessage::error("binary frames must be UTF-8 JSON")).await;
                            }
                        }
                    }
                    Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {
                        last_activity = Instant::now();
                    }
                    Some(Ok(Message::Close(_))) => {
                        info!(session_id = %session_id, "client initiated close");
                        break;
                    }
                    Some(Err(e)) => {
                        debug!(session_id = %session_id, "websocket error: {}", e);
                        break;
                    }
                    None => {
                        info!(session_id = %session_id, "websocket stream ended");
                        break;
                    }
                }
            }
        }
    }

    info!(session_id = %session_id, "websocket disconnected");
    hub.disconnect(&session_id).await;
}

/// Decode one inbound record and route it. Failures go back to the sender
/// only; they never disturb other sessions.
async fn handle_client_message(hub: &Hub, session_id: &String, text: &str) {
    let msg: ClientMessage = match serde_json::from_str(text) {
        Ok(msg) => msg,
        Err(e) => {
            debug!(session_id = %session_id, "undecodable message: {}", e);
            hub.notify(session_id, ServerMessage::error(format!("invalid message: {e}")))
                .await;
            return;
        }
    };

    let result = match msg {
        ClientMessage::JoinDocument { document_id, user } => {
            hub.join(session_id, &document_id, user.unwrap_or_default())
                .await
        }
        ClientMessage::Operation {
            document_id,
            operation,
        } => hub.submit_op(session_id, &document_id, operation).await,
        ClientMessage::CursorUpdate {
            document_id,
            cursor,
        } => hub.update_cursor(session_id, &document_id, cursor).await,
    };

    if let Err(e) = result {
        debug!(session_id = %session_id, "request rejected: {}", e);
        hub.notify(session_id, ServerMessage::error(e.to_string()))
            .await;
    }
}
