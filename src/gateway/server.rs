//! WebSocket upgrade handler and per-connection event loop.

use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time;

use crate::AppState;

use super::authz::authorize;
use super::events::{ClientCommand, EventPayload, ReadyMessage};
use super::registry::{EventSink, Outbound};

/// Close codes (4000-range for application-level).
const CLOSE_INVALID_PAYLOAD: u16 = 4000;
const CLOSE_UNKNOWN_COMMAND: u16 = 4001;
const CLOSE_NOT_AUTHENTICATED: u16 = 4003;
const CLOSE_AUTH_FAILED: u16 = 4004;
const CLOSE_HANDSHAKE_TIMEOUT: u16 = 4009;

/// Timeout for receiving the authenticate command after connecting (seconds).
const AUTH_TIMEOUT_SECS: u64 = 10;

pub fn router() -> Router<AppState> {
    Router::new().route("/gateway", get(ws_upgrade))
}

async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, state))
}

async fn handle_connection(socket: WebSocket, state: AppState) {
    let (ws_tx, mut ws_rx) = socket.split();

    // Register the connection before the handshake; it cannot join channels
    // until an identity is bound.
    let (out_tx, out_rx) = mpsc::unbounded_channel();
    let connection_id = state.registry.connect(out_tx.clone());
    let writer = tokio::spawn(write_loop(ws_tx, out_rx));

    // Step 1: authenticate handshake, bounded by a timeout.
    let handshake = time::timeout(
        Duration::from_secs(AUTH_TIMEOUT_SECS),
        await_authenticate(&state, &connection_id, &mut ws_rx, &out_tx),
    )
    .await;

    let identity = match handshake {
        Ok(Some(identity)) => identity,
        Ok(None) => {
            teardown(&state, &connection_id);
            drop(out_tx);
            let _ = writer.await;
            return;
        }
        Err(_timeout) => {
            send_close(&out_tx, CLOSE_HANDSHAKE_TIMEOUT, "Handshake timeout");
            teardown(&state, &connection_id);
            drop(out_tx);
            let _ = writer.await;
            return;
        }
    };

    tracing::info!(
        %connection_id,
        user_id = %identity.user_id,
        organization_id = %identity.organization_id,
        "gateway connection established"
    );

    let _ = out_tx.send(Outbound::Ready(ReadyMessage::new(
        &connection_id,
        &identity.user_id,
        &identity.organization_id,
    )));

    // Step 2: command loop until the client goes away.
    run_connection(&state, &connection_id, &mut ws_rx, &out_tx).await;

    teardown(&state, &connection_id);
    drop(out_tx);
    let _ = writer.await;

    tracing::info!(%connection_id, "gateway connection ended");
}

/// Wait for the client's authenticate command and bind its identity.
/// Returns `None` if the handshake failed; a close has already been queued.
async fn await_authenticate(
    state: &AppState,
    connection_id: &str,
    ws_rx: &mut SplitStream<WebSocket>,
    out_tx: &EventSink,
) -> Option<crate::auth::verifier::Identity> {
    while let Some(msg) = ws_rx.next().await {
        let msg = match msg {
            Ok(m) => m,
            Err(e) => {
                tracing::debug!(?e, %connection_id, "ws read error during handshake");
                return None;
            }
        };

        let text = match msg {
            Message::Text(t) => t,
            Message::Close(_) => return None,
            Message::Ping(_) | Message::Pong(_) => continue,
            _ => continue,
        };

        let command: ClientCommand = match serde_json::from_str(&text) {
            Ok(c) => c,
            Err(_) => {
                send_close(out_tx, CLOSE_INVALID_PAYLOAD, "Invalid JSON");
                return None;
            }
        };

        let credential = match command {
            ClientCommand::Authenticate { credential } => credential,
            _ => {
                // Channel operations are refused until authenticated.
                send_close(out_tx, CLOSE_NOT_AUTHENTICATED, "Expected authenticate");
                return None;
            }
        };

        match state.registry.authenticate(connection_id, &credential).await {
            Ok(identity) => return Some(identity),
            Err(e) => {
                tracing::debug!(%connection_id, error = %e, "authentication failed");
                send_close(out_tx, CLOSE_AUTH_FAILED, "Authentication failed");
                return None;
            }
        }
    }
    None
}

/// Main command loop for an authenticated connection.
async fn run_connection(
    state: &AppState,
    connection_id: &str,
    ws_rx: &mut SplitStream<WebSocket>,
    out_tx: &EventSink,
) {
    while let Some(msg) = ws_rx.next().await {
        let msg = match msg {
            Ok(m) => m,
            Err(e) => {
                tracing::debug!(?e, %connection_id, "ws read error");
                break;
            }
        };

        let text = match msg {
            Message::Text(t) => t,
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) => continue,
            _ => continue,
        };

        let command: ClientCommand = match serde_json::from_str(&text) {
            Ok(c) => c,
            Err(e) => {
                if serde_json::from_str::<serde_json::Value>(&text).is_ok() {
                    tracing::debug!(?e, %connection_id, "unknown command");
                    send_close(out_tx, CLOSE_UNKNOWN_COMMAND, "Unknown command");
                } else {
                    send_close(out_tx, CLOSE_INVALID_PAYLOAD, "Invalid JSON");
                }
                break;
            }
        };

        match command {
            ClientCommand::Authenticate { .. } => {
                // Exactly once per connection; a credential change requires a
                // new connection.
                send_close(out_tx, CLOSE_INVALID_PAYLOAD, "Already authenticated");
                break;
            }
            ClientCommand::JoinChannel { channel_id } => {
                handle_join(state, connection_id, &channel_id).await;
            }
            ClientCommand::LeaveChannel { channel_id } => {
                state.membership.leave(&channel_id, connection_id);
                state.registry.track_leave(connection_id, &channel_id);
                state
                    .fanout
                    .send_to(connection_id, &channel_id, EventPayload::Left {});
            }
        }
    }
}

/// Authorize and record a join, confirming or denying over the socket.
async fn handle_join(state: &AppState, connection_id: &str, channel_id: &str) {
    // The identity is bound for the whole command loop; a missing one means
    // the connection is already tearing down.
    let Some(identity) = state.registry.identity(connection_id) else {
        return;
    };

    // Re-checked on every join attempt; ownership can change out-of-band.
    match authorize(state.channels.as_ref(), &identity, channel_id).await {
        Ok(_channel) => {
            state.membership.join(channel_id, connection_id);
            state.registry.track_join(connection_id, channel_id);
            state
                .fanout
                .send_to(connection_id, channel_id, EventPayload::Joined {});
            tracing::debug!(%connection_id, %channel_id, "joined channel");
        }
        Err(denied) => {
            tracing::debug!(%connection_id, %channel_id, reason = %denied, "join denied");
            state.fanout.send_to(
                connection_id,
                channel_id,
                EventPayload::Denied {
                    reason: denied.to_string(),
                },
            );
        }
    }
}

/// Remove the connection from the registry and from every channel it held.
fn teardown(state: &AppState, connection_id: &str) {
    let channels = state.registry.disconnect(connection_id);
    state.membership.remove_connection(connection_id, &channels);
}

/// Drain the outbound queue to the socket. A `Close` message sends the close
/// frame and ends the task; so does the peer hanging up.
async fn write_loop(
    mut ws_tx: SplitSink<WebSocket, Message>,
    mut out_rx: mpsc::UnboundedReceiver<Outbound>,
) {
    while let Some(outbound) = out_rx.recv().await {
        match outbound {
            Outbound::Event(event) => {
                let json = serde_json::to_string(event.as_ref()).unwrap();
                if ws_tx.send(Message::Text(json.into())).await.is_err() {
                    break;
                }
            }
            Outbound::Ready(ready) => {
                let json = serde_json::to_string(&ready).unwrap();
                if ws_tx.send(Message::Text(json.into())).await.is_err() {
                    break;
                }
            }
            Outbound::Close { code, reason } => {
                let frame = Message::Close(Some(axum::extract::ws::CloseFrame {
                    code,
                    reason: reason.into(),
                }));
                let _ = ws_tx.send(frame).await;
                break;
            }
        }
    }
}

fn send_close(out_tx: &EventSink, code: u16, reason: &str) {
    let _ = out_tx.send(Outbound::Close {
        code,
        reason: reason.to_string(),
    });
}
