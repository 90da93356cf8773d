// WebSocket endpoint: hello handshake, canvas pub/sub, presence fan-out.
//
// Each connection runs a select loop over three sources: the heartbeat
// timer, the outbound fan-out queue, and the socket itself. The first
// frame must be a hello; everything else is rejected until then.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use easel_common::protocol::{decode_message, encode_message, WsMessage, CURRENT_PROTOCOL_VERSION};
use easel_common::types::now_ms;

use crate::db::CanvasDb;
use crate::hub::{CanvasStore, SessionRegistry};
use crate::presence::PresenceStore;

pub(crate) const HEARTBEAT_INTERVAL_MS: u64 = 15_000;
pub(crate) const HEARTBEAT_TIMEOUT_MS: u64 = 10_000;
pub(crate) const MAX_FRAME_BYTES: usize = 262_144;

#[derive(Clone)]
pub struct RelayState {
    pub registry: Arc<SessionRegistry>,
    pub canvases: Arc<CanvasStore>,
    pub presence: Arc<PresenceStore>,
    pub db: Arc<CanvasDb>,
    pub presence_timeout_ms: i64,
}

pub fn router(state: RelayState) -> Router {
    Router::new().route("/v1/ws", get(ws_upgrade)).with_state(state)
}

async fn ws_upgrade(State(state): State<RelayState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.max_frame_size(MAX_FRAME_BYTES).on_upgrade(move |socket| handle_socket(state, socket))
}

async fn send_message(socket: &mut WebSocket, message: &WsMessage) -> Result<(), axum::Error> {
    match encode_message(message) {
        Ok(raw) => socket.send(Message::Text(raw.into())).await,
        Err(error) => {
            warn!(?error, "failed to encode outbound ws message");
            Ok(())
        }
    }
}

fn error_message(code: &str, message: impl Into<String>, retryable: bool) -> WsMessage {
    WsMessage::Error { code: code.to_string(), message: message.into(), retryable }
}

async fn handle_socket(state: RelayState, mut socket: WebSocket) {
    let connection_id = Uuid::new_v4();

    // First frame must be a hello.
    let user_id = match socket.recv().await {
        Some(Ok(Message::Text(raw))) => match decode_message(raw.as_str()) {
            Ok(WsMessage::Hello { protocol, user_id, .. }) => {
                if protocol != CURRENT_PROTOCOL_VERSION {
                    let _ = send_message(
                        &mut socket,
                        &error_message(
                            "SYNC_PROTOCOL_UNSUPPORTED",
                            format!("unsupported protocol `{protocol}`"),
                            false,
                        ),
                    )
                    .await;
                    let _ = socket.send(Message::Close(None)).await;
                    return;
                }
                user_id
            }
            _ => {
                let _ = send_message(
                    &mut socket,
                    &error_message(
                        "SYNC_HELLO_REQUIRED",
                        "first WebSocket message must be a hello frame",
                        false,
                    ),
                )
                .await;
                let _ = socket.send(Message::Close(None)).await;
                return;
            }
        },
        _ => return,
    };

    let (outbound_sender, mut outbound_receiver) = mpsc::unbounded_channel::<WsMessage>();
    state.registry.register(connection_id, user_id.clone(), outbound_sender).await;

    if send_message(&mut socket, &WsMessage::HelloAck { server_time: now_ms() }).await.is_err() {
        state.registry.remove(connection_id).await;
        return;
    }
    debug!(%connection_id, %user_id, "websocket session established");

    // Heartbeat: ping every HEARTBEAT_INTERVAL_MS, disconnect when a full
    // interval passes without the pong arriving inside its deadline.
    let mut heartbeat_interval =
        tokio::time::interval(std::time::Duration::from_millis(HEARTBEAT_INTERVAL_MS));
    heartbeat_interval.reset(); // skip immediate first tick
    let mut last_pong = Instant::now();
    let pong_deadline =
        std::time::Duration::from_millis(HEARTBEAT_INTERVAL_MS + HEARTBEAT_TIMEOUT_MS);

    loop {
        tokio::select! {
            _ = heartbeat_interval.tick() => {
                if last_pong.elapsed() > pong_deadline {
                    warn!(%connection_id, "heartbeat timeout, disconnecting");
                    break;
                }
                if socket.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
            }
            maybe_outbound = outbound_receiver.recv() => {
                match maybe_outbound {
                    Some(message) => {
                        if send_message(&mut socket, &message).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            maybe_frame = socket.recv() => {
                let Some(frame) = maybe_frame else {
                    break;
                };

                match frame {
                    Ok(Message::Text(raw)) => {
                        let inbound = match decode_message(raw.as_str()) {
                            Ok(message) => message,
                            Err(error) => {
                                debug!(?error, "invalid ws frame payload");
                                if send_message(
                                    &mut socket,
                                    &error_message(
                                        "SYNC_INVALID_MESSAGE",
                                        "invalid websocket frame payload",
                                        false,
                                    ),
                                )
                                .await
                                .is_err()
                                {
                                    break;
                                }
                                continue;
                            }
                        };

                        if handle_inbound(&state, connection_id, &user_id, inbound, &mut socket)
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }
                    Ok(Message::Ping(payload)) => {
                        if socket.send(Message::Pong(payload)).await.is_err() {
                            break;
                        }
                    }
                    Ok(Message::Pong(_)) => {
                        last_pong = Instant::now();
                    }
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(error) => {
                        debug!(?error, "websocket receive failed");
                        break;
                    }
                }
            }
        }
    }

    // Disconnect cleanup: drop the registration and, if this was the
    // user's last connection, broadcast the presence departure. This is
    // the best-effort remove-on-disconnect hook — heartbeat expiry in the
    // sweep remains the authoritative fallback.
    if let Some((user_id, subscriptions)) = state.registry.remove(connection_id).await {
        if !state.registry.user_has_other_connections(&user_id, connection_id).await {
            for canvas_id in subscriptions {
                if state.presence.remove(&canvas_id, &user_id).await {
                    let leave = WsMessage::PresenceLeave {
                        canvas_id: canvas_id.clone(),
                        user_id: user_id.clone(),
                    };
                    let _ = state.registry.broadcast_to_subscribers(&canvas_id, leave).await;
                }
            }
        }
    }
    debug!(%connection_id, "websocket session closed");
}

/// Dispatch one decoded inbound message. `Err` means the socket died
/// mid-reply and the loop should end.
async fn handle_inbound(
    state: &RelayState,
    connection_id: Uuid,
    user_id: &str,
    inbound: WsMessage,
    socket: &mut WebSocket,
) -> Result<(), axum::Error> {
    match inbound {
        WsMessage::Subscribe { canvas_id } => {
            ensure_canvas_loaded(state, &canvas_id).await;
            state.registry.track_subscription(connection_id, &canvas_id).await;
            for message in subscription_messages(state, &canvas_id).await {
                send_message(socket, &message).await?;
            }
        }

        WsMessage::SnapshotRequest { canvas_id } => {
            if !state.registry.is_subscribed(connection_id, &canvas_id).await {
                return send_message(
                    socket,
                    &error_message("SYNC_NOT_SUBSCRIBED", "subscribe before requesting", false),
                )
                .await;
            }
            let (shapes, last_updated) = state.canvases.snapshot(&canvas_id).await;
            send_message(socket, &WsMessage::Snapshot { canvas_id, shapes, last_updated }).await?;
        }

        WsMessage::Mutation { canvas_id, mutation } => {
            if !state.registry.is_subscribed(connection_id, &canvas_id).await {
                return send_message(
                    socket,
                    &error_message("SYNC_NOT_SUBSCRIBED", "subscribe before mutating", false),
                )
                .await;
            }
            ensure_canvas_loaded(state, &canvas_id).await;

            if !state.canvases.apply(&canvas_id, &mutation, now_ms()).await {
                // Duplicate create or unknown target: drop, no rebroadcast.
                debug!(
                    %canvas_id,
                    shape_id = mutation.shape_id(),
                    kind = mutation.kind_str(),
                    "dropped no-op mutation"
                );
                return Ok(());
            }

            let (shapes, last_updated) = state.canvases.snapshot(&canvas_id).await;
            if let Err(error) = state.db.save_canvas(&canvas_id, &shapes, last_updated) {
                warn!(?error, %canvas_id, "failed to persist canvas document");
            }

            let broadcast = WsMessage::Mutation { canvas_id: canvas_id.clone(), mutation };
            state
                .registry
                .broadcast_to_subscribers_excluding(&canvas_id, broadcast, connection_id)
                .await;
        }

        WsMessage::Presence { canvas_id, record } => {
            if record.user_id != user_id {
                debug!(%canvas_id, claimed = %record.user_id, "dropping mislabeled presence");
                return Ok(());
            }
            if !state.registry.is_subscribed(connection_id, &canvas_id).await {
                return Ok(());
            }
            if state.presence.update(&canvas_id, record.clone()).await {
                let broadcast = WsMessage::Presence { canvas_id: canvas_id.clone(), record };
                state
                    .registry
                    .broadcast_to_subscribers_excluding(&canvas_id, broadcast, connection_id)
                    .await;
            }
        }

        WsMessage::PresenceLeave { canvas_id, user_id: leaving } => {
            if leaving != user_id {
                return Ok(());
            }
            if state.presence.remove(&canvas_id, &leaving).await {
                let broadcast =
                    WsMessage::PresenceLeave { canvas_id: canvas_id.clone(), user_id: leaving };
                state
                    .registry
                    .broadcast_to_subscribers_excluding(&canvas_id, broadcast, connection_id)
                    .await;
            }
        }

        _ => {
            send_message(
                socket,
                &error_message(
                    "SYNC_UNSUPPORTED_MESSAGE",
                    "message type is not supported by this relay",
                    true,
                ),
            )
            .await?;
        }
    }

    Ok(())
}

/// Snapshot plus the live presence records, served on subscribe.
async fn subscription_messages(state: &RelayState, canvas_id: &str) -> Vec<WsMessage> {
    let (shapes, last_updated) = state.canvases.snapshot(canvas_id).await;
    let mut messages =
        vec![WsMessage::Snapshot { canvas_id: canvas_id.to_string(), shapes, last_updated }];
    for record in
        state.presence.live_for_canvas(canvas_id, now_ms(), state.presence_timeout_ms).await
    {
        messages.push(WsMessage::Presence { canvas_id: canvas_id.to_string(), record });
    }
    messages
}

/// Seed the in-memory canvas from SQLite on first touch.
async fn ensure_canvas_loaded(state: &RelayState, canvas_id: &str) {
    if state.canvases.is_loaded(canvas_id).await {
        return;
    }
    match state.db.load_canvas(canvas_id) {
        Ok(Some((shapes, last_updated))) => {
            state.canvases.load_if_absent(canvas_id, shapes, last_updated).await;
        }
        Ok(None) => {
            state.canvases.load_if_absent(canvas_id, Vec::new(), 0).await;
        }
        Err(error) => {
            warn!(?error, %canvas_id, "failed to load persisted canvas, starting empty");
            state.canvases.load_if_absent(canvas_id, Vec::new(), 0).await;
        }
    }
}
