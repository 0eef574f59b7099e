//! WebSocket upgrade and connection wiring.
//!
//! Path pattern: `/{namespace}/ws/{guild_id}/{client_id}`. The path routes
//! the connection; the session itself only opens for broadcasting after a
//! valid `subscribe` envelope (see `session`).

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, State, WebSocketUpgrade,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::metrics::{
    WS_CONNECTIONS_CLOSED, WS_CONNECTIONS_OPENED, WS_CONNECTION_DURATION,
};
use crate::server::AppState;

use super::session::{run_session, DisconnectReason, SessionHandle, SessionState};

/// Longest accepted client-supplied identifier. The id is only ever logged.
const MAX_CLIENT_ID_LEN: usize = 64;

/// WebSocket upgrade handler
#[tracing::instrument(name = "ws.upgrade", skip(ws, state))]
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path((guild_id, client_id)): Path<(String, String)>,
) -> Response {
    let client_id = sanitize_client_id(&client_id);
    // A non-numeric path segment still gets a session; its subscribe will
    // fail validation and the client sees a typed error envelope.
    let path_guild = guild_id.parse::<u64>().ok();

    tracing::info!(
        guild_path = %guild_id,
        client_id = %client_id,
        "WebSocket upgrade requested"
    );

    ws.on_upgrade(move |socket| handle_socket(socket, state, path_guild, client_id))
}

/// Keep the caller-supplied id printable and bounded; it is never trusted
/// for identity or authorization.
fn sanitize_client_id(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, '-' | '_' | '.'))
        .take(MAX_CLIENT_ID_LEN)
        .collect()
}

/// Handle an established WebSocket connection
#[tracing::instrument(
    name = "ws.connection",
    skip(socket, state),
    fields(client_id = %client_id)
)]
async fn handle_socket(
    socket: WebSocket,
    state: AppState,
    path_guild: Option<u64>,
    client_id: String,
) {
    let connection_start = std::time::Instant::now();

    let (tx, mut rx) = mpsc::channel(state.settings.realtime.channel_buffer);
    let handle = Arc::new(SessionHandle::new(client_id.clone(), tx));
    let connection_id = handle.id;

    WS_CONNECTIONS_OPENED.inc();

    tracing::info!(
        connection_id = %connection_id,
        client_id = %client_id,
        "WebSocket connection established"
    );

    let (mut ws_sender, ws_receiver) = socket.split();

    // Outbound: drain the session's frame queue onto the socket. A write
    // failure ends the task; the session is cleaned up below.
    let mut send_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let text = match frame.to_text() {
                Ok(t) => t,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to serialize outbound frame");
                    continue;
                }
            };

            if ws_sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    // Inbound: the session read loop owns handshake, dispatch and the idle
    // deadline.
    let recv_handle = handle.clone();
    let recv_state = state.clone();
    let mut recv_task = tokio::spawn(async move {
        run_session(ws_receiver, recv_handle, recv_state, path_guild).await
    });

    // Closing cancels the other half immediately; any push queued to this
    // session is abandoned since the transport is presumed dead.
    let reason = tokio::select! {
        _ = &mut send_task => {
            recv_task.abort();
            tracing::debug!(connection_id = %connection_id, "Send task completed");
            DisconnectReason::TransportError
        }
        reason = &mut recv_task => {
            send_task.abort();
            reason.unwrap_or(DisconnectReason::TransportError)
        }
    };

    // Deregistration is idempotent; the push-failure path may already have
    // removed this session.
    handle.set_state(SessionState::Closing).await;
    if let Some(guild_id) = handle.guild().await {
        state.registry.remove(guild_id, connection_id);
    }
    handle.set_state(SessionState::Closed).await;

    WS_CONNECTIONS_CLOSED.inc();
    let duration = connection_start.elapsed().as_secs_f64();
    WS_CONNECTION_DURATION.observe(duration);

    tracing::info!(
        connection_id = %connection_id,
        client_id = %client_id,
        reason = ?reason,
        duration_secs = duration,
        "WebSocket connection closed"
    );
}
