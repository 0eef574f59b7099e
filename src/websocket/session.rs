//! Per-connection session state and inbound message handling.
//!
//! Each session owns exactly one client transport. Liveness is client-driven:
//! the read loop races every inbound frame against an idle deadline, and a
//! session that stays silent past the configured timeout is torn down. All
//! per-session failures are local and never affect sibling sessions.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::Message;
use chrono::{DateTime, Utc};
use futures::{Stream, StreamExt};
use tokio::sync::{mpsc, RwLock};
use tokio::time::timeout;
use uuid::Uuid;

use crate::broadcast::UpdateKind;
use crate::metrics::{HEARTBEAT_TIMEOUTS_TOTAL, PROTOCOL_ERRORS_TOTAL};
use crate::server::AppState;

use super::message::{decode_client_message, ClientMessage, OutboundFrame, ServerMessage};

/// Session lifecycle. A session never re-enters `Open`; clients resume by
/// opening a new connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Open,
    Closing,
    Closed,
}

/// Why a session's read loop ended. `HeartbeatTimeout` is kept distinct from
/// `TransportError` in logs to tell silent disconnects from hard ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    ClientClosed,
    TransportError,
    HeartbeatTimeout,
}

/// Handle for a single client connection.
///
/// `client_id` is caller-supplied and used only for logging, never for
/// authorization.
pub struct SessionHandle {
    pub id: Uuid,
    pub client_id: String,
    pub sender: mpsc::Sender<OutboundFrame>,
    pub connected_at: DateTime<Utc>,
    state: RwLock<SessionState>,
    guild: RwLock<Option<u64>>,
    last_seen_at: RwLock<DateTime<Utc>>,
}

impl SessionHandle {
    pub fn new(client_id: String, sender: mpsc::Sender<OutboundFrame>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            client_id,
            sender,
            connected_at: now,
            state: RwLock::new(SessionState::Connecting),
            guild: RwLock::new(None),
            last_seen_at: RwLock::new(now),
        }
    }

    pub async fn state(&self) -> SessionState {
        *self.state.read().await
    }

    pub async fn set_state(&self, state: SessionState) {
        *self.state.write().await = state;
    }

    pub async fn is_open(&self) -> bool {
        self.state().await == SessionState::Open
    }

    /// The guild this session subscribed to, once `Open`.
    pub async fn guild(&self) -> Option<u64> {
        *self.guild.read().await
    }

    pub async fn update_activity(&self) {
        *self.last_seen_at.write().await = Utc::now();
    }

    pub async fn last_seen_at(&self) -> DateTime<Utc> {
        *self.last_seen_at.read().await
    }

    /// Queue a frame for delivery. Failure means the transport side of this
    /// session is already gone.
    pub async fn send(
        &self,
        frame: OutboundFrame,
    ) -> Result<(), mpsc::error::SendError<OutboundFrame>> {
        self.sender.send(frame).await
    }

    /// Queue a frame without waiting. Fan-out uses this so a session whose
    /// outbound buffer is full cannot stall a broadcast round; a full buffer
    /// is reported the same way as a closed channel.
    pub fn try_send(
        &self,
        frame: OutboundFrame,
    ) -> Result<(), mpsc::error::TrySendError<OutboundFrame>> {
        self.sender.try_send(frame)
    }

    async fn mark_open(&self, guild_id: u64) {
        *self.guild.write().await = Some(guild_id);
        self.set_state(SessionState::Open).await;
    }
}

/// Validate a caller-supplied guild identifier. Guild ids are Discord
/// snowflakes, so zero is never valid.
pub fn is_valid_guild_id(guild_id: u64) -> bool {
    guild_id > 0
}

/// Drive one session's read loop until the connection ends.
///
/// `path_guild` is the guild id parsed from the transport path; a `subscribe`
/// envelope may repeat it but must not contradict it. Returns why the loop
/// ended so the caller can log and clean up accordingly.
pub(crate) async fn run_session<S>(
    mut inbound: S,
    handle: Arc<SessionHandle>,
    state: AppState,
    path_guild: Option<u64>,
) -> DisconnectReason
where
    S: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    let idle_window = Duration::from_secs(state.settings.realtime.heartbeat_timeout);

    loop {
        let frame = match timeout(idle_window, inbound.next()).await {
            Err(_) => {
                HEARTBEAT_TIMEOUTS_TOTAL.inc();
                tracing::warn!(
                    connection_id = %handle.id,
                    client_id = %handle.client_id,
                    idle_secs = idle_window.as_secs(),
                    "No inbound activity within heartbeat window"
                );
                return DisconnectReason::HeartbeatTimeout;
            }
            Ok(None) => return DisconnectReason::ClientClosed,
            Ok(Some(Err(e))) => {
                tracing::warn!(
                    connection_id = %handle.id,
                    error = %e,
                    "WebSocket receive error"
                );
                return DisconnectReason::TransportError;
            }
            Ok(Some(Ok(frame))) => frame,
        };

        match frame {
            Message::Text(text) => {
                handle.update_activity().await;
                handle_text(text.as_str(), &handle, &state, path_guild).await;
            }
            Message::Ping(_) | Message::Pong(_) => {
                handle.update_activity().await;
            }
            Message::Binary(_) => {
                let _ = handle
                    .send(ServerMessage::error("binary frames are not supported").into())
                    .await;
            }
            Message::Close(_) => {
                tracing::debug!(connection_id = %handle.id, "Received close frame");
                return DisconnectReason::ClientClosed;
            }
        }
    }
}

/// Decode and dispatch one inbound text frame. Decode failures and unknown
/// envelope types are logged and dropped; the session stays up.
async fn handle_text(
    text: &str,
    handle: &Arc<SessionHandle>,
    state: &AppState,
    path_guild: Option<u64>,
) {
    let message = match decode_client_message(text) {
        Ok(m) => m,
        Err(e) => {
            PROTOCOL_ERRORS_TOTAL.inc();
            tracing::warn!(
                connection_id = %handle.id,
                client_id = %handle.client_id,
                error = %e,
                "Dropping undecodable client envelope"
            );
            return;
        }
    };

    match message {
        ClientMessage::Ping => {
            // No guild lookup on the ping path.
            let _ = handle.send(ServerMessage::Pong.into()).await;
        }
        ClientMessage::Subscribe { guild_id } => {
            handle_subscribe(guild_id, handle, state, path_guild).await;
        }
        ClientMessage::RequestUpdate => {
            handle_request_update(handle, state).await;
        }
    }
}

/// Validate the handshake, move the session to `Open`, register it, and push
/// one `initial_data` snapshot addressed only to this session.
async fn handle_subscribe(
    envelope_guild: Option<u64>,
    handle: &Arc<SessionHandle>,
    state: &AppState,
    path_guild: Option<u64>,
) {
    if handle.state().await != SessionState::Connecting {
        tracing::debug!(
            connection_id = %handle.id,
            "Ignoring repeated subscribe"
        );
        return;
    }

    let guild_id = match (path_guild, envelope_guild) {
        (Some(path), Some(env)) if path != env => {
            let _ = handle
                .send(ServerMessage::error("subscribe guild does not match connection path").into())
                .await;
            return;
        }
        (Some(path), _) => path,
        (None, Some(env)) => env,
        (None, None) => {
            let _ = handle
                .send(ServerMessage::error("missing guild id").into())
                .await;
            return;
        }
    };

    if !is_valid_guild_id(guild_id) {
        let _ = handle
            .send(ServerMessage::error("invalid guild id").into())
            .await;
        return;
    }

    let cap = state.settings.realtime.max_sessions_per_guild;
    if state.registry.subscriber_count(guild_id) >= cap {
        tracing::warn!(
            connection_id = %handle.id,
            guild_id = guild_id,
            cap = cap,
            "Guild session cap reached, rejecting subscribe"
        );
        let _ = handle
            .send(ServerMessage::error("too many sessions for this guild").into())
            .await;
        return;
    }

    handle.mark_open(guild_id).await;
    state.registry.add(guild_id, handle.clone());

    tracing::info!(
        connection_id = %handle.id,
        client_id = %handle.client_id,
        guild_id = guild_id,
        "Session subscribed"
    );

    if let Err(e) = state
        .broadcaster
        .push_to_session(handle, guild_id, UpdateKind::Initial)
        .await
    {
        tracing::warn!(
            connection_id = %handle.id,
            guild_id = guild_id,
            error = %e,
            "Failed to build initial snapshot"
        );
        let _ = handle
            .send(ServerMessage::error("statistics temporarily unavailable").into())
            .await;
    }
}

/// Out-of-band snapshot push for this session only; does not wait for the
/// next scheduler tick.
async fn handle_request_update(handle: &Arc<SessionHandle>, state: &AppState) {
    let Some(guild_id) = handle.guild().await else {
        let _ = handle
            .send(ServerMessage::error("not subscribed").into())
            .await;
        return;
    };

    if let Err(e) = state
        .broadcaster
        .push_to_session(handle, guild_id, UpdateKind::Requested)
        .await
    {
        tracing::warn!(
            connection_id = %handle.id,
            guild_id = guild_id,
            error = %e,
            "On-demand snapshot failed"
        );
        let _ = handle
            .send(ServerMessage::error("statistics temporarily unavailable").into())
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::MemoryStatsAggregator;
    use crate::config::Settings;
    use crate::server::AppState;
    use futures::stream;
    use tokio_stream::wrappers::ReceiverStream;

    fn test_state() -> AppState {
        AppState::new(Settings::default(), Arc::new(MemoryStatsAggregator::new()))
    }

    fn text(s: &str) -> Result<Message, axum::Error> {
        Ok(Message::Text(s.to_string().into()))
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_session_times_out() {
        let state = test_state();
        let (tx, _rx) = mpsc::channel(8);
        let handle = Arc::new(SessionHandle::new("dash-1".to_string(), tx));

        let reason = run_session(stream::pending(), handle, state, Some(42)).await;
        assert_eq!(reason, DisconnectReason::HeartbeatTimeout);
    }

    #[tokio::test(start_paused = true)]
    async fn test_regular_pings_keep_session_alive() {
        let state = test_state();
        let (tx, mut out_rx) = mpsc::channel(8);
        let handle = Arc::new(SessionHandle::new("dash-2".to_string(), tx));

        let (frame_tx, frame_rx) = mpsc::channel(8);
        let feeder = tokio::spawn(async move {
            // Four ping rounds at the client's 25s cadence, each inside the
            // server's 30s window, then a clean close.
            for _ in 0..4 {
                tokio::time::sleep(Duration::from_secs(25)).await;
                frame_tx.send(text(r#"{"type":"ping"}"#)).await.unwrap();
            }
        });

        let reason = run_session(ReceiverStream::new(frame_rx), handle, state, Some(42)).await;
        feeder.await.unwrap();

        assert_eq!(reason, DisconnectReason::ClientClosed);

        // Every ping was answered with a pong.
        for _ in 0..4 {
            let frame = out_rx.recv().await.unwrap();
            assert!(frame.to_text().unwrap().contains("pong"));
        }
    }

    #[tokio::test]
    async fn test_subscribe_registers_and_pushes_initial_data() {
        let state = test_state();
        let (tx, mut out_rx) = mpsc::channel(8);
        let handle = Arc::new(SessionHandle::new("dash-3".to_string(), tx));

        let frames = stream::iter(vec![text(r#"{"type":"subscribe"}"#)]);
        let reason = run_session(frames, handle.clone(), state.clone(), Some(42)).await;

        assert_eq!(reason, DisconnectReason::ClientClosed);
        assert_eq!(handle.guild().await, Some(42));
        assert_eq!(handle.state().await, SessionState::Open);
        assert_eq!(state.registry.subscriber_count(42), 1);

        let frame = out_rx.recv().await.unwrap();
        assert!(frame.to_text().unwrap().contains("initial_data"));
    }

    #[tokio::test]
    async fn test_unknown_envelope_does_not_kill_session() {
        let state = test_state();
        let (tx, mut out_rx) = mpsc::channel(8);
        let handle = Arc::new(SessionHandle::new("dash-4".to_string(), tx));

        let frames = stream::iter(vec![
            text(r#"{"type":"mystery"}"#),
            text("not json"),
            text(r#"{"type":"ping"}"#),
        ]);
        let reason = run_session(frames, handle, state, Some(42)).await;

        assert_eq!(reason, DisconnectReason::ClientClosed);
        // The bad frames were dropped silently; the ping still got its pong.
        let frame = out_rx.recv().await.unwrap();
        assert!(frame.to_text().unwrap().contains("pong"));
        assert!(out_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_request_update_before_subscribe_is_rejected() {
        let state = test_state();
        let (tx, mut out_rx) = mpsc::channel(8);
        let handle = Arc::new(SessionHandle::new("dash-5".to_string(), tx));

        let frames = stream::iter(vec![text(r#"{"type":"request_update"}"#)]);
        run_session(frames, handle, state, Some(42)).await;

        let frame = out_rx.recv().await.unwrap();
        assert!(frame.to_text().unwrap().contains("not subscribed"));
    }

    #[tokio::test]
    async fn test_subscribe_past_guild_cap_is_rejected() {
        let mut settings = Settings::default();
        settings.realtime.max_sessions_per_guild = 1;
        let state = AppState::new(settings, Arc::new(MemoryStatsAggregator::new()));

        // Occupy the guild's single slot.
        let (first_tx, _first_rx) = mpsc::channel(8);
        let first = Arc::new(SessionHandle::new("dash-a".to_string(), first_tx));
        state.registry.add(42, first);

        let (tx, mut out_rx) = mpsc::channel(8);
        let handle = Arc::new(SessionHandle::new("dash-b".to_string(), tx));
        let frames = stream::iter(vec![text(r#"{"type":"subscribe"}"#)]);
        run_session(frames, handle.clone(), state.clone(), Some(42)).await;

        // Rejected with a typed error; never registered, never opened.
        assert_eq!(handle.state().await, SessionState::Connecting);
        assert_eq!(state.registry.subscriber_count(42), 1);
        let frame = out_rx.recv().await.unwrap();
        assert!(frame.to_text().unwrap().contains("too many sessions"));
    }

    #[tokio::test]
    async fn test_subscribe_rejects_invalid_guild() {
        let state = test_state();
        let (tx, mut out_rx) = mpsc::channel(8);
        let handle = Arc::new(SessionHandle::new("dash-6".to_string(), tx));

        let frames = stream::iter(vec![text(r#"{"type":"subscribe","guild_id":0}"#)]);
        run_session(frames, handle.clone(), state.clone(), None).await;

        assert_eq!(handle.state().await, SessionState::Connecting);
        assert_eq!(state.registry.active_guilds().len(), 0);
        let frame = out_rx.recv().await.unwrap();
        assert!(frame.to_text().unwrap().contains("invalid guild id"));
    }
}
