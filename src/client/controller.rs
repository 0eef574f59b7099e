//! Reconnection state machine.
//!
//! `Idle → Connecting → Open → Reconnecting → …`, with `HttpPolling` as the
//! terminal fallback after the 6th consecutive failure. The controller never
//! touches a transport itself: every transition returns the actions the
//! driver must perform, and the driver reports outcomes back as events.

use std::time::Duration;

use super::backoff::ReconnectBackoff;

/// Client ping cadence; strictly less than the server's 30s idle window so
/// a healthy client is never timed out.
pub const PING_INTERVAL: Duration = Duration::from_secs(25);

/// HTTP polling cadence once the persistent transport is given up.
pub const POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Consecutive failures tolerated before falling back to HTTP polling.
pub const MAX_RECONNECT_ATTEMPTS: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Idle,
    Connecting,
    Open,
    Reconnecting,
    /// Terminal for this page lifetime; the persistent transport is not
    /// attempted again.
    HttpPolling,
}

/// Side effects the transport driver must perform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    OpenTransport,
    SendSubscribe,
    SendPing,
    SendRequestUpdate,
    ScheduleReconnect(Duration),
    StartPolling(Duration),
    FetchSnapshot,
    /// One-time status indicator change, not a hard error.
    ShowOfflineIndicator,
}

pub struct ReconnectController {
    state: ClientState,
    attempts: u32,
    backoff: ReconnectBackoff,
}

impl ReconnectController {
    pub fn new() -> Self {
        Self {
            state: ClientState::Idle,
            attempts: 0,
            backoff: ReconnectBackoff::default(),
        }
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// On mount: open the transport immediately.
    pub fn start(&mut self) -> Vec<Action> {
        match self.state {
            ClientState::Idle => {
                self.state = ClientState::Connecting;
                vec![Action::OpenTransport]
            }
            _ => Vec::new(),
        }
    }

    /// The transport opened: subscribe and reset the failure counter. The
    /// driver starts its [`PING_INTERVAL`] heartbeat timer.
    pub fn on_open(&mut self) -> Vec<Action> {
        match self.state {
            ClientState::Connecting => {
                self.state = ClientState::Open;
                self.attempts = 0;
                vec![Action::SendSubscribe]
            }
            _ => Vec::new(),
        }
    }

    pub fn on_heartbeat_tick(&self) -> Vec<Action> {
        match self.state {
            ClientState::Open => vec![Action::SendPing],
            _ => Vec::new(),
        }
    }

    /// The transport closed or errored. Schedules a backed-off reconnect, or
    /// switches permanently to HTTP polling once attempts are exhausted.
    pub fn on_connection_lost(&mut self) -> Vec<Action> {
        match self.state {
            ClientState::Connecting | ClientState::Open | ClientState::Reconnecting => {
                if self.attempts >= MAX_RECONNECT_ATTEMPTS {
                    self.state = ClientState::HttpPolling;
                    vec![
                        Action::ShowOfflineIndicator,
                        Action::StartPolling(POLL_INTERVAL),
                        Action::FetchSnapshot,
                    ]
                } else {
                    let delay = self.backoff.delay(self.attempts);
                    self.attempts += 1;
                    self.state = ClientState::Reconnecting;
                    vec![Action::ScheduleReconnect(delay)]
                }
            }
            _ => Vec::new(),
        }
    }

    /// The scheduled reconnect delay elapsed.
    pub fn on_reconnect_timer(&mut self) -> Vec<Action> {
        match self.state {
            ClientState::Reconnecting => {
                self.state = ClientState::Connecting;
                vec![Action::OpenTransport]
            }
            _ => Vec::new(),
        }
    }

    pub fn on_poll_tick(&self) -> Vec<Action> {
        match self.state {
            ClientState::HttpPolling => vec![Action::FetchSnapshot],
            _ => Vec::new(),
        }
    }

    /// Manual refresh from the UI.
    pub fn refresh(&self) -> Vec<Action> {
        match self.state {
            ClientState::Open => vec![Action::SendRequestUpdate],
            ClientState::HttpPolling => vec![Action::FetchSnapshot],
            _ => Vec::new(),
        }
    }
}

impl Default for ReconnectController {
    fn default() -> Self {
        Self::new()
    }
}
