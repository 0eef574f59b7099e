//! Dashboard-side connection management.
//!
//! The browser client's reconnect/fallback behavior, modeled as an explicit
//! state machine with named states and transition functions so the backoff
//! and polling logic is testable without a real socket. A transport driver
//! (JS or native) feeds events in and executes the returned actions.

mod backoff;
mod controller;
mod cursor;

pub use backoff::{BackoffConfig, ReconnectBackoff};
pub use controller::{Action, ClientState, ReconnectController, MAX_RECONNECT_ATTEMPTS};
pub use cursor::SnapshotCursor;
