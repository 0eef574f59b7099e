//! WebSocket transport: envelope codec, per-connection sessions, and the
//! axum upgrade handler.

mod handler;
mod message;
mod session;

pub use handler::ws_handler;
pub use message::{
    decode_client_message, ClientMessage, DecodeError, OutboundFrame, ServerMessage,
};
pub use session::{is_valid_guild_id, DisconnectReason, SessionHandle, SessionState};
