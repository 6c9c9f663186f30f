//! Huddle control-channel protocol
//!
//! Wire types exchanged between clients and the relay over the `/ws`
//! WebSocket. Every message is a JSON object tagged by `type`.

pub mod messages;
pub mod types;

pub use messages::{ClientMessage, ServerMessage};
pub use types::*;
