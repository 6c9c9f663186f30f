//! Huddle client library
//!
//! Joins a key-protected room on a Huddle relay and keeps one negotiated
//! media link per authorized peer.

pub mod error;
pub mod negotiation;
pub mod network;
pub mod state;

pub use network::{ClientEvent, ConnectionStatus, RoomClient, RoomHandle};
pub use state::ClientSettings;
