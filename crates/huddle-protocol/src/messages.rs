use serde::{Deserialize, Serialize};

use crate::types::{PeerInfo, Role, SessionId, default_group};

/// Messages sent from client to relay via WebSocket
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    /// Join (and possibly create) a key-protected room
    Join {
        #[serde(default)]
        name: String,
        #[serde(default)]
        room: String,
        #[serde(default)]
        key: String,
        #[serde(default = "default_group")]
        group: String,
        #[serde(default)]
        role: Role,
    },

    /// Own microphone mute state changed
    MuteChanged { muted: bool },

    /// Opaque signaling payload addressed to another session
    Signal {
        target_id: SessionId,
        payload: serde_json::Value,
    },

    /// Application keepalive
    Ping,

    /// Explicit leave; the relay closes the connection afterwards
    Leave,
}

/// Messages sent from relay to client via WebSocket
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    /// Join accepted: own session id plus everyone else in the room
    Joined {
        client_id: SessionId,
        room: String,
        peers: Vec<PeerInfo>,
    },

    /// Join rejected; the connection is closed right after
    AuthFailed { reason: String },

    PeerJoined {
        client_id: SessionId,
        name: String,
        muted: bool,
        #[serde(default = "default_group")]
        group: String,
        #[serde(default)]
        role: Role,
    },

    PeerLeft { client_id: SessionId, name: String },

    MuteChanged { client_id: SessionId, muted: bool },

    /// Signaling payload from another session, forwarded verbatim
    Signal {
        from_id: SessionId,
        payload: serde_json::Value,
    },

    /// Pong response to ping
    Pong,
}

impl ServerMessage {
    pub fn peer_joined(info: &PeerInfo) -> Self {
        ServerMessage::PeerJoined {
            client_id: info.client_id.clone(),
            name: info.name.clone(),
            muted: info.muted,
            group: info.group.clone(),
            role: info.role,
        }
    }
}
