//! Session registry: the authoritative room table of the relay.
//!
//! Every mutation (join, leave, mute, route, liveness sweep) runs under one
//! async mutex over the whole table, so membership changes are serialized and
//! a room's key is fixed by exactly one creator. Outbound delivery never waits
//! on a peer: each session owns an unbounded channel drained by its socket
//! writer task.

use crate::error::{RelayError, Result};
use chrono::{DateTime, Utc};
use huddle_protocol::{PeerInfo, Role, ServerMessage, SessionId};
use serde::Serialize;
use std::collections::HashMap;
use tokio::sync::{Mutex, mpsc};

const MAX_NAME_LEN: usize = 64;
const ANONYMOUS: &str = "Anonymous";

/// Commands consumed by a connection's writer task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Text(String),
    /// Liveness probe (WebSocket ping frame)
    Ping,
    /// Close the socket; nothing is delivered after this
    Close,
}

pub type ConnectionSender = mpsc::UnboundedSender<Outbound>;

#[derive(Debug, Clone)]
pub struct JoinRequest {
    pub name: String,
    pub room: String,
    pub key: String,
    pub group: String,
    pub role: Role,
}

#[derive(Debug, Clone)]
pub struct Joined {
    pub session_id: SessionId,
    pub room: String,
    pub peers: Vec<PeerInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Departure {
    pub session_id: SessionId,
    pub room: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RelayStats {
    pub rooms: usize,
    pub sessions: usize,
}

struct Session {
    info: PeerInfo,
    /// Cleared by every sweep, set again when the probe is answered
    alive: bool,
    joined_at: DateTime<Utc>,
    sender: ConnectionSender,
}

struct Room {
    key: String,
    sessions: HashMap<SessionId, Session>,
}

impl Room {
    fn broadcast(&self, message: &ServerMessage, exclude: Option<&SessionId>) {
        let json = match serde_json::to_string(message) {
            Ok(j) => j,
            Err(e) => {
                tracing::error!("Failed to serialize message: {}", e);
                return;
            }
        };

        for (session_id, session) in &self.sessions {
            if exclude == Some(session_id) {
                continue;
            }
            if let Err(e) = session.sender.send(Outbound::Text(json.clone())) {
                tracing::error!("Failed to send message to {}: {}", session_id, e);
            }
        }
    }

    fn roster_except(&self, session_id: &SessionId) -> Vec<PeerInfo> {
        self.sessions
            .iter()
            .filter(|(id, _)| *id != session_id)
            .map(|(_, s)| s.info.clone())
            .collect()
    }
}

#[derive(Default)]
struct Rooms {
    rooms: HashMap<String, Room>,
    /// Which room each live session belongs to
    index: HashMap<SessionId, String>,
}

impl Rooms {
    /// Removes a session and announces it. Returns `None` if it was already
    /// gone, so every departure is announced at most once.
    fn remove(&mut self, session_id: &SessionId) -> Option<(Departure, ConnectionSender)> {
        let room_name = self.index.remove(session_id)?;
        let room = self.rooms.get_mut(&room_name)?;
        let session = room.sessions.remove(session_id)?;

        room.broadcast(
            &ServerMessage::PeerLeft {
                client_id: session_id.clone(),
                name: session.info.name.clone(),
            },
            None,
        );

        if room.sessions.is_empty() {
            self.rooms.remove(&room_name);
            tracing::info!("Room {} is empty, destroyed", room_name);
        }

        tracing::info!(
            "Session {} left room {} after {}s",
            session_id,
            room_name,
            (Utc::now() - session.joined_at).num_seconds()
        );

        Some((
            Departure {
                session_id: session_id.clone(),
                room: room_name,
                name: session.info.name,
            },
            session.sender,
        ))
    }
}

pub struct Registry {
    inner: Mutex<Rooms>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Rooms::default()),
        }
    }

    /// Registers a new session, creating the room on first join.
    ///
    /// The `joined` snapshot is queued on `sender` before anyone else learns
    /// about the session, so it is always the first message the client sees.
    pub async fn join(&self, request: JoinRequest, sender: ConnectionSender) -> Result<Joined> {
        let room_name = request.room.trim().to_string();
        let key = request.key.trim().to_string();
        if room_name.is_empty() || key.is_empty() {
            return Err(RelayError::AuthFailed("Room or key is empty".to_string()));
        }

        let name: String = match request.name.trim() {
            "" => ANONYMOUS.to_string(),
            n => n.chars().take(MAX_NAME_LEN).collect(),
        };
        let group = match request.group.trim() {
            "" => huddle_protocol::DEFAULT_GROUP.to_string(),
            g => g.to_string(),
        };

        let mut inner = self.inner.lock().await;

        if let Some(room) = inner.rooms.get(&room_name) {
            if room.key != key {
                tracing::info!("Join to room {} rejected: wrong key", room_name);
                return Err(RelayError::AuthFailed("Wrong key".to_string()));
            }
        }

        let session_id = SessionId::generate();
        let info = PeerInfo {
            client_id: session_id.clone(),
            name,
            muted: false,
            group,
            role: request.role,
        };

        let room = inner.rooms.entry(room_name.clone()).or_insert_with(|| {
            tracing::info!("Creating new room {}", room_name);
            Room {
                key,
                sessions: HashMap::new(),
            }
        });

        let peers = room.roster_except(&session_id);
        let joined = ServerMessage::Joined {
            client_id: session_id.clone(),
            room: room_name.clone(),
            peers: peers.clone(),
        };
        match serde_json::to_string(&joined) {
            Ok(json) => {
                if let Err(e) = sender.send(Outbound::Text(json)) {
                    tracing::error!("Failed to send joined to {}: {}", session_id, e);
                }
            }
            Err(e) => tracing::error!("Failed to serialize message: {}", e),
        }

        room.broadcast(&ServerMessage::peer_joined(&info), None);
        room.sessions.insert(
            session_id.clone(),
            Session {
                info,
                alive: true,
                joined_at: Utc::now(),
                sender,
            },
        );
        inner.index.insert(session_id.clone(), room_name.clone());

        tracing::info!(
            "Session {} joined room {} with {} peers",
            session_id,
            room_name,
            peers.len()
        );

        Ok(Joined {
            session_id,
            room: room_name,
            peers,
        })
    }

    /// Removes a session (explicit leave, disconnect or eviction).
    /// Idempotent: only the first call for a session announces the departure.
    pub async fn leave(&self, session_id: &SessionId) -> Option<Departure> {
        self.inner
            .lock()
            .await
            .remove(session_id)
            .map(|(departure, _)| departure)
    }

    pub async fn set_mute(&self, session_id: &SessionId, muted: bool) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let room_name = inner
            .index
            .get(session_id)
            .cloned()
            .ok_or_else(|| RelayError::UnknownSession(session_id.clone()))?;
        let room = inner
            .rooms
            .get_mut(&room_name)
            .ok_or_else(|| RelayError::UnknownSession(session_id.clone()))?;
        let session = room
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| RelayError::UnknownSession(session_id.clone()))?;

        session.info.muted = muted;
        room.broadcast(
            &ServerMessage::MuteChanged {
                client_id: session_id.clone(),
                muted,
            },
            Some(session_id),
        );
        Ok(())
    }

    /// Delivers an opaque payload to `to` if it shares a room with `from`.
    /// The payload is never inspected.
    pub async fn route(
        &self,
        from: &SessionId,
        to: &SessionId,
        payload: serde_json::Value,
    ) -> Result<()> {
        let inner = self.inner.lock().await;
        let room_name = inner
            .index
            .get(from)
            .ok_or_else(|| RelayError::UnknownSession(from.clone()))?;
        let target = inner
            .rooms
            .get(room_name)
            .and_then(|room| room.sessions.get(to))
            .ok_or_else(|| RelayError::UnknownSession(to.clone()))?;

        let json = serde_json::to_string(&ServerMessage::Signal {
            from_id: from.clone(),
            payload,
        })?;
        target
            .sender
            .send(Outbound::Text(json))
            .map_err(|_| RelayError::Delivery(to.clone()))
    }

    /// A probe was answered.
    pub async fn mark_alive(&self, session_id: &SessionId) {
        let mut inner = self.inner.lock().await;
        let Some(room_name) = inner.index.get(session_id).cloned() else {
            return;
        };
        if let Some(session) = inner
            .rooms
            .get_mut(&room_name)
            .and_then(|room| room.sessions.get_mut(session_id))
        {
            session.alive = true;
        }
    }

    /// One liveness pass: evicts sessions that ignored the previous probe,
    /// then marks the rest presumed dead and probes them again.
    pub async fn sweep(&self) -> Vec<Departure> {
        let mut inner = self.inner.lock().await;

        let dead: Vec<SessionId> = inner
            .rooms
            .values()
            .flat_map(|room| room.sessions.iter())
            .filter(|(_, session)| !session.alive)
            .map(|(id, _)| id.clone())
            .collect();

        let mut evicted = Vec::with_capacity(dead.len());
        for session_id in dead {
            if let Some((departure, sender)) = inner.remove(&session_id) {
                tracing::info!("Evicting unresponsive session {}", session_id);
                let _ = sender.send(Outbound::Close);
                evicted.push(departure);
            }
        }

        for room in inner.rooms.values_mut() {
            for (session_id, session) in room.sessions.iter_mut() {
                session.alive = false;
                if session.sender.send(Outbound::Ping).is_err() {
                    tracing::debug!("Probe to {} not delivered", session_id);
                }
            }
        }

        evicted
    }

    pub async fn stats(&self) -> RelayStats {
        let inner = self.inner.lock().await;
        RelayStats {
            rooms: inner.rooms.len(),
            sessions: inner.index.len(),
        }
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(name: &str, room: &str, key: &str) -> JoinRequest {
        JoinRequest {
            name: name.to_string(),
            room: room.to_string(),
            key: key.to_string(),
            group: "default".to_string(),
            role: Role::User,
        }
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<Outbound>) -> Vec<Outbound> {
        let mut out = Vec::new();
        while let Ok(item) = rx.try_recv() {
            out.push(item);
        }
        out
    }

    fn messages(rx: &mut mpsc::UnboundedReceiver<Outbound>) -> Vec<ServerMessage> {
        drain(rx)
            .into_iter()
            .filter_map(|o| match o {
                Outbound::Text(t) => serde_json::from_str(&t).ok(),
                _ => None,
            })
            .collect()
    }

    fn peer_left_count(messages: &[ServerMessage], id: &SessionId) -> usize {
        messages
            .iter()
            .filter(|m| matches!(m, ServerMessage::PeerLeft { client_id, .. } if client_id == id))
            .count()
    }

    #[tokio::test]
    async fn test_join_returns_roster_and_notifies_others() {
        let registry = Registry::new();
        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();

        let a = registry.join(request("Ana", "r1", "k"), tx_a).await.unwrap();
        assert!(a.peers.is_empty());

        let b = registry.join(request("Bo", "r1", "k"), tx_b).await.unwrap();
        assert_eq!(b.peers.len(), 1);
        assert_eq!(b.peers[0].client_id, a.session_id);

        let to_a = messages(&mut rx_a);
        assert!(matches!(&to_a[0], ServerMessage::Joined { client_id, .. } if *client_id == a.session_id));
        assert!(matches!(
            &to_a[1],
            ServerMessage::PeerJoined { client_id, name, .. } if *client_id == b.session_id && name == "Bo"
        ));

        let to_b = messages(&mut rx_b);
        assert_eq!(to_b.len(), 1);
        assert!(matches!(&to_b[0], ServerMessage::Joined { peers, .. } if peers.len() == 1));
    }

    #[tokio::test]
    async fn test_wrong_key_does_not_touch_room() {
        let registry = Registry::new();
        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_c, mut rx_c) = mpsc::unbounded_channel();

        registry.join(request("Ana", "r1", "k"), tx_a).await.unwrap();
        drain(&mut rx_a);

        let err = registry
            .join(request("Cy", "r1", "wrong"), tx_c)
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::AuthFailed(_)));

        // Nothing leaked to the rejected connection, nothing announced to members
        assert!(drain(&mut rx_c).is_empty());
        assert!(drain(&mut rx_a).is_empty());
        assert_eq!(registry.stats().await.sessions, 1);

        // The original key still works
        let (tx_d, _rx_d) = mpsc::unbounded_channel();
        assert!(registry.join(request("Di", "r1", "k"), tx_d).await.is_ok());
    }

    #[tokio::test]
    async fn test_empty_room_or_key_is_rejected() {
        let registry = Registry::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        assert!(registry.join(request("Ana", "  ", "k"), tx.clone()).await.is_err());
        assert!(registry.join(request("Ana", "r1", ""), tx).await.is_err());
        assert_eq!(registry.stats().await.rooms, 0);
    }

    #[tokio::test]
    async fn test_name_defaults_and_truncates() {
        let registry = Registry::new();
        let (tx_a, _rx_a) = mpsc::unbounded_channel();
        let (tx_b, _rx_b) = mpsc::unbounded_channel();

        registry.join(request("", "r1", "k"), tx_a).await.unwrap();
        let b = registry
            .join(request(&"x".repeat(100), "r1", "k"), tx_b)
            .await
            .unwrap();
        assert_eq!(b.peers[0].name, ANONYMOUS);

        let (tx_c, _rx_c) = mpsc::unbounded_channel();
        let c = registry.join(request("Cy", "r1", "k"), tx_c).await.unwrap();
        let long = c.peers.iter().find(|p| p.client_id == b.session_id).unwrap();
        assert_eq!(long.name.chars().count(), MAX_NAME_LEN);
    }

    #[tokio::test]
    async fn test_leave_is_announced_once_and_room_destroyed() {
        let registry = Registry::new();
        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, _rx_b) = mpsc::unbounded_channel();

        let a = registry.join(request("Ana", "r1", "k"), tx_a).await.unwrap();
        let b = registry.join(request("Bo", "r1", "k"), tx_b).await.unwrap();
        drain(&mut rx_a);

        // Explicit leave followed by the socket closing
        assert!(registry.leave(&b.session_id).await.is_some());
        assert!(registry.leave(&b.session_id).await.is_none());

        let to_a = messages(&mut rx_a);
        assert_eq!(peer_left_count(&to_a, &b.session_id), 1);

        registry.leave(&a.session_id).await;
        assert_eq!(registry.stats().await.rooms, 0);

        // A fresh room with the same name takes a new key
        let (tx_c, _rx_c) = mpsc::unbounded_channel();
        assert!(registry.join(request("Cy", "r1", "other"), tx_c).await.is_ok());
    }

    #[tokio::test]
    async fn test_mute_excludes_sender() {
        let registry = Registry::new();
        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();

        let a = registry.join(request("Ana", "r1", "k"), tx_a).await.unwrap();
        registry.join(request("Bo", "r1", "k"), tx_b).await.unwrap();
        drain(&mut rx_a);
        drain(&mut rx_b);

        registry.set_mute(&a.session_id, true).await.unwrap();
        assert!(drain(&mut rx_a).is_empty());
        let to_b = messages(&mut rx_b);
        assert!(matches!(
            &to_b[..],
            [ServerMessage::MuteChanged { client_id, muted: true }] if *client_id == a.session_id
        ));

        // Late joiners see the current mute state
        let (tx_c, _rx_c) = mpsc::unbounded_channel();
        let c = registry.join(request("Cy", "r1", "k"), tx_c).await.unwrap();
        let ana = c.peers.iter().find(|p| p.client_id == a.session_id).unwrap();
        assert!(ana.muted);
    }

    #[tokio::test]
    async fn test_route_stays_within_room() {
        let registry = Registry::new();
        let (tx_a, _rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        let (tx_x, mut rx_x) = mpsc::unbounded_channel();

        let a = registry.join(request("Ana", "r1", "k"), tx_a).await.unwrap();
        let b = registry.join(request("Bo", "r1", "k"), tx_b).await.unwrap();
        let x = registry.join(request("Xi", "r2", "k"), tx_x).await.unwrap();
        drain(&mut rx_b);
        drain(&mut rx_x);

        let payload = json!({ "sdp": { "type": "offer", "sdp": "v=0" }, "extra": [1, 2] });
        registry
            .route(&a.session_id, &b.session_id, payload.clone())
            .await
            .unwrap();

        let to_b = messages(&mut rx_b);
        match &to_b[..] {
            [ServerMessage::Signal { from_id, payload: got }] => {
                assert_eq!(*from_id, a.session_id);
                assert_eq!(*got, payload);
            }
            other => panic!("unexpected {:?}", other),
        }

        assert!(
            registry
                .route(&a.session_id, &x.session_id, json!({}))
                .await
                .is_err()
        );
        assert!(drain(&mut rx_x).is_empty());
    }

    #[tokio::test]
    async fn test_broadcast_survives_dead_member() {
        let registry = Registry::new();
        let (tx_a, rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        registry.join(request("Ana", "r1", "k"), tx_a).await.unwrap();
        registry.join(request("Bo", "r1", "k"), tx_b).await.unwrap();
        drain(&mut rx_b);
        drop(rx_a);

        let (tx_c, _rx_c) = mpsc::unbounded_channel();
        registry.join(request("Cy", "r1", "k"), tx_c).await.unwrap();
        assert_eq!(messages(&mut rx_b).len(), 1);
    }

    #[tokio::test]
    async fn test_sweep_evicts_after_two_silent_periods() {
        let registry = Registry::new();
        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        let a = registry.join(request("Ana", "r1", "k"), tx_a).await.unwrap();
        let b = registry.join(request("Bo", "r1", "k"), tx_b).await.unwrap();
        drain(&mut rx_a);
        drain(&mut rx_b);

        assert!(registry.sweep().await.is_empty());
        assert!(drain(&mut rx_a).contains(&Outbound::Ping));
        assert!(drain(&mut rx_b).contains(&Outbound::Ping));

        // Only Ana answers the probe
        registry.mark_alive(&a.session_id).await;
        let evicted = registry.sweep().await;
        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].session_id, b.session_id);
        assert!(drain(&mut rx_b).contains(&Outbound::Close));

        let to_a = messages(&mut rx_a);
        assert_eq!(peer_left_count(&to_a, &b.session_id), 1);

        // The socket closing afterwards must not announce again
        assert!(registry.leave(&b.session_id).await.is_none());
        assert_eq!(registry.stats().await.sessions, 1);
    }
}
