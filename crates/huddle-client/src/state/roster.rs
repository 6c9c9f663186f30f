use huddle_protocol::{PeerInfo, SessionId};
use std::collections::HashMap;

use crate::negotiation::{TargetGroups, accepts_signal};

/// Who is in the room, as last reported by the relay
#[derive(Debug, Default)]
pub struct Roster {
    me: Option<PeerInfo>,
    peers: HashMap<SessionId, PeerInfo>,
    target_groups: TargetGroups,
}

impl Roster {
    /// Start over from a `joined` snapshot
    pub fn reset(&mut self, me: PeerInfo, peers: Vec<PeerInfo>) {
        self.target_groups = TargetGroups::new(&me.group);
        self.peers = peers
            .into_iter()
            .filter(|p| p.client_id != me.client_id)
            .map(|p| (p.client_id.clone(), p))
            .collect();
        self.me = Some(me);
    }

    pub fn clear(&mut self) {
        self.me = None;
        self.peers.clear();
    }

    pub fn me(&self) -> Option<&PeerInfo> {
        self.me.as_ref()
    }

    pub fn get(&self, id: &SessionId) -> Option<&PeerInfo> {
        self.peers.get(id)
    }

    pub fn peers(&self) -> impl Iterator<Item = &PeerInfo> {
        self.peers.values()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn insert(&mut self, info: PeerInfo) {
        self.peers.insert(info.client_id.clone(), info);
    }

    pub fn remove(&mut self, id: &SessionId) -> Option<PeerInfo> {
        self.peers.remove(id)
    }

    /// Update the mute flag of a peer or of ourselves
    pub fn set_muted(&mut self, id: &SessionId, muted: bool) -> bool {
        if let Some(me) = self.me.as_mut().filter(|me| &me.client_id == id) {
            me.muted = muted;
            return true;
        }
        match self.peers.get_mut(id) {
            Some(peer) => {
                peer.muted = muted;
                true
            }
            None => false,
        }
    }

    pub fn add_target_group(&mut self, group: impl Into<String>) -> bool {
        self.target_groups.insert(group)
    }

    /// Whether signals from `from` may reach the negotiation layer.
    /// Unknown senders never do.
    pub fn accepts(&self, from: &SessionId) -> bool {
        match (&self.me, self.peers.get(from)) {
            (Some(me), Some(peer)) => accepts_signal(me, peer, &self.target_groups),
            _ => false,
        }
    }

    /// Peers we should be negotiating with right now
    pub fn accepted_peers(&self) -> Vec<SessionId> {
        let mut ids: Vec<SessionId> = self
            .peers
            .keys()
            .filter(|id| self.accepts(id))
            .cloned()
            .collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use huddle_protocol::Role;

    fn info(id: &str, group: &str, role: Role) -> PeerInfo {
        PeerInfo {
            client_id: SessionId::from(id),
            name: id.to_uppercase(),
            muted: false,
            group: group.to_string(),
            role,
        }
    }

    #[test]
    fn test_unknown_sender_rejected() {
        let mut roster = Roster::default();
        assert!(!roster.accepts(&SessionId::from("x")));

        roster.reset(info("me", "red", Role::User), vec![]);
        assert!(!roster.accepts(&SessionId::from("x")));
    }

    #[test]
    fn test_group_filtering() {
        let mut roster = Roster::default();
        roster.reset(
            info("me", "red", Role::User),
            vec![
                info("a", "red", Role::User),
                info("b", "blue", Role::User),
                info("c", "blue", Role::Admin),
            ],
        );

        assert_eq!(
            roster.accepted_peers(),
            vec![SessionId::from("a"), SessionId::from("c")]
        );
    }

    #[test]
    fn test_admin_target_groups_extend_reach() {
        let mut roster = Roster::default();
        roster.reset(
            info("me", "red", Role::Admin),
            vec![info("b", "blue", Role::User)],
        );
        assert!(!roster.accepts(&SessionId::from("b")));

        roster.add_target_group("blue");
        assert!(roster.accepts(&SessionId::from("b")));
    }

    #[test]
    fn test_mute_updates() {
        let mut roster = Roster::default();
        roster.reset(info("me", "red", Role::User), vec![info("a", "red", Role::User)]);

        assert!(roster.set_muted(&SessionId::from("a"), true));
        assert!(roster.get(&SessionId::from("a")).unwrap().muted);

        assert!(roster.set_muted(&SessionId::from("me"), true));
        assert!(roster.me().unwrap().muted);

        assert!(!roster.set_muted(&SessionId::from("ghost"), true));
    }

    #[test]
    fn test_peer_lifecycle() {
        let mut roster = Roster::default();
        roster.reset(info("me", "red", Role::User), vec![]);

        roster.insert(info("a", "red", Role::User));
        assert_eq!(roster.len(), 1);
        assert!(roster.accepts(&SessionId::from("a")));

        assert!(roster.remove(&SessionId::from("a")).is_some());
        assert!(roster.is_empty());
        assert!(!roster.accepts(&SessionId::from("a")));
    }
}
