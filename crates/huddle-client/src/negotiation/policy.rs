//! Pairwise rules every client evaluates identically: who is polite, and whose
//! signals are worth negotiating with.

use huddle_protocol::{PeerInfo, Role, SessionId};
use std::collections::HashSet;

/// The polite side of a pair yields on offer collision.
///
/// Exactly one side of any pair of distinct ids is polite, and since ids never
/// change for the lifetime of a pairing neither does the answer.
pub fn is_polite(local: &SessionId, remote: &SessionId) -> bool {
    local < remote
}

/// Foreign groups an admin is willing to negotiate with
#[derive(Debug, Clone, Default)]
pub struct TargetGroups(HashSet<String>);

impl TargetGroups {
    pub fn new(own_group: &str) -> Self {
        let mut groups = HashSet::new();
        groups.insert(own_group.to_string());
        Self(groups)
    }

    pub fn insert(&mut self, group: impl Into<String>) -> bool {
        self.0.insert(group.into())
    }

    pub fn contains(&self, group: &str) -> bool {
        self.0.contains(group)
    }
}

/// Whether `me` should negotiate with `from`.
pub fn accepts_signal(me: &PeerInfo, from: &PeerInfo, targets: &TargetGroups) -> bool {
    if from.group == me.group || from.role == Role::Admin {
        return true;
    }
    me.role == Role::Admin && targets.contains(&from.group)
}
