//! Per-peer "perfect negotiation" on top of a pluggable media engine.

pub mod engine;
pub mod peer_set;
pub mod policy;
pub mod rtc;
pub mod session;

#[cfg(test)]
pub(crate) mod mock;

pub use engine::{
    ConnectivityState, EngineEvent, EngineEventSender, EngineFactory, LocalSource, PeerEngine,
    SignalingState,
};
pub use peer_set::PeerSet;
pub use policy::{TargetGroups, accepts_signal, is_polite};
pub use rtc::RtcEngineFactory;
pub use session::NegotiationSession;
