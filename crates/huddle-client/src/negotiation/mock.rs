//! In-memory engine that follows the browser signaling state machine without
//! any implicit rollback, so tests catch every transition we forget to make.

use async_trait::async_trait;
use huddle_protocol::{IceCandidate, SdpType, SessionDescription, SessionId};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use super::engine::{
    ConnectivityState, EngineEventSender, EngineFactory, LocalSource, PeerEngine, SignalingState,
};
use crate::error::EngineError;

#[derive(Debug)]
pub struct MockState {
    pub label: String,
    pub signaling: SignalingState,
    pub connectivity: ConnectivityState,
    pub local: Option<SessionDescription>,
    pub remote: Option<SessionDescription>,
    /// Every call in order, e.g. `attach:mic`, `create_offer`, `rollback`
    pub calls: Vec<String>,
    /// Candidates in the order they were handed to the engine, failed ones included
    pub candidates: Vec<String>,
    pub fail_candidates: HashSet<String>,
    pub fail_offer: bool,
    pub closed: bool,
}

pub type Shared = Arc<Mutex<MockState>>;

pub struct MockEngine {
    state: Shared,
}

impl MockEngine {
    pub fn new(label: &str) -> (Self, Shared) {
        let state = Arc::new(Mutex::new(MockState {
            label: label.to_string(),
            signaling: SignalingState::Stable,
            connectivity: ConnectivityState::New,
            local: None,
            remote: None,
            calls: Vec::new(),
            candidates: Vec::new(),
            fail_candidates: HashSet::new(),
            fail_offer: false,
            closed: false,
        }));
        (
            Self {
                state: state.clone(),
            },
            state,
        )
    }
}

fn invalid(what: &str, state: SignalingState) -> EngineError {
    EngineError::InvalidState(format!("{} in {:?}", what, state))
}

#[async_trait]
impl PeerEngine for MockEngine {
    async fn create_offer(&self) -> Result<SessionDescription, EngineError> {
        let mut s = self.state.lock().unwrap();
        s.calls.push("create_offer".into());
        if s.fail_offer {
            return Err(EngineError::InvalidState("offer refused".into()));
        }
        Ok(SessionDescription::offer(format!("offer-from-{}", s.label)))
    }

    async fn create_answer(&self) -> Result<SessionDescription, EngineError> {
        let mut s = self.state.lock().unwrap();
        s.calls.push("create_answer".into());
        if s.signaling != SignalingState::HaveRemoteOffer {
            return Err(invalid("create_answer", s.signaling));
        }
        Ok(SessionDescription::answer(format!("answer-from-{}", s.label)))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), EngineError> {
        let mut s = self.state.lock().unwrap();
        let next = match (desc.kind, s.signaling) {
            (SdpType::Offer, SignalingState::Stable) => SignalingState::HaveLocalOffer,
            (SdpType::Answer, SignalingState::HaveRemoteOffer) => SignalingState::Stable,
            (SdpType::Rollback, SignalingState::HaveLocalOffer) => SignalingState::Stable,
            (kind, state) => return Err(invalid(&format!("set_local {:?}", kind), state)),
        };
        s.calls.push(match desc.kind {
            SdpType::Offer => "set_local_offer".into(),
            SdpType::Answer => "set_local_answer".into(),
            SdpType::Rollback => "rollback".into(),
        });
        s.signaling = next;
        s.local = match desc.kind {
            SdpType::Rollback => None,
            _ => Some(desc),
        };
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), EngineError> {
        let mut s = self.state.lock().unwrap();
        let next = match (desc.kind, s.signaling) {
            (SdpType::Offer, SignalingState::Stable) => SignalingState::HaveRemoteOffer,
            (SdpType::Answer, SignalingState::HaveLocalOffer) => SignalingState::Stable,
            (kind, state) => return Err(invalid(&format!("set_remote {:?}", kind), state)),
        };
        s.calls.push(format!("set_remote:{}", desc.sdp));
        s.signaling = next;
        s.remote = Some(desc);
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), EngineError> {
        let mut s = self.state.lock().unwrap();
        if s.remote.is_none() {
            return Err(EngineError::InvalidState("candidate before remote description".into()));
        }
        s.candidates.push(candidate.candidate.clone());
        if s.fail_candidates.contains(&candidate.candidate) {
            return Err(EngineError::InvalidState("unusable candidate".into()));
        }
        Ok(())
    }

    fn signaling_state(&self) -> SignalingState {
        self.state.lock().unwrap().signaling
    }

    fn connection_state(&self) -> ConnectivityState {
        self.state.lock().unwrap().connectivity
    }

    async fn attach_local_source(&self, source: &LocalSource) -> Result<(), EngineError> {
        self.state.lock().unwrap().calls.push(format!("attach:{}", source.id));
        Ok(())
    }

    async fn close(&self) -> Result<(), EngineError> {
        let mut s = self.state.lock().unwrap();
        s.closed = true;
        s.signaling = SignalingState::Closed;
        s.connectivity = ConnectivityState::Closed;
        Ok(())
    }
}

/// Factory that remembers every engine it built
#[derive(Clone, Default)]
pub struct MockFactory {
    pub label: String,
    pub built: Arc<Mutex<Vec<(SessionId, u64, Shared)>>>,
}

impl MockFactory {
    pub fn new(label: &str) -> Self {
        Self {
            label: label.to_string(),
            built: Arc::default(),
        }
    }

    pub fn count(&self) -> usize {
        self.built.lock().unwrap().len()
    }

    /// Most recent engine built for `peer`
    pub fn latest(&self, peer: &str) -> Shared {
        self.built
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(p, _, _)| p.as_str() == peer)
            .map(|(_, _, s)| s.clone())
            .expect("no engine built for peer")
    }
}

#[async_trait]
impl EngineFactory for MockFactory {
    async fn create(
        &self,
        peer: &SessionId,
        generation: u64,
        _events: EngineEventSender,
    ) -> Result<Box<dyn PeerEngine>, EngineError> {
        let (engine, state) = MockEngine::new(&self.label);
        self.built
            .lock()
            .unwrap()
            .push((peer.clone(), generation, state));
        Ok(Box::new(engine))
    }
}
