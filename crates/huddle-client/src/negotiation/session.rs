use huddle_protocol::{IceCandidate, SdpType, SessionDescription, SessionId};
use std::collections::{HashSet, VecDeque};

use super::engine::{ConnectivityState, LocalSource, PeerEngine, SignalingState};
use crate::error::NegotiationError;

/// Negotiation state for a single remote peer.
///
/// Implements the "perfect negotiation" pattern: either side may offer at any
/// time, and when both do the polite side backs off.
pub struct NegotiationSession {
    peer: SessionId,
    polite: bool,
    generation: u64,
    engine: Box<dyn PeerEngine>,
    making_offer: bool,
    has_remote_description: bool,
    pending_candidates: VecDeque<IceCandidate>,
    connectivity: ConnectivityState,
    attached_sources: HashSet<String>,
}

impl NegotiationSession {
    pub fn new(peer: SessionId, polite: bool, generation: u64, engine: Box<dyn PeerEngine>) -> Self {
        Self {
            peer,
            polite,
            generation,
            engine,
            making_offer: false,
            has_remote_description: false,
            pending_candidates: VecDeque::new(),
            connectivity: ConnectivityState::New,
            attached_sources: HashSet::new(),
        }
    }

    pub fn peer(&self) -> &SessionId {
        &self.peer
    }

    pub fn is_polite(&self) -> bool {
        self.polite
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn signaling_state(&self) -> SignalingState {
        self.engine.signaling_state()
    }

    pub fn connectivity(&self) -> ConnectivityState {
        self.connectivity
    }

    pub fn is_making_offer(&self) -> bool {
        self.making_offer
    }

    pub fn has_remote_description(&self) -> bool {
        self.has_remote_description
    }

    pub fn pending_candidates(&self) -> usize {
        self.pending_candidates.len()
    }

    /// Create an offer and apply it locally. The caller sends it.
    pub async fn make_offer(&mut self) -> Result<SessionDescription, NegotiationError> {
        self.making_offer = true;
        let result = self.create_and_apply_offer().await;
        self.making_offer = false;
        result
    }

    async fn create_and_apply_offer(&self) -> Result<SessionDescription, NegotiationError> {
        let offer = self.engine.create_offer().await?;
        self.engine.set_local_description(offer.clone()).await?;
        Ok(offer)
    }

    /// Apply a remote offer or answer. Returns the answer to send back, if any.
    pub async fn handle_description(
        &mut self,
        desc: SessionDescription,
    ) -> Result<Option<SessionDescription>, NegotiationError> {
        match desc.kind {
            SdpType::Offer => {
                let state = self.engine.signaling_state();
                let collision = self.making_offer || state != SignalingState::Stable;

                if collision {
                    if !self.polite {
                        tracing::debug!("Ignoring colliding offer from {}", self.peer);
                        return Ok(None);
                    }
                    tracing::debug!("Offer collision with {}, rolling back", self.peer);
                    if state == SignalingState::HaveLocalOffer {
                        self.engine
                            .set_local_description(SessionDescription::rollback())
                            .await?;
                    }
                }

                self.engine.set_remote_description(desc).await?;
                self.remote_description_applied().await;

                let answer = self.engine.create_answer().await?;
                self.engine.set_local_description(answer.clone()).await?;
                Ok(Some(answer))
            }
            SdpType::Answer => {
                let state = self.engine.signaling_state();
                if state != SignalingState::HaveLocalOffer {
                    tracing::debug!("Dropping answer from {} in {:?}", self.peer, state);
                    return Ok(None);
                }

                self.engine.set_remote_description(desc).await?;
                self.remote_description_applied().await;
                Ok(None)
            }
            SdpType::Rollback => {
                tracing::debug!("Ignoring remote rollback from {}", self.peer);
                Ok(None)
            }
        }
    }

    /// Apply a remote candidate, or queue it until a remote description exists.
    pub async fn handle_candidate(&mut self, candidate: IceCandidate) -> Result<(), NegotiationError> {
        if !self.has_remote_description {
            self.pending_candidates.push_back(candidate);
            return Ok(());
        }
        self.engine.add_ice_candidate(candidate).await?;
        Ok(())
    }

    async fn remote_description_applied(&mut self) {
        self.has_remote_description = true;

        while let Some(candidate) = self.pending_candidates.pop_front() {
            if let Err(e) = self.engine.add_ice_candidate(candidate).await {
                tracing::debug!("Buffered candidate for {} rejected: {}", self.peer, e);
            }
        }
    }

    /// Attach `source` unless it is already attached. Returns whether it was new.
    pub async fn attach_local_source(&mut self, source: &LocalSource) -> Result<bool, NegotiationError> {
        if self.attached_sources.contains(&source.id) {
            return Ok(false);
        }
        self.engine.attach_local_source(source).await?;
        self.attached_sources.insert(source.id.clone());
        Ok(true)
    }

    /// Record a connectivity change. Returns `true` on a transition into a
    /// state that needs repair.
    pub fn on_connectivity(&mut self, state: ConnectivityState) -> bool {
        let previous = std::mem::replace(&mut self.connectivity, state);
        state.needs_repair() && !previous.needs_repair()
    }

    pub async fn close(&mut self) {
        self.pending_candidates.clear();
        if let Err(e) = self.engine.close().await {
            tracing::debug!("Closing engine for {}: {}", self.peer, e);
        }
    }
}
