use huddle_protocol::{ClientMessage, IceCandidate, SessionDescription, SessionId, SignalPayload};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

use super::engine::{EngineEvent, EngineEventSender, EngineFactory, LocalSource};
use super::policy::is_polite;
use super::session::NegotiationSession;
use crate::error::NegotiationError;

/// Repairs of one peer within this window count towards the warning
const REPAIR_WINDOW: Duration = Duration::from_secs(60);
const REPAIR_WARN_THRESHOLD: usize = 3;

/// All negotiation sessions of one joined client, keyed by remote session id.
///
/// Failures stay local to the peer they happened on; nothing here tears down
/// the whole set except [`PeerSet::close_all`].
pub struct PeerSet {
    local_id: SessionId,
    factory: Arc<dyn EngineFactory>,
    outbound: mpsc::UnboundedSender<ClientMessage>,
    events: EngineEventSender,
    sessions: HashMap<SessionId, NegotiationSession>,
    next_generation: u64,
    local_source: Option<LocalSource>,
    repairs: HashMap<SessionId, VecDeque<Instant>>,
}

impl PeerSet {
    pub fn new(
        local_id: SessionId,
        factory: Arc<dyn EngineFactory>,
        outbound: mpsc::UnboundedSender<ClientMessage>,
        events: EngineEventSender,
    ) -> Self {
        Self {
            local_id,
            factory,
            outbound,
            events,
            sessions: HashMap::new(),
            next_generation: 1,
            local_source: None,
            repairs: HashMap::new(),
        }
    }

    pub fn contains(&self, peer: &SessionId) -> bool {
        self.sessions.contains_key(peer)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn session(&self, peer: &SessionId) -> Option<&NegotiationSession> {
        self.sessions.get(peer)
    }

    /// Get the session for `peer`, creating it (and its engine) on first use.
    pub async fn ensure(&mut self, peer: &SessionId) -> Result<&mut NegotiationSession, NegotiationError> {
        if !self.sessions.contains_key(peer) {
            let session = self.create_session(peer).await?;
            self.sessions.insert(peer.clone(), session);
        }
        self.sessions
            .get_mut(peer)
            .ok_or_else(|| NegotiationError::UnknownPeer(peer.clone()))
    }

    async fn create_session(&mut self, peer: &SessionId) -> Result<NegotiationSession, NegotiationError> {
        let generation = self.next_generation;
        self.next_generation += 1;

        let engine = self
            .factory
            .create(peer, generation, self.events.clone())
            .await?;
        let polite = is_polite(&self.local_id, peer);
        let mut session = NegotiationSession::new(peer.clone(), polite, generation, engine);

        if let Some(source) = &self.local_source {
            session.attach_local_source(source).await?;
        }

        tracing::debug!(
            "Created negotiation session for {} (generation {}, polite: {})",
            peer,
            generation,
            polite
        );
        Ok(session)
    }

    /// Start a link to a newly authorized peer. Only the impolite side offers.
    pub async fn connect_to(&mut self, peer: &SessionId) -> Result<(), NegotiationError> {
        let polite = self.ensure(peer).await?.is_polite();
        if polite {
            return Ok(());
        }
        self.offer_to(peer).await
    }

    pub async fn offer_to(&mut self, peer: &SessionId) -> Result<(), NegotiationError> {
        let offer = self.ensure(peer).await?.make_offer().await?;
        self.send_description(peer, offer);
        Ok(())
    }

    /// Apply an already-authorized `signal` payload from `from`.
    pub async fn handle_signal(
        &mut self,
        from: &SessionId,
        payload: serde_json::Value,
    ) -> Result<(), NegotiationError> {
        match SignalPayload::from_value(payload)? {
            SignalPayload::Description { sdp } => {
                let answer = self.ensure(from).await?.handle_description(sdp).await?;
                if let Some(answer) = answer {
                    self.send_description(from, answer);
                }
            }
            SignalPayload::Candidate { candidate } => {
                self.ensure(from).await?.handle_candidate(candidate).await?;
            }
        }
        Ok(())
    }

    /// React to an engine notification, discarding ones from replaced engines.
    pub async fn handle_engine_event(&mut self, event: EngineEvent) -> Result<(), NegotiationError> {
        let current = self.sessions.get(event.peer()).map(|s| s.generation());
        if current != Some(event.generation()) {
            tracing::debug!(
                "Ignoring event for {} from stale engine generation {}",
                event.peer(),
                event.generation()
            );
            return Ok(());
        }

        match event {
            EngineEvent::IceCandidate { peer, candidate, .. } => {
                self.send_candidate(&peer, candidate);
            }
            EngineEvent::ConnectivityChanged { peer, state, .. } => {
                let needs_repair = match self.sessions.get_mut(&peer) {
                    Some(session) => session.on_connectivity(state),
                    None => false,
                };
                tracing::debug!("Connectivity with {} is now {:?}", peer, state);
                if needs_repair {
                    self.repair(&peer).await?;
                }
            }
        }
        Ok(())
    }

    /// Tear the link down and start over with a fresh engine.
    pub async fn repair(&mut self, peer: &SessionId) -> Result<(), NegotiationError> {
        self.note_repair(peer);
        self.close_session(peer).await;

        let polite = self.ensure(peer).await?.is_polite();
        if !polite {
            self.offer_to(peer).await?;
        }
        Ok(())
    }

    fn note_repair(&mut self, peer: &SessionId) {
        let now = Instant::now();
        let history = self.repairs.entry(peer.clone()).or_default();
        while history
            .front()
            .is_some_and(|t| now.duration_since(*t) > REPAIR_WINDOW)
        {
            history.pop_front();
        }
        history.push_back(now);

        if history.len() >= REPAIR_WARN_THRESHOLD {
            tracing::warn!(
                "Link to {} repaired {} times in the last {:?}",
                peer,
                history.len(),
                REPAIR_WINDOW
            );
        } else {
            tracing::info!("Repairing link to {}", peer);
        }
    }

    /// The peer left the room: drop its link and its repair history.
    pub async fn remove(&mut self, peer: &SessionId) -> bool {
        self.repairs.remove(peer);
        self.close_session(peer).await
    }

    async fn close_session(&mut self, peer: &SessionId) -> bool {
        match self.sessions.remove(peer) {
            Some(mut session) => {
                session.close().await;
                true
            }
            None => false,
        }
    }

    /// Make `source` part of every current and future link.
    pub async fn set_local_source(&mut self, source: LocalSource) {
        let mut renegotiate = Vec::new();
        for (peer, session) in self.sessions.iter_mut() {
            match session.attach_local_source(&source).await {
                // Links that already negotiated need a new round to carry it
                Ok(true) if session.has_remote_description() => renegotiate.push(peer.clone()),
                Ok(_) => {}
                Err(e) => tracing::warn!("Failed to attach {} to {}: {}", source.id, peer, e),
            }
        }
        self.local_source = Some(source);

        for peer in renegotiate {
            if let Err(e) = self.offer_to(&peer).await {
                tracing::warn!("Renegotiation with {} failed: {}", peer, e);
            }
        }
    }

    pub async fn close_all(&mut self) {
        for (_, mut session) in self.sessions.drain() {
            session.close().await;
        }
        self.repairs.clear();
    }

    fn send_description(&self, peer: &SessionId, sdp: SessionDescription) {
        self.send(peer, SignalPayload::Description { sdp });
    }

    fn send_candidate(&self, peer: &SessionId, candidate: IceCandidate) {
        self.send(peer, SignalPayload::Candidate { candidate });
    }

    fn send(&self, peer: &SessionId, payload: SignalPayload) {
        let message = ClientMessage::Signal {
            target_id: peer.clone(),
            payload: payload.to_value(),
        };
        if self.outbound.send(message).is_err() {
            tracing::debug!("Control channel gone, dropping signal to {}", peer);
        }
    }
}
