//! Seam between the negotiation logic and whatever actually moves media.

use async_trait::async_trait;
use huddle_protocol::{IceCandidate, SessionDescription, SessionId};
use std::sync::Arc;
use tokio::sync::mpsc;
use webrtc::api::media_engine::MIME_TYPE_OPUS;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

use crate::error::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalingState {
    Stable,
    HaveLocalOffer,
    HaveRemoteOffer,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityState {
    New,
    Checking,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl ConnectivityState {
    /// States that call for tearing the link down and starting over
    pub fn needs_repair(self) -> bool {
        matches!(self, ConnectivityState::Disconnected | ConnectivityState::Failed)
    }
}

/// Asynchronous notifications raised by an engine.
///
/// `generation` identifies the engine instance; once a peer is repaired the
/// old instance's events no longer match and are discarded.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    IceCandidate {
        peer: SessionId,
        generation: u64,
        candidate: IceCandidate,
    },
    ConnectivityChanged {
        peer: SessionId,
        generation: u64,
        state: ConnectivityState,
    },
}

impl EngineEvent {
    pub fn peer(&self) -> &SessionId {
        match self {
            EngineEvent::IceCandidate { peer, .. } | EngineEvent::ConnectivityChanged { peer, .. } => peer,
        }
    }

    pub fn generation(&self) -> u64 {
        match self {
            EngineEvent::IceCandidate { generation, .. }
            | EngineEvent::ConnectivityChanged { generation, .. } => *generation,
        }
    }
}

pub type EngineEventSender = mpsc::UnboundedSender<EngineEvent>;

/// A local audio track that every peer link should carry
#[derive(Clone)]
pub struct LocalSource {
    pub id: String,
    pub track: Arc<TrackLocalStaticSample>,
}

impl LocalSource {
    /// Opus track fed by an external capture pipeline
    pub fn opus(id: &str) -> Self {
        let track = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_owned(),
                clock_rate: 48000,
                channels: 2,
                ..Default::default()
            },
            "audio".to_owned(),
            id.to_owned(),
        ));

        Self {
            id: id.to_string(),
            track,
        }
    }
}

impl std::fmt::Debug for LocalSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalSource").field("id", &self.id).finish()
    }
}

/// One peer connection's worth of media engine
#[async_trait]
pub trait PeerEngine: Send + Sync {
    async fn create_offer(&self) -> Result<SessionDescription, EngineError>;

    async fn create_answer(&self) -> Result<SessionDescription, EngineError>;

    /// Accepts offers, answers, and rollbacks
    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), EngineError>;

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), EngineError>;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), EngineError>;

    fn signaling_state(&self) -> SignalingState;

    fn connection_state(&self) -> ConnectivityState;

    async fn attach_local_source(&self, source: &LocalSource) -> Result<(), EngineError>;

    async fn close(&self) -> Result<(), EngineError>;
}

/// Builds a fresh engine per peer, wired to report events on `events`
#[async_trait]
pub trait EngineFactory: Send + Sync {
    async fn create(
        &self,
        peer: &SessionId,
        generation: u64,
        events: EngineEventSender,
    ) -> Result<Box<dyn PeerEngine>, EngineError>;
}
