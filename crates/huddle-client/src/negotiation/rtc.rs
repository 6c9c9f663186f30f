//! Production engine backed by webrtc-rs.

use async_trait::async_trait;
use huddle_protocol::{IceCandidate, IceServer, SdpType, SessionDescription, SessionId};
use std::sync::Arc;
use webrtc::api::APIBuilder;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::policy::ice_transport_policy::RTCIceTransportPolicy;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::signaling_state::RTCSignalingState;
use webrtc::track::track_local::TrackLocal;

use super::engine::{
    ConnectivityState, EngineEvent, EngineEventSender, EngineFactory, LocalSource, PeerEngine,
    SignalingState,
};
use crate::error::EngineError;

pub struct RtcEngineFactory {
    ice_servers: Vec<IceServer>,
    relay_only: bool,
}

impl RtcEngineFactory {
    /// `relay_only` forces all media through TURN
    pub fn new(ice_servers: Vec<IceServer>, relay_only: bool) -> Self {
        Self {
            ice_servers,
            relay_only,
        }
    }

    fn configuration(&self) -> RTCConfiguration {
        let ice_servers = self
            .ice_servers
            .iter()
            .map(|server| RTCIceServer {
                urls: server.urls.clone(),
                username: server.username.clone().unwrap_or_default(),
                credential: server.credential.clone().unwrap_or_default(),
                ..Default::default()
            })
            .collect();

        RTCConfiguration {
            ice_servers,
            ice_transport_policy: if self.relay_only {
                RTCIceTransportPolicy::Relay
            } else {
                RTCIceTransportPolicy::All
            },
            ..Default::default()
        }
    }
}

#[async_trait]
impl EngineFactory for RtcEngineFactory {
    async fn create(
        &self,
        peer: &SessionId,
        generation: u64,
        events: EngineEventSender,
    ) -> Result<Box<dyn PeerEngine>, EngineError> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs()?;

        let registry = register_default_interceptors(Registry::new(), &mut media_engine)?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let pc = Arc::new(api.new_peer_connection(self.configuration()).await?);

        let candidate_tx = events.clone();
        let candidate_peer = peer.clone();
        pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let tx = candidate_tx.clone();
            let peer = candidate_peer.clone();
            Box::pin(async move {
                let Some(candidate) = candidate else {
                    return;
                };
                match candidate.to_json() {
                    Ok(init) => {
                        let _ = tx.send(EngineEvent::IceCandidate {
                            peer,
                            generation,
                            candidate: IceCandidate {
                                candidate: init.candidate,
                                sdp_mid: init.sdp_mid,
                                sdp_mline_index: init.sdp_mline_index,
                                username_fragment: init.username_fragment,
                            },
                        });
                    }
                    Err(e) => tracing::warn!("Failed to serialize local candidate: {}", e),
                }
            })
        }));

        let state_tx = events;
        let state_peer = peer.clone();
        pc.on_ice_connection_state_change(Box::new(move |state: RTCIceConnectionState| {
            let _ = state_tx.send(EngineEvent::ConnectivityChanged {
                peer: state_peer.clone(),
                generation,
                state: connectivity_from(state),
            });
            Box::pin(async {})
        }));

        let track_peer = peer.clone();
        pc.on_track(Box::new(move |track, _receiver, _transceiver| {
            tracing::info!(
                "Remote {:?} track {} from {}",
                track.kind(),
                track.id(),
                track_peer
            );
            Box::pin(async {})
        }));

        Ok(Box::new(RtcEngine { pc }))
    }
}

struct RtcEngine {
    pc: Arc<RTCPeerConnection>,
}

impl RtcEngine {
    async fn to_rtc(&self, desc: SessionDescription) -> Result<RTCSessionDescription, EngineError> {
        Ok(match desc.kind {
            SdpType::Offer => RTCSessionDescription::offer(desc.sdp)?,
            SdpType::Answer => RTCSessionDescription::answer(desc.sdp)?,
            SdpType::Rollback => {
                // webrtc-rs refuses a local rollback with an empty body
                let mut rollback = RTCSessionDescription::default();
                rollback.sdp_type = RTCSdpType::Rollback;
                if let Some(pending) = self.pc.pending_local_description().await {
                    rollback.sdp = pending.sdp;
                }
                rollback
            }
        })
    }
}

fn description_from(desc: RTCSessionDescription) -> Result<SessionDescription, EngineError> {
    match desc.sdp_type {
        RTCSdpType::Offer => Ok(SessionDescription::offer(desc.sdp)),
        RTCSdpType::Answer => Ok(SessionDescription::answer(desc.sdp)),
        other => Err(EngineError::InvalidState(format!(
            "unexpected description type {:?}",
            other
        ))),
    }
}

fn connectivity_from(state: RTCIceConnectionState) -> ConnectivityState {
    match state {
        RTCIceConnectionState::Checking => ConnectivityState::Checking,
        RTCIceConnectionState::Connected | RTCIceConnectionState::Completed => {
            ConnectivityState::Connected
        }
        RTCIceConnectionState::Disconnected => ConnectivityState::Disconnected,
        RTCIceConnectionState::Failed => ConnectivityState::Failed,
        RTCIceConnectionState::Closed => ConnectivityState::Closed,
        _ => ConnectivityState::New,
    }
}

#[async_trait]
impl PeerEngine for RtcEngine {
    async fn create_offer(&self) -> Result<SessionDescription, EngineError> {
        description_from(self.pc.create_offer(None).await?)
    }

    async fn create_answer(&self) -> Result<SessionDescription, EngineError> {
        description_from(self.pc.create_answer(None).await?)
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), EngineError> {
        let desc = self.to_rtc(desc).await?;
        self.pc.set_local_description(desc).await?;
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), EngineError> {
        let desc = self.to_rtc(desc).await?;
        self.pc.set_remote_description(desc).await?;
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), EngineError> {
        self.pc
            .add_ice_candidate(RTCIceCandidateInit {
                candidate: candidate.candidate,
                sdp_mid: candidate.sdp_mid,
                sdp_mline_index: candidate.sdp_mline_index,
                username_fragment: candidate.username_fragment,
            })
            .await?;
        Ok(())
    }

    fn signaling_state(&self) -> SignalingState {
        match self.pc.signaling_state() {
            RTCSignalingState::HaveLocalOffer | RTCSignalingState::HaveLocalPranswer => {
                SignalingState::HaveLocalOffer
            }
            RTCSignalingState::HaveRemoteOffer | RTCSignalingState::HaveRemotePranswer => {
                SignalingState::HaveRemoteOffer
            }
            RTCSignalingState::Closed => SignalingState::Closed,
            _ => SignalingState::Stable,
        }
    }

    fn connection_state(&self) -> ConnectivityState {
        connectivity_from(self.pc.ice_connection_state())
    }

    async fn attach_local_source(&self, source: &LocalSource) -> Result<(), EngineError> {
        let track: Arc<dyn TrackLocal + Send + Sync> = source.track.clone();
        self.pc.add_track(track).await?;
        Ok(())
    }

    async fn close(&self) -> Result<(), EngineError> {
        self.pc.close().await?;
        Ok(())
    }
}
