use huddle_protocol::{PayloadError, SessionId};
use thiserror::Error;

/// Failures reported by a media engine
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("WebRTC error: {0}")]
    WebRtc(#[from] webrtc::Error),

    #[error("Invalid signaling transition: {0}")]
    InvalidState(String),
}

/// Failures while negotiating with one peer. Never fatal to the peer set.
#[derive(Error, Debug)]
pub enum NegotiationError {
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Payload(#[from] PayloadError),

    #[error("No negotiation session for {0}")]
    UnknownPeer(SessionId),
}

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("WebSocket error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),
}
