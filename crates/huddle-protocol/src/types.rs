use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Group assigned to sessions that join without naming one
pub const DEFAULT_GROUP: &str = "default";

pub fn default_group() -> String {
    DEFAULT_GROUP.to_string()
}

/// Opaque session identifier assigned by the relay.
///
/// Clients never mint these; they only compare them. The derived ordering is
/// byte-wise lexicographic, which both sides of a pair compute identically.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    User,
    Admin,
}

/// Roster entry describing another member of the room
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PeerInfo {
    pub client_id: SessionId,
    pub name: String,
    pub muted: bool,
    #[serde(default = "default_group")]
    pub group: String,
    #[serde(default)]
    pub role: Role,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
    Rollback,
}

/// SDP blob as produced by the media engine
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpType,
    #[serde(default)]
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpType::Answer,
            sdp: sdp.into(),
        }
    }

    pub fn rollback() -> Self {
        Self {
            kind: SdpType::Rollback,
            sdp: String::new(),
        }
    }
}

/// ICE candidate in the browser's `RTCIceCandidateInit` shape
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default)]
    pub sdp_mid: Option<String>,
    #[serde(default, rename = "sdpMLineIndex")]
    pub sdp_mline_index: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_mline_index: None,
            username_fragment: None,
        }
    }
}

#[derive(Error, Debug)]
pub enum PayloadError {
    #[error("Signal payload carries neither sdp nor candidate")]
    Empty,

    #[error("Malformed signal payload: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Typed view of the opaque `payload` carried by `signal` messages.
///
/// The relay forwards payloads as raw JSON; only clients decode them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum SignalPayload {
    Description { sdp: SessionDescription },
    Candidate { candidate: IceCandidate },
}

impl SignalPayload {
    pub fn from_value(value: serde_json::Value) -> Result<Self, PayloadError> {
        if value.get("sdp").is_none() && value.get("candidate").is_none() {
            return Err(PayloadError::Empty);
        }
        Ok(serde_json::from_value(value)?)
    }

    pub fn to_value(&self) -> serde_json::Value {
        // Both variants are plain structs of strings, serialization cannot fail
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// ICE server configuration for WebRTC
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IceServer {
    pub urls: Vec<String>,
    pub username: Option<String>,
    pub credential: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_session_id_order_is_lexicographic() {
        assert!(SessionId::from("1111") < SessionId::from("9999"));
        assert!(SessionId::from("a") < SessionId::from("ab"));
        assert!(SessionId::from("B") < SessionId::from("a"));
    }

    #[test]
    fn test_payload_parses_browser_candidate() {
        let value = json!({
            "candidate": {
                "candidate": "candidate:1 1 udp 2122260223 10.0.0.2 54321 typ host",
                "sdpMid": "0",
                "sdpMLineIndex": 0,
                "usernameFragment": "abcd"
            }
        });

        let payload = SignalPayload::from_value(value).unwrap();
        match payload {
            SignalPayload::Candidate { candidate } => {
                assert_eq!(candidate.sdp_mid.as_deref(), Some("0"));
                assert_eq!(candidate.sdp_mline_index, Some(0));
                assert_eq!(candidate.username_fragment.as_deref(), Some("abcd"));
            }
            other => panic!("expected candidate, got {:?}", other),
        }
    }

    #[test]
    fn test_payload_parses_offer() {
        let value = json!({ "sdp": { "type": "offer", "sdp": "v=0" } });
        let payload = SignalPayload::from_value(value).unwrap();
        assert_eq!(
            payload,
            SignalPayload::Description {
                sdp: SessionDescription::offer("v=0")
            }
        );
    }

    #[test]
    fn test_empty_payload_is_rejected() {
        assert!(matches!(
            SignalPayload::from_value(json!({})),
            Err(PayloadError::Empty)
        ));
        assert!(matches!(
            SignalPayload::from_value(json!({ "sdp": { "type": "bogus" } })),
            Err(PayloadError::Malformed(_))
        ));
    }

    #[test]
    fn test_peer_info_defaults_group_and_role() {
        let info: PeerInfo =
            serde_json::from_value(json!({ "clientId": "x", "name": "Ana", "muted": false }))
                .unwrap();
        assert_eq!(info.group, DEFAULT_GROUP);
        assert_eq!(info.role, Role::User);
    }
}
