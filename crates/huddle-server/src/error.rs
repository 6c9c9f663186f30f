use huddle_protocol::SessionId;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RelayError {
    /// Room/key mismatch or empty credentials; terminal for the connection
    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    #[error("Unknown session: {0}")]
    UnknownSession(SessionId),

    #[error("Delivery to {0} failed")]
    Delivery(SessionId),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, RelayError>;
