use thiserror::Error;

use crate::media::TrackKind;
use crate::negotiation::NegotiationError;

pub type Result<T> = std::result::Result<T, ClientError>;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("not signed in")]
    NotAuthenticated,

    #[error("{0}")]
    Validation(String),

    #[error("backend returned {status}: {detail}")]
    Api { status: u16, detail: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("signaling connection closed")]
    SignalingClosed,

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Media(#[from] MediaError),

    #[error(transparent)]
    Peer(#[from] PeerError),

    #[error(transparent)]
    Negotiation(#[from] NegotiationError),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MediaError {
    #[error("permission denied for {0}")]
    PermissionDenied(TrackKind),

    #[error("no {kind} device matches {device_id:?}")]
    DeviceNotFound {
        kind: TrackKind,
        device_id: Option<String>,
    },

    #[error("{0} is not available")]
    Unavailable(TrackKind),

    #[error("capture aborted: {0}")]
    Aborted(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PeerError {
    #[error("peer connection is closed")]
    Closed,

    #[error("unknown sender {0}")]
    UnknownSender(String),

    #[error("invalid session description: {0}")]
    InvalidDescription(String),

    #[error("invalid ice candidate: {0}")]
    InvalidCandidate(String),
}
