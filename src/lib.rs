//! Client core for WolfConf meetings: talks to the conferencing backend over
//! REST and a signaling WebSocket, and owns the local media, peer, roster and
//! chat state of a single meeting. The media engine itself sits behind the
//! [`media::MediaDevices`] and [`peer::PeerConnection`] traits.

pub mod api;
pub mod app_state;
pub mod auth;
pub mod chat;
pub mod config;
pub mod error;
pub mod loopback;
pub mod media;
pub mod negotiation;
pub mod peer;
pub mod prejoin;
pub mod recording;
pub mod room;
pub mod roster;
pub mod schedule;
pub mod signal;
pub mod signaling;
pub mod translation;

pub use app_state::AppState;
pub use config::ClientConfig;
pub use error::{ClientError, Result};
pub use room::{MeetingRoom, RoomCommand, RoomContext};
