use serde::{Deserialize, Serialize};

use crate::roster::string_or_number;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDescription {
    pub kind: SdpType,
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
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(rename = "sdpMid", default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(rename = "sdpMLineIndex", default, skip_serializing_if = "Option::is_none")]
    pub sdp_m_line_index: Option<u16>,
}

// Messages exchanged over the meeting's signaling socket, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SignalMessage {
    #[serde(rename = "offer")]
    Offer { sdp: String },
    #[serde(rename = "answer")]
    Answer { sdp: String },
    #[serde(rename = "ice-candidate")]
    IceCandidate { candidate: IceCandidate },
    #[serde(rename = "screenshare-started")]
    ScreenShareStarted {
        #[serde(deserialize_with = "string_or_number")]
        user_id: String,
        full_name: String,
    },
    #[serde(rename = "screenshare-stopped")]
    ScreenShareStopped {
        #[serde(deserialize_with = "string_or_number")]
        user_id: String,
        #[serde(default)]
        full_name: Option<String>,
    },
    #[serde(rename = "chat-message")]
    ChatMessage {
        #[serde(deserialize_with = "string_or_number")]
        id: String,
        #[serde(default)]
        user_full_name: Option<String>,
        content: String,
    },
    #[serde(rename = "user_left")]
    UserLeft {
        #[serde(deserialize_with = "string_or_number")]
        user_id: String,
    },
    #[serde(other)]
    Unknown,
}

impl SignalMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            SignalMessage::Offer { .. } => "offer",
            SignalMessage::Answer { .. } => "answer",
            SignalMessage::IceCandidate { .. } => "ice-candidate",
            SignalMessage::ScreenShareStarted { .. } => "screenshare-started",
            SignalMessage::ScreenShareStopped { .. } => "screenshare-stopped",
            SignalMessage::ChatMessage { .. } => "chat-message",
            SignalMessage::UserLeft { .. } => "user_left",
            SignalMessage::Unknown => "unknown",
        }
    }

    pub fn description(&self) -> Option<SessionDescription> {
        match self {
            SignalMessage::Offer { sdp } => Some(SessionDescription::offer(sdp.clone())),
            SignalMessage::Answer { sdp } => Some(SessionDescription::answer(sdp.clone())),
            _ => None,
        }
    }
}

impl From<SessionDescription> for SignalMessage {
    fn from(desc: SessionDescription) -> Self {
        match desc.kind {
            SdpType::Offer => SignalMessage::Offer { sdp: desc.sdp },
            SdpType::Answer => SignalMessage::Answer { sdp: desc.sdp },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_inbound_kinds() {
        let offer: SignalMessage = serde_json::from_value(json!({"type": "offer", "sdp": "v=0"})).unwrap();
        assert_eq!(offer.description(), Some(SessionDescription::offer("v=0")));

        let ice: SignalMessage = serde_json::from_value(json!({
            "type": "ice-candidate",
            "candidate": {"candidate": "candidate:1 1 udp 1 10.0.0.2 5000 typ host", "sdpMid": "0", "sdpMLineIndex": 0}
        }))
        .unwrap();
        match ice {
            SignalMessage::IceCandidate { candidate } => {
                assert_eq!(candidate.sdp_mid.as_deref(), Some("0"));
                assert_eq!(candidate.sdp_m_line_index, Some(0));
            }
            other => panic!("unexpected {other:?}"),
        }

        let started: SignalMessage = serde_json::from_value(json!({
            "type": "screenshare-started", "user_id": "7", "full_name": "Ada"
        }))
        .unwrap();
        assert_eq!(started.kind(), "screenshare-started");

        let stopped: SignalMessage =
            serde_json::from_value(json!({"type": "screenshare-stopped", "user_id": "7"})).unwrap();
        assert_eq!(
            stopped,
            SignalMessage::ScreenShareStopped { user_id: "7".into(), full_name: None }
        );

        let left: SignalMessage = serde_json::from_value(json!({"type": "user_left", "user_id": 9})).unwrap();
        assert_eq!(left, SignalMessage::UserLeft { user_id: "9".into() });
    }

    #[test]
    fn unknown_types_do_not_fail() {
        let msg: SignalMessage =
            serde_json::from_value(json!({"type": "reaction", "emoji": "+1"})).unwrap();
        assert_eq!(msg, SignalMessage::Unknown);
    }

    #[test]
    fn outbound_shape() {
        let text = serde_json::to_value(SignalMessage::from(SessionDescription::answer("v=0"))).unwrap();
        assert_eq!(text, json!({"type": "answer", "sdp": "v=0"}));

        let ice = SignalMessage::IceCandidate {
            candidate: IceCandidate {
                candidate: "candidate:x".into(),
                sdp_mid: None,
                sdp_m_line_index: Some(1),
            },
        };
        assert_eq!(
            serde_json::to_value(ice).unwrap(),
            json!({"type": "ice-candidate", "candidate": {"candidate": "candidate:x", "sdpMLineIndex": 1}})
        );
    }
}
