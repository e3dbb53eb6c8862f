//! Device setup before entering a meeting.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use tracing::{info, warn};

use crate::error::{ClientError, Result};
use crate::media::{DeviceInfo, DeviceKind, LocalMedia, MediaDevices, MediaTrack};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Background {
    #[default]
    None,
    BlurLight,
    BlurHeavy,
    VirtualOffice,
    VirtualLivingRoom,
}

impl Background {
    pub const ALL: [Background; 5] = [
        Background::None,
        Background::BlurLight,
        Background::BlurHeavy,
        Background::VirtualOffice,
        Background::VirtualLivingRoom,
    ];

    pub fn code(self) -> &'static str {
        match self {
            Background::None => "none",
            Background::BlurLight => "blur-light",
            Background::BlurHeavy => "blur-heavy",
            Background::VirtualOffice => "virtual-office",
            Background::VirtualLivingRoom => "virtual-livingroom",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Background::None => "None (Real Background)",
            Background::BlurLight => "Light Blur",
            Background::BlurHeavy => "Heavy Blur",
            Background::VirtualOffice => "Virtual: Office",
            Background::VirtualLivingRoom => "Virtual: Living Room",
        }
    }

    pub fn is_virtual(self) -> bool {
        self.code().starts_with("virtual-")
    }
}

impl FromStr for Background {
    type Err = ClientError;

    fn from_str(code: &str) -> Result<Self> {
        Background::ALL
            .into_iter()
            .find(|b| b.code() == code)
            .ok_or_else(|| ClientError::Validation(format!("unknown background {code:?}")))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Language {
    #[default]
    English,
    Spanish,
    French,
}

impl Language {
    pub fn code(self) -> &'static str {
        match self {
            Language::English => "en",
            Language::Spanish => "es",
            Language::French => "fr",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Language::English => "English",
            Language::Spanish => "Spanish",
            Language::French => "French",
        })
    }
}

impl FromStr for Language {
    type Err = ClientError;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "en" | "english" => Ok(Language::English),
            "es" | "spanish" => Ok(Language::Spanish),
            "fr" | "french" => Ok(Language::French),
            other => Err(ClientError::Validation(format!("unsupported language {other:?}"))),
        }
    }
}

/// Everything the meeting room needs from the pre-join screen. Moving it
/// into the room moves the live preview stream along with it.
pub struct JoinSettings {
    pub session_id: String,
    pub display_name: String,
    pub remember_name: bool,
    pub background: Background,
    pub language: Language,
    pub media: LocalMedia,
}

pub struct PreJoin {
    session_id: String,
    devices: Vec<DeviceInfo>,
    media: LocalMedia,
    display_name: String,
    remember_name: bool,
    background: Background,
    language: Language,
}

impl PreJoin {
    /// Lists devices and starts the preview. Capture problems do not fail
    /// the screen; they show up as notices and disabled toggles.
    pub async fn open(session_id: impl Into<String>, devices: Arc<dyn MediaDevices>) -> Result<Self> {
        let session_id = session_id.into();
        let listed = match devices.enumerate_devices().await {
            Ok(listed) => listed,
            Err(err) => {
                warn!(%err, "could not list devices");
                Vec::new()
            }
        };
        let mut media = LocalMedia::new(devices);
        media.acquire().await?;
        info!(session = %session_id, devices = listed.len(), "pre-join ready");

        Ok(Self {
            session_id,
            devices: listed,
            media,
            display_name: String::new(),
            remember_name: false,
            background: Background::default(),
            language: Language::default(),
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn devices(&self, kind: DeviceKind) -> impl Iterator<Item = &DeviceInfo> {
        self.devices.iter().filter(move |d| d.kind == kind)
    }

    pub fn media(&self) -> &LocalMedia {
        &self.media
    }

    pub fn media_mut(&mut self) -> &mut LocalMedia {
        &mut self.media
    }

    /// Re-runs capture, for the "Retry Permissions" button.
    pub async fn retry_permissions(&mut self) -> Result<Vec<&'static str>> {
        self.media.acquire().await?;
        Ok(self.media.missing_permissions())
    }

    pub fn set_display_name(&mut self, name: &str, remember: bool) {
        self.display_name = name.to_string();
        self.remember_name = remember;
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn set_background(&mut self, background: Background) {
        self.background = background;
    }

    pub fn background(&self) -> Background {
        self.background
    }

    pub fn set_language(&mut self, language: Language) {
        self.language = language;
    }

    pub fn language(&self) -> Language {
        self.language
    }

    pub async fn select_microphone(&mut self, device_id: &str) -> Result<MediaTrack> {
        self.media.select_input_device(device_id).await
    }

    pub async fn select_camera(&mut self, device_id: &str) -> Result<MediaTrack> {
        self.media.select_camera(device_id).await
    }

    /// Hands the configuration, live preview included, to the meeting room.
    /// On success this screen keeps an empty media controller.
    pub fn join(&mut self) -> Result<JoinSettings> {
        let name = self.display_name.trim().to_string();
        if name.is_empty() {
            return Err(ClientError::Validation("Enter your name".into()));
        }
        let fresh = LocalMedia::new(self.media.devices().clone());
        Ok(JoinSettings {
            session_id: self.session_id.clone(),
            display_name: name,
            remember_name: self.remember_name,
            background: self.background,
            language: self.language,
            media: std::mem::replace(&mut self.media, fresh),
        })
    }

    /// Leaves without joining; the preview is released.
    pub fn leave(mut self) {
        self.media.stop();
    }
}
