//! Local capture: devices, tracks, streams and the controller that owns the
//! user's camera and microphone for one screen.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{ClientError, MediaError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackKind::Audio => f.write_str("microphone"),
            TrackKind::Video => f.write_str("camera"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackSource {
    Microphone,
    Camera,
    Screen,
}

impl TrackSource {
    pub fn kind(self) -> TrackKind {
        match self {
            TrackSource::Microphone => TrackKind::Audio,
            TrackSource::Camera | TrackSource::Screen => TrackKind::Video,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    AudioInput,
    AudioOutput,
    VideoInput,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub device_id: String,
    pub kind: DeviceKind,
    pub label: String,
}

#[derive(Debug)]
struct TrackInner {
    id: String,
    source: TrackSource,
    device_id: Option<String>,
    enabled: AtomicBool,
    ended: AtomicBool,
}

/// Handle to one capture track. Clones share the same underlying track, so
/// disabling or stopping through any handle is seen by all of them.
#[derive(Debug, Clone)]
pub struct MediaTrack {
    inner: Arc<TrackInner>,
}

impl MediaTrack {
    pub fn new(source: TrackSource, device_id: Option<String>) -> Self {
        Self {
            inner: Arc::new(TrackInner {
                id: Uuid::new_v4().to_string(),
                source,
                device_id,
                enabled: AtomicBool::new(true),
                ended: AtomicBool::new(false),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn kind(&self) -> TrackKind {
        self.inner.source.kind()
    }

    pub fn source(&self) -> TrackSource {
        self.inner.source
    }

    pub fn device_id(&self) -> Option<&str> {
        self.inner.device_id.as_deref()
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::SeqCst)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.inner.enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn is_live(&self) -> bool {
        !self.inner.ended.load(Ordering::SeqCst)
    }

    pub fn stop(&self) {
        if !self.inner.ended.swap(true, Ordering::SeqCst) {
            debug!(track = %self.id(), source = ?self.source(), "track stopped");
        }
    }

    pub fn same_track(&self, other: &MediaTrack) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

#[derive(Debug, Clone)]
pub struct MediaStream {
    id: String,
    tracks: Vec<MediaTrack>,
}

impl Default for MediaStream {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl MediaStream {
    pub fn new(tracks: Vec<MediaTrack>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            tracks,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn tracks(&self) -> &[MediaTrack] {
        &self.tracks
    }

    pub fn audio_tracks(&self) -> impl Iterator<Item = &MediaTrack> {
        self.tracks.iter().filter(|t| t.kind() == TrackKind::Audio)
    }

    pub fn video_tracks(&self) -> impl Iterator<Item = &MediaTrack> {
        self.tracks.iter().filter(|t| t.kind() == TrackKind::Video)
    }

    pub fn first(&self, kind: TrackKind) -> Option<&MediaTrack> {
        self.tracks.iter().find(|t| t.kind() == kind)
    }

    pub fn add_track(&mut self, track: MediaTrack) {
        if !self.tracks.iter().any(|t| t.same_track(&track)) {
            self.tracks.push(track);
        }
    }

    /// Removes every track of `kind` and hands them back.
    pub fn take_tracks(&mut self, kind: TrackKind) -> Vec<MediaTrack> {
        let (taken, kept) = std::mem::take(&mut self.tracks)
            .into_iter()
            .partition(|t| t.kind() == kind);
        self.tracks = kept;
        taken
    }

    pub fn has_live_tracks(&self) -> bool {
        self.tracks.iter().any(MediaTrack::is_live)
    }

    pub fn stop_all(&self) {
        for track in &self.tracks {
            track.stop();
        }
    }
}

/// What to capture for one kind of track.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TrackRequest {
    #[default]
    Disabled,
    Default,
    Device(String),
}

impl TrackRequest {
    pub fn is_requested(&self) -> bool {
        !matches!(self, TrackRequest::Disabled)
    }

    pub fn device_id(&self) -> Option<&str> {
        match self {
            TrackRequest::Device(id) => Some(id),
            _ => None,
        }
    }

    fn for_device(device_id: Option<&str>) -> Self {
        match device_id {
            Some(id) => TrackRequest::Device(id.to_string()),
            None => TrackRequest::Default,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MediaRequest {
    pub audio: TrackRequest,
    pub video: TrackRequest,
    pub noise_suppression: bool,
}

/// The capture side of the platform: device listing, camera/mic and display
/// capture.
#[async_trait]
pub trait MediaDevices: Send + Sync {
    async fn enumerate_devices(&self) -> std::result::Result<Vec<DeviceInfo>, MediaError>;

    async fn get_user_media(
        &self,
        request: &MediaRequest,
    ) -> std::result::Result<MediaStream, MediaError>;

    async fn get_display_media(&self) -> std::result::Result<MediaStream, MediaError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct LocalMediaState {
    pub camera_enabled: bool,
    pub mic_enabled: bool,
    pub selected_input_device_id: Option<String>,
    pub selected_camera_device_id: Option<String>,
    pub selected_output_device_id: Option<String>,
    pub volume: f32,
    pub noise_suppression: bool,
}

impl Default for LocalMediaState {
    fn default() -> Self {
        Self {
            camera_enabled: true,
            mic_enabled: true,
            selected_input_device_id: None,
            selected_camera_device_id: None,
            selected_output_device_id: None,
            volume: 1.0,
            noise_suppression: true,
        }
    }
}

/// Owner of the local camera/microphone stream and the toggles around it.
pub struct LocalMedia {
    devices: Arc<dyn MediaDevices>,
    stream: MediaStream,
    state: LocalMediaState,
    camera_available: bool,
    mic_available: bool,
    notices: Vec<String>,
}

impl LocalMedia {
    pub fn new(devices: Arc<dyn MediaDevices>) -> Self {
        Self {
            devices,
            stream: MediaStream::default(),
            state: LocalMediaState::default(),
            camera_available: false,
            mic_available: false,
            notices: Vec::new(),
        }
    }

    pub fn devices(&self) -> &Arc<dyn MediaDevices> {
        &self.devices
    }

    pub fn stream(&self) -> &MediaStream {
        &self.stream
    }

    pub fn state(&self) -> &LocalMediaState {
        &self.state
    }

    pub fn camera_available(&self) -> bool {
        self.camera_available
    }

    pub fn mic_available(&self) -> bool {
        self.mic_available
    }

    /// Messages for the user about capture problems, oldest first.
    pub fn notices(&self) -> &[String] {
        &self.notices
    }

    /// Names of the permissions still missing, for the permission overlay.
    pub fn missing_permissions(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if !self.camera_available {
            missing.push("Camera");
        }
        if !self.mic_available {
            missing.push("Microphone");
        }
        missing
    }

    /// Captures camera and microphone. When the combined request fails each
    /// kind is retried alone; a kind that still fails, or is missing from the
    /// captured stream, has its toggle disabled and a notice recorded.
    pub async fn acquire(&mut self) -> Result<()> {
        self.stream.stop_all();
        self.stream = MediaStream::default();
        self.notices.clear();

        let request = MediaRequest {
            audio: TrackRequest::for_device(self.state.selected_input_device_id.as_deref()),
            video: TrackRequest::for_device(self.state.selected_camera_device_id.as_deref()),
            noise_suppression: self.state.noise_suppression,
        };

        let (had_camera, had_mic) = (self.camera_available, self.mic_available);
        match self.devices.get_user_media(&request).await {
            Ok(stream) => {
                self.stream = stream;
                for kind in [TrackKind::Video, TrackKind::Audio] {
                    if self.stream.first(kind).is_none() {
                        self.notice_unavailable(kind, &MediaError::Unavailable(kind));
                    }
                }
                self.camera_available = self.stream.first(TrackKind::Video).is_some();
                self.mic_available = self.stream.first(TrackKind::Audio).is_some();
            }
            Err(err) => {
                debug!(%err, "combined capture failed, trying each device alone");
                self.camera_available = self
                    .acquire_single(TrackKind::Video, request.video.clone(), &request)
                    .await;
                self.mic_available = self
                    .acquire_single(TrackKind::Audio, request.audio.clone(), &request)
                    .await;
            }
        }

        // a kind that just came back starts out on, as on first capture
        if self.camera_available != had_camera {
            self.state.camera_enabled = self.camera_available;
        }
        if self.mic_available != had_mic {
            self.state.mic_enabled = self.mic_available;
        }
        if !self.camera_available {
            self.state.camera_enabled = false;
        }
        if !self.mic_available {
            self.state.mic_enabled = false;
        }
        self.apply_toggles();
        info!(
            camera = self.camera_available,
            mic = self.mic_available,
            "local media acquired"
        );
        Ok(())
    }

    async fn acquire_single(
        &mut self,
        kind: TrackKind,
        track: TrackRequest,
        base: &MediaRequest,
    ) -> bool {
        let request = match kind {
            TrackKind::Audio => MediaRequest {
                audio: track,
                video: TrackRequest::Disabled,
                noise_suppression: base.noise_suppression,
            },
            TrackKind::Video => MediaRequest {
                audio: TrackRequest::Disabled,
                video: track,
                noise_suppression: base.noise_suppression,
            },
        };
        match self.devices.get_user_media(&request).await {
            Ok(stream) => match stream.first(kind) {
                Some(track) => {
                    self.stream.add_track(track.clone());
                    true
                }
                None => {
                    self.notice_unavailable(kind, &MediaError::Unavailable(kind));
                    false
                }
            },
            Err(err) => {
                self.notice_unavailable(kind, &err);
                false
            }
        }
    }

    fn notice_unavailable(&mut self, kind: TrackKind, err: &MediaError) {
        warn!(%err, "{kind} unavailable");
        let message = match kind {
            TrackKind::Video => "Camera unavailable. Check camera permissions.",
            TrackKind::Audio => "Microphone unavailable. Check microphone permissions.",
        };
        self.notices.push(message.to_string());
    }

    fn apply_toggles(&self) {
        for track in self.stream.video_tracks() {
            track.set_enabled(self.state.camera_enabled);
        }
        for track in self.stream.audio_tracks() {
            track.set_enabled(self.state.mic_enabled);
        }
    }

    /// Flips the camera on or off without re-capturing.
    pub fn toggle_camera(&mut self) -> Result<bool> {
        if !self.camera_available {
            return Err(MediaError::Unavailable(TrackKind::Video).into());
        }
        self.state.camera_enabled = !self.state.camera_enabled;
        self.apply_toggles();
        Ok(self.state.camera_enabled)
    }

    /// Flips the microphone on or off without re-capturing.
    pub fn toggle_mic(&mut self) -> Result<bool> {
        if !self.mic_available {
            return Err(MediaError::Unavailable(TrackKind::Audio).into());
        }
        self.state.mic_enabled = !self.state.mic_enabled;
        self.apply_toggles();
        Ok(self.state.mic_enabled)
    }

    /// Switches the microphone to `device_id`. Afterwards the stream holds
    /// exactly one live audio track and it comes from that device.
    pub async fn select_input_device(&mut self, device_id: &str) -> Result<MediaTrack> {
        let track = self
            .capture_one(TrackKind::Audio, TrackRequest::Device(device_id.into()))
            .await?;
        self.swap_track(track.clone());
        self.state.selected_input_device_id = Some(device_id.to_string());
        self.mic_available = true;
        self.apply_toggles();
        info!(device = device_id, "microphone switched");
        Ok(track)
    }

    pub async fn select_camera(&mut self, device_id: &str) -> Result<MediaTrack> {
        let track = self
            .capture_one(TrackKind::Video, TrackRequest::Device(device_id.into()))
            .await?;
        self.swap_track(track.clone());
        self.state.selected_camera_device_id = Some(device_id.to_string());
        self.camera_available = true;
        self.apply_toggles();
        info!(device = device_id, "camera switched");
        Ok(track)
    }

    pub fn select_output_device(&mut self, device_id: &str) {
        self.state.selected_output_device_id = Some(device_id.to_string());
    }

    pub fn set_volume(&mut self, volume: f32) -> f32 {
        self.state.volume = if volume.is_nan() { 0.0 } else { volume.clamp(0.0, 1.0) };
        self.state.volume
    }

    /// Stores the preference and, when a microphone is live, re-captures it
    /// with the new setting. Returns the replacement track if there was one.
    pub async fn set_noise_suppression(&mut self, enabled: bool) -> Result<Option<MediaTrack>> {
        if self.state.noise_suppression == enabled {
            return Ok(None);
        }
        self.state.noise_suppression = enabled;
        if !self.mic_available {
            return Ok(None);
        }
        let request =
            TrackRequest::for_device(self.state.selected_input_device_id.as_deref());
        let track = self.capture_one(TrackKind::Audio, request).await?;
        self.swap_track(track.clone());
        self.apply_toggles();
        Ok(Some(track))
    }

    async fn capture_one(&self, kind: TrackKind, track: TrackRequest) -> Result<MediaTrack> {
        let request = match kind {
            TrackKind::Audio => MediaRequest {
                audio: track.clone(),
                video: TrackRequest::Disabled,
                noise_suppression: self.state.noise_suppression,
            },
            TrackKind::Video => MediaRequest {
                audio: TrackRequest::Disabled,
                video: track.clone(),
                noise_suppression: self.state.noise_suppression,
            },
        };
        let stream = self.devices.get_user_media(&request).await?;
        let captured = stream.take_first(kind).ok_or_else(|| {
            ClientError::from(MediaError::DeviceNotFound {
                kind,
                device_id: track.device_id().map(str::to_string),
            })
        })?;
        // stray tracks of the other kind are not ours to keep
        stream.stop_all_except(&captured);
        Ok(captured)
    }

    fn swap_track(&mut self, track: MediaTrack) {
        for old in self.stream.take_tracks(track.kind()) {
            old.stop();
        }
        self.stream.add_track(track);
    }

    pub fn stop(&mut self) {
        self.stream.stop_all();
    }
}

impl MediaStream {
    fn take_first(&self, kind: TrackKind) -> Option<MediaTrack> {
        self.first(kind).cloned()
    }

    fn stop_all_except(&self, keep: &MediaTrack) {
        for track in self.tracks.iter().filter(|t| !t.same_track(keep)) {
            track.stop();
        }
    }
}
