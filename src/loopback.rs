//! In-process stand-ins for the platform media stack: synthetic capture
//! devices and a peer connection that negotiates with nobody. Used for
//! headless runs and throughout the tests.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use crate::error::{MediaError, PeerError};
use crate::media::{
    DeviceInfo, DeviceKind, MediaDevices, MediaRequest, MediaStream, MediaTrack, TrackKind,
    TrackRequest, TrackSource,
};
use crate::peer::{
    PeerConnection, PeerConnectionFactory, PeerConnectionState, PeerEvent, SenderId,
};
use crate::signal::{IceCandidate, SessionDescription};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct LoopbackDevices {
    devices: Vec<DeviceInfo>,
    denied: HashSet<TrackKind>,
    deny_display: bool,
    captures: AtomicUsize,
    last_request: Mutex<Option<MediaRequest>>,
}

impl Default for LoopbackDevices {
    fn default() -> Self {
        let device = |id: &str, kind, label: &str| DeviceInfo {
            device_id: id.into(),
            kind,
            label: label.into(),
        };
        Self::with_devices(vec![
            device("mic-1", DeviceKind::AudioInput, "Built-in Microphone"),
            device("mic-2", DeviceKind::AudioInput, "USB Headset"),
            device("cam-1", DeviceKind::VideoInput, "Built-in Camera"),
            device("cam-2", DeviceKind::VideoInput, "External Camera"),
            device("spk-1", DeviceKind::AudioOutput, "Speakers"),
        ])
    }
}

impl LoopbackDevices {
    pub fn with_devices(devices: Vec<DeviceInfo>) -> Self {
        Self {
            devices,
            denied: HashSet::new(),
            deny_display: false,
            captures: AtomicUsize::new(0),
            last_request: Mutex::new(None),
        }
    }

    /// Refuse capture of `kind`, like a user clicking "Block".
    pub fn deny(mut self, kind: TrackKind) -> Self {
        self.denied.insert(kind);
        self
    }

    pub fn deny_display(mut self) -> Self {
        self.deny_display = true;
        self
    }

    pub fn capture_count(&self) -> usize {
        self.captures.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<MediaRequest> {
        lock(&self.last_request).clone()
    }

    fn resolve(&self, kind: TrackKind, request: &TrackRequest) -> Result<Option<MediaTrack>, MediaError> {
        if !request.is_requested() {
            return Ok(None);
        }
        if self.denied.contains(&kind) {
            return Err(MediaError::PermissionDenied(kind));
        }
        let device_kind = match kind {
            TrackKind::Audio => DeviceKind::AudioInput,
            TrackKind::Video => DeviceKind::VideoInput,
        };
        let device = self.devices.iter().find(|d| {
            d.kind == device_kind && request.device_id().map_or(true, |id| id == d.device_id)
        });
        let Some(device) = device else {
            return Err(MediaError::DeviceNotFound {
                kind,
                device_id: request.device_id().map(str::to_string),
            });
        };
        let source = match kind {
            TrackKind::Audio => TrackSource::Microphone,
            TrackKind::Video => TrackSource::Camera,
        };
        Ok(Some(MediaTrack::new(source, Some(device.device_id.clone()))))
    }
}

#[async_trait]
impl MediaDevices for LoopbackDevices {
    async fn enumerate_devices(&self) -> Result<Vec<DeviceInfo>, MediaError> {
        Ok(self.devices.clone())
    }

    async fn get_user_media(&self, request: &MediaRequest) -> Result<MediaStream, MediaError> {
        *lock(&self.last_request) = Some(request.clone());
        if !request.audio.is_requested() && !request.video.is_requested() {
            return Err(MediaError::Aborted("nothing requested".into()));
        }
        let audio = self.resolve(TrackKind::Audio, &request.audio)?;
        let video = self.resolve(TrackKind::Video, &request.video)?;
        self.captures.fetch_add(1, Ordering::SeqCst);
        Ok(MediaStream::new(audio.into_iter().chain(video).collect()))
    }

    async fn get_display_media(&self) -> Result<MediaStream, MediaError> {
        if self.deny_display {
            return Err(MediaError::Aborted("screen capture cancelled".into()));
        }
        Ok(MediaStream::new(vec![MediaTrack::new(TrackSource::Screen, None)]))
    }
}

/// Everything a [`LoopbackPeer`] was asked to do, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerOp {
    CreateOffer,
    CreateAnswer,
    SetLocal(String),
    SetRemote(String),
    AddIceCandidate(String),
    AddTrack { sender: SenderId, track: String },
    ReplaceTrack { sender: SenderId, track: Option<String> },
    Close,
}

#[derive(Default)]
struct PeerInner {
    ops: Vec<PeerOp>,
    senders: Vec<SenderId>,
    has_local: bool,
    has_remote: bool,
    connected: bool,
    closed: bool,
    version: u32,
}

pub struct LoopbackPeer {
    id: String,
    events: mpsc::UnboundedSender<PeerEvent>,
    inner: Mutex<PeerInner>,
}

impl LoopbackPeer {
    pub fn new(events: mpsc::UnboundedSender<PeerEvent>) -> Self {
        Self {
            id: Uuid::new_v4().simple().to_string(),
            events,
            inner: Mutex::new(PeerInner::default()),
        }
    }

    pub fn ops(&self) -> Vec<PeerOp> {
        lock(&self.inner).ops.clone()
    }

    pub fn sender_count(&self) -> usize {
        lock(&self.inner).senders.len()
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.inner).closed
    }

    fn emit(&self, event: PeerEvent) {
        // nobody listening is fine; the room may be gone already
        let _ = self.events.send(event);
    }

    fn check_open(inner: &PeerInner) -> Result<(), PeerError> {
        if inner.closed {
            Err(PeerError::Closed)
        } else {
            Ok(())
        }
    }

    fn describe(&self, inner: &mut PeerInner, kind: &str) -> String {
        inner.version += 1;
        format!(
            "v=0\r\no=- {} {} IN IP4 127.0.0.1\r\ns=loopback {kind}\r\nt=0 0\r\n",
            self.id, inner.version
        )
    }

    fn maybe_connect(&self, inner: &mut PeerInner) {
        if inner.has_local && inner.has_remote && !inner.connected {
            inner.connected = true;
            self.emit(PeerEvent::StateChanged(PeerConnectionState::Connected));
        }
    }
}

#[async_trait]
impl PeerConnection for LoopbackPeer {
    async fn create_offer(&self) -> Result<SessionDescription, PeerError> {
        let mut inner = lock(&self.inner);
        Self::check_open(&inner)?;
        inner.ops.push(PeerOp::CreateOffer);
        let sdp = self.describe(&mut inner, "offer");
        Ok(SessionDescription::offer(sdp))
    }

    async fn create_answer(&self) -> Result<SessionDescription, PeerError> {
        let mut inner = lock(&self.inner);
        Self::check_open(&inner)?;
        if !inner.has_remote {
            return Err(PeerError::InvalidDescription("answer before remote offer".into()));
        }
        inner.ops.push(PeerOp::CreateAnswer);
        let sdp = self.describe(&mut inner, "answer");
        Ok(SessionDescription::answer(sdp))
    }

    async fn set_local_description(&self, desc: &SessionDescription) -> Result<(), PeerError> {
        let mut inner = lock(&self.inner);
        Self::check_open(&inner)?;
        inner.ops.push(PeerOp::SetLocal(desc.sdp.clone()));
        let first = !inner.has_local;
        inner.has_local = true;
        if first {
            self.emit(PeerEvent::LocalCandidate(IceCandidate {
                candidate: format!("candidate:{} 1 udp 2130706431 127.0.0.1 9 typ host", self.id),
                sdp_mid: Some("0".into()),
                sdp_m_line_index: Some(0),
            }));
        }
        self.maybe_connect(&mut inner);
        Ok(())
    }

    async fn set_remote_description(&self, desc: &SessionDescription) -> Result<(), PeerError> {
        if !desc.sdp.starts_with("v=0") {
            return Err(PeerError::InvalidDescription("missing version line".into()));
        }
        let mut inner = lock(&self.inner);
        Self::check_open(&inner)?;
        inner.ops.push(PeerOp::SetRemote(desc.sdp.clone()));
        inner.has_remote = true;
        self.maybe_connect(&mut inner);
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: &IceCandidate) -> Result<(), PeerError> {
        let mut inner = lock(&self.inner);
        Self::check_open(&inner)?;
        if candidate.candidate.is_empty() {
            return Err(PeerError::InvalidCandidate("empty candidate".into()));
        }
        inner.ops.push(PeerOp::AddIceCandidate(candidate.candidate.clone()));
        Ok(())
    }

    fn add_track(&self, track: &MediaTrack, stream_id: &str) -> Result<SenderId, PeerError> {
        let mut inner = lock(&self.inner);
        Self::check_open(&inner)?;
        let sender = format!("{stream_id}/{}", inner.senders.len());
        inner.senders.push(sender.clone());
        inner.ops.push(PeerOp::AddTrack {
            sender: sender.clone(),
            track: track.id().to_string(),
        });
        Ok(sender)
    }

    fn replace_track(&self, sender: &SenderId, track: Option<&MediaTrack>) -> Result<(), PeerError> {
        let mut inner = lock(&self.inner);
        Self::check_open(&inner)?;
        if !inner.senders.contains(sender) {
            return Err(PeerError::UnknownSender(sender.clone()));
        }
        inner.ops.push(PeerOp::ReplaceTrack {
            sender: sender.clone(),
            track: track.map(|t| t.id().to_string()),
        });
        Ok(())
    }

    fn close(&self) {
        let mut inner = lock(&self.inner);
        if inner.closed {
            return;
        }
        inner.closed = true;
        inner.ops.push(PeerOp::Close);
        debug!(peer = %self.id, "loopback peer closed");
        self.emit(PeerEvent::StateChanged(PeerConnectionState::Closed));
    }
}

/// Hands out [`LoopbackPeer`]s and keeps them around for inspection.
#[derive(Default)]
pub struct LoopbackPeerFactory {
    created: Mutex<Vec<Arc<LoopbackPeer>>>,
}

impl LoopbackPeerFactory {
    pub fn created(&self) -> Vec<Arc<LoopbackPeer>> {
        lock(&self.created).clone()
    }
}

impl PeerConnectionFactory for LoopbackPeerFactory {
    fn create(
        &self,
        events: mpsc::UnboundedSender<PeerEvent>,
    ) -> Result<Arc<dyn PeerConnection>, PeerError> {
        let peer = Arc::new(LoopbackPeer::new(events));
        lock(&self.created).push(peer.clone());
        Ok(peer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn requested_device_is_honoured() {
        let devices = LoopbackDevices::default();
        let stream = devices
            .get_user_media(&MediaRequest {
                audio: TrackRequest::Device("mic-2".into()),
                video: TrackRequest::Default,
                noise_suppression: true,
            })
            .await
            .unwrap();
        assert_eq!(stream.first(TrackKind::Audio).unwrap().device_id(), Some("mic-2"));
        assert_eq!(stream.first(TrackKind::Video).unwrap().device_id(), Some("cam-1"));
        assert_eq!(devices.capture_count(), 1);
    }

    #[tokio::test]
    async fn denied_kind_fails_the_whole_request() {
        let devices = LoopbackDevices::default().deny(TrackKind::Audio);
        let err = devices
            .get_user_media(&MediaRequest {
                audio: TrackRequest::Default,
                video: TrackRequest::Default,
                noise_suppression: false,
            })
            .await
            .unwrap_err();
        assert_eq!(err, MediaError::PermissionDenied(TrackKind::Audio));
        assert_eq!(devices.capture_count(), 0);
    }

    #[tokio::test]
    async fn peer_rejects_work_after_close() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let peer = LoopbackPeer::new(tx);
        peer.close();
        assert_eq!(peer.create_offer().await.unwrap_err(), PeerError::Closed);
        assert_eq!(
            rx.recv().await,
            Some(PeerEvent::StateChanged(PeerConnectionState::Closed))
        );
    }
}
