use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::error::{ClientError, PeerError, Result};
use crate::media::{MediaStream, MediaTrack, TrackKind};
use crate::negotiation::{NegotiationEvent, NegotiationState, Negotiator};
use crate::signal::{IceCandidate, SdpType, SessionDescription, SignalMessage};

pub type SenderId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTrack {
    pub track_id: String,
    pub stream_id: String,
    pub kind: TrackKind,
}

/// Things the connection reports on its own.
#[derive(Debug, Clone, PartialEq)]
pub enum PeerEvent {
    LocalCandidate(IceCandidate),
    StateChanged(PeerConnectionState),
    RemoteTrack(RemoteTrack),
}

/// The subset of an RTCPeerConnection the meeting room drives.
#[async_trait]
pub trait PeerConnection: Send + Sync {
    async fn create_offer(&self) -> std::result::Result<SessionDescription, PeerError>;
    async fn create_answer(&self) -> std::result::Result<SessionDescription, PeerError>;
    async fn set_local_description(
        &self,
        desc: &SessionDescription,
    ) -> std::result::Result<(), PeerError>;
    async fn set_remote_description(
        &self,
        desc: &SessionDescription,
    ) -> std::result::Result<(), PeerError>;
    async fn add_ice_candidate(&self, candidate: &IceCandidate) -> std::result::Result<(), PeerError>;

    fn add_track(&self, track: &MediaTrack, stream_id: &str) -> std::result::Result<SenderId, PeerError>;
    /// `None` keeps the sender but stops sending.
    fn replace_track(
        &self,
        sender: &SenderId,
        track: Option<&MediaTrack>,
    ) -> std::result::Result<(), PeerError>;
    fn close(&self);
}

pub trait PeerConnectionFactory: Send + Sync {
    fn create(
        &self,
        events: mpsc::UnboundedSender<PeerEvent>,
    ) -> std::result::Result<Arc<dyn PeerConnection>, PeerError>;
}

struct Sender {
    id: SenderId,
    track: Option<MediaTrack>,
}

/// Drives the meeting's one peer connection: local tracks go in, signals
/// come and go through the signaling outbox.
pub struct PeerSession {
    connection: Arc<dyn PeerConnection>,
    negotiator: Negotiator,
    outbox: mpsc::UnboundedSender<SignalMessage>,
    stream_id: String,
    senders: HashMap<TrackKind, Sender>,
    camera_track: Option<MediaTrack>,
    screen_track: Option<MediaTrack>,
    remote_tracks: Vec<RemoteTrack>,
    link: PeerConnectionState,
}

impl PeerSession {
    pub fn new(
        connection: Arc<dyn PeerConnection>,
        outbox: mpsc::UnboundedSender<SignalMessage>,
        stream_id: impl Into<String>,
    ) -> Self {
        Self {
            connection,
            negotiator: Negotiator::new(),
            outbox,
            stream_id: stream_id.into(),
            senders: HashMap::new(),
            camera_track: None,
            screen_track: None,
            remote_tracks: Vec::new(),
            link: PeerConnectionState::New,
        }
    }

    pub fn state(&self) -> NegotiationState {
        self.negotiator.state()
    }

    pub fn remote_tracks(&self) -> &[RemoteTrack] {
        &self.remote_tracks
    }

    pub fn is_sharing_screen(&self) -> bool {
        self.screen_track.is_some()
    }

    /// Track currently going out for `kind`, if any.
    pub fn sending(&self, kind: TrackKind) -> Option<&MediaTrack> {
        self.senders.get(&kind).and_then(|s| s.track.as_ref())
    }

    /// Adds the first audio and first video track of `stream`.
    pub fn attach(&mut self, stream: &MediaStream) -> Result<()> {
        for kind in [TrackKind::Audio, TrackKind::Video] {
            if let Some(track) = stream.first(kind) {
                self.add_sender(track.clone())?;
            }
        }
        self.camera_track = stream.first(TrackKind::Video).cloned();
        Ok(())
    }

    fn add_sender(&mut self, track: MediaTrack) -> Result<()> {
        let id = self.connection.add_track(&track, &self.stream_id)?;
        debug!(sender = %id, kind = ?track.kind(), "sender added");
        self.senders.insert(track.kind(), Sender { id, track: Some(track) });
        Ok(())
    }

    fn send(&self, message: SignalMessage) -> Result<()> {
        self.outbox
            .send(message)
            .map_err(|_| ClientError::SignalingClosed)
    }

    pub fn is_polite(&self) -> bool {
        self.negotiator.is_polite()
    }

    pub fn set_polite(&mut self, polite: bool) {
        self.negotiator.set_polite(polite);
    }

    // State changes are committed only once the connection has accepted the
    // descriptions; a failed call leaves the machine where it was.
    pub async fn start_offer(&mut self) -> Result<()> {
        self.negotiator.transition(NegotiationEvent::LocalOffer)?;
        let offer = self.connection.create_offer().await?;
        self.connection.set_local_description(&offer).await?;
        self.negotiator.apply(NegotiationEvent::LocalOffer)?;
        info!("sending offer");
        self.send(offer.into())
    }

    pub async fn handle_remote_description(&mut self, desc: SessionDescription) -> Result<()> {
        match desc.kind {
            SdpType::Offer => {
                self.negotiator.transition(NegotiationEvent::RemoteOffer)?;
                if self.negotiator.state() == NegotiationState::Offering {
                    info!("offers crossed, dropping ours and answering");
                }
                self.apply_remote(&desc).await?;
                let answer = self.connection.create_answer().await?;
                self.connection.set_local_description(&answer).await?;
                self.negotiator.apply(NegotiationEvent::RemoteOffer)?;
                info!("sending answer");
                self.send(answer.into())?;
            }
            SdpType::Answer => {
                self.negotiator.transition(NegotiationEvent::RemoteAnswer)?;
                self.apply_remote(&desc).await?;
                self.negotiator.apply(NegotiationEvent::RemoteAnswer)?;
            }
        }
        // a renegotiation on a live link gets no new connected report
        if self.link == PeerConnectionState::Connected {
            self.negotiator.apply(NegotiationEvent::Connected)?;
        }
        Ok(())
    }

    async fn apply_remote(&mut self, desc: &SessionDescription) -> Result<()> {
        self.connection.set_remote_description(desc).await?;
        for candidate in self.negotiator.remote_description_applied() {
            self.add_candidate(&candidate).await;
        }
        Ok(())
    }

    pub async fn handle_remote_candidate(&mut self, candidate: IceCandidate) -> Result<()> {
        if let Some(candidate) = self.negotiator.accept_remote_candidate(candidate)? {
            self.add_candidate(&candidate).await;
        } else {
            debug!(
                queued = self.negotiator.pending_candidates(),
                "ice candidate queued until remote description"
            );
        }
        Ok(())
    }

    async fn add_candidate(&self, candidate: &IceCandidate) {
        if let Err(err) = self.connection.add_ice_candidate(candidate).await {
            warn!(%err, candidate = %candidate.candidate, "failed to add ice candidate");
        }
    }

    pub fn handle_event(&mut self, event: PeerEvent) -> Result<()> {
        match event {
            PeerEvent::LocalCandidate(candidate) => {
                if self.negotiator.state() != NegotiationState::Closed {
                    self.send(SignalMessage::IceCandidate { candidate })?;
                }
            }
            PeerEvent::StateChanged(PeerConnectionState::Connected) => {
                self.link = PeerConnectionState::Connected;
                match self.negotiator.apply(NegotiationEvent::Connected) {
                    Ok(_) => info!("peer connected"),
                    Err(err) => debug!(%err, "ignoring connected report"),
                }
            }
            PeerEvent::StateChanged(PeerConnectionState::Failed) => {
                self.link = PeerConnectionState::Failed;
                error!("peer connection failed");
            }
            PeerEvent::StateChanged(PeerConnectionState::Closed) => {
                self.link = PeerConnectionState::Closed;
                let _ = self.negotiator.apply(NegotiationEvent::Close);
            }
            PeerEvent::StateChanged(state) => {
                self.link = state;
                debug!(?state, "peer connection state");
            }
            PeerEvent::RemoteTrack(track) => {
                info!(track = %track.track_id, kind = ?track.kind, "remote track");
                if !self.remote_tracks.contains(&track) {
                    self.remote_tracks.push(track);
                }
            }
        }
        Ok(())
    }

    /// Puts `track` on the sender of its kind. When there is no such sender
    /// yet one is added and the connection renegotiated; returns whether that
    /// happened.
    pub async fn replace_track(&mut self, track: MediaTrack) -> Result<bool> {
        let kind = track.kind();
        if let Some(sender) = self.senders.get_mut(&kind) {
            self.connection.replace_track(&sender.id, Some(&track))?;
            sender.track = Some(track);
            return Ok(false);
        }

        self.add_sender(track)?;
        match self.negotiator.state() {
            NegotiationState::Idle | NegotiationState::Connected => {
                self.start_offer().await?;
                Ok(true)
            }
            // the pending exchange will carry the new sender
            _ => Ok(false),
        }
    }

    /// New camera track from a device switch. While a screen share is on air
    /// it is only remembered and goes out when the share stops.
    pub async fn set_camera_track(&mut self, track: MediaTrack) -> Result<()> {
        self.camera_track = Some(track.clone());
        if self.screen_track.is_none() {
            self.replace_track(track).await?;
        }
        Ok(())
    }

    pub async fn start_screen_share(&mut self, track: MediaTrack) -> Result<bool> {
        if self.screen_track.is_none() {
            self.camera_track = self.sending(TrackKind::Video).cloned();
        }
        self.screen_track = Some(track.clone());
        self.replace_track(track).await
    }

    pub fn stop_screen_share(&mut self) -> Result<()> {
        let Some(screen) = self.screen_track.take() else {
            return Ok(());
        };
        if let Some(sender) = self.senders.get_mut(&TrackKind::Video) {
            let camera = self.camera_track.clone();
            self.connection.replace_track(&sender.id, camera.as_ref())?;
            sender.track = camera;
        }
        screen.stop();
        Ok(())
    }

    pub fn close(&mut self) {
        if self.negotiator.state() == NegotiationState::Closed {
            return;
        }
        let _ = self.negotiator.apply(NegotiationEvent::Close);
        self.connection.close();
        info!("peer connection closed");
    }
}
