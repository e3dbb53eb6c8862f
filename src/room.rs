use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::api::{ApiClient, CurrentUser};
use crate::chat::{self, ChatLog, ChatMessage};
use crate::error::{ClientError, MediaError, Result};
use crate::media::{LocalMedia, MediaStream, TrackKind};
use crate::negotiation::NegotiationState;
use crate::peer::{PeerConnectionFactory, PeerEvent, PeerSession};
use crate::prejoin::{Background, JoinSettings, Language};
use crate::recording::{Recorder, RecordingFile};
use crate::roster::{Participant, Presenter, Roster, Tile};
use crate::signal::SignalMessage;
use crate::signaling::{self, SignalingHandle};
use crate::translation::{TranslationPanel, TranslationTab};

/// What a meeting room needs from outside besides the pre-join settings.
pub struct RoomContext {
    pub api: ApiClient,
    pub token: String,
    pub peers: Arc<dyn PeerConnectionFactory>,
    /// Where finished recordings are written when stopped by command.
    pub recordings_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SidePanel {
    Chat,
    Participants,
    Translation,
    Settings,
}

#[derive(Debug)]
pub enum RoomEvent {
    Signal(SignalMessage),
    Peer(PeerEvent),
    Roster(Vec<Participant>),
    Chat(Vec<ChatMessage>),
    SignalingClosed,
}

#[derive(Debug)]
pub enum RoomCommand {
    ToggleCamera,
    ToggleMic,
    SelectMicrophone(String),
    SelectCamera(String),
    SelectSpeaker(String),
    SetVolume(f32),
    StartScreenShare,
    StopScreenShare,
    StartRecording,
    StopRecording,
    RecordChunk(Vec<u8>),
    SendChat(String),
    TogglePanel(SidePanel),
    SelectTranslationTab(TranslationTab),
    ToggleCaptions,
    Leave,
}

// Everything below is owned by the single task running the room; pollers
// and the socket only ever talk to it through channels.
pub struct MeetingRoom {
    session_id: String,
    display_name: String,
    background: Background,
    language: Language,
    api: ApiClient,
    token: String,
    me: CurrentUser,
    media: LocalMedia,
    peer: PeerSession,
    roster: Roster,
    roster_seen: bool,
    chat: ChatLog,
    recorder: Recorder,
    recordings_dir: Option<PathBuf>,
    screen: Option<MediaStream>,
    panel: Option<SidePanel>,
    translation: TranslationPanel,
    signaling: Option<SignalingHandle>,
    signals: mpsc::UnboundedReceiver<SignalMessage>,
    signals_open: bool,
    peer_events: mpsc::UnboundedReceiver<PeerEvent>,
    polls: mpsc::UnboundedReceiver<RoomEvent>,
    pollers: Vec<JoinHandle<()>>,
    left: bool,
}

impl MeetingRoom {
    pub async fn join(settings: JoinSettings, context: RoomContext) -> Result<Self> {
        let RoomContext {
            api,
            token,
            peers,
            recordings_dir,
        } = context;
        let JoinSettings {
            session_id,
            display_name,
            background,
            language,
            mut media,
            ..
        } = settings;

        // The backend's word on who we are; roster entries are matched
        // against this id only.
        let me = match api.current_user(&token).await {
            Ok(me) => me,
            Err(err) => {
                media.stop();
                return Err(err);
            }
        };
        if let Err(err) = api.join_session(&token, &session_id).await {
            media.stop();
            return Err(err);
        }
        info!(session = %session_id, user = %me.id, "joining meeting");

        let call = match open_call(&api, &session_id, &token, peers.as_ref(), media.stream()).await {
            Ok(call) => call,
            Err(err) => {
                warn!(%err, session = %session_id, "could not set up the call, leaving again");
                media.stop();
                if let Err(leave_err) = api.leave_session(&token, &session_id).await {
                    debug!(err = %leave_err, "leave call failed");
                }
                return Err(err);
            }
        };

        let (poll_tx, polls) = mpsc::unbounded_channel();
        let pollers = vec![
            spawn_poller("roster", api.config().roster_poll, poll_tx.clone(), {
                let (api, token, session) = (api.clone(), token.clone(), session_id.clone());
                move || {
                    let (api, token, session) = (api.clone(), token.clone(), session.clone());
                    async move { api.participants(&token, &session).await.map(RoomEvent::Roster) }
                }
            }),
            spawn_poller("chat", api.config().chat_poll, poll_tx, {
                let (api, token, session) = (api.clone(), token.clone(), session_id.clone());
                move || {
                    let (api, token, session) = (api.clone(), token.clone(), session.clone());
                    async move { api.chat_history(&token, &session).await.map(RoomEvent::Chat) }
                }
            }),
        ];

        let mut recorder = Recorder::default();
        recorder.observe_stream(Some(media.stream()));

        let mut room = Self {
            roster: Roster::new(me.id.clone()),
            session_id,
            display_name,
            background,
            language,
            api,
            token,
            me,
            media,
            peer: call.peer,
            roster_seen: false,
            chat: ChatLog::default(),
            recorder,
            recordings_dir,
            screen: None,
            panel: None,
            translation: TranslationPanel::default(),
            signaling: Some(call.signaling),
            signals: call.signals,
            signals_open: true,
            peer_events: call.peer_events,
            polls,
            pollers,
            left: false,
        };

        match room.api.participants(&room.token, &room.session_id).await {
            Ok(list) => room.apply_roster(list).await,
            Err(err) => debug!(%err, "initial roster fetch failed, waiting for poll"),
        }
        Ok(room)
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn me(&self) -> &CurrentUser {
        &self.me
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn background(&self) -> Background {
        self.background
    }

    pub fn language(&self) -> Language {
        self.language
    }

    pub fn media(&self) -> &LocalMedia {
        &self.media
    }

    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    pub fn tiles(&self) -> Vec<Tile> {
        self.roster.tiles()
    }

    pub fn presenter(&self) -> Option<&Presenter> {
        self.roster.presenter()
    }

    pub fn chat(&self) -> &ChatLog {
        &self.chat
    }

    pub fn recorder(&self) -> &Recorder {
        &self.recorder
    }

    pub fn peer(&self) -> &PeerSession {
        &self.peer
    }

    pub fn negotiation_state(&self) -> NegotiationState {
        self.peer.state()
    }

    pub fn is_sharing_screen(&self) -> bool {
        self.screen.is_some()
    }

    pub fn panel(&self) -> Option<SidePanel> {
        self.panel
    }

    pub fn translation(&self) -> &TranslationPanel {
        &self.translation
    }

    pub fn signaling_open(&self) -> bool {
        self.signals_open && self.signaling.as_ref().is_some_and(SignalingHandle::is_open)
    }

    pub fn has_left(&self) -> bool {
        self.left
    }

    /// Waits for the next thing that happened to the room. `None` once the
    /// room has been left.
    pub async fn next_event(&mut self) -> Option<RoomEvent> {
        if self.left {
            return None;
        }
        tokio::select! {
            msg = self.signals.recv(), if self.signals_open => Some(match msg {
                Some(msg) => RoomEvent::Signal(msg),
                None => {
                    self.signals_open = false;
                    RoomEvent::SignalingClosed
                }
            }),
            Some(event) = self.peer_events.recv() => Some(RoomEvent::Peer(event)),
            Some(event) = self.polls.recv() => Some(event),
            else => None,
        }
    }

    pub async fn handle_event(&mut self, event: RoomEvent) {
        if self.left {
            return;
        }
        match event {
            RoomEvent::Signal(msg) => self.handle_signal(msg).await,
            RoomEvent::Peer(event) => {
                if let Err(err) = self.peer.handle_event(event) {
                    warn!(%err, "peer event not forwarded");
                }
            }
            RoomEvent::Roster(list) => self.apply_roster(list).await,
            RoomEvent::Chat(list) => self.chat.replace(list),
            RoomEvent::SignalingClosed => warn!(session = %self.session_id, "signaling socket closed"),
        }
        self.reap_screen_share().await;
        self.recorder.observe_stream(Some(self.media.stream()));
    }

    async fn handle_signal(&mut self, msg: SignalMessage) {
        debug!(kind = msg.kind(), "signal received");
        match msg {
            SignalMessage::Offer { .. } | SignalMessage::Answer { .. } => {
                if let Some(desc) = msg.description() {
                    if let Err(err) = self.peer.handle_remote_description(desc).await {
                        warn!(%err, "remote description rejected");
                    }
                }
            }
            SignalMessage::IceCandidate { candidate } => {
                if let Err(err) = self.peer.handle_remote_candidate(candidate).await {
                    warn!(%err, "remote candidate rejected");
                }
            }
            SignalMessage::ScreenShareStarted { user_id, full_name } => {
                info!(user = %user_id, name = %full_name, "screen share started");
                self.roster.set_presenter(&user_id, &full_name);
            }
            SignalMessage::ScreenShareStopped { user_id, .. } => {
                self.roster.clear_presenter(&user_id);
            }
            SignalMessage::ChatMessage {
                id,
                user_full_name,
                content,
            } => {
                self.chat.append(ChatMessage {
                    id,
                    author: user_full_name,
                    content,
                });
            }
            SignalMessage::UserLeft { user_id } => {
                for gone in self.roster.remove_user(&user_id) {
                    info!(participant = %gone.display_name, "participant left");
                }
            }
            SignalMessage::Unknown => debug!("ignoring unknown signal"),
        }
    }

    async fn apply_roster(&mut self, list: Vec<Participant>) {
        let diff = self.roster.update(list);
        for p in &diff.joined {
            debug!(participant = %p.display_name, "in roster");
        }
        if let Some(remote) = self.roster.remote_entries().next() {
            let polite = is_polite(&self.me.id, &remote.user_id);
            if polite != self.peer.is_polite() {
                debug!(polite, remote = %remote.user_id, "negotiation role");
                self.peer.set_polite(polite);
            }
        }
        if self.roster_seen {
            return;
        }
        self.roster_seen = true;
        // Whoever arrives second makes the offer.
        if self.roster.has_remote() && self.peer.state() == NegotiationState::Idle {
            if let Err(err) = self.peer.start_offer().await {
                warn!(%err, "could not start call");
            }
        }
    }

    pub fn toggle_camera(&mut self) -> Result<bool> {
        self.media.toggle_camera()
    }

    pub fn toggle_mic(&mut self) -> Result<bool> {
        self.media.toggle_mic()
    }

    pub async fn select_microphone(&mut self, device_id: &str) -> Result<()> {
        let track = self.media.select_input_device(device_id).await?;
        self.recorder.observe_stream(Some(self.media.stream()));
        self.peer.replace_track(track).await?;
        Ok(())
    }

    pub async fn select_camera(&mut self, device_id: &str) -> Result<()> {
        let track = self.media.select_camera(device_id).await?;
        self.recorder.observe_stream(Some(self.media.stream()));
        self.peer.set_camera_track(track).await
    }

    pub fn select_speaker(&mut self, device_id: &str) {
        self.media.select_output_device(device_id);
    }

    pub fn set_volume(&mut self, volume: f32) -> f32 {
        self.media.set_volume(volume)
    }

    pub async fn set_noise_suppression(&mut self, enabled: bool) -> Result<()> {
        if let Some(track) = self.media.set_noise_suppression(enabled).await? {
            self.recorder.observe_stream(Some(self.media.stream()));
            self.peer.replace_track(track).await?;
        }
        Ok(())
    }

    /// Captures the display and puts it on the existing connection in place
    /// of the camera.
    pub async fn start_screen_share(&mut self) -> Result<()> {
        if self.screen.is_some() {
            return Ok(());
        }
        let stream = self.media.devices().get_display_media().await?;
        let Some(track) = stream.first(TrackKind::Video).cloned() else {
            stream.stop_all();
            return Err(MediaError::Aborted("display capture had no video".into()).into());
        };
        if let Err(err) = self.peer.start_screen_share(track).await {
            stream.stop_all();
            return Err(err);
        }
        self.screen = Some(stream);
        if let Err(err) = self.api.start_screen_share(&self.token, &self.session_id).await {
            warn!(%err, "could not announce screen share");
        }
        info!("screen share started");
        Ok(())
    }

    pub async fn stop_screen_share(&mut self) -> Result<()> {
        let Some(stream) = self.screen.take() else {
            return Ok(());
        };
        let restored = self.peer.stop_screen_share();
        stream.stop_all();
        if let Err(err) = self.api.stop_screen_share(&self.token, &self.session_id).await {
            warn!(%err, "could not announce end of screen share");
        }
        info!("screen share stopped");
        restored
    }

    // The platform can end the capture on its own (its "stop sharing" UI).
    async fn reap_screen_share(&mut self) {
        if self.screen.as_ref().is_some_and(|s| !s.has_live_tracks()) {
            info!("screen capture ended outside the room");
            if let Err(err) = self.stop_screen_share().await {
                warn!(%err, "could not restore camera");
            }
        }
    }

    pub async fn start_recording(&mut self) -> Result<()> {
        self.recorder.can_start(Some(self.media.stream()))?;
        self.recorder.begin();
        if let Err(err) = self.api.start_recording(&self.token, &self.session_id).await {
            self.recorder.fail(&err);
            return Err(err);
        }
        Ok(())
    }

    pub fn record_chunk(&mut self, chunk: &[u8]) -> bool {
        self.recorder.push_chunk(chunk)
    }

    pub async fn stop_recording(&mut self) -> Result<Option<RecordingFile>> {
        let Some(file) = self.recorder.finish() else {
            return Ok(None);
        };
        if let Err(err) = self.api.stop_recording(&self.token, &self.session_id).await {
            warn!(%err, "backend did not acknowledge recording stop");
        }
        Ok(Some(file))
    }

    pub async fn send_chat(&mut self, input: &str) -> Result<()> {
        let content = chat::outgoing(input)?;
        let saved = self
            .api
            .send_chat(&self.token, &self.session_id, &content)
            .await?;
        self.chat.append_sent(saved, &self.display_name);
        Ok(())
    }

    /// Opens `panel`, or closes it when it is already the open one.
    pub fn toggle_panel(&mut self, panel: SidePanel) -> Option<SidePanel> {
        self.panel = if self.panel == Some(panel) {
            None
        } else {
            Some(panel)
        };
        self.panel
    }

    pub fn select_translation_tab(&mut self, tab: TranslationTab) {
        self.translation.select_tab(tab);
    }

    pub fn toggle_captions(&mut self) -> bool {
        let on = self.translation.toggle_captions();
        if self.panel == Some(SidePanel::Translation) {
            self.panel = None;
        }
        on
    }

    pub async fn execute(&mut self, command: RoomCommand) -> Result<()> {
        match command {
            RoomCommand::ToggleCamera => {
                self.toggle_camera()?;
            }
            RoomCommand::ToggleMic => {
                self.toggle_mic()?;
            }
            RoomCommand::SelectMicrophone(id) => self.select_microphone(&id).await?,
            RoomCommand::SelectCamera(id) => self.select_camera(&id).await?,
            RoomCommand::SelectSpeaker(id) => self.select_speaker(&id),
            RoomCommand::SetVolume(volume) => {
                self.set_volume(volume);
            }
            RoomCommand::StartScreenShare => self.start_screen_share().await?,
            RoomCommand::StopScreenShare => self.stop_screen_share().await?,
            RoomCommand::StartRecording => self.start_recording().await?,
            RoomCommand::StopRecording => {
                if let Some(file) = self.stop_recording().await? {
                    match &self.recordings_dir {
                        Some(dir) => {
                            file.save_to(dir).await?;
                        }
                        None => info!(file = %file.file_name, "recording discarded, no output directory"),
                    }
                }
            }
            RoomCommand::RecordChunk(chunk) => {
                self.record_chunk(&chunk);
            }
            RoomCommand::SendChat(text) => self.send_chat(&text).await?,
            RoomCommand::TogglePanel(panel) => {
                self.toggle_panel(panel);
            }
            RoomCommand::SelectTranslationTab(tab) => self.select_translation_tab(tab),
            RoomCommand::ToggleCaptions => {
                self.toggle_captions();
            }
            RoomCommand::Leave => self.leave().await,
        }
        self.reap_screen_share().await;
        self.recorder.observe_stream(Some(self.media.stream()));
        Ok(())
    }

    /// Runs the room until `Leave` arrives or the command channel closes,
    /// then tears it down.
    pub async fn run(mut self, mut commands: mpsc::UnboundedReceiver<RoomCommand>) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(RoomCommand::Leave) | None => break,
                    Some(command) => {
                        if let Err(err) = self.execute(command).await {
                            warn!(%err, "command failed");
                        }
                    }
                },
                event = self.next_event() => match event {
                    Some(event) => self.handle_event(event).await,
                    None => break,
                },
            }
        }
        self.leave().await;
    }

    /// Stops every local track, the pollers, the peer connection and the
    /// signaling socket. Safe to call more than once.
    pub async fn leave(&mut self) {
        if self.left {
            return;
        }
        self.left = true;

        for poller in self.pollers.drain(..) {
            poller.abort();
        }
        if self.recorder.is_recording() {
            if let Err(err) = self.stop_recording().await {
                debug!(%err, "recording stop on leave failed");
            }
        }
        if let Some(screen) = self.screen.take() {
            screen.stop_all();
        }
        self.media.stop();
        self.peer.close();
        if let Some(signaling) = self.signaling.take() {
            signaling.close().await;
        }
        self.signals_open = false;
        if let Err(err) = self.api.leave_session(&self.token, &self.session_id).await {
            debug!(%err, "leave call failed");
        }
        info!(session = %self.session_id, "left meeting");
    }
}

struct Call {
    signaling: SignalingHandle,
    signals: mpsc::UnboundedReceiver<SignalMessage>,
    peer: PeerSession,
    peer_events: mpsc::UnboundedReceiver<PeerEvent>,
}

/// Socket plus peer connection with the local stream attached. Whatever was
/// opened is closed again when a later step fails.
async fn open_call(
    api: &ApiClient,
    session_id: &str,
    token: &str,
    peers: &dyn PeerConnectionFactory,
    stream: &MediaStream,
) -> Result<Call> {
    let (signaling, signals) = signaling::connect(api.config(), session_id, token).await?;
    let (peer_tx, peer_events) = mpsc::unbounded_channel();
    let peer = match peers.create(peer_tx) {
        Ok(connection) => {
            let mut peer = PeerSession::new(connection, signaling.outbox(), stream.id());
            match peer.attach(stream) {
                Ok(()) => Ok(peer),
                Err(err) => {
                    peer.close();
                    Err(err)
                }
            }
        }
        Err(err) => Err(ClientError::from(err)),
    };
    match peer {
        Ok(peer) => Ok(Call {
            signaling,
            signals,
            peer,
            peer_events,
        }),
        Err(err) => {
            signaling.close().await;
            Err(err)
        }
    }
}

/// When both sides offer at once the one with the higher user id gives way.
fn is_polite(me: &str, remote: &str) -> bool {
    match (me.parse::<i64>(), remote.parse::<i64>()) {
        (Ok(me), Ok(remote)) => me > remote,
        _ => me > remote,
    }
}

fn spawn_poller<F, Fut>(
    name: &'static str,
    every: Duration,
    tx: mpsc::UnboundedSender<RoomEvent>,
    mut poll: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<RoomEvent>> + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match poll().await {
                Ok(event) => {
                    if tx.send(event).is_err() {
                        break;
                    }
                }
                // failed polls are simply skipped until the next tick
                Err(ClientError::Api { status, detail }) => {
                    debug!(poller = name, status, %detail, "poll rejected")
                }
                Err(err) => debug!(poller = name, %err, "poll failed"),
            }
        }
    })
}
