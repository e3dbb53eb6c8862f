mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{participant, MockBackend, SELF_ID, SELF_NAME, TOKEN};
use serde_json::json;
use tokio::sync::mpsc;

use wolfconf_meet::api::ApiClient;
use wolfconf_meet::config::ClientConfig;
use wolfconf_meet::loopback::{LoopbackDevices, LoopbackPeerFactory, PeerOp};
use wolfconf_meet::media::{TrackKind, TrackSource};
use wolfconf_meet::negotiation::NegotiationState;
use wolfconf_meet::prejoin::PreJoin;
use wolfconf_meet::room::{MeetingRoom, RoomCommand, RoomContext, SidePanel};
use wolfconf_meet::roster::TileBinding;
use wolfconf_meet::ClientError;

const SESSION: &str = "42";

async fn join(config: ClientConfig, peers: Arc<LoopbackPeerFactory>) -> MeetingRoom {
    let mut prejoin = PreJoin::open(SESSION, Arc::new(LoopbackDevices::default()))
        .await
        .unwrap();
    prejoin.set_display_name("Ada", true);
    let settings = prejoin.join().unwrap();
    let context = RoomContext {
        api: ApiClient::new(config).unwrap(),
        token: TOKEN.into(),
        peers,
        recordings_dir: None,
    };
    MeetingRoom::join(settings, context).await.unwrap()
}

async fn pump_until(room: &mut MeetingRoom, what: &str, done: impl Fn(&MeetingRoom) -> bool) {
    let finished = tokio::time::timeout(Duration::from_secs(5), async {
        while !done(&*room) {
            match room.next_event().await {
                Some(event) => room.handle_event(event).await,
                None => break,
            }
        }
    })
    .await;
    assert!(finished.is_ok(), "timed out waiting for {what}");
    assert!(done(&*room), "room ended before {what}");
}

fn with_grace(mock: &MockBackend) {
    mock.set_participants(json!([
        participant(10, SELF_ID, SELF_NAME),
        participant(11, 2, "Grace"),
    ]));
}

async fn connected_room(mock: &MockBackend, config: ClientConfig, peers: Arc<LoopbackPeerFactory>) -> MeetingRoom {
    with_grace(mock);
    let mut room = join(config, peers).await;
    mock.wait_for("offer", |b| b.received.iter().any(|m| m["type"] == "offer")).await;
    mock.push(json!({ "type": "answer", "sdp": "v=0\r\ns=grace\r\n" }));
    pump_until(&mut room, "connection", |r| r.negotiation_state() == NegotiationState::Connected).await;
    room
}

#[tokio::test]
async fn offers_when_someone_is_already_there() {
    let (mock, config) = MockBackend::start().await;
    with_grace(&mock);
    let peers = Arc::new(LoopbackPeerFactory::default());
    let mut room = join(config, peers.clone()).await;

    assert_eq!(room.negotiation_state(), NegotiationState::Offering);
    assert_eq!(room.me().id, "1");
    let calls = mock.calls();
    assert!(calls.contains(&"join 42".to_string()));
    assert!(calls.contains(&"ws 42".to_string()));

    let tiles = room.tiles();
    assert_eq!(tiles.len(), 2);
    assert_eq!(tiles[0].binding, TileBinding::LocalVideo);
    assert_eq!(
        tiles[1].binding,
        TileBinding::Remote { participant_id: "11".into() }
    );

    mock.wait_for("offer", |b| b.received.iter().any(|m| m["type"] == "offer")).await;
    // our candidate goes out once the room forwards the peer event
    pump_until(&mut room, "local candidate", |_| !mock.received_of("ice-candidate").is_empty()).await;

    mock.push(json!({ "type": "answer", "sdp": "v=0\r\ns=grace\r\n" }));
    pump_until(&mut room, "connection", |r| r.negotiation_state() == NegotiationState::Connected).await;

    mock.push(json!({ "type": "ice-candidate", "candidate": { "candidate": "candidate:grace", "sdpMid": "0" } }));
    let peer = peers.created()[0].clone();
    pump_until(&mut room, "remote candidate", |_| {
        peer.ops().contains(&PeerOp::AddIceCandidate("candidate:grace".into()))
    })
    .await;

    room.leave().await;
}

#[tokio::test]
async fn crossing_offer_is_answered_by_the_higher_id() {
    let (mock, config) = MockBackend::start().await;
    // Grace's user id is below ours, so we give way
    mock.set_participants(json!([
        participant(10, SELF_ID, SELF_NAME),
        participant(11, 0, "Grace"),
    ]));
    let peers = Arc::new(LoopbackPeerFactory::default());
    let mut room = join(config, peers.clone()).await;
    assert_eq!(room.negotiation_state(), NegotiationState::Offering);
    assert!(room.peer().is_polite());
    mock.wait_for("offer", |b| b.received.iter().any(|m| m["type"] == "offer")).await;

    mock.push(json!({ "type": "offer", "sdp": "v=0\r\ns=grace\r\n" }));
    pump_until(&mut room, "connection", |r| r.negotiation_state() == NegotiationState::Connected).await;
    mock.wait_for("answer", |b| b.received.iter().any(|m| m["type"] == "answer")).await;
    assert!(peers.created()[0]
        .ops()
        .contains(&PeerOp::SetRemote("v=0\r\ns=grace\r\n".into())));

    room.leave().await;
}

#[tokio::test]
async fn crossing_offer_is_refused_by_the_lower_id() {
    let (mock, config) = MockBackend::start().await;
    with_grace(&mock);
    let peers = Arc::new(LoopbackPeerFactory::default());
    let mut room = join(config, peers).await;
    assert!(!room.peer().is_polite());
    mock.wait_for("offer", |b| b.received.iter().any(|m| m["type"] == "offer")).await;

    // Grace gives way and answers ours after her own offer bounced
    mock.push(json!({ "type": "offer", "sdp": "v=0\r\ns=grace offer\r\n" }));
    mock.push(json!({ "type": "answer", "sdp": "v=0\r\ns=grace answer\r\n" }));
    pump_until(&mut room, "connection", |r| r.negotiation_state() == NegotiationState::Connected).await;
    assert!(mock.received_of("answer").is_empty());

    room.leave().await;
}

#[tokio::test]
async fn failed_socket_backs_out_of_the_meeting() {
    let (mock, config) = MockBackend::start().await;
    mock.state().fail_socket = true;
    let mut prejoin = PreJoin::open(SESSION, Arc::new(LoopbackDevices::default()))
        .await
        .unwrap();
    prejoin.set_display_name("Ada", false);
    let settings = prejoin.join().unwrap();
    let tracks = settings.media.stream().tracks().to_vec();
    assert_eq!(tracks.len(), 2);
    let context = RoomContext {
        api: ApiClient::new(config).unwrap(),
        token: TOKEN.into(),
        peers: Arc::new(LoopbackPeerFactory::default()),
        recordings_dir: None,
    };

    let err = MeetingRoom::join(settings, context).await.err().unwrap();
    assert!(matches!(err, ClientError::WebSocket(_)));
    assert!(tracks.iter().all(|t| !t.is_live()));
    assert_eq!(mock.calls(), vec!["join 42", "leave 42"]);
}

#[tokio::test]
async fn answers_when_alone() {
    let (mock, config) = MockBackend::start().await;
    mock.set_participants(json!([participant(10, SELF_ID, SELF_NAME)]));
    let peers = Arc::new(LoopbackPeerFactory::default());
    let mut room = join(config, peers.clone()).await;
    assert_eq!(room.negotiation_state(), NegotiationState::Idle);
    mock.wait_for("socket", |b| b.sockets.len() == 1).await;

    // a candidate ahead of the offer waits for it
    mock.push(json!({ "type": "ice-candidate", "candidate": { "candidate": "candidate:early" } }));
    mock.push(json!({ "type": "offer", "sdp": "v=0\r\ns=grace\r\n" }));
    pump_until(&mut room, "connection", |r| r.negotiation_state() == NegotiationState::Connected).await;
    mock.wait_for("answer", |b| b.received.iter().any(|m| m["type"] == "answer")).await;
    assert!(mock.received_of("offer").is_empty());

    let ops = peers.created()[0].ops();
    let remote = ops.iter().position(|op| matches!(op, PeerOp::SetRemote(_))).unwrap();
    let early = ops
        .iter()
        .position(|op| *op == PeerOp::AddIceCandidate("candidate:early".into()))
        .unwrap();
    assert!(remote < early);

    room.leave().await;
}

#[tokio::test]
async fn pushed_signals_update_roster_chat_and_presenter() {
    let (mock, config) = MockBackend::start().await;
    let peers = Arc::new(LoopbackPeerFactory::default());
    let mut room = connected_room(&mock, config, peers).await;

    mock.push(json!({ "type": "screenshare-started", "user_id": 2, "full_name": "Grace" }));
    pump_until(&mut room, "presenter", |r| r.presenter().is_some()).await;
    assert_eq!(room.presenter().unwrap().full_name, "Grace");
    assert!(room.tiles().iter().any(|t| t.presenting));

    mock.push(json!({ "type": "screenshare-stopped", "user_id": "2" }));
    pump_until(&mut room, "presenter gone", |r| r.presenter().is_none()).await;

    mock.push(json!({ "type": "chat-message", "id": 7, "user_full_name": "Grace", "content": "hi" }));
    pump_until(&mut room, "pushed chat", |r| r.chat().lines().contains(&"Grace: hi".to_string())).await;

    mock.push(json!({ "type": "user_left", "user_id": 2 }));
    pump_until(&mut room, "grace leaving", |r| !r.roster().has_remote()).await;
    assert_eq!(room.tiles().len(), 1);

    mock.push(json!({ "type": "reaction", "emoji": "wave" }));
    room.leave().await;
}

#[tokio::test]
async fn screen_share_reuses_the_connection() {
    let (mock, config) = MockBackend::start().await;
    let peers = Arc::new(LoopbackPeerFactory::default());
    let mut room = connected_room(&mock, config, peers.clone()).await;
    let camera = room.peer().sending(TrackKind::Video).unwrap().clone();

    room.start_screen_share().await.unwrap();
    assert!(room.is_sharing_screen());
    assert_eq!(peers.created().len(), 1);
    let screen = room.peer().sending(TrackKind::Video).unwrap().clone();
    assert_eq!(screen.source(), TrackSource::Screen);
    assert!(peers.created()[0].ops().iter().any(|op| matches!(
        op,
        PeerOp::ReplaceTrack { track: Some(id), .. } if id == screen.id()
    )));
    assert!(mock.calls().contains(&"screenshare/start 42".to_string()));

    room.stop_screen_share().await.unwrap();
    assert!(!room.is_sharing_screen());
    assert!(!screen.is_live());
    assert!(room.peer().sending(TrackKind::Video).unwrap().same_track(&camera));
    assert!(mock.calls().contains(&"screenshare/stop 42".to_string()));

    // ending the capture from outside restores the camera too
    room.start_screen_share().await.unwrap();
    room.peer().sending(TrackKind::Video).unwrap().stop();
    pump_until(&mut room, "share reaped", |r| !r.is_sharing_screen()).await;
    assert!(room.peer().sending(TrackKind::Video).unwrap().same_track(&camera));
    assert_eq!(peers.created().len(), 1);

    room.leave().await;
}

#[tokio::test]
async fn microphone_switch_replaces_the_sent_track() {
    let (mock, config) = MockBackend::start().await;
    let peers = Arc::new(LoopbackPeerFactory::default());
    let mut room = connected_room(&mock, config, peers.clone()).await;

    room.select_microphone("mic-2").await.unwrap();
    let audio: Vec<_> = room
        .media()
        .stream()
        .audio_tracks()
        .filter(|t| t.is_live())
        .cloned()
        .collect();
    assert_eq!(audio.len(), 1);
    assert_eq!(audio[0].device_id(), Some("mic-2"));
    assert!(room.peer().sending(TrackKind::Audio).unwrap().same_track(&audio[0]));

    assert!(!room.toggle_mic().unwrap());
    assert!(!audio[0].is_enabled());

    room.leave().await;
}

#[tokio::test]
async fn recorder_follows_the_local_stream() {
    let (mock, config) = MockBackend::start().await;
    let peers = Arc::new(LoopbackPeerFactory::default());
    let mut room = connected_room(&mock, config, peers).await;
    assert!(room.recorder().error().is_none());

    // devices unplugged underneath the room
    room.media().stream().stop_all();
    room.execute(RoomCommand::SetVolume(0.5)).await.unwrap();
    assert!(room.recorder().error().unwrap().starts_with("No active media stream"));
    assert!(room.start_recording().await.is_err());

    room.select_microphone("mic-2").await.unwrap();
    assert!(room.recorder().error().is_none());
    room.start_recording().await.unwrap();

    room.leave().await;
}

#[tokio::test]
async fn recording_chat_and_panels() {
    let (mock, config) = MockBackend::start().await;
    let peers = Arc::new(LoopbackPeerFactory::default());
    let mut room = connected_room(&mock, config, peers).await;

    room.start_recording().await.unwrap();
    assert!(room.record_chunk(b"webm"));
    let file = room.stop_recording().await.unwrap().unwrap();
    assert_eq!(file.data, b"webm");
    assert!(room.stop_recording().await.unwrap().is_none());

    mock.state().fail_recording = true;
    assert!(room.start_recording().await.is_err());
    assert!(!room.recorder().is_recording());
    assert_eq!(room.recorder().error(), Some("Recording failed. Check permissions."));

    assert!(matches!(room.send_chat("   ").await, Err(ClientError::Validation(_))));
    room.send_chat("hello").await.unwrap();
    assert_eq!(room.chat().lines().last().map(String::as_str), Some("Ada: hello"));

    assert_eq!(room.toggle_panel(SidePanel::Chat), Some(SidePanel::Chat));
    assert_eq!(room.toggle_panel(SidePanel::Participants), Some(SidePanel::Participants));
    assert_eq!(room.toggle_panel(SidePanel::Participants), None);
    room.toggle_panel(SidePanel::Translation);
    assert!(room.toggle_captions());
    assert_eq!(room.panel(), None);

    room.leave().await;
}

#[tokio::test]
async fn leave_stops_tracks_and_closes_socket() {
    let (mock, config) = MockBackend::start().await;
    let peers = Arc::new(LoopbackPeerFactory::default());
    let mut room = connected_room(&mock, config, peers.clone()).await;
    room.start_screen_share().await.unwrap();
    let mut tracks = room.media().stream().tracks().to_vec();
    tracks.extend(room.peer().sending(TrackKind::Video).cloned());

    room.leave().await;
    assert!(room.has_left());
    assert!(tracks.iter().all(|t| !t.is_live()));
    assert!(peers.created()[0].is_closed());
    assert!(!room.signaling_open());
    mock.wait_for("socket close", |b| b.closed_sockets == 1).await;
    assert!(mock.calls().contains(&"leave 42".to_string()));
    assert!(room.next_event().await.is_none());

    room.leave().await;
    let leaves = mock.calls().iter().filter(|c| *c == "leave 42").count();
    assert_eq!(leaves, 1);
}

#[tokio::test]
async fn run_loop_executes_commands_until_leave() {
    let (mock, config) = MockBackend::start().await;
    with_grace(&mock);
    let room = join(config, Arc::new(LoopbackPeerFactory::default())).await;

    let (commands, rx) = mpsc::unbounded_channel();
    let task = tokio::spawn(room.run(rx));
    commands.send(RoomCommand::SendChat("from the loop".into())).unwrap();
    commands.send(RoomCommand::TogglePanel(SidePanel::Chat)).unwrap();
    commands.send(RoomCommand::Leave).unwrap();

    tokio::time::timeout(Duration::from_secs(5), task).await.unwrap().unwrap();
    assert!(mock.state().chat.iter().any(|m| m["content"] == "from the loop"));
    assert!(mock.calls().contains(&"leave 42".to_string()));
    mock.wait_for("socket close", |b| b.closed_sockets == 1).await;
}
