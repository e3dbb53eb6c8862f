#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, MethodRouter};
use axum::{Form, Json, Router};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use wolfconf_meet::config::ClientConfig;

pub const TOKEN: &str = "token-ada";
pub const PASSWORD: &str = "Secret123";
pub const SELF_ID: i64 = 1;
pub const SELF_NAME: &str = "Ada Lovelace";

#[derive(Default)]
pub struct Backend {
    pub participants: Vec<Value>,
    pub chat: Vec<Value>,
    pub calls: Vec<String>,
    pub received: Vec<Value>,
    pub sockets: Vec<(usize, mpsc::UnboundedSender<String>)>,
    pub opened_sockets: usize,
    pub closed_sockets: usize,
    pub fail_recording: bool,
    pub fail_socket: bool,
}

/// REST + signaling backend living inside the test process.
#[derive(Clone, Default)]
pub struct MockBackend {
    inner: Arc<Mutex<Backend>>,
}

impl MockBackend {
    pub async fn start() -> (MockBackend, ClientConfig) {
        let mock = MockBackend::default();
        let app = Router::new()
            .route("/api/v1/auth/login", post(login))
            .route("/api/v1/auth/register", post(register))
            .route("/api/v1/users/me", get(me))
            .route("/api/v1/sessions/", post(create_session))
            .route("/api/v1/sessions/:id/participants", get(participants))
            .route("/api/v1/sessions/:id/chat/", get(chat_history).post(send_chat))
            .route("/api/v1/sessions/:id/join", action("join"))
            .route("/api/v1/sessions/:id/leave", action("leave"))
            .route("/api/v1/sessions/:id/end", action("end"))
            .route("/api/v1/sessions/:id/recording/start", action("recording/start"))
            .route("/api/v1/sessions/:id/recording/stop", action("recording/stop"))
            .route("/api/v1/sessions/:id/screenshare/start", action("screenshare/start"))
            .route("/api/v1/sessions/:id/screenshare/stop", action("screenshare/stop"))
            .route("/ws/:session_id", get(ws_handler))
            .with_state(mock.clone());

        let listener = TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0)))
            .await
            .unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app.into_make_service()).await.unwrap();
        });

        let mut config = ClientConfig::new(&format!("http://{addr}")).unwrap();
        config.roster_poll = Duration::from_millis(50);
        config.chat_poll = Duration::from_millis(50);
        (mock, config)
    }

    pub fn state(&self) -> MutexGuard<'_, Backend> {
        self.inner.lock().unwrap()
    }

    pub fn set_participants(&self, list: Value) {
        self.state().participants = list.as_array().cloned().unwrap_or_default();
    }

    pub fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }

    pub fn received(&self) -> Vec<Value> {
        self.state().received.clone()
    }

    pub fn received_of(&self, kind: &str) -> Vec<Value> {
        self.received()
            .into_iter()
            .filter(|m| m["type"] == kind)
            .collect()
    }

    /// Pushes `message` to every connected socket.
    pub fn push(&self, message: Value) {
        let text = message.to_string();
        for (_, socket) in &self.state().sockets {
            let _ = socket.send(text.clone());
        }
    }

    pub async fn wait_for(&self, what: &str, mut done: impl FnMut(&Backend) -> bool) {
        let waited = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if done(&self.state()) {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
        assert!(waited.is_ok(), "timed out waiting for {what}");
    }
}

pub fn participant(id: i64, user_id: i64, name: &str) -> Value {
    json!({ "id": id, "user_id": user_id, "full_name": name, "role": "participant" })
}

fn unauthorized() -> Response {
    (StatusCode::UNAUTHORIZED, Json(json!({ "detail": "Not authenticated" }))).into_response()
}

fn authorized(headers: &HeaderMap) -> bool {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == format!("Bearer {TOKEN}"))
}

#[derive(Deserialize)]
struct LoginForm {
    username: String,
    password: String,
}

async fn login(State(mock): State<MockBackend>, Form(form): Form<LoginForm>) -> Response {
    mock.state().calls.push(format!("login {}", form.username));
    if form.password != PASSWORD {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "detail": "Incorrect username or password" })),
        )
            .into_response();
    }
    Json(json!({ "access_token": TOKEN, "token_type": "bearer" })).into_response()
}

async fn register(State(mock): State<MockBackend>, Json(body): Json<Value>) -> Response {
    mock.state().calls.push(format!("register {}", body["fullName"].as_str().unwrap_or("")));
    if body["email"] == "taken@example.com" {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "detail": [{ "msg": "Email already registered" }] })),
        )
            .into_response();
    }
    (StatusCode::CREATED, Json(json!({ "id": 2 }))).into_response()
}

async fn me(headers: HeaderMap) -> Response {
    if !authorized(&headers) {
        return unauthorized();
    }
    Json(json!({ "id": SELF_ID, "full_name": SELF_NAME, "email": "ada@example.com" })).into_response()
}

async fn create_session(
    State(mock): State<MockBackend>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if !authorized(&headers) {
        return unauthorized();
    }
    mock.state().calls.push("create".into());
    Json(json!({ "id": 42, "title": body["title"] })).into_response()
}

async fn participants(State(mock): State<MockBackend>, headers: HeaderMap) -> Response {
    if !authorized(&headers) {
        return unauthorized();
    }
    Json(json!({ "data": mock.state().participants })).into_response()
}

async fn chat_history(State(mock): State<MockBackend>, headers: HeaderMap) -> Response {
    if !authorized(&headers) {
        return unauthorized();
    }
    Json(json!({ "data": mock.state().chat })).into_response()
}

async fn send_chat(
    State(mock): State<MockBackend>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if !authorized(&headers) {
        return unauthorized();
    }
    let mut state = mock.state();
    let id = state.chat.len() + 100;
    state.chat.push(json!({ "id": id, "user_full_name": SELF_NAME, "content": body["content"] }));
    // the saved copy comes back without an author
    Json(json!({ "id": id, "content": body["content"] })).into_response()
}

fn action(name: &'static str) -> MethodRouter<MockBackend> {
    post(
        move |State(mock): State<MockBackend>, Path(id): Path<String>, headers: HeaderMap| async move {
            if !authorized(&headers) {
                return unauthorized();
            }
            let mut state = mock.state();
            state.calls.push(format!("{name} {id}"));
            if name == "recording/start" && state.fail_recording {
                return (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "detail": "no storage" })))
                    .into_response();
            }
            Json(json!({ "status": "ok" })).into_response()
        },
    )
}

#[derive(Deserialize)]
struct WsQuery {
    token: String,
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(session_id): Path<String>,
    Query(query): Query<WsQuery>,
    State(mock): State<MockBackend>,
) -> Response {
    if query.token != TOKEN {
        return unauthorized();
    }
    if mock.state().fail_socket {
        return (StatusCode::SERVICE_UNAVAILABLE, "signaling offline").into_response();
    }
    ws.on_upgrade(move |socket| handle_socket(socket, session_id, mock))
}

async fn handle_socket(socket: WebSocket, session_id: String, mock: MockBackend) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let mine = {
        let mut state = mock.state();
        state.opened_sockets += 1;
        let mine = state.opened_sockets;
        state.sockets.push((mine, tx));
        state.calls.push(format!("ws {session_id}"));
        mine
    };

    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sender.send(Message::Text(msg)).await.is_err() {
                return;
            }
        }
        // dropped from the backend: hang up on the client
        let _ = sender.send(Message::Close(None)).await;
    });

    let recorder = mock.clone();
    let recv_task = tokio::spawn(async move {
        while let Some(Ok(Message::Text(text))) = receiver.next().await {
            if let Ok(value) = serde_json::from_str::<Value>(&text) {
                recorder.state().received.push(value);
            }
        }
    });

    tokio::select! {
        _ = send_task => (),
        _ = recv_task => (),
    }

    let mut state = mock.state();
    state.sockets.retain(|(id, _)| *id != mine);
    state.closed_sockets += 1;
}
