//! REST client for the conferencing backend.

use std::time::Duration;

use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, instrument};

use crate::auth::{error_detail, AuthTokens, Credentials, Registration};
use crate::chat::ChatMessage;
use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::roster::{string_or_number, Participant};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CurrentUser {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(alias = "fullName")]
    pub full_name: String,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SessionInfo {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(Deserialize)]
struct DataList<T> {
    #[serde(default = "Vec::new")]
    data: Vec<T>,
}

#[derive(Serialize)]
struct NewChatMessage<'a> {
    content: &'a str,
}

#[derive(Clone)]
pub struct ApiClient {
    http: Client,
    config: ClientConfig,
}

impl ApiClient {
    pub fn new(config: ClientConfig) -> Result<Self> {
        let http = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self { http, config })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn get(&self, path: &str, token: &str) -> Result<RequestBuilder> {
        Ok(self.http.get(self.config.endpoint(path)?).bearer_auth(token))
    }

    fn post(&self, path: &str, token: &str) -> Result<RequestBuilder> {
        Ok(self.http.post(self.config.endpoint(path)?).bearer_auth(token))
    }

    #[instrument(skip_all, fields(user = %credentials.username))]
    pub async fn login(&self, credentials: &Credentials) -> Result<AuthTokens> {
        credentials.validate()?;
        let response = self
            .http
            .post(self.config.endpoint("auth/login")?)
            .form(&[
                ("username", credentials.username.as_str()),
                ("password", credentials.password.as_str()),
            ])
            .send()
            .await?;
        json_body(response, "Login failed.").await
    }

    #[instrument(skip_all, fields(email = %registration.email))]
    pub async fn register(&self, registration: &Registration) -> Result<()> {
        registration.validate()?;
        let response = self
            .http
            .post(self.config.endpoint("auth/register")?)
            .json(registration)
            .send()
            .await?;
        ok_body(response, "Signup failed.").await
    }

    pub async fn current_user(&self, token: &str) -> Result<CurrentUser> {
        let response = self.get("users/me", token)?.send().await?;
        json_body(response, "Could not load your profile.").await
    }

    pub async fn create_session(&self, token: &str, title: &str) -> Result<SessionInfo> {
        let response = self
            .post("sessions/", token)?
            .json(&json!({ "title": title }))
            .send()
            .await?;
        json_body(response, "Could not create the meeting.").await
    }

    pub async fn end_session(&self, token: &str, session_id: &str) -> Result<()> {
        self.session_action(token, session_id, "end").await
    }

    pub async fn join_session(&self, token: &str, session_id: &str) -> Result<()> {
        self.session_action(token, session_id, "join").await
    }

    pub async fn leave_session(&self, token: &str, session_id: &str) -> Result<()> {
        self.session_action(token, session_id, "leave").await
    }

    pub async fn participants(&self, token: &str, session_id: &str) -> Result<Vec<Participant>> {
        let response = self
            .get(&format!("sessions/{session_id}/participants"), token)?
            .send()
            .await?;
        let list: DataList<Participant> = json_body(response, "Could not load participants.").await?;
        Ok(list.data)
    }

    pub async fn chat_history(&self, token: &str, session_id: &str) -> Result<Vec<ChatMessage>> {
        let response = self
            .get(&format!("sessions/{session_id}/chat/"), token)?
            .send()
            .await?;
        let list: DataList<ChatMessage> = json_body(response, "Could not load chat.").await?;
        Ok(list.data)
    }

    pub async fn send_chat(&self, token: &str, session_id: &str, content: &str) -> Result<ChatMessage> {
        let response = self
            .post(&format!("sessions/{session_id}/chat/"), token)?
            .json(&NewChatMessage { content })
            .send()
            .await?;
        json_body(response, "Message not sent.").await
    }

    pub async fn start_recording(&self, token: &str, session_id: &str) -> Result<()> {
        self.session_action(token, session_id, "recording/start").await
    }

    pub async fn stop_recording(&self, token: &str, session_id: &str) -> Result<()> {
        self.session_action(token, session_id, "recording/stop").await
    }

    pub async fn start_screen_share(&self, token: &str, session_id: &str) -> Result<()> {
        self.session_action(token, session_id, "screenshare/start").await
    }

    pub async fn stop_screen_share(&self, token: &str, session_id: &str) -> Result<()> {
        self.session_action(token, session_id, "screenshare/stop").await
    }

    async fn session_action(&self, token: &str, session_id: &str, action: &str) -> Result<()> {
        debug!(session = session_id, action, "session action");
        let response = self
            .post(&format!("sessions/{session_id}/{action}"), token)?
            .send()
            .await?;
        ok_body(response, "Request failed.").await
    }
}

async fn check(response: Response, fallback: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ClientError::Api {
        status: status.as_u16(),
        detail: error_detail(&body, fallback),
    })
}

async fn json_body<T: DeserializeOwned>(response: Response, fallback: &str) -> Result<T> {
    let response = check(response, fallback).await?;
    let bytes = response.bytes().await?;
    Ok(serde_json::from_slice(&bytes)?)
}

async fn ok_body(response: Response, fallback: &str) -> Result<()> {
    check(response, fallback).await.map(|_| ())
}
