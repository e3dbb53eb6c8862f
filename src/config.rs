use std::time::Duration;

use reqwest::Url;

use crate::error::{ClientError, Result};

pub const DEFAULT_API_BASE: &str = "http://localhost:8000";
pub const DEFAULT_ROSTER_POLL: Duration = Duration::from_millis(1500);
pub const DEFAULT_CHAT_POLL: Duration = Duration::from_millis(2000);

const API_PREFIX: &str = "api/v1/";

/// Where the backend lives and how often the meeting room polls it.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    api_base: Url,
    pub roster_poll: Duration,
    pub chat_poll: Duration,
}

impl ClientConfig {
    pub fn new(api_base: &str) -> Result<Self> {
        Ok(Self {
            api_base: parse_base(api_base)?,
            roster_poll: DEFAULT_ROSTER_POLL,
            chat_poll: DEFAULT_CHAT_POLL,
        })
    }

    /// Reads `WOLFCONF_API_BASE`, `WOLFCONF_ROSTER_POLL_MS` and
    /// `WOLFCONF_CHAT_POLL_MS`, falling back to the defaults.
    pub fn from_env() -> Result<Self> {
        let base = std::env::var("WOLFCONF_API_BASE").unwrap_or_else(|_| DEFAULT_API_BASE.into());
        let mut config = Self::new(&base)?;
        if let Some(ms) = env_millis("WOLFCONF_ROSTER_POLL_MS")? {
            config.roster_poll = ms;
        }
        if let Some(ms) = env_millis("WOLFCONF_CHAT_POLL_MS")? {
            config.chat_poll = ms;
        }
        Ok(config)
    }

    pub fn api_base(&self) -> &Url {
        &self.api_base
    }

    /// `{api_base}/api/v1/{path}`
    pub fn endpoint(&self, path: &str) -> Result<Url> {
        self.api_base
            .join(API_PREFIX)
            .and_then(|api| api.join(path.trim_start_matches('/')))
            .map_err(|e| ClientError::Config(format!("bad endpoint {path}: {e}")))
    }

    /// Signaling socket for one session; the access token rides in the query.
    pub fn signaling_url(&self, session_id: &str, token: &str) -> Result<Url> {
        let mut url = self
            .api_base
            .join(&format!("ws/{session_id}"))
            .map_err(|e| ClientError::Config(format!("bad session id {session_id}: {e}")))?;
        let scheme = match url.scheme() {
            "https" => "wss",
            _ => "ws",
        };
        url.set_scheme(scheme)
            .map_err(|_| ClientError::Config(format!("cannot use {scheme} with {}", self.api_base)))?;
        url.query_pairs_mut().clear().append_pair("token", token);
        Ok(url)
    }
}

fn parse_base(raw: &str) -> Result<Url> {
    let mut url = Url::parse(raw).map_err(|e| ClientError::Config(format!("{raw}: {e}")))?;
    match url.scheme() {
        "http" | "https" => {}
        other => {
            return Err(ClientError::Config(format!(
                "api base must be http or https, got {other}"
            )))
        }
    }
    // Url::join drops the last segment unless the path ends with '/'.
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

fn env_millis(key: &str) -> Result<Option<Duration>> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<u64>()
            .map(|ms| Some(Duration::from_millis(ms)))
            .map_err(|e| ClientError::Config(format!("{key}={raw}: {e}"))),
        Err(_) => Ok(None),
    }
}
