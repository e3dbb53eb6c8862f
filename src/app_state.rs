use std::sync::Arc;

use tokio::sync::RwLock;

use crate::api::ApiClient;
use crate::auth::{AuthTokens, Credentials};
use crate::config::ClientConfig;
use crate::error::{ClientError, Result};

// Tab-scoped state shared by every screen: the backend client and whatever
// tokens the last login produced.
#[derive(Clone)]
pub struct AppState {
    pub config: ClientConfig,
    pub api: ApiClient,
    tokens: Arc<RwLock<Option<AuthTokens>>>,
}

impl AppState {
    pub fn new(config: ClientConfig) -> Result<Self> {
        let api = ApiClient::new(config.clone())?;
        Ok(Self {
            config,
            api,
            tokens: Arc::new(RwLock::new(None)),
        })
    }

    pub async fn login(&self, credentials: &Credentials) -> Result<AuthTokens> {
        let tokens = self.api.login(credentials).await?;
        *self.tokens.write().await = Some(tokens.clone());
        Ok(tokens)
    }

    pub async fn set_tokens(&self, tokens: AuthTokens) {
        *self.tokens.write().await = Some(tokens);
    }

    pub async fn logout(&self) {
        self.tokens.write().await.take();
    }

    pub async fn tokens(&self) -> Option<AuthTokens> {
        self.tokens.read().await.clone()
    }

    pub async fn access_token(&self) -> Result<String> {
        self.tokens
            .read()
            .await
            .as_ref()
            .map(|t| t.access_token.clone())
            .ok_or(ClientError::NotAuthenticated)
    }
}
