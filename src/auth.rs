use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ClientError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthTokens {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default = "default_token_type")]
    pub token_type: String,
}

fn default_token_type() -> String {
    "bearer".into()
}

impl AuthTokens {
    pub fn bearer(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: None,
            token_type: default_token_type(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn validate(&self) -> Result<()> {
        if self.username.trim().is_empty() || self.password.trim().is_empty() {
            return Err(ClientError::Validation(
                "Username and password are required.".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Registration {
    #[serde(rename = "fullName")]
    pub full_name: String,
    pub email: String,
    pub password: String,
}

impl Registration {
    /// Local checks only; the backend validates again.
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: &str| -> Result<()> { Err(ClientError::Validation(msg.into())) };

        if [&self.full_name, &self.email, &self.password]
            .iter()
            .any(|field| field.trim().is_empty())
        {
            return fail("All fields are required.");
        }
        if !looks_like_email(&self.email) {
            return fail("Please enter a valid email address.");
        }
        if self.password.chars().count() < 8 {
            return fail("Password must be at least 8 characters long.");
        }
        if !self.password.chars().any(|c| c.is_ascii_digit()) {
            return fail("Password must contain at least one number.");
        }
        if !self.password.chars().any(|c| c.is_ascii_uppercase()) {
            return fail("Password must contain at least one uppercase letter.");
        }
        Ok(())
    }
}

// Unanchored; the backend does the strict check.
static EMAIL: Lazy<Regex> = Lazy::new(|| Regex::new(r".+@.+\..+").unwrap());

fn looks_like_email(email: &str) -> bool {
    EMAIL.is_match(email)
}

/// Pulls a human readable message out of a FastAPI style error body:
/// `{"detail": "..."}` or `{"detail": [{"msg": "..."}]}`.
pub fn error_detail(body: &str, fallback: &str) -> String {
    let Ok(value) = serde_json::from_str::<Value>(body) else {
        return fallback.to_string();
    };
    match value.get("detail") {
        Some(Value::String(detail)) if !detail.is_empty() => detail.clone(),
        Some(Value::Array(items)) => items
            .first()
            .and_then(|item| item.get("msg"))
            .and_then(Value::as_str)
            .unwrap_or(fallback)
            .to_string(),
        _ => fallback.to_string(),
    }
}
