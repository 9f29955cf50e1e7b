//! OAuth2 password-grant token client.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::Utc;
use pagebuild_core::{Error, Result};
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::debug;

/// Tokens expiring within this many seconds are refreshed.
const EXPIRY_MARGIN_SECS: i64 = 5;

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct TokenClaims {
    exp: i64,
}

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    expires_at: i64,
}

impl CachedToken {
    fn is_fresh(&self, now: i64) -> bool {
        self.expires_at - now >= EXPIRY_MARGIN_SECS
    }
}

/// Fetches and caches access tokens for the compute-control API.
pub struct TokenClient {
    http: reqwest::Client,
    token_url: String,
    username: String,
    password: String,
    token: Mutex<Option<CachedToken>>,
}

impl TokenClient {
    pub fn new(
        http: reqwest::Client,
        token_url: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            http,
            token_url: token_url.into(),
            username: username.into(),
            password: password.into(),
            token: Mutex::new(None),
        }
    }

    /// Return the cached token, refreshing it if it is about to expire.
    pub async fn access_token(&self) -> Result<String> {
        // Held across the refresh so concurrent callers share one request.
        let mut cached = self.token.lock().await;

        let now = Utc::now().timestamp();
        if let Some(token) = cached.as_ref().filter(|t| t.is_fresh(now)) {
            return Ok(token.value.clone());
        }

        let token = self.fetch_token().await?;
        let value = token.value.clone();
        *cached = Some(token);
        Ok(value)
    }

    async fn fetch_token(&self) -> Result<CachedToken> {
        debug!(url = %self.token_url, "Requesting new access token");

        let params = [
            ("grant_type", "password"),
            ("username", self.username.as_str()),
            ("password", self.password.as_str()),
            ("response_type", "token"),
        ];

        let response = self
            .http
            .post(&self.token_url)
            .basic_auth("cf", Some(""))
            .form(&params)
            .send()
            .await
            .map_err(|e| Error::Auth(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(Error::Auth(format!("token request failed ({}): {}", status, text)));
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| Error::Auth(e.to_string()))?;

        let now = Utc::now().timestamp();
        let expires_at = token_expiry(&body.access_token)
            .or_else(|| body.expires_in.map(|secs| now + secs))
            .unwrap_or(now);

        Ok(CachedToken {
            value: body.access_token,
            expires_at,
        })
    }
}

/// Read the `exp` claim of a JWT without verifying it.
fn token_expiry(token: &str) -> Option<i64> {
    let payload = token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    let claims: TokenClaims = serde_json::from_slice(&bytes).ok()?;
    Some(claims.exp)
}
