//! Token service: exchanges account credentials for a session token.
//!
//! The session only depends on the [`TokenService`] trait. The production
//! implementation, [`HttpTokenService`], posts the login form and reads the
//! token out of the `auth.chatango.com` cookie in the response.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::SET_COOKIE;

use crate::constants::{AUTH_COOKIE_NAME, DEFAULT_LOGIN_URL, HTTP_REQUEST_TIMEOUT};

/// Source of login tokens.
#[async_trait]
pub trait TokenService: Send + Sync {
    /// Fetch a token for `username`/`password`.
    ///
    /// `Ok(None)` means the credentials were rejected; `Err` means the
    /// service could not be reached.
    async fn fetch_token(&self, username: &str, password: &str) -> Result<Option<String>>;
}

/// Token service backed by the HTTP login form.
#[derive(Debug, Clone)]
pub struct HttpTokenService {
    client: reqwest::Client,
    login_url: String,
}

impl HttpTokenService {
    /// Service posting to `login_url`.
    pub fn new(login_url: impl Into<String>) -> Result<Self> {
        Self::with_timeout(login_url, HTTP_REQUEST_TIMEOUT)
    }

    /// Service posting to `login_url` with a custom request timeout.
    pub fn with_timeout(login_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        // The token is on the login response itself; following the redirect
        // would lose the Set-Cookie header.
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            login_url: login_url.into(),
        })
    }

    /// Login endpoint.
    #[must_use]
    pub fn login_url(&self) -> &str {
        &self.login_url
    }
}

#[async_trait]
impl TokenService for HttpTokenService {
    async fn fetch_token(&self, username: &str, password: &str) -> Result<Option<String>> {
        log::debug!("[Token] Requesting token for {username} from {}", self.login_url);

        let response = self
            .client
            .post(&self.login_url)
            .form(&[
                ("user_id", username),
                ("password", password),
                ("storecookie", "on"),
                ("checkerrors", "yes"),
            ])
            .send()
            .await
            .context("Failed to reach login service")?;

        let status = response.status();
        let token = response
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .find_map(auth_cookie_value);

        match &token {
            Some(_) => log::info!("[Token] Obtained token for {username}"),
            None => log::warn!("[Token] No token for {username} (HTTP {status})"),
        }
        Ok(token)
    }
}

impl Default for HttpTokenService {
    fn default() -> Self {
        Self {
            client: reqwest::Client::new(),
            login_url: DEFAULT_LOGIN_URL.to_string(),
        }
    }
}

/// Token service that always returns the same token.
///
/// Useful when a token was obtained out of band, and in tests.
#[derive(Clone)]
pub struct StaticTokenService {
    token: Option<String>,
}

impl StaticTokenService {
    /// Service returning `token`.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
        }
    }

    /// Service that rejects every login.
    #[must_use]
    pub fn rejecting() -> Self {
        Self { token: None }
    }
}

impl std::fmt::Debug for StaticTokenService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticTokenService")
            .field("has_token", &self.token.is_some())
            .finish()
    }
}

#[async_trait]
impl TokenService for StaticTokenService {
    async fn fetch_token(&self, _username: &str, _password: &str) -> Result<Option<String>> {
        Ok(self.token.clone())
    }
}

/// Value of the auth cookie in one `Set-Cookie` header, if present and
/// non-empty.
fn auth_cookie_value(header: &str) -> Option<String> {
    let pair = header.split(';').next()?.trim();
    let (name, value) = pair.split_once('=')?;
    (name.trim() == AUTH_COOKIE_NAME && !value.is_empty()).then(|| value.trim().to_string())
}
