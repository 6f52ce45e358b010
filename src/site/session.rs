// src/site/session.rs
//! Authenticated session handling for the listing site.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use once_cell::sync::Lazy;
use reqwest::header::{self, HeaderMap};
use scraper::{Html, Selector};
use tokio::sync::Mutex;

use crate::site::models::SessionToken;
use crate::site::rate_limit::RateGate;
use crate::utils::error::AuthError;

static CSRF_INPUT_SELECTOR: Lazy<Selector> = Lazy::new(|| {
    Selector::parse("input[name='csrfmiddlewaretoken']")
        .expect("Failed to compile CSRF_INPUT_SELECTOR")
});

/// Produces a fresh session. Implementations perform the actual login.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn login(&self) -> Result<SessionToken, AuthError>;
}

/// Caches one session for the whole process and coalesces refreshes.
///
/// The token lives behind an async mutex that is held for the duration of a
/// login, so callers arriving while a login is in flight wait for it and then
/// reuse its token instead of starting their own.
pub struct SessionProvider {
    credentials: Arc<dyn CredentialProvider>,
    token: Mutex<Option<SessionToken>>,
}

impl SessionProvider {
    pub fn new(credentials: Arc<dyn CredentialProvider>) -> Self {
        Self {
            credentials,
            token: Mutex::new(None),
        }
    }

    /// Returns the cached session, logging in first if it is missing or expired.
    pub async fn get_session(&self) -> Result<SessionToken, AuthError> {
        let mut guard = self.token.lock().await;
        if let Some(token) = guard.as_ref() {
            if token.is_valid_at(Utc::now()) {
                return Ok(token.clone());
            }
            tracing::info!("Session expired at {}, logging in again", token.expires_at);
        }

        let fresh = self.credentials.login().await?;
        tracing::info!("Obtained new session valid until {}", fresh.expires_at);
        *guard = Some(fresh.clone());
        Ok(fresh)
    }

    /// Discards the cached session only if it is still the one that was
    /// rejected; a newer token obtained by another caller is kept.
    pub async fn invalidate(&self, rejected: &SessionToken) {
        let mut guard = self.token.lock().await;
        if guard.as_ref() == Some(rejected) {
            tracing::warn!("Session rejected by site, discarding cached cookie");
            *guard = None;
        }
    }
}

/// Hands out cookie-less sessions when no credentials are configured.
pub struct AnonymousCredentials {
    ttl: Duration,
}

impl AnonymousCredentials {
    pub fn new(ttl: Duration) -> Self {
        Self { ttl }
    }
}

#[async_trait]
impl CredentialProvider for AnonymousCredentials {
    async fn login(&self) -> Result<SessionToken, AuthError> {
        Ok(SessionToken::anonymous(Utc::now() + chrono_duration(self.ttl)))
    }
}

/// Logs in through the site's HTML form: fetch the login page for its CSRF
/// token and pre-session cookie, then post the credentials and expect a
/// redirect away from the login page.
pub struct FormLoginCredentials {
    http: reqwest::Client,
    login_url: String,
    username: String,
    password: String,
    ttl: Duration,
    gate: Arc<RateGate>,
}

impl FormLoginCredentials {
    pub fn new(
        base_url: &str,
        username: &str,
        password: &str,
        ttl: Duration,
        timeout: Duration,
        gate: Arc<RateGate>,
    ) -> Result<Self, AuthError> {
        // Redirects must stay visible: the 302 to the home page is the success signal.
        let http = reqwest::Client::builder()
            .user_agent(crate::site::client::USER_AGENT)
            .redirect(reqwest::redirect::Policy::none())
            .timeout(timeout)
            .build()?;

        Ok(Self {
            http,
            login_url: format!("{}/login/", base_url.trim_end_matches('/')),
            username: username.to_string(),
            password: password.to_string(),
            ttl,
            gate,
        })
    }
}

#[async_trait]
impl CredentialProvider for FormLoginCredentials {
    async fn login(&self) -> Result<SessionToken, AuthError> {
        tracing::info!("Logging in to {}", self.login_url);
        let mut jar: Vec<(String, String)> = Vec::new();

        self.gate.wait().await;
        let page = self.http.get(&self.login_url).send().await?;
        merge_set_cookies(&mut jar, page.headers());
        let body = page.text().await?;
        let csrf = find_csrf_token(&body).ok_or(AuthError::MissingCsrfToken)?;
        tracing::debug!("Got CSRF token and {} pre-session cookie(s)", jar.len());

        self.gate.wait().await;
        let response = self
            .http
            .post(&self.login_url)
            .header(header::COOKIE, cookie_header(&jar))
            .header(header::REFERER, &self.login_url)
            .form(&[
                ("csrfmiddlewaretoken", csrf.as_str()),
                ("username", self.username.as_str()),
                ("password", self.password.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        let location = response
            .headers()
            .get(header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        if !status.is_redirection() || location.contains("/login") {
            tracing::error!("Login rejected: status {} location '{}'", status, location);
            return Err(AuthError::Rejected(status));
        }

        merge_set_cookies(&mut jar, response.headers());
        if jar.is_empty() {
            return Err(AuthError::NoCookies);
        }

        let user_id = jar
            .iter()
            .find(|(name, _)| name == "user_id" || name == "uid")
            .map(|(_, value)| value.clone());

        Ok(SessionToken {
            cookie: cookie_header(&jar),
            expires_at: Utc::now() + chrono_duration(self.ttl),
            user_id,
        })
    }
}

/// Reads the CSRF token from the login form.
pub fn find_csrf_token(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    document
        .select(&CSRF_INPUT_SELECTOR)
        .next()
        .and_then(|input| input.value().attr("value"))
        .map(str::to_string)
        .filter(|v| !v.is_empty())
}

/// Folds `Set-Cookie` headers into the jar; a later cookie replaces an earlier
/// one with the same name.
pub fn merge_set_cookies(jar: &mut Vec<(String, String)>, headers: &HeaderMap) {
    for value in headers.get_all(header::SET_COOKIE) {
        let Ok(raw) = value.to_str() else { continue };
        let pair = raw.split(';').next().unwrap_or_default();
        let Some((name, value)) = pair.split_once('=') else { continue };
        let name = name.trim().to_string();
        let value = value.trim().to_string();
        match jar.iter_mut().find(|(existing, _)| *existing == name) {
            Some(entry) => entry.1 = value,
            None => jar.push((name, value)),
        }
    }
}

fn cookie_header(jar: &[(String, String)]) -> String {
    jar.iter()
        .map(|(name, value)| format!("{}={}", name, value))
        .collect::<Vec<_>>()
        .join("; ")
}

fn chrono_duration(ttl: Duration) -> chrono::Duration {
    chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::hours(24))
}
