// src/site/client.rs
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, StatusCode, Url};

use crate::site::models::{FetchedDocument, SessionToken};
use crate::site::rate_limit::RateGate;
use crate::site::session::{AnonymousCredentials, CredentialProvider, FormLoginCredentials, SessionProvider};
use crate::utils::config::Config;
use crate::utils::error::FetchError;

pub const USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) report-fetcher/0.1";

/// Redirect hops followed per request before giving up.
const MAX_REDIRECTS: usize = 5;

/// Network access as seen by the locator and the extraction cascade.
#[async_trait]
pub trait DocumentFetcher: Send + Sync {
    /// Base URL of the listing site, used to resolve relative links.
    fn base_url(&self) -> &str;

    /// Fetches a markup page as text.
    async fn fetch_page(&self, url: &str) -> Result<String, FetchError>;

    /// Fetches a (possibly large) binary document.
    async fn fetch_document(&self, url: &str) -> Result<FetchedDocument, FetchError>;
}

/// The connection context: one HTTP client, the cached session and both
/// pacing gates. Created once per process and shared by reference.
pub struct SiteClient {
    http: reqwest::Client,
    base_url: Url,
    session: SessionProvider,
    page_gate: Arc<RateGate>,
    bulk_gate: RateGate,
    bulk_hosts: Vec<String>,
    page_timeout: Duration,
    download_timeout: Duration,
    max_download_bytes: u64,
}

impl SiteClient {
    /// Builds the context from configuration, picking form login when
    /// credentials are present and anonymous access otherwise.
    pub fn new(config: &Config) -> Result<Self, FetchError> {
        let page_gate = Arc::new(RateGate::new("page", config.page_delay));
        let credentials: Arc<dyn CredentialProvider> = if config.has_credentials() {
            Arc::new(FormLoginCredentials::new(
                &config.site_base_url,
                &config.username,
                &config.password,
                config.session_ttl,
                config.page_timeout,
                Arc::clone(&page_gate),
            )?)
        } else {
            tracing::warn!("No site credentials configured, continuing without a session cookie");
            Arc::new(AnonymousCredentials::new(config.session_ttl))
        };
        Self::with_credentials(config, credentials, page_gate)
    }

    pub fn with_credentials(
        config: &Config,
        credentials: Arc<dyn CredentialProvider>,
        page_gate: Arc<RateGate>,
    ) -> Result<Self, FetchError> {
        let base_url = Url::parse(&config.site_base_url)
            .map_err(|_| FetchError::InvalidUrl(config.site_base_url.clone()))?;
        // Redirects are followed in `send` so each hop is gated by its own host.
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        Ok(Self {
            http,
            base_url,
            session: SessionProvider::new(credentials),
            page_gate,
            bulk_gate: RateGate::new("bulk", config.bulk_delay),
            bulk_hosts: config.bulk_hosts.clone(),
            page_timeout: config.page_timeout,
            download_timeout: config.download_timeout,
            max_download_bytes: config.max_download_bytes,
        })
    }

    fn is_site_host(&self, url: &Url) -> bool {
        url.host_str() == self.base_url.host_str()
    }

    fn is_bulk_host(&self, url: &Url) -> bool {
        let Some(host) = url.host_str() else { return false };
        let host = host.to_ascii_lowercase();
        self.bulk_hosts
            .iter()
            .any(|bulk| host == *bulk || host.ends_with(&format!(".{}", bulk)))
    }

    /// Each hop is paced by the gate of the host it goes to.
    fn gate_for(&self, url: &Url) -> &RateGate {
        if self.is_bulk_host(url) {
            &self.bulk_gate
        } else {
            self.page_gate.as_ref()
        }
    }

    /// Sends a GET and follows redirects hop by hop, so every hop gets the
    /// cookie scope and pacing gate of its own host.
    async fn send(&self, url: &str, timeout: Duration, accept: &str) -> Result<reqwest::Response, FetchError> {
        let mut current = Url::parse(url).map_err(|_| FetchError::InvalidUrl(url.to_string()))?;
        for _ in 0..=MAX_REDIRECTS {
            let response = self.send_authenticated(&current, timeout, accept).await?;
            let status = response.status();
            if !status.is_redirection() {
                return Ok(response);
            }
            let next = redirect_target(&current, response.headers()).ok_or(FetchError::Http(status))?;
            tracing::debug!("{} redirected to {}", current, next);
            current = next;
        }
        Err(FetchError::TooManyRedirects(url.to_string()))
    }

    /// Attaches the session cookie for the listing site only. A 401/403 from
    /// the site discards the session and retries exactly once.
    async fn send_authenticated(
        &self,
        url: &Url,
        timeout: Duration,
        accept: &str,
    ) -> Result<reqwest::Response, FetchError> {
        if !self.is_site_host(url) {
            return self.send_once(url, None, timeout, accept).await;
        }

        let token = self.session.get_session().await?;
        match self.send_once(url, Some(&token), timeout, accept).await {
            Err(e) if e.is_auth_failure() => {
                tracing::warn!("{} for {}, refreshing session and retrying once", e, url);
                self.session.invalidate(&token).await;
                let fresh = self.session.get_session().await?;
                self.send_once(url, Some(&fresh), timeout, accept).await
            }
            other => other,
        }
    }

    /// One gated request. Success and redirect responses are returned as is.
    async fn send_once(
        &self,
        url: &Url,
        session: Option<&SessionToken>,
        timeout: Duration,
        accept: &str,
    ) -> Result<reqwest::Response, FetchError> {
        self.gate_for(url).wait().await;
        let mut request = self
            .http
            .get(url.clone())
            .timeout(timeout)
            .header(header::ACCEPT, accept);
        if let Some(token) = session.filter(|t| t.has_cookie()) {
            request = request.header(header::COOKIE, &token.cookie);
        }

        tracing::debug!("GET {}", url);
        let response = request.send().await?;
        let status = response.status();
        if status.is_success() || status.is_redirection() {
            return Ok(response);
        }

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            if session.is_some() {
                return Err(FetchError::Unauthorized(status));
            }
            tracing::warn!("Received {} from {} - check rate limits", status, url);
            return Err(FetchError::Http(status));
        }

        tracing::error!("HTTP error status: {} for URL: {}", status, url);
        Err(FetchError::Http(status))
    }
}

#[async_trait]
impl DocumentFetcher for SiteClient {
    fn base_url(&self) -> &str {
        self.base_url.as_str()
    }

    async fn fetch_page(&self, url: &str) -> Result<String, FetchError> {
        let response = self
            .send(url, self.page_timeout, "text/html,application/xhtml+xml,*/*")
            .await?;
        let body = response.text().await?;
        tracing::debug!("Fetched {} bytes of markup from {}", body.len(), url);
        Ok(body)
    }

    async fn fetch_document(&self, url: &str) -> Result<FetchedDocument, FetchError> {
        let mut response = self
            .send(url, self.download_timeout, "application/pdf,text/html,*/*")
            .await?;

        let limit = self.max_download_bytes;
        if response.content_length().is_some_and(|len| len > limit) {
            return Err(FetchError::TooLarge { limit });
        }

        let final_url = response.url().to_string();
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        // Content-Length can be absent or wrong, so enforce the cap while streaming.
        let mut bytes = Vec::new();
        while let Some(chunk) = response.chunk().await? {
            if bytes.len() as u64 + chunk.len() as u64 > limit {
                return Err(FetchError::TooLarge { limit });
            }
            bytes.extend_from_slice(&chunk);
        }

        tracing::info!("Downloaded {} bytes from {}", bytes.len(), final_url);
        Ok(FetchedDocument {
            url: final_url,
            content_type,
            bytes,
        })
    }
}

/// Where a redirect response points, resolved against the URL that produced it.
fn redirect_target(current: &Url, headers: &header::HeaderMap) -> Option<Url> {
    let location = headers.get(header::LOCATION)?.to_str().ok()?;
    current.join(location.trim()).ok()
}

/// Resolves a possibly relative link against `base`.
pub fn resolve_url(base: &str, href: &str) -> Option<String> {
    let base = Url::parse(base).ok()?;
    base.join(href.trim()).ok().map(|u| u.to_string())
}
