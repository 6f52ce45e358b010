// src/site/models.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::fiscal_year::FiscalYear;

/// An authenticated session against the listing site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionToken {
    /// All `Set-Cookie` name=value pairs joined with "; ".
    pub cookie: String,
    pub expires_at: DateTime<Utc>,
    pub user_id: Option<String>,
}

impl SessionToken {
    /// A cookie-less session used when no credentials are configured.
    pub fn anonymous(expires_at: DateTime<Utc>) -> Self {
        Self {
            cookie: String::new(),
            expires_at,
            user_id: None,
        }
    }

    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }

    pub fn has_cookie(&self) -> bool {
        !self.cookie.is_empty()
    }
}

/// A located report link that has not been downloaded or validated yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateDocument {
    pub fiscal_year: FiscalYear,
    /// Absolute URL of the document or of an intermediary page pointing at it.
    pub url: String,
    /// Exchange or host the listing attributes the document to, e.g. "bse".
    pub origin: String,
}

/// Raw response body plus the content type the server declared.
#[derive(Debug, Clone)]
pub struct FetchedDocument {
    /// Final URL after HTTP redirects.
    pub url: String,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

impl FetchedDocument {
    /// True when the body is a markup page rather than a binary document.
    pub fn is_html(&self) -> bool {
        if let Some(ct) = &self.content_type {
            let ct = ct.to_ascii_lowercase();
            if ct.contains("text/html") || ct.contains("application/xhtml") {
                return true;
            }
            if ct.contains("application/pdf") || ct.contains("octet-stream") {
                return false;
            }
        }
        let head: Vec<u8> = self
            .bytes
            .iter()
            .skip_while(|b| b.is_ascii_whitespace())
            .take(15)
            .map(|b| b.to_ascii_lowercase())
            .collect();
        head.starts_with(b"<!doctype html") || head.starts_with(b"<html")
    }
}
