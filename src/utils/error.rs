// src/utils/error.rs
use thiserror::Error;

// Define specific error types for different parts of the application
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Login request failed: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Login page did not contain a CSRF token")]
    MissingCsrfToken,

    #[error("Login rejected with HTTP status {0}")]
    Rejected(reqwest::StatusCode),

    #[error("Login succeeded but no session cookies were issued")]
    NoCookies,
}

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Network request failed: {0}")]
    Network(#[from] reqwest::Error), // Automatically convert reqwest errors

    #[error("HTTP error: {0}")]
    Http(reqwest::StatusCode), // e.g., 404 Not Found, 500

    #[error("Request rejected as unauthenticated: {0}")]
    Unauthorized(reqwest::StatusCode), // 401 / 403

    #[error("Response exceeds size limit of {limit} bytes")]
    TooLarge { limit: u64 },

    #[error("Invalid URL '{0}'")]
    InvalidUrl(String),

    #[error("Too many redirects starting from '{0}'")]
    TooManyRedirects(String),

    #[error("Session unavailable: {0}")]
    Auth(#[from] AuthError),
}

impl FetchError {
    /// True for failures that warrant discarding the session and retrying once.
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, FetchError::Unauthorized(_))
    }
}

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("PDF extraction failed: {0}")]
    Pdf(String),

    #[error("OCR service failed: {0}")]
    Ocr(String),

    #[error("LLM service failed: {0}")]
    Llm(String),

    #[error("Service not configured: {0}")]
    NotConfigured(&'static str),
}

/// Why a single strategy or candidate failed. Never escapes the cascade.
#[derive(Error, Debug)]
pub enum AttemptFailure {
    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("extraction failed: {0}")]
    Extract(#[from] ExtractError),

    #[error("content too short ({chars} chars, required {required})")]
    TooShort { chars: usize, required: usize },

    #[error("content rejected: {0}")]
    Corrupted(String),

    #[error("skipped: {0}")]
    Skipped(String),
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error), // Automatically convert IO errors

    #[error("Site interaction failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Data processing failed: {0}")]
    Processing(String),
}
