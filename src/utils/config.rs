// src/utils/config.rs
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::utils::error::AppError;

const DEFAULT_SITE_BASE_URL: &str = "https://www.screener.in";
const DEFAULT_BULK_HOSTS: &str = "bseindia.com,nseindia.com";
const DEFAULT_GEMINI_MODEL: &str = "gemini-2.0-flash";

/// Runtime settings for the acquisition pipeline.
///
/// Every field has a default; `from_env` overlays environment variables on
/// top and the CLI overrides individual fields afterwards.
#[derive(Debug, Clone)]
pub struct Config {
    pub site_base_url: String,
    pub username: String,
    pub password: String,

    pub page_delay: Duration,
    pub bulk_delay: Duration,
    pub bulk_hosts: Vec<String>,
    pub session_ttl: Duration,

    pub max_download_bytes: u64,
    pub page_timeout: Duration,
    pub download_timeout: Duration,
    pub ocr_timeout: Duration,

    pub cache_dir: PathBuf,
    pub cache_max_age_days: u64,
    pub db_path: PathBuf,
    pub db_ttl_days: i64,

    pub gemini_api_key: Option<String>,
    pub gemini_model: String,

    pub thresholds: Thresholds,
    pub max_candidates: usize,
}

/// Character-count gates used by the extraction cascade.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Thresholds {
    /// Below this, native text is treated as an image-only document and OCR runs.
    pub min_native_chars: usize,
    /// Minimum for a complete report. One constant for every call site.
    pub min_complete_chars: usize,
    /// Minimum for partial content served by page-scrape or LLM fallbacks.
    pub min_fallback_chars: usize,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            min_native_chars: 1_000,
            min_complete_chars: 30_000,
            min_fallback_chars: 1_000,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            site_base_url: DEFAULT_SITE_BASE_URL.to_string(),
            username: String::new(),
            password: String::new(),
            page_delay: Duration::from_millis(1_000),
            bulk_delay: Duration::from_millis(3_000),
            bulk_hosts: split_hosts(DEFAULT_BULK_HOSTS),
            session_ttl: Duration::from_secs(24 * 60 * 60),
            max_download_bytes: 50 * 1024 * 1024,
            page_timeout: Duration::from_secs(30),
            download_timeout: Duration::from_secs(60),
            ocr_timeout: Duration::from_secs(90),
            cache_dir: PathBuf::from("./cache/reports"),
            cache_max_age_days: 90,
            db_path: PathBuf::from("./cache/reports.db"),
            db_ttl_days: 30,
            gemini_api_key: None,
            gemini_model: DEFAULT_GEMINI_MODEL.to_string(),
            thresholds: Thresholds::default(),
            max_candidates: 5,
        }
    }
}

impl Config {
    /// Builds the configuration from process environment variables.
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Config::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("SITE_BASE_URL") {
            config.site_base_url = v.trim_end_matches('/').to_string();
        }
        if let Some(v) = get("SITE_USERNAME") {
            config.username = v;
        }
        if let Some(v) = get("SITE_PASSWORD") {
            config.password = v;
        }
        if let Some(ms) = parse_var::<u64>(&get, "PAGE_DELAY_MS")? {
            config.page_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var::<u64>(&get, "BULK_DELAY_MS")? {
            config.bulk_delay = Duration::from_millis(ms);
        }
        if let Some(v) = get("BULK_HOSTS") {
            config.bulk_hosts = split_hosts(&v);
        }
        if let Some(hours) = parse_var::<u64>(&get, "SESSION_TTL_HOURS")? {
            config.session_ttl = Duration::from_secs(hours * 60 * 60);
        }
        if let Some(bytes) = parse_var(&get, "MAX_DOWNLOAD_BYTES")? {
            config.max_download_bytes = bytes;
        }
        if let Some(secs) = parse_var::<u64>(&get, "PAGE_TIMEOUT_SECS")? {
            config.page_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_var::<u64>(&get, "DOWNLOAD_TIMEOUT_SECS")? {
            config.download_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_var::<u64>(&get, "OCR_TIMEOUT_SECS")? {
            config.ocr_timeout = Duration::from_secs(secs);
        }
        if let Some(v) = get("CACHE_DIR") {
            config.cache_dir = PathBuf::from(v);
        }
        if let Some(days) = parse_var(&get, "CACHE_MAX_AGE_DAYS")? {
            config.cache_max_age_days = days;
        }
        if let Some(v) = get("DB_PATH") {
            config.db_path = PathBuf::from(v);
        }
        if let Some(days) = parse_var(&get, "DB_TTL_DAYS")? {
            config.db_ttl_days = days;
        }
        config.gemini_api_key = get("GEMINI_API_KEY");
        if let Some(v) = get("GEMINI_MODEL") {
            config.gemini_model = v;
        }
        if let Some(n) = parse_var(&get, "MIN_NATIVE_CHARS")? {
            config.thresholds.min_native_chars = n;
        }
        if let Some(n) = parse_var(&get, "MIN_COMPLETE_CHARS")? {
            config.thresholds.min_complete_chars = n;
        }
        if let Some(n) = parse_var(&get, "MIN_FALLBACK_CHARS")? {
            config.thresholds.min_fallback_chars = n;
        }
        if let Some(n) = parse_var(&get, "MAX_CANDIDATES")? {
            config.max_candidates = n;
        }

        if config.max_candidates == 0 {
            return Err(AppError::Config("MAX_CANDIDATES must be at least 1".to_string()));
        }

        tracing::debug!("Loaded configuration for {}", config.site_base_url);
        Ok(config)
    }

    /// True when credentials are configured and a login exchange should run.
    pub fn has_credentials(&self) -> bool {
        !self.username.is_empty() && !self.password.is_empty()
    }
}

fn parse_var<T>(get: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>, AppError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| AppError::Config(format!("Invalid value '{}' for {}: {}", raw, key, e))),
        None => Ok(None),
    }
}

fn split_hosts(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|h| h.trim().to_lowercase())
        .filter(|h| !h.is_empty())
        .collect()
}
