// src/pipeline.rs
//! Top-level report lookup: cache tiers, candidate cascade, labelled fallbacks.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use crate::ai::{GeminiClient, LlmService, OcrService, Unconfigured};
use crate::extractors::cascade::ExtractionCascade;
use crate::extractors::fallback::{FallbackInput, LlmSearchStrategy, PageScrapeStrategy};
use crate::extractors::models::ExtractionResult;
use crate::extractors::pdf::PdfTextExtractor;
use crate::extractors::strategy::{first_success, ExtractionStrategy};
use crate::fiscal_year::{self, FiscalYear};
use crate::site::client::{DocumentFetcher, SiteClient};
use crate::site::locator::DocumentLocator;
use crate::site::models::CandidateDocument;
use crate::storage::{DbCache, DocumentKey, FileCache, MemoryCache};
use crate::utils::{AppError, Config};

/// Report type stored in the database cache for annual reports.
pub const ANNUAL_REPORT: &str = "annual_report";

// Exchange tickers such as "M&M" or "BAJAJ-AUTO". The symbol ends up in a
// URL path and a cache directory name, so nothing else is let through.
static SYMBOL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Z0-9][A-Z0-9.&-]{0,31}$").expect("Failed to compile SYMBOL_RE"));

/// Trims and uppercases a company symbol, rejecting anything that is not a
/// plain ticker.
pub fn normalize_symbol(input: &str) -> Option<String> {
    let symbol = input.trim().to_uppercase();
    SYMBOL_RE.is_match(&symbol).then_some(symbol)
}

#[derive(Debug, Clone)]
pub struct ReportRequest {
    pub symbol: String,
    /// Fiscal year in any accepted notation ("2024-25", "FY2025", "Mar 2025").
    pub fiscal_year: String,
    pub force_refresh: bool,
    pub allow_fallback: bool,
}

impl ReportRequest {
    pub fn new(symbol: &str, fiscal_year: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            fiscal_year: fiscal_year.to_string(),
            force_refresh: false,
            allow_fallback: true,
        }
    }
}

/// What a lookup produced. Every variant carries the fiscal year that was
/// asked for, so a result for a different year is visible to the caller.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ReportOutcome {
    /// A complete report extracted from a document.
    Document {
        requested: FiscalYear,
        result: ExtractionResult,
    },
    /// Partial content from a non-document source.
    Fallback {
        requested: FiscalYear,
        result: ExtractionResult,
    },
    /// Nothing usable was found.
    Unavailable { requested: FiscalYear },
}

impl ReportOutcome {
    pub fn requested(&self) -> FiscalYear {
        match self {
            ReportOutcome::Document { requested, .. }
            | ReportOutcome::Fallback { requested, .. }
            | ReportOutcome::Unavailable { requested } => *requested,
        }
    }

    pub fn result(&self) -> Option<&ExtractionResult> {
        match self {
            ReportOutcome::Document { result, .. } | ReportOutcome::Fallback { result, .. } => Some(result),
            ReportOutcome::Unavailable { .. } => None,
        }
    }

    /// False when the content belongs to an older fiscal year than requested.
    pub fn matches_requested_year(&self) -> bool {
        self.result()
            .is_some_and(|result| result.fiscal_year == self.requested())
    }

    pub fn is_partial(&self) -> bool {
        matches!(self, ReportOutcome::Fallback { .. })
    }
}

pub struct ReportPipeline {
    locator: Arc<DocumentLocator>,
    cascade: ExtractionCascade,
    fallbacks: Vec<Box<dyn ExtractionStrategy<FallbackInput>>>,
    memory: MemoryCache,
    db: Option<Arc<DbCache>>,
    db_ttl: chrono::Duration,
}

impl ReportPipeline {
    pub fn new(
        locator: Arc<DocumentLocator>,
        cascade: ExtractionCascade,
        fallbacks: Vec<Box<dyn ExtractionStrategy<FallbackInput>>>,
        db: Option<Arc<DbCache>>,
        db_ttl_days: i64,
    ) -> Self {
        Self {
            locator,
            cascade,
            fallbacks,
            memory: MemoryCache::default(),
            db,
            db_ttl: chrono::Duration::days(db_ttl_days),
        }
    }

    /// Wires the production collaborators: the listing-site client, the PDF
    /// text layer, Gemini when a key is configured, and both cache tiers.
    pub fn from_config(config: &Config, db: Option<Arc<DbCache>>, debug_dir: Option<PathBuf>) -> Result<Self, AppError> {
        let fetcher: Arc<dyn DocumentFetcher> = Arc::new(SiteClient::new(config)?);

        let mut locator = DocumentLocator::new(Arc::clone(&fetcher));
        if let Some(dir) = debug_dir {
            locator = locator.with_debug_dir(dir);
        }
        let locator = Arc::new(locator);

        let ocr: Arc<dyn OcrService>;
        let llm: Arc<dyn LlmService>;
        match GeminiClient::from_config(config) {
            Some(client) => {
                let client = Arc::new(client.map_err(|e| AppError::Config(e.to_string()))?);
                ocr = client.clone();
                llm = client;
            }
            None => {
                tracing::warn!("GEMINI_API_KEY not set, OCR and LLM search are disabled");
                ocr = Arc::new(Unconfigured);
                llm = Arc::new(Unconfigured);
            }
        }

        let file_cache = Arc::new(FileCache::new(&config.cache_dir, config.cache_max_age_days));
        let cascade = ExtractionCascade::with_default_strategies(
            fetcher,
            file_cache,
            Arc::new(PdfTextExtractor),
            ocr,
            config.thresholds,
            config.max_candidates,
        );

        let min_fallback = config.thresholds.min_fallback_chars;
        let fallbacks: Vec<Box<dyn ExtractionStrategy<FallbackInput>>> = vec![
            Box::new(PageScrapeStrategy::new(Arc::clone(&locator), min_fallback)),
            Box::new(LlmSearchStrategy::new(llm, min_fallback)),
        ];

        Ok(Self::new(locator, cascade, fallbacks, db, config.db_ttl_days))
    }

    /// Looks up the report for one company and fiscal year. Never fails:
    /// every problem along the way is logged and the next source is tried.
    pub async fn fetch_report(&self, request: &ReportRequest) -> ReportOutcome {
        let requested = fiscal_year::normalize(&request.fiscal_year);
        let Some(symbol) = normalize_symbol(&request.symbol) else {
            tracing::warn!("Rejecting invalid company symbol '{}'", request.symbol);
            return ReportOutcome::Unavailable { requested };
        };
        tracing::info!("Fetching {} report for {} (input '{}')", requested, symbol, request.fiscal_year);

        if !request.force_refresh {
            if let Some(result) = self.cached(&symbol, requested).await {
                return ReportOutcome::Document { requested, result };
            }
        }

        let candidates = self.eligible_candidates(&symbol, requested).await;
        if let Some(result) = self
            .cascade
            .extract_first(&symbol, &candidates, request.force_refresh)
            .await
        {
            if result.fiscal_year != requested {
                tracing::warn!("No {} report for {}, serving {} instead", requested, symbol, result.fiscal_year);
            }
            self.remember(&symbol, &result).await;
            return ReportOutcome::Document { requested, result };
        }

        if !request.allow_fallback {
            return ReportOutcome::Unavailable { requested };
        }
        self.fallback(&symbol, requested).await
    }

    async fn cached(&self, symbol: &str, fy: FiscalYear) -> Option<ExtractionResult> {
        if let Some(result) = self.memory.get(symbol, fy) {
            tracing::debug!("Memory cache hit for {} {}", symbol, fy);
            return Some(result);
        }

        let db = self.db.as_ref()?;
        let key = DocumentKey::annual(symbol, fy, ANNUAL_REPORT);
        match db.find_fresh::<ExtractionResult>(&key).await {
            Ok(Some(result)) => {
                tracing::info!("Database cache hit for {} {}", symbol, fy);
                self.memory.set(symbol, fy, result.clone());
                Some(result)
            }
            Ok(None) => None,
            Err(e) => {
                tracing::warn!("Database cache unavailable: {}", e);
                None
            }
        }
    }

    // Candidates newer than the requested year are never substitutes.
    async fn eligible_candidates(&self, symbol: &str, requested: FiscalYear) -> Vec<CandidateDocument> {
        let all = self.locator.list_candidates(symbol).await;
        let total = all.len();
        let eligible: Vec<_> = all
            .into_iter()
            .filter(|candidate| candidate.fiscal_year <= requested)
            .collect();
        if eligible.len() < total {
            tracing::debug!("Skipped {} candidate(s) newer than {}", total - eligible.len(), requested);
        }
        eligible
    }

    async fn remember(&self, symbol: &str, result: &ExtractionResult) {
        self.memory.set(symbol, result.fiscal_year, result.clone());

        let Some(db) = &self.db else { return };
        let key = DocumentKey::annual(symbol, result.fiscal_year, ANNUAL_REPORT);
        if let Err(e) = db.upsert(&key, result, Utc::now() + self.db_ttl).await {
            tracing::warn!("Failed to store {} {} in database cache: {}", symbol, result.fiscal_year, e);
        }
    }

    async fn fallback(&self, symbol: &str, requested: FiscalYear) -> ReportOutcome {
        let input = FallbackInput {
            symbol: symbol.to_string(),
            fiscal_year: requested,
        };
        match first_success(&self.fallbacks, &input).await {
            Ok(extracted) => {
                tracing::warn!(
                    "Serving partial {} content for {} {}",
                    extracted.kind.as_str(),
                    symbol,
                    requested
                );
                let result = ExtractionResult::new(requested, extracted.text, &extracted.source_url, extracted.kind);
                ReportOutcome::Fallback { requested, result }
            }
            Err(failures) => {
                tracing::error!("No report available for {} {} ({} fallback(s) failed)", symbol, requested, failures.len());
                ReportOutcome::Unavailable { requested }
            }
        }
    }
}
