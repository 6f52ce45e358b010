// src/extractors/cascade.rs
//! Per-candidate extraction: cache, redirect resolution, download, ordered
//! text strategies, completeness gate, persistence.

use std::sync::Arc;

use once_cell::sync::Lazy;
use scraper::{Html, Selector};

use crate::ai::OcrService;
use crate::extractors::models::{ExtractionResult, SourceKind};
use crate::extractors::pdf::TextExtractor;
use crate::extractors::strategy::{first_success, DocumentInput, ExtractionStrategy, NativeTextStrategy, OcrStrategy};
use crate::extractors::validator::ContentQuality;
use crate::site::client::{resolve_url, DocumentFetcher};
use crate::site::models::{CandidateDocument, FetchedDocument};
use crate::storage::file_cache::{CacheMeta, FileCache};
use crate::utils::config::Thresholds;
use crate::utils::error::AttemptFailure;

// Elements that embed or point at the real document on a landing page, in
// order of preference.
static EMBED_SELECTORS: Lazy<Vec<(Selector, &'static str)>> = Lazy::new(|| {
    [
        ("iframe[src]", "src"),
        ("embed[src]", "src"),
        ("object[data]", "data"),
        ("a[href]", "href"),
    ]
    .iter()
    .map(|(css, attr)| (Selector::parse(css).expect("Failed to compile EMBED_SELECTORS"), *attr))
    .collect()
});

static META_REFRESH_SELECTOR: Lazy<Selector> = Lazy::new(|| {
    Selector::parse("meta[http-equiv][content]").expect("Failed to compile META_REFRESH_SELECTOR")
});

pub struct ExtractionCascade {
    fetcher: Arc<dyn DocumentFetcher>,
    file_cache: Arc<FileCache>,
    strategies: Vec<Box<dyn ExtractionStrategy<DocumentInput>>>,
    min_complete_chars: usize,
    max_candidates: usize,
}

impl ExtractionCascade {
    pub fn new(
        fetcher: Arc<dyn DocumentFetcher>,
        file_cache: Arc<FileCache>,
        strategies: Vec<Box<dyn ExtractionStrategy<DocumentInput>>>,
        min_complete_chars: usize,
        max_candidates: usize,
    ) -> Self {
        Self {
            fetcher,
            file_cache,
            strategies,
            min_complete_chars,
            max_candidates,
        }
    }

    /// Native text first, OCR when the text layer is too thin.
    pub fn with_default_strategies(
        fetcher: Arc<dyn DocumentFetcher>,
        file_cache: Arc<FileCache>,
        extractor: Arc<dyn TextExtractor>,
        ocr: Arc<dyn OcrService>,
        thresholds: Thresholds,
        max_candidates: usize,
    ) -> Self {
        let strategies: Vec<Box<dyn ExtractionStrategy<DocumentInput>>> = vec![
            Box::new(NativeTextStrategy::new(extractor, thresholds.min_native_chars)),
            Box::new(OcrStrategy::new(ocr)),
        ];
        Self::new(fetcher, file_cache, strategies, thresholds.min_complete_chars, max_candidates)
    }

    /// Tries candidates strictly in order, at most `max_candidates` of them,
    /// and returns the first complete result. `None` means every attempt
    /// failed and the caller should pick a non-document fallback.
    pub async fn extract_first(
        &self,
        symbol: &str,
        candidates: &[CandidateDocument],
        force_refresh: bool,
    ) -> Option<ExtractionResult> {
        for (index, candidate) in candidates.iter().take(self.max_candidates).enumerate() {
            tracing::info!(
                "Attempting candidate {}/{} for {}: {} ({})",
                index + 1,
                candidates.len().min(self.max_candidates),
                symbol,
                candidate.fiscal_year,
                candidate.url
            );
            if let Some(result) = self.extract(symbol, candidate, force_refresh).await {
                return Some(result);
            }
        }
        tracing::warn!("All candidates exhausted for {}", symbol);
        None
    }

    /// Extracts one candidate, or `None` if it cannot yield a complete report.
    pub async fn extract(&self, symbol: &str, candidate: &CandidateDocument, force_refresh: bool) -> Option<ExtractionResult> {
        if !force_refresh {
            if let Some(cached) = self.from_cache(symbol, candidate).await {
                return Some(cached);
            }
        }

        match self.try_extract(symbol, candidate).await {
            Ok(result) => Some(result),
            Err(reason) => {
                tracing::error!("Candidate {} failed: {}", candidate.url, reason);
                None
            }
        }
    }

    async fn from_cache(&self, symbol: &str, candidate: &CandidateDocument) -> Option<ExtractionResult> {
        let hit = self.file_cache.read(symbol, candidate.fiscal_year).await?;
        let chars = hit.text.chars().count();
        if chars < self.min_complete_chars {
            tracing::debug!("Cached text for {} {} is only {} chars, ignoring", symbol, candidate.fiscal_year, chars);
            return None;
        }

        tracing::info!("Using cached report for {} {} ({:.0} days old)", symbol, candidate.fiscal_year, hit.age_days);
        let (source_url, source_kind) = match hit.meta {
            Some(meta) => (meta.source_url, meta.source_kind),
            None => (candidate.url.clone(), SourceKind::NativeText),
        };
        Some(ExtractionResult::new(candidate.fiscal_year, hit.text, &source_url, source_kind))
    }

    async fn try_extract(&self, symbol: &str, candidate: &CandidateDocument) -> Result<ExtractionResult, AttemptFailure> {
        let document = self.resolve_document(&candidate.url).await?;
        let input = DocumentInput {
            url: document.url,
            bytes: Arc::from(document.bytes),
        };

        let extracted = first_success(&self.strategies, &input).await.map_err(|failures| {
            let summary = failures
                .iter()
                .map(|f| format!("{}: {}", f.strategy, f.reason))
                .collect::<Vec<_>>()
                .join("; ");
            AttemptFailure::Skipped(format!("no strategy succeeded ({})", summary))
        })?;

        // Strategies are pluggable; nothing reaches the cache unvalidated.
        let verdict = ContentQuality::assess(&extracted.text);
        if !verdict.is_acceptable() {
            return Err(AttemptFailure::Corrupted(format!("{} output: {}", extracted.kind.as_str(), verdict.describe())));
        }
        let chars = extracted.text.chars().count();
        if chars < self.min_complete_chars {
            return Err(AttemptFailure::TooShort {
                chars,
                required: self.min_complete_chars,
            });
        }

        let result = ExtractionResult::new(candidate.fiscal_year, extracted.text, &extracted.source_url, extracted.kind);
        let meta = CacheMeta {
            source_url: result.source_url.clone(),
            source_kind: result.source_kind,
        };
        if let Err(e) = self
            .file_cache
            .write(symbol, candidate.fiscal_year, &result.content, Some(&meta))
            .await
        {
            tracing::warn!("Failed to cache report text for {} {}: {}", symbol, candidate.fiscal_year, e);
        }

        tracing::info!(
            "Extracted {} chars for {} {} via {}",
            chars,
            symbol,
            candidate.fiscal_year,
            result.source_kind.as_str()
        );
        Ok(result)
    }

    /// Downloads the candidate, following one intermediary landing page if the
    /// URL served HTML instead of a document.
    async fn resolve_document(&self, url: &str) -> Result<FetchedDocument, AttemptFailure> {
        let first = self.fetcher.fetch_document(url).await?;
        if !first.is_html() {
            return Ok(first);
        }

        let html = String::from_utf8_lossy(&first.bytes);
        let target = find_embedded_document(&html, &first.url)
            .ok_or_else(|| AttemptFailure::Skipped(format!("landing page {} links no document", first.url)))?;
        tracing::info!("Landing page {} points at {}", first.url, target);

        let document = self.fetcher.fetch_document(&target).await?;
        if document.is_html() {
            return Err(AttemptFailure::Skipped(format!("{} is still a web page", target)));
        }
        Ok(document)
    }
}

/// Finds the document a landing page embeds or links to.
pub fn find_embedded_document(html: &str, page_url: &str) -> Option<String> {
    let document = Html::parse_document(html);

    for (selector, attr) in EMBED_SELECTORS.iter() {
        for element in document.select(selector) {
            let Some(value) = element.value().attr(attr) else { continue };
            // Plain links only count when they look like a document.
            if *attr == "href" && !looks_like_document(value) {
                continue;
            }
            if let Some(url) = resolve_url(page_url, value) {
                return Some(url);
            }
        }
    }

    document
        .select(&META_REFRESH_SELECTOR)
        .filter(|meta| {
            meta.value()
                .attr("http-equiv")
                .is_some_and(|v| v.eq_ignore_ascii_case("refresh"))
        })
        .filter_map(|meta| meta.value().attr("content"))
        .filter_map(|content| {
            let lower = content.to_ascii_lowercase();
            let idx = lower.find("url=")?;
            Some(content[idx + 4..].trim().trim_matches(|c| c == '\'' || c == '"').to_string())
        })
        .find_map(|target| resolve_url(page_url, &target))
}

fn looks_like_document(href: &str) -> bool {
    let path = href.split(['?', '#']).next().unwrap_or_default().to_ascii_lowercase();
    path.ends_with(".pdf")
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::extractors::strategy::tests::{figures, prose, FixedOcr, PlainTextExtractor};
    use crate::fiscal_year::FiscalYear;
    use crate::utils::error::FetchError;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Serves canned documents and records every requested URL in order.
    pub(crate) struct FakeFetcher {
        documents: HashMap<String, FetchedDocument>,
        pub(crate) requested: Mutex<Vec<String>>,
    }

    impl FakeFetcher {
        pub(crate) fn new() -> Self {
            Self {
                documents: HashMap::new(),
                requested: Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn pdf(mut self, url: &str, text: &str) -> Self {
            self.documents.insert(
                url.to_string(),
                FetchedDocument {
                    url: url.to_string(),
                    content_type: Some("application/pdf".to_string()),
                    bytes: format!("%PDF-{}", text).into_bytes(),
                },
            );
            self
        }

        pub(crate) fn html(mut self, url: &str, html: &str) -> Self {
            self.documents.insert(
                url.to_string(),
                FetchedDocument {
                    url: url.to_string(),
                    content_type: Some("text/html".to_string()),
                    bytes: html.as_bytes().to_vec(),
                },
            );
            self
        }

        pub(crate) fn requested(&self) -> Vec<String> {
            self.requested.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl DocumentFetcher for FakeFetcher {
        fn base_url(&self) -> &str {
            "https://www.screener.in/"
        }

        async fn fetch_page(&self, url: &str) -> Result<String, FetchError> {
            self.requested.lock().unwrap().push(url.to_string());
            self.documents
                .get(url)
                .map(|d| String::from_utf8_lossy(&d.bytes).into_owned())
                .ok_or(FetchError::Http(reqwest::StatusCode::NOT_FOUND))
        }

        async fn fetch_document(&self, url: &str) -> Result<FetchedDocument, FetchError> {
            self.requested.lock().unwrap().push(url.to_string());
            self.documents
                .get(url)
                .cloned()
                .ok_or(FetchError::Http(reqwest::StatusCode::NOT_FOUND))
        }
    }

    fn candidate(year: u16, url: &str) -> CandidateDocument {
        CandidateDocument {
            fiscal_year: FiscalYear::new(year),
            url: url.to_string(),
            origin: "bse".to_string(),
        }
    }

    fn cascade(fetcher: Arc<FakeFetcher>, dir: &std::path::Path, ocr_text: Option<String>) -> ExtractionCascade {
        let ocr = Arc::new(FixedOcr {
            text: ocr_text,
            calls: Mutex::new(Vec::new()),
        });
        ExtractionCascade::with_default_strategies(
            fetcher,
            Arc::new(FileCache::new(dir, 90)),
            Arc::new(PlainTextExtractor),
            ocr,
            Thresholds::default(),
            5,
        )
    }

    #[tokio::test]
    async fn candidates_are_tried_in_order_until_one_is_complete() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(
            FakeFetcher::new()
                .pdf("https://f/1.pdf", &prose(5_000))
                .pdf("https://f/2.pdf", &prose(12_000))
                .pdf("https://f/3.pdf", &prose(31_000)),
        );
        let candidates = vec![
            candidate(2025, "https://f/1.pdf"),
            candidate(2025, "https://f/2.pdf"),
            candidate(2024, "https://f/3.pdf"),
        ];

        let result = cascade(fetcher.clone(), dir.path(), None)
            .extract_first("ACME", &candidates, false)
            .await
            .unwrap();

        assert_eq!(fetcher.requested(), vec!["https://f/1.pdf", "https://f/2.pdf", "https://f/3.pdf"]);
        assert_eq!(result.source_url, "https://f/3.pdf");
        assert_eq!(result.fiscal_year, FiscalYear::new(2024));
        assert_eq!(result.char_count(), 31_000);
    }

    #[tokio::test]
    async fn attempts_are_bounded_by_max_candidates() {
        let dir = tempfile::tempdir().unwrap();
        let mut fake = FakeFetcher::new();
        let mut candidates = Vec::new();
        for i in 0..7 {
            let url = format!("https://f/{}.pdf", i);
            fake = fake.pdf(&url, &prose(2_000));
            candidates.push(candidate(2025, &url));
        }
        let fetcher = Arc::new(fake);

        let result = cascade(fetcher.clone(), dir.path(), None)
            .extract_first("ACME", &candidates, false)
            .await;

        assert!(result.is_none());
        assert_eq!(fetcher.requested().len(), 5);
    }

    #[tokio::test]
    async fn successful_extraction_is_cached_and_reused() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(FakeFetcher::new().pdf("https://f/ar.pdf", &prose(35_000)));
        let cascade = cascade(fetcher.clone(), dir.path(), None);
        let c = candidate(2025, "https://f/ar.pdf");

        let first = cascade.extract("ACME", &c, false).await.unwrap();
        let second = cascade.extract("ACME", &c, false).await.unwrap();

        assert_eq!(fetcher.requested().len(), 1);
        assert_eq!(first.content, second.content);
        assert_eq!(second.source_kind, SourceKind::NativeText);
    }

    #[tokio::test]
    async fn force_refresh_bypasses_cache() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(FakeFetcher::new().pdf("https://f/ar.pdf", &prose(35_000)));
        let cascade = cascade(fetcher.clone(), dir.path(), None);
        let c = candidate(2025, "https://f/ar.pdf");

        cascade.extract("ACME", &c, false).await.unwrap();
        cascade.extract("ACME", &c, true).await.unwrap();

        assert_eq!(fetcher.requested().len(), 2);
    }

    #[tokio::test]
    async fn image_only_document_uses_ocr_and_records_kind() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(FakeFetcher::new().pdf("https://f/scan.pdf", "x"));
        let cascade = cascade(fetcher, dir.path(), Some(prose(40_000)));

        let result = cascade
            .extract("ACME", &candidate(2025, "https://f/scan.pdf"), false)
            .await
            .unwrap();

        assert_eq!(result.source_kind, SourceKind::Ocr);

        // The cached copy keeps its provenance.
        let cached = FileCache::new(dir.path(), 90).read("ACME", FiscalYear::new(2025)).await.unwrap();
        assert_eq!(cached.meta.unwrap().source_kind, SourceKind::Ocr);
    }

    #[tokio::test]
    async fn figures_only_text_layer_goes_to_ocr() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(FakeFetcher::new().pdf("https://f/tables.pdf", &figures(35_000)));
        let ocr = Arc::new(FixedOcr {
            text: Some(prose(40_000)),
            calls: Mutex::new(Vec::new()),
        });
        let cascade = ExtractionCascade::with_default_strategies(
            fetcher,
            Arc::new(FileCache::new(dir.path(), 90)),
            Arc::new(PlainTextExtractor),
            ocr.clone(),
            Thresholds::default(),
            5,
        );

        let result = cascade
            .extract("ACME", &candidate(2025, "https://f/tables.pdf"), false)
            .await
            .unwrap();

        assert_eq!(result.source_kind, SourceKind::Ocr);
        assert_eq!(ocr.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unacceptable_text_is_never_cached() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(FakeFetcher::new().pdf("https://f/tables.pdf", &figures(35_000)));
        let cascade = cascade(fetcher.clone(), dir.path(), None);
        let c = candidate(2025, "https://f/tables.pdf");

        assert!(cascade.extract("ACME", &c, false).await.is_none());
        assert!(FileCache::new(dir.path(), 90).read("ACME", FiscalYear::new(2025)).await.is_none());

        // Nothing was cached, so a second lookup downloads again and fails the same way.
        assert!(cascade.extract("ACME", &c, false).await.is_none());
        assert_eq!(fetcher.requested().len(), 2);
    }

    #[tokio::test]
    async fn landing_page_is_followed_to_embedded_document() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(
            FakeFetcher::new()
                .html(
                    "https://www.screener.in/redirect/?id=9",
                    r#"<html><body><p>Opening report</p><a href="/files/AR_2025.pdf?v=1">Download</a></body></html>"#,
                )
                .pdf("https://www.screener.in/files/AR_2025.pdf?v=1", &prose(30_000)),
        );
        let cascade = cascade(fetcher.clone(), dir.path(), None);

        let result = cascade
            .extract("ACME", &candidate(2025, "https://www.screener.in/redirect/?id=9"), false)
            .await
            .unwrap();

        assert_eq!(result.source_url, "https://www.screener.in/files/AR_2025.pdf?v=1");
        assert_eq!(fetcher.requested().len(), 2);
    }

    #[tokio::test]
    async fn network_failure_only_fails_that_candidate() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(FakeFetcher::new().pdf("https://f/ok.pdf", &prose(30_000)));
        let candidates = vec![candidate(2025, "https://f/missing.pdf"), candidate(2025, "https://f/ok.pdf")];

        let result = cascade(fetcher, dir.path(), None)
            .extract_first("ACME", &candidates, false)
            .await;

        assert_eq!(result.unwrap().source_url, "https://f/ok.pdf");
    }

    #[test]
    fn embedded_document_detection() {
        let page = "https://www.bseindia.com/landing/";
        assert_eq!(
            find_embedded_document(r#"<iframe src="/viewer/ar.pdf"></iframe>"#, page).as_deref(),
            Some("https://www.bseindia.com/viewer/ar.pdf")
        );
        assert_eq!(
            find_embedded_document(
                r#"<head><meta http-equiv="Refresh" content="0; URL='https://x.test/ar.pdf'"></head>"#,
                page
            )
            .as_deref(),
            Some("https://x.test/ar.pdf")
        );
        assert_eq!(find_embedded_document(r#"<a href="/about">About</a>"#, page), None);
    }
}
