// src/site/locator.rs
//! Finds candidate annual-report links on a company's listing page.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};

use crate::fiscal_year::{self, FiscalYear};
use crate::site::client::{resolve_url, DocumentFetcher};
use crate::site::models::CandidateDocument;
use crate::utils::error::FetchError;
use crate::utils::html_debug;

static LINK_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("a[href]").expect("Failed to compile LINK_SELECTOR"));

// "Financial Year 2024", "FY 2023-24", "Year ended March 2024"
static PERIOD_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:financial\s+year|fy|year\s+ended?)\s*((?:[a-z]+\s+)?\d{4}(?:\s*[-–]\s*\d{2,4})?)")
        .expect("Failed to compile PERIOD_RE")
});

// "from bse", "from nse"
static ORIGIN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bfrom\s+([a-z][a-z0-9.]*)").expect("Failed to compile ORIGIN_RE"));

static VIEW_CONSOLIDATED_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\s*view\s+consolidated\b").expect("Failed to compile VIEW_CONSOLIDATED_RE"));

/// Scans company listing pages for report links.
pub struct DocumentLocator {
    fetcher: Arc<dyn DocumentFetcher>,
    debug_dir: Option<PathBuf>,
}

impl DocumentLocator {
    pub fn new(fetcher: Arc<dyn DocumentFetcher>) -> Self {
        Self { fetcher, debug_dir: None }
    }

    /// Saves an annotated copy of every fetched listing page under `dir`.
    pub fn with_debug_dir(mut self, dir: PathBuf) -> Self {
        self.debug_dir = Some(dir);
        self
    }

    /// URL of the company's listing page.
    pub fn company_url(&self, company_id: &str) -> String {
        format!(
            "{}/company/{}/",
            self.fetcher.base_url().trim_end_matches('/'),
            company_id.trim().to_uppercase()
        )
    }

    /// Lists report candidates, newest fiscal year first. Any failure yields
    /// an empty list.
    pub async fn list_candidates(&self, company_id: &str) -> Vec<CandidateDocument> {
        match self.try_list_candidates(company_id).await {
            Ok(candidates) => {
                tracing::info!("Found {} candidate report(s) for {}", candidates.len(), company_id);
                candidates
            }
            Err(e) => {
                tracing::warn!("Could not list candidates for {}: {}", company_id, e);
                Vec::new()
            }
        }
    }

    async fn try_list_candidates(&self, company_id: &str) -> Result<Vec<CandidateDocument>, FetchError> {
        let (page_url, html) = self.fetch_listing(company_id).await?;
        self.save_debug_copy(company_id, &html);
        Ok(parse_candidates(&html, &page_url))
    }

    /// Fetches the listing page, switching to the consolidated view when the
    /// site served the standalone one.
    pub async fn fetch_listing(&self, company_id: &str) -> Result<(String, String), FetchError> {
        let page_url = self.company_url(company_id);
        let html = self.fetcher.fetch_page(&page_url).await?;

        match find_consolidated_link(&html, &page_url) {
            Some(consolidated_url) if consolidated_url != page_url => {
                tracing::info!("Listing for {} shows standalone figures, fetching {}", company_id, consolidated_url);
                let html = self.fetcher.fetch_page(&consolidated_url).await?;
                Ok((consolidated_url, html))
            }
            _ => Ok((page_url, html)),
        }
    }

    fn save_debug_copy(&self, company_id: &str, html: &str) {
        let Some(dir) = &self.debug_dir else { return };
        let path = dir.join(format!("{}_listing.html", company_id.to_uppercase()));
        if let Err(e) = html_debug::create_debug_html(html, &path, html_debug::LISTING_DEBUG_PATTERNS) {
            tracing::warn!("Failed to create debug HTML: {}", e);
        }
    }
}

/// Extracts report links whose text carries both a reporting period and an
/// origin marker. Sorted descending by fiscal year, stable on ties.
pub fn parse_candidates(html: &str, page_url: &str) -> Vec<CandidateDocument> {
    let document = Html::parse_document(html);
    let mut seen = HashSet::new();
    let mut candidates = Vec::new();

    for link in document.select(&LINK_SELECTOR) {
        let Some((fiscal_year, origin)) = describe_link(link) else { continue };
        let Some(href) = link.value().attr("href") else { continue };
        if href.starts_with('#') || href.starts_with("javascript:") {
            continue;
        }
        let Some(url) = resolve_url(page_url, href) else {
            tracing::debug!("Skipping unresolvable link '{}'", href);
            continue;
        };
        if !seen.insert(url.clone()) {
            continue;
        }

        tracing::debug!("Candidate {} from {}: {}", fiscal_year, origin, url);
        candidates.push(CandidateDocument { fiscal_year, url, origin });
    }

    candidates.sort_by(|a, b| b.fiscal_year.cmp(&a.fiscal_year));
    candidates
}

// Reads the period and origin from the link text, widening to the parent
// element when the link itself only carries part of the label. A parent
// holding other links is a container, not a label, and is never read.
fn describe_link(link: ElementRef) -> Option<(FiscalYear, String)> {
    let own = collapse_whitespace(&link.text().collect::<String>());
    if let Some(found) = match_period_and_origin(&own) {
        return Some(found);
    }
    let parent = link.parent().and_then(ElementRef::wrap)?;
    if parent.select(&LINK_SELECTOR).nth(1).is_some() {
        return None;
    }
    let surrounding = collapse_whitespace(&parent.text().collect::<String>());
    match_period_and_origin(&surrounding)
}

fn match_period_and_origin(text: &str) -> Option<(FiscalYear, String)> {
    let period = PERIOD_RE.captures(text)?;
    let origin = ORIGIN_RE.captures(text)?;
    let fiscal_year = fiscal_year::try_normalize(&period[1])?;
    Some((fiscal_year, origin[1].to_lowercase()))
}

/// The consolidated-view URL, if the page offers a "View Consolidated" toggle
/// (meaning it is currently showing standalone figures).
pub fn find_consolidated_link(html: &str, page_url: &str) -> Option<String> {
    let document = Html::parse_document(html);
    document
        .select(&LINK_SELECTOR)
        .find(|link| VIEW_CONSOLIDATED_RE.is_match(&collapse_whitespace(&link.text().collect::<String>())))
        .and_then(|link| link.value().attr("href"))
        .and_then(|href| resolve_url(page_url, href))
}

pub(crate) fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::site::models::FetchedDocument;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    const PAGE: &str = "https://www.screener.in/company/ACME/";

    const LISTING: &str = r#"
        <html><body>
        <div class="documents annual-reports">
          <ul class="list-links">
            <li><a href="https://www.bseindia.com/AttachHis/fy2023.pdf" target="_blank">
                Financial Year 2023 <div class="ink-600 smaller">from bse</div></a></li>
            <li><a href="/annual-reports/acme-2025.pdf">Financial Year 2025
                <div class="ink-600 smaller">from bse</div></a></li>
            <li><a href="https://archives.nseindia.com/annual_reports/AR_2025.pdf">Financial Year 2025
                <div class="ink-600 smaller">from nse</div></a></li>
            <li><a href="/annual-reports/acme-2024.pdf">Financial Year 2024</a> <span>from bse</span></li>
            <li><a href="/concalls/q3.pdf">Transcript</a></li>
          </ul>
        </div>
        <a href="/annual-reports/acme-2025.pdf">Financial Year 2025 from bse</a>
        </body></html>
    "#;

    struct FakeSite {
        pages: HashMap<String, String>,
        requested: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl DocumentFetcher for FakeSite {
        fn base_url(&self) -> &str {
            "https://www.screener.in/"
        }

        async fn fetch_page(&self, url: &str) -> Result<String, FetchError> {
            self.requested.lock().unwrap().push(url.to_string());
            self.pages
                .get(url)
                .cloned()
                .ok_or(FetchError::Http(reqwest::StatusCode::NOT_FOUND))
        }

        async fn fetch_document(&self, url: &str) -> Result<FetchedDocument, FetchError> {
            Err(FetchError::InvalidUrl(url.to_string()))
        }
    }

    fn site(pages: &[(&str, &str)]) -> Arc<FakeSite> {
        Arc::new(FakeSite {
            pages: pages.iter().map(|(u, h)| (u.to_string(), h.to_string())).collect(),
            requested: Mutex::new(Vec::new()),
        })
    }

    #[test]
    fn parses_and_orders_candidates() {
        let candidates = parse_candidates(LISTING, PAGE);
        let summary: Vec<(String, &str, &str)> = candidates
            .iter()
            .map(|c| (c.fiscal_year.to_string(), c.origin.as_str(), c.url.as_str()))
            .collect();

        assert_eq!(
            summary,
            vec![
                ("FY2025".to_string(), "bse", "https://www.screener.in/annual-reports/acme-2025.pdf"),
                ("FY2025".to_string(), "nse", "https://archives.nseindia.com/annual_reports/AR_2025.pdf"),
                ("FY2024".to_string(), "bse", "https://www.screener.in/annual-reports/acme-2024.pdf"),
                ("FY2023".to_string(), "bse", "https://www.bseindia.com/AttachHis/fy2023.pdf"),
            ]
        );
    }

    #[test]
    fn sibling_links_do_not_borrow_a_report_label() {
        let html = r#"<div>
            <a href="/company/ACME/">View Standalone</a>
            <a href="/about/">About us</a>
            <a href="/ar-2025.pdf">Financial Year 2025 from bse</a>
        </div>"#;

        let candidates = parse_candidates(html, PAGE);

        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].url, "https://www.screener.in/ar-2025.pdf");
    }

    #[test]
    fn nav_link_next_to_split_label_is_ignored() {
        let html = r#"<li><a href="/ar-2024.pdf">Financial Year 2024</a> <span>from bse</span>
            <a href="/company/ACME/consolidated/">View Consolidated</a></li>"#;

        // Two links share the label, so neither can claim it.
        assert!(parse_candidates(html, PAGE).is_empty());
    }

    #[test]
    fn links_without_origin_are_ignored() {
        let html = r#"<p><a href="/x.pdf">Financial Year 2022</a></p>"#;
        assert!(parse_candidates(html, PAGE).is_empty());
    }

    #[test]
    fn detects_consolidated_toggle() {
        let standalone = r#"<a href="/company/ACME/consolidated/">View Consolidated</a>"#;
        let consolidated = r#"<a href="/company/ACME/">View Standalone</a>"#;

        assert_eq!(
            find_consolidated_link(standalone, PAGE).as_deref(),
            Some("https://www.screener.in/company/ACME/consolidated/")
        );
        assert_eq!(find_consolidated_link(consolidated, PAGE), None);
    }

    #[tokio::test]
    async fn refetches_consolidated_view() {
        let standalone = r#"<a href="/company/ACME/consolidated/">View Consolidated</a>
            <a href="/standalone.pdf">Financial Year 2025 from bse</a>"#;
        let consolidated = r#"<a href="/company/ACME/">View Standalone</a>
            <a href="/consolidated.pdf">Financial Year 2025 from bse</a>"#;
        let fake = site(&[
            (PAGE, standalone),
            ("https://www.screener.in/company/ACME/consolidated/", consolidated),
        ]);

        let locator = DocumentLocator::new(fake.clone());
        let candidates = locator.list_candidates("acme").await;

        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].url, "https://www.screener.in/consolidated.pdf");
        assert_eq!(fake.requested.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn fetch_failure_yields_empty_list() {
        let locator = DocumentLocator::new(site(&[]));
        assert!(locator.list_candidates("MISSING").await.is_empty());
    }

    #[tokio::test]
    async fn debug_dir_receives_annotated_listing() {
        let dir = tempfile::tempdir().unwrap();
        let locator = DocumentLocator::new(site(&[(PAGE, LISTING)])).with_debug_dir(dir.path().to_path_buf());

        assert_eq!(locator.list_candidates("ACME").await.len(), 4);
        assert!(dir.path().join("ACME_listing.html").exists());
    }
}
