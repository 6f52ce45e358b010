// src/extractors/fallback.rs
//! Non-document sources used once every candidate document has failed.
//! Their output is partial and always labelled as such by the caller.

use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Selector};

use crate::ai::{GenerationOptions, LlmService};
use crate::extractors::models::{Extracted, SourceKind};
use crate::extractors::strategy::ExtractionStrategy;
use crate::extractors::validator::ContentQuality;
use crate::fiscal_year::FiscalYear;
use crate::site::locator::{collapse_whitespace, DocumentLocator};
use crate::utils::error::AttemptFailure;

// Data sections of a company listing page, in page order.
static SECTION_SELECTOR: Lazy<Selector> = Lazy::new(|| {
    Selector::parse("#top, #top-ratios, .company-profile, #quarters, #profit-loss, #balance-sheet, #cash-flow, #ratios, #shareholding")
        .expect("Failed to compile SECTION_SELECTOR")
});

static BLOCK_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("h1, h2, h3, p, li, tr").expect("Failed to compile BLOCK_SELECTOR"));

static CELL_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("th, td").expect("Failed to compile CELL_SELECTOR"));

/// What a fallback strategy needs to know.
#[derive(Debug, Clone)]
pub struct FallbackInput {
    pub symbol: String,
    pub fiscal_year: FiscalYear,
}

/// Reads the figures shown on the company listing page itself.
pub struct PageScrapeStrategy {
    locator: Arc<DocumentLocator>,
    min_chars: usize,
}

impl PageScrapeStrategy {
    pub fn new(locator: Arc<DocumentLocator>, min_chars: usize) -> Self {
        Self { locator, min_chars }
    }
}

#[async_trait]
impl ExtractionStrategy<FallbackInput> for PageScrapeStrategy {
    fn name(&self) -> &'static str {
        "page_scrape"
    }

    async fn attempt(&self, input: &FallbackInput) -> Result<Extracted, AttemptFailure> {
        let (page_url, html) = self.locator.fetch_listing(&input.symbol).await?;
        let text = listing_text(&html);
        tracing::debug!("Scraped {} chars from {}", text.len(), page_url);

        check_fallback_text(&text, self.min_chars)?;
        Ok(Extracted {
            text,
            kind: SourceKind::PageScrape,
            source_url: page_url,
        })
    }
}

/// Converts the data sections of a listing page into plain text, one line per
/// heading, paragraph or table row (cells separated by " | ").
pub fn listing_text(html: &str) -> String {
    let document = Html::parse_document(html);
    let mut lines = Vec::new();

    for section in document.select(&SECTION_SELECTOR) {
        for block in section.select(&BLOCK_SELECTOR) {
            let line = if block.value().name() == "tr" {
                row_text(block)
            } else if block.select(&BLOCK_SELECTOR).next().is_some() {
                // Containers are covered by their own nested blocks.
                continue;
            } else {
                collapse_whitespace(&block.text().collect::<String>())
            };
            if !line.is_empty() {
                lines.push(line);
            }
        }
    }

    lines.join("\n")
}

fn row_text(row: ElementRef) -> String {
    row.select(&CELL_SELECTOR)
        .map(|cell| collapse_whitespace(&cell.text().collect::<String>()))
        .collect::<Vec<_>>()
        .join(" | ")
}

/// Asks the language model for what it knows about the report.
pub struct LlmSearchStrategy {
    llm: Arc<dyn LlmService>,
    options: GenerationOptions,
    min_chars: usize,
}

impl LlmSearchStrategy {
    pub fn new(llm: Arc<dyn LlmService>, min_chars: usize) -> Self {
        Self {
            llm,
            options: GenerationOptions::default(),
            min_chars,
        }
    }
}

#[async_trait]
impl ExtractionStrategy<FallbackInput> for LlmSearchStrategy {
    fn name(&self) -> &'static str {
        "llm_search"
    }

    async fn attempt(&self, input: &FallbackInput) -> Result<Extracted, AttemptFailure> {
        let prompt = search_prompt(&input.symbol, input.fiscal_year);
        let text = self.llm.complete(&prompt, self.options).await?;

        check_fallback_text(&text, self.min_chars)?;
        Ok(Extracted {
            text,
            kind: SourceKind::LlmSearch,
            source_url: format!("llm-search:{}/{}", input.symbol.to_uppercase(), input.fiscal_year),
        })
    }
}

fn check_fallback_text(text: &str, min_chars: usize) -> Result<(), AttemptFailure> {
    let verdict = ContentQuality::assess(text);
    if !verdict.is_acceptable() {
        return Err(AttemptFailure::Corrupted(verdict.describe()));
    }
    let chars = text.chars().count();
    if chars < min_chars {
        return Err(AttemptFailure::TooShort {
            chars,
            required: min_chars,
        });
    }
    Ok(())
}

fn search_prompt(symbol: &str, fiscal_year: FiscalYear) -> String {
    format!(
        "Using publicly available information, describe the annual report of the Indian listed company \
with stock symbol {symbol} for fiscal year {fy} (April {start} to March {end}). Cover the chairman's \
message, business segments, revenue, profit, debt, cash flows and key risks, with figures where \
known. State clearly if information for {fy} is not available rather than substituting another year.",
        symbol = symbol.to_uppercase(),
        fy = fiscal_year,
        start = fiscal_year.year() - 1,
        end = fiscal_year.year(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractors::cascade::tests::FakeFetcher;
    use crate::utils::error::ExtractError;

    const LISTING: &str = r#"
        <html><body>
        <nav><a href="/">Home</a></nav>
        <div class="company-profile"><p>Acme Ltd is one of the largest makers of widgets and the leader
           for exports.</p></div>
        <section id="profit-loss">
          <h2>Profit &amp; Loss</h2>
          <table>
            <tr><th></th><th>Mar 2024</th><th>Mar 2025</th></tr>
            <tr><td>Sales</td><td>1,000</td><td>1,200</td></tr>
          </table>
        </section>
        </body></html>
    "#;

    struct EchoLlm;

    #[async_trait]
    impl LlmService for EchoLlm {
        async fn complete(&self, prompt: &str, _options: GenerationOptions) -> Result<String, ExtractError> {
            Ok(format!("Summary of the report. {}", prompt))
        }
    }

    #[test]
    fn listing_text_keeps_rows_and_paragraphs() {
        let text = listing_text(LISTING);
        let lines: Vec<&str> = text.lines().collect();

        assert!(lines[0].starts_with("Acme Ltd is one of the largest makers"));
        assert!(lines.contains(&"Profit & Loss"));
        assert!(lines.contains(&" | Mar 2024 | Mar 2025"));
        assert!(lines.contains(&"Sales | 1,000 | 1,200"));
        assert!(!text.contains("Home"));
    }

    #[tokio::test]
    async fn page_scrape_reads_listing_page() {
        let fetcher = Arc::new(FakeFetcher::new().html("https://www.screener.in/company/ACME/", LISTING));
        let strategy = PageScrapeStrategy::new(Arc::new(DocumentLocator::new(fetcher)), 50);
        let input = FallbackInput {
            symbol: "acme".to_string(),
            fiscal_year: FiscalYear::new(2025),
        };

        let extracted = strategy.attempt(&input).await.unwrap();

        assert_eq!(extracted.kind, SourceKind::PageScrape);
        assert_eq!(extracted.source_url, "https://www.screener.in/company/ACME/");
        assert!(extracted.text.contains("Sales | 1,000 | 1,200"));
    }

    #[tokio::test]
    async fn page_scrape_below_minimum_fails() {
        let fetcher = Arc::new(FakeFetcher::new().html("https://www.screener.in/company/ACME/", LISTING));
        let strategy = PageScrapeStrategy::new(Arc::new(DocumentLocator::new(fetcher)), 1_000);
        let input = FallbackInput {
            symbol: "ACME".to_string(),
            fiscal_year: FiscalYear::new(2025),
        };

        assert!(matches!(
            strategy.attempt(&input).await,
            Err(AttemptFailure::TooShort { required: 1_000, .. })
        ));
    }

    #[tokio::test]
    async fn llm_search_prompt_names_symbol_and_period() {
        let strategy = LlmSearchStrategy::new(Arc::new(EchoLlm), 100);
        let input = FallbackInput {
            symbol: "acme".to_string(),
            fiscal_year: FiscalYear::new(2025),
        };

        let extracted = strategy.attempt(&input).await.unwrap();

        assert_eq!(extracted.kind, SourceKind::LlmSearch);
        assert_eq!(extracted.source_url, "llm-search:ACME/FY2025");
        assert!(extracted.text.contains("symbol ACME for fiscal year FY2025 (April 2024 to March 2025)"));
    }
}
