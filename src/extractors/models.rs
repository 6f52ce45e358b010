// src/extractors/models.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::fiscal_year::FiscalYear;

/// How a piece of content was obtained, in decreasing order of trust.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    NativeText,
    Ocr,
    PageScrape,
    LlmSearch,
}

impl SourceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SourceKind::NativeText => "native_text",
            SourceKind::Ocr => "ocr",
            SourceKind::PageScrape => "page_scrape",
            SourceKind::LlmSearch => "llm_search",
        }
    }
}

/// Text produced by one strategy, before the caller's length gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extracted {
    pub text: String,
    pub kind: SourceKind,
    /// Where the text came from: a document URL, a page URL or a pseudo-URL.
    pub source_url: String,
}

/// A validated report text with its provenance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub fiscal_year: FiscalYear,
    pub content: String,
    pub source_url: String,
    pub source_kind: SourceKind,
    pub byte_length: usize,
    pub extracted_at: DateTime<Utc>,
}

impl ExtractionResult {
    pub fn new(fiscal_year: FiscalYear, content: String, source_url: &str, source_kind: SourceKind) -> Self {
        Self {
            fiscal_year,
            byte_length: content.len(),
            content,
            source_url: source_url.to_string(),
            source_kind,
            extracted_at: Utc::now(),
        }
    }

    pub fn char_count(&self) -> usize {
        self.content.chars().count()
    }
}
