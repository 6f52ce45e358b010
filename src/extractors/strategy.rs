// src/extractors/strategy.rs
//! Named extraction strategies and the "first success wins" runner.
//!
//! Precedence lives in the order of a `Vec` of strategies rather than in
//! nested fallback logic, so strategies can be reordered or inserted freely.

use std::sync::Arc;

use async_trait::async_trait;

use crate::ai::OcrService;
use crate::extractors::models::{Extracted, SourceKind};
use crate::extractors::pdf::TextExtractor;
use crate::extractors::validator::ContentQuality;
use crate::utils::error::{AttemptFailure, ExtractError};

/// A downloaded document ready for text extraction.
#[derive(Debug, Clone)]
pub struct DocumentInput {
    /// URL the bytes were actually served from.
    pub url: String,
    pub bytes: Arc<[u8]>,
}

/// One way of turning an input into text.
#[async_trait]
pub trait ExtractionStrategy<I: Sync>: Send + Sync {
    fn name(&self) -> &'static str;

    async fn attempt(&self, input: &I) -> Result<Extracted, AttemptFailure>;
}

/// Why a named strategy was passed over.
#[derive(Debug)]
pub struct StrategyFailure {
    pub strategy: &'static str,
    pub reason: AttemptFailure,
}

/// Runs strategies in order and returns the first success. Later strategies
/// never start before earlier ones have resolved.
pub async fn first_success<I: Sync>(
    strategies: &[Box<dyn ExtractionStrategy<I>>],
    input: &I,
) -> Result<Extracted, Vec<StrategyFailure>> {
    let mut failures = Vec::new();
    for strategy in strategies {
        match strategy.attempt(input).await {
            Ok(extracted) => {
                tracing::debug!("Strategy '{}' produced {} bytes", strategy.name(), extracted.text.len());
                return Ok(extracted);
            }
            Err(reason) => {
                tracing::info!("Strategy '{}' failed: {}", strategy.name(), reason);
                failures.push(StrategyFailure {
                    strategy: strategy.name(),
                    reason,
                });
            }
        }
    }
    Err(failures)
}

/// Reads the document's own text layer.
pub struct NativeTextStrategy {
    extractor: Arc<dyn TextExtractor>,
    min_chars: usize,
}

impl NativeTextStrategy {
    /// `min_chars` is the yield below which the document counts as image-only.
    pub fn new(extractor: Arc<dyn TextExtractor>, min_chars: usize) -> Self {
        Self { extractor, min_chars }
    }
}

#[async_trait]
impl ExtractionStrategy<DocumentInput> for NativeTextStrategy {
    fn name(&self) -> &'static str {
        "native_text"
    }

    async fn attempt(&self, input: &DocumentInput) -> Result<Extracted, AttemptFailure> {
        let extractor = Arc::clone(&self.extractor);
        let bytes = Arc::clone(&input.bytes);
        // Text-layer parsing is CPU-bound; keep it off the async workers.
        let native = tokio::task::spawn_blocking(move || extractor.extract(&bytes))
            .await
            .map_err(|e| ExtractError::Pdf(format!("extraction task failed: {}", e)))??;

        tracing::debug!("Native extraction: {} pages, {} bytes of text", native.page_count, native.text.len());

        let verdict = ContentQuality::assess(&native.text);
        if verdict.is_corrupted() {
            return Err(AttemptFailure::Corrupted(verdict.describe()));
        }
        let chars = native.text.chars().count();
        if chars < self.min_chars {
            return Err(AttemptFailure::TooShort {
                chars,
                required: self.min_chars,
            });
        }
        // A long text layer with no prose (tables only, broken font maps)
        // still goes to OCR.
        if !verdict.is_acceptable() {
            return Err(AttemptFailure::Corrupted(verdict.describe()));
        }
        Ok(Extracted {
            text: native.text,
            kind: SourceKind::NativeText,
            source_url: input.url.clone(),
        })
    }
}

/// Sends the document to the vision service for image-based documents.
pub struct OcrStrategy {
    ocr: Arc<dyn OcrService>,
}

impl OcrStrategy {
    pub fn new(ocr: Arc<dyn OcrService>) -> Self {
        Self { ocr }
    }
}

#[async_trait]
impl ExtractionStrategy<DocumentInput> for OcrStrategy {
    fn name(&self) -> &'static str {
        "ocr"
    }

    async fn attempt(&self, input: &DocumentInput) -> Result<Extracted, AttemptFailure> {
        tracing::info!("Running OCR for {}", input.url);
        let text = self.ocr.recognize(&input.url, &input.bytes).await?;
        let verdict = ContentQuality::assess(&text);
        if !verdict.is_acceptable() {
            return Err(AttemptFailure::Corrupted(verdict.describe()));
        }
        Ok(Extracted {
            text,
            kind: SourceKind::Ocr,
            source_url: input.url.clone(),
        })
    }
}
