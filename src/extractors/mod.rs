// src/extractors/mod.rs
pub mod cascade;
pub mod fallback;
pub mod models;
pub mod pdf;
pub mod strategy;
pub mod validator;

// Re-export key extraction types for convenience
pub use cascade::ExtractionCascade;
pub use fallback::{FallbackInput, LlmSearchStrategy, PageScrapeStrategy};
pub use models::{Extracted, ExtractionResult, SourceKind};
pub use pdf::{PdfTextExtractor, TextExtractor};
pub use strategy::{first_success, DocumentInput, ExtractionStrategy, NativeTextStrategy, OcrStrategy};
pub use validator::{is_acceptable, is_corrupted, ContentQuality, Verdict};
