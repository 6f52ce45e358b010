// src/extractors/pdf.rs
use std::panic::{self, AssertUnwindSafe};

use crate::utils::error::ExtractError;

/// Text layer of a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeText {
    pub text: String,
    pub page_count: usize,
}

/// Extracts the embedded text layer from a binary document.
pub trait TextExtractor: Send + Sync {
    fn extract(&self, bytes: &[u8]) -> Result<NativeText, ExtractError>;
}

/// `pdf-extract` backed extractor.
#[derive(Debug, Default, Clone, Copy)]
pub struct PdfTextExtractor;

impl TextExtractor for PdfTextExtractor {
    fn extract(&self, bytes: &[u8]) -> Result<NativeText, ExtractError> {
        if !bytes.starts_with(b"%PDF") {
            return Err(ExtractError::Pdf("missing %PDF header".to_string()));
        }

        // Malformed PDFs can panic inside the parser; contain it to this document.
        let pages = panic::catch_unwind(AssertUnwindSafe(|| pdf_extract::extract_text_from_mem_by_pages(bytes)))
            .map_err(|_| ExtractError::Pdf("parser panicked".to_string()))?
            .map_err(|e| ExtractError::Pdf(e.to_string()))?;

        let page_count = pages.len();
        if page_count == 0 {
            return Err(ExtractError::Pdf("document has no pages".to_string()));
        }
        let text = pages
            .iter()
            .map(|page| page.trim())
            .filter(|page| !page.is_empty())
            .collect::<Vec<_>>()
            .join("\n\n");

        Ok(NativeText { text, page_count })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_pdf_bytes_are_rejected() {
        let err = PdfTextExtractor.extract(b"<html>not a pdf</html>").unwrap_err();
        assert!(matches!(err, ExtractError::Pdf(msg) if msg.contains("header")));
    }

    #[test]
    fn truncated_pdf_returns_error() {
        assert!(PdfTextExtractor.extract(b"%PDF-1.4\n%garbage").is_err());
    }
}
