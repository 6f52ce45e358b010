// src/utils/html_debug.rs
use std::fs::File;
use std::io::Write;
use std::path::Path;

use crate::utils::error::AppError;

/// Patterns highlighted when a listing page is dumped for debugging.
pub const LISTING_DEBUG_PATTERNS: &[(&str, &str)] = &[
    (r"(?i)financial\s+year\s*\d{4}", "period"),
    (r"(?i)\bfrom\s+[a-z]+", "origin"),
    (r#"(?i)<a[^>]*href="[^"]*\.pdf[^"]*"[^>]*>"#, "document"),
    (r"(?i)view\s+(?:consolidated|standalone)", "toggle"),
];

/// Saves an HTML page to a file with the given byte ranges highlighted.
pub fn save_debug_html(html: &str, path: &Path, highlights: &[(usize, usize, &str)]) -> Result<(), AppError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = File::create(path)?;

    let mut debug_html = String::from("<!DOCTYPE html>\n<html>\n<head>\n<style>\n");
    debug_html.push_str(".highlight-period { background-color: #90EE90; }\n");
    debug_html.push_str(".highlight-origin { background-color: #ADD8E6; }\n");
    debug_html.push_str(".highlight-document { background-color: #FFFF00; }\n");
    debug_html.push_str(".highlight-toggle { background-color: #FFA500; }\n");
    debug_html.push_str(".highlight-custom { background-color: #FFC0CB; }\n");
    debug_html.push_str("</style>\n</head>\n<body>\n");

    let mut last_pos = 0;
    let mut sorted_highlights = highlights.to_vec();
    sorted_highlights.sort_by_key(|h| h.0);

    for (start, end, highlight_type) in sorted_highlights {
        // Overlapping matches would slice backwards; keep the first one.
        if start < last_pos {
            continue;
        }
        debug_html.push_str(&html[last_pos..start]);

        let css_class = match highlight_type {
            "period" => "highlight-period",
            "origin" => "highlight-origin",
            "document" => "highlight-document",
            "toggle" => "highlight-toggle",
            _ => "highlight-custom",
        };

        debug_html.push_str(&format!(
            "<span class=\"{}\" title=\"Position: {}-{}, Type: {}\">",
            css_class, start, end, highlight_type
        ));
        debug_html.push_str(&html[start..end]);
        debug_html.push_str("</span>");

        last_pos = end;
    }

    if last_pos < html.len() {
        debug_html.push_str(&html[last_pos..]);
    }
    debug_html.push_str("\n</body>\n</html>");

    file.write_all(debug_html.as_bytes())?;

    tracing::info!("Saved debug HTML to {}", path.display());
    Ok(())
}

/// Creates a debug copy of an HTML page with every match of the given regex
/// patterns highlighted.
pub fn create_debug_html(html: &str, path: &Path, patterns: &[(&str, &str)]) -> Result<(), AppError> {
    use regex::Regex;

    let mut highlights = Vec::new();
    for (pattern, highlight_type) in patterns {
        let re = Regex::new(pattern)
            .map_err(|e| AppError::Config(format!("Invalid regex pattern '{}': {}", pattern, e)))?;

        for mat in re.find_iter(html) {
            highlights.push((mat.start(), mat.end(), *highlight_type));
        }
    }

    save_debug_html(html, path, &highlights)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn highlights_listing_patterns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("listing.html");
        let html = r#"<a href="/ar/2024.pdf">Financial Year 2024 from bse</a>"#;

        create_debug_html(html, &path, LISTING_DEBUG_PATTERNS).unwrap();

        let saved = std::fs::read_to_string(&path).unwrap();
        assert!(saved.contains("<span class=\"highlight-period\""));
        assert!(saved.contains("<span class=\"highlight-origin\""));
        assert!(saved.contains("<span class=\"highlight-document\""));
    }

    #[test]
    fn overlapping_highlights_do_not_panic() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("overlap.html");
        let html = "Financial Year 2024";
        let patterns = [(r"Financial Year \d{4}", "period"), (r"Year", "custom")];

        create_debug_html(html, &path, &patterns).unwrap();
        let saved = std::fs::read_to_string(&path).unwrap();
        assert!(saved.contains("Financial Year 2024</span>"));
    }
}
