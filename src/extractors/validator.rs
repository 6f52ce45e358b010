// src/extractors/validator.rs
//! Heuristic checks separating real report prose from binary noise.

use once_cell::sync::Lazy;
use regex::Regex;

/// Characters inspected from the start of the text.
const PREFIX_CHARS: usize = 2_000;
/// Control-character share above which a prefix is treated as binary.
const MAX_CONTROL_RATIO: f64 = 0.5;

/// Raw document headers that show undecoded bytes were stored as text.
const BINARY_HEADERS: &[&str] = &[
    "%PDF-",
    "PK\u{3}\u{4}",
    "\u{89}PNG",
    "\u{FFFD}PNG",
    "GIF8",
    "\u{FF}\u{D8}\u{FF}",
    "\u{FEFF}%PDF-",
];

static COMMON_WORD_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(?:the|and|of|is|for)\b").expect("Failed to compile COMMON_WORD_RE"));

/// Outcome of assessing a text prefix.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Verdict {
    Acceptable,
    Empty,
    BinaryHeader,
    ControlCharacters { ratio: f64 },
    /// Control characters present and no common words: likely garbage.
    Suspicious,
    NoCommonWords,
}

impl Verdict {
    pub fn is_acceptable(self) -> bool {
        matches!(self, Verdict::Acceptable)
    }

    /// True for verdicts that indicate binary data rather than merely thin text.
    pub fn is_corrupted(self) -> bool {
        matches!(
            self,
            Verdict::BinaryHeader | Verdict::ControlCharacters { .. } | Verdict::Suspicious
        )
    }

    pub fn describe(self) -> String {
        match self {
            Verdict::Acceptable => "acceptable".to_string(),
            Verdict::Empty => "empty text".to_string(),
            Verdict::BinaryHeader => "starts with a raw binary document header".to_string(),
            Verdict::ControlCharacters { ratio } => format!("{:.0}% control characters", ratio * 100.0),
            Verdict::Suspicious => "control characters without any common words".to_string(),
            Verdict::NoCommonWords => "no common English words".to_string(),
        }
    }
}

/// Named, independently testable quality rules combined by a simple policy.
pub struct ContentQuality;

impl ContentQuality {
    pub fn has_binary_header(text: &str) -> bool {
        let head = text.trim_start_matches(|c: char| c.is_whitespace());
        BINARY_HEADERS.iter().any(|marker| head.starts_with(marker))
    }

    /// Share of control characters (excluding tab, CR and LF) in the prefix.
    pub fn control_ratio(prefix: &str) -> (usize, f64) {
        let mut total = 0usize;
        let mut control = 0usize;
        for c in prefix.chars() {
            total += 1;
            if c.is_control() && !matches!(c, '\n' | '\r' | '\t') {
                control += 1;
            }
        }
        if total == 0 {
            return (0, 0.0);
        }
        (control, control as f64 / total as f64)
    }

    pub fn has_common_words(prefix: &str) -> bool {
        COMMON_WORD_RE.is_match(prefix)
    }

    pub fn assess(text: &str) -> Verdict {
        if text.trim().is_empty() {
            return Verdict::Empty;
        }
        if Self::has_binary_header(text) {
            return Verdict::BinaryHeader;
        }
        let prefix = prefix(text);
        let (control_count, ratio) = Self::control_ratio(prefix);
        if ratio > MAX_CONTROL_RATIO {
            return Verdict::ControlCharacters { ratio };
        }
        let common = Self::has_common_words(prefix);
        if control_count > 0 && !common {
            return Verdict::Suspicious;
        }
        if !common {
            return Verdict::NoCommonWords;
        }
        Verdict::Acceptable
    }
}

pub fn is_acceptable(text: &str) -> bool {
    ContentQuality::assess(text).is_acceptable()
}

pub fn is_corrupted(text: &str) -> bool {
    ContentQuality::assess(text).is_corrupted()
}

fn prefix(text: &str) -> &str {
    match text.char_indices().nth(PREFIX_CHARS) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
