// src/fiscal_year.rs
//! Canonical fiscal year tokens.
//!
//! Every cache key and ordering decision works on [`FiscalYear`], rendered as
//! `FY<year>`. Fiscal year N runs from April of N-1 to March of N.

use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, NaiveDate};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static CANONICAL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*FY\s*-?\s*(\d{4}|\d{2})\s*$").expect("Failed to compile CANONICAL_RE")
});

static BARE_YEAR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(\d{4})\s*$").expect("Failed to compile BARE_YEAR_RE"));

// "2024-25", "2024-2025", "2024/25", "2024 – 25"
static RANGE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(\d{4})\s*[-/–—]\s*(\d{4}|\d{2})\b").expect("Failed to compile RANGE_RE")
});

static MONTH_YEAR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(jan|feb|mar|apr|may|jun|jul|aug|sep|sept|oct|nov|dec)[a-z]*\.?[\s,'-]*(\d{4})\b")
        .expect("Failed to compile MONTH_YEAR_RE")
});

static FINANCIAL_YEAR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bfinancial\s+year\s*(?:ended\s+|ending\s+)?(\d{4})\b")
        .expect("Failed to compile FINANCIAL_YEAR_RE")
});

static ANY_YEAR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b((?:19|20)\d{2})\b").expect("Failed to compile ANY_YEAR_RE"));

/// A reporting period identified by the calendar year in which it ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct FiscalYear(u16);

impl FiscalYear {
    pub fn new(year: u16) -> Self {
        FiscalYear(year)
    }

    pub fn year(self) -> u16 {
        self.0
    }

    /// The fiscal year containing `date` (Apr–Dec roll forward to the next year).
    pub fn containing(date: NaiveDate) -> Self {
        let year = date.year() as u16;
        if date.month() >= 4 {
            FiscalYear(year + 1)
        } else {
            FiscalYear(year)
        }
    }

    /// The fiscal year containing today's local date.
    pub fn current() -> Self {
        Self::containing(chrono::Local::now().date_naive())
    }
}

impl fmt::Display for FiscalYear {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FY{}", self.0)
    }
}

impl From<FiscalYear> for String {
    fn from(fy: FiscalYear) -> Self {
        fy.to_string()
    }
}

impl TryFrom<String> for FiscalYear {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl FromStr for FiscalYear {
    type Err = String;

    /// Strict parse of the canonical form only; use [`normalize`] for free text.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CANONICAL_RE
            .captures(s)
            .and_then(|caps| expand_year(&caps[1], None))
            .map(FiscalYear)
            .ok_or_else(|| format!("'{}' is not a fiscal year token", s))
    }
}

/// Normalizes any supported year representation, falling back to the current
/// fiscal year when nothing matches.
pub fn normalize(input: &str) -> FiscalYear {
    normalize_at(input, chrono::Local::now().date_naive())
}

/// [`normalize`] with an explicit "today" for the fallback.
pub fn normalize_at(input: &str, today: NaiveDate) -> FiscalYear {
    match try_normalize(input) {
        Some(fy) => fy,
        None => {
            let fallback = FiscalYear::containing(today);
            tracing::debug!("No year pattern in '{}', using current fiscal year {}", input, fallback);
            fallback
        }
    }
}

/// Pattern matching without the fallback. Precedence: canonical token, bare
/// year, year range (end year), month + year, "Financial Year NNNN", then any
/// 4-digit year in the text.
pub fn try_normalize(input: &str) -> Option<FiscalYear> {
    if let Ok(fy) = input.parse::<FiscalYear>() {
        return Some(fy);
    }
    if let Some(caps) = BARE_YEAR_RE.captures(input) {
        return caps[1].parse().ok().map(FiscalYear);
    }
    if let Some(caps) = RANGE_RE.captures(input) {
        let start: u16 = caps[1].parse().ok()?;
        return expand_year(&caps[2], Some(start)).map(FiscalYear);
    }
    if let Some(caps) = MONTH_YEAR_RE.captures(input) {
        return caps[2].parse().ok().map(FiscalYear);
    }
    if let Some(caps) = FINANCIAL_YEAR_RE.captures(input) {
        return caps[1].parse().ok().map(FiscalYear);
    }
    ANY_YEAR_RE
        .captures(input)
        .and_then(|caps| caps[1].parse().ok())
        .map(FiscalYear)
}

/// Signed distance in years between two tokens.
pub fn compare(a: FiscalYear, b: FiscalYear) -> i32 {
    i32::from(a.0) - i32::from(b.0)
}

// Expands a 2-digit year relative to `start` (or the 2000s) to four digits.
fn expand_year(raw: &str, start: Option<u16>) -> Option<u16> {
    let value: u16 = raw.parse().ok()?;
    if raw.len() == 4 {
        return Some(value);
    }
    match start {
        Some(start) => {
            let mut year = start - start % 100 + value;
            if year < start {
                year += 100;
            }
            Some(year)
        }
        None => Some(2000 + value),
    }
}
