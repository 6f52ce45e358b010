// src/lib.rs
//! Locates, downloads and extracts annual-report text for listed companies.
pub mod ai;
pub mod extractors;
pub mod fiscal_year;
pub mod pipeline;
pub mod site;
pub mod storage;
pub mod utils;

pub use fiscal_year::FiscalYear;
pub use pipeline::{ReportOutcome, ReportPipeline, ReportRequest};
