// src/site/mod.rs
pub mod client;
pub mod locator;
pub mod models;
pub mod rate_limit;
pub mod session;

pub use client::{DocumentFetcher, SiteClient};
pub use locator::DocumentLocator;
pub use models::{CandidateDocument, FetchedDocument, SessionToken};
pub use rate_limit::RateGate;
pub use session::{CredentialProvider, SessionProvider};
