// src/main.rs
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use report_fetcher::pipeline::{ReportOutcome, ReportPipeline, ReportRequest};
use report_fetcher::storage::DbCache;
use report_fetcher::utils::{self, AppError, Config};

/// How often expired database rows are swept while the process runs.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Command Line Interface for the annual report fetcher
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Stock symbol of the company (e.g. RELIANCE)
    #[arg(short, long)]
    symbol: String,

    /// Fiscal year in any common notation: 2024-25, FY2025, Mar 2025, 2025
    #[arg(short, long)]
    fiscal_year: String,

    /// Ignore every cache tier and extract again
    #[arg(long)]
    force_refresh: bool,

    /// Report "unavailable" instead of serving page-scrape or LLM content
    #[arg(long)]
    no_fallback: bool,

    /// Debug mode - save annotated listing pages next to the text cache
    #[arg(short, long)]
    debug: bool,

    /// Directory for cached report text (overrides CACHE_DIR)
    #[arg(long)]
    cache_dir: Option<PathBuf>,

    /// Path of the sqlite result cache (overrides DB_PATH)
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// Write the JSON outcome to this file instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    // 1. Setup Logging (reads RUST_LOG env var)
    utils::logging::setup_logging();

    // 2. Parse CLI Arguments and layer them over the environment
    let args = Args::parse();
    tracing::info!("Starting processing for args: {:?}", args);

    let mut config = Config::from_env()?;
    if let Some(dir) = &args.cache_dir {
        config.cache_dir = dir.clone();
    }
    if let Some(path) = &args.db_path {
        config.db_path = path.clone();
    }
    if !config.has_credentials() {
        tracing::warn!("SITE_USERNAME/SITE_PASSWORD not set, browsing anonymously");
    }

    // 3. Open the database cache; the run continues without it on failure
    let db = match DbCache::connect(&config.db_path).await {
        Ok(db) => {
            let db = Arc::new(db);
            Arc::clone(&db).spawn_ttl_sweeper(SWEEP_INTERVAL);
            Some(db)
        }
        Err(e) => {
            tracing::warn!("Database cache at {} unavailable: {}", config.db_path.display(), e);
            None
        }
    };

    // 4. Build the pipeline
    let debug_dir = args.debug.then(|| config.cache_dir.join("debug"));
    let pipeline = ReportPipeline::from_config(&config, db, debug_dir)?;

    // 5. Fetch the report
    let request = ReportRequest {
        symbol: args.symbol.clone(),
        fiscal_year: args.fiscal_year.clone(),
        force_refresh: args.force_refresh,
        allow_fallback: !args.no_fallback,
    };
    let outcome = pipeline.fetch_report(&request).await;

    // 6. Emit the outcome
    let json = serde_json::to_string_pretty(&outcome).map_err(|e| AppError::Processing(e.to_string()))?;
    match &args.output {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, &json)?;
            tracing::info!("Saved outcome to: {}", path.display());
        }
        None => println!("{}", json),
    }

    match &outcome {
        ReportOutcome::Unavailable { requested } => Err(AppError::Processing(format!(
            "No report available for {} {}",
            args.symbol.to_uppercase(),
            requested
        ))),
        _ => {
            if outcome.is_partial() {
                tracing::warn!("No complete annual report found, served {} fallback content", args.symbol.to_uppercase());
            }
            if !outcome.matches_requested_year() {
                tracing::warn!("Returned content does not cover the requested fiscal year {}", outcome.requested());
            }
            tracing::info!("Processing finished.");
            Ok(())
        }
    }
}
