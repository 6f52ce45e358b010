// src/storage/file_cache.rs
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};

use crate::extractors::models::SourceKind;
use crate::extractors::validator::ContentQuality;
use crate::fiscal_year::FiscalYear;
use crate::utils::error::StorageError;

const SECONDS_PER_DAY: u64 = 24 * 60 * 60;

/// Provenance stored next to the cached text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheMeta {
    pub source_url: String,
    pub source_kind: SourceKind,
}

/// A fresh, validated cache hit.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedText {
    pub text: String,
    pub age_days: f64,
    pub meta: Option<CacheMeta>,
}

/// On-disk text cache keyed by `(symbol, fiscal year)`. Freshness comes from
/// the file modification time, not from a stored timestamp.
pub struct FileCache {
    base_dir: PathBuf,
    max_age: Duration,
}

impl FileCache {
    /// Creates the cache; the base directory is created on first write.
    pub fn new<P: AsRef<Path>>(base_dir: P, max_age_days: u64) -> Self {
        Self {
            base_dir: base_dir.as_ref().to_path_buf(),
            max_age: Duration::from_secs(max_age_days * SECONDS_PER_DAY),
        }
    }

    fn entry_dir(&self, symbol: &str, fy: FiscalYear) -> PathBuf {
        self.base_dir.join(symbol.to_uppercase()).join(fy.to_string())
    }

    pub fn text_path(&self, symbol: &str, fy: FiscalYear) -> PathBuf {
        self.entry_dir(symbol, fy)
            .join(format!("{}_{}_report.txt", symbol.to_uppercase(), fy))
    }

    fn meta_path(&self, symbol: &str, fy: FiscalYear) -> PathBuf {
        self.entry_dir(symbol, fy)
            .join(format!("{}_{}_report_meta.json", symbol.to_uppercase(), fy))
    }

    /// Returns the cached text if it exists, is younger than the age limit and
    /// passes content validation. Entries failing validation are deleted.
    pub async fn read(&self, symbol: &str, fy: FiscalYear) -> Option<CachedText> {
        let path = self.text_path(symbol, fy);
        let metadata = tokio::fs::metadata(&path).await.ok()?;

        let modified = metadata.modified().ok()?;
        let age = SystemTime::now().duration_since(modified).unwrap_or_default();
        if age > self.max_age {
            tracing::info!("Cache entry for {} {} is {} days old, treating as miss", symbol, fy, age.as_secs() / SECONDS_PER_DAY);
            return None;
        }

        let text = match tokio::fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(e) => {
                // Non-UTF-8 bytes mean the file holds binary data.
                tracing::warn!("Unreadable cache entry {}: {}", path.display(), e);
                self.remove(symbol, fy).await;
                return None;
            }
        };

        let verdict = ContentQuality::assess(&text);
        if !verdict.is_acceptable() {
            tracing::warn!("Deleting invalid cache entry for {} {}: {}", symbol, fy, verdict.describe());
            self.remove(symbol, fy).await;
            return None;
        }

        let meta = match tokio::fs::read(self.meta_path(symbol, fy)).await {
            Ok(raw) => serde_json::from_slice(&raw).ok(),
            Err(_) => None,
        };

        tracing::debug!("Cache hit for {} {} ({} bytes)", symbol, fy, text.len());
        Some(CachedText {
            text,
            age_days: age.as_secs_f64() / SECONDS_PER_DAY as f64,
            meta,
        })
    }

    /// Writes the text (and its provenance) for `(symbol, fy)`, replacing any
    /// previous entry.
    pub async fn write(&self, symbol: &str, fy: FiscalYear, text: &str, meta: Option<&CacheMeta>) -> Result<PathBuf, StorageError> {
        let dir = self.entry_dir(symbol, fy);
        tokio::fs::create_dir_all(&dir).await?;

        let path = self.text_path(symbol, fy);
        tokio::fs::write(&path, text.as_bytes()).await?;

        if let Some(meta) = meta {
            let raw = serde_json::to_vec_pretty(meta)
                .map_err(|e| StorageError::SerializationError(e.to_string()))?;
            tokio::fs::write(self.meta_path(symbol, fy), raw).await?;
        }

        tracing::info!("Saved report text to {}", path.display());
        Ok(path)
    }

    /// Deletes the entry for `(symbol, fy)`; missing files are ignored.
    pub async fn remove(&self, symbol: &str, fy: FiscalYear) {
        for path in [self.text_path(symbol, fy), self.meta_path(symbol, fy)] {
            if let Err(e) = tokio::fs::remove_file(&path).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!("Failed to delete {}: {}", path.display(), e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::assert_ok;

    const TEXT: &str = "The directors present the annual report of the company for the year ended March 2025.\n\u{20b9} 1,234 crore";

    fn fy() -> FiscalYear {
        FiscalYear::new(2025)
    }

    fn set_age(path: &Path, days: u64) {
        let file = std::fs::File::options().write(true).open(path).unwrap();
        file.set_modified(SystemTime::now() - Duration::from_secs(days * SECONDS_PER_DAY))
            .unwrap();
    }

    #[tokio::test]
    async fn write_then_read_round_trips_exactly() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileCache::new(dir.path(), 90);
        let meta = CacheMeta {
            source_url: "https://files.example/ar.pdf".to_string(),
            source_kind: SourceKind::Ocr,
        };

        assert_ok!(cache.write("acme", fy(), TEXT, Some(&meta)).await);
        let hit = cache.read("ACME", fy()).await.unwrap();

        assert_eq!(hit.text, TEXT);
        assert_eq!(hit.meta, Some(meta));
        assert!(hit.age_days < 1.0);
    }

    #[tokio::test]
    async fn missing_entry_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileCache::new(dir.path().join("not-yet-created"), 90);
        assert!(cache.read("ACME", fy()).await.is_none());
    }

    #[tokio::test]
    async fn stale_entry_is_a_miss_even_when_valid() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileCache::new(dir.path(), 90);
        let path = cache.write("ACME", fy(), TEXT, None).await.unwrap();

        set_age(&path, 91);
        assert!(cache.read("ACME", fy()).await.is_none());

        set_age(&path, 89);
        assert!(cache.read("ACME", fy()).await.is_some());
    }

    #[tokio::test]
    async fn corrupted_entry_is_deleted_on_read() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileCache::new(dir.path(), 90);
        let path = cache.write("ACME", fy(), "%PDF-1.5\n\u{1}\u{2}\u{3} stream", None).await.unwrap();

        assert!(cache.read("ACME", fy()).await.is_none());
        assert!(!path.exists());
    }

    #[test]
    fn non_utf8_entry_is_deleted_on_read() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileCache::new(dir.path(), 90);
        let path = cache.text_path("ACME", fy());
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, [0xff, 0xfe, 0x00, 0x81]).unwrap();

        let hit = tokio_test::block_on(cache.read("ACME", fy()));

        assert!(hit.is_none());
        assert!(!path.exists());
    }
}
