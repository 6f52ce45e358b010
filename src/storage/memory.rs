// src/storage/memory.rs
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::extractors::models::ExtractionResult;
use crate::fiscal_year::FiscalYear;

/// Process-lifetime result cache. Nothing persists; a cold process simply
/// starts empty.
pub struct MemoryCache {
    ttl: Duration,
    entries: Mutex<HashMap<(String, FiscalYear), (Instant, ExtractionResult)>>,
}

impl MemoryCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, symbol: &str, fy: FiscalYear) -> Option<ExtractionResult> {
        let key = (symbol.to_uppercase(), fy);
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        match entries.get(&key) {
            Some((stored, result)) if stored.elapsed() < self.ttl => Some(result.clone()),
            Some(_) => {
                entries.remove(&key);
                None
            }
            None => None,
        }
    }

    pub fn set(&self, symbol: &str, fy: FiscalYear, result: ExtractionResult) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.insert((symbol.to_uppercase(), fy), (Instant::now(), result));
    }

    pub fn clear(&self) {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new(Duration::from_secs(24 * 60 * 60))
    }
}
