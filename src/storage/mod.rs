// src/storage/mod.rs
//! The three cache tiers: in-process results, on-disk text, database rows.
pub mod db_cache;
pub mod file_cache;
pub mod memory;

pub use db_cache::{DbCache, DocumentKey};
pub use file_cache::{CacheMeta, CachedText, FileCache};
pub use memory::MemoryCache;
