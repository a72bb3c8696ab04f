// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 strucflow contributors

//! Caching layer for stage results
//!
//! Entries are content-addressed by cache key. The external tool behind a
//! stage is invoked at most once per distinct key for the lifetime of the
//! cache, not per run.

mod filesystem;
mod hash;

pub use filesystem::FilesystemCache;
pub use hash::{hash_string, stage_key, CacheKeyHasher};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::SystemTime;

use crate::errors::StrucflowResult;
use crate::value::Value;

/// Trait for cache implementations
#[async_trait]
pub trait Cache: Send + Sync {
    /// Get the entry for a cache key, if still valid
    async fn get(&self, key: &str) -> StrucflowResult<Option<CachedEntry>>;

    /// Store an entry under its key
    async fn store(&self, entry: &CachedEntry) -> StrucflowResult<()>;

    /// Drop the entry for a key
    async fn invalidate(&self, key: &str) -> StrucflowResult<()>;

    /// Drop all entries
    async fn clear(&self) -> StrucflowResult<()>;

    /// List all entries
    async fn entries(&self) -> StrucflowResult<Vec<CachedEntry>>;

    /// Cache statistics
    async fn stats(&self) -> StrucflowResult<CacheStats>;
}

/// One completed stage execution, keyed by cache key
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedEntry {
    /// When the entry was cached
    pub timestamp: SystemTime,
    /// Stage name (informational; the key is authoritative)
    pub stage: String,
    /// Binding id the execution ran for
    pub binding: String,
    /// Content-addressed cache key
    pub cache_key: String,
    /// Declared outputs by name
    pub outputs: BTreeMap<String, Value>,
}

impl CachedEntry {
    pub fn new(
        stage: &str,
        binding: &str,
        cache_key: String,
        outputs: BTreeMap<String, Value>,
    ) -> Self {
        Self {
            timestamp: SystemTime::now(),
            stage: stage.to_string(),
            binding: binding.to_string(),
            cache_key,
            outputs,
        }
    }
}

/// Cache statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheStats {
    /// Number of cached entries
    pub entries: usize,
    /// Total size in bytes
    pub size_bytes: u64,
    /// Oldest entry timestamp
    pub oldest_entry: Option<SystemTime>,
    /// Newest entry timestamp
    pub newest_entry: Option<SystemTime>,
}

impl CacheStats {
    /// Format size for display
    pub fn formatted_size(&self) -> String {
        const KB: u64 = 1024;
        const MB: u64 = KB * 1024;
        const GB: u64 = MB * 1024;

        if self.size_bytes >= GB {
            format!("{:.2} GB", self.size_bytes as f64 / GB as f64)
        } else if self.size_bytes >= MB {
            format!("{:.2} MB", self.size_bytes as f64 / MB as f64)
        } else if self.size_bytes >= KB {
            format!("{:.2} KB", self.size_bytes as f64 / KB as f64)
        } else {
            format!("{} bytes", self.size_bytes)
        }
    }
}
