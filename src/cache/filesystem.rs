// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 strucflow contributors

//! Filesystem-based cache implementation
//!
//! Stores cache entries as JSON files in a cache directory, sharded by the
//! first two characters of the key.

use async_trait::async_trait;
use std::path::{Path, PathBuf};

use super::{Cache, CacheStats, CachedEntry};
use crate::errors::{StrucflowError, StrucflowResult};

/// Filesystem-based cache
pub struct FilesystemCache {
    cache_dir: PathBuf,
}

impl FilesystemCache {
    /// Create a new filesystem cache rooted at `cache_dir`
    pub fn new(cache_dir: PathBuf) -> StrucflowResult<Self> {
        if !cache_dir.exists() {
            std::fs::create_dir_all(&cache_dir).map_err(|e| StrucflowError::Cache {
                message: format!("Failed to create cache directory: {}", e),
            })?;
        }

        Ok(Self { cache_dir })
    }

    /// Create cache with the default directory under an output root
    pub fn default_cache(root: &Path) -> StrucflowResult<Self> {
        Self::new(root.join(".strucflow").join("cache"))
    }

    /// Get path for a cache entry
    fn entry_path(&self, key: &str) -> PathBuf {
        // Two-character prefix directories keep any one directory small
        let (prefix, rest) = key.split_at(2.min(key.len()));
        self.cache_dir.join(prefix).join(format!("{}.json", rest))
    }

    fn list_entries(&self) -> StrucflowResult<Vec<CachedEntry>> {
        let mut entries = Vec::new();

        if !self.cache_dir.exists() {
            return Ok(entries);
        }

        for prefix_dir in std::fs::read_dir(&self.cache_dir).map_err(|e| StrucflowError::Cache {
            message: format!("Failed to read cache directory: {}", e),
        })? {
            let prefix_dir = prefix_dir
                .map_err(|e| StrucflowError::Cache {
                    message: format!("Failed to read cache entry: {}", e),
                })?
                .path();

            if !prefix_dir.is_dir() {
                continue;
            }

            for entry_file in std::fs::read_dir(&prefix_dir).map_err(|e| StrucflowError::Cache {
                message: format!("Failed to read cache subdirectory: {}", e),
            })? {
                let entry_file = entry_file
                    .map_err(|e| StrucflowError::Cache {
                        message: format!("Failed to read cache file: {}", e),
                    })?
                    .path();

                if entry_file.extension().and_then(|e| e.to_str()) != Some("json") {
                    continue;
                }

                if let Ok(content) = std::fs::read_to_string(&entry_file) {
                    if let Ok(entry) = serde_json::from_str::<CachedEntry>(&content) {
                        entries.push(entry);
                    }
                }
            }
        }

        Ok(entries)
    }

    /// Calculate directory size recursively
    fn dir_size(path: &Path) -> StrucflowResult<u64> {
        let mut size = 0;

        if path.is_file() {
            return Ok(path.metadata().map(|m| m.len()).unwrap_or(0));
        }

        for entry in std::fs::read_dir(path).map_err(|e| StrucflowError::Cache {
            message: format!("Failed to read directory: {}", e),
        })? {
            let entry = entry.map_err(|e| StrucflowError::Cache {
                message: format!("Failed to read entry: {}", e),
            })?;

            let path = entry.path();
            if path.is_dir() {
                size += Self::dir_size(&path)?;
            } else {
                size += entry.metadata().map(|m| m.len()).unwrap_or(0);
            }
        }

        Ok(size)
    }
}

#[async_trait]
impl Cache for FilesystemCache {
    async fn get(&self, key: &str) -> StrucflowResult<Option<CachedEntry>> {
        let path = self.entry_path(key);

        if !path.exists() {
            return Ok(None);
        }

        let content =
            tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| StrucflowError::Cache {
                    message: format!("Failed to read cache entry: {}", e),
                })?;

        let entry: CachedEntry =
            serde_json::from_str(&content).map_err(|e| StrucflowError::Cache {
                message: format!("Failed to parse cache entry: {}", e),
            })?;

        // A hit is only valid if every recorded output file still exists
        for output in entry.outputs.values() {
            for file in output.files() {
                if !file.exists() {
                    tracing::debug!(key, file = %file.display(), "stale cache entry, output missing");
                    let _ = tokio::fs::remove_file(&path).await;
                    return Ok(None);
                }
            }
        }

        Ok(Some(entry))
    }

    async fn store(&self, entry: &CachedEntry) -> StrucflowResult<()> {
        let path = self.entry_path(&entry.cache_key);

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StrucflowError::Cache {
                    message: format!("Failed to create cache directory: {}", e),
                })?;
        }

        let json = serde_json::to_string_pretty(entry).map_err(|e| StrucflowError::Cache {
            message: format!("Failed to serialize cache entry: {}", e),
        })?;

        tokio::fs::write(&path, json)
            .await
            .map_err(|e| StrucflowError::Cache {
                message: format!("Failed to write cache entry: {}", e),
            })?;

        Ok(())
    }

    async fn invalidate(&self, key: &str) -> StrucflowResult<()> {
        let path = self.entry_path(key);

        if path.exists() {
            tokio::fs::remove_file(&path)
                .await
                .map_err(|e| StrucflowError::Cache {
                    message: format!("Failed to remove cache entry: {}", e),
                })?;
        }

        Ok(())
    }

    async fn clear(&self) -> StrucflowResult<()> {
        if self.cache_dir.exists() {
            tokio::fs::remove_dir_all(&self.cache_dir)
                .await
                .map_err(|e| StrucflowError::Cache {
                    message: format!("Failed to clear cache: {}", e),
                })?;

            tokio::fs::create_dir_all(&self.cache_dir)
                .await
                .map_err(|e| StrucflowError::Cache {
                    message: format!("Failed to recreate cache directory: {}", e),
                })?;
        }

        Ok(())
    }

    async fn entries(&self) -> StrucflowResult<Vec<CachedEntry>> {
        self.list_entries()
    }

    async fn stats(&self) -> StrucflowResult<CacheStats> {
        let entries = self.list_entries()?;

        let mut stats = CacheStats {
            entries: entries.len(),
            size_bytes: 0,
            oldest_entry: None,
            newest_entry: None,
        };

        for entry in &entries {
            match stats.oldest_entry {
                None => stats.oldest_entry = Some(entry.timestamp),
                Some(oldest) if entry.timestamp < oldest => {
                    stats.oldest_entry = Some(entry.timestamp)
                }
                _ => {}
            }

            match stats.newest_entry {
                None => stats.newest_entry = Some(entry.timestamp),
                Some(newest) if entry.timestamp > newest => {
                    stats.newest_entry = Some(entry.timestamp)
                }
                _ => {}
            }
        }

        if self.cache_dir.exists() {
            stats.size_bytes = Self::dir_size(&self.cache_dir)?;
        }

        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn make_entry(key: &str, outputs: BTreeMap<String, Value>) -> CachedEntry {
        CachedEntry::new("segment", "sub-01", key.to_string(), outputs)
    }

    #[tokio::test]
    async fn test_cache_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let cache = FilesystemCache::new(temp_dir.path().join("cache")).unwrap();

        let entry = make_entry("abcdef0123", BTreeMap::new());
        cache.store(&entry).await.unwrap();

        let cached = cache.get("abcdef0123").await.unwrap();
        assert!(cached.is_some());

        let cached = cached.unwrap();
        assert_eq!(cached.stage, "segment");
        assert_eq!(cached.binding, "sub-01");
        assert_eq!(cached.cache_key, "abcdef0123");
    }

    #[tokio::test]
    async fn test_cache_miss() {
        let temp_dir = TempDir::new().unwrap();
        let cache = FilesystemCache::new(temp_dir.path().join("cache")).unwrap();

        assert!(cache.get("0000000000").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cache_invalidate() {
        let temp_dir = TempDir::new().unwrap();
        let cache = FilesystemCache::new(temp_dir.path().join("cache")).unwrap();

        let entry = make_entry("abcdef0123", BTreeMap::new());
        cache.store(&entry).await.unwrap();
        assert!(cache.get("abcdef0123").await.unwrap().is_some());

        cache.invalidate("abcdef0123").await.unwrap();
        assert!(cache.get("abcdef0123").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cache_clear() {
        let temp_dir = TempDir::new().unwrap();
        let cache = FilesystemCache::new(temp_dir.path().join("cache")).unwrap();

        cache
            .store(&make_entry("abcdef0123", BTreeMap::new()))
            .await
            .unwrap();

        let stats = cache.stats().await.unwrap();
        assert_eq!(stats.entries, 1);

        cache.clear().await.unwrap();

        let stats = cache.stats().await.unwrap();
        assert_eq!(stats.entries, 0);
    }

    #[tokio::test]
    async fn test_stale_entry_dropped_when_output_missing() {
        let temp_dir = TempDir::new().unwrap();
        let cache = FilesystemCache::new(temp_dir.path().join("cache")).unwrap();

        let existing = temp_dir.path().join("c1_sub-01.nii");
        std::fs::File::create(&existing).unwrap();

        let mut outputs = BTreeMap::new();
        outputs.insert("tissue_maps".to_string(), Value::Path(existing.clone()));
        cache
            .store(&make_entry("abcdef0123", outputs))
            .await
            .unwrap();

        // Valid while the output exists
        assert!(cache.get("abcdef0123").await.unwrap().is_some());

        // Removing the output invalidates the entry
        std::fs::remove_file(&existing).unwrap();
        assert!(cache.get("abcdef0123").await.unwrap().is_none());
        assert!(cache.get("abcdef0123").await.unwrap().is_none());
    }
}
