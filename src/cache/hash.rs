// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 strucflow contributors

//! Cache key derivation
//!
//! A cache key is a BLAKE3 digest over the stage identity, the operation's
//! parameter fingerprint, and the resolved input values plus the contents
//! of every file they reference. Two executions with equal keys are
//! interchangeable.

use blake3::Hasher;
use std::collections::BTreeMap;
use std::path::Path;

use crate::errors::{StrucflowError, StrucflowResult};
use crate::value::Value;

/// Incremental hasher for building cache keys
pub struct CacheKeyHasher {
    hasher: Hasher,
}

impl CacheKeyHasher {
    pub fn new() -> Self {
        Self {
            hasher: Hasher::new(),
        }
    }

    /// Hash raw bytes
    pub fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
    }

    /// Hash a string with a length prefix so concatenations can't collide
    pub fn text(&mut self, s: &str) {
        self.hasher.update(&(s.len() as u64).to_le_bytes());
        self.hasher.update(s.as_bytes());
    }

    /// Hash a value's JSON form plus the contents of referenced files
    pub fn value(&mut self, value: &Value) -> StrucflowResult<()> {
        let json = serde_json::to_string(value)?;
        self.text(&json);

        for file in value.files() {
            self.file(file)?;
        }

        Ok(())
    }

    /// Hash a file's contents
    ///
    /// Missing files are skipped; the execution itself reports them.
    pub fn file(&mut self, path: &Path) -> StrucflowResult<()> {
        if !path.exists() {
            return Ok(());
        }

        let content = std::fs::read(path).map_err(|e| StrucflowError::FileReadError {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        self.hasher.update(&content);
        Ok(())
    }

    /// Finalize into a hex key
    pub fn finalize(self) -> String {
        self.hasher.finalize().to_hex().to_string()
    }
}

impl Default for CacheKeyHasher {
    fn default() -> Self {
        Self::new()
    }
}

/// Compute the cache key for one stage execution
///
/// Deterministic over (stage name, operation fingerprint, resolved inputs).
/// Input iteration order is the BTreeMap name order, so key derivation does
/// not depend on insertion order.
pub fn stage_key(
    stage: &str,
    fingerprint: &serde_json::Value,
    inputs: &BTreeMap<String, Value>,
) -> StrucflowResult<String> {
    let mut hasher = CacheKeyHasher::new();
    hasher.text(stage);
    hasher.text(&serde_json::to_string(fingerprint)?);

    for (name, value) in inputs {
        hasher.text(name);
        hasher.value(value)?;
    }

    Ok(hasher.finalize())
}

/// Quick hash of a string
pub fn hash_string(s: &str) -> String {
    let mut hasher = Hasher::new();
    hasher.update(s.as_bytes());
    hasher.finalize().to_hex().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn inputs_of(name: &str, value: Value) -> BTreeMap<String, Value> {
        [(name.to_string(), value)].into()
    }

    #[test]
    fn test_stage_key_deterministic() {
        let fp = serde_json::json!({"classes": 6});
        let inputs = inputs_of("image", Value::Path(PathBuf::from("/data/sub-01.nii")));

        let a = stage_key("segment", &fp, &inputs).unwrap();
        let b = stage_key("segment", &fp, &inputs).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_stage_key_varies_with_inputs_and_params() {
        let fp = serde_json::json!({"classes": 6});
        let a = stage_key(
            "segment",
            &fp,
            &inputs_of("image", Value::Path(PathBuf::from("/data/sub-01.nii"))),
        )
        .unwrap();
        let b = stage_key(
            "segment",
            &fp,
            &inputs_of("image", Value::Path(PathBuf::from("/data/sub-02.nii"))),
        )
        .unwrap();
        let c = stage_key(
            "segment",
            &serde_json::json!({"classes": 5}),
            &inputs_of("image", Value::Path(PathBuf::from("/data/sub-01.nii"))),
        )
        .unwrap();

        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_stage_key_tracks_file_contents() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("sub-01.nii");
        std::fs::File::create(&file)
            .unwrap()
            .write_all(b"v1")
            .unwrap();

        let fp = serde_json::json!({});
        let inputs = inputs_of("image", Value::Path(file.clone()));
        let before = stage_key("segment", &fp, &inputs).unwrap();

        std::fs::File::create(&file)
            .unwrap()
            .write_all(b"v2")
            .unwrap();
        let after = stage_key("segment", &fp, &inputs).unwrap();

        assert_ne!(before, after);
    }

    #[test]
    fn test_hash_string() {
        assert_eq!(hash_string("hello"), hash_string("hello"));
        assert_ne!(hash_string("hello"), hash_string("world"));
    }
}
