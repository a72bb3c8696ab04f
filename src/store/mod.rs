// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 strucflow contributors

//! Artifact store
//!
//! Publishes the outputs of successful stages into a stable, human-readable
//! layout: `<root>/<binding>/<stage>/<output>[_<index>]<ext>`. Shared
//! stages publish under the group binding id. Publishing is a copy; the
//! cached workspace files stay where they are.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::errors::{StrucflowError, StrucflowResult};
use crate::value::Value;

/// One published artifact
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactRecord {
    /// Output name the artifact came from
    pub output: String,
    /// Position within a list output, absent for scalar outputs
    pub index: Option<usize>,
    /// File the artifact was copied from
    pub source: PathBuf,
    /// Where it now lives under the store root
    pub dest: PathBuf,
}

/// Filesystem-backed artifact store
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Destination path for one output file
    ///
    /// Pure function of the coordinates, so the layout is reproducible
    /// across runs and machines.
    pub fn output_path(
        &self,
        binding: &str,
        stage: &str,
        output: &str,
        index: Option<usize>,
        source: &Path,
    ) -> PathBuf {
        let ext = source
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();
        let file = match index {
            Some(i) => format!("{}_{}{}", output, i, ext),
            None => format!("{}{}", output, ext),
        };
        self.root.join(binding).join(stage).join(file)
    }

    /// Publish every file-bearing output of a completed stage
    ///
    /// List outputs get index-suffixed names in list order. Re-publishing
    /// overwrites in place, so retries converge on the same layout. Text
    /// values carry no files and are skipped.
    pub async fn publish(
        &self,
        binding: &str,
        stage: &str,
        outputs: &BTreeMap<String, Value>,
    ) -> StrucflowResult<Vec<ArtifactRecord>> {
        let stage_dir = self.root.join(binding).join(stage);
        tokio::fs::create_dir_all(&stage_dir).await?;

        let mut records = Vec::new();
        for (output, value) in outputs {
            match value {
                Value::Path(source) => {
                    records.push(
                        self.copy_one(binding, stage, output, None, source)
                            .await?,
                    );
                }
                Value::List(_) => {
                    for (i, source) in value.files().iter().enumerate() {
                        records.push(
                            self.copy_one(binding, stage, output, Some(i), source)
                                .await?,
                        );
                    }
                }
                Value::Text(_) => {}
            }
        }

        let manifest = stage_dir.join("manifest.json");
        let body = serde_json::to_string_pretty(&records)?;
        tokio::fs::write(&manifest, body).await?;

        Ok(records)
    }

    async fn copy_one(
        &self,
        binding: &str,
        stage: &str,
        output: &str,
        index: Option<usize>,
        source: &Path,
    ) -> StrucflowResult<ArtifactRecord> {
        let dest = self.output_path(binding, stage, output, index, source);
        tokio::fs::copy(source, &dest).await.map_err(|e| {
            StrucflowError::Store {
                message: format!(
                    "failed to publish '{}' to '{}': {}",
                    source.display(),
                    dest.display(),
                    e
                ),
            }
        })?;

        Ok(ArtifactRecord {
            output: output.to_string(),
            index,
            source: source.to_path_buf(),
            dest,
        })
    }

    /// Load the manifest for one published stage, if present
    pub async fn manifest(
        &self,
        binding: &str,
        stage: &str,
    ) -> StrucflowResult<Option<Vec<ArtifactRecord>>> {
        let path = self.root.join(binding).join(stage).join("manifest.json");
        if !path.exists() {
            return Ok(None);
        }
        let body = tokio::fs::read_to_string(&path).await?;
        Ok(Some(serde_json::from_str(&body)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn outputs(dir: &Path) -> BTreeMap<String, Value> {
        let template = dir.join("Template_final.nii");
        let f0 = dir.join("u_rc1_sub-01.nii");
        let f1 = dir.join("u_rc1_sub-02.nii");
        for f in [&template, &f0, &f1] {
            std::fs::write(f, f.display().to_string()).unwrap();
        }
        [
            ("template".to_string(), Value::Path(template)),
            ("flow_fields".to_string(), Value::paths(vec![f0, f1])),
            ("note".to_string(), Value::Text("k=64".into())),
        ]
        .into()
    }

    #[tokio::test]
    async fn test_publish_layout() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path().join("derivatives"));

        let records = store
            .publish("group", "template", &outputs(dir.path()))
            .await
            .unwrap();

        // Text outputs carry no files
        assert_eq!(records.len(), 3);
        let root = dir.path().join("derivatives");
        assert!(root.join("group/template/template.nii").exists());
        assert!(root.join("group/template/flow_fields_0.nii").exists());
        assert!(root.join("group/template/flow_fields_1.nii").exists());
        assert!(root.join("group/template/manifest.json").exists());
    }

    #[tokio::test]
    async fn test_list_outputs_keep_list_order() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path().join("derivatives"));

        store
            .publish("group", "template", &outputs(dir.path()))
            .await
            .unwrap();

        let dest = dir.path().join("derivatives/group/template/flow_fields_1.nii");
        let body = std::fs::read_to_string(dest).unwrap();
        assert!(body.ends_with("u_rc1_sub-02.nii"));
    }

    #[tokio::test]
    async fn test_republish_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path().join("derivatives"));
        let outs = outputs(dir.path());

        let first = store.publish("sub-01", "segment", &outs).await.unwrap();
        let second = store.publish("sub-01", "segment", &outs).await.unwrap();

        assert_eq!(first.len(), second.len());
        for (a, b) in first.iter().zip(&second) {
            assert_eq!(a.dest, b.dest);
        }
    }

    #[tokio::test]
    async fn test_missing_source_is_store_error() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path().join("derivatives"));
        let outs: BTreeMap<String, Value> = [(
            "map".to_string(),
            Value::Path(dir.path().join("nope.nii")),
        )]
        .into();

        let result = store.publish("sub-01", "segment", &outs).await;
        assert!(matches!(result, Err(StrucflowError::Store { .. })));
    }

    #[tokio::test]
    async fn test_manifest_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path().join("derivatives"));

        store
            .publish("group", "template", &outputs(dir.path()))
            .await
            .unwrap();

        let manifest = store.manifest("group", "template").await.unwrap().unwrap();
        assert_eq!(manifest.len(), 3);
        assert!(store.manifest("group", "segment").await.unwrap().is_none());
    }
}
