// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 strucflow contributors

//! Run configuration and the shipped structural pipeline
//!
//! A `RunConfig` is loaded from a YAML file and fully describes one run:
//! where the raw data lives, which subjects to iterate over, the tool
//! names and parameters, and where results land. `structural_pipeline`
//! wires the shipped segment → gather → template protocol from it.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::aggregate::FieldTranspose;
use crate::errors::{StrucflowError, StrucflowResult};
use crate::graph::{GraphBuilder, PipelineGraph, StageSpec};
use crate::ops::{DartelParams, DartelTemplateOp, NewSegmentOp, SegmentParams};
use crate::params::{ParameterBinding, ParameterSource};
use crate::resolve::AmbiguityPolicy;

/// Default config file name, looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = ".strucflow.yaml";

fn default_anat_template() -> String {
    "{subject_id}/ses-spespk/anat/{subject_id}_acq-T1w.nii".to_string()
}

fn default_concurrency() -> usize {
    1
}

/// External tool names or paths
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    #[serde(default = "default_segment_tool")]
    pub segment: String,
    #[serde(default = "default_dartel_tool")]
    pub dartel: String,
}

fn default_segment_tool() -> String {
    "newsegment".to_string()
}

fn default_dartel_tool() -> String {
    "dartel".to_string()
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            segment: default_segment_tool(),
            dartel: default_dartel_tool(),
        }
    }
}

/// One run, as described by the YAML config file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Base directory the input path templates resolve against
    pub data_dir: PathBuf,

    /// Artifact store root
    pub output_dir: PathBuf,

    /// Scratch directory for tool workspaces
    ///
    /// Defaults to `<output_dir>/.strucflow/work`.
    #[serde(default)]
    pub work_dir: Option<PathBuf>,

    /// Subject ids the pipeline is replicated over
    pub subjects: Vec<String>,

    /// What to do when an input template matches several files
    #[serde(default)]
    pub ambiguity: AmbiguityPolicy,

    /// Template locating each subject's structural image
    #[serde(default = "default_anat_template")]
    pub anat_template: String,

    #[serde(default)]
    pub tools: ToolsConfig,

    /// Segmentation parameters (the tissue probability map is required)
    pub segment: SegmentParams,

    #[serde(default)]
    pub dartel: DartelParams,

    /// Maximum concurrent external tool invocations
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl RunConfig {
    /// Load a config file
    pub fn load(path: &Path) -> StrucflowResult<Self> {
        let body = std::fs::read_to_string(path).map_err(|e| StrucflowError::Configuration {
            reason: format!("cannot read config file '{}': {}", path.display(), e),
            help: Some(format!(
                "Create {} or pass --config <path>",
                DEFAULT_CONFIG_FILE
            )),
        })?;
        let config: Self = serde_yaml::from_str(&body)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> StrucflowResult<()> {
        if self.subjects.is_empty() {
            return Err(StrucflowError::Configuration {
                reason: "no subjects configured".to_string(),
                help: Some("List at least one subject id under 'subjects'".into()),
            });
        }
        if self.concurrency == 0 {
            return Err(StrucflowError::configuration(
                "concurrency must be at least 1",
            ));
        }
        Ok(())
    }

    /// Scratch directory for tool workspaces
    pub fn work_dir(&self) -> PathBuf {
        self.work_dir
            .clone()
            .unwrap_or_else(|| self.output_dir.join(".strucflow").join("work"))
    }

    /// One binding per configured subject
    pub fn bindings(&self) -> StrucflowResult<Vec<ParameterBinding>> {
        ParameterSource::single("subject_id", &self.subjects)
    }
}

/// Wire the shipped structural pipeline from a config
///
/// Three stages: per-subject segmentation mapped over each subject's
/// structural images, a shared transpose gathering the import-space
/// tissue maps into one grey and one white list, and a single group
/// template build. Segmentation and template outputs are published.
pub fn structural_pipeline(config: &RunConfig) -> StrucflowResult<PipelineGraph> {
    let segment = NewSegmentOp::new(&config.tools.segment, config.segment.clone());
    let dartel = DartelTemplateOp::new(&config.tools.dartel, config.dartel.clone());

    GraphBuilder::new()
        .stage(
            StageSpec::map("segment", Arc::new(segment))
                .template("image", &config.anat_template)
                .publish(),
        )
        .stage(StageSpec::aggregator(
            "gather",
            Arc::new(FieldTranspose::new(["grey_matter", "white_matter"])),
        ))
        .stage(StageSpec::plain("template", Arc::new(dartel)).shared().publish())
        .join("segment", "import_maps", "gather", "records")
        .connect("gather", "grey_matter", "template", "grey_matter")
        .connect("gather", "white_matter", "template", "white_matter")
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
data_dir: /data/bids
output_dir: /data/derivatives
subjects: [sub-01, sub-02]
segment:
  tpm: /opt/spm/TPM.nii
"#;

    #[test]
    fn test_minimal_config_fills_defaults() {
        let config: RunConfig = serde_yaml::from_str(MINIMAL).unwrap();

        assert_eq!(config.subjects, vec!["sub-01", "sub-02"]);
        assert_eq!(config.ambiguity, AmbiguityPolicy::Strict);
        assert_eq!(
            config.anat_template,
            "{subject_id}/ses-spespk/anat/{subject_id}_acq-T1w.nii"
        );
        assert_eq!(config.tools.segment, "newsegment");
        assert_eq!(config.concurrency, 1);
        assert_eq!(config.segment.tissue_classes, 6);
        assert_eq!(config.segment.channel_bias_reg, 0.0001);
        assert_eq!(config.dartel.iterations.len(), 6);
        assert_eq!(
            config.work_dir(),
            PathBuf::from("/data/derivatives/.strucflow/work")
        );
    }

    #[test]
    fn test_bindings_follow_subject_order() {
        let config: RunConfig = serde_yaml::from_str(MINIMAL).unwrap();
        let bindings = config.bindings().unwrap();

        let ids: Vec<_> = bindings.iter().map(|b| b.id()).collect();
        assert_eq!(ids, vec!["sub-01", "sub-02"]);
    }

    #[test]
    fn test_empty_subjects_rejected() {
        let config: RunConfig =
            serde_yaml::from_str(&MINIMAL.replace("[sub-01, sub-02]", "[]")).unwrap();
        assert!(matches!(
            config.validate(),
            Err(StrucflowError::Configuration { .. })
        ));
    }

    #[test]
    fn test_structural_pipeline_shape() {
        let config: RunConfig = serde_yaml::from_str(MINIMAL).unwrap();
        let graph = structural_pipeline(&config).unwrap();

        let order: Vec<_> = graph.topological_order().map(|s| s.name.as_str()).collect();
        assert_eq!(order, vec!["segment", "gather", "template"]);

        let segment = graph.stage("segment").unwrap();
        assert!(segment.publish);
        assert_eq!(
            segment.templates.get("image").unwrap(),
            "{subject_id}/ses-spespk/anat/{subject_id}_acq-T1w.nii"
        );
    }

    #[test]
    fn test_config_round_trip() {
        let config: RunConfig = serde_yaml::from_str(MINIMAL).unwrap();
        let yaml = serde_yaml::to_string(&config).unwrap();
        let reparsed: RunConfig = serde_yaml::from_str(&yaml).unwrap();

        assert_eq!(reparsed.subjects, config.subjects);
        assert_eq!(reparsed.anat_template, config.anat_template);
    }
}
