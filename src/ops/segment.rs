// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 strucflow contributors

//! Tissue segmentation boundary
//!
//! Wraps the external segmentation tool: one structural image in,
//! per-tissue-class probability maps out. The wrapper contract: the tool
//! writes `c<k>_*.nii` per tissue class into the output directory, and
//! `rc<k>_*.nii` import-space maps for the classes flagged for template
//! building.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::command::{collect_glob, locate_program, run_tool};
use super::{ExternalOperation, Inputs, InvocationContext, Outputs};
use crate::errors::{StrucflowError, StrucflowResult};
use crate::value::Value;

/// Tuning parameters for the segmentation tool
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentParams {
    /// Tissue probability map the tool segments against
    pub tpm: PathBuf,

    /// Channel bias regularisation
    #[serde(default = "default_bias_reg")]
    pub channel_bias_reg: f64,

    /// Channel bias FWHM in mm
    #[serde(default = "default_bias_fwhm")]
    pub channel_bias_fwhm: f64,

    /// Number of tissue classes
    #[serde(default = "default_tissue_classes")]
    pub tissue_classes: usize,

    /// Gaussians per tissue class
    #[serde(default = "default_gaussians")]
    pub gaussians_per_class: usize,

    /// Leading classes (grey, white, ...) that also export import-space
    /// maps for template building
    #[serde(default = "default_import_classes")]
    pub import_classes: usize,

    /// Write (inverse, forward) deformation fields
    #[serde(default)]
    pub write_deformation_fields: (bool, bool),
}

fn default_bias_reg() -> f64 {
    0.0001
}

fn default_bias_fwhm() -> f64 {
    60.0
}

fn default_tissue_classes() -> usize {
    6
}

fn default_gaussians() -> usize {
    2
}

fn default_import_classes() -> usize {
    2
}

impl SegmentParams {
    pub fn new(tpm: PathBuf) -> Self {
        Self {
            tpm,
            channel_bias_reg: default_bias_reg(),
            channel_bias_fwhm: default_bias_fwhm(),
            tissue_classes: default_tissue_classes(),
            gaussians_per_class: default_gaussians(),
            import_classes: default_import_classes(),
            write_deformation_fields: (false, false),
        }
    }
}

/// Segmentation operation
///
/// Outputs:
/// - `tissue_maps`: one probability map per tissue class, class order
/// - `import_maps`: a record of per-class import-space map lists for the
///   first `import_classes` classes (the fan-in transpose consumes this)
pub struct NewSegmentOp {
    program: String,
    params: SegmentParams,
}

impl NewSegmentOp {
    pub fn new(program: &str, params: SegmentParams) -> Self {
        Self {
            program: program.to_string(),
            params,
        }
    }

    fn argv(&self, image: &Value, workspace: &str) -> StrucflowResult<Vec<String>> {
        let image = image.as_path().ok_or_else(|| {
            StrucflowError::configuration("segmentation input 'image' must be a single path")
        })?;

        let mut argv = vec![
            image.display().to_string(),
            "--tpm".into(),
            self.params.tpm.display().to_string(),
            "--bias-reg".into(),
            format!("{}", self.params.channel_bias_reg),
            "--bias-fwhm".into(),
            format!("{}", self.params.channel_bias_fwhm),
            "--classes".into(),
            self.params.tissue_classes.to_string(),
            "--gaussians".into(),
            self.params.gaussians_per_class.to_string(),
            "--import-classes".into(),
            self.params.import_classes.to_string(),
        ];

        if self.params.write_deformation_fields.0 {
            argv.push("--write-inverse".into());
        }
        if self.params.write_deformation_fields.1 {
            argv.push("--write-forward".into());
        }

        argv.push("--out".into());
        argv.push(workspace.to_string());

        Ok(argv)
    }
}

#[async_trait]
impl ExternalOperation for NewSegmentOp {
    fn name(&self) -> &str {
        "newsegment"
    }

    fn inputs(&self) -> Vec<String> {
        vec!["image".to_string()]
    }

    fn outputs(&self) -> Vec<String> {
        vec!["tissue_maps".to_string(), "import_maps".to_string()]
    }

    fn fingerprint(&self) -> serde_json::Value {
        serde_json::json!({
            "program": self.program,
            "params": self.params,
        })
    }

    async fn invoke(&self, ctx: &InvocationContext, inputs: &Inputs) -> StrucflowResult<Outputs> {
        let image = inputs.get("image").ok_or_else(|| {
            StrucflowError::stage_execution(&ctx.stage, &ctx.binding, "missing input 'image'")
        })?;

        let argv = self.argv(image, &ctx.workspace.display().to_string())?;
        run_tool(self.name(), &self.program, &argv, ctx).await?;

        // Native-space probability maps, one per class
        let mut tissue_maps = Vec::with_capacity(self.params.tissue_classes);
        for class in 1..=self.params.tissue_classes {
            let maps = collect_glob(&ctx.workspace, &format!("c{}_*.nii", class))?;
            let map = maps.into_iter().next().ok_or_else(|| {
                StrucflowError::stage_execution(
                    &ctx.stage,
                    &ctx.binding,
                    format!("tool produced no probability map for tissue class {}", class),
                )
            })?;
            tissue_maps.push(Value::Path(map));
        }

        // Import-space maps for the classes feeding template creation
        let mut import_maps = Vec::with_capacity(self.params.import_classes);
        for class in 1..=self.params.import_classes {
            let maps = collect_glob(&ctx.workspace, &format!("rc{}_*.nii", class))?;
            if maps.is_empty() {
                return Err(StrucflowError::stage_execution(
                    &ctx.stage,
                    &ctx.binding,
                    format!("tool produced no import-space map for tissue class {}", class),
                ));
            }
            import_maps.push(Value::paths(maps));
        }

        Ok([
            ("tissue_maps".to_string(), Value::List(tissue_maps)),
            ("import_maps".to_string(), Value::List(import_maps)),
        ]
        .into())
    }

    async fn check_available(&self) -> StrucflowResult<bool> {
        Ok(locate_program(&self.program).is_ok())
    }
}
