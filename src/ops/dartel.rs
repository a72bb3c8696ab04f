// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 strucflow contributors

//! Iterative group-template boundary
//!
//! Wraps the external template-building tool: grey- and white-matter map
//! lists across all subjects in, one deformation (flow) field per subject
//! plus one group template out. The wrapper contract: the tool writes
//! `u_<input stem>.nii` per grey-matter input and `<prefix>_final.nii`
//! into the output directory.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::command::{locate_program, run_tool};
use super::{ExternalOperation, Inputs, InvocationContext, Outputs};
use crate::errors::{StrucflowError, StrucflowResult};
use crate::value::Value;

/// One outer iteration of the template-building schedule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationStep {
    /// Inner iteration count
    pub inner_iterations: u32,
    /// Regularisation schedule (mu, lambda, id)
    pub reg_params: (f64, f64, f64),
    /// Time points K
    pub time_points: u32,
    /// Smoothing kernel FWHM in mm
    pub smoothing_fwhm: f64,
}

impl IterationStep {
    fn as_arg(&self) -> String {
        format!(
            "{}:{},{},{}:{}:{}",
            self.inner_iterations,
            self.reg_params.0,
            self.reg_params.1,
            self.reg_params.2,
            self.time_points,
            self.smoothing_fwhm
        )
    }
}

/// Parameters for the template-building tool
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DartelParams {
    /// Outer iteration schedule
    #[serde(default = "default_iterations")]
    pub iterations: Vec<IterationStep>,

    /// Prefix for template files written by the tool
    #[serde(default = "default_template_prefix")]
    pub template_prefix: String,
}

impl Default for DartelParams {
    fn default() -> Self {
        Self {
            iterations: default_iterations(),
            template_prefix: default_template_prefix(),
        }
    }
}

fn default_template_prefix() -> String {
    "Template".to_string()
}

/// The six-step schedule with the quadrupled regularisation parameter
/// (Ripolles et al., NeuroImage, 2012)
fn default_iterations() -> Vec<IterationStep> {
    let step = |inner, reg: (f64, f64, f64), k, fwhm| IterationStep {
        inner_iterations: inner,
        reg_params: reg,
        time_points: k,
        smoothing_fwhm: fwhm,
    };

    vec![
        step(3, (16.0, 2.0, 1e-6), 1, 16.0),
        step(3, (8.0, 1.0, 1e-6), 1, 8.0),
        step(3, (4.0, 0.5, 1e-6), 2, 4.0),
        step(3, (2.0, 0.25, 1e-6), 4, 2.0),
        step(3, (1.0, 0.125, 1e-6), 16, 1.0),
        step(3, (1.0, 0.125, 1e-6), 64, 0.5),
    ]
}

/// Group template creation operation
pub struct DartelTemplateOp {
    program: String,
    params: DartelParams,
}

impl DartelTemplateOp {
    pub fn new(program: &str, params: DartelParams) -> Self {
        Self {
            program: program.to_string(),
            params,
        }
    }
}

#[async_trait]
impl ExternalOperation for DartelTemplateOp {
    fn name(&self) -> &str {
        "dartel"
    }

    fn inputs(&self) -> Vec<String> {
        vec!["grey_matter".to_string(), "white_matter".to_string()]
    }

    fn outputs(&self) -> Vec<String> {
        vec!["flow_fields".to_string(), "template".to_string()]
    }

    fn fingerprint(&self) -> serde_json::Value {
        serde_json::json!({
            "program": self.program,
            "params": self.params,
        })
    }

    async fn invoke(&self, ctx: &InvocationContext, inputs: &Inputs) -> StrucflowResult<Outputs> {
        let grey: Vec<_> = inputs
            .get("grey_matter")
            .map(Value::files)
            .unwrap_or_default()
            .into_iter()
            .map(|p| p.to_path_buf())
            .collect();
        let white: Vec<_> = inputs
            .get("white_matter")
            .map(Value::files)
            .unwrap_or_default()
            .into_iter()
            .map(|p| p.to_path_buf())
            .collect();

        if grey.is_empty() {
            return Err(StrucflowError::stage_execution(
                &ctx.stage,
                &ctx.binding,
                "no grey-matter maps to build a template from",
            ));
        }
        if grey.len() != white.len() {
            return Err(StrucflowError::stage_execution(
                &ctx.stage,
                &ctx.binding,
                format!(
                    "grey/white matter map counts differ: {} vs {}",
                    grey.len(),
                    white.len()
                ),
            ));
        }

        let mut argv = Vec::new();
        for path in &grey {
            argv.push("--grey".to_string());
            argv.push(path.display().to_string());
        }
        for path in &white {
            argv.push("--white".to_string());
            argv.push(path.display().to_string());
        }
        for step in &self.params.iterations {
            argv.push("--iteration".to_string());
            argv.push(step.as_arg());
        }
        argv.push("--template-prefix".to_string());
        argv.push(self.params.template_prefix.clone());
        argv.push("--out".to_string());
        argv.push(ctx.workspace.display().to_string());

        run_tool(self.name(), &self.program, &argv, ctx).await?;

        // One flow field per subject, matched by input stem so output
        // order follows input order regardless of what the tool wrote last
        let mut flow_fields = Vec::with_capacity(grey.len());
        for path in &grey {
            let stem = path
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .ok_or_else(|| {
                    StrucflowError::stage_execution(
                        &ctx.stage,
                        &ctx.binding,
                        format!("grey-matter path has no file stem: {}", path.display()),
                    )
                })?;
            let flow = ctx.workspace.join(format!("u_{}.nii", stem));
            if !flow.exists() {
                return Err(StrucflowError::stage_execution(
                    &ctx.stage,
                    &ctx.binding,
                    format!("missing flow field for input '{}'", path.display()),
                ));
            }
            flow_fields.push(Value::Path(flow));
        }

        let template = ctx
            .workspace
            .join(format!("{}_final.nii", self.params.template_prefix));
        if !template.exists() {
            return Err(StrucflowError::stage_execution(
                &ctx.stage,
                &ctx.binding,
                "missing final group template",
            ));
        }

        Ok([
            ("flow_fields".to_string(), Value::List(flow_fields)),
            ("template".to_string(), Value::Path(template)),
        ]
        .into())
    }

    async fn check_available(&self) -> StrucflowResult<bool> {
        Ok(locate_program(&self.program).is_ok())
    }
}
