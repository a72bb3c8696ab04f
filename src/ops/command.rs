// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 strucflow contributors

//! Generic command-line operation
//!
//! Runs one external executable with templated arguments and collects
//! declared outputs from the invocation workspace by glob pattern.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tokio::process::Command;

use super::{ExternalOperation, Inputs, InvocationContext, Outputs};
use crate::errors::{StrucflowError, StrucflowResult};
use crate::value::Value;

/// How many files an output pattern must match
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputArity {
    /// Exactly one file
    One,
    /// One or more files, collected sorted
    Many,
}

/// One declared output, collected from the workspace after the tool exits
#[derive(Debug, Clone)]
pub struct OutputSpec {
    pub name: String,
    /// Glob pattern relative to the invocation workspace
    pub pattern: String,
    pub arity: OutputArity,
}

/// An external operation backed by a single command-line tool
///
/// Argument templates support `{workspace}` and `{input:<name>}`; an
/// argument that is exactly `{input:<name>}` expands to one argv entry per
/// referenced file, in value order.
pub struct CommandOperation {
    name: String,
    program: String,
    args: Vec<String>,
    inputs: Vec<String>,
    outputs: Vec<OutputSpec>,
    params: serde_json::Value,
}

impl CommandOperation {
    pub fn new(name: &str, program: &str) -> Self {
        Self {
            name: name.to_string(),
            program: program.to_string(),
            args: Vec::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            params: serde_json::Value::Null,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I: IntoIterator<Item = S>, S: Into<String>>(mut self, args: I) -> Self {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn input(mut self, name: &str) -> Self {
        self.inputs.push(name.to_string());
        self
    }

    pub fn output_one(mut self, name: &str, pattern: &str) -> Self {
        self.outputs.push(OutputSpec {
            name: name.to_string(),
            pattern: pattern.to_string(),
            arity: OutputArity::One,
        });
        self
    }

    pub fn output_many(mut self, name: &str, pattern: &str) -> Self {
        self.outputs.push(OutputSpec {
            name: name.to_string(),
            pattern: pattern.to_string(),
            arity: OutputArity::Many,
        });
        self
    }

    /// Attach tool parameters for the cache fingerprint
    pub fn params(mut self, params: serde_json::Value) -> Self {
        self.params = params;
        self
    }

    fn expand_args(&self, ctx: &InvocationContext, inputs: &Inputs) -> StrucflowResult<Vec<String>> {
        let workspace = ctx.workspace.display().to_string();
        let mut argv = Vec::new();

        for arg in &self.args {
            if let Some(name) = arg
                .strip_prefix("{input:")
                .and_then(|s| s.strip_suffix('}'))
            {
                let value = inputs.get(name).ok_or_else(|| {
                    StrucflowError::stage_execution(
                        &ctx.stage,
                        &ctx.binding,
                        format!("missing declared input '{}'", name),
                    )
                })?;
                match value {
                    Value::Text(t) => argv.push(t.clone()),
                    other => {
                        for file in other.files() {
                            argv.push(file.display().to_string());
                        }
                    }
                }
            } else {
                argv.push(arg.replace("{workspace}", &workspace));
            }
        }

        Ok(argv)
    }
}

#[async_trait]
impl ExternalOperation for CommandOperation {
    fn name(&self) -> &str {
        &self.name
    }

    fn inputs(&self) -> Vec<String> {
        self.inputs.clone()
    }

    fn outputs(&self) -> Vec<String> {
        self.outputs.iter().map(|o| o.name.clone()).collect()
    }

    fn fingerprint(&self) -> serde_json::Value {
        serde_json::json!({
            "program": self.program,
            "args": self.args,
            "params": self.params,
        })
    }

    async fn invoke(&self, ctx: &InvocationContext, inputs: &Inputs) -> StrucflowResult<Outputs> {
        let argv = self.expand_args(ctx, inputs)?;
        run_tool(&self.name, &self.program, &argv, ctx).await?;

        let mut outputs = Outputs::new();
        for spec in &self.outputs {
            outputs.insert(
                spec.name.clone(),
                collect_output(&ctx.workspace, spec, &ctx.stage, &ctx.binding)?,
            );
        }

        Ok(outputs)
    }

    async fn check_available(&self) -> StrucflowResult<bool> {
        Ok(locate_program(&self.program).is_ok())
    }
}

/// Locate a program: explicit paths are used as-is, bare names go via PATH
pub(crate) fn locate_program(program: &str) -> StrucflowResult<PathBuf> {
    let as_path = Path::new(program);
    if as_path.components().count() > 1 {
        if as_path.exists() {
            return Ok(as_path.to_path_buf());
        }
        return Err(StrucflowError::tool_not_found(program));
    }

    which::which(program).map_err(|_| StrucflowError::tool_not_found(program))
}

/// Run an external tool and fail on non-zero exit
pub(crate) async fn run_tool(
    tool: &str,
    program: &str,
    argv: &[String],
    ctx: &InvocationContext,
) -> StrucflowResult<std::process::Output> {
    let program = locate_program(program)?;
    let start = Instant::now();

    tracing::debug!(
        tool,
        stage = %ctx.stage,
        binding = %ctx.binding,
        program = %program.display(),
        args = argv.len(),
        "invoking external tool"
    );

    let output = Command::new(&program)
        .args(argv)
        .current_dir(&ctx.workspace)
        .output()
        .await
        .map_err(|e| {
            StrucflowError::stage_execution(
                &ctx.stage,
                &ctx.binding,
                format!("failed to spawn '{}': {}", program.display(), e),
            )
        })?;

    let elapsed = start.elapsed();

    if !output.status.success() {
        let exit_code = output.status.code().unwrap_or(-1);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let tail: Vec<&str> = stderr.lines().rev().take(5).collect();
        let tail: Vec<&str> = tail.into_iter().rev().collect();

        return Err(StrucflowError::StageExecution {
            stage: ctx.stage.clone(),
            binding: ctx.binding.clone(),
            message: format!("'{}' exited with code {}", tool, exit_code),
            help: if tail.is_empty() {
                None
            } else {
                Some(tail.join("\n"))
            },
        });
    }

    tracing::info!(
        tool,
        stage = %ctx.stage,
        binding = %ctx.binding,
        elapsed_s = elapsed.as_secs_f64(),
        "external tool finished"
    );

    Ok(output)
}

/// Collect one declared output from the workspace
pub(crate) fn collect_output(
    workspace: &Path,
    spec: &OutputSpec,
    stage: &str,
    binding: &str,
) -> StrucflowResult<Value> {
    let matches = collect_glob(workspace, &spec.pattern)?;

    match spec.arity {
        OutputArity::One => {
            if matches.len() != 1 {
                return Err(StrucflowError::stage_execution(
                    stage,
                    binding,
                    format!(
                        "expected exactly one file for output '{}' ({}), found {}",
                        spec.name,
                        spec.pattern,
                        matches.len()
                    ),
                ));
            }
            Ok(Value::Path(matches.into_iter().next().ok_or_else(|| {
                StrucflowError::stage_execution(stage, binding, "output vanished")
            })?))
        }
        OutputArity::Many => {
            if matches.is_empty() {
                return Err(StrucflowError::stage_execution(
                    stage,
                    binding,
                    format!(
                        "tool produced no files for output '{}' ({})",
                        spec.name, spec.pattern
                    ),
                ));
            }
            Ok(Value::paths(matches))
        }
    }
}

/// Glob within a workspace, sorted for deterministic ordering
pub(crate) fn collect_glob(workspace: &Path, pattern: &str) -> StrucflowResult<Vec<PathBuf>> {
    let full = workspace.join(pattern).to_string_lossy().to_string();
    let mut matches: Vec<PathBuf> = glob::glob(&full)?.filter_map(Result::ok).collect();
    matches.sort();
    Ok(matches)
}
