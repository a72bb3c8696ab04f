// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 strucflow contributors

//! Error types for the workflow engine
//!
//! Per-binding errors (resolution, stage execution) are isolated and
//! reported per binding; a cross-binding join failure is fatal to the run.

use miette::Diagnostic;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for strucflow operations
pub type StrucflowResult<T> = Result<T, StrucflowError>;

/// Main error type for strucflow
#[derive(Error, Debug, Diagnostic)]
pub enum StrucflowError {
    // ─────────────────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Invalid configuration: {reason}")]
    #[diagnostic(code(strucflow::configuration))]
    Configuration {
        reason: String,
        #[help]
        help: Option<String>,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // Resolution Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("No file matches template '{template}' for binding '{binding}'")]
    #[diagnostic(
        code(strucflow::resolution),
        help("Check that the input files exist under the configured data directory")
    )]
    Resolution { template: String, binding: String },

    #[error(
        "Template '{template}' matches {} files for binding '{binding}'",
        candidates.len()
    )]
    #[diagnostic(
        code(strucflow::ambiguous_resolution),
        help("Narrow the template, or set the ambiguity policy to 'first' to pick the lexicographically smallest match")
    )]
    AmbiguousResolution {
        template: String,
        binding: String,
        candidates: Vec<PathBuf>,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // Graph Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Circular dependency detected")]
    #[diagnostic(
        code(strucflow::circular_dependency),
        help("Review the stage connections to remove the cycle")
    )]
    CircularDependency { stages: Vec<String> },

    #[error("Unknown stage '{stage}'")]
    #[diagnostic(code(strucflow::unknown_stage))]
    UnknownStage { stage: String },

    #[error("Invalid edge {from} -> {to}: {reason}")]
    #[diagnostic(code(strucflow::invalid_edge))]
    InvalidEdge {
        from: String,
        to: String,
        reason: String,
    },

    #[error("Stage '{stage}' is invalid: {reason}")]
    #[diagnostic(code(strucflow::invalid_stage))]
    InvalidStage { stage: String, reason: String },

    // ─────────────────────────────────────────────────────────────────────────
    // Execution Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Stage '{stage}' failed for binding '{binding}': {message}")]
    #[diagnostic(code(strucflow::stage_execution))]
    StageExecution {
        stage: String,
        binding: String,
        message: String,
        #[help]
        help: Option<String>,
    },

    #[error(
        "Stage '{stage}' failed for binding '{binding}' on {} of {total} elements (indices {failed:?}): {first_error}",
        failed.len()
    )]
    #[diagnostic(code(strucflow::map_execution))]
    MapExecution {
        stage: String,
        binding: String,
        failed: Vec<usize>,
        total: usize,
        first_error: String,
    },

    #[error("Aggregation failed in stage '{stage}': {reason}")]
    #[diagnostic(code(strucflow::aggregation))]
    Aggregation { stage: String, reason: String },

    #[error(
        "Join stage '{stage}' is missing contributions from {} binding(s): {}",
        missing.len(),
        missing.join(", ")
    )]
    #[diagnostic(
        code(strucflow::join),
        help("A cross-binding join requires output from every binding; fix the listed bindings and re-run")
    )]
    Join { stage: String, missing: Vec<String> },

    // ─────────────────────────────────────────────────────────────────────────
    // Tool Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Tool '{tool}' not found")]
    #[diagnostic(code(strucflow::tool_not_found), help("{suggestion}"))]
    ToolNotFound { tool: String, suggestion: String },

    // ─────────────────────────────────────────────────────────────────────────
    // Cache / Store Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Cache error: {message}")]
    #[diagnostic(code(strucflow::cache_error))]
    Cache { message: String },

    #[error("Artifact store error: {message}")]
    #[diagnostic(code(strucflow::store_error))]
    Store { message: String },

    // ─────────────────────────────────────────────────────────────────────────
    // IO/System Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("IO error: {message}")]
    #[diagnostic(code(strucflow::io_error))]
    Io { message: String },

    #[error("Failed to read file '{path}': {error}")]
    #[diagnostic(code(strucflow::file_read_error))]
    FileReadError { path: PathBuf, error: String },

    #[error("YAML parsing error: {message}")]
    #[diagnostic(code(strucflow::yaml_error))]
    Yaml { message: String },

    #[error("JSON parsing error: {message}")]
    #[diagnostic(code(strucflow::json_error))]
    Json { message: String },

    #[error("Glob pattern error: {message}")]
    #[diagnostic(code(strucflow::glob_error))]
    GlobPattern { message: String },
}

impl From<std::io::Error> for StrucflowError {
    fn from(e: std::io::Error) -> Self {
        Self::Io {
            message: e.to_string(),
        }
    }
}

impl From<serde_yaml::Error> for StrucflowError {
    fn from(e: serde_yaml::Error) -> Self {
        Self::Yaml {
            message: e.to_string(),
        }
    }
}

impl From<serde_json::Error> for StrucflowError {
    fn from(e: serde_json::Error) -> Self {
        Self::Json {
            message: e.to_string(),
        }
    }
}

impl From<glob::PatternError> for StrucflowError {
    fn from(e: glob::PatternError) -> Self {
        Self::GlobPattern {
            message: e.to_string(),
        }
    }
}

impl StrucflowError {
    /// Create a configuration error without a help message
    pub fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration {
            reason: reason.into(),
            help: None,
        }
    }

    /// Create a tool not found error with an installation suggestion
    pub fn tool_not_found(tool: &str) -> Self {
        Self::ToolNotFound {
            tool: tool.to_string(),
            suggestion: format!("Install {} and ensure it's in your PATH", tool),
        }
    }

    /// Create a stage execution error without a help message
    pub fn stage_execution(stage: &str, binding: &str, message: impl Into<String>) -> Self {
        Self::StageExecution {
            stage: stage.to_string(),
            binding: binding.to_string(),
            message: message.into(),
            help: None,
        }
    }
}
