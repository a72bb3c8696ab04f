// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 strucflow contributors

//! # strucflow - Structural Image Workflow Engine
//!
//! `strucflow` replicates a pipeline of external imaging tools over a set
//! of subjects, from raw structural scans to a shared group template.
//!
//! ## Features
//!
//! - **Parameter expansion** - One pipeline template, replicated per subject
//! - **Map fan-out** - Stages replicate over each subject's input files
//! - **Fan-in joins** - Gather per-subject results into group stages
//! - **Content-addressed caching** - Only re-run what changed
//! - **Failure isolation** - One bad subject never sinks the others
//!
//! ## Quick Start
//!
//! ```bash
//! # Check the config and pipeline wiring
//! strucflow validate
//!
//! # Process all configured subjects
//! strucflow run
//!
//! # Inspect the pipeline graph
//! strucflow graph --format mermaid
//! ```

pub mod aggregate;
pub mod cache;
pub mod cli;
pub mod config;
pub mod errors;
pub mod exec;
pub mod graph;
pub mod ops;
pub mod params;
pub mod resolve;
pub mod store;
pub mod value;

// Re-export commonly used types
pub use errors::{StrucflowError, StrucflowResult};
pub use exec::{RunOptions, RunReport, Scheduler};
pub use graph::{GraphBuilder, PipelineGraph, StageSpec};
pub use value::Value;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
