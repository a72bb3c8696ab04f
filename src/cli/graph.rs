// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 strucflow contributors

//! Graph command - render the pipeline template

use miette::Result;
use std::path::PathBuf;

use crate::config::{structural_pipeline, RunConfig};
use crate::graph::DagBuilder;

/// Show the pipeline as a graph
pub async fn run(config_path: PathBuf, format: String, _verbose: bool) -> Result<()> {
    let config = RunConfig::load(&config_path)?;
    let graph = structural_pipeline(&config)?;
    let dag = DagBuilder::of(&graph)?;

    match format.as_str() {
        "dot" => print!("{}", dag.to_dot()),
        "mermaid" => print!("{}", dag.to_mermaid()),
        _ => print!("{}", dag.to_text(&graph)?),
    }

    Ok(())
}
