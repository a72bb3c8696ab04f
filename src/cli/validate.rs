// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 strucflow contributors

//! Validate command - check the config and pipeline wiring

use colored::Colorize;
use miette::Result;
use std::path::PathBuf;

use crate::config::{structural_pipeline, RunConfig};
use crate::graph::DagBuilder;

/// Validate the configuration
pub async fn run(config_path: PathBuf, verbose: bool) -> Result<()> {
    let config = RunConfig::load(&config_path)?;

    // Building the graph runs the full wiring validation
    let graph = structural_pipeline(&config)?;
    let bindings = config.bindings()?;

    println!(
        "{} {} is valid: {} stage(s), {} subject(s)",
        "✓".green(),
        config_path.display(),
        graph.stages().len(),
        bindings.len()
    );

    for stage in graph.topological_order() {
        if let Some(op) = &stage.operation {
            if !op.check_available().await? {
                println!(
                    "  {} tool '{}' for stage '{}' is not installed",
                    "⚠".yellow(),
                    stage.tool_name(),
                    stage.name
                );
            }
        }
    }

    if verbose {
        let dag = DagBuilder::of(&graph)?;
        println!();
        print!("{}", dag.to_text(&graph)?);
    }

    Ok(())
}
