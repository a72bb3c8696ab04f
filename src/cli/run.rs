// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 strucflow contributors

//! Run command - execute the pipeline

use colored::Colorize;
use miette::Result;
use std::path::PathBuf;
use std::sync::Arc;

use crate::cache::FilesystemCache;
use crate::config::{structural_pipeline, RunConfig};
use crate::exec::{RunOptions, Scheduler};
use crate::resolve::ArtifactResolver;
use crate::store::ArtifactStore;

/// Options collected from the `run` subcommand
#[derive(Debug, Clone, Default)]
pub struct RunArgs {
    pub root: Option<PathBuf>,
    pub concurrency: Option<usize>,
    pub no_cache: bool,
    pub dry_run: bool,
    pub keep_going: bool,
}

/// Run the pipeline
pub async fn run(config_path: PathBuf, args: RunArgs, verbose: bool) -> Result<()> {
    let mut config = RunConfig::load(&config_path)?;
    if let Some(root) = args.root {
        config.output_dir = root;
    }
    let dry_run = args.dry_run;
    let graph = structural_pipeline(&config)?;

    // Check required tools are available before touching anything
    let mut missing = Vec::new();
    if !dry_run {
        for stage in graph.topological_order() {
            if let Some(op) = &stage.operation {
                if !op.check_available().await? {
                    missing.push(stage.tool_name().to_string());
                }
            }
        }
    }
    if !missing.is_empty() {
        eprintln!("{}", "Missing required tools:".red().bold());
        for tool in &missing {
            eprintln!("  {} {}", "✗".red(), tool);
        }
        return Err(miette::miette!("Required tools are not installed"));
    }

    let bindings = config.bindings()?;
    let cache = FilesystemCache::default_cache(&config.output_dir)?;
    let resolver = ArtifactResolver::new(&config.data_dir, config.ambiguity);
    let store = ArtifactStore::new(&config.output_dir);

    let scheduler = Scheduler::new(
        graph,
        bindings,
        resolver,
        Arc::new(cache),
        store,
        config.work_dir(),
    );

    let options = RunOptions {
        concurrency: args.concurrency.unwrap_or(config.concurrency),
        no_cache: args.no_cache,
        dry_run,
        abort_on_map_failure: !args.keep_going,
        quiet: false,
    };

    let report = scheduler.run(&options).await?;

    if dry_run {
        return Ok(());
    }

    println!();
    if !report.failed.is_empty() {
        eprintln!("{}", "Failed subjects:".red().bold());
        for failure in &report.failed {
            eprintln!(
                "  {} {} (stage '{}'): {}",
                "✗".red(),
                failure.binding,
                failure.stage,
                failure.error
            );
        }
    }
    if let Some(fatal) = &report.fatal {
        eprintln!("{} {}", "✗".red().bold(), fatal);
    }

    println!(
        "{} {} of {} subject(s) complete, {} tool run(s), {} cache hit(s)",
        if report.success() {
            "✓".green().bold().to_string()
        } else {
            "✗".red().bold().to_string()
        },
        report.succeeded.len(),
        report.succeeded.len() + report.failed.len(),
        report.executed,
        report.cache_hits,
    );
    if verbose {
        println!("  Results: {}", config.output_dir.display());
    }
    println!("Total time: {:.1} mins", report.duration.as_secs_f64() / 60.0);

    if !report.success() {
        return Err(miette::miette!("Pipeline run failed"));
    }

    Ok(())
}
