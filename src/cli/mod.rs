// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 strucflow contributors

//! CLI command definitions and handlers
//!
//! Defines the command-line interface for strucflow.

pub mod cache;
pub mod graph;
pub mod run;
pub mod validate;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Structural image workflow engine
///
/// Replicates a pipeline of external imaging tools over a set of subjects,
/// with content-addressed caching and per-subject failure isolation.
#[derive(Parser, Debug)]
#[clap(
    name = "strucflow",
    version,
    about = "Workflow engine for per-subject structural image processing",
    long_about = None,
    after_help = "Examples:\n\
        strucflow validate              Check the config and pipeline wiring\n\
        strucflow run                   Process all configured subjects\n\
        strucflow run --dry-run         Show the expanded plan\n\
        strucflow graph --format dot    Render the pipeline graph\n\n\
        See 'strucflow <command> --help' for more information on a specific command."
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,

    /// Enable verbose output
    #[clap(short, long, global = true)]
    pub verbose: bool,

    /// Change to directory before executing
    #[clap(short = 'C', long, global = true, value_name = "DIR")]
    pub directory: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the pipeline over all configured subjects
    Run {
        /// Config file
        #[clap(short, long, default_value = crate::config::DEFAULT_CONFIG_FILE)]
        config: PathBuf,

        /// Override the output root from the config
        #[clap(long, value_name = "DIR")]
        root: Option<PathBuf>,

        /// Override the tool concurrency limit from the config
        #[clap(long)]
        concurrency: Option<usize>,

        /// Skip cache (force re-execution)
        #[clap(long)]
        no_cache: bool,

        /// Dry run (show the expanded plan without invoking any tool)
        #[clap(long)]
        dry_run: bool,

        /// Continue a subject when some of its mapped input files fail
        #[clap(long)]
        keep_going: bool,
    },

    /// Validate the config file and pipeline wiring
    Validate {
        /// Config file to validate
        #[clap(default_value = crate::config::DEFAULT_CONFIG_FILE)]
        config: PathBuf,
    },

    /// Show the pipeline as a graph
    Graph {
        /// Config file
        #[clap(default_value = crate::config::DEFAULT_CONFIG_FILE)]
        config: PathBuf,

        /// Output format
        #[clap(short, long, default_value = "text", value_parser = ["text", "dot", "mermaid"])]
        format: String,
    },

    /// Cache management
    Cache {
        #[clap(subcommand)]
        action: CacheAction,

        /// Config file (locates the cache under the output directory)
        #[clap(short, long, global = true, default_value = crate::config::DEFAULT_CONFIG_FILE)]
        config: PathBuf,
    },
}

/// Cache management actions
#[derive(Subcommand, Debug, Clone)]
pub enum CacheAction {
    /// Show cache statistics
    Stats,

    /// Clear all cached results
    Clear {
        /// Skip confirmation
        #[clap(short, long)]
        yes: bool,
    },

    /// List cached entries
    List,
}
