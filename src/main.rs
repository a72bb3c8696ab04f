// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 strucflow contributors

//! strucflow - Structural Image Workflow Engine
//!
//! Replicates a pipeline of external imaging tools over a set of subjects.

use clap::Parser;
use miette::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use strucflow::cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "strucflow=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let cli = Cli::parse();

    // Change to specified directory if provided
    if let Some(ref dir) = cli.directory {
        std::env::set_current_dir(dir).map_err(|e| {
            miette::miette!("Failed to change to directory '{}': {}", dir.display(), e)
        })?;
    }

    // Dispatch to command handlers
    match cli.command {
        Commands::Run {
            config,
            root,
            concurrency,
            no_cache,
            dry_run,
            keep_going,
        } => {
            let args = strucflow::cli::run::RunArgs {
                root,
                concurrency,
                no_cache,
                dry_run,
                keep_going,
            };
            strucflow::cli::run::run(config, args, cli.verbose).await
        }
        Commands::Validate { config } => strucflow::cli::validate::run(config, cli.verbose).await,
        Commands::Graph { config, format } => {
            strucflow::cli::graph::run(config, format, cli.verbose).await
        }
        Commands::Cache { action, config } => {
            strucflow::cli::cache::run(action, config, cli.verbose).await
        }
    }
}
