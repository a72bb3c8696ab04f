// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 strucflow contributors

//! Cache command - manage cached stage results

use colored::Colorize;
use miette::Result;
use std::io::{self, Write};
use std::path::PathBuf;
use std::time::Duration;

use super::CacheAction;
use crate::cache::{Cache, FilesystemCache};
use crate::config::RunConfig;

/// Run the cache command
pub async fn run(action: CacheAction, config_path: PathBuf, _verbose: bool) -> Result<()> {
    let config = RunConfig::load(&config_path)?;
    let cache_dir = config.output_dir.join(".strucflow").join("cache");
    let cache = FilesystemCache::new(cache_dir.clone())?;

    match action {
        CacheAction::Stats => {
            let stats = cache.stats().await?;

            println!("{}", "Cache Statistics".bold());
            println!("{}", "═".repeat(40));
            println!("  Location: {}", cache_dir.display());
            println!("  Entries:  {}", stats.entries);
            println!("  Size:     {}", stats.formatted_size());

            if let Some(oldest) = stats.oldest_entry {
                if let Ok(duration) = oldest.elapsed() {
                    println!("  Oldest:   {} ago", format_duration(duration));
                }
            }

            if let Some(newest) = stats.newest_entry {
                if let Ok(duration) = newest.elapsed() {
                    println!("  Newest:   {} ago", format_duration(duration));
                }
            }

            Ok(())
        }

        CacheAction::Clear { yes } => {
            let stats = cache.stats().await?;

            if stats.entries == 0 {
                println!("{}", "Cache is already empty.".dimmed());
                return Ok(());
            }

            if !yes {
                print!(
                    "Clear {} cache entries ({})? [y/N] ",
                    stats.entries,
                    stats.formatted_size()
                );
                io::stdout().flush().ok();

                let mut input = String::new();
                io::stdin().read_line(&mut input).ok();

                if !input.trim().eq_ignore_ascii_case("y") {
                    println!("{}", "Cancelled.".dimmed());
                    return Ok(());
                }
            }

            cache.clear().await?;
            println!("{}", "Cache cleared.".green());

            Ok(())
        }

        CacheAction::List => {
            let mut entries = cache.entries().await?;
            entries.sort_by(|a, b| (&a.stage, &a.binding).cmp(&(&b.stage, &b.binding)));

            println!("{}", "Cached Entries".bold());
            println!("{}", "═".repeat(40));

            if entries.is_empty() {
                println!("{}", "  No cached entries.".dimmed());
                return Ok(());
            }

            for entry in &entries {
                let age = entry
                    .timestamp
                    .elapsed()
                    .map(format_duration)
                    .unwrap_or_else(|_| "?".to_string());
                println!(
                    "  {} [{}]  {}  {} ago",
                    entry.stage,
                    entry.binding.dimmed(),
                    &entry.cache_key[..12.min(entry.cache_key.len())],
                    age
                );
            }

            Ok(())
        }
    }
}

fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m", secs / 60)
    } else if secs < 86400 {
        format!("{}h", secs / 3600)
    } else {
        format!("{}d", secs / 86400)
    }
}
