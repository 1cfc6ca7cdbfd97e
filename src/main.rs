mod archive;
mod config;
mod export;
mod fallback;
mod merge;
mod model;
mod snapshot;
mod store;
mod tally;
mod util;

use crate::config::Config;
use crate::merge::MergeStore;
use crate::model::Merge;
use crate::store::ElectionStore;
use clap::{Parser, Subcommand};
use colored::*;
use itertools::Itertools;
use std::collections::HashSet;
use std::path::PathBuf;

#[derive(Parser)]
struct Opts {
    /// Application data directory (defaults to ~/.edison-merge).
    #[clap(long)]
    data_dir: Option<PathBuf>,
    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Merge booth result archives into one tallied result.
    Merge {
        /// Booth archives, one per booth.
        archives: Vec<PathBuf>,
    },
    /// List stored merges.
    Merges,
    /// Show one merge in detail.
    ShowMerge { merge_id: String },
    /// Delete a merge wholesale.
    DeleteMerge { merge_id: String },
    /// Copy a merged election into a fresh round, moving non-winners of the
    /// flagged polls into their fallback polls.
    Fallback {
        merge_id: String,
        /// Poll ids to apply fallback to (repeatable).
        #[clap(long = "poll")]
        polls: Vec<String>,
    },
    /// Export a subset of a live election's polls as a booth archive.
    Export {
        election_id: String,
        /// Poll ids to include (repeatable).
        #[clap(long = "poll")]
        polls: Vec<String>,
    },
}

#[tokio::main]
async fn main() {
    let opts = Opts::parse();
    let data_dir = opts.data_dir.unwrap_or_else(Config::default_data_dir);
    let config = Config::from_data_dir(data_dir);

    if let Err(e) = run(&config, opts.command).await {
        eprintln!("{} {}", "error:".bright_red().bold(), e);
        std::process::exit(1);
    }
}

async fn run(config: &Config, command: Command) -> Result<(), Box<dyn std::error::Error>> {
    config.ensure_dirs().await?;

    match command {
        Command::Merge { archives } => {
            if archives.is_empty() {
                return Err("no archives given".into());
            }
            let store = MergeStore::open(&Config::sqlite_url(&config.merge_db)).await?;
            println!("Merging {} booth archive(s)...", archives.len());
            let merge = merge::merge_archives(config, &store, &archives).await?;
            print_merge(&merge);
        }
        Command::Merges => {
            let store = MergeStore::open(&Config::sqlite_url(&config.merge_db)).await?;
            let merges = store.merges().await?;
            if merges.is_empty() {
                println!("No merges stored.");
            }
            for merge in merges {
                let name = merge
                    .merged
                    .as_ref()
                    .map(|t| t.election.name.as_str())
                    .unwrap_or("(empty)");
                println!(
                    "{}  {}  {} poll(s), {} tie(s)",
                    merge.id.bright_cyan(),
                    name,
                    merge.polls.len(),
                    merge.ties.len()
                );
            }
        }
        Command::ShowMerge { merge_id } => {
            let store = MergeStore::open(&Config::sqlite_url(&config.merge_db)).await?;
            match store.merge_by_id(&merge_id).await? {
                Some(merge) => print_merge(&merge),
                None => return Err(format!("merge {} not found", merge_id).into()),
            }
        }
        Command::DeleteMerge { merge_id } => {
            let store = MergeStore::open(&Config::sqlite_url(&config.merge_db)).await?;
            if store.delete_merge(&merge_id).await? == 0 {
                return Err(format!("merge {} not found", merge_id).into());
            }
            println!("Deleted merge {}", merge_id.bright_cyan());
        }
        Command::Fallback { merge_id, polls } => {
            let merge_store = MergeStore::open(&Config::sqlite_url(&config.merge_db)).await?;
            let merge = merge_store
                .merge_by_id(&merge_id)
                .await?
                .ok_or_else(|| format!("merge {} not found", merge_id))?;
            let election_store =
                ElectionStore::open(&Config::sqlite_url(&config.elections_db)).await?;

            let flagged: HashSet<String> = polls.into_iter().collect();
            let new_id = fallback::fallback_copy(&election_store, config, &merge, &flagged).await?;
            println!(
                "{} New election round created: {}",
                "✅".bright_green(),
                new_id.bright_cyan()
            );
        }
        Command::Export { election_id, polls } => {
            let election_store =
                ElectionStore::open(&Config::sqlite_url(&config.elections_db)).await?;
            let included: HashSet<String> = polls.into_iter().collect();
            let zip_path =
                export::export_election(&election_store, config, &election_id, &included).await?;
            println!(
                "{} Export written to {}",
                "✅".bright_green(),
                zip_path.display().to_string().bright_green()
            );
        }
    }

    Ok(())
}

fn print_merge(merge: &Merge) {
    println!(
        "{}: {}  ({})",
        "Merge".bright_white().bold(),
        merge.id.bright_cyan(),
        merge.created_at.format("%Y-%m-%d %H:%M:%S UTC")
    );

    match &merge.merged {
        Some(tree) => println!("{}: {}", "Election".bright_white().bold(), tree.election.name),
        None => println!("{}", "Empty merge (no snapshots)".bright_yellow()),
    }

    for total in &merge.polls {
        println!(
            "  {}: {} vote(s)",
            total.name,
            total.votes.to_string().bright_yellow()
        );
    }

    if merge.ties.is_empty() {
        println!("{}", "No ties detected.".bright_green());
    } else {
        for tie in &merge.ties {
            println!(
                "{} {} tie between {}",
                "⚠".bright_red().bold(),
                tie.poll_name.bright_red(),
                tie.candidates.iter().join(", ")
            );
        }
    }

    if let Some(tree) = &merge.merged {
        for poll in &tree.polls {
            let winners = poll.winners.iter().map(|w| w.name.as_str()).join(", ");
            println!(
                "  {} {} -> {}",
                "🏆".bright_green(),
                poll.poll.name,
                winners.bright_green()
            );
        }
    }
}
