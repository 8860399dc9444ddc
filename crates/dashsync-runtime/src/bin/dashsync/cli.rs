//! CLI definitions for dashsync.

use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(
    name = "dashsync",
    version,
    about = "Dashboard layout sync tooling",
    after_help = "Examples:\n  dashsync validate --registry widgets.toml --layout layout.json\n  dashsync validate --registry widgets.toml --layout layout.json --write\n  dashsync diff old.json new.json --source remote-sync"
)]
pub struct Cli {
    /// Path to dashsync.toml.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
    /// Log at debug level.
    #[arg(long, short, global = true)]
    pub verbose: bool,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Repair a layout file against a widget registry.
    Validate {
        /// Widget registry (`[[widget]]` tables).
        #[arg(long)]
        registry: PathBuf,
        /// Layout JSON (array of widget entries).
        #[arg(long)]
        layout: PathBuf,
        /// Write the repaired layout back to the layout file.
        #[arg(long, action = ArgAction::SetTrue)]
        write: bool,
    },
    /// Show the structural difference between two layouts.
    Diff {
        old: PathBuf,
        new: PathBuf,
        /// Update source used for the reload decision.
        #[arg(long, default_value = "remote-sync")]
        source: String,
    },
}
