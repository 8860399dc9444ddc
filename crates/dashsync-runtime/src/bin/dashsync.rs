//! CLI entrypoint for dashboard layout tooling.

#[path = "dashsync/cli.rs"]
mod cli;
#[path = "dashsync/diff.rs"]
mod diff;
#[path = "dashsync/validate.rs"]
mod validate;

use clap::Parser;
use dashsync_runtime::SyncConfig;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Command};

fn main() -> anyhow::Result<()> {
    if let Err(err) = run() {
        eprintln!("Error: {err:#}");
        std::process::exit(1);
    }
    Ok(())
}

fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => SyncConfig::load(path)?,
        None => SyncConfig::default(),
    };
    init_tracing(if cli.verbose { "debug" } else { &config.log_level });
    match cli.command {
        Command::Validate {
            registry,
            layout,
            write,
        } => validate::run_validate(&registry, &layout, write),
        Command::Diff { old, new, source } => diff::run_diff(&old, &new, &source),
    }
}

fn init_tracing(level: &str) {
    let rust_log = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    tracing_subscriber::fmt()
        .with_env_filter(log_filter(level, rust_log.as_deref()))
        .with_writer(std::io::stderr)
        .init();
}

/// `RUST_LOG` when set, otherwise the configured (or `--verbose`) level.
fn log_filter(level: &str, rust_log: Option<&str>) -> EnvFilter {
    match rust_log.filter(|directives| !directives.trim().is_empty()) {
        Some(directives) => EnvFilter::new(directives),
        None => {
            let level = level.parse().unwrap_or(tracing::Level::INFO);
            EnvFilter::default().add_directive(level.into())
        }
    }
}
