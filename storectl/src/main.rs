// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # NOVA Store Control
//!
//! Entry point for the `nova-storectl` binary. Parses CLI arguments,
//! initializes logging, opens the store and runs one subcommand:
//!
//! - `tables`  : list tables and their prefixes
//! - `get` / `put` / `delete` : single-row access
//! - `scan`    : ordered range reads, forward or reverse
//! - `count` / `clear` : whole-table operations
//! - `metrics` : Prometheus text dump
//! - `version` : print build version information

mod cli;
mod commands;
mod logging;

use anyhow::{Context, Result};
use clap::Parser;

use nova_store::Repository;

use cli::{Commands, StoreCtlCli};
use commands::Codec;
use logging::LogFormat;

fn main() -> Result<()> {
    let cli = StoreCtlCli::parse();

    if let Commands::Version = cli.command {
        println!("nova-storectl {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    logging::init_logging(
        "nova_storectl=info,nova_store=warn",
        LogFormat::from_str_lossy(&cli.store.log_format),
    );

    let config = commands::resolve_config(&cli.store)?;
    tracing::debug!(
        backend = config.backend.as_str(),
        path = %config.path.display(),
        "opening store"
    );
    let repo = Repository::open(&config).with_context(|| {
        format!(
            "failed to open {} store at {}",
            config.backend.as_str(),
            config.path.display()
        )
    })?;

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    commands::execute(&repo, &cli.command, Codec::from_args(&cli.store), &mut out)?;

    repo.flush().context("failed to flush store")?;
    Ok(())
}
